use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;

use stockledger_core::ProductId;
use stockledger_inventory::{InventoryLogEntry, Product};

/// Storage operation error.
///
/// These are infrastructure failures as opposed to domain validation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("storage error: {0}")]
    Storage(String),
}

/// Point-in-time inventory aggregates used by the report stage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InventoryStats {
    pub total_products: u64,
    /// Products with `quantity < low_stock_threshold`. Includes out-of-stock.
    pub low_stock: u64,
    pub out_of_stock: u64,
    /// Ledger entries recorded at or after the window start.
    pub recent_updates: u64,
    pub average_price: Decimal,
    pub low_stock_pct: f64,
    pub out_of_stock_pct: f64,
}

impl InventoryStats {
    /// Assemble stats from raw counts, deriving percentages rounded to one
    /// decimal place. Percentages are zero for an empty catalogue.
    pub fn from_counts(
        total_products: u64,
        low_stock: u64,
        out_of_stock: u64,
        recent_updates: u64,
        average_price: Decimal,
    ) -> Self {
        Self {
            total_products,
            low_stock,
            out_of_stock,
            recent_updates,
            average_price: average_price.round_dp(2),
            low_stock_pct: percentage(low_stock, total_products),
            out_of_stock_pct: percentage(out_of_stock, total_products),
        }
    }
}

/// A product ranked by its ledger activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrendingProduct {
    pub product_id: ProductId,
    pub sku: String,
    pub name: String,
    pub quantity: i64,
    /// Entry count, units added or units removed (negative), per list.
    pub score: i64,
}

/// Ledger activity of one product within a window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductActivity {
    pub product_id: ProductId,
    pub sku: String,
    pub name: String,
    pub quantity: i64,
    pub entries: i64,
    /// Sum of positive changes.
    pub added: i64,
    /// Sum of negative changes (zero or less).
    pub removed: i64,
}

/// Products with the most inventory movement over a window.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TrendingProducts {
    /// Most ledger entries.
    pub most_active: Vec<TrendingProduct>,
    /// Largest total increase.
    pub most_restocked: Vec<TrendingProduct>,
    /// Largest total decrease.
    pub selling_fast: Vec<TrendingProduct>,
}

impl TrendingProducts {
    /// Rank `activity` into the three lists, `limit` products each.
    ///
    /// Products with nothing to rank on are left out of a list. Ties are
    /// broken by SKU.
    pub fn rank(activity: &[ProductActivity], limit: usize) -> Self {
        Self {
            most_active: top(activity, limit, |a: &ProductActivity| a.entries, true),
            most_restocked: top(activity, limit, |a: &ProductActivity| a.added, true),
            selling_fast: top(activity, limit, |a: &ProductActivity| a.removed, false),
        }
    }
}

fn top(
    activity: &[ProductActivity],
    limit: usize,
    score: fn(&ProductActivity) -> i64,
    descending: bool,
) -> Vec<TrendingProduct> {
    let mut ranked: Vec<&ProductActivity> = activity.iter().filter(|a| score(a) != 0).collect();
    ranked.sort_by(|a, b| {
        let by_score = score(a).cmp(&score(b));
        let by_score = if descending { by_score.reverse() } else { by_score };
        by_score.then_with(|| a.sku.cmp(&b.sku))
    });
    ranked
        .into_iter()
        .take(limit)
        .map(|a| TrendingProduct {
            product_id: a.product_id,
            sku: a.sku.clone(),
            name: a.name.clone(),
            quantity: a.quantity,
            score: score(a),
        })
        .collect()
}

fn percentage(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    let raw = part as f64 * 100.0 / whole as f64;
    (raw * 10.0).round() / 10.0
}

/// One unit of work against the inventory store.
///
/// Every write made through a transaction becomes visible atomically on
/// [`StoreTx::commit`]. Dropping a transaction without committing discards
/// all of its writes.
///
/// Product reads inside a transaction lock the product row until the
/// transaction ends, so two transactions touching the same product are
/// serialized.
#[async_trait::async_trait]
pub trait StoreTx: Send {
    async fn product(&mut self, id: ProductId) -> Result<Option<Product>, StoreError>;

    async fn product_by_sku(&mut self, sku: &str) -> Result<Option<Product>, StoreError>;

    /// Insert a new product unless its SKU already exists.
    ///
    /// Returns `false` and writes nothing when the SKU is taken, including by
    /// a concurrent unit of work that committed first. The caller should then
    /// re-read the product with [`StoreTx::product_by_sku`], which locks it.
    async fn insert_product(&mut self, product: &Product) -> Result<bool, StoreError>;

    /// Persist `quantity`, `last_inventory_change_at` and `updated_at`.
    async fn write_quantity(&mut self, product: &Product) -> Result<(), StoreError>;

    /// Persist `name`, `price`, `description` and `updated_at`.
    async fn write_details(&mut self, product: &Product) -> Result<(), StoreError>;

    /// Append a ledger entry. The owning product must exist.
    async fn append_log(&mut self, entry: &InventoryLogEntry) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}

/// Products plus their audit ledger.
///
/// Implementations: [`super::InMemoryInventoryStore`] for tests/dev and
/// [`super::PostgresInventoryStore`] for production.
#[async_trait::async_trait]
pub trait InventoryStore: Send + Sync {
    /// Open a unit of work.
    async fn begin(&self) -> Result<Box<dyn StoreTx + '_>, StoreError>;

    async fn get(&self, id: ProductId) -> Result<Option<Product>, StoreError>;

    async fn find_by_sku(&self, sku: &str) -> Result<Option<Product>, StoreError>;

    async fn find_by_external_id(&self, external_id: &str)
    -> Result<Option<Product>, StoreError>;

    /// Link a product to its identifier in the external storefront.
    async fn set_external_id(
        &self,
        id: ProductId,
        external_id: Option<String>,
    ) -> Result<Product, StoreError>;

    /// Ledger entries, newest first. `None` returns entries across all products.
    async fn recent_entries(
        &self,
        product_id: Option<ProductId>,
        limit: usize,
    ) -> Result<Vec<InventoryLogEntry>, StoreError>;

    async fn count_entries_since(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;

    async fn stats(
        &self,
        low_stock_threshold: i64,
        recent_cutoff: DateTime<Utc>,
    ) -> Result<InventoryStats, StoreError>;

    /// Products ranked by ledger entries recorded at or after `since`.
    async fn trending(
        &self,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<TrendingProducts, StoreError>;
}

#[async_trait::async_trait]
impl<S> InventoryStore for Arc<S>
where
    S: InventoryStore + ?Sized,
{
    async fn begin(&self) -> Result<Box<dyn StoreTx + '_>, StoreError> {
        (**self).begin().await
    }

    async fn get(&self, id: ProductId) -> Result<Option<Product>, StoreError> {
        (**self).get(id).await
    }

    async fn find_by_sku(&self, sku: &str) -> Result<Option<Product>, StoreError> {
        (**self).find_by_sku(sku).await
    }

    async fn find_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<Product>, StoreError> {
        (**self).find_by_external_id(external_id).await
    }

    async fn set_external_id(
        &self,
        id: ProductId,
        external_id: Option<String>,
    ) -> Result<Product, StoreError> {
        (**self).set_external_id(id, external_id).await
    }

    async fn recent_entries(
        &self,
        product_id: Option<ProductId>,
        limit: usize,
    ) -> Result<Vec<InventoryLogEntry>, StoreError> {
        (**self).recent_entries(product_id, limit).await
    }

    async fn count_entries_since(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        (**self).count_entries_since(cutoff).await
    }

    async fn stats(
        &self,
        low_stock_threshold: i64,
        recent_cutoff: DateTime<Utc>,
    ) -> Result<InventoryStats, StoreError> {
        (**self).stats(low_stock_threshold, recent_cutoff).await
    }

    async fn trending(
        &self,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<TrendingProducts, StoreError> {
        (**self).trending(since, limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentages_round_to_one_decimal() {
        let s = InventoryStats::from_counts(3, 1, 0, 0, Decimal::new(2999, 2));
        assert_eq!(s.low_stock_pct, 33.3);
        assert_eq!(s.out_of_stock_pct, 0.0);
    }

    fn activity(sku: &str, entries: i64, added: i64, removed: i64) -> ProductActivity {
        ProductActivity {
            product_id: ProductId::new(),
            sku: sku.to_string(),
            name: format!("Product {sku}"),
            quantity: 0,
            entries,
            added,
            removed,
        }
    }

    #[test]
    fn ranking_orders_each_list_and_skips_zero_scores() {
        let rows = [
            activity("A", 3, 10, -2),
            activity("B", 1, 0, -9),
            activity("C", 3, 25, 0),
        ];
        let t = TrendingProducts::rank(&rows, 5);

        let skus = |list: &[TrendingProduct]| list.iter().map(|p| p.sku.clone()).collect::<Vec<_>>();
        assert_eq!(skus(&t.most_active), ["A", "C", "B"]);
        assert_eq!(skus(&t.most_restocked), ["C", "A"]);
        assert_eq!(skus(&t.selling_fast), ["B", "A"]);
        assert_eq!(t.selling_fast[0].score, -9);
    }

    #[test]
    fn ranking_respects_limit() {
        let rows: Vec<_> = (0..8).map(|i| activity(&format!("S{i}"), i + 1, 0, 0)).collect();
        let t = TrendingProducts::rank(&rows, 5);
        assert_eq!(t.most_active.len(), 5);
        assert_eq!(t.most_active[0].sku, "S7");
        assert!(t.most_restocked.is_empty());
    }

    #[test]
    fn empty_catalogue_has_zero_percentages() {
        let s = InventoryStats::from_counts(0, 0, 0, 0, Decimal::ZERO);
        assert_eq!(s.low_stock_pct, 0.0);
        assert_eq!(s.average_price, Decimal::ZERO);
    }
}
