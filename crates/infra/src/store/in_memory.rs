use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::{Mutex, OwnedMutexGuard};

use stockledger_core::{LogEntryId, ProductId};
use stockledger_inventory::{ChangeType, InventoryLogEntry, LogEntryDraft, Product, Quantity};

use super::r#trait::{
    InventoryStats, InventoryStore, ProductActivity, StoreError, StoreTx, TrendingProducts,
};

/// A write step that can be made to fail on demand in tests.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum FailPoint {
    InsertProduct,
    WriteQuantity,
    WriteDetails,
    AppendLog,
    Commit,
}

#[derive(Debug, Clone)]
struct InjectedFailure {
    point: FailPoint,
    /// Restrict the failure to one SKU. `None` matches every product.
    sku: Option<String>,
}

#[derive(Debug, Default)]
struct State {
    products: HashMap<ProductId, Product>,
    sku_index: HashMap<String, ProductId>,
    /// Append order. Never rewritten.
    log: Vec<InventoryLogEntry>,
}

/// In-memory inventory store.
///
/// Intended for tests/dev. Not optimized for performance.
///
/// A transaction holds the store-wide lock from `begin` until it is committed
/// or dropped, so units of work never interleave.
#[derive(Debug, Default)]
pub struct InMemoryInventoryStore {
    state: Arc<Mutex<State>>,
    failures: StdMutex<Vec<InjectedFailure>>,
    /// Products a competing writer commits just before their SKU is inserted.
    competing: StdMutex<Vec<Product>>,
}

impl InMemoryInventoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Make every future `point` step fail until cleared.
    pub fn fail_on(&self, point: FailPoint) {
        self.push_failure(InjectedFailure { point, sku: None });
    }

    /// Make `point` fail only while handling the product with `sku`.
    pub fn fail_on_sku(&self, point: FailPoint, sku: impl Into<String>) {
        self.push_failure(InjectedFailure {
            point,
            sku: Some(sku.into()),
        });
    }

    /// The next insert of `product.sku` loses to a competing writer that
    /// commits `product` (with its initial ledger entry) first.
    pub fn commit_competing_insert(&self, product: Product) {
        if let Ok(mut competing) = self.competing.lock() {
            competing.push(product);
        }
    }

    pub fn clear_failures(&self) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.clear();
        }
    }

    /// Number of ledger entries committed so far.
    pub async fn entry_count(&self) -> usize {
        self.state.lock().await.log.len()
    }

    /// All committed products, ordered by SKU.
    pub async fn products(&self) -> Vec<Product> {
        let state = self.state.lock().await;
        let mut products: Vec<Product> = state.products.values().cloned().collect();
        products.sort_by(|a, b| a.sku.cmp(&b.sku));
        products
    }

    fn push_failure(&self, failure: InjectedFailure) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.push(failure);
        }
    }

    fn check(&self, point: FailPoint, sku: Option<&str>) -> Result<(), StoreError> {
        let failures = self
            .failures
            .lock()
            .map_err(|_| StoreError::Storage("lock poisoned".to_string()))?;
        let hit = failures.iter().any(|f| {
            f.point == point
                && match (&f.sku, sku) {
                    (None, _) => true,
                    (Some(want), Some(got)) => want == got,
                    (Some(_), None) => false,
                }
        });
        if hit {
            return Err(StoreError::Storage(format!("injected failure at {point:?}")));
        }
        Ok(())
    }

    fn take_competing(&self, sku: &str) -> Option<Product> {
        let mut competing = self.competing.lock().ok()?;
        let i = competing.iter().position(|p| p.sku == sku)?;
        Some(competing.remove(i))
    }
}

/// Uncommitted writes layered over the locked state.
struct InMemoryTx<'a> {
    store: &'a InMemoryInventoryStore,
    state: OwnedMutexGuard<State>,
    products: HashMap<ProductId, Product>,
    log: Vec<InventoryLogEntry>,
}

impl InMemoryTx<'_> {
    fn current(&self, id: ProductId) -> Option<&Product> {
        self.products.get(&id).or_else(|| self.state.products.get(&id))
    }

    fn sku_taken(&self, sku: &str) -> bool {
        self.state.sku_index.contains_key(sku) || self.products.values().any(|p| p.sku == sku)
    }

    fn require(&self, product: &Product) -> Result<Product, StoreError> {
        self.current(product.id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("product {}", product.id)))
    }
}

#[async_trait::async_trait]
impl StoreTx for InMemoryTx<'_> {
    async fn product(&mut self, id: ProductId) -> Result<Option<Product>, StoreError> {
        Ok(self.current(id).cloned())
    }

    async fn product_by_sku(&mut self, sku: &str) -> Result<Option<Product>, StoreError> {
        if let Some(p) = self.products.values().find(|p| p.sku == sku) {
            return Ok(Some(p.clone()));
        }
        Ok(self
            .state
            .sku_index
            .get(sku)
            .and_then(|id| self.state.products.get(id))
            .cloned())
    }

    async fn insert_product(&mut self, product: &Product) -> Result<bool, StoreError> {
        self.store
            .check(FailPoint::InsertProduct, Some(&product.sku))?;
        if let Some(winner) = self.store.take_competing(&product.sku) {
            let entry = InventoryLogEntry::record(
                LogEntryId::new(),
                LogEntryDraft {
                    product_id: winner.id,
                    previous_quantity: Quantity::ZERO,
                    new_quantity: winner.quantity,
                    change_type: ChangeType::BatchImport,
                    note: "Initial import".to_string(),
                },
                winner.created_at,
            );
            self.state.sku_index.insert(winner.sku.clone(), winner.id);
            self.state.products.insert(winner.id, winner);
            self.state.log.push(entry);
        }
        if self.sku_taken(&product.sku) {
            return Ok(false);
        }
        self.products.insert(product.id, product.clone());
        Ok(true)
    }

    async fn write_quantity(&mut self, product: &Product) -> Result<(), StoreError> {
        self.store
            .check(FailPoint::WriteQuantity, Some(&product.sku))?;
        let mut row = self.require(product)?;
        row.quantity = product.quantity;
        row.last_inventory_change_at = product.last_inventory_change_at;
        row.updated_at = product.updated_at;
        self.products.insert(row.id, row);
        Ok(())
    }

    async fn write_details(&mut self, product: &Product) -> Result<(), StoreError> {
        self.store
            .check(FailPoint::WriteDetails, Some(&product.sku))?;
        let mut row = self.require(product)?;
        row.name = product.name.clone();
        row.price = product.price;
        row.description = product.description.clone();
        row.updated_at = product.updated_at;
        self.products.insert(row.id, row);
        Ok(())
    }

    async fn append_log(&mut self, entry: &InventoryLogEntry) -> Result<(), StoreError> {
        let sku = self.current(entry.product_id()).map(|p| p.sku.clone());
        let Some(sku) = sku else {
            return Err(StoreError::NotFound(format!(
                "product {}",
                entry.product_id()
            )));
        };
        self.store.check(FailPoint::AppendLog, Some(&sku))?;
        self.log.push(entry.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.store.check(FailPoint::Commit, None)?;
        let InMemoryTx {
            mut state,
            products,
            log,
            ..
        } = *self;
        for (id, product) in products {
            state.sku_index.insert(product.sku.clone(), id);
            state.products.insert(id, product);
        }
        state.log.extend(log);
        Ok(())
    }
}

#[async_trait::async_trait]
impl InventoryStore for InMemoryInventoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx + '_>, StoreError> {
        let state = self.state.clone().lock_owned().await;
        Ok(Box::new(InMemoryTx {
            store: self,
            state,
            products: HashMap::new(),
            log: Vec::new(),
        }))
    }

    async fn get(&self, id: ProductId) -> Result<Option<Product>, StoreError> {
        Ok(self.state.lock().await.products.get(&id).cloned())
    }

    async fn find_by_sku(&self, sku: &str) -> Result<Option<Product>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .sku_index
            .get(sku)
            .and_then(|id| state.products.get(id))
            .cloned())
    }

    async fn find_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<Product>, StoreError> {
        let state = self.state.lock().await;
        // Oldest first, matching the Postgres ordering when ids collide.
        let mut matches: Vec<&Product> = state
            .products
            .values()
            .filter(|p| p.external_id.as_deref() == Some(external_id))
            .collect();
        matches.sort_by_key(|p| (p.created_at, p.id));
        Ok(matches.first().map(|p| (*p).clone()))
    }

    async fn set_external_id(
        &self,
        id: ProductId,
        external_id: Option<String>,
    ) -> Result<Product, StoreError> {
        let mut state = self.state.lock().await;
        let product = state
            .products
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("product {id}")))?;
        product.external_id = external_id;
        product.updated_at = Utc::now();
        Ok(product.clone())
    }

    async fn recent_entries(
        &self,
        product_id: Option<ProductId>,
        limit: usize,
    ) -> Result<Vec<InventoryLogEntry>, StoreError> {
        let state = self.state.lock().await;
        let mut entries: Vec<&InventoryLogEntry> = state
            .log
            .iter()
            .filter(|e| product_id.is_none_or(|id| e.product_id() == id))
            .collect();
        // Stable sort keeps append order among equal timestamps; reverse for newest first.
        entries.sort_by_key(|e| e.recorded_at());
        Ok(entries.into_iter().rev().take(limit).cloned().collect())
    }

    async fn count_entries_since(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let state = self.state.lock().await;
        Ok(state.log.iter().filter(|e| e.recorded_at() >= cutoff).count() as u64)
    }

    async fn stats(
        &self,
        low_stock_threshold: i64,
        recent_cutoff: DateTime<Utc>,
    ) -> Result<InventoryStats, StoreError> {
        let state = self.state.lock().await;
        let total = state.products.len() as u64;
        let mut low = 0u64;
        let mut out = 0u64;
        let mut price_sum = Decimal::ZERO;
        for p in state.products.values() {
            if p.quantity.value() < low_stock_threshold {
                low += 1;
            }
            if p.quantity.is_zero() {
                out += 1;
            }
            price_sum += p.price.amount();
        }
        let average = if total == 0 {
            Decimal::ZERO
        } else {
            price_sum / Decimal::from(total)
        };
        let recent = state
            .log
            .iter()
            .filter(|e| e.recorded_at() >= recent_cutoff)
            .count() as u64;
        Ok(InventoryStats::from_counts(total, low, out, recent, average))
    }

    async fn trending(
        &self,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<TrendingProducts, StoreError> {
        let state = self.state.lock().await;
        let mut activity: HashMap<ProductId, ProductActivity> = HashMap::new();
        for entry in state.log.iter().filter(|e| e.recorded_at() >= since) {
            let Some(product) = state.products.get(&entry.product_id()) else {
                continue;
            };
            let row = activity
                .entry(product.id)
                .or_insert_with(|| ProductActivity {
                    product_id: product.id,
                    sku: product.sku.clone(),
                    name: product.name.clone(),
                    quantity: product.quantity.value(),
                    entries: 0,
                    added: 0,
                    removed: 0,
                });
            row.entries += 1;
            match entry.delta() {
                d if d > 0 => row.added += d,
                d => row.removed += d,
            }
        }
        let activity: Vec<ProductActivity> = activity.into_values().collect();
        Ok(TrendingProducts::rank(&activity, limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockledger_inventory::{NewProduct, Price, ProductDetails};

    fn product(sku: &str, qty: i64) -> Product {
        Product::create(
            ProductId::new(),
            NewProduct {
                sku: sku.to_string(),
                details: ProductDetails {
                    name: format!("Product {sku}"),
                    price: Price::parse("10.00").unwrap(),
                    description: String::new(),
                },
                quantity: Quantity::new(qty).unwrap(),
                external_id: None,
            },
            Utc::now(),
        )
        .unwrap()
    }

    fn entry(p: &Product) -> InventoryLogEntry {
        InventoryLogEntry::record(
            LogEntryId::new(),
            LogEntryDraft {
                product_id: p.id,
                previous_quantity: Quantity::ZERO,
                new_quantity: p.quantity,
                change_type: ChangeType::BatchImport,
                note: "initial import".to_string(),
            },
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn dropped_transaction_discards_writes() {
        let store = InMemoryInventoryStore::new();
        let p = product("A1", 5);
        {
            let mut tx = store.begin().await.unwrap();
            tx.insert_product(&p).await.unwrap();
            tx.append_log(&entry(&p)).await.unwrap();
        }
        assert!(store.get(p.id).await.unwrap().is_none());
        assert_eq!(store.entry_count().await, 0);
    }

    #[tokio::test]
    async fn committed_transaction_is_visible() {
        let store = InMemoryInventoryStore::new();
        let p = product("A1", 5);
        let mut tx = store.begin().await.unwrap();
        tx.insert_product(&p).await.unwrap();
        tx.append_log(&entry(&p)).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(store.find_by_sku("A1").await.unwrap().unwrap().id, p.id);
        assert_eq!(store.recent_entries(Some(p.id), 5).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn duplicate_sku_is_skipped() {
        let store = InMemoryInventoryStore::new();
        let mut tx = store.begin().await.unwrap();
        assert!(tx.insert_product(&product("A1", 1)).await.unwrap());
        assert!(!tx.insert_product(&product("A1", 2)).await.unwrap());
        assert_eq!(tx.product_by_sku("A1").await.unwrap().unwrap().quantity.value(), 1);
    }

    #[tokio::test]
    async fn competing_insert_wins_and_is_visible_in_the_transaction() {
        let store = InMemoryInventoryStore::new();
        let winner = product("R1", 3);
        store.commit_competing_insert(winner.clone());

        let mut tx = store.begin().await.unwrap();
        assert!(!tx.insert_product(&product("R1", 9)).await.unwrap());
        assert_eq!(tx.product_by_sku("R1").await.unwrap().unwrap().id, winner.id);
        drop(tx);

        // The competing writer committed independently of the dropped unit.
        assert_eq!(store.find_by_sku("R1").await.unwrap().unwrap().id, winner.id);
        assert_eq!(store.entry_count().await, 1);
    }

    #[tokio::test]
    async fn log_requires_existing_product() {
        let store = InMemoryInventoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let err = tx.append_log(&entry(&product("X", 1))).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn failure_injection_can_target_one_sku() {
        let store = InMemoryInventoryStore::new();
        store.fail_on_sku(FailPoint::InsertProduct, "BAD");

        let mut tx = store.begin().await.unwrap();
        tx.insert_product(&product("OK", 1)).await.unwrap();
        assert!(tx.insert_product(&product("BAD", 1)).await.is_err());
        drop(tx);

        store.clear_failures();
        let mut tx = store.begin().await.unwrap();
        tx.insert_product(&product("BAD", 1)).await.unwrap();
        tx.commit().await.unwrap();
    }

    fn movement(p: &Product, from: i64, to: i64, at: DateTime<Utc>) -> InventoryLogEntry {
        InventoryLogEntry::record(
            LogEntryId::new(),
            LogEntryDraft {
                product_id: p.id,
                previous_quantity: Quantity::new(from).unwrap(),
                new_quantity: Quantity::new(to).unwrap(),
                change_type: ChangeType::Manual,
                note: String::new(),
            },
            at,
        )
    }

    #[tokio::test]
    async fn trending_aggregates_ledger_within_window() {
        let store = InMemoryInventoryStore::new();
        let now = Utc::now();
        let old = now - chrono::Duration::days(40);
        let (a, b) = (product("A", 0), product("B", 0));

        let mut tx = store.begin().await.unwrap();
        tx.insert_product(&a).await.unwrap();
        tx.insert_product(&b).await.unwrap();
        for e in [
            movement(&a, 0, 100, old),
            movement(&a, 0, 20, now),
            movement(&a, 20, 5, now),
            movement(&a, 5, 8, now),
            movement(&b, 0, 50, now),
        ] {
            tx.append_log(&e).await.unwrap();
        }
        tx.commit().await.unwrap();

        let t = store
            .trending(now - chrono::Duration::days(30), 5)
            .await
            .unwrap();
        assert_eq!(t.most_active[0].sku, "A");
        assert_eq!(t.most_active[0].score, 3);
        assert_eq!(t.most_restocked[0].sku, "B");
        assert_eq!(t.most_restocked[0].score, 50);
        assert_eq!(t.most_restocked[1].score, 23);
        assert_eq!(t.selling_fast.len(), 1);
        assert_eq!(t.selling_fast[0].score, -15);
    }

    #[tokio::test]
    async fn stats_count_low_and_out_of_stock() {
        let store = InMemoryInventoryStore::new();
        let mut tx = store.begin().await.unwrap();
        for (sku, qty) in [("A", 0), ("B", 5), ("C", 50)] {
            let p = product(sku, qty);
            tx.insert_product(&p).await.unwrap();
            tx.append_log(&entry(&p)).await.unwrap();
        }
        tx.commit().await.unwrap();

        let stats = store
            .stats(10, Utc::now() - chrono::Duration::hours(24))
            .await
            .unwrap();
        assert_eq!(stats.total_products, 3);
        assert_eq!(stats.low_stock, 2);
        assert_eq!(stats.out_of_stock, 1);
        assert_eq!(stats.recent_updates, 3);
        assert_eq!(stats.average_price, Decimal::new(1000, 2));
    }
}
