//! Postgres-backed inventory store.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (unique violation) | `23505` | `UniqueViolation` |
//! | Database (foreign key violation) | `23503` | `NotFound` |
//! | Database (other) | Any other | `Storage` |
//! | PoolClosed / Other | N/A | `Storage` |
//!
//! ## Locking
//!
//! Product reads inside a [`StoreTx`] use `SELECT ... FOR UPDATE`, so concurrent
//! units of work on the same product are serialized by the database.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::instrument;
use uuid::Uuid;

use stockledger_core::{LogEntryId, ProductId};
use stockledger_inventory::{ChangeType, InventoryLogEntry, Price, Product, Quantity};

use super::r#trait::{
    InventoryStats, InventoryStore, ProductActivity, StoreError, StoreTx, TrendingProducts,
};

const SCHEMA: &str = include_str!("../../migrations/0001_inventory.sql");

const PRODUCT_COLUMNS: &str = "id, sku, name, price, inventory_quantity, description, \
     external_id, created_at, updated_at, last_inventory_update";

const LOG_COLUMNS: &str =
    "id, product_id, previous_quantity, new_quantity, change_type, notes, recorded_at";

/// Postgres-backed products and inventory ledger.
///
/// Uses the SQLx connection pool, so it is `Send + Sync` and cheap to clone.
#[derive(Debug, Clone)]
pub struct PostgresInventoryStore {
    pool: Arc<PgPool>,
}

impl PostgresInventoryStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Create the schema if it does not exist yet. Idempotent.
    #[instrument(skip(self), err)]
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }

    async fn fetch_product(
        &self,
        operation: &str,
        filter: &str,
        value: ProductFilter<'_>,
    ) -> Result<Option<Product>, StoreError> {
        let sql = format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE {filter} ORDER BY created_at, id LIMIT 1"
        );
        let query = sqlx::query(&sql);
        let query = match value {
            ProductFilter::Id(id) => query.bind(*id.as_uuid()),
            ProductFilter::Text(s) => query.bind(s),
        };
        let row = query
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;
        row.as_ref().map(product_from_row).transpose()
    }
}

enum ProductFilter<'a> {
    Id(ProductId),
    Text(&'a str),
}

/// A database transaction. Dropping it without `commit` rolls back.
struct PgStoreTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait::async_trait]
impl StoreTx for PgStoreTx {
    #[instrument(skip(self), fields(product_id = %id), err)]
    async fn product(&mut self, id: ProductId) -> Result<Option<Product>, StoreError> {
        let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1 FOR UPDATE");
        let row = sqlx::query(&sql)
            .bind(*id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("lock_product", e))?;
        row.as_ref().map(product_from_row).transpose()
    }

    #[instrument(skip(self), err)]
    async fn product_by_sku(&mut self, sku: &str) -> Result<Option<Product>, StoreError> {
        let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE sku = $1 FOR UPDATE");
        let row = sqlx::query(&sql)
            .bind(sku)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("lock_product_by_sku", e))?;
        row.as_ref().map(product_from_row).transpose()
    }

    #[instrument(skip(self, product), fields(sku = %product.sku), err)]
    async fn insert_product(&mut self, product: &Product) -> Result<bool, StoreError> {
        // Blocks on a concurrent uncommitted insert of the same SKU, then
        // skips the row if that insert committed.
        let result = sqlx::query(
            r#"
            INSERT INTO products (
                id, sku, name, price, inventory_quantity, description,
                external_id, created_at, updated_at, last_inventory_update
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (sku) DO NOTHING
            "#,
        )
        .bind(*product.id.as_uuid())
        .bind(&product.sku)
        .bind(&product.name)
        .bind(product.price.amount())
        .bind(product.quantity.value())
        .bind(&product.description)
        .bind(product.external_id.as_deref())
        .bind(product.created_at)
        .bind(product.updated_at)
        .bind(product.last_inventory_change_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_product", e))?;
        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self, product), fields(sku = %product.sku, quantity = product.quantity.value()), err)]
    async fn write_quantity(&mut self, product: &Product) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE products
            SET inventory_quantity = $2, last_inventory_update = $3, updated_at = $4
            WHERE id = $1
            "#,
        )
        .bind(*product.id.as_uuid())
        .bind(product.quantity.value())
        .bind(product.last_inventory_change_at)
        .bind(product.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("write_quantity", e))?;
        require_row(result.rows_affected(), product.id)
    }

    #[instrument(skip(self, product), fields(sku = %product.sku), err)]
    async fn write_details(&mut self, product: &Product) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE products
            SET name = $2, price = $3, description = $4, updated_at = $5
            WHERE id = $1
            "#,
        )
        .bind(*product.id.as_uuid())
        .bind(&product.name)
        .bind(product.price.amount())
        .bind(&product.description)
        .bind(product.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("write_details", e))?;
        require_row(result.rows_affected(), product.id)
    }

    #[instrument(skip(self, entry), fields(product_id = %entry.product_id(), delta = entry.delta()), err)]
    async fn append_log(&mut self, entry: &InventoryLogEntry) -> Result<(), StoreError> {
        use stockledger_core::Entity;

        sqlx::query(
            r#"
            INSERT INTO inventory_log (
                id, product_id, previous_quantity, new_quantity, change,
                change_type, notes, recorded_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(*entry.id().as_uuid())
        .bind(*entry.product_id().as_uuid())
        .bind(entry.previous_quantity().value())
        .bind(entry.new_quantity().value())
        .bind(entry.delta())
        .bind(entry.change_type().as_str())
        .bind(entry.note())
        .bind(entry.recorded_at())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("append_log", e))?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx
            .commit()
            .await
            .map_err(|e| map_sqlx_error("commit", e))
    }
}

#[async_trait::async_trait]
impl InventoryStore for PostgresInventoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx + '_>, StoreError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin", e))?;
        Ok(Box::new(PgStoreTx { tx }))
    }

    #[instrument(skip(self), fields(product_id = %id), err)]
    async fn get(&self, id: ProductId) -> Result<Option<Product>, StoreError> {
        self.fetch_product("get", "id = $1", ProductFilter::Id(id))
            .await
    }

    #[instrument(skip(self), err)]
    async fn find_by_sku(&self, sku: &str) -> Result<Option<Product>, StoreError> {
        self.fetch_product("find_by_sku", "sku = $1", ProductFilter::Text(sku))
            .await
    }

    #[instrument(skip(self), err)]
    async fn find_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<Product>, StoreError> {
        self.fetch_product(
            "find_by_external_id",
            "external_id = $1",
            ProductFilter::Text(external_id),
        )
        .await
    }

    #[instrument(skip(self), fields(product_id = %id), err)]
    async fn set_external_id(
        &self,
        id: ProductId,
        external_id: Option<String>,
    ) -> Result<Product, StoreError> {
        let sql = format!(
            "UPDATE products SET external_id = $2, updated_at = $3 WHERE id = $1 \
             RETURNING {PRODUCT_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(*id.as_uuid())
            .bind(external_id)
            .bind(Utc::now())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("set_external_id", e))?
            .ok_or_else(|| StoreError::NotFound(format!("product {id}")))?;
        product_from_row(&row)
    }

    #[instrument(skip(self), err)]
    async fn recent_entries(
        &self,
        product_id: Option<ProductId>,
        limit: usize,
    ) -> Result<Vec<InventoryLogEntry>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = match product_id {
            Some(id) => {
                let sql = format!(
                    "SELECT {LOG_COLUMNS} FROM inventory_log WHERE product_id = $1 \
                     ORDER BY recorded_at DESC, id DESC LIMIT $2"
                );
                sqlx::query(&sql)
                    .bind(*id.as_uuid())
                    .bind(limit)
                    .fetch_all(&*self.pool)
                    .await
            }
            None => {
                let sql = format!(
                    "SELECT {LOG_COLUMNS} FROM inventory_log \
                     ORDER BY recorded_at DESC, id DESC LIMIT $1"
                );
                sqlx::query(&sql).bind(limit).fetch_all(&*self.pool).await
            }
        }
        .map_err(|e| map_sqlx_error("recent_entries", e))?;

        rows.iter().map(entry_from_row).collect()
    }

    #[instrument(skip(self), err)]
    async fn count_entries_since(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM inventory_log WHERE recorded_at >= $1")
                .bind(cutoff)
                .fetch_one(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("count_entries_since", e))?;
        Ok(count.max(0) as u64)
    }

    #[instrument(skip(self), err)]
    async fn stats(
        &self,
        low_stock_threshold: i64,
        recent_cutoff: DateTime<Utc>,
    ) -> Result<InventoryStats, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total,
                COUNT(*) FILTER (WHERE inventory_quantity < $1) AS low_stock,
                COUNT(*) FILTER (WHERE inventory_quantity = 0) AS out_of_stock,
                COALESCE(AVG(price), 0)::NUMERIC AS average_price
            FROM products
            "#,
        )
        .bind(low_stock_threshold)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("stats", e))?;

        let total: i64 = get(&row, "total")?;
        let low: i64 = get(&row, "low_stock")?;
        let out: i64 = get(&row, "out_of_stock")?;
        let average: Decimal = get(&row, "average_price")?;
        let recent = self.count_entries_since(recent_cutoff).await?;

        Ok(InventoryStats::from_counts(
            total.max(0) as u64,
            low.max(0) as u64,
            out.max(0) as u64,
            recent,
            average,
        ))
    }

    #[instrument(skip(self), err)]
    async fn trending(
        &self,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<TrendingProducts, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT
                p.id, p.sku, p.name, p.inventory_quantity,
                COUNT(*) AS entries,
                COALESCE(SUM(l.change) FILTER (WHERE l.change > 0), 0)::BIGINT AS added,
                COALESCE(SUM(l.change) FILTER (WHERE l.change < 0), 0)::BIGINT AS removed
            FROM inventory_log l
            JOIN products p ON p.id = l.product_id
            WHERE l.recorded_at >= $1
            GROUP BY p.id, p.sku, p.name, p.inventory_quantity
            "#,
        )
        .bind(since)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("trending", e))?;

        let activity = rows
            .iter()
            .map(|row| {
                Ok(ProductActivity {
                    product_id: ProductId::from_uuid(get::<Uuid>(row, "id")?),
                    sku: get(row, "sku")?,
                    name: get(row, "name")?,
                    quantity: get(row, "inventory_quantity")?,
                    entries: get(row, "entries")?,
                    added: get(row, "added")?,
                    removed: get(row, "removed")?,
                })
            })
            .collect::<Result<Vec<_>, StoreError>>()?;
        Ok(TrendingProducts::rank(&activity, limit))
    }
}

fn require_row(rows_affected: u64, id: ProductId) -> Result<(), StoreError> {
    if rows_affected == 0 {
        return Err(StoreError::NotFound(format!("product {id}")));
    }
    Ok(())
}

fn get<'r, T>(row: &'r PgRow, column: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(column)
        .map_err(|e| StoreError::Storage(format!("failed to decode column {column}: {e}")))
}

fn product_from_row(row: &PgRow) -> Result<Product, StoreError> {
    let price: Decimal = get(row, "price")?;
    let quantity: i64 = get(row, "inventory_quantity")?;
    Ok(Product {
        id: ProductId::from_uuid(get::<Uuid>(row, "id")?),
        sku: get(row, "sku")?,
        name: get(row, "name")?,
        price: Price::new(price).map_err(|e| StoreError::Storage(e.to_string()))?,
        quantity: Quantity::new(quantity).map_err(|e| StoreError::Storage(e.to_string()))?,
        description: get(row, "description")?,
        external_id: get(row, "external_id")?,
        created_at: get(row, "created_at")?,
        updated_at: get(row, "updated_at")?,
        last_inventory_change_at: get(row, "last_inventory_update")?,
    })
}

fn entry_from_row(row: &PgRow) -> Result<InventoryLogEntry, StoreError> {
    let previous: i64 = get(row, "previous_quantity")?;
    let new: i64 = get(row, "new_quantity")?;
    let change_type: String = get(row, "change_type")?;
    Ok(InventoryLogEntry::restore(
        LogEntryId::from_uuid(get::<Uuid>(row, "id")?),
        ProductId::from_uuid(get::<Uuid>(row, "product_id")?),
        Quantity::new(previous).map_err(|e| StoreError::Storage(e.to_string()))?,
        Quantity::new(new).map_err(|e| StoreError::Storage(e.to_string()))?,
        change_type
            .parse::<ChangeType>()
            .map_err(|e| StoreError::Storage(e.to_string()))?,
        get(row, "notes")?,
        get(row, "recorded_at")?,
    ))
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::UniqueViolation(msg),
                Some("23503") => StoreError::NotFound(msg),
                _ => StoreError::Storage(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::Storage(format!("connection pool closed in {}", operation))
        }
        _ => StoreError::Storage(format!("sqlx error in {}: {}", operation, err)),
    }
}
