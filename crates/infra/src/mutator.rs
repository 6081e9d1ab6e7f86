//! The single path through which a product's on-hand quantity changes.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::instrument;

use stockledger_core::ProductId;
use stockledger_inventory::{ChangeType, InventoryLogEntry, Product, Quantity};

use crate::ledger::AuditLedger;
use crate::store::{InventoryStore, StoreError, StoreTx};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MutationError {
    #[error("invalid quantity: {0} (must be a non-negative integer)")]
    InvalidQuantity(i64),

    #[error("unknown product: {0}")]
    UnknownProduct(ProductId),

    #[error("persistence failure: {0}")]
    Persistence(#[from] StoreError),
}

/// Result of a committed quantity change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mutation {
    pub product: Product,
    pub entry: InventoryLogEntry,
}

impl Mutation {
    pub fn previous_quantity(&self) -> Quantity {
        self.entry.previous_quantity()
    }
}

/// Sets quantities and records each transition in the audit ledger.
///
/// The product is re-read under lock inside the unit of work, so the recorded
/// previous quantity is always the value being replaced.
#[derive(Debug)]
pub struct InventoryMutator<S: ?Sized> {
    store: Arc<S>,
}

impl<S: ?Sized> Clone for InventoryMutator<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S> InventoryMutator<S>
where
    S: InventoryStore + ?Sized,
{
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Set `product_id`'s quantity to `new_quantity` in its own unit of work.
    ///
    /// Nothing is written on error. A value equal to the current quantity still
    /// records a zero-delta entry.
    #[instrument(skip(self, note), fields(change_type = %change_type), err)]
    pub async fn set_quantity(
        &self,
        product_id: ProductId,
        new_quantity: i64,
        change_type: ChangeType,
        note: &str,
    ) -> Result<Mutation, MutationError> {
        let quantity =
            Quantity::new(new_quantity).map_err(|_| MutationError::InvalidQuantity(new_quantity))?;

        let mut tx = self.store.begin().await?;
        let mutation =
            Self::set_quantity_in(&mut *tx, product_id, quantity, change_type, note, Utc::now())
                .await?;
        tx.commit().await?;

        tracing::info!(
            sku = %mutation.product.sku,
            previous = mutation.previous_quantity().value(),
            new = mutation.product.quantity.value(),
            "inventory quantity set"
        );
        Ok(mutation)
    }

    /// Same as [`Self::set_quantity`], inside a unit of work owned by the caller.
    ///
    /// Used where the quantity change must commit together with other writes.
    pub async fn set_quantity_in(
        tx: &mut (dyn StoreTx + '_),
        product_id: ProductId,
        quantity: Quantity,
        change_type: ChangeType,
        note: &str,
        at: DateTime<Utc>,
    ) -> Result<Mutation, MutationError> {
        let mut product = tx
            .product(product_id)
            .await?
            .ok_or(MutationError::UnknownProduct(product_id))?;
        let previous = product.quantity;

        let entry =
            AuditLedger::append(tx, &product, previous, quantity, change_type, note, at).await?;
        product.apply_quantity(quantity, at);
        tx.write_quantity(&product).await?;

        Ok(Mutation { product, entry })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{FailPoint, InMemoryInventoryStore};
    use stockledger_inventory::{NewProduct, Price, ProductDetails};

    async fn seeded(qty: i64) -> (Arc<InMemoryInventoryStore>, Product) {
        let store = InMemoryInventoryStore::arc();
        let product = Product::create(
            ProductId::new(),
            NewProduct {
                sku: "SP1".to_string(),
                details: ProductDetails {
                    name: "Sprocket".to_string(),
                    price: Price::parse("4.50").unwrap(),
                    description: String::new(),
                },
                quantity: Quantity::new(qty).unwrap(),
                external_id: None,
            },
            Utc::now(),
        )
        .unwrap();
        let mut tx = store.begin().await.unwrap();
        tx.insert_product(&product).await.unwrap();
        tx.commit().await.unwrap();
        (store, product)
    }

    #[tokio::test]
    async fn sets_quantity_and_records_entry() {
        let (store, product) = seeded(100).await;
        let mutator = InventoryMutator::new(store.clone());

        let m = mutator
            .set_quantity(product.id, 75, ChangeType::ExternalCallback, "sync")
            .await
            .unwrap();

        assert_eq!(m.product.quantity.value(), 75);
        assert_eq!(m.entry.delta(), -25);
        assert_eq!(m.entry.previous_quantity().value(), 100);
        assert_eq!(store.get(product.id).await.unwrap().unwrap().quantity.value(), 75);
        assert_eq!(store.entry_count().await, 1);
    }

    #[tokio::test]
    async fn same_value_records_zero_delta_and_keeps_timestamp() {
        let (store, product) = seeded(10).await;
        let mutator = InventoryMutator::new(store.clone());

        let m = mutator
            .set_quantity(product.id, 10, ChangeType::Manual, "")
            .await
            .unwrap();

        assert_eq!(m.entry.delta(), 0);
        assert_eq!(m.product.last_inventory_change_at, product.last_inventory_change_at);
        assert_eq!(store.entry_count().await, 1);
    }

    #[tokio::test]
    async fn negative_quantity_writes_nothing() {
        let (store, product) = seeded(10).await;
        let mutator = InventoryMutator::new(store.clone());

        let err = mutator
            .set_quantity(product.id, -1, ChangeType::Manual, "")
            .await
            .unwrap_err();

        assert_eq!(err, MutationError::InvalidQuantity(-1));
        assert_eq!(store.entry_count().await, 0);
    }

    #[tokio::test]
    async fn unknown_product_is_reported() {
        let (store, _) = seeded(10).await;
        let mutator = InventoryMutator::new(store);
        let missing = ProductId::new();

        let err = mutator
            .set_quantity(missing, 1, ChangeType::Manual, "")
            .await
            .unwrap_err();
        assert_eq!(err, MutationError::UnknownProduct(missing));
    }

    #[tokio::test]
    async fn failed_quantity_write_leaves_no_entry() {
        let (store, product) = seeded(10).await;
        store.fail_on(FailPoint::WriteQuantity);
        let mutator = InventoryMutator::new(store.clone());

        let err = mutator
            .set_quantity(product.id, 3, ChangeType::Manual, "")
            .await
            .unwrap_err();

        assert!(matches!(err, MutationError::Persistence(_)));
        assert_eq!(store.entry_count().await, 0);
        assert_eq!(store.get(product.id).await.unwrap().unwrap().quantity.value(), 10);
    }

    #[tokio::test]
    async fn failed_ledger_append_leaves_quantity_unchanged() {
        let (store, product) = seeded(10).await;
        store.fail_on(FailPoint::AppendLog);
        let mutator = InventoryMutator::new(store.clone());

        assert!(mutator
            .set_quantity(product.id, 3, ChangeType::Manual, "")
            .await
            .is_err());
        assert_eq!(store.get(product.id).await.unwrap().unwrap().quantity.value(), 10);
    }

    #[tokio::test]
    async fn concurrent_writers_chain_their_entries() {
        let (store, product) = seeded(0).await;
        let mutator = InventoryMutator::new(store.clone());

        let mut handles = Vec::new();
        for q in 1..=8i64 {
            let m = mutator.clone();
            let id = product.id;
            handles.push(tokio::spawn(async move {
                m.set_quantity(id, q, ChangeType::ExternalCallback, "")
                    .await
                    .unwrap()
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        // Oldest first; each entry must start where the previous one ended.
        let mut entries = store.recent_entries(Some(product.id), 100).await.unwrap();
        entries.reverse();
        assert_eq!(entries.len(), 8);
        let mut expected_previous = 0;
        for e in &entries {
            assert_eq!(e.previous_quantity().value(), expected_previous);
            expected_previous = e.new_quantity().value();
        }
        let stored = store.get(product.id).await.unwrap().unwrap();
        assert_eq!(stored.quantity.value(), expected_previous);
    }
}
