//! Audit ledger: the only writer of inventory log entries.

use chrono::{DateTime, Utc};

use stockledger_core::LogEntryId;
use stockledger_inventory::{ChangeType, InventoryLogEntry, LogEntryDraft, Product, Quantity};

use crate::store::{StoreError, StoreTx};

/// Records quantity transitions inside the caller's unit of work.
///
/// Entries are append-only; there is no update or delete path.
#[derive(Debug, Default, Clone, Copy)]
pub struct AuditLedger;

impl AuditLedger {
    /// Append one entry for `product`.
    ///
    /// `previous == new` is accepted and yields a zero-delta entry. The entry is
    /// durable only once `tx` commits.
    pub async fn append(
        tx: &mut (dyn StoreTx + '_),
        product: &Product,
        previous: Quantity,
        new: Quantity,
        change_type: ChangeType,
        note: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Result<InventoryLogEntry, StoreError> {
        let entry = InventoryLogEntry::record(
            LogEntryId::new(),
            LogEntryDraft {
                product_id: product.id,
                previous_quantity: previous,
                new_quantity: new,
                change_type,
                note: note.into(),
            },
            at,
        );
        tx.append_log(&entry).await?;
        tracing::debug!(
            sku = %product.sku,
            previous = previous.value(),
            new = new.value(),
            delta = entry.delta(),
            change_type = %change_type,
            "ledger entry recorded"
        );
        Ok(entry)
    }
}
