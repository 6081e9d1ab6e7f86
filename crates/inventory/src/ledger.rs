//! Inventory ledger entries: the immutable audit trail of quantity transitions.

use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{DomainError, Entity, LogEntryId, ProductId};

use crate::product::Quantity;

/// Which path produced a quantity transition.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChangeType {
    /// Operator edit through the admin surface.
    Manual,
    /// Callback from the external storefront system.
    ExternalCallback,
    /// Reconciliation against an imported batch.
    BatchImport,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::Manual => "manual",
            ChangeType::ExternalCallback => "external-callback",
            ChangeType::BatchImport => "batch-import",
        }
    }
}

impl core::fmt::Display for ChangeType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangeType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(ChangeType::Manual),
            "external-callback" => Ok(ChangeType::ExternalCallback),
            "batch-import" => Ok(ChangeType::BatchImport),
            other => Err(DomainError::validation(format!("unknown change type: {other}"))),
        }
    }
}

/// Everything a caller supplies when recording a transition.
///
/// Carries no `delta`; it is always derived from the two quantities.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntryDraft {
    pub product_id: ProductId,
    pub previous_quantity: Quantity,
    pub new_quantity: Quantity,
    pub change_type: ChangeType,
    pub note: String,
}

/// One recorded quantity transition. Never edited once created.
///
/// Serializable for reports and APIs, but not deserializable: entries are
/// only ever built through [`InventoryLogEntry::record`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InventoryLogEntry {
    id: LogEntryId,
    product_id: ProductId,
    previous_quantity: Quantity,
    new_quantity: Quantity,
    delta: i64,
    change_type: ChangeType,
    note: String,
    recorded_at: DateTime<Utc>,
}

impl InventoryLogEntry {
    /// Materialize a draft, computing `delta = new - previous`.
    pub fn record(id: LogEntryId, draft: LogEntryDraft, recorded_at: DateTime<Utc>) -> Self {
        let delta = draft.new_quantity.value() - draft.previous_quantity.value();
        Self {
            id,
            product_id: draft.product_id,
            previous_quantity: draft.previous_quantity,
            new_quantity: draft.new_quantity,
            delta,
            change_type: draft.change_type,
            note: draft.note,
            recorded_at,
        }
    }

    /// Rebuild an entry loaded from storage. The stored delta is ignored and
    /// recomputed.
    pub fn restore(
        id: LogEntryId,
        product_id: ProductId,
        previous_quantity: Quantity,
        new_quantity: Quantity,
        change_type: ChangeType,
        note: String,
        recorded_at: DateTime<Utc>,
    ) -> Self {
        Self::record(
            id,
            LogEntryDraft {
                product_id,
                previous_quantity,
                new_quantity,
                change_type,
                note,
            },
            recorded_at,
        )
    }

    pub fn product_id(&self) -> ProductId {
        self.product_id
    }

    pub fn previous_quantity(&self) -> Quantity {
        self.previous_quantity
    }

    pub fn new_quantity(&self) -> Quantity {
        self.new_quantity
    }

    pub fn delta(&self) -> i64 {
        self.delta
    }

    pub fn change_type(&self) -> ChangeType {
        self.change_type
    }

    pub fn note(&self) -> &str {
        &self.note
    }

    pub fn recorded_at(&self) -> DateTime<Utc> {
        self.recorded_at
    }
}

impl Entity for InventoryLogEntry {
    type Id = LogEntryId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn draft(prev: i64, new: i64) -> LogEntryDraft {
        LogEntryDraft {
            product_id: ProductId::new(),
            previous_quantity: Quantity::new(prev).unwrap(),
            new_quantity: Quantity::new(new).unwrap(),
            change_type: ChangeType::ExternalCallback,
            note: String::new(),
        }
    }

    #[test]
    fn delta_is_signed_difference() {
        let e = InventoryLogEntry::record(LogEntryId::new(), draft(100, 75), Utc::now());
        assert_eq!(e.delta(), -25);
        assert_eq!(e.previous_quantity().value(), 100);
        assert_eq!(e.new_quantity().value(), 75);
    }

    #[test]
    fn zero_delta_entries_are_allowed() {
        let e = InventoryLogEntry::record(LogEntryId::new(), draft(5, 5), Utc::now());
        assert_eq!(e.delta(), 0);
    }

    #[test]
    fn change_type_wire_names() {
        assert_eq!(
            serde_json::to_string(&ChangeType::ExternalCallback).unwrap(),
            "\"external-callback\""
        );
        for ct in [ChangeType::Manual, ChangeType::ExternalCallback, ChangeType::BatchImport] {
            assert_eq!(ct.as_str().parse::<ChangeType>().unwrap(), ct);
        }
        assert!("webhook".parse::<ChangeType>().is_err());
    }

    #[test]
    fn restored_entry_ignores_stored_delta() {
        let id = LogEntryId::new();
        let pid = ProductId::new();
        let e = InventoryLogEntry::restore(
            id,
            pid,
            Quantity::new(0).unwrap(),
            Quantity::new(10).unwrap(),
            ChangeType::BatchImport,
            "initial import".to_string(),
            Utc::now(),
        );
        assert_eq!(e.delta(), 10);
        assert_eq!(*e.id(), id);
    }

    proptest! {
        #[test]
        fn delta_always_matches_endpoints(prev in 0i64..1_000_000, new in 0i64..1_000_000) {
            let e = InventoryLogEntry::record(LogEntryId::new(), draft(prev, new), Utc::now());
            prop_assert_eq!(e.delta(), new - prev);
            prop_assert_eq!(e.previous_quantity().value() + e.delta(), e.new_quantity().value());
        }
    }
}
