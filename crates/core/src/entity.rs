//! Identity for stored records.

/// A record that keeps its identity while its attributes change.
///
/// A product whose quantity moves from 10 to 8 is still the same product;
/// ledger entries never change but are still told apart by id.
pub trait Entity {
    type Id: Copy + Eq + core::hash::Hash + core::fmt::Debug + core::fmt::Display;

    fn id(&self) -> &Self::Id;

    /// Same record, regardless of attribute values.
    fn same_identity_as(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}
