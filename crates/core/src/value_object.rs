//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects are immutable and compared by their attribute values: two
/// prices of `9.99` are the same price, whereas two products with the same
/// name are still different products. Validation happens at construction, so
/// holding a value object means holding a valid value.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
