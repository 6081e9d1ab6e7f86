//! `stockledger-core`: shared building blocks.
//!
//! Pure primitives only: identifiers, the domain error model and the
//! entity/value-object markers. No IO lives here.

pub mod entity;
pub mod error;
pub mod id;
pub mod value_object;

pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{LogEntryId, ProductId, RunId};
pub use value_object::ValueObject;
