//! Inventory domain module.
//!
//! Products, their quantities, the immutable ledger entries recording every
//! quantity transition, and the normalized batch record produced by an
//! import. Pure domain logic: no IO, no storage, no clocks (callers pass the
//! timestamp in).

pub mod batch;
pub mod ledger;
pub mod product;

pub use batch::{BatchRecord, ValidRecord};
pub use ledger::{ChangeType, InventoryLogEntry, LogEntryDraft};
pub use product::{NewProduct, Price, Product, ProductDetails, Quantity};
