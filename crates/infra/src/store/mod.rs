//! Product and ledger persistence.
//!
//! All writes go through a [`StoreTx`] unit of work so a quantity change and
//! its ledger entry commit together or not at all.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::{FailPoint, InMemoryInventoryStore};
pub use postgres::PostgresInventoryStore;
pub use r#trait::{
    InventoryStats, InventoryStore, ProductActivity, StoreError, StoreTx, TrendingProduct,
    TrendingProducts,
};
