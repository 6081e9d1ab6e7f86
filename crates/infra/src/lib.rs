//! Infrastructure layer: storage, the audit ledger, update entry points,
//! notification delivery and the nightly pipeline.

pub mod config;
pub mod ledger;
pub mod mutator;
pub mod notify;
pub mod pipeline;
pub mod store;
pub mod updates;

pub use config::{ConfigError, PipelineConfig, ReportConfig, SourceConfig};
pub use ledger::AuditLedger;
pub use mutator::{InventoryMutator, Mutation, MutationError};
pub use store::{InMemoryInventoryStore, InventoryStore, PostgresInventoryStore, StoreError};
pub use updates::{ExternalCallback, InventoryUpdates, ManualUpdate, UpdateAck, UpdateError};
