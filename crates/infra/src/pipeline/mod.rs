//! Nightly batch pipeline: ingest, reconcile, report.
//!
//! Each stage returns a [`StageResult`]; a failed envelope passes through the
//! remaining stages untouched so the final outcome names the stage that
//! failed.

pub mod cancel;
pub mod envelope;
pub mod ingest;
pub mod orchestrator;
pub mod reconcile;
pub mod report;

pub use cancel::Cancellation;
pub use envelope::{FailureKind, RunCounts, Stage, StageFailure, StageResult};
pub use ingest::{IngestPayload, Ingestor, REQUIRED_COLUMNS, ensure_fixture};
pub use orchestrator::{InventoryPipeline, PipelineOutcome, PipelineState, RunStatus};
pub use reconcile::{ReconcileSummary, RecordError, RecordFailure, RecordOutcome, Reconciler};
pub use report::{ReportPayload, Reporter};
