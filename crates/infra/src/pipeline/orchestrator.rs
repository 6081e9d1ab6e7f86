//! Runs ingest, reconcile and report in order, short-circuiting on failure.

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use tracing::Instrument;

use stockledger_core::RunId;

use crate::config::PipelineConfig;
use crate::notify::Notifier;
use crate::store::InventoryStore;

use super::cancel::Cancellation;
use super::envelope::{FailureKind, RunCounts, Stage, StageFailure, StageResult};
use super::ingest::Ingestor;
use super::reconcile::Reconciler;
use super::report::{ReportPayload, Reporter};

/// Where a run is, or where it stopped.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "stage", rename_all = "snake_case")]
pub enum PipelineState {
    Idle,
    Ingesting,
    Reconciling,
    Reporting,
    Done,
    Failed(Stage),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    Error,
}

/// Final result of a composed run. Always carries status, message and counts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineOutcome {
    pub run_id: RunId,
    pub status: RunStatus,
    pub message: String,
    pub counts: RunCounts,
    pub state: PipelineState,
    /// States visited, in order, starting at `Idle`.
    pub history: Vec<PipelineState>,
    pub report: Option<ReportPayload>,
    pub failure: Option<StageFailure>,
}

impl PipelineOutcome {
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Success
    }
}

pub struct InventoryPipeline<S: ?Sized, N: ?Sized> {
    store: Arc<S>,
    notifier: Arc<N>,
    config: PipelineConfig,
    cancellation: Cancellation,
}

impl<S, N> InventoryPipeline<S, N>
where
    S: InventoryStore + ?Sized,
    N: Notifier + ?Sized,
{
    pub fn new(store: Arc<S>, notifier: Arc<N>, config: PipelineConfig) -> Self {
        Self {
            store,
            notifier,
            config,
            cancellation: Cancellation::default(),
        }
    }

    pub fn with_cancellation(mut self, cancellation: Cancellation) -> Self {
        self.cancellation = cancellation;
        self
    }

    /// Handle for cancelling runs of this pipeline from elsewhere.
    pub fn cancellation(&self) -> Cancellation {
        self.cancellation.clone()
    }

    /// Nightly run against the configured source.
    pub async fn run_nightly(&self) -> PipelineOutcome {
        self.run(None).await
    }

    /// Run all three stages. `source` overrides the configured batch source.
    pub async fn run(&self, source: Option<&Path>) -> PipelineOutcome {
        let run_id = RunId::new();
        let span = tracing::info_span!("inventory_pipeline", run_id = %run_id);
        self.run_inner(run_id, source).instrument(span).await
    }

    async fn run_inner(&self, run_id: RunId, source: Option<&Path>) -> PipelineOutcome {
        let mut history = vec![PipelineState::Idle];
        tracing::info!("pipeline started");

        history.push(PipelineState::Ingesting);
        let ingested = Ingestor::new(self.config.source.clone())
            .run(source.map(Path::to_path_buf))
            .await;
        if let Some(outcome) = self.stop_if_needed(
            run_id,
            &ingested,
            Stage::Ingest,
            RunCounts::default(),
            &mut history,
        ) {
            return outcome;
        }

        history.push(PipelineState::Reconciling);
        let reconciled = Reconciler::new(Arc::clone(&self.store))
            .with_cancellation(self.cancellation.clone())
            .run(ingested)
            .await;
        let counts = reconciled
            .payload()
            .map(|s| s.counts())
            .unwrap_or_default();
        if let Some(outcome) =
            self.stop_if_needed(run_id, &reconciled, Stage::Reconcile, counts, &mut history)
        {
            return outcome;
        }

        history.push(PipelineState::Reporting);
        let reported = Reporter::new(
            Arc::clone(&self.store),
            Arc::clone(&self.notifier),
            self.config.report.clone(),
        )
        .run(reconciled)
        .await;

        match reported {
            StageResult::Success { message, payload } => {
                history.push(PipelineState::Done);
                tracing::info!(%message, "pipeline finished");
                PipelineOutcome {
                    run_id,
                    status: RunStatus::Success,
                    message,
                    counts: payload.counts,
                    state: PipelineState::Done,
                    history,
                    report: Some(payload),
                    failure: None,
                }
            }
            StageResult::Error(failure) => failed(run_id, failure, history),
        }
    }

    /// End the run if `result` failed or cancellation was requested after `stage`.
    fn stop_if_needed<T>(
        &self,
        run_id: RunId,
        result: &StageResult<T>,
        stage: Stage,
        counts: RunCounts,
        history: &mut Vec<PipelineState>,
    ) -> Option<PipelineOutcome> {
        if let Some(failure) = result.failure_ref() {
            return Some(failed(run_id, failure.clone(), std::mem::take(history)));
        }
        if self.cancellation.is_cancelled() {
            let failure = StageFailure::new(
                stage,
                FailureKind::Cancelled,
                format!("Pipeline cancelled after {stage} stage"),
            )
            .with_counts(counts);
            return Some(failed(run_id, failure, std::mem::take(history)));
        }
        None
    }
}

fn failed(run_id: RunId, failure: StageFailure, mut history: Vec<PipelineState>) -> PipelineOutcome {
    let state = PipelineState::Failed(failure.stage);
    history.push(state);
    tracing::error!(stage = %failure.stage, error = %failure.message, "pipeline failed");
    PipelineOutcome {
        run_id,
        status: RunStatus::Error,
        message: failure.message.clone(),
        counts: failure.counts,
        state,
        history,
        report: None,
        failure: Some(failure),
    }
}
