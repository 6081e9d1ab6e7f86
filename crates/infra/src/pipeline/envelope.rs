//! Stage envelopes: every stage returns one, and every stage after the first
//! accepts the previous stage's.

use serde::Serialize;

/// Pipeline stage identity.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Ingest,
    Reconcile,
    Report,
}

impl core::fmt::Display for Stage {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(match self {
            Stage::Ingest => "ingest",
            Stage::Reconcile => "reconcile",
            Stage::Report => "report",
        })
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The batch source was absent and no fallback applied.
    SourceUnavailable,
    /// The batch source lacked required columns.
    Schema,
    /// The batch source could not be read.
    Read,
    /// Storage failed outside any single record.
    Persistence,
    /// The report could not be delivered.
    Notification,
    Cancelled,
}

/// Per-run totals, carried on success and failure alike.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunCounts {
    pub created: usize,
    pub updated: usize,
    pub errors: usize,
}

/// A stage-level failure.
///
/// Downstream stages forward this unchanged, so the final result names the
/// stage that actually failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageFailure {
    pub stage: Stage,
    pub kind: FailureKind,
    pub message: String,
    pub counts: RunCounts,
}

impl StageFailure {
    pub fn new(stage: Stage, kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            stage,
            kind,
            message: message.into(),
            counts: RunCounts::default(),
        }
    }

    pub fn with_counts(mut self, counts: RunCounts) -> Self {
        self.counts = counts;
        self
    }
}

/// Outcome of one stage.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StageResult<T> {
    Success { message: String, payload: T },
    Error(StageFailure),
}

impl<T> StageResult<T> {
    pub fn success(message: impl Into<String>, payload: T) -> Self {
        StageResult::Success {
            message: message.into(),
            payload,
        }
    }

    pub fn failure(failure: StageFailure) -> Self {
        StageResult::Error(failure)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, StageResult::Success { .. })
    }

    pub fn message(&self) -> &str {
        match self {
            StageResult::Success { message, .. } => message,
            StageResult::Error(f) => &f.message,
        }
    }

    pub fn payload(&self) -> Option<&T> {
        match self {
            StageResult::Success { payload, .. } => Some(payload),
            StageResult::Error(_) => None,
        }
    }

    pub fn failure_ref(&self) -> Option<&StageFailure> {
        match self {
            StageResult::Success { .. } => None,
            StageResult::Error(f) => Some(f),
        }
    }
}
