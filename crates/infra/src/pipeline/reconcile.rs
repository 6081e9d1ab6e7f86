//! Reconcile stage: apply a batch to stored products, one atomic unit per record.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tracing::instrument;

use stockledger_core::{DomainError, ProductId};
use stockledger_inventory::{BatchRecord, ChangeType, Product, Quantity};

use crate::ledger::AuditLedger;
use crate::mutator::InventoryMutator;
use crate::store::InventoryStore;

use super::cancel::Cancellation;
use super::envelope::{FailureKind, RunCounts, Stage, StageFailure, StageResult};
use super::ingest::IngestPayload;

/// Why a single record was not applied.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    #[error("Invalid data for product: {sku}")]
    Invalid { sku: String, reason: DomainError },

    #[error("Error processing product {sku}: {reason}")]
    Failed { sku: String, reason: String },
}

/// A rejected record paired with its error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordFailure {
    pub record: BatchRecord,
    pub error: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Created(ProductId),
    /// `quantity_changed` is false when only descriptive fields were refreshed.
    Updated {
        id: ProductId,
        quantity_changed: bool,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileSummary {
    pub source: Option<PathBuf>,
    pub created: usize,
    pub updated: usize,
    pub failures: Vec<RecordFailure>,
}

impl ReconcileSummary {
    pub fn counts(&self) -> RunCounts {
        RunCounts {
            created: self.created,
            updated: self.updated,
            errors: self.failures.len(),
        }
    }

    pub fn error_messages(&self) -> Vec<String> {
        self.failures.iter().map(|f| f.error.clone()).collect()
    }

    pub fn message(&self) -> String {
        format!(
            "Processed {} products. Created: {}, Updated: {}, Errors: {}",
            self.created + self.updated + self.failures.len(),
            self.created,
            self.updated,
            self.failures.len()
        )
    }
}

/// Creates unknown SKUs and refreshes known ones.
///
/// Every record runs in its own unit of work, so a failing record never
/// undoes or blocks the others. Existing products always get their name,
/// price and description overwritten; the quantity goes through
/// [`InventoryMutator`] and only when it differs.
#[derive(Debug)]
pub struct Reconciler<S: ?Sized> {
    store: Arc<S>,
    cancellation: Cancellation,
}

impl<S> Reconciler<S>
where
    S: InventoryStore + ?Sized,
{
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            cancellation: Cancellation::default(),
        }
    }

    pub fn with_cancellation(mut self, cancellation: Cancellation) -> Self {
        self.cancellation = cancellation;
        self
    }

    /// Stage entry point: forwards an upstream failure unchanged.
    #[instrument(skip_all)]
    pub async fn run(&self, input: StageResult<IngestPayload>) -> StageResult<ReconcileSummary> {
        let payload = match input {
            StageResult::Success { payload, .. } => payload,
            StageResult::Error(failure) => {
                tracing::warn!(stage = %failure.stage, "skipping reconcile after upstream failure");
                return StageResult::failure(failure);
            }
        };

        if payload.records.is_empty() {
            return StageResult::success(
                "No products to validate and update",
                ReconcileSummary {
                    source: Some(payload.source),
                    ..Default::default()
                },
            );
        }

        match self.reconcile(&payload.records).await {
            Ok(mut summary) => {
                summary.source = Some(payload.source);
                StageResult::success(summary.message(), summary)
            }
            Err(failure) => StageResult::failure(failure),
        }
    }

    /// Apply `batch` record by record.
    ///
    /// Returns an error only when cancelled; per-record problems are collected
    /// in the summary. Cancellation is checked between records, so the record
    /// in flight always completes its unit of work.
    pub async fn reconcile(&self, batch: &[BatchRecord]) -> Result<ReconcileSummary, StageFailure> {
        let mut summary = ReconcileSummary::default();

        for (i, record) in batch.iter().enumerate() {
            if self.cancellation.is_cancelled() {
                tracing::warn!(processed = i, total = batch.len(), "reconcile cancelled");
                return Err(StageFailure::new(
                    Stage::Reconcile,
                    FailureKind::Cancelled,
                    format!("Reconciliation cancelled after {} of {} products", i, batch.len()),
                )
                .with_counts(summary.counts()));
            }

            match self.reconcile_record(record).await {
                Ok(RecordOutcome::Created(_)) => summary.created += 1,
                Ok(RecordOutcome::Updated { .. }) => summary.updated += 1,
                Err(e) => {
                    tracing::warn!(sku = record.label(), error = %e, "record rejected");
                    summary.failures.push(RecordFailure {
                        record: record.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            created = summary.created,
            updated = summary.updated,
            errors = summary.failures.len(),
            "reconcile complete"
        );
        Ok(summary)
    }

    /// Apply one record in its own unit of work.
    ///
    /// An unknown SKU is inserted with an initial ledger entry. When a
    /// concurrent unit of work creates the same SKU first, the record is
    /// applied to that product as an update instead.
    pub async fn reconcile_record(&self, record: &BatchRecord) -> Result<RecordOutcome, RecordError> {
        let sku = record.label().to_string();
        let valid = record.validate().map_err(|reason| RecordError::Invalid {
            sku: sku.clone(),
            reason,
        })?;
        let failed = |reason: String| RecordError::Failed {
            sku: sku.clone(),
            reason,
        };

        let mut tx = self.store.begin().await.map_err(|e| failed(e.to_string()))?;
        let now = Utc::now();

        let existing = tx
            .product_by_sku(&valid.sku)
            .await
            .map_err(|e| failed(e.to_string()))?;

        let mut product = match existing {
            Some(product) => product,
            None => {
                let product = Product::create(ProductId::new(), valid.clone().into_new_product(), now)
                    .map_err(|e| failed(e.to_string()))?;
                let inserted = tx
                    .insert_product(&product)
                    .await
                    .map_err(|e| failed(e.to_string()))?;
                if inserted {
                    AuditLedger::append(
                        &mut *tx,
                        &product,
                        Quantity::ZERO,
                        product.quantity,
                        ChangeType::BatchImport,
                        "Initial import",
                        now,
                    )
                    .await
                    .map_err(|e| failed(e.to_string()))?;
                    tx.commit().await.map_err(|e| failed(e.to_string()))?;
                    return Ok(RecordOutcome::Created(product.id));
                }

                tracing::debug!(sku = %valid.sku, "sku created concurrently, applying as update");
                tx.product_by_sku(&valid.sku)
                    .await
                    .map_err(|e| failed(e.to_string()))?
                    .ok_or_else(|| failed("product missing after concurrent insert".to_string()))?
            }
        };

        let quantity_changed = product.quantity != valid.quantity;
        if quantity_changed {
            let note = format!(
                "Batch import update: {} -> {}",
                product.quantity, valid.quantity
            );
            product = InventoryMutator::<S>::set_quantity_in(
                &mut *tx,
                product.id,
                valid.quantity,
                ChangeType::BatchImport,
                &note,
                now,
            )
            .await
            .map_err(|e| failed(e.to_string()))?
            .product;
        }
        product.overwrite_details(valid.details, now);
        tx.write_details(&product)
            .await
            .map_err(|e| failed(e.to_string()))?;

        tx.commit().await.map_err(|e| failed(e.to_string()))?;
        Ok(RecordOutcome::Updated {
            id: product.id,
            quantity_changed,
        })
    }
}
