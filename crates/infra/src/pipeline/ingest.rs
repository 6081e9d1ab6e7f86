//! Ingest stage: read a tabular batch source into typed records.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::instrument;

use stockledger_inventory::{BatchRecord, Price, Quantity};

use crate::config::SourceConfig;

use super::envelope::{FailureKind, Stage, StageFailure, StageResult};

/// Columns every batch source must carry.
pub const REQUIRED_COLUMNS: [&str; 4] = ["sku", "name", "price", "inventory_quantity"];

const FIXTURE: &str = "\
sku,name,price,inventory_quantity,description
SKU001,Test Product 1,19.99,100,This is a test product
SKU002,Test Product 2,29.99,50,Another test product
SKU003,Test Product 3,39.99,25,A third test product
";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestPayload {
    pub source: PathBuf,
    pub used_fixture: bool,
    pub records: Vec<BatchRecord>,
    /// Data rows seen, including dropped ones.
    pub total_rows: usize,
    /// Rows skipped because a required field was missing or uncoercible.
    pub dropped_rows: usize,
}

#[derive(Debug, Clone)]
pub struct Ingestor {
    config: SourceConfig,
}

impl Ingestor {
    pub fn new(config: SourceConfig) -> Self {
        Self { config }
    }

    /// Stage entry point: [`Ingestor::ingest`] on the blocking thread pool, so
    /// reading a large source never stalls the async runtime.
    pub async fn run(&self, path: Option<PathBuf>) -> StageResult<IngestPayload> {
        let ingestor = self.clone();
        let span = tracing::Span::current();
        let task = tokio::task::spawn_blocking(move || {
            let _entered = span.enter();
            ingestor.ingest(path.as_deref())
        });
        match task.await {
            Ok(result) => result,
            Err(e) => {
                let failure = read_failure(e);
                tracing::error!(error = %failure.message, "ingest task failed");
                StageResult::failure(failure)
            }
        }
    }

    /// Read `path`, or the configured source when `None`.
    ///
    /// When the source is unset or missing and fallback is enabled, the
    /// fixture is read instead (and written first if it does not exist).
    #[instrument(skip(self), fields(fallback = self.config.fixture_fallback))]
    pub fn ingest(&self, path: Option<&Path>) -> StageResult<IngestPayload> {
        let requested = path.or(self.config.path.as_deref());

        let (source, used_fixture) = match requested {
            Some(p) if p.is_file() => (p.to_path_buf(), false),
            _ if self.config.fixture_fallback => {
                if let Some(p) = requested {
                    tracing::warn!(path = %p.display(), "batch source missing, using fixture");
                }
                if let Err(e) = ensure_fixture(&self.config.fixture_path) {
                    return unavailable(format!(
                        "CSV file not found and fixture could not be created at {}: {e}",
                        self.config.fixture_path.display()
                    ));
                }
                (self.config.fixture_path.clone(), true)
            }
            Some(p) => return unavailable(format!("CSV file not found: {}", p.display())),
            None => return unavailable("CSV file not found: no batch source configured"),
        };

        match read_batch(&source) {
            Ok(batch) => {
                tracing::info!(
                    source = %source.display(),
                    records = batch.records.len(),
                    dropped = batch.dropped_rows,
                    "batch ingested"
                );
                StageResult::success(
                    format!("Successfully read {} products from CSV", batch.records.len()),
                    IngestPayload {
                        source,
                        used_fixture,
                        records: batch.records,
                        total_rows: batch.total_rows,
                        dropped_rows: batch.dropped_rows,
                    },
                )
            }
            Err(failure) => {
                tracing::error!(source = %source.display(), error = %failure.message, "ingest failed");
                StageResult::failure(failure)
            }
        }
    }
}

fn unavailable(message: impl Into<String>) -> StageResult<IngestPayload> {
    let failure = StageFailure::new(Stage::Ingest, FailureKind::SourceUnavailable, message);
    tracing::error!(error = %failure.message, "ingest failed");
    StageResult::failure(failure)
}

/// Write the sample batch if nothing exists at `path` yet.
pub fn ensure_fixture(path: &Path) -> std::io::Result<()> {
    if path.is_file() {
        return Ok(());
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, FIXTURE)?;
    tracing::info!(path = %path.display(), "fixture batch written");
    Ok(())
}

struct ReadBatch {
    records: Vec<BatchRecord>,
    total_rows: usize,
    dropped_rows: usize,
}

fn read_failure(err: impl core::fmt::Display) -> StageFailure {
    StageFailure::new(
        Stage::Ingest,
        FailureKind::Read,
        format!("Error importing products: {err}"),
    )
}

fn read_batch(path: &Path) -> Result<ReadBatch, StageFailure> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(read_failure)?;

    let columns: HashMap<String, usize> = reader
        .headers()
        .map_err(read_failure)?
        .iter()
        .enumerate()
        .map(|(i, h)| (h.to_string(), i))
        .collect();

    let missing: Vec<&str> = REQUIRED_COLUMNS
        .iter()
        .copied()
        .filter(|c| !columns.contains_key(*c))
        .collect();
    if !missing.is_empty() {
        return Err(StageFailure::new(
            Stage::Ingest,
            FailureKind::Schema,
            format!("Missing required columns: {}", missing.join(", ")),
        ));
    }

    let col = |name: &str| columns.get(name).copied();
    let (sku_i, name_i, price_i, qty_i) = (
        col("sku"),
        col("name"),
        col("price"),
        col("inventory_quantity"),
    );
    let desc_i = col("description");

    let mut records = Vec::new();
    let mut total_rows = 0;
    let mut dropped_rows = 0;

    for (line, row) in reader.records().enumerate() {
        let row = match row {
            Ok(row) => row,
            Err(e) if e.is_io_error() => return Err(read_failure(e)),
            Err(e) => {
                total_rows += 1;
                dropped_rows += 1;
                tracing::debug!(row = line + 1, error = %e, "dropping undecodable row");
                continue;
            }
        };
        total_rows += 1;

        let field = |i: Option<usize>| {
            i.and_then(|i| row.get(i))
                .map(str::trim)
                .filter(|s| !s.is_empty())
        };
        let sku = field(sku_i);
        let name = field(name_i);
        let price = field(price_i).and_then(|s| Price::parse(s).ok());
        let quantity = field(qty_i).and_then(|s| Quantity::parse(s).ok());

        match (sku, name, price, quantity) {
            (Some(sku), Some(name), Some(price), Some(quantity)) => {
                records.push(BatchRecord::new(
                    sku,
                    name,
                    price,
                    quantity,
                    field(desc_i).unwrap_or_default(),
                ));
            }
            _ => {
                dropped_rows += 1;
                tracing::debug!(row = line + 1, "dropping row with missing or invalid required field");
            }
        }
    }

    Ok(ReadBatch {
        records,
        total_rows,
        dropped_rows,
    })
}
