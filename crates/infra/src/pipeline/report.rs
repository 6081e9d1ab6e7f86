//! Report stage: summarize a reconcile run plus inventory health and deliver it.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tracing::instrument;

use crate::config::ReportConfig;
use crate::notify::{Notification, Notifier};
use crate::store::{InventoryStats, InventoryStore, TrendingProduct, TrendingProducts};

use super::envelope::{FailureKind, RunCounts, Stage, StageFailure, StageResult};
use super::reconcile::ReconcileSummary;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportPayload {
    pub date: NaiveDate,
    pub source: Option<PathBuf>,
    pub counts: RunCounts,
    pub errors: Vec<String>,
    pub stats: InventoryStats,
    pub trending: TrendingProducts,
    pub recipients: Vec<String>,
    pub subject: String,
    pub body: String,
}

#[derive(Debug)]
pub struct Reporter<S: ?Sized, N: ?Sized> {
    store: Arc<S>,
    notifier: Arc<N>,
    config: ReportConfig,
}

impl<S, N> Reporter<S, N>
where
    S: InventoryStore + ?Sized,
    N: Notifier + ?Sized,
{
    pub fn new(store: Arc<S>, notifier: Arc<N>, config: ReportConfig) -> Self {
        Self {
            store,
            notifier,
            config,
        }
    }

    /// Stage entry point: forwards an upstream failure unchanged.
    #[instrument(skip_all)]
    pub async fn run(&self, input: StageResult<ReconcileSummary>) -> StageResult<ReportPayload> {
        match input {
            StageResult::Success { payload, .. } => self.report(&payload, Utc::now()).await,
            StageResult::Error(failure) => {
                tracing::warn!(stage = %failure.stage, "skipping report after upstream failure");
                StageResult::failure(failure)
            }
        }
    }

    /// Compose and deliver the report for `summary` as of `now`.
    pub async fn report(&self, summary: &ReconcileSummary, now: DateTime<Utc>) -> StageResult<ReportPayload> {
        let counts = summary.counts();
        let fail = |kind, message: String| {
            tracing::error!(error = %message, "report failed");
            StageResult::failure(
                StageFailure::new(Stage::Report, kind, message).with_counts(counts),
            )
        };

        let stats = match self
            .store
            .stats(self.config.low_stock_threshold, now - self.config.recent_window)
            .await
        {
            Ok(stats) => stats,
            Err(e) => {
                return fail(
                    FailureKind::Persistence,
                    format!("Error generating inventory report: {e}"),
                );
            }
        };

        let trending = match self
            .store
            .trending(now - self.config.trending_window, self.config.trending_limit)
            .await
        {
            Ok(trending) => trending,
            Err(e) => {
                return fail(
                    FailureKind::Persistence,
                    format!("Error generating inventory report: {e}"),
                );
            }
        };

        let date = now.date_naive();
        let errors = summary.error_messages();
        let subject = format!("Inventory Update Report - {}", date.format("%Y-%m-%d"));
        let body = compose_body(
            &subject,
            summary.source.as_deref(),
            counts,
            &stats,
            &trending,
            &errors,
            &self.config,
        );

        let notification = Notification {
            from: self.config.from.clone(),
            to: self.config.recipients.clone(),
            subject: subject.clone(),
            body: body.clone(),
        };
        if let Err(e) = self.notifier.send(&notification).await {
            return fail(
                FailureKind::Notification,
                format!("Error generating inventory report: {e}"),
            );
        }

        let recipients = self.config.recipients.clone();
        tracing::info!(recipients = %recipients.join(", "), %subject, "report sent");
        StageResult::success(
            format!("Report generated and sent to {}", recipients.join(", ")),
            ReportPayload {
                date,
                source: summary.source.clone(),
                counts,
                errors,
                stats,
                trending,
                recipients,
                subject,
                body,
            },
        )
    }
}

fn compose_body(
    subject: &str,
    source: Option<&Path>,
    counts: RunCounts,
    stats: &InventoryStats,
    trending: &TrendingProducts,
    errors: &[String],
    config: &ReportConfig,
) -> String {
    let mut body = String::new();
    // Writing to a String cannot fail.
    let _ = writeln!(body, "{subject}");
    let _ = writeln!(body);
    if let Some(source) = source {
        let _ = writeln!(body, "File Processed: {}", source.display());
        let _ = writeln!(body);
    }
    let _ = writeln!(body, "Import Summary:");
    let _ = writeln!(body, "- Products created: {}", counts.created);
    let _ = writeln!(body, "- Products updated: {}", counts.updated);
    let _ = writeln!(body, "- Errors: {}", counts.errors);
    let _ = writeln!(body);
    let _ = writeln!(body, "Inventory Statistics:");
    let _ = writeln!(body, "- Total products: {}", stats.total_products);
    let _ = writeln!(
        body,
        "- Low stock products (< {}): {} ({}%)",
        config.low_stock_threshold, stats.low_stock, stats.low_stock_pct
    );
    let _ = writeln!(
        body,
        "- Out of stock products: {} ({}%)",
        stats.out_of_stock, stats.out_of_stock_pct
    );
    let _ = writeln!(body, "- Average price: {}", stats.average_price);
    let _ = writeln!(
        body,
        "- Inventory changes in the last {} hours: {}",
        config.recent_window.num_hours(),
        stats.recent_updates
    );

    let lists: [(&str, &[TrendingProduct], &str); 3] = [
        ("Most active", trending.most_active.as_slice(), "changes"),
        ("Most restocked", trending.most_restocked.as_slice(), "units added"),
        ("Selling fast", trending.selling_fast.as_slice(), "units removed"),
    ];
    if lists.iter().any(|(_, list, _)| !list.is_empty()) {
        let _ = writeln!(body);
        let _ = writeln!(
            body,
            "Trending Products (last {} days):",
            config.trending_window.num_days()
        );
        for (title, list, unit) in lists {
            if list.is_empty() {
                continue;
            }
            let _ = writeln!(body, "{title}:");
            for p in list {
                let _ = writeln!(
                    body,
                    "- {} ({}): {} {unit}, {} in stock",
                    p.sku,
                    p.name,
                    p.score.abs(),
                    p.quantity
                );
            }
        }
    }

    if !errors.is_empty() {
        let _ = writeln!(body);
        let _ = writeln!(body, "Errors:");
        for e in errors.iter().take(config.max_listed_errors) {
            let _ = writeln!(body, "- {e}");
        }
        if errors.len() > config.max_listed_errors {
            let _ = writeln!(
                body,
                "... and {} more errors",
                errors.len() - config.max_listed_errors
            );
        }
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use stockledger_core::ProductId;

    fn stats() -> InventoryStats {
        InventoryStats::from_counts(4, 2, 1, 3, Decimal::new(1250, 2))
    }

    fn body(source: Option<&Path>, trending: &TrendingProducts, errors: &[String]) -> String {
        let counts = RunCounts {
            created: 1,
            updated: 2,
            errors: errors.len(),
        };
        compose_body(
            "S",
            source,
            counts,
            &stats(),
            trending,
            errors,
            &ReportConfig::default(),
        )
    }

    #[test]
    fn body_lists_capped_errors() {
        let errors: Vec<String> = (1..=12).map(|i| format!("error {i}")).collect();
        let body = body(None, &TrendingProducts::default(), &errors);

        assert!(body.contains("- error 10\n"));
        assert!(!body.contains("- error 11\n"));
        assert!(body.contains("... and 2 more errors"));
        assert!(body.contains("- Low stock products (< 10): 2 (50%)"));
        assert!(body.contains("- Inventory changes in the last 24 hours: 3"));
    }

    #[test]
    fn body_omits_empty_sections() {
        let body = body(None, &TrendingProducts::default(), &[]);
        assert!(!body.contains("Errors:\n"));
        assert!(!body.contains("Trending Products"));
        assert!(!body.contains("File Processed"));
    }

    #[test]
    fn body_names_the_processed_source() {
        let body = body(
            Some(Path::new("/data/nightly.csv")),
            &TrendingProducts::default(),
            &[],
        );
        assert!(body.contains("File Processed: /data/nightly.csv\n"));
    }

    #[test]
    fn body_lists_trending_products() {
        let selling = TrendingProduct {
            product_id: ProductId::new(),
            sku: "SP1".to_string(),
            name: "Sprocket".to_string(),
            quantity: 75,
            score: -25,
        };
        let trending = TrendingProducts {
            most_active: vec![TrendingProduct {
                score: 4,
                ..selling.clone()
            }],
            most_restocked: Vec::new(),
            selling_fast: vec![selling],
        };
        let body = body(None, &trending, &[]);

        assert!(body.contains("Trending Products (last 30 days):"));
        assert!(body.contains("Most active:\n- SP1 (Sprocket): 4 changes, 75 in stock"));
        assert!(body.contains("Selling fast:\n- SP1 (Sprocket): 25 units removed, 75 in stock"));
        assert!(!body.contains("Most restocked:"));
    }
}
