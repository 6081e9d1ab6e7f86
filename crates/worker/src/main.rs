//! Runs the nightly inventory pipeline once and exits.
//!
//! Usage: `stockledger-worker [SOURCE_CSV]`. Without an argument the source
//! comes from `INVENTORY_SOURCE_PATH`, falling back to the fixture.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use sqlx::PgPool;

use stockledger_infra::notify::{HttpNotifier, LogNotifier, Notifier};
use stockledger_infra::pipeline::{InventoryPipeline, PipelineOutcome};
use stockledger_infra::{
    InMemoryInventoryStore, InventoryStore, PipelineConfig, PostgresInventoryStore,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    stockledger_observability::init();

    let config = PipelineConfig::from_env().context("invalid configuration")?;
    let source = std::env::args_os().nth(1).map(PathBuf::from);
    let notifier = notifier(&config);

    let outcome = match config.database_url.clone() {
        Some(url) => {
            let pool = PgPool::connect(&url)
                .await
                .context("failed to connect to DATABASE_URL")?;
            let store = PostgresInventoryStore::new(pool);
            store.migrate().await.context("failed to apply schema")?;
            run(Arc::new(store), notifier, config, source).await
        }
        None => {
            tracing::warn!("DATABASE_URL not set; using in-memory store");
            run(InMemoryInventoryStore::arc(), notifier, config, source).await
        }
    };

    println!("{}", serde_json::to_string_pretty(&outcome)?);
    if !outcome.is_success() {
        anyhow::bail!("pipeline failed: {}", outcome.message);
    }
    Ok(())
}

fn notifier(config: &PipelineConfig) -> Arc<dyn Notifier> {
    match &config.notify_url {
        Some(url) => {
            let mut http = HttpNotifier::new(url.clone());
            if let Some(token) = &config.notify_token {
                http = http.with_bearer_token(token.clone());
            }
            Arc::new(http)
        }
        None => {
            tracing::info!("INVENTORY_NOTIFY_URL not set; reports go to the log");
            Arc::new(LogNotifier)
        }
    }
}

async fn run<S>(
    store: Arc<S>,
    notifier: Arc<dyn Notifier>,
    config: PipelineConfig,
    source: Option<PathBuf>,
) -> PipelineOutcome
where
    S: InventoryStore + ?Sized,
{
    let pipeline = InventoryPipeline::new(store, notifier, config);

    // Ctrl-C lets the record in flight finish, then stops the run.
    let cancel = pipeline.cancellation();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling after the current record");
            cancel.cancel();
        }
    });

    pipeline.run(source.as_deref()).await
}
