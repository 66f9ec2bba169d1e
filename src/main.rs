use chrono::Duration;
use idempotency_core::config::Settings;
use idempotency_core::db;
use idempotency_core::idempotency::{PostgresStore, Workflow, WorkflowConfig};
use idempotency_core::models::lease_now;
use idempotency_core::observability::{describe_metrics, init_logging, LogConfig};
use tracing::info;

/// Runs a single cleanup sweep and exits. Scheduling is left to the host
/// (cron, a Kubernetes CronJob, ...).
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::new()?;
    init_logging(&LogConfig::from(&settings.logging));
    describe_metrics();
    info!("Configuration loaded");

    let pool = db::connect(&settings.database).await?;
    info!("Database connection established");

    db::migrate(&pool).await?;
    info!("Migrations applied successfully");

    let store = PostgresStore::new(pool);
    store.ping().await?;

    let workflow = Workflow::with_config(store, WorkflowConfig::from(&settings.idempotency));
    let cutoff = lease_now() - Duration::seconds(settings.idempotency.sweep_grace_seconds);
    let deleted = workflow.purge_expired(cutoff).await?;

    info!(%cutoff, deleted, "Idempotency sweep complete");
    Ok(())
}
