use anyhow::Context;
use chrono::{Duration as ChronoDuration, Utc};
use tracing::info;

use seedbox_sync::config::AppConfig;
use seedbox_sync::db::{create_pool, migrate, Repository};

/// Deletes terminal job rows older than the configured retention
/// windows. Normally this runs on the hour from inside `seedbox-syncd`
/// itself; this binary exists so an operator can run the same sweep
/// by hand, e.g. right after lowering a retention window in config.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = AppConfig::load(None).context("failed to load configuration")?;
    let pool = create_pool(&config.database).await.context("failed to open database")?;
    migrate(&pool).await.context("failed to run migrations")?;
    let repository = Repository::new(pool);

    let now = Utc::now();
    let completed_before = now - ChronoDuration::hours(config.jobs.cleanup_completed_after_hours as i64);
    let failed_before = now - ChronoDuration::hours(config.jobs.cleanup_failed_after_hours as i64);

    let deleted = repository
        .cleanup_old_jobs(completed_before, failed_before)
        .await
        .context("failed to clean up old jobs")?;

    repository
        .set_kv("last_cleanup", &now.to_rfc3339())
        .await
        .context("failed to record last cleanup timestamp")?;

    info!(deleted, "cleanup complete");
    Ok(())
}
