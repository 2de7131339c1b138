//! Periodic purge of old terminal tasks.
//!
//! Deletes `success`, `failed` and `cancelled` rows whose end time is older
//! than the retention period. Log and output files stay on disk.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use talkvid_core::store::{StoreResult, TaskStore};
use tokio_util::sync::CancellationToken;

/// Delete terminal tasks that ended more than `retention_days` ago.
pub async fn purge(store: &dyn TaskStore, retention_days: i64) -> StoreResult<u64> {
    let cutoff = Utc::now() - chrono::Duration::days(retention_days);
    let deleted = store.delete_terminal_older_than(cutoff).await?;
    if deleted > 0 {
        tracing::info!(deleted, retention_days, "Task retention: purged old tasks");
    } else {
        tracing::debug!(retention_days, "Task retention: nothing to purge");
    }
    Ok(deleted)
}

/// Run one retention pass. Returns the number of deleted tasks; failures
/// are logged and count as zero.
pub async fn sweep(store: &dyn TaskStore, retention_days: i64) -> u64 {
    match purge(store, retention_days).await {
        Ok(deleted) => deleted,
        Err(e) => {
            tracing::error!(error = %e, "Task retention: cleanup failed");
            0
        }
    }
}

/// Run the retention loop until `cancel` is triggered.
pub async fn run(
    store: Arc<dyn TaskStore>,
    retention_days: i64,
    every: Duration,
    cancel: CancellationToken,
) {
    tracing::info!(
        retention_days,
        interval_secs = every.as_secs(),
        "Task retention job started"
    );

    let mut interval = tokio::time::interval(every);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Task retention job stopping");
                break;
            }
            _ = interval.tick() => {
                sweep(store.as_ref(), retention_days).await;
            }
        }
    }
}
