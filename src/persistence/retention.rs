//! Retention service for time-based data purge.
//!
//! Runs as a background task deleting finalized sessions whose `ended_at`
//! is older than `retention_days`. Sessions still in progress are never
//! touched.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::db::Database;
use crate::Result;

const PURGE_INTERVAL: Duration = Duration::from_secs(3600);

/// Spawn the retention purge background task.
///
/// The task runs hourly until `cancel` fires.
#[must_use]
pub fn spawn_retention_task(
    db: Arc<Database>,
    retention_days: u32,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(PURGE_INTERVAL);
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("retention task shutting down");
                    break;
                }
                _ = interval.tick() => {
                    if let Err(err) = purge(&db, retention_days).await {
                        error!(%err, "retention purge failed");
                    }
                }
            }
        }
    })
}

/// Delete terminal sessions that ended more than `retention_days` ago.
///
/// Returns the number of purged rows.
///
/// # Errors
///
/// Returns `AppError::Db` if the delete fails.
pub async fn purge(db: &Database, retention_days: u32) -> Result<u64> {
    let cutoff = Utc::now() - chrono::Duration::days(i64::from(retention_days));

    let result = sqlx::query(
        "DELETE FROM interview_session \
         WHERE state IN ('completed', 'abandoned', 'timed_out') AND ended_at < ?1",
    )
    .bind(cutoff.to_rfc3339())
    .execute(db)
    .await?;

    let purged = result.rows_affected();
    info!(retention_days, purged, "retention purge completed");
    Ok(purged)
}
