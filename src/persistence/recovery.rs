//! Closing out session records no live controller owns anymore.
//!
//! A record can be left `in_progress` when the process hosting its
//! controller dies. On startup every such record is finalized, and the
//! beacon receiver uses the same path for sessions it cannot find live.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{info, info_span, warn, Instrument};

use crate::models::session::{resolve_outcome, EndReason, Session};
use crate::Result;

use super::session_repo::SessionRepo;

/// Finalize a stored `in_progress` record that has no live controller.
///
/// Counters are clamped so `answered` never drops below the stored value
/// nor exceeds the total. Returns `true` if this call recorded the outcome.
///
/// # Errors
///
/// Returns `AppError::Db` if the guarded update fails.
pub async fn close_orphan(
    repo: &SessionRepo,
    mut session: Session,
    reason: EndReason,
    elapsed_seconds: u64,
    answered_questions: u32,
) -> Result<bool> {
    session.answered_questions = answered_questions
        .max(session.answered_questions)
        .min(session.total_questions);
    session.elapsed_seconds = elapsed_seconds.max(session.elapsed_seconds);

    let (end_reason, state) =
        resolve_outcome(reason, session.answered_questions, session.total_questions);
    session.state = state;
    session.end_reason = Some(end_reason);
    session.ended_at = Some(Utc::now());

    repo.finalize(&session).await
}

/// Reason and elapsed time to record when a beacon closes a stored record.
///
/// The server clock decides whether time ran out: `TimeExpired` is only
/// honoured once `max_duration` has passed since the recorded start, and
/// the reported elapsed time is capped at what the server observed.
#[must_use]
pub fn vet_beacon(
    session: &Session,
    claimed: EndReason,
    elapsed_seconds: u64,
    max_duration: Duration,
    now: DateTime<Utc>,
) -> (EndReason, u64) {
    let max_secs = max_duration.as_secs();
    let since_start = seconds_since_start(session, now);
    let reason = match claimed {
        EndReason::TimeExpired if since_start < max_secs => EndReason::ClientLost,
        other => other,
    };
    (reason, elapsed_seconds.min(since_start.min(max_secs)))
}

fn seconds_since_start(session: &Session, now: DateTime<Utc>) -> u64 {
    session
        .started_at
        .map_or(0, |ts| u64::try_from((now - ts).num_seconds()).unwrap_or(0))
}

/// Finalize every `in_progress` record left behind by a previous process.
///
/// Records whose start lies further back than `max_duration` are closed as
/// `TimeExpired`; the rest as `ClientLost`. Must run before any controller
/// is started in this process. Returns the number of records closed.
///
/// # Errors
///
/// Returns `AppError::Db` if the records cannot be listed.
pub async fn sweep_orphaned(repo: &SessionRepo, max_duration: Duration) -> Result<usize> {
    sweep(repo, max_duration)
        .instrument(info_span!("orphan_sweep"))
        .await
}

async fn sweep(repo: &SessionRepo, max_duration: Duration) -> Result<usize> {
    let orphans = repo.list_in_progress().await?;
    if orphans.is_empty() {
        info!("no orphaned sessions found on startup");
        return Ok(0);
    }

    let max_secs = max_duration.as_secs();
    let now = Utc::now();
    let mut closed = 0usize;

    for session in orphans {
        let since_start = seconds_since_start(&session, now);
        let (reason, elapsed) = if since_start >= max_secs {
            (EndReason::TimeExpired, max_secs)
        } else {
            (EndReason::ClientLost, since_start)
        };

        let id = session.id.clone();
        let answered = session.answered_questions;
        match close_orphan(repo, session, reason, elapsed, answered).await {
            Ok(true) => {
                closed += 1;
                info!(session_id = %id, reason = reason.as_str(), "closed orphaned session");
            }
            Ok(false) => {}
            Err(err) => warn!(session_id = %id, %err, "failed to close orphaned session"),
        }
    }

    Ok(closed)
}
