//! Termination coordinator: turns racing end signals into one finalization.
//!
//! Every trigger source (explicit caller, countdown, progress, presence)
//! holds a [`SignalSender`] and pushes [`TerminationSignal`]s into one
//! bounded channel. The coordinator is the only consumer. The first signal
//! it receives opens a [`SIMULTANEOUS_WINDOW`] measured from the instant
//! that signal was raised. Once the window has passed, every queued signal
//! raised inside it counts as arriving at the same instant and the set is
//! resolved by [`EndReason::priority`]. The channel is then closed, so
//! every later signal is a silent no-op.
//!
//! Finalization runs once, in order: freeze counters, resolve the terminal
//! state, write the final record with bounded retries (falling back to the
//! crash-path beacon), release resources, and publish the outcome. If the
//! store already holds a terminal record, that record is the one published.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::beacon::BeaconSink;
use crate::models::beacon::BeaconPayload;
use crate::models::session::{EndReason, Session, SessionState};
use crate::models::signal::{SignalSource, TerminationSignal};
use crate::persistence::store::SessionStore;
use crate::AppError;

use super::countdown::CountdownHandle;
use super::resources::ReleaseGuard;
use super::state::SessionCore;
use super::RetryPolicy;

/// Capacity of the per-session signal channel.
pub(crate) const SIGNAL_CAPACITY: usize = 16;

/// Signals raised this close together count as simultaneous.
pub const SIMULTANEOUS_WINDOW: Duration = Duration::from_millis(50);

/// Producer side of a session's signal channel.
///
/// Raising never blocks: a full queue already guarantees finalization and a
/// closed one means the session has been finalized.
#[derive(Clone)]
pub struct SignalSender {
    session_id: Arc<str>,
    tx: mpsc::Sender<TerminationSignal>,
}

impl SignalSender {
    /// Wrap the sending half of a session's signal channel.
    #[must_use]
    pub fn new(session_id: &str, tx: mpsc::Sender<TerminationSignal>) -> Self {
        Self {
            session_id: Arc::from(session_id),
            tx,
        }
    }

    /// Raise a signal stamped with the current instant.
    ///
    /// Returns `true` if the signal was queued for arbitration.
    pub fn raise(&self, reason: EndReason, source: SignalSource) -> bool {
        self.submit(TerminationSignal::now(reason, source))
    }

    /// Queue a prepared signal. Returns `true` if it was queued.
    pub fn submit(&self, signal: TerminationSignal) -> bool {
        let session_id = &*self.session_id;
        match self.tx.try_send(signal) {
            Ok(()) => {
                debug!(session_id, reason = signal.reason.as_str(), source = ?signal.source, "termination signal queued");
                true
            }
            Err(TrySendError::Full(_)) => {
                debug!(session_id, reason = signal.reason.as_str(), "signal queue full; finalization already pending");
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!(session_id, reason = signal.reason.as_str(), "session already finalized; signal discarded");
                false
            }
        }
    }
}

/// Terminal result published to callers once finalization completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOutcome {
    /// Session identifier.
    pub session_id: String,
    /// Terminal state.
    pub state: SessionState,
    /// Recorded end reason.
    pub end_reason: EndReason,
    /// Producer of the accepted signal.
    pub accepted_source: SignalSource,
    /// Finalization timestamp.
    pub ended_at: DateTime<Utc>,
    /// Frozen elapsed seconds.
    pub elapsed_seconds: u64,
    /// Frozen answered count.
    pub answered_questions: u32,
    /// Question total.
    pub total_questions: u32,
    /// Whether the durable write was confirmed (otherwise a beacon was sent).
    pub persisted: bool,
}

/// Single consumer of a session's termination signals.
pub(crate) struct TerminationCoordinator {
    pub(crate) core: Arc<SessionCore>,
    pub(crate) signals: mpsc::Receiver<TerminationSignal>,
    pub(crate) store: Arc<dyn SessionStore>,
    pub(crate) beacon: Arc<dyn BeaconSink>,
    pub(crate) release: ReleaseGuard,
    pub(crate) retry: RetryPolicy,
    pub(crate) cancel: CancellationToken,
    pub(crate) countdown: CountdownHandle,
    pub(crate) outcome_tx: watch::Sender<Option<SessionOutcome>>,
}

impl TerminationCoordinator {
    /// Run the coordinator on its own task.
    pub(crate) fn spawn(self, session_id: &str) -> JoinHandle<()> {
        tokio::spawn(
            self.run()
                .instrument(info_span!("termination_coordinator", session_id = %session_id)),
        )
    }

    async fn run(mut self) {
        let Some(first) = self.signals.recv().await else {
            warn!("signal channel closed before any termination signal");
            return;
        };

        tokio::time::sleep_until(first.raised_at + SIMULTANEOUS_WINDOW).await;
        let accepted = self.arbitrate(first);
        self.finalize(accepted).await;
    }

    /// Resolve the first signal against everything queued by the end of its
    /// window, then close the channel.
    fn arbitrate(&mut self, first: TerminationSignal) -> TerminationSignal {
        let mut accepted = first;

        while let Ok(next) = self.signals.try_recv() {
            if simultaneous(&first, &next) && next.priority() > accepted.priority() {
                debug!(
                    preferred = next.reason.as_str(),
                    over = accepted.reason.as_str(),
                    "simultaneous signals resolved by priority"
                );
                accepted = next;
            } else {
                debug!(reason = next.reason.as_str(), "signal discarded; another was accepted first");
            }
        }

        self.signals.close();
        accepted
    }

    async fn finalize(mut self, accepted: TerminationSignal) {
        let Some(record) = self.core.claim(accepted.reason) else {
            debug!("session already finalizing; signal ignored");
            return;
        };

        // Stop the countdown and presence checks before any slow work.
        self.cancel.cancel();

        info!(
            reason = accepted.reason.as_str(),
            source = ?accepted.source,
            state = record.state.as_str(),
            answered = record.answered_questions,
            total = record.total_questions,
            elapsed_seconds = record.elapsed_seconds,
            remaining_ms = u64::try_from(self.countdown.remaining().as_millis()).unwrap_or(u64::MAX),
            "termination signal accepted"
        );

        self.countdown.stop().await;

        let (record, persisted) = match self.persist(&record).await {
            FinalWrite::Recorded => (record, true),
            FinalWrite::AlreadyTerminal => (self.stored_record(record).await, true),
            FinalWrite::Failed => {
                let err = AppError::PersistenceUnavailable(format!(
                    "final record not confirmed after {} attempt(s)",
                    self.retry.attempts
                ));
                error!(%err, "falling back to crash-path beacon");
                self.beacon.send(BeaconPayload::from_session(&record));
                (record, false)
            }
        };

        if let Err(err) = self.release.release() {
            warn!(%err, "resource release failed; session remains terminal");
        }

        self.core.commit(&record);
        let outcome = outcome_from(&record, accepted.source, persisted);
        info!(state = outcome.state.as_str(), persisted, "session finalized");
        self.outcome_tx.send_replace(Some(outcome));
    }

    /// Best-effort durable write with bounded, linearly backed-off retries.
    async fn persist(&self, record: &Session) -> FinalWrite {
        let attempts = self.retry.attempts.max(1);
        for attempt in 1..=attempts {
            match tokio::time::timeout(self.retry.attempt_timeout, self.store.record_final(record))
                .await
            {
                Ok(Ok(true)) => return FinalWrite::Recorded,
                Ok(Ok(false)) => return FinalWrite::AlreadyTerminal,
                Ok(Err(err)) => warn!(attempt, %err, "final write failed"),
                Err(_) => warn!(attempt, "final write timed out"),
            }

            if attempt < attempts {
                tokio::time::sleep(self.retry.backoff * attempt).await;
            }
        }
        FinalWrite::Failed
    }

    /// The terminal record the store already holds, or `ours` if it cannot
    /// be read back.
    async fn stored_record(&self, ours: Session) -> Session {
        match tokio::time::timeout(self.retry.attempt_timeout, self.store.load(&ours.id)).await {
            Ok(Ok(Some(stored))) if stored.state.is_terminal() => {
                info!(
                    stored_state = stored.state.as_str(),
                    stored_reason = stored.end_reason.map(EndReason::as_str),
                    "stored record was already terminal; adopting it"
                );
                stored
            }
            Ok(Ok(_)) => {
                warn!("stored record not terminal on reload; keeping ours");
                ours
            }
            Ok(Err(err)) => {
                warn!(%err, "failed to reload stored record; keeping ours");
                ours
            }
            Err(_) => {
                warn!("reloading stored record timed out; keeping ours");
                ours
            }
        }
    }
}

/// Result of the finalization write.
enum FinalWrite {
    /// This write recorded the outcome.
    Recorded,
    /// The stored record was already terminal and was left alone.
    AlreadyTerminal,
    /// Every attempt failed or timed out.
    Failed,
}

fn simultaneous(first: &TerminationSignal, next: &TerminationSignal) -> bool {
    let gap = if next.raised_at >= first.raised_at {
        next.raised_at - first.raised_at
    } else {
        first.raised_at - next.raised_at
    };
    gap <= SIMULTANEOUS_WINDOW
}

fn outcome_from(record: &Session, accepted_source: SignalSource, persisted: bool) -> SessionOutcome {
    SessionOutcome {
        session_id: record.id.clone(),
        state: record.state,
        end_reason: record.end_reason.unwrap_or(EndReason::ClientLost),
        accepted_source,
        ended_at: record.ended_at.unwrap_or_else(Utc::now),
        elapsed_seconds: record.elapsed_seconds,
        answered_questions: record.answered_questions,
        total_questions: record.total_questions,
        persisted,
    }
}
