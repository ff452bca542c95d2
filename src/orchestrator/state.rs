//! The single owned copy of a live session's mutable state.

use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::models::session::{resolve_outcome, EndReason, Session, SessionState};

/// Mutable session record plus the clock it is measured against.
///
/// Every transition happens under the one mutex, so state changes are
/// linearizable across the timer, progress reports, explicit ends and
/// presence loss.
pub(crate) struct SessionCore {
    session: Mutex<Session>,
    started: Instant,
    state_tx: watch::Sender<SessionState>,
}

impl SessionCore {
    pub(crate) fn new(session: Session, started: Instant) -> Self {
        let (state_tx, _) = watch::channel(session.state);
        Self {
            session: Mutex::new(session),
            started,
            state_tx,
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Receiver for published state changes.
    pub(crate) fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    pub(crate) fn elapsed_secs(&self) -> u64 {
        self.started.elapsed().as_secs()
    }

    /// Copy of `session` with a live elapsed counter while in progress.
    pub(crate) fn view(&self, session: &Session) -> Session {
        let mut copy = session.clone();
        if copy.state == SessionState::InProgress {
            copy.elapsed_seconds = copy.elapsed_seconds.max(self.elapsed_secs());
        }
        copy
    }

    pub(crate) fn snapshot(&self) -> Session {
        let guard = self.lock();
        self.view(&guard)
    }

    pub(crate) fn state(&self) -> SessionState {
        self.lock().state
    }

    /// Single-assignment finalization guard.
    ///
    /// The first caller to find the session `InProgress` moves it to
    /// `Finalizing`, freezes the counters and gets back the terminal record
    /// to persist. Every later caller gets `None`.
    pub(crate) fn claim(&self, reason: EndReason) -> Option<Session> {
        let mut guard = self.lock();
        if !guard.can_transition_to(SessionState::Finalizing) {
            return None;
        }

        guard.state = SessionState::Finalizing;
        guard.elapsed_seconds = guard.elapsed_seconds.max(self.elapsed_secs());
        self.state_tx.send_replace(SessionState::Finalizing);

        let (end_reason, terminal) =
            resolve_outcome(reason, guard.answered_questions, guard.total_questions);
        let mut record = guard.clone();
        record.state = terminal;
        record.end_reason = Some(end_reason);
        record.ended_at = Some(Utc::now());
        Some(record)
    }

    /// Install the terminal record produced by [`claim`](Self::claim).
    pub(crate) fn commit(&self, record: &Session) {
        let mut guard = self.lock();
        if guard.state != SessionState::Finalizing || !guard.can_transition_to(record.state) {
            return;
        }
        *guard = record.clone();
        self.state_tx.send_replace(record.state);
    }
}
