//! Session controller: the authoritative owner of one live session.
//!
//! [`SessionController::start`] merges the question sets, writes the
//! "session started" record, and spawns the countdown, the presence
//! monitor and the termination coordinator. Callers then report progress,
//! send heartbeats and request an end through the controller; all end
//! requests funnel into the coordinator's single finalization path.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::beacon::{BeaconSink, NoopBeacon};
use crate::models::question::Question;
use crate::models::session::{EndReason, Session, SessionRefs, SessionState};
use crate::models::signal::{SignalSource, TerminationSignal};
use crate::persistence::store::SessionStore;
use crate::sequencer;
use crate::{AppError, Result};

use super::coordinator::{SessionOutcome, SignalSender, TerminationCoordinator, SIGNAL_CAPACITY};
use super::countdown::Countdown;
use super::presence_monitor::{PresenceHandle, PresenceMonitor};
use super::resources::{NoResources, ReleaseGuard, SessionResources};
use super::state::SessionCore;
use super::{SessionSettings, MAX_SESSION_DURATION};

/// Inputs for the start call.
#[derive(Debug, Clone)]
pub struct SessionStart {
    /// External references for the session record.
    pub refs: SessionRefs,
    /// Job-specific prompts, in order.
    pub primary: Vec<String>,
    /// Optional supplementary prompts, spread through the primary ones.
    pub secondary: Vec<String>,
}

/// External collaborators a controller talks to.
#[derive(Clone)]
pub struct Collaborators {
    /// Durable session store.
    pub store: Arc<dyn SessionStore>,
    /// Crash-path beacon sink.
    pub beacon: Arc<dyn BeaconSink>,
    /// Handles released once at finalization.
    pub resources: Arc<dyn SessionResources>,
}

impl Collaborators {
    /// Collaborators with no beacon endpoint and no held resources.
    #[must_use]
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self {
            store,
            beacon: Arc::new(NoopBeacon),
            resources: Arc::new(NoResources),
        }
    }

    /// Replace the beacon sink.
    #[must_use]
    pub fn with_beacon(mut self, beacon: Arc<dyn BeaconSink>) -> Self {
        self.beacon = beacon;
        self
    }

    /// Replace the held resources.
    #[must_use]
    pub fn with_resources(mut self, resources: Arc<dyn SessionResources>) -> Self {
        self.resources = resources;
        self
    }
}

struct ControllerInner {
    id: String,
    core: Arc<SessionCore>,
    questions: Vec<Question>,
    signals: SignalSender,
    presence: Option<PresenceHandle>,
    deadline: Instant,
    outcome_rx: watch::Receiver<Option<SessionOutcome>>,
}

/// Cheaply cloneable handle to one live session.
#[derive(Clone)]
pub struct SessionController {
    inner: Arc<ControllerInner>,
}

impl SessionController {
    /// Start a session: `NotStarted -> InProgress`.
    ///
    /// Persists the initial record before any timer starts. If that write
    /// fails no session exists and the resources are released.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the merged question list is too large
    /// to count or `max_duration` exceeds [`MAX_SESSION_DURATION`], or the
    /// store's error if the start record cannot be written.
    pub async fn start(
        request: SessionStart,
        settings: &SessionSettings,
        collaborators: Collaborators,
    ) -> Result<Self> {
        let questions = sequencer::merge(&request.primary, &request.secondary);
        let total = u32::try_from(questions.len())
            .map_err(|_| AppError::Config("too many questions for one session".into()))?;

        let mut session = Session::new(request.refs, total);
        let id = session.id.clone();
        let release = ReleaseGuard::new(id.clone(), Arc::clone(&collaborators.resources));

        if settings.max_duration > MAX_SESSION_DURATION {
            return Err(AppError::Config(format!(
                "max_duration of {}s exceeds the {}s ceiling",
                settings.max_duration.as_secs(),
                MAX_SESSION_DURATION.as_secs()
            )));
        }

        session.begin(Utc::now());
        collaborators
            .store
            .record_start(&session, &questions)
            .await?;

        let started = Instant::now();
        let deadline = started
            .checked_add(settings.max_duration)
            .ok_or_else(|| AppError::Config("session deadline out of range".into()))?;
        let core = Arc::new(SessionCore::new(session, started));

        let (tx, rx) = mpsc::channel(SIGNAL_CAPACITY);
        let signals = SignalSender::new(&id, tx);
        let cancel = CancellationToken::new();

        let countdown =
            Countdown::new(id.clone(), deadline, signals.clone(), cancel.child_token()).spawn();

        let presence = settings.presence.map(|presence| {
            PresenceMonitor::new(
                id.clone(),
                presence,
                signals.clone(),
                core.watch_state(),
                cancel.child_token(),
            )
            .spawn()
        });

        let (outcome_tx, outcome_rx) = watch::channel(None);
        TerminationCoordinator {
            core: Arc::clone(&core),
            signals: rx,
            store: collaborators.store,
            beacon: collaborators.beacon,
            release,
            retry: settings.retry,
            cancel,
            countdown,
            outcome_tx,
        }
        .spawn(&id);

        info!(
            session_id = %id,
            total_questions = total,
            max_duration_secs = settings.max_duration.as_secs(),
            presence = presence.is_some(),
            "session started"
        );

        let controller = Self {
            inner: Arc::new(ControllerInner {
                id,
                core,
                questions,
                signals,
                presence,
                deadline,
                outcome_rx,
            }),
        };

        if total == 0 {
            controller
                .inner
                .signals
                .raise(EndReason::AllQuestionsCompleted, SignalSource::Progress);
        }

        Ok(controller)
    }

    /// Session identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// The merged, ordered question list.
    #[must_use]
    pub fn questions(&self) -> &[Question] {
        &self.inner.questions
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn current_state(&self) -> SessionState {
        self.inner.core.state()
    }

    /// Read-only copy of the session record with a live elapsed counter.
    #[must_use]
    pub fn snapshot(&self) -> Session {
        self.inner.core.snapshot()
    }

    /// Time left before the countdown fires.
    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.inner.deadline.saturating_duration_since(Instant::now())
    }

    /// Add `answered_delta` to the answered counter.
    ///
    /// A no-op (returning the current snapshot) once the session has left
    /// `InProgress`. Reaching the total raises `AllQuestionsCompleted`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidProgress` for a negative delta or one that
    /// would push the counter past the total; the session is left unchanged.
    pub fn report_progress(&self, answered_delta: i64) -> Result<Session> {
        if answered_delta < 0 {
            return Err(AppError::InvalidProgress(format!(
                "answered_delta must not be negative, got {answered_delta}"
            )));
        }
        let delta = u32::try_from(answered_delta).map_err(|_| {
            AppError::InvalidProgress(format!("answered_delta {answered_delta} is out of range"))
        })?;

        let core = &self.inner.core;
        let (snapshot, reached_total) = {
            let mut session = core.lock();
            if session.state != SessionState::InProgress {
                debug!(session_id = %self.inner.id, "progress ignored; session no longer in progress");
                return Ok(core.view(&session));
            }

            let answered = session
                .answered_questions
                .checked_add(delta)
                .filter(|next| *next <= session.total_questions)
                .ok_or_else(|| {
                    AppError::InvalidProgress(format!(
                        "answered_delta {delta} exceeds remaining questions ({} of {} answered)",
                        session.answered_questions, session.total_questions
                    ))
                })?;

            session.answered_questions = answered;
            (core.view(&session), delta > 0 && session.fully_answered())
        };

        if reached_total {
            self.inner
                .signals
                .raise(EndReason::AllQuestionsCompleted, SignalSource::Progress);
        }
        Ok(snapshot)
    }

    /// Ask for the session to end for `reason`.
    ///
    /// Never blocks on persistence. Ignored once a signal has been accepted.
    pub fn request_end(&self, reason: EndReason) {
        self.submit(TerminationSignal::now(reason, SignalSource::Caller));
    }

    /// Queue a prepared termination signal. Returns `true` if it was queued.
    pub fn submit(&self, signal: TerminationSignal) -> bool {
        self.inner.signals.submit(signal)
    }

    /// Record a client heartbeat.
    pub fn heartbeat(&self) {
        if let Some(ref presence) = self.inner.presence {
            presence.heartbeat();
        }
    }

    /// Record that the client reported its page is closing.
    ///
    /// Without a presence monitor the notice is turned into `ClientLost`
    /// directly, still only while the session is in progress.
    pub fn client_departed(&self) {
        match self.inner.presence {
            Some(ref presence) => presence.client_departed(),
            None if self.current_state() == SessionState::InProgress => {
                self.inner
                    .signals
                    .raise(EndReason::ClientLost, SignalSource::Presence);
            }
            None => {}
        }
    }

    /// Receiver that yields the outcome once the session is finalized.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Option<SessionOutcome>> {
        self.inner.outcome_rx.clone()
    }

    /// The outcome, if finalization has completed.
    #[must_use]
    pub fn outcome(&self) -> Option<SessionOutcome> {
        self.inner.outcome_rx.borrow().clone()
    }

    /// Wait for finalization to complete.
    ///
    /// Returns `None` only if the coordinator stopped without finishing.
    pub async fn wait_finalized(&self) -> Option<SessionOutcome> {
        let mut rx = self.subscribe();
        let result = rx.wait_for(Option::is_some).await;
        result.ok().and_then(|outcome| outcome.clone())
    }
}
