//! Per-session presence monitor: detects a client that vanished.
//!
//! The client is expected to send a heartbeat every `interval`. The
//! monitor raises one `ClientLost` signal when `missed_heartbeats`
//! consecutive intervals pass in silence, or immediately when the client
//! reports that its page is closing. It never raises once the session has
//! left `InProgress`.
//!
//! Detection is best-effort: liveness notices may be lost, so the countdown
//! stays the guaranteed backstop.

use std::sync::Arc;

use tokio::sync::{watch, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, Instrument};

use crate::models::session::{EndReason, SessionState};
use crate::models::signal::SignalSource;

use super::coordinator::SignalSender;
use super::PresenceSettings;

/// What woke the monitor loop.
enum Liveness {
    Beat,
    Silent,
    Departed,
}

/// Builder for a per-session presence monitor.
///
/// Call [`spawn`](Self::spawn) to start the background task.
pub struct PresenceMonitor {
    session_id: String,
    settings: PresenceSettings,
    signals: SignalSender,
    state_rx: watch::Receiver<SessionState>,
    cancel: CancellationToken,
}

impl PresenceMonitor {
    /// Construct a new monitor (does not start watching yet).
    #[must_use]
    pub fn new(
        session_id: String,
        settings: PresenceSettings,
        signals: SignalSender,
        state_rx: watch::Receiver<SessionState>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            session_id,
            settings,
            signals,
            state_rx,
            cancel,
        }
    }

    /// Spawn the background task and return a handle for feeding it.
    #[must_use]
    pub fn spawn(self) -> PresenceHandle {
        let beat = Arc::new(Notify::new());
        let departed = Arc::new(Notify::new());
        let handle = PresenceHandle {
            beat: Arc::clone(&beat),
            departed: Arc::clone(&departed),
            cancel: self.cancel.clone(),
        };

        let span = info_span!("presence_monitor", session_id = %self.session_id);
        tokio::spawn(self.run(beat, departed).instrument(span));
        handle
    }

    /// Watch until cancelled or until `ClientLost` has been raised once.
    async fn run(self, beat: Arc<Notify>, departed: Arc<Notify>) {
        let session_id = self.session_id.as_str();
        let mut missed: u32 = 0;

        loop {
            let event = tokio::select! {
                () = self.cancel.cancelled() => {
                    debug!(session_id, "presence monitor cancelled");
                    return;
                }
                () = departed.notified() => Liveness::Departed,
                () = beat.notified() => Liveness::Beat,
                () = tokio::time::sleep(self.settings.interval) => Liveness::Silent,
            };

            match event {
                Liveness::Beat => {
                    missed = 0;
                    continue;
                }
                Liveness::Silent => {
                    missed += 1;
                    debug!(session_id, missed, "heartbeat interval passed in silence");
                    if missed < self.settings.missed_heartbeats {
                        continue;
                    }
                    info!(session_id, missed, "client stopped sending heartbeats");
                }
                Liveness::Departed => {
                    info!(session_id, "client reported page closing");
                }
            }

            raise_client_lost(session_id, &self.signals, &self.state_rx);
            return;
        }
    }
}

/// Raise `ClientLost`, but only while the session is live.
fn raise_client_lost(
    session_id: &str,
    signals: &SignalSender,
    state_rx: &watch::Receiver<SessionState>,
) {
    let state = *state_rx.borrow();
    if state != SessionState::InProgress {
        debug!(session_id, state = state.as_str(), "session already ending; presence loss ignored");
        return;
    }
    signals.raise(EndReason::ClientLost, SignalSource::Presence);
}

/// Handle returned from [`PresenceMonitor::spawn`].
pub struct PresenceHandle {
    beat: Arc<Notify>,
    departed: Arc<Notify>,
    cancel: CancellationToken,
}

impl Drop for PresenceHandle {
    /// Cancel the background monitor when the handle is dropped.
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl PresenceHandle {
    /// Record a client heartbeat, restarting the silence window.
    pub fn heartbeat(&self) {
        self.beat.notify_one();
    }

    /// Record a terminal "page is closing" notice from the client.
    pub fn client_departed(&self) {
        self.departed.notify_one();
    }
}
