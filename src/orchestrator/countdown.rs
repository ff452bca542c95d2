//! Per-session countdown: the hard ceiling on session length.
//!
//! Each session gets one [`Countdown`] that raises `TimeExpired` once the
//! maximum duration has elapsed, regardless of any other signal in flight.
//! It is the backstop that guarantees every session finalizes even when
//! presence detection and crash-path delivery both fail.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, Instrument};

use crate::models::session::EndReason;
use crate::models::signal::SignalSource;

use super::coordinator::SignalSender;

/// Builder for a per-session countdown.
///
/// Call [`spawn`](Self::spawn) to start the background timer task.
pub struct Countdown {
    session_id: String,
    deadline: Instant,
    signals: SignalSender,
    cancel: CancellationToken,
}

impl Countdown {
    /// Construct a countdown that fires at `deadline` (does not start the
    /// timer yet).
    #[must_use]
    pub fn new(
        session_id: String,
        deadline: Instant,
        signals: SignalSender,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            session_id,
            deadline,
            signals,
            cancel,
        }
    }

    /// Spawn the background timer task and return a handle for it.
    #[must_use]
    pub fn spawn(self) -> CountdownHandle {
        let deadline = self.deadline;
        let cancel_for_handle = self.cancel.clone();

        let task_handle = tokio::spawn(
            Self::run(
                self.session_id.clone(),
                deadline,
                self.signals,
                self.cancel,
            )
            .instrument(info_span!("countdown", session_id = %self.session_id)),
        );

        CountdownHandle {
            deadline,
            join_handle: Some(task_handle),
            cancel: cancel_for_handle,
        }
    }

    async fn run(
        session_id: String,
        deadline: Instant,
        signals: SignalSender,
        cancel: CancellationToken,
    ) {
        tokio::select! {
            () = cancel.cancelled() => {
                debug!(session_id, "countdown cancelled");
            }
            () = tokio::time::sleep_until(deadline) => {
                info!(session_id, "session time limit reached");
                signals.raise(EndReason::TimeExpired, SignalSource::Countdown);
            }
        }
    }
}

/// Handle returned from [`Countdown::spawn`].
pub struct CountdownHandle {
    deadline: Instant,
    join_handle: Option<JoinHandle<()>>,
    cancel: CancellationToken,
}

impl Drop for CountdownHandle {
    /// Cancel the background timer when the handle is dropped.
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl CountdownHandle {
    /// Time left before expiry; zero once the deadline has passed.
    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Cancel the timer and wait for its task to exit. Later calls return
    /// at once.
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.join_handle.take() {
            let _ = handle.await;
        }
    }
}
