//! Termination signals raised by the session's trigger sources.

use tokio::time::Instant;

use super::session::EndReason;

/// Producer that raised a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalSource {
    /// Explicit caller request.
    Caller,
    /// Countdown expiry.
    Countdown,
    /// Progress reporting reached the last question.
    Progress,
    /// Presence monitor detected the client vanished.
    Presence,
    /// Server shutting down.
    Shutdown,
}

/// Ephemeral candidate reason to end a session. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminationSignal {
    /// Proposed end reason.
    pub reason: EndReason,
    /// Who raised it.
    pub source: SignalSource,
    /// Monotonic instant the signal was raised.
    pub raised_at: Instant,
}

impl TerminationSignal {
    /// Build a signal stamped with the current instant.
    #[must_use]
    pub fn now(reason: EndReason, source: SignalSource) -> Self {
        Self {
            reason,
            source,
            raised_at: Instant::now(),
        }
    }

    /// Tie-break weight, see [`EndReason::priority`].
    #[must_use]
    pub fn priority(&self) -> u8 {
        self.reason.priority()
    }
}
