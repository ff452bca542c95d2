//! Session orchestration modules.
//!
//! Covers the per-session controller and its state machine, the
//! termination coordinator that turns racing signals into one
//! finalization, the countdown backstop, presence detection, and the
//! registry of live sessions.

use std::time::Duration;

pub mod controller;
pub mod coordinator;
pub mod countdown;
pub mod presence_monitor;
pub mod registry;
pub mod resources;
mod state;

pub use controller::{Collaborators, SessionController, SessionStart};
pub use coordinator::{SessionOutcome, SignalSender};
pub use registry::SessionRegistry;
pub use resources::{NoResources, SessionResources};

/// Longest session length a controller accepts.
pub const MAX_SESSION_DURATION: Duration = Duration::from_secs(24 * 60 * 60);

/// Heartbeat policy for presence detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresenceSettings {
    /// Expected interval between heartbeats.
    pub interval: Duration,
    /// Consecutive silent intervals tolerated before raising `ClientLost`.
    pub missed_heartbeats: u32,
}

/// Bounded retry for the finalization write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub attempts: u32,
    /// Linear backoff step; attempt `n` waits `n * backoff` before the next.
    pub backoff: Duration,
    /// Upper bound on one attempt.
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_millis(250),
            attempt_timeout: Duration::from_secs(5),
        }
    }
}

/// Everything a controller needs to know about timing and retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    /// Hard ceiling on session length; at most [`MAX_SESSION_DURATION`].
    pub max_duration: Duration,
    /// Presence detection; `None` leaves the countdown as the only backstop.
    pub presence: Option<PresenceSettings>,
    /// Finalization write retries.
    pub retry: RetryPolicy,
}
