//! Crash-path beacon payload.

use serde::{Deserialize, Serialize};

use super::session::{EndReason, Session};

/// Out-of-band, at-most-once notice that a session should be recorded as
/// ended. Receivers must tolerate it never arriving.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct BeaconPayload {
    /// Session being reported.
    pub session_id: String,
    /// Participant reference, echoed for receivers without the session row.
    pub participant_ref: String,
    /// Reason the sender believes the session ended.
    pub reason: EndReason,
    /// Elapsed seconds at the time of sending.
    pub elapsed_seconds: u64,
    /// Question count of the merged sequence.
    pub total_questions: u32,
    /// Questions answered at the time of sending.
    pub answered_questions: u32,
}

impl BeaconPayload {
    /// Build a payload from a session snapshot.
    ///
    /// Falls back to `ClientLost` when the snapshot has no end reason yet.
    #[must_use]
    pub fn from_session(session: &Session) -> Self {
        Self {
            session_id: session.id.clone(),
            participant_ref: session.participant_ref.clone(),
            reason: session.end_reason.unwrap_or(EndReason::ClientLost),
            elapsed_seconds: session.elapsed_seconds,
            total_questions: session.total_questions,
            answered_questions: session.answered_questions,
        }
    }
}
