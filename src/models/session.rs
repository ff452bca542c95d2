//! Session model and lifecycle helpers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state for one interview session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Record built but the countdown has not started.
    NotStarted,
    /// Session running; the only state that accepts progress and signals.
    InProgress,
    /// A termination signal was accepted and finalization is underway.
    Finalizing,
    /// Every question answered (or time ran out with nothing left).
    Completed,
    /// Participant ended early or the client disappeared.
    Abandoned,
    /// Time ran out with questions still unanswered.
    TimedOut,
}

impl SessionState {
    /// Terminal states are absorbing.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Abandoned | Self::TimedOut)
    }

    /// Stable storage representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::InProgress => "in_progress",
            Self::Finalizing => "finalizing",
            Self::Completed => "completed",
            Self::Abandoned => "abandoned",
            Self::TimedOut => "timed_out",
        }
    }

    /// Parse the storage representation.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "not_started" => Some(Self::NotStarted),
            "in_progress" => Some(Self::InProgress),
            "finalizing" => Some(Self::Finalizing),
            "completed" => Some(Self::Completed),
            "abandoned" => Some(Self::Abandoned),
            "timed_out" => Some(Self::TimedOut),
            _ => None,
        }
    }
}

/// Canonical reason a session ended. Set exactly once, at finalization.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// The participant answered every question.
    AllQuestionsCompleted,
    /// The maximum duration elapsed.
    TimeExpired,
    /// The participant asked to stop.
    VoluntaryEnd,
    /// The client vanished without an explicit end.
    ClientLost,
}

impl EndReason {
    /// Tie-break weight for signals that arrive at the same instant.
    ///
    /// Higher wins. `AllQuestionsCompleted` beats `TimeExpired` because it
    /// describes the same observable moment more cleanly.
    #[must_use]
    pub fn priority(self) -> u8 {
        match self {
            Self::AllQuestionsCompleted => 3,
            Self::TimeExpired => 2,
            Self::VoluntaryEnd => 1,
            Self::ClientLost => 0,
        }
    }

    /// Stable storage representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AllQuestionsCompleted => "all_questions_completed",
            Self::TimeExpired => "time_expired",
            Self::VoluntaryEnd => "voluntary_end",
            Self::ClientLost => "client_lost",
        }
    }

    /// Parse the storage representation.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "all_questions_completed" => Some(Self::AllQuestionsCompleted),
            "time_expired" => Some(Self::TimeExpired),
            "voluntary_end" => Some(Self::VoluntaryEnd),
            "client_lost" => Some(Self::ClientLost),
            _ => None,
        }
    }
}

/// Coarse status label shown on dashboards.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ApplicantStatus {
    /// The interview ran to an end the participant did not choose to cut short.
    Completed,
    /// The participant left or the client was lost.
    Abandoned,
}

/// Derive the dashboard label from the end reason alone.
#[must_use]
pub fn applicant_status(reason: EndReason) -> ApplicantStatus {
    match reason {
        EndReason::AllQuestionsCompleted | EndReason::TimeExpired => ApplicantStatus::Completed,
        EndReason::VoluntaryEnd | EndReason::ClientLost => ApplicantStatus::Abandoned,
    }
}

/// Resolve an accepted reason plus frozen counters into the recorded
/// reason and terminal state.
///
/// A voluntary end with nothing left to answer is recorded as a normal
/// completion. Time running out after the last answer also counts as
/// completed, but keeps `TimeExpired` as its reason. A completion claim
/// the counters do not back is recorded as a voluntary end.
#[must_use]
pub fn resolve_outcome(reason: EndReason, answered: u32, total: u32) -> (EndReason, SessionState) {
    let fully_answered = answered >= total;
    match reason {
        EndReason::AllQuestionsCompleted if fully_answered => (reason, SessionState::Completed),
        EndReason::AllQuestionsCompleted => (EndReason::VoluntaryEnd, SessionState::Abandoned),
        EndReason::TimeExpired if fully_answered => (reason, SessionState::Completed),
        EndReason::TimeExpired => (reason, SessionState::TimedOut),
        EndReason::VoluntaryEnd if fully_answered => {
            (EndReason::AllQuestionsCompleted, SessionState::Completed)
        }
        EndReason::VoluntaryEnd | EndReason::ClientLost => (reason, SessionState::Abandoned),
    }
}

/// Opaque references to records owned by other systems.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SessionRefs {
    /// Participant (applicant) reference.
    pub participant_ref: String,
    /// Job posting reference.
    pub job_ref: String,
    /// Owning organisation reference.
    pub org_ref: String,
}

/// One interview attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct Session {
    /// Unique record identifier; immutable.
    pub id: String,
    /// Participant reference.
    pub participant_ref: String,
    /// Job reference.
    pub job_ref: String,
    /// Organisation reference.
    pub org_ref: String,
    /// Current lifecycle state.
    pub state: SessionState,
    /// Set once on entering `InProgress`.
    pub started_at: Option<DateTime<Utc>>,
    /// Set once at finalization, together with `end_reason`.
    pub ended_at: Option<DateTime<Utc>>,
    /// Seconds elapsed since start; frozen at finalization.
    pub elapsed_seconds: u64,
    /// Number of questions in the merged sequence.
    pub total_questions: u32,
    /// Questions answered so far; never decreases, never exceeds the total.
    pub answered_questions: u32,
    /// Canonical end reason; set once at finalization.
    pub end_reason: Option<EndReason>,
}

impl Session {
    /// Construct a new, not-yet-started session with a generated identifier.
    #[must_use]
    pub fn new(refs: SessionRefs, total_questions: u32) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            participant_ref: refs.participant_ref,
            job_ref: refs.job_ref,
            org_ref: refs.org_ref,
            state: SessionState::NotStarted,
            started_at: None,
            ended_at: None,
            elapsed_seconds: 0,
            total_questions,
            answered_questions: 0,
            end_reason: None,
        }
    }

    /// Determine whether a lifecycle transition is permitted.
    #[must_use]
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        matches!(
            (self.state, next),
            (SessionState::NotStarted, SessionState::InProgress)
                | (SessionState::InProgress, SessionState::Finalizing)
                | (
                    SessionState::Finalizing,
                    SessionState::Completed | SessionState::Abandoned | SessionState::TimedOut
                )
        )
    }

    /// Move `NotStarted -> InProgress`, stamping `started_at`.
    ///
    /// Returns `false` (and changes nothing) from any other state.
    pub fn begin(&mut self, now: DateTime<Utc>) -> bool {
        if !self.can_transition_to(SessionState::InProgress) {
            return false;
        }
        self.state = SessionState::InProgress;
        self.started_at = Some(now);
        true
    }

    /// Whether every question has been answered.
    #[must_use]
    pub fn fully_answered(&self) -> bool {
        self.answered_questions >= self.total_questions
    }

    /// Dashboard label, available once the session has ended.
    #[must_use]
    pub fn applicant_status(&self) -> Option<ApplicantStatus> {
        self.end_reason.map(applicant_status)
    }
}
