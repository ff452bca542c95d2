//! Request handlers for the session API.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, info_span, warn, Instrument};

use crate::models::beacon::BeaconPayload;
use crate::models::question::Question;
use crate::models::session::{ApplicantStatus, EndReason, Session, SessionRefs, SessionState};
use crate::orchestrator::{Collaborators, SessionController, SessionStart};
use crate::persistence::recovery;
use crate::persistence::session_repo::SessionRepo;
use crate::AppError;

use super::AppState;

/// JSON error body with a status code derived from the error category.
pub struct ApiError(AppError);

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        Self(err)
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0 {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::InvalidProgress(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Config(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            warn!(err = %self.0, "request failed");
        }
        let body = ErrorBody {
            error: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

/// Body of `POST /sessions`.
#[derive(Debug, Deserialize)]
pub struct StartSessionRequest {
    /// Participant reference.
    pub participant_ref: String,
    /// Job reference.
    pub job_ref: String,
    /// Organisation reference.
    pub org_ref: String,
    /// Job-specific prompts.
    #[serde(default)]
    pub primary_questions: Vec<String>,
    /// Supplementary prompts; the configured default set when absent.
    pub secondary_questions: Option<Vec<String>>,
}

/// Response of `POST /sessions`.
#[derive(Debug, Serialize, Deserialize)]
pub struct StartSessionResponse {
    /// New session identifier.
    pub session_id: String,
    /// Merged, ordered questions.
    pub questions: Vec<Question>,
    /// Countdown length.
    pub max_duration_seconds: u64,
}

/// Body of `POST /sessions/{id}/progress`.
#[derive(Debug, Deserialize)]
pub struct ProgressRequest {
    /// Newly answered questions; must not be negative.
    pub answered_delta: i64,
}

/// Session record as returned to callers.
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionView {
    /// The record itself.
    #[serde(flatten)]
    pub session: Session,
    /// Dashboard label derived from the end reason.
    pub status: Option<ApplicantStatus>,
    /// Whether a controller in this process owns the session.
    pub live: bool,
    /// Seconds until the countdown fires, for live sessions.
    pub remaining_seconds: Option<u64>,
    /// Merged question list, when known.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub questions: Vec<Question>,
}

impl SessionView {
    fn stored(session: Session, questions: Vec<Question>) -> Self {
        Self {
            status: session.applicant_status(),
            session,
            live: false,
            remaining_seconds: None,
            questions,
        }
    }

    fn live(controller: &SessionController, session: Session) -> Self {
        let remaining_seconds =
            (session.state == SessionState::InProgress).then(|| controller.remaining().as_secs());
        Self {
            status: session.applicant_status(),
            session,
            live: true,
            remaining_seconds,
            questions: controller.questions().to_vec(),
        }
    }
}

/// Acknowledgement for fire-and-forget calls.
#[derive(Debug, Serialize)]
pub struct Ack {
    session_id: String,
    state: SessionState,
}

/// `GET /health`
pub async fn health() -> &'static str {
    "ok"
}

/// `POST /sessions`: the start call.
///
/// # Errors
///
/// Returns an error response if the start record cannot be written.
pub async fn start_session(
    State(state): State<Arc<AppState>>,
    Json(request): Json<StartSessionRequest>,
) -> ApiResult<(StatusCode, Json<StartSessionResponse>)> {
    let secondary = request
        .secondary_questions
        .unwrap_or_else(|| state.config.questions.secondary.clone());
    let start = SessionStart {
        refs: SessionRefs {
            participant_ref: request.participant_ref,
            job_ref: request.job_ref,
            org_ref: request.org_ref,
        },
        primary: request.primary_questions,
        secondary,
    };

    let repo = SessionRepo::new(Arc::clone(&state.db));
    let collaborators = Collaborators::new(Arc::new(repo)).with_beacon(Arc::clone(&state.beacon));
    let settings = state.config.session_settings();

    let controller = SessionController::start(start, &settings, collaborators)
        .instrument(info_span!("start_session"))
        .await?;

    let response = StartSessionResponse {
        session_id: controller.id().to_owned(),
        questions: controller.questions().to_vec(),
        max_duration_seconds: settings.max_duration.as_secs(),
    };
    state.registry.insert(controller).await;

    Ok((StatusCode::CREATED, Json(response)))
}

/// `GET /sessions/{id}`
///
/// # Errors
///
/// Returns `404` for an unknown session.
pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<SessionView>> {
    if let Some(controller) = state.registry.get(&id).await {
        let snapshot = controller.snapshot();
        return Ok(Json(SessionView::live(&controller, snapshot)));
    }

    let repo = SessionRepo::new(Arc::clone(&state.db));
    let session = repo
        .get_by_id(&id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("session {id} not found")))?;
    let questions = repo.get_questions(&id).await?.unwrap_or_default();
    Ok(Json(SessionView::stored(session, questions)))
}

/// `POST /sessions/{id}/progress`
///
/// A no-op returning the stored record once the session has ended.
///
/// # Errors
///
/// Returns `422` for an invalid delta and `404` for an unknown session.
pub async fn report_progress(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(request): Json<ProgressRequest>,
) -> ApiResult<Json<SessionView>> {
    match resolve(&state, &id).await? {
        Target::Live(controller) => {
            let snapshot = controller.report_progress(request.answered_delta)?;
            Ok(Json(SessionView::live(&controller, snapshot)))
        }
        Target::Ended(_) if request.answered_delta < 0 => Err(ApiError(AppError::InvalidProgress(
            format!("answered_delta must not be negative, got {}", request.answered_delta),
        ))),
        Target::Ended(session) => Ok(Json(SessionView::stored(session, Vec::new()))),
    }
}

/// `POST /sessions/{id}/end`: the explicit end call.
///
/// # Errors
///
/// Returns `404` for an unknown session.
pub async fn end_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<(StatusCode, Json<Ack>)> {
    let target = resolve(&state, &id).await?;
    if let Target::Live(ref controller) = target {
        controller.request_end(EndReason::VoluntaryEnd);
    }
    Ok((StatusCode::ACCEPTED, Json(target.ack())))
}

/// `POST /sessions/{id}/heartbeat`
///
/// # Errors
///
/// Returns `404` for an unknown session.
pub async fn heartbeat(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    if let Target::Live(controller) = resolve(&state, &id).await? {
        controller.heartbeat();
    }
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /sessions/{id}/departed`: the client's "page is closing" notice.
///
/// # Errors
///
/// Returns `404` for an unknown session.
pub async fn client_departed(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<(StatusCode, Json<Ack>)> {
    let target = resolve(&state, &id).await?;
    if let Target::Live(ref controller) = target {
        controller.client_departed();
    }
    Ok((StatusCode::ACCEPTED, Json(target.ack())))
}

/// `GET /participants/{participant_ref}/sessions`
///
/// # Errors
///
/// Returns `500` if the store cannot be read.
pub async fn list_participant_sessions(
    State(state): State<Arc<AppState>>,
    Path(participant_ref): Path<String>,
) -> ApiResult<Json<Vec<SessionView>>> {
    let repo = SessionRepo::new(Arc::clone(&state.db));
    let sessions = repo.list_for_participant(&participant_ref).await?;
    let views = sessions
        .into_iter()
        .map(|session| SessionView::stored(session, Vec::new()))
        .collect();
    Ok(Json(views))
}

/// `POST /beacon`: crash-path receiver.
///
/// Accepts any content type, since browsers send beacons as text. The
/// payload is applied at most once and the answer is always `202`. A live
/// session treats any beacon as the client leaving; a stored one only
/// takes a `time_expired` claim once the server clock agrees.
pub async fn receive_beacon(State(state): State<Arc<AppState>>, body: String) -> StatusCode {
    let payload: BeaconPayload = match serde_json::from_str(&body) {
        Ok(payload) => payload,
        Err(err) => {
            debug!(%err, "malformed beacon ignored");
            return StatusCode::ACCEPTED;
        }
    };

    apply_beacon(&state, payload)
        .instrument(info_span!("beacon"))
        .await;
    StatusCode::ACCEPTED
}

async fn apply_beacon(state: &AppState, payload: BeaconPayload) {
    let BeaconPayload {
        session_id,
        participant_ref,
        reason,
        elapsed_seconds,
        answered_questions,
        ..
    } = payload;

    if let Some(controller) = state.registry.get(&session_id).await {
        if controller.snapshot().participant_ref != participant_ref {
            warn!(session_id, "beacon participant mismatch; ignored");
            return;
        }
        // A live session decides its own reason; the beacon only says the
        // client is gone.
        info!(session_id, claimed = reason.as_str(), "beacon for live session");
        controller.client_departed();
        return;
    }

    let repo = SessionRepo::new(Arc::clone(&state.db));
    match repo.get_by_id(&session_id).await {
        Ok(Some(session)) if session.participant_ref != participant_ref => {
            warn!(session_id, "beacon participant mismatch; ignored");
        }
        Ok(Some(session)) if session.state == SessionState::InProgress => {
            let (reason, elapsed_seconds) = recovery::vet_beacon(
                &session,
                reason,
                elapsed_seconds,
                state.config.max_duration(),
                Utc::now(),
            );
            match recovery::close_orphan(&repo, session, reason, elapsed_seconds, answered_questions)
                .await
            {
                Ok(true) => {
                    info!(session_id, reason = reason.as_str(), "beacon finalized stored session");
                }
                Ok(false) => debug!(session_id, "session finalized concurrently; beacon ignored"),
                Err(err) => warn!(session_id, %err, "failed to apply beacon"),
            }
        }
        Ok(Some(_)) => debug!(session_id, "beacon for finalized session ignored"),
        Ok(None) => debug!(session_id, "beacon for unknown session ignored"),
        Err(err) => warn!(session_id, %err, "failed to load session for beacon"),
    }
}

/// Where a per-session call lands.
enum Target {
    /// Owned by a controller in this process.
    Live(SessionController),
    /// Already terminal in the store; calls are no-ops.
    Ended(Session),
}

impl Target {
    fn ack(&self) -> Ack {
        match self {
            Self::Live(controller) => Ack {
                session_id: controller.id().to_owned(),
                state: controller.current_state(),
            },
            Self::Ended(session) => Ack {
                session_id: session.id.clone(),
                state: session.state,
            },
        }
    }
}

async fn resolve(state: &AppState, id: &str) -> ApiResult<Target> {
    if let Some(controller) = state.registry.get(id).await {
        return Ok(Target::Live(controller));
    }

    let repo = SessionRepo::new(Arc::clone(&state.db));
    match repo.get_by_id(id).await? {
        Some(session) if session.state.is_terminal() => Ok(Target::Ended(session)),
        _ => Err(ApiError(AppError::NotFound(format!("no live session {id}")))),
    }
}
