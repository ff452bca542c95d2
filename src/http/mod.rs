//! HTTP surface for the session API.
//!
//! Exposes the start, progress, explicit end, heartbeat and status calls
//! for live sessions, a read-only listing for dashboards, and the
//! crash-path beacon receiver.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::beacon::BeaconSink;
use crate::config::GlobalConfig;
use crate::orchestrator::SessionRegistry;
use crate::persistence::db::Database;
use crate::{AppError, Result};

pub mod handlers;

/// Shared state handed to every request handler.
pub struct AppState {
    /// Loaded configuration.
    pub config: Arc<GlobalConfig>,
    /// Database pool.
    pub db: Arc<Database>,
    /// Live session controllers.
    pub registry: SessionRegistry,
    /// Crash-path sink handed to each new controller.
    pub beacon: Arc<dyn BeaconSink>,
}

/// Build the axum router over `state`.
#[must_use]
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/sessions", post(handlers::start_session))
        .route("/sessions/{id}", get(handlers::get_session))
        .route("/sessions/{id}/progress", post(handlers::report_progress))
        .route("/sessions/{id}/end", post(handlers::end_session))
        .route("/sessions/{id}/heartbeat", post(handlers::heartbeat))
        .route("/sessions/{id}/departed", post(handlers::client_departed))
        .route(
            "/participants/{participant_ref}/sessions",
            get(handlers::list_participant_sessions),
        )
        .route("/beacon", post(handlers::receive_beacon))
        .with_state(state)
}

/// Serve the API on `config.http_port` until `ct` is cancelled.
///
/// # Errors
///
/// Returns `AppError::Config` if the port cannot be bound, or
/// `AppError::Http` if the server fails.
pub async fn serve_http(state: Arc<AppState>, ct: CancellationToken) -> Result<()> {
    let bind = SocketAddr::from(([127, 0, 0, 1], state.config.http_port));
    let listener = TcpListener::bind(bind)
        .await
        .map_err(|err| AppError::Config(format!("failed to bind {bind}: {err}")))?;
    serve_on(listener, state, ct).await
}

/// Serve the API on an already-bound listener until `ct` is cancelled.
///
/// # Errors
///
/// Returns `AppError::Http` if the server fails.
pub async fn serve_on(
    listener: TcpListener,
    state: Arc<AppState>,
    ct: CancellationToken,
) -> Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "session api listening");
    }

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { ct.cancelled().await })
        .await
        .map_err(|err| AppError::Http(format!("server error: {err}")))
}
