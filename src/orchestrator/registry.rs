//! Registry of live session controllers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::models::session::EndReason;
use crate::models::signal::{SignalSource, TerminationSignal};

use super::controller::SessionController;

/// Live controllers keyed by session ID.
///
/// Entries remove themselves once their session finalizes.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<Mutex<HashMap<String, SessionController>>>,
}

impl SessionRegistry {
    /// Track `controller` until its session finalizes.
    pub async fn insert(&self, controller: SessionController) {
        let id = controller.id().to_owned();
        self.sessions
            .lock()
            .await
            .insert(id.clone(), controller.clone());

        let registry = self.clone();
        tokio::spawn(async move {
            controller.wait_finalized().await;
            if registry.remove(&id).await.is_some() {
                debug!(session_id = %id, "finalized session removed from registry");
            }
        });
    }

    /// Look up a live controller.
    pub async fn get(&self, id: &str) -> Option<SessionController> {
        self.sessions.lock().await.get(id).cloned()
    }

    /// Stop tracking a controller.
    pub async fn remove(&self, id: &str) -> Option<SessionController> {
        self.sessions.lock().await.remove(id)
    }

    /// Number of live sessions.
    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Whether no sessions are live.
    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }

    /// End every live session for server shutdown.
    ///
    /// Submits `ClientLost` to each session and waits up to `grace` per
    /// session for its finalization. Returns how many finalized in time.
    pub async fn shutdown(&self, grace: Duration) -> usize {
        let live: Vec<SessionController> = self
            .sessions
            .lock()
            .await
            .drain()
            .map(|(_, controller)| controller)
            .collect();

        for controller in &live {
            controller.submit(TerminationSignal::now(
                EndReason::ClientLost,
                SignalSource::Shutdown,
            ));
        }

        let mut finalized = 0usize;
        for controller in &live {
            match tokio::time::timeout(grace, controller.wait_finalized()).await {
                Ok(Some(_)) => finalized += 1,
                Ok(None) | Err(_) => {
                    warn!(session_id = %controller.id(), "session did not finalize before shutdown");
                }
            }
        }

        info!(live = live.len(), finalized, "live sessions ended for shutdown");
        finalized
    }
}
