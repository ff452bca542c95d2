//! Media and device handles held for the duration of a session.

use std::sync::Arc;

use tracing::{info, warn};

use crate::{AppError, Result};

/// Handles acquired for a session (media capture, device locks, ...).
pub trait SessionResources: Send + Sync {
    /// Release every held handle.
    ///
    /// # Errors
    ///
    /// Returns an error if any handle fails to close; finalization reports
    /// it as `AppError::ResourceRelease`.
    fn release(&self) -> Result<()>;
}

/// Placeholder for sessions that hold nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoResources;

impl SessionResources for NoResources {
    fn release(&self) -> Result<()> {
        Ok(())
    }
}

/// Releases session resources exactly once.
///
/// Finalization calls [`release`](Self::release) explicitly; if the owning
/// task unwinds or is dropped first, `Drop` does it instead.
pub(crate) struct ReleaseGuard {
    session_id: String,
    resources: Option<Arc<dyn SessionResources>>,
}

impl ReleaseGuard {
    pub(crate) fn new(session_id: String, resources: Arc<dyn SessionResources>) -> Self {
        Self {
            session_id,
            resources: Some(resources),
        }
    }

    /// Release now. Later calls and the eventual drop are no-ops.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ResourceRelease` naming the session if the
    /// resources fail to close.
    pub(crate) fn release(&mut self) -> Result<()> {
        match self.resources.take() {
            Some(resources) => resources
                .release()
                .map_err(|err| release_error(&self.session_id, err)),
            None => Ok(()),
        }
    }
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        if self.resources.is_some() {
            info!(session_id = %self.session_id, "releasing session resources from drop guard");
            if let Err(err) = self.release() {
                warn!(session_id = %self.session_id, %err, "resource release failed");
            }
        }
    }
}

fn release_error(session_id: &str, err: AppError) -> AppError {
    match err {
        AppError::ResourceRelease(msg) => {
            AppError::ResourceRelease(format!("session {session_id}: {msg}"))
        }
        other => AppError::ResourceRelease(format!("session {session_id}: {other}")),
    }
}
