//! Fire-and-forget crash-path delivery.
//!
//! When the final durable write cannot be confirmed, the coordinator hands
//! a [`BeaconPayload`] to a [`BeaconSink`]. Delivery is at most once and
//! may never happen; nothing in the session lifecycle waits on it.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::models::beacon::BeaconPayload;
use crate::{AppError, Result};

/// Upper bound on a single beacon request.
const BEACON_TIMEOUT: Duration = Duration::from_secs(5);

/// Out-of-band sink for crash-path beacons.
pub trait BeaconSink: Send + Sync {
    /// Hand off `payload` without waiting for delivery.
    fn send(&self, payload: BeaconPayload);
}

/// Sink used when no beacon endpoint is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopBeacon;

impl BeaconSink for NoopBeacon {
    fn send(&self, payload: BeaconPayload) {
        warn!(
            session_id = %payload.session_id,
            reason = payload.reason.as_str(),
            "no beacon endpoint configured; crash-path notice dropped"
        );
    }
}

/// Posts beacons as JSON to a configured endpoint from a detached task.
#[derive(Debug, Clone)]
pub struct HttpBeacon {
    client: reqwest::Client,
    url: String,
}

impl HttpBeacon {
    /// Build a sink targeting `url`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Http` if the HTTP client cannot be constructed.
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(BEACON_TIMEOUT)
            .build()
            .map_err(|err| AppError::Http(format!("failed to build beacon client: {err}")))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

impl BeaconSink for HttpBeacon {
    fn send(&self, payload: BeaconPayload) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(session_id = %payload.session_id, "no runtime available; beacon dropped");
            return;
        };

        let client = self.client.clone();
        let url = self.url.clone();
        runtime.spawn(async move {
            let session_id = payload.session_id.clone();
            match client.post(&url).json(&payload).send().await {
                Ok(resp) if resp.status().is_success() => {
                    info!(session_id, status = %resp.status(), "beacon delivered");
                }
                Ok(resp) => {
                    warn!(session_id, status = %resp.status(), "beacon rejected");
                }
                Err(err) => {
                    debug!(session_id, %err, "beacon delivery failed");
                }
            }
        });
    }
}

/// Pick the sink for an optional endpoint.
///
/// # Errors
///
/// Returns `AppError::Http` if the HTTP client cannot be constructed.
pub fn sink_for(url: Option<&str>) -> Result<Arc<dyn BeaconSink>> {
    Ok(match url {
        Some(url) => Arc::new(HttpBeacon::new(url)?),
        None => Arc::new(NoopBeacon),
    })
}
