//! Global configuration parsing and validation.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::orchestrator::{PresenceSettings, RetryPolicy, SessionSettings, MAX_SESSION_DURATION};
use crate::{AppError, Result};

/// Session timing configuration.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SessionConfig {
    /// Hard ceiling on session length; the countdown fires `TimeExpired` here.
    #[serde(default = "default_max_duration")]
    pub max_duration_seconds: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_duration_seconds: default_max_duration(),
        }
    }
}

/// Client liveness detection configuration.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct PresenceConfig {
    /// Whether heartbeat-based presence detection is enabled.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Expected interval between client heartbeats.
    #[serde(default = "default_presence_interval")]
    pub interval_seconds: u64,
    /// Consecutive missed intervals before the client is considered gone.
    #[serde(default = "default_missed_heartbeats")]
    pub missed_heartbeats: u32,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_seconds: default_presence_interval(),
            missed_heartbeats: default_missed_heartbeats(),
        }
    }
}

/// Retry behaviour for the finalization write.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct PersistenceConfig {
    /// Total attempts for the final durable write (including the first).
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    /// Linear backoff step between attempts.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    /// Upper bound on a single write attempt.
    #[serde(default = "default_attempt_timeout_ms")]
    pub attempt_timeout_ms: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            retry_attempts: default_retry_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
            attempt_timeout_ms: default_attempt_timeout_ms(),
        }
    }
}

/// Crash-path beacon delivery.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct BeaconConfig {
    /// Endpoint that receives fire-and-forget beacons; disabled when absent.
    pub url: Option<String>,
}

/// Default question material supplied by the deployment.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct QuestionsConfig {
    /// Secondary (culture-fit) prompts used when a start call supplies none.
    #[serde(default)]
    pub secondary: Vec<String>,
}

fn default_true() -> bool {
    true
}

fn default_max_duration() -> u64 {
    2400
}

fn default_presence_interval() -> u64 {
    15
}

fn default_missed_heartbeats() -> u32 {
    3
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    250
}

fn default_attempt_timeout_ms() -> u64 {
    5000
}

fn default_retention_days() -> u32 {
    90
}

fn default_http_port() -> u16 {
    8080
}

fn default_db_path() -> PathBuf {
    PathBuf::from("data/interview-sessions.db")
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// `SQLite` database file.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    /// HTTP port for the session API.
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    /// Days after finalization before session records are purged.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    /// Session timing.
    #[serde(default)]
    pub session: SessionConfig,
    /// Presence detection.
    #[serde(default)]
    pub presence: PresenceConfig,
    /// Finalization write retries.
    #[serde(default)]
    pub persistence: PersistenceConfig,
    /// Crash-path beacon target.
    #[serde(default)]
    pub beacon: BeaconConfig,
    /// Default question sets.
    #[serde(default)]
    pub questions: QuestionsConfig,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the file cannot be read, or
    /// `AppError::Config` if it contains invalid TOML or fails validation.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|err| {
            AppError::Io(format!("failed to read config {}: {err}", path.display()))
        })?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Maximum session duration as a [`Duration`].
    #[must_use]
    pub fn max_duration(&self) -> Duration {
        Duration::from_secs(self.session.max_duration_seconds)
    }

    /// Build the per-session settings handed to each controller.
    #[must_use]
    pub fn session_settings(&self) -> SessionSettings {
        let presence = self.presence.enabled.then(|| PresenceSettings {
            interval: Duration::from_secs(self.presence.interval_seconds),
            missed_heartbeats: self.presence.missed_heartbeats,
        });

        SessionSettings {
            max_duration: self.max_duration(),
            presence,
            retry: RetryPolicy {
                attempts: self.persistence.retry_attempts,
                backoff: Duration::from_millis(self.persistence.retry_backoff_ms),
                attempt_timeout: Duration::from_millis(self.persistence.attempt_timeout_ms),
            },
        }
    }

    fn validate(&self) -> Result<()> {
        if self.session.max_duration_seconds == 0 {
            return Err(AppError::Config(
                "session.max_duration_seconds must be greater than zero".into(),
            ));
        }

        if self.max_duration() > MAX_SESSION_DURATION {
            return Err(AppError::Config(format!(
                "session.max_duration_seconds must not exceed {}",
                MAX_SESSION_DURATION.as_secs()
            )));
        }

        if self.presence.interval_seconds == 0 {
            return Err(AppError::Config(
                "presence.interval_seconds must be greater than zero".into(),
            ));
        }

        if self.presence.missed_heartbeats == 0 {
            return Err(AppError::Config(
                "presence.missed_heartbeats must be at least one".into(),
            ));
        }

        if self.persistence.retry_attempts == 0 {
            return Err(AppError::Config(
                "persistence.retry_attempts must be at least one".into(),
            ));
        }

        if self.persistence.attempt_timeout_ms == 0 {
            return Err(AppError::Config(
                "persistence.attempt_timeout_ms must be greater than zero".into(),
            ));
        }

        if let Some(ref url) = self.beacon.url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(AppError::Config(format!(
                    "beacon.url must be an http(s) url, got {url}"
                )));
            }
        }

        Ok(())
    }
}
