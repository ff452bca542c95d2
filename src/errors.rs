//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Persistence failure when interacting with `SQLite`.
    Db(String),
    /// HTTP transport or beacon delivery failure.
    Http(String),
    /// Requested entity does not exist.
    NotFound(String),
    /// Negative or out-of-range progress delta; session state unchanged.
    InvalidProgress(String),
    /// The durable write at finalization failed or timed out.
    PersistenceUnavailable(String),
    /// Releasing media or session handles failed.
    ResourceRelease(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Db(msg) => write!(f, "db: {msg}"),
            Self::Http(msg) => write!(f, "http: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::InvalidProgress(msg) => write!(f, "invalid progress: {msg}"),
            Self::PersistenceUnavailable(msg) => write!(f, "persistence unavailable: {msg}"),
            Self::ResourceRelease(msg) => write!(f, "resource release: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        Self::Db(err.to_string())
    }
}
