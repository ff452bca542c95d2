//! Persistence layer modules.

pub mod db;
pub mod recovery;
pub mod retention;
pub mod schema;
pub mod session_repo;
pub mod store;

/// Re-export the database pool type for convenience.
pub use sqlx::SqlitePool;
