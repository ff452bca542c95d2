//! `SQLite` schema bootstrap logic.
//!
//! All definitions use `IF NOT EXISTS`, so it runs on every startup.

use sqlx::SqlitePool;

use crate::Result;

/// Apply all table definitions to the connected `SQLite` database.
///
/// # Errors
///
/// Returns `AppError::Db` if any DDL statement fails.
pub async fn bootstrap_schema(pool: &SqlitePool) -> Result<()> {
    let ddl = r"
CREATE TABLE IF NOT EXISTS interview_session (
    id                 TEXT PRIMARY KEY NOT NULL,
    participant_ref    TEXT NOT NULL,
    job_ref            TEXT NOT NULL,
    org_ref            TEXT NOT NULL,
    state              TEXT NOT NULL CHECK(state IN ('not_started','in_progress','finalizing','completed','abandoned','timed_out')),
    started_at         TEXT,
    ended_at           TEXT,
    elapsed_seconds    INTEGER NOT NULL DEFAULT 0,
    total_questions    INTEGER NOT NULL,
    answered_questions INTEGER NOT NULL DEFAULT 0,
    end_reason         TEXT CHECK(end_reason IS NULL OR end_reason IN ('all_questions_completed','time_expired','voluntary_end','client_lost')),
    questions          TEXT NOT NULL DEFAULT '[]',
    updated_at         TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_session_participant ON interview_session(participant_ref);
CREATE INDEX IF NOT EXISTS idx_session_state ON interview_session(state);
";

    sqlx::raw_sql(ddl).execute(pool).await?;
    Ok(())
}
