//! Session repository for `SQLite` persistence.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::models::question::Question;
use crate::models::session::{EndReason, Session, SessionState};
use crate::{AppError, Result};

use super::db::Database;

/// Repository wrapper around `SQLite` for interview session records.
#[derive(Clone)]
pub struct SessionRepo {
    db: Arc<Database>,
}

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct SessionRow {
    id: String,
    participant_ref: String,
    job_ref: String,
    org_ref: String,
    state: String,
    started_at: Option<String>,
    ended_at: Option<String>,
    elapsed_seconds: i64,
    total_questions: i64,
    answered_questions: i64,
    end_reason: Option<String>,
}

impl SessionRow {
    /// Convert a database row into the domain model.
    fn into_session(self) -> Result<Session> {
        let state = SessionState::parse(&self.state)
            .ok_or_else(|| AppError::Db(format!("invalid session state: {}", self.state)))?;
        let end_reason = self
            .end_reason
            .as_deref()
            .map(|raw| {
                EndReason::parse(raw)
                    .ok_or_else(|| AppError::Db(format!("invalid end reason: {raw}")))
            })
            .transpose()?;

        Ok(Session {
            id: self.id,
            participant_ref: self.participant_ref,
            job_ref: self.job_ref,
            org_ref: self.org_ref,
            state,
            started_at: parse_ts(self.started_at.as_deref(), "started_at")?,
            ended_at: parse_ts(self.ended_at.as_deref(), "ended_at")?,
            elapsed_seconds: u64::try_from(self.elapsed_seconds)
                .map_err(|e| AppError::Db(format!("invalid elapsed_seconds: {e}")))?,
            total_questions: u32::try_from(self.total_questions)
                .map_err(|e| AppError::Db(format!("invalid total_questions: {e}")))?,
            answered_questions: u32::try_from(self.answered_questions)
                .map_err(|e| AppError::Db(format!("invalid answered_questions: {e}")))?,
            end_reason,
        })
    }
}

fn parse_ts(raw: Option<&str>, field: &str) -> Result<Option<DateTime<Utc>>> {
    raw.map(|value| {
        DateTime::parse_from_rfc3339(value)
            .map(|ts| ts.with_timezone(&Utc))
            .map_err(|e| AppError::Db(format!("invalid {field}: {e}")))
    })
    .transpose()
}

fn elapsed_i64(session: &Session) -> Result<i64> {
    i64::try_from(session.elapsed_seconds)
        .map_err(|e| AppError::Db(format!("elapsed_seconds out of range: {e}")))
}

impl SessionRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert the "session started" record together with its question list.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if serialization or the insert fails.
    pub async fn create(&self, session: &Session, questions: &[Question]) -> Result<Session> {
        let questions_json = serde_json::to_string(questions)
            .map_err(|e| AppError::Db(format!("serialize questions: {e}")))?;
        let started_at = session.started_at.map(|ts| ts.to_rfc3339());
        let ended_at = session.ended_at.map(|ts| ts.to_rfc3339());
        let updated_at = Utc::now().to_rfc3339();

        sqlx::query(
            "INSERT INTO interview_session (id, participant_ref, job_ref, org_ref, state,
             started_at, ended_at, elapsed_seconds, total_questions, answered_questions,
             end_reason, questions, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        )
        .bind(&session.id)
        .bind(&session.participant_ref)
        .bind(&session.job_ref)
        .bind(&session.org_ref)
        .bind(session.state.as_str())
        .bind(&started_at)
        .bind(&ended_at)
        .bind(elapsed_i64(session)?)
        .bind(i64::from(session.total_questions))
        .bind(i64::from(session.answered_questions))
        .bind(session.end_reason.map(EndReason::as_str))
        .bind(&questions_json)
        .bind(&updated_at)
        .execute(self.db.as_ref())
        .await?;

        Ok(session.clone())
    }

    /// Retrieve a session by identifier.
    ///
    /// Returns `Ok(None)` if the session does not exist.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get_by_id(&self, id: &str) -> Result<Option<Session>> {
        let row: Option<SessionRow> =
            sqlx::query_as("SELECT * FROM interview_session WHERE id = ?1")
                .bind(id)
                .fetch_optional(self.db.as_ref())
                .await?;

        row.map(SessionRow::into_session).transpose()
    }

    /// Retrieve the ordered question list stored at start.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails or the stored JSON is invalid.
    pub async fn get_questions(&self, id: &str) -> Result<Option<Vec<Question>>> {
        let raw: Option<(String,)> =
            sqlx::query_as("SELECT questions FROM interview_session WHERE id = ?1")
                .bind(id)
                .fetch_optional(self.db.as_ref())
                .await?;

        raw.map(|(json,)| {
            serde_json::from_str(&json).map_err(|e| AppError::Db(format!("invalid questions: {e}")))
        })
        .transpose()
    }

    /// Write the final record, but only over a row still `in_progress`.
    ///
    /// Returns `true` if this call moved the row to its terminal state and
    /// `false` if the row was already terminal (or missing). Repeated or
    /// racing calls therefore record at most one outcome.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if `session` is not terminal or the update fails.
    pub async fn finalize(&self, session: &Session) -> Result<bool> {
        if !session.state.is_terminal() {
            return Err(AppError::Db(format!(
                "refusing to finalize session {} in state {}",
                session.id,
                session.state.as_str()
            )));
        }
        let (Some(end_reason), Some(ended_at)) = (session.end_reason, session.ended_at) else {
            return Err(AppError::Db(format!(
                "session {} is missing end_reason or ended_at",
                session.id
            )));
        };

        let result = sqlx::query(
            "UPDATE interview_session
             SET state = ?1, ended_at = ?2, elapsed_seconds = ?3,
                 answered_questions = ?4, end_reason = ?5, updated_at = ?6
             WHERE id = ?7 AND state = 'in_progress'",
        )
        .bind(session.state.as_str())
        .bind(ended_at.to_rfc3339())
        .bind(elapsed_i64(session)?)
        .bind(i64::from(session.answered_questions))
        .bind(end_reason.as_str())
        .bind(Utc::now().to_rfc3339())
        .bind(&session.id)
        .execute(self.db.as_ref())
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// List all sessions still recorded as `in_progress`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_in_progress(&self) -> Result<Vec<Session>> {
        let rows: Vec<SessionRow> =
            sqlx::query_as("SELECT * FROM interview_session WHERE state = 'in_progress'")
                .fetch_all(self.db.as_ref())
                .await?;

        rows.into_iter().map(SessionRow::into_session).collect()
    }

    /// List every session belonging to a participant, newest first.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_for_participant(&self, participant_ref: &str) -> Result<Vec<Session>> {
        let rows: Vec<SessionRow> = sqlx::query_as(
            "SELECT * FROM interview_session WHERE participant_ref = ?1 \
             ORDER BY started_at DESC",
        )
        .bind(participant_ref)
        .fetch_all(self.db.as_ref())
        .await?;

        rows.into_iter().map(SessionRow::into_session).collect()
    }
}
