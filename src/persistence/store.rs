//! Narrow persistence contract consumed by the session core.
//!
//! The controller writes exactly twice per session: once at start and once
//! at finalization. Everything else about storage stays behind this trait.

use std::future::Future;
use std::pin::Pin;

use crate::models::question::Question;
use crate::models::session::Session;
use crate::Result;

use super::session_repo::SessionRepo;

/// Boxed future returned by [`SessionStore`] methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Durable store for session records.
pub trait SessionStore: Send + Sync {
    /// Persist the initial `in_progress` record.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the record cannot be written.
    fn record_start<'a>(
        &'a self,
        session: &'a Session,
        questions: &'a [Question],
    ) -> StoreFuture<'a, ()>;

    /// Persist the terminal record over an `in_progress` one.
    ///
    /// Resolves to `true` when this write recorded the outcome and `false`
    /// when the stored record was already terminal.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the write fails.
    fn record_final<'a>(&'a self, session: &'a Session) -> StoreFuture<'a, bool>;

    /// Load the stored record.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the read fails.
    fn load<'a>(&'a self, id: &'a str) -> StoreFuture<'a, Option<Session>>;
}

impl SessionStore for SessionRepo {
    fn record_start<'a>(
        &'a self,
        session: &'a Session,
        questions: &'a [Question],
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move { self.create(session, questions).await.map(|_| ()) })
    }

    fn record_final<'a>(&'a self, session: &'a Session) -> StoreFuture<'a, bool> {
        Box::pin(self.finalize(session))
    }

    fn load<'a>(&'a self, id: &'a str) -> StoreFuture<'a, Option<Session>> {
        Box::pin(self.get_by_id(id))
    }
}
