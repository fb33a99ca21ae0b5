use std::time::Duration;

use thiserror::Error;

/// Errors that can occur when interacting with the event buffer.
#[derive(Debug, Error)]
pub enum EventStoreError {
    /// The store could not be reached or did not answer within its deadline.
    ///
    /// The caller must not assume the operation took effect. Rows that were
    /// not claimed stay eligible for the next tick.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// The database rejected a statement.
    #[error("Database error: {0}")]
    Database(sqlx::Error),
}

impl From<sqlx::Error> for EventStoreError {
    fn from(err: sqlx::Error) -> Self {
        if is_transient(&err) {
            EventStoreError::StoreUnavailable(err.to_string())
        } else {
            EventStoreError::Database(err)
        }
    }
}

impl From<DeadlineExceeded> for EventStoreError {
    fn from(err: DeadlineExceeded) -> Self {
        EventStoreError::StoreUnavailable(err.to_string())
    }
}

impl EventStoreError {
    /// Returns true if retrying on a later tick may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, EventStoreError::StoreUnavailable(_))
    }
}

/// Returns true for connectivity failures, as opposed to rejected statements.
pub fn is_transient(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
    )
}

/// A store call did not complete within its deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{operation} did not complete within {limit:?}")]
pub struct DeadlineExceeded {
    pub operation: &'static str,
    pub limit: Duration,
}

/// Runs a store call under a deadline.
///
/// The future is dropped when the deadline expires. For statements running
/// inside a transaction this rolls the transaction back, so a timed-out call
/// never leaves partial writes behind.
pub async fn with_deadline<F, T, E>(
    operation: &'static str,
    limit: Duration,
    fut: F,
) -> std::result::Result<T, E>
where
    F: std::future::Future<Output = std::result::Result<T, E>>,
    E: From<DeadlineExceeded>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(DeadlineExceeded { operation, limit }.into()),
    }
}

/// Result type for event store operations.
pub type Result<T> = std::result::Result<T, EventStoreError>;
