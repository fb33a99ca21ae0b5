//! Projection error types.

use common::{ContinentKey, EventCategory};
use event_store::{DeadlineExceeded, EventStoreError, is_transient};
use thiserror::Error;

/// Errors that can occur while applying projections.
#[derive(Debug, Error)]
pub enum ProjectionError {
    /// The store could not be reached or did not answer within its deadline.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// The database rejected a statement.
    #[error("Database error: {0}")]
    Database(sqlx::Error),

    /// A stored alert row moved since it was loaded. The transaction was
    /// rolled back and the batch must be projected again.
    #[error("Apply conflict on continent {key}")]
    ApplyConflict { key: ContinentKey },

    /// No handler is registered for the category.
    #[error("No handler registered for category {0}")]
    UnknownCategory(EventCategory),

    /// A stored row could not be decoded.
    #[error("Corrupt row in {table}: {reason}")]
    CorruptRow { table: &'static str, reason: String },
}

impl ProjectionError {
    /// Returns true if retrying on a later tick may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, ProjectionError::StoreUnavailable(_))
    }
}

impl From<sqlx::Error> for ProjectionError {
    fn from(err: sqlx::Error) -> Self {
        if is_transient(&err) {
            ProjectionError::StoreUnavailable(err.to_string())
        } else {
            ProjectionError::Database(err)
        }
    }
}

impl From<DeadlineExceeded> for ProjectionError {
    fn from(err: DeadlineExceeded) -> Self {
        ProjectionError::StoreUnavailable(err.to_string())
    }
}

impl From<EventStoreError> for ProjectionError {
    fn from(err: EventStoreError) -> Self {
        match err {
            EventStoreError::StoreUnavailable(reason) => ProjectionError::StoreUnavailable(reason),
            EventStoreError::Database(err) => ProjectionError::Database(err),
        }
    }
}

/// Result type for projection operations.
pub type Result<T> = std::result::Result<T, ProjectionError>;

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use common::{ContinentId, ServerId};

    use super::*;

    #[test]
    fn pool_timeout_is_transient() {
        let err: ProjectionError = sqlx::Error::PoolTimedOut.into();
        assert!(err.is_transient());
    }

    #[test]
    fn missing_row_is_not_transient() {
        let err: ProjectionError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, ProjectionError::Database(_)));
        assert!(!err.is_transient());
    }

    #[test]
    fn deadline_maps_to_unavailable() {
        let err: ProjectionError = DeadlineExceeded {
            operation: "apply",
            limit: Duration::from_millis(250),
        }
        .into();
        assert_eq!(
            err.to_string(),
            "Store unavailable: apply did not complete within 250ms"
        );
    }

    #[test]
    fn conflict_names_the_continent() {
        let err = ProjectionError::ApplyConflict {
            key: ContinentKey::new(ServerId::new(10), ContinentId::new(2)),
        };
        assert_eq!(err.to_string(), "Apply conflict on continent 10/2");
        assert!(!err.is_transient());
    }
}
