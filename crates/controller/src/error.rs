//! Controller error types.

use thiserror::Error;

/// Errors that stop the controller from starting.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// A configuration variable is missing or malformed.
    #[error("Invalid configuration: {var}: {reason}")]
    Config { var: &'static str, reason: String },

    /// The database could not be reached at startup.
    #[error("Database connection failed: {0}")]
    Connect(#[from] sqlx::Error),

    /// The metrics exporter could not be installed.
    #[error("Metrics exporter failed: {0}")]
    Metrics(String),
}

impl ControllerError {
    pub(crate) fn config(var: &'static str, reason: impl Into<String>) -> Self {
        ControllerError::Config {
            var,
            reason: reason.into(),
        }
    }
}

/// Result type for controller operations.
pub type Result<T> = std::result::Result<T, ControllerError>;
