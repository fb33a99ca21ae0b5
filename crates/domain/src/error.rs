//! Domain error types.

use common::{BaseId, ContinentId};
use thiserror::Error;

/// Reasons an otherwise well-formed event is rejected before projection.
///
/// A rejected event is excluded from its batch; its siblings are still
/// projected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    /// The event names a base that is not in the reference tables.
    #[error("event {sequence} references unknown base {base_id}")]
    UnknownBase { sequence: i64, base_id: BaseId },

    /// The event places a base on a continent it does not belong to.
    #[error(
        "event {sequence} reports base {base_id} on continent {reported}, but it lies on continent {actual}"
    )]
    ContinentMismatch {
        sequence: i64,
        base_id: BaseId,
        reported: ContinentId,
        actual: ContinentId,
    },

    /// The event names a continent without any known base.
    #[error("event {sequence} references unknown continent {continent_id}")]
    UnknownContinent {
        sequence: i64,
        continent_id: ContinentId,
    },
}

impl DomainError {
    /// Returns the arrival sequence of the rejected event.
    pub fn sequence(&self) -> i64 {
        match self {
            DomainError::UnknownBase { sequence, .. }
            | DomainError::ContinentMismatch { sequence, .. }
            | DomainError::UnknownContinent { sequence, .. } => *sequence,
        }
    }
}

/// Result type for domain operations.
pub type Result<T> = std::result::Result<T, DomainError>;
