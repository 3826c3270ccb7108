//! Error types for the fleet registry.

use thiserror::Error;

/// Result type alias for registry operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur during registry operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StateError {
    /// A write would break a data-model invariant.
    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("instance not found: {0}")]
    NotFound(String),
}

/// Treat `NotFound` as success with no value; other errors pass through.
pub fn missing_ok<T>(result: StateResult<T>) -> StateResult<Option<T>> {
    match result {
        Ok(v) => Ok(Some(v)),
        Err(StateError::NotFound(_)) => Ok(None),
        Err(e) => Err(e),
    }
}
