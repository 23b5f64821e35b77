//! # Error Types
//!
//! Error handling for world runtime operations.

use crate::store::StoreError;

/// Errors surfaced by runtime operations to their callers.
///
/// Each variant corresponds to one failure class of the public API; store
/// failures pass through wrapped so callers can tell policy violations from
/// infrastructure trouble.
#[derive(Debug, thiserror::Error)]
pub enum WorldError {
    /// Malformed or unusable request input (unknown world, re-entering the
    /// current world, an event without a known client).
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A world admission hook refused the client.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// The connection could not be mapped to any client.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Session-level collision: a display name already in use, or no session
    /// capacity left.
    #[error("Session conflict: {0}")]
    SessionConflict(String),

    /// The operation makes no sense in the client's current state, e.g. an
    /// event for a foreign object before any scene exists.
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Ownership check failed.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// A streaming session could not be joined.
    #[error("Streaming error: {0}")]
    Streaming(String),

    /// Object store failure.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Unexpected internal failure.
    #[error("Internal error: {0}")]
    Internal(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = WorldError::InvalidArgument("Unknown world: limbo".to_string());
        assert_eq!(err.to_string(), "Invalid argument: Unknown world: limbo");
    }

    #[test]
    fn store_error_wraps() {
        let err: WorldError = StoreError::Backend("connection lost".to_string()).into();
        assert!(matches!(err, WorldError::Store(_)));
    }
}
