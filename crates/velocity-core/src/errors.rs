//! Collaborator error type.
//!
//! [`StoreError`] is what the lifecycle store and audit log return to the
//! relay. The relay never surfaces these to a connection; it logs them.

use thiserror::Error;

/// Errors reported by an external collaborator.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing store failed.
    #[error("storage backend error: {0}")]
    Backend(String),

    /// The operation did not finish within its deadline.
    #[error("storage operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The referenced record does not exist.
    #[error("record not found: {0}")]
    NotFound(String),
}

impl StoreError {
    /// Build a backend error from anything displayable.
    pub fn backend(err: impl std::fmt::Display) -> Self {
        Self::Backend(err.to_string())
    }
}

/// Convenience type alias for collaborator results.
pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn backend_display() {
        let err = StoreError::backend("disk full");
        assert_eq!(err.to_string(), "storage backend error: disk full");
    }

    #[test]
    fn timeout_display() {
        let err = StoreError::Timeout(Duration::from_secs(5));
        assert_eq!(err.to_string(), "storage operation timed out after 5s");
    }

    #[test]
    fn not_found_display() {
        let err = StoreError::NotFound("join-1".into());
        assert_eq!(err.to_string(), "record not found: join-1");
    }
}
