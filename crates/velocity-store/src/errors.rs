//! Error types for the `SQLite` store.
//!
//! [`DatabaseError`] is returned by every repository and pool operation.
//! The async adapters convert it into [`velocity_core::StoreError`] at the
//! collaborator boundary.

use thiserror::Error;
use velocity_core::StoreError;

/// Errors that can occur during database operations.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// `SQLite` database error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Connection pool error.
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// JSON serialization/deserialization error.
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Schema migration failed.
    #[error("migration error: {message}")]
    Migration {
        /// Describes which migration failed and why.
        message: String,
    },

    /// A stored value could not be decoded.
    #[error("invalid row: {0}")]
    InvalidRow(String),

    /// A referenced row does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The blocking task running the query failed.
    #[error("blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Convenience type alias for database results.
pub type Result<T> = std::result::Result<T, DatabaseError>;

impl From<DatabaseError> for StoreError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::NotFound(what) => StoreError::NotFound(what),
            other => StoreError::backend(other),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
