//! Error types for the storage layer.

use bastion_license::LicenseError;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur in storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Metadata column could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored row does not decode into a record.
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

impl StorageError {
    /// Returns true if SQLite refused the write because of a UNIQUE or CHECK constraint.
    #[must_use]
    pub fn is_constraint_violation(&self) -> bool {
        matches!(
            self,
            Self::Database(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation
        )
    }
}

impl From<StorageError> for LicenseError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Serialization(e) => LicenseError::Serialization(e),
            other => LicenseError::Storage(other.to_string()),
        }
    }
}
