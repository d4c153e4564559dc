//! Error types for the licensing core.
//!
//! Rejected verifications are not errors; see `RejectReason`.

use thiserror::Error;

/// Licensing-specific errors.
#[derive(Debug, Error)]
pub enum LicenseError {
    /// Text that does not match the `XXXXX-XXXXX-XXXXX-XXXXX` key shape.
    #[error("invalid license key format: {0}")]
    InvalidKeyFormat(String),

    /// A license or user id/key that does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Malformed input: blank fields, non-positive ceilings, past expiry.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A uniqueness constraint was violated (key, id or username).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Backing store failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl LicenseError {
    /// Returns true if the caller sent something it can correct and retry.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidKeyFormat(_) | Self::NotFound(_) | Self::Validation(_) | Self::Conflict(_)
        )
    }
}

/// Result type for license operations.
pub type LicenseResult<T> = Result<T, LicenseError>;
