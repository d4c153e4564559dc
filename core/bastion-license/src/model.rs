//! License and user records.

use crate::error::{LicenseError, LicenseResult};
use crate::key::LicenseKey;
use bastion_types::{LicenseId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A license record.
///
/// `id` and `key` never change after creation; stores refuse any
/// modification that alters them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct License {
    pub id: LicenseId,
    pub key: LicenseKey,
    pub product: String,
    /// Weak reference to the owning user; not checked against the user table.
    pub user_id: String,
    /// Hardware id bound on first successful verification that supplied one.
    pub hwid: Option<String>,
    pub active: bool,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub last_used: Option<DateTime<Utc>>,
    pub max_activations: u32,
    pub current_activations: u32,
    /// Free-form administrative metadata.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl License {
    /// Returns true if the license has expired at `now` (expiry is inclusive).
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Returns true if a new hardware binding would exceed the ceiling.
    #[must_use]
    pub fn activation_limit_reached(&self) -> bool {
        self.current_activations >= self.max_activations
    }

    /// Returns the activation counters.
    #[must_use]
    pub fn activations(&self) -> Activations {
        Activations {
            current: self.current_activations,
            max: self.max_activations,
        }
    }
}

/// Activation counters reported back to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Activations {
    pub current: u32,
    pub max: u32,
}

impl Activations {
    /// Slots still available for binding.
    #[must_use]
    pub fn remaining(&self) -> u32 {
        self.max.saturating_sub(self.current)
    }
}

/// Input for issuing a license.
#[derive(Debug, Clone, PartialEq)]
pub struct NewLicense {
    pub product: String,
    pub user_id: String,
    pub expires_at: DateTime<Utc>,
    pub max_activations: u32,
}

impl NewLicense {
    /// Creates a request with the default ceiling of one activation.
    pub fn new(
        product: impl Into<String>,
        user_id: impl Into<String>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            product: product.into(),
            user_id: user_id.into(),
            expires_at,
            max_activations: 1,
        }
    }

    /// Sets the activation ceiling.
    #[must_use]
    pub fn with_max_activations(mut self, max_activations: u32) -> Self {
        self.max_activations = max_activations;
        self
    }

    pub(crate) fn validate(&self, now: DateTime<Utc>) -> LicenseResult<()> {
        if self.product.trim().is_empty() {
            return Err(LicenseError::Validation("product is required".into()));
        }
        if self.user_id.trim().is_empty() {
            return Err(LicenseError::Validation("userId is required".into()));
        }
        if self.max_activations < 1 {
            return Err(LicenseError::Validation(
                "maxActivations must be at least 1".into(),
            ));
        }
        if self.expires_at <= now {
            return Err(LicenseError::Validation(
                "expiresAt must be in the future".into(),
            ));
        }
        Ok(())
    }
}

/// Administrative changes to a license.
///
/// Only the mutable fields are representable. Unknown fields (including
/// `key`, `id`, `hwid` and `currentActivations`) are rejected when a patch
/// is deserialized.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LicensePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_activations: Option<u32>,
    /// Replaces the metadata object wholesale.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

impl LicensePatch {
    /// Returns true if the patch changes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.active.is_none()
            && self.expires_at.is_none()
            && self.max_activations.is_none()
            && self.metadata.is_none()
    }

    /// Merges the patch into `license`, leaving it untouched on error.
    pub(crate) fn apply(&self, license: &mut License) -> LicenseResult<()> {
        if let Some(max) = self.max_activations {
            if max < 1 {
                return Err(LicenseError::Validation(
                    "maxActivations must be at least 1".into(),
                ));
            }
            if max < license.current_activations {
                return Err(LicenseError::Validation(format!(
                    "maxActivations cannot drop below the {} activation(s) already in use",
                    license.current_activations
                )));
            }
        }

        if let Some(active) = self.active {
            license.active = active;
        }
        if let Some(expires_at) = self.expires_at {
            license.expires_at = expires_at;
        }
        if let Some(max) = self.max_activations {
            license.max_activations = max;
        }
        if let Some(metadata) = &self.metadata {
            license.metadata = metadata.clone();
        }
        Ok(())
    }
}

/// An account that owns licenses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub created_at: DateTime<Utc>,
}
