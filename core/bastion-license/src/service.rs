//! The operations the outside world invokes.
//!
//! [`LicenseService`] combines the registry and the verifier behind the
//! logical operations exposed to administrators and client software. It
//! performs no authentication: callers of the administrative operations
//! must already have passed an admin capability check.

use crate::error::{LicenseError, LicenseResult};
use crate::model::{License, LicensePatch, NewLicense, User};
use crate::registry::LicenseRegistry;
use crate::store::LicenseStore;
use crate::verify::{VerificationResult, Verifier, VerifyRequest};
use bastion_types::{Clock, LicenseId, SystemClock};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// An administrative request to issue a license.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateLicense {
    pub product: String,
    pub user_id: String,
    pub expires_in_days: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_activations: Option<u32>,
}

/// Entry point for every licensing operation.
#[derive(Clone)]
pub struct LicenseService {
    registry: LicenseRegistry,
    verifier: Verifier,
    clock: Arc<dyn Clock>,
}

impl LicenseService {
    /// Creates a service over `store` using the system clock.
    pub fn new(store: Arc<dyn LicenseStore>) -> Self {
        Self::with_clock(store, Arc::new(SystemClock))
    }

    /// Creates a service over `store` with an explicit clock.
    pub fn with_clock(store: Arc<dyn LicenseStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            registry: LicenseRegistry::with_clock(Arc::clone(&store), Arc::clone(&clock)),
            verifier: Verifier::with_clock(store, Arc::clone(&clock)),
            clock,
        }
    }

    /// The record registry.
    #[must_use]
    pub fn registry(&self) -> &LicenseRegistry {
        &self.registry
    }

    /// The verification engine.
    #[must_use]
    pub fn verifier(&self) -> &Verifier {
        &self.verifier
    }

    /// Issues a license expiring `expires_in_days` from now. Admin only.
    pub fn create_license(&self, request: &CreateLicense) -> LicenseResult<License> {
        if request.expires_in_days == 0 {
            return Err(LicenseError::Validation(
                "expiresInDays must be at least 1".into(),
            ));
        }
        let expires_at = self
            .clock
            .now()
            .checked_add_signed(Duration::days(i64::from(request.expires_in_days)))
            .ok_or_else(|| LicenseError::Validation("expiresInDays is too large".into()))?;

        let new = NewLicense::new(&*request.product, &*request.user_id, expires_at)
            .with_max_activations(request.max_activations.unwrap_or(1));
        self.registry.create(new)
    }

    /// Returns every license. Admin only.
    pub fn list_licenses(&self) -> LicenseResult<Vec<License>> {
        self.registry.list()
    }

    /// Returns one license. Admin only.
    pub fn get_license(&self, id: &LicenseId) -> LicenseResult<License> {
        self.registry
            .get(id)?
            .ok_or_else(|| LicenseError::NotFound(format!("license {id}")))
    }

    /// Applies an administrative patch. Admin only.
    pub fn update_license(&self, id: &LicenseId, patch: &LicensePatch) -> LicenseResult<License> {
        self.registry
            .update(id, patch)?
            .ok_or_else(|| LicenseError::NotFound(format!("license {id}")))
    }

    /// Deletes a license. Admin only.
    pub fn delete_license(&self, id: &LicenseId) -> LicenseResult<()> {
        if self.registry.delete(id)? {
            Ok(())
        } else {
            Err(LicenseError::NotFound(format!("license {id}")))
        }
    }

    /// Creates a user. Admin only.
    pub fn create_user(&self, username: &str, email: Option<&str>) -> LicenseResult<User> {
        self.registry.create_user(username, email)
    }

    /// Looks up a user by username. Admin only.
    pub fn user_by_username(&self, username: &str) -> LicenseResult<User> {
        self.registry
            .get_user_by_username(username)?
            .ok_or_else(|| LicenseError::NotFound(format!("user {username:?}")))
    }

    /// Verifies a key presented by client software. Public.
    pub fn verify_license(&self, request: &VerifyRequest) -> LicenseResult<VerificationResult> {
        self.verifier.verify(request)
    }

    /// Populates an empty store with a demo user and two licenses.
    ///
    /// Returns false, touching nothing, if any license already exists.
    pub fn seed_sample_data(&self) -> LicenseResult<bool> {
        if self.registry.store().license_count()? > 0 {
            return Ok(false);
        }

        let user = match self.registry.get_user_by_username("testuser")? {
            Some(user) => user,
            None => self.create_user("testuser", Some("test@example.com"))?,
        };
        let owner = user.id.to_string();

        for (product, days, max) in [("bastion-pro", 30, 1), ("bastion-enterprise", 365, 5)] {
            self.create_license(&CreateLicense {
                product: product.into(),
                user_id: owner.clone(),
                expires_in_days: days,
                max_activations: Some(max),
            })?;
        }

        info!(user = %user.id, "seeded sample licenses");
        Ok(true)
    }
}
