//! The license registry: issuing, reading, editing and deleting records.

use crate::error::{LicenseError, LicenseResult};
use crate::key::LicenseKey;
use crate::model::{License, LicensePatch, NewLicense, User};
use crate::store::LicenseStore;
use bastion_types::{Clock, LicenseId, SystemClock, UserId};
use serde_json::Map;
use std::sync::Arc;
use tracing::{debug, info};

/// How many fresh keys are tried before giving up on an insert.
pub const MAX_KEY_ATTEMPTS: usize = 16;

/// Owns the record lifecycle on top of a [`LicenseStore`].
#[derive(Clone)]
pub struct LicenseRegistry {
    store: Arc<dyn LicenseStore>,
    clock: Arc<dyn Clock>,
}

impl LicenseRegistry {
    /// Creates a registry reading time from the system clock.
    pub fn new(store: Arc<dyn LicenseStore>) -> Self {
        Self::with_clock(store, Arc::new(SystemClock))
    }

    /// Creates a registry with an explicit clock.
    pub fn with_clock(store: Arc<dyn LicenseStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Returns the underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn LicenseStore> {
        &self.store
    }

    /// Issues a new license with a fresh id and a fresh, unique key.
    ///
    /// # Errors
    ///
    /// [`LicenseError::Validation`] if the request is malformed or its expiry
    /// is not in the future; [`LicenseError::Storage`] if no unique key could
    /// be found within [`MAX_KEY_ATTEMPTS`].
    pub fn create(&self, request: NewLicense) -> LicenseResult<License> {
        let now = self.clock.now();
        request.validate(now)?;

        for attempt in 1..=MAX_KEY_ATTEMPTS {
            let license = License {
                id: LicenseId::new(),
                key: LicenseKey::generate(),
                product: request.product.trim().to_string(),
                user_id: request.user_id.trim().to_string(),
                hwid: None,
                active: true,
                expires_at: request.expires_at,
                created_at: now,
                last_used: None,
                max_activations: request.max_activations,
                current_activations: 0,
                metadata: Map::new(),
            };

            match self.store.insert_license(license.clone()) {
                Ok(()) => {
                    info!(
                        license = %license.id,
                        product = %license.product,
                        max_activations = license.max_activations,
                        "issued license"
                    );
                    return Ok(license);
                }
                Err(LicenseError::Conflict(reason)) => {
                    debug!(attempt, %reason, "generated license collided, retrying");
                }
                Err(e) => return Err(e),
            }
        }

        Err(LicenseError::Storage(format!(
            "no unique license key after {MAX_KEY_ATTEMPTS} attempts"
        )))
    }

    /// Looks up a license by id.
    pub fn get(&self, id: &LicenseId) -> LicenseResult<Option<License>> {
        self.store.license(id)
    }

    /// Looks up a license by key.
    pub fn get_by_key(&self, key: &LicenseKey) -> LicenseResult<Option<License>> {
        self.store.license_by_key(key)
    }

    /// Looks up a license by raw key text; malformed text finds nothing.
    pub fn find_by_key(&self, raw: &str) -> LicenseResult<Option<License>> {
        match LicenseKey::parse(raw) {
            Ok(key) => self.store.license_by_key(&key),
            Err(_) => Ok(None),
        }
    }

    /// Returns every license in creation order.
    pub fn list(&self) -> LicenseResult<Vec<License>> {
        self.store.licenses()
    }

    /// Applies an administrative patch. Returns `None` if the license is unknown.
    pub fn update(&self, id: &LicenseId, patch: &LicensePatch) -> LicenseResult<Option<License>> {
        let updated = self.store.modify_license(id, &mut |license: &mut License| {
            patch.apply(license)?;
            Ok(!patch.is_empty())
        })?;

        if updated.is_some() && !patch.is_empty() {
            info!(license = %id, ?patch, "updated license");
        }
        Ok(updated)
    }

    /// Deletes a license. Returns whether it existed.
    pub fn delete(&self, id: &LicenseId) -> LicenseResult<bool> {
        let removed = self.store.remove_license(id)?;
        if removed {
            info!(license = %id, "deleted license");
        }
        Ok(removed)
    }

    /// Creates a user.
    ///
    /// # Errors
    ///
    /// [`LicenseError::Validation`] for a blank username,
    /// [`LicenseError::Conflict`] if the username is taken.
    pub fn create_user(&self, username: &str, email: Option<&str>) -> LicenseResult<User> {
        let username = username.trim();
        if username.is_empty() {
            return Err(LicenseError::Validation("username is required".into()));
        }

        let user = User {
            id: UserId::new(),
            username: username.to_string(),
            email: email
                .map(str::trim)
                .filter(|e| !e.is_empty())
                .map(String::from),
            created_at: self.clock.now(),
        };
        self.store.insert_user(user.clone())?;
        info!(user = %user.id, username = %user.username, "created user");
        Ok(user)
    }

    /// Looks up a user by id.
    pub fn get_user(&self, id: &UserId) -> LicenseResult<Option<User>> {
        self.store.user(id)
    }

    /// Looks up a user by username.
    pub fn get_user_by_username(&self, username: &str) -> LicenseResult<Option<User>> {
        self.store.user_by_username(username.trim())
    }
}
