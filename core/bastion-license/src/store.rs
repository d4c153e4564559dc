//! Storage abstraction for license and user records.
//!
//! The registry and the verification engine only talk to [`LicenseStore`],
//! so the same logic runs against [`MemoryLicenseStore`] in tests and a
//! durable backend in production.

use crate::error::{LicenseError, LicenseResult};
use crate::key::LicenseKey;
use crate::model::{License, User};
use bastion_types::{LicenseId, UserId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

/// Abstract store for license and user records.
///
/// Implementations must keep the id index and the key index in agreement:
/// an insert or removal is visible in both or in neither.
pub trait LicenseStore: Send + Sync {
    /// Inserts a new license.
    ///
    /// Fails with [`LicenseError::Conflict`] if the id or key is already taken.
    fn insert_license(&self, license: License) -> LicenseResult<()>;

    /// Looks up a license by internal id.
    fn license(&self, id: &LicenseId) -> LicenseResult<Option<License>>;

    /// Looks up a license by its public key.
    fn license_by_key(&self, key: &LicenseKey) -> LicenseResult<Option<License>>;

    /// Returns every license in creation order.
    fn licenses(&self) -> LicenseResult<Vec<License>>;

    /// Number of stored licenses.
    fn license_count(&self) -> LicenseResult<usize> {
        Ok(self.licenses()?.len())
    }

    /// Runs `apply` against the record with exclusive access to it.
    ///
    /// `apply` receives a working copy. Returning `Ok(true)` persists the
    /// copy, `Ok(false)` discards it, and an error discards it and is passed
    /// through. No other modification of the same record can interleave
    /// between the read handed to `apply` and the write.
    ///
    /// Returns the record as stored afterwards, or `None` if `id` is unknown.
    fn modify_license(
        &self,
        id: &LicenseId,
        apply: &mut dyn FnMut(&mut License) -> LicenseResult<bool>,
    ) -> LicenseResult<Option<License>>;

    /// Removes a license from both indices. Returns whether it existed.
    fn remove_license(&self, id: &LicenseId) -> LicenseResult<bool>;

    /// Inserts a new user.
    ///
    /// Fails with [`LicenseError::Conflict`] if the id or username is taken.
    fn insert_user(&self, user: User) -> LicenseResult<()>;

    /// Looks up a user by id.
    fn user(&self, id: &UserId) -> LicenseResult<Option<User>>;

    /// Looks up a user by username.
    fn user_by_username(&self, username: &str) -> LicenseResult<Option<User>>;
}

/// Rejects a modification that rewrote a license's identity.
pub fn ensure_identity_unchanged(before: &License, after: &License) -> LicenseResult<()> {
    if before.id != after.id || before.key != after.key {
        return Err(LicenseError::Validation(
            "license id and key are immutable".into(),
        ));
    }
    Ok(())
}

fn poisoned<T>(_: PoisonError<T>) -> LicenseError {
    LicenseError::Storage("store lock poisoned".into())
}

#[derive(Default)]
struct LicenseIndex {
    by_id: HashMap<LicenseId, Arc<Mutex<License>>>,
    by_key: HashMap<LicenseKey, LicenseId>,
    order: Vec<LicenseId>,
}

#[derive(Default)]
struct UserIndex {
    by_id: HashMap<UserId, User>,
    by_username: HashMap<String, UserId>,
}

/// In-memory store.
///
/// Both license indices live behind one `RwLock`, so inserts and removals
/// are atomic with respect to lookups. Each record has its own `Mutex`;
/// [`LicenseStore::modify_license`] only holds the index lock long enough
/// to find the record, so modifications of different licenses run in
/// parallel while modifications of the same license are serialized.
#[derive(Default)]
pub struct MemoryLicenseStore {
    licenses: RwLock<LicenseIndex>,
    users: RwLock<UserIndex>,
}

impl MemoryLicenseStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, id: &LicenseId) -> LicenseResult<Option<Arc<Mutex<License>>>> {
        let index = self.licenses.read().map_err(poisoned)?;
        Ok(index.by_id.get(id).map(Arc::clone))
    }

    fn snapshot(record: &Mutex<License>) -> LicenseResult<License> {
        Ok(record.lock().map_err(poisoned)?.clone())
    }
}

impl LicenseStore for MemoryLicenseStore {
    fn insert_license(&self, license: License) -> LicenseResult<()> {
        let mut index = self.licenses.write().map_err(poisoned)?;
        if index.by_key.contains_key(&license.key) {
            return Err(LicenseError::Conflict(format!(
                "license key {} already issued",
                license.key.redacted()
            )));
        }
        if index.by_id.contains_key(&license.id) {
            return Err(LicenseError::Conflict(format!(
                "license id {} already exists",
                license.id
            )));
        }

        let id = license.id;
        index.by_key.insert(license.key.clone(), id);
        index.by_id.insert(id, Arc::new(Mutex::new(license)));
        index.order.push(id);
        Ok(())
    }

    fn license(&self, id: &LicenseId) -> LicenseResult<Option<License>> {
        match self.record(id)? {
            Some(record) => Ok(Some(Self::snapshot(&record)?)),
            None => Ok(None),
        }
    }

    fn license_by_key(&self, key: &LicenseKey) -> LicenseResult<Option<License>> {
        let record = {
            let index = self.licenses.read().map_err(poisoned)?;
            index
                .by_key
                .get(key)
                .and_then(|id| index.by_id.get(id))
                .map(Arc::clone)
        };
        match record {
            Some(record) => Ok(Some(Self::snapshot(&record)?)),
            None => Ok(None),
        }
    }

    fn licenses(&self) -> LicenseResult<Vec<License>> {
        let index = self.licenses.read().map_err(poisoned)?;
        index
            .order
            .iter()
            .filter_map(|id| index.by_id.get(id))
            .map(|record| Self::snapshot(record))
            .collect()
    }

    fn license_count(&self) -> LicenseResult<usize> {
        Ok(self.licenses.read().map_err(poisoned)?.by_id.len())
    }

    fn modify_license(
        &self,
        id: &LicenseId,
        apply: &mut dyn FnMut(&mut License) -> LicenseResult<bool>,
    ) -> LicenseResult<Option<License>> {
        let Some(record) = self.record(id)? else {
            return Ok(None);
        };

        let mut current = record.lock().map_err(poisoned)?;
        let mut draft = current.clone();
        if apply(&mut draft)? {
            ensure_identity_unchanged(&current, &draft)?;
            *current = draft;
        }
        Ok(Some(current.clone()))
    }

    fn remove_license(&self, id: &LicenseId) -> LicenseResult<bool> {
        let mut index = self.licenses.write().map_err(poisoned)?;
        let Some(record) = index.by_id.remove(id) else {
            return Ok(false);
        };

        let key = record
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .key
            .clone();
        index.by_key.remove(&key);
        index.order.retain(|other| other != id);
        Ok(true)
    }

    fn insert_user(&self, user: User) -> LicenseResult<()> {
        let mut index = self.users.write().map_err(poisoned)?;
        if index.by_username.contains_key(&user.username) {
            return Err(LicenseError::Conflict(format!(
                "username {:?} is taken",
                user.username
            )));
        }
        if index.by_id.contains_key(&user.id) {
            return Err(LicenseError::Conflict(format!("user id {} already exists", user.id)));
        }

        index.by_username.insert(user.username.clone(), user.id);
        index.by_id.insert(user.id, user);
        Ok(())
    }

    fn user(&self, id: &UserId) -> LicenseResult<Option<User>> {
        Ok(self.users.read().map_err(poisoned)?.by_id.get(id).cloned())
    }

    fn user_by_username(&self, username: &str) -> LicenseResult<Option<User>> {
        let index = self.users.read().map_err(poisoned)?;
        Ok(index
            .by_username
            .get(username)
            .and_then(|id| index.by_id.get(id))
            .cloned())
    }
}
