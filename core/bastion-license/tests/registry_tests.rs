mod common;

use bastion_license::{
    License, LicenseError, LicenseKey, LicensePatch, LicenseRegistry, LicenseResult, LicenseStore,
    MAX_KEY_ATTEMPTS, MemoryLicenseStore, NewLicense, User,
};
use bastion_types::{Clock, LicenseId, ManualClock, UserId};
use chrono::Duration;
use common::epoch;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

fn registry() -> LicenseRegistry {
    LicenseRegistry::with_clock(
        Arc::new(MemoryLicenseStore::new()) as Arc<dyn LicenseStore>,
        Arc::new(ManualClock::new(epoch())) as Arc<dyn Clock>,
    )
}

fn thirty_days() -> NewLicense {
    NewLicense::new("p1", "user-1", epoch() + Duration::days(30))
}

#[test]
fn create_initializes_record() {
    let registry = registry();
    let license = registry.create(thirty_days()).unwrap();

    assert!(license.active);
    assert_eq!(license.current_activations, 0);
    assert_eq!(license.max_activations, 1);
    assert!(license.hwid.is_none());
    assert!(license.last_used.is_none());
    assert_eq!(license.created_at, epoch());
    assert!(LicenseKey::is_well_formed(license.key.as_str()));
    assert!(license.metadata.is_empty());
}

#[test]
fn create_rejects_bad_input() {
    let registry = registry();

    let zero = thirty_days().with_max_activations(0);
    assert!(matches!(registry.create(zero), Err(LicenseError::Validation(_))));

    let past = NewLicense::new("p1", "user-1", epoch() - Duration::days(1));
    assert!(matches!(registry.create(past), Err(LicenseError::Validation(_))));

    let now = NewLicense::new("p1", "user-1", epoch());
    assert!(matches!(registry.create(now), Err(LicenseError::Validation(_))));

    let blank = NewLicense::new("  ", "user-1", epoch() + Duration::days(1));
    assert!(matches!(registry.create(blank), Err(LicenseError::Validation(_))));

    let no_owner = NewLicense::new("p1", "", epoch() + Duration::days(1));
    assert!(matches!(registry.create(no_owner), Err(LicenseError::Validation(_))));

    assert!(registry.list().unwrap().is_empty());
}

#[test]
fn keys_are_unique_across_many_licenses() {
    let registry = registry();
    let keys: HashSet<String> = (0..2000)
        .map(|_| registry.create(thirty_days()).unwrap().key.to_string())
        .collect();
    assert_eq!(keys.len(), 2000);
}

#[test]
fn lookups_agree() {
    let registry = registry();
    let license = registry.create(thirty_days()).unwrap();

    assert_eq!(registry.get(&license.id).unwrap().as_ref(), Some(&license));
    assert_eq!(registry.get_by_key(&license.key).unwrap().as_ref(), Some(&license));
    assert_eq!(
        registry.find_by_key(&format!(" {} ", license.key)).unwrap().as_ref(),
        Some(&license)
    );
    assert!(registry.find_by_key("not a key").unwrap().is_none());
    assert!(registry.get(&LicenseId::new()).unwrap().is_none());
}

#[test]
fn update_merges_mutable_fields() {
    let registry = registry();
    let license = registry.create(thirty_days()).unwrap();

    let patch = LicensePatch {
        active: Some(false),
        expires_at: Some(epoch() + Duration::days(90)),
        max_activations: Some(3),
        metadata: Some(json!({"note": "reseller"}).as_object().unwrap().clone()),
    };
    let updated = registry.update(&license.id, &patch).unwrap().unwrap();

    assert!(!updated.active);
    assert_eq!(updated.expires_at, epoch() + Duration::days(90));
    assert_eq!(updated.max_activations, 3);
    assert_eq!(updated.metadata["note"], "reseller");
    assert_eq!(updated.key, license.key);
    assert_eq!(updated.id, license.id);
    assert_eq!(registry.get(&license.id).unwrap().unwrap(), updated);
}

#[test]
fn update_unknown_is_none() {
    let registry = registry();
    let patch = LicensePatch {
        active: Some(false),
        ..Default::default()
    };
    assert!(registry.update(&LicenseId::new(), &patch).unwrap().is_none());
}

#[test]
fn update_cannot_drop_ceiling_below_usage() {
    let registry = registry();
    let license = registry.create(thirty_days().with_max_activations(2)).unwrap();
    registry
        .store()
        .modify_license(&license.id, &mut |l: &mut bastion_license::License| {
            l.hwid = Some("A".into());
            l.current_activations = 1;
            Ok(true)
        })
        .unwrap();

    let zero = LicensePatch {
        max_activations: Some(0),
        ..Default::default()
    };
    assert!(matches!(registry.update(&license.id, &zero), Err(LicenseError::Validation(_))));

    let one = LicensePatch {
        max_activations: Some(1),
        ..Default::default()
    };
    assert_eq!(registry.update(&license.id, &one).unwrap().unwrap().max_activations, 1);
}

#[test]
fn patch_json_rejects_immutable_fields() {
    for body in [
        json!({"key": "ABCDE-FGHJK-LMNPQ-RSTUV"}),
        json!({"id": "x"}),
        json!({"currentActivations": 0}),
        json!({"hwid": null}),
        json!({"active": true, "product": "other"}),
    ] {
        assert!(serde_json::from_value::<LicensePatch>(body.clone()).is_err(), "{body}");
    }

    let ok: LicensePatch =
        serde_json::from_value(json!({"active": false, "maxActivations": 4})).unwrap();
    assert_eq!(ok.active, Some(false));
    assert_eq!(ok.max_activations, Some(4));
    assert!(LicensePatch::default().is_empty());
}

#[test]
fn delete_removes_from_both_indices() {
    let registry = registry();
    let license = registry.create(thirty_days()).unwrap();
    let keep = registry.create(thirty_days()).unwrap();

    assert!(registry.delete(&license.id).unwrap());
    assert!(registry.get(&license.id).unwrap().is_none());
    assert!(registry.get_by_key(&license.key).unwrap().is_none());
    assert!(!registry.delete(&license.id).unwrap());
    assert_eq!(registry.list().unwrap(), vec![keep]);
}

#[test]
fn users_lifecycle() {
    let registry = registry();
    let user = registry.create_user(" alice ", Some("alice@example.com")).unwrap();
    assert_eq!(user.username, "alice");
    assert_eq!(user.email.as_deref(), Some("alice@example.com"));
    assert_eq!(user.created_at, epoch());

    assert_eq!(registry.get_user(&user.id).unwrap().as_ref(), Some(&user));
    assert_eq!(registry.get_user_by_username("alice").unwrap().as_ref(), Some(&user));
    assert!(matches!(registry.create_user("alice", None), Err(LicenseError::Conflict(_))));
    assert!(matches!(registry.create_user("", None), Err(LicenseError::Validation(_))));

    let no_email = registry.create_user("bob", Some("  ")).unwrap();
    assert!(no_email.email.is_none());
}

#[test]
fn users_survive_license_deletion() {
    let registry = registry();
    let user = registry.create_user("carol", None).unwrap();
    let license = registry
        .create(NewLicense::new("p1", user.id.to_string(), epoch() + Duration::days(1)))
        .unwrap();

    registry.delete(&license.id).unwrap();
    assert!(registry.get_user(&user.id).unwrap().is_some());
}

/// Refuses the first `collisions` license inserts as key conflicts.
struct CollidingStore {
    inner: MemoryLicenseStore,
    collisions: usize,
    attempts: AtomicUsize,
}

impl CollidingStore {
    fn new(collisions: usize) -> Self {
        Self {
            inner: MemoryLicenseStore::new(),
            collisions,
            attempts: AtomicUsize::new(0),
        }
    }

    fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl LicenseStore for CollidingStore {
    fn insert_license(&self, license: License) -> LicenseResult<()> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if attempt < self.collisions {
            return Err(LicenseError::Conflict(format!("key {} taken", license.key)));
        }
        self.inner.insert_license(license)
    }

    fn license(&self, id: &LicenseId) -> LicenseResult<Option<License>> {
        self.inner.license(id)
    }

    fn license_by_key(&self, key: &LicenseKey) -> LicenseResult<Option<License>> {
        self.inner.license_by_key(key)
    }

    fn licenses(&self) -> LicenseResult<Vec<License>> {
        self.inner.licenses()
    }

    fn modify_license(
        &self,
        id: &LicenseId,
        apply: &mut dyn FnMut(&mut License) -> LicenseResult<bool>,
    ) -> LicenseResult<Option<License>> {
        self.inner.modify_license(id, apply)
    }

    fn remove_license(&self, id: &LicenseId) -> LicenseResult<bool> {
        self.inner.remove_license(id)
    }

    fn insert_user(&self, user: User) -> LicenseResult<()> {
        self.inner.insert_user(user)
    }

    fn user(&self, id: &UserId) -> LicenseResult<Option<User>> {
        self.inner.user(id)
    }

    fn user_by_username(&self, username: &str) -> LicenseResult<Option<User>> {
        self.inner.user_by_username(username)
    }
}

fn registry_over(store: &Arc<CollidingStore>) -> LicenseRegistry {
    LicenseRegistry::with_clock(
        Arc::clone(store) as Arc<dyn LicenseStore>,
        Arc::new(ManualClock::new(epoch())) as Arc<dyn Clock>,
    )
}

#[test]
fn create_retries_after_key_collisions() {
    let store = Arc::new(CollidingStore::new(3));
    let registry = registry_over(&store);

    let license = registry.create(thirty_days()).unwrap();

    assert_eq!(store.attempts(), 4);
    assert_eq!(registry.list().unwrap(), vec![license.clone()]);
    assert_eq!(registry.get_by_key(&license.key).unwrap(), Some(license));
}

#[test]
fn create_gives_up_after_max_key_attempts() {
    let store = Arc::new(CollidingStore::new(usize::MAX));
    let registry = registry_over(&store);

    let err = registry.create(thirty_days()).unwrap_err();

    assert!(matches!(err, LicenseError::Storage(_)), "got {err:?}");
    assert_eq!(store.attempts(), MAX_KEY_ATTEMPTS);
    assert!(registry.list().unwrap().is_empty());
}
