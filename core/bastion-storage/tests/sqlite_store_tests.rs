use bastion_license::{
    CreateLicense, License, LicenseError, LicenseKey, LicensePatch, LicenseService, LicenseStore,
    RejectReason, VerifyRequest, VerifyStatus,
};
use bastion_storage::SqliteLicenseStore;
use bastion_types::{LicenseId, UserId};
use chrono::{Duration, Utc};
use serde_json::json;
use std::sync::{Arc, Barrier};
use std::thread;

fn record(product: &str) -> License {
    let now = Utc::now();
    License {
        id: LicenseId::new(),
        key: LicenseKey::generate(),
        product: product.into(),
        user_id: "owner".into(),
        hwid: None,
        active: true,
        expires_at: now + Duration::days(10),
        created_at: now,
        last_used: None,
        max_activations: 1,
        current_activations: 0,
        metadata: json!({"seat": "A-1"}).as_object().unwrap().clone(),
    }
}

fn service_over(store: SqliteLicenseStore) -> LicenseService {
    LicenseService::new(Arc::new(store) as Arc<dyn LicenseStore>)
}

#[test]
fn insert_and_lookup_roundtrip() {
    let store = SqliteLicenseStore::open_in_memory().unwrap();
    let license = record("p1");
    store.insert_license(license.clone()).unwrap();

    assert_eq!(store.license(&license.id).unwrap(), Some(license.clone()));
    assert_eq!(store.license_by_key(&license.key).unwrap(), Some(license.clone()));
    assert_eq!(store.licenses().unwrap(), vec![license]);
    assert_eq!(store.license_count().unwrap(), 1);
}

#[test]
fn duplicate_key_is_a_conflict() {
    let store = SqliteLicenseStore::open_in_memory().unwrap();
    let first = record("p1");
    let mut second = record("p2");
    second.key = first.key.clone();

    store.insert_license(first).unwrap();
    assert!(matches!(store.insert_license(second), Err(LicenseError::Conflict(_))));
    assert_eq!(store.license_count().unwrap(), 1);
}

#[test]
fn list_keeps_insertion_order() {
    let store = SqliteLicenseStore::open_in_memory().unwrap();
    for n in 0..4 {
        store.insert_license(record(&format!("p{n}"))).unwrap();
    }
    let products: Vec<String> = store.licenses().unwrap().into_iter().map(|l| l.product).collect();
    assert_eq!(products, vec!["p0", "p1", "p2", "p3"]);
}

#[test]
fn modify_commits_or_rolls_back() {
    let store = SqliteLicenseStore::open_in_memory().unwrap();
    let license = record("p1");
    store.insert_license(license.clone()).unwrap();

    let unchanged = store
        .modify_license(&license.id, &mut |l: &mut License| {
            l.active = false;
            Ok(false)
        })
        .unwrap()
        .unwrap();
    assert!(unchanged.active);

    let changed = store
        .modify_license(&license.id, &mut |l: &mut License| {
            l.hwid = Some("A".into());
            l.current_activations = 1;
            l.last_used = Some(Utc::now());
            Ok(true)
        })
        .unwrap()
        .unwrap();
    assert_eq!(store.license(&license.id).unwrap(), Some(changed));

    let identity = store.modify_license(&license.id, &mut |l: &mut License| {
        l.key = LicenseKey::generate();
        Ok(true)
    });
    assert!(matches!(identity, Err(LicenseError::Validation(_))));

    let missing = store
        .modify_license(&LicenseId::new(), &mut |_: &mut License| Ok(true))
        .unwrap();
    assert!(missing.is_none());
}

#[test]
fn ceiling_is_enforced_by_the_schema_too() {
    let store = SqliteLicenseStore::open_in_memory().unwrap();
    let license = record("p1");
    store.insert_license(license.clone()).unwrap();

    let overshoot = store.modify_license(&license.id, &mut |l: &mut License| {
        l.current_activations = 2;
        Ok(true)
    });
    assert!(overshoot.is_err());
    assert_eq!(store.license(&license.id).unwrap().unwrap().current_activations, 0);
}

#[test]
fn remove_clears_both_lookups() {
    let store = SqliteLicenseStore::open_in_memory().unwrap();
    let license = record("p1");
    store.insert_license(license.clone()).unwrap();

    assert!(store.remove_license(&license.id).unwrap());
    assert!(store.license(&license.id).unwrap().is_none());
    assert!(store.license_by_key(&license.key).unwrap().is_none());
    assert!(!store.remove_license(&license.id).unwrap());
}

#[test]
fn users_roundtrip_and_stay_unique() {
    let store = SqliteLicenseStore::open_in_memory().unwrap();
    let user = bastion_license::User {
        id: UserId::new(),
        username: "alice".into(),
        email: Some("alice@example.com".into()),
        created_at: Utc::now(),
    };
    store.insert_user(user.clone()).unwrap();

    assert_eq!(store.user(&user.id).unwrap(), Some(user.clone()));
    assert_eq!(store.user_by_username("alice").unwrap(), Some(user.clone()));

    let twin = bastion_license::User {
        id: UserId::new(),
        ..user
    };
    assert!(matches!(store.insert_user(twin), Err(LicenseError::Conflict(_))));
}

#[test]
fn data_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("licenses.db");

    let (id, key) = {
        let service = service_over(SqliteLicenseStore::open(&path).unwrap());
        let license = service
            .create_license(&CreateLicense {
                product: "p1".into(),
                user_id: "u1".into(),
                expires_in_days: 30,
                max_activations: Some(1),
            })
            .unwrap();
        let bound = service
            .verify_license(&VerifyRequest::new(license.key.as_str()).with_hwid("A"))
            .unwrap();
        assert_eq!(bound.status(), Some(VerifyStatus::ValidBound));
        (license.id, license.key)
    };

    let service = service_over(SqliteLicenseStore::open(&path).unwrap());
    let stored = service.get_license(&id).unwrap();
    assert_eq!(stored.hwid.as_deref(), Some("A"));
    assert_eq!(stored.current_activations, 1);

    let other = service
        .verify_license(&VerifyRequest::new(key.as_str()).with_hwid("B"))
        .unwrap();
    assert_eq!(other.reason(), Some(RejectReason::HwidMismatch));
}

#[test]
fn update_through_service() {
    let service = service_over(SqliteLicenseStore::open_in_memory().unwrap());
    let license = service
        .create_license(&CreateLicense {
            product: "p1".into(),
            user_id: "u1".into(),
            expires_in_days: 30,
            max_activations: Some(2),
        })
        .unwrap();

    let updated = service
        .update_license(
            &license.id,
            &LicensePatch {
                active: Some(false),
                metadata: Some(json!({"note": "refund"}).as_object().unwrap().clone()),
                ..Default::default()
            },
        )
        .unwrap();
    assert!(!updated.active);
    assert_eq!(service.get_license(&license.id).unwrap(), updated);

    let result = service
        .verify_license(&VerifyRequest::new(license.key.as_str()))
        .unwrap();
    assert_eq!(result.reason(), Some(RejectReason::Disabled));
}

#[test]
fn concurrent_binding_race_binds_exactly_one_device() {
    let dir = tempfile::tempdir().unwrap();
    let service = service_over(SqliteLicenseStore::open(dir.path().join("race.db")).unwrap());
    let license = service
        .create_license(&CreateLicense {
            product: "p1".into(),
            user_id: "u1".into(),
            expires_in_days: 30,
            max_activations: Some(1),
        })
        .unwrap();

    let contenders = 10;
    let barrier = Arc::new(Barrier::new(contenders));
    let handles: Vec<_> = (0..contenders)
        .map(|n| {
            let service = service.clone();
            let barrier = Arc::clone(&barrier);
            let key = license.key.to_string();
            thread::spawn(move || {
                barrier.wait();
                service
                    .verify_license(&VerifyRequest::new(key).with_hwid(format!("device-{n}")))
                    .unwrap()
            })
        })
        .collect();

    let bound = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|r| r.is_valid())
        .count();
    assert_eq!(bound, 1);
    assert_eq!(service.get_license(&license.id).unwrap().current_activations, 1);
}
