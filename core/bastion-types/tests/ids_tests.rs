use bastion_types::{LicenseId, UserId};
use proptest::prelude::*;
use std::collections::HashSet;
use std::str::FromStr;

// ── LicenseId ─────────────────────────────────────────────────────

#[test]
fn license_id_new_is_unique() {
    let ids: HashSet<LicenseId> = (0..1000).map(|_| LicenseId::new()).collect();
    assert_eq!(ids.len(), 1000);
}

#[test]
fn license_id_display_and_parse() {
    let id = LicenseId::new();
    let parsed = LicenseId::parse(&id.to_string()).unwrap();
    assert_eq!(id, parsed);
}

#[test]
fn license_id_parse_trims_whitespace() {
    let id = LicenseId::new();
    let parsed = LicenseId::parse(&format!("  {id}\n")).unwrap();
    assert_eq!(id, parsed);
}

#[test]
fn license_id_parse_invalid() {
    assert!(LicenseId::parse("not-a-uuid").is_err());
    assert!(LicenseId::from_str("").is_err());
}

#[test]
fn license_ids_sort_by_creation() {
    let first = LicenseId::new();
    std::thread::sleep(std::time::Duration::from_millis(2));
    let second = LicenseId::new();
    assert!(first < second);
}

#[test]
fn license_id_serializes_as_plain_string() {
    let id = LicenseId::new();
    let json = serde_json::to_string(&id).unwrap();
    assert_eq!(json, format!("\"{id}\""));
}

// ── UserId ────────────────────────────────────────────────────────

#[test]
fn user_id_from_uuid_roundtrip() {
    let uuid = uuid::Uuid::now_v7();
    assert_eq!(UserId::from_uuid(uuid).as_uuid(), uuid);
}

#[test]
fn user_id_default_is_unique() {
    assert_ne!(UserId::default(), UserId::default());
}

proptest! {
    #[test]
    fn any_uuid_survives_text_form(bits in any::<u128>()) {
        let id = UserId::from_uuid(uuid::Uuid::from_u128(bits));
        let parsed: UserId = id.to_string().parse().unwrap();
        prop_assert_eq!(parsed, id);
    }
}
