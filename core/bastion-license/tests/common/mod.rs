//! Shared test helpers for license tests.

#![allow(dead_code)]

use bastion_license::{CreateLicense, License, LicenseService, LicenseStore, MemoryLicenseStore};
use bastion_types::ManualClock;
use chrono::{DateTime, TimeZone, Utc};
use std::sync::Arc;

/// A fixed starting instant so expiry arithmetic is deterministic.
pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
}

/// A service over a fresh in-memory store with a manual clock at [`epoch`].
pub fn service() -> (LicenseService, Arc<MemoryLicenseStore>, Arc<ManualClock>) {
    let store = Arc::new(MemoryLicenseStore::new());
    let clock = Arc::new(ManualClock::new(epoch()));
    let service = LicenseService::with_clock(
        Arc::clone(&store) as Arc<dyn LicenseStore>,
        Arc::clone(&clock) as Arc<dyn bastion_types::Clock>,
    );
    (service, store, clock)
}

/// Issues a license for `product` valid for 30 days.
pub fn issue(service: &LicenseService, product: &str, max_activations: u32) -> License {
    service
        .create_license(&CreateLicense {
            product: product.into(),
            user_id: "user-1".into(),
            expires_in_days: 30,
            max_activations: Some(max_activations),
        })
        .unwrap()
}
