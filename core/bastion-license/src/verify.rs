//! The verification engine.
//!
//! Given a presented key, an optional hardware id and an optional product,
//! [`Verifier::verify`] walks a fixed sequence of checks; the first one that
//! fails decides the outcome:
//!
//! 1. unknown (or malformed) key: `INVALID_KEY`
//! 2. product supplied and different: `PRODUCT_MISMATCH`
//! 3. license disabled: `DISABLED`
//! 4. expiry at or before now: `EXPIRED`
//! 5. no hwid bound yet: succeed unbound when the caller sent none, otherwise
//!    bind it (`ACTIVATION_LIMIT_REACHED` when the ceiling is used up)
//! 6. hwid bound: succeed when the caller sent none or the same one,
//!    otherwise `HWID_MISMATCH`
//!
//! Steps 2-6 run inside [`LicenseStore::modify_license`], so the activation
//! check and the bind are one atomic step per license. Rejections never
//! write.

use crate::device::DeviceFingerprint;
use crate::error::LicenseResult;
use crate::key::LicenseKey;
use crate::model::{Activations, License};
use crate::store::LicenseStore;
use bastion_types::{Clock, SystemClock};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// A verification attempt as presented by client software.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyRequest {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hwid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product: Option<String>,
}

impl VerifyRequest {
    /// A request carrying only a key.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            hwid: None,
            product: None,
        }
    }

    /// Presents a hardware id.
    #[must_use]
    pub fn with_hwid(mut self, hwid: impl Into<String>) -> Self {
        self.hwid = Some(hwid.into());
        self
    }

    /// A request presenting the current machine's fingerprint as hwid.
    pub fn for_this_device(key: impl Into<String>) -> Self {
        Self::new(key).with_device(&DeviceFingerprint::generate())
    }

    /// Presents a device fingerprint as the hardware id.
    #[must_use]
    pub fn with_device(self, fingerprint: &DeviceFingerprint) -> Self {
        self.with_hwid(fingerprint.as_str())
    }

    /// Restricts the check to a product.
    #[must_use]
    pub fn with_product(mut self, product: impl Into<String>) -> Self {
        self.product = Some(product.into());
        self
    }

    // Empty strings count as "not supplied".
    fn hwid(&self) -> Option<&str> {
        self.hwid.as_deref().filter(|h| !h.is_empty())
    }

    fn product(&self) -> Option<&str> {
        self.product.as_deref().filter(|p| !p.is_empty())
    }
}

/// Why a key was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectReason {
    InvalidKey,
    ProductMismatch,
    Disabled,
    Expired,
    ActivationLimitReached,
    HwidMismatch,
}

impl RejectReason {
    /// The wire code, e.g. `"HWID_MISMATCH"`.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidKey => "INVALID_KEY",
            Self::ProductMismatch => "PRODUCT_MISMATCH",
            Self::Disabled => "DISABLED",
            Self::Expired => "EXPIRED",
            Self::ActivationLimitReached => "ACTIVATION_LIMIT_REACHED",
            Self::HwidMismatch => "HWID_MISMATCH",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Whether an accepted license is locked to a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerifyStatus {
    /// Key is valid; no device has been bound yet.
    ValidUnbound,
    /// Key is valid and locked to a device.
    ValidBound,
}

impl VerifyStatus {
    /// The wire code, e.g. `"VALID_BOUND"`.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::ValidUnbound => "VALID_UNBOUND",
            Self::ValidBound => "VALID_BOUND",
        }
    }
}

/// What an accepted license entitles the caller to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Grant {
    pub product: String,
    pub expires_at: DateTime<Utc>,
    pub activations: Activations,
}

impl Grant {
    fn from_license(license: &License) -> Self {
        Self {
            product: license.product.clone(),
            expires_at: license.expires_at,
            activations: license.activations(),
        }
    }
}

/// Outcome of a verification. Rejections are ordinary values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationResult {
    Valid { status: VerifyStatus, grant: Grant },
    Rejected(RejectReason),
}

impl VerificationResult {
    /// Returns true for either `VALID_*` status.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid { .. })
    }

    /// The rejection reason, if any.
    #[must_use]
    pub fn reason(&self) -> Option<RejectReason> {
        match self {
            Self::Rejected(reason) => Some(*reason),
            Self::Valid { .. } => None,
        }
    }

    /// The success status, if any.
    #[must_use]
    pub fn status(&self) -> Option<VerifyStatus> {
        match self {
            Self::Valid { status, .. } => Some(*status),
            Self::Rejected(_) => None,
        }
    }

    /// The grant, if the key was accepted.
    #[must_use]
    pub fn grant(&self) -> Option<&Grant> {
        match self {
            Self::Valid { grant, .. } => Some(grant),
            Self::Rejected(_) => None,
        }
    }

    /// The outcome code, valid or not.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Valid { status, .. } => status.code(),
            Self::Rejected(reason) => reason.code(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Decision {
    Reject(RejectReason),
    Unbound,
    Bind,
    Refresh,
}

fn decide(license: &License, hwid: Option<&str>, product: Option<&str>, now: DateTime<Utc>) -> Decision {
    if product.is_some_and(|p| p != license.product) {
        return Decision::Reject(RejectReason::ProductMismatch);
    }
    if !license.active {
        return Decision::Reject(RejectReason::Disabled);
    }
    if license.is_expired_at(now) {
        return Decision::Reject(RejectReason::Expired);
    }

    match (license.hwid.as_deref(), hwid) {
        (None, None) => Decision::Unbound,
        (None, Some(_)) if license.activation_limit_reached() => {
            Decision::Reject(RejectReason::ActivationLimitReached)
        }
        (None, Some(_)) => Decision::Bind,
        (Some(_), None) => Decision::Refresh,
        (Some(bound), Some(presented)) if bound == presented => Decision::Refresh,
        (Some(_), Some(_)) => Decision::Reject(RejectReason::HwidMismatch),
    }
}

/// Decides validity of presented keys and performs first-use binding.
///
/// Holds no state of its own beyond handles to the store and clock.
#[derive(Clone)]
pub struct Verifier {
    store: Arc<dyn LicenseStore>,
    clock: Arc<dyn Clock>,
}

impl Verifier {
    /// Creates a verifier reading time from the system clock.
    pub fn new(store: Arc<dyn LicenseStore>) -> Self {
        Self::with_clock(store, Arc::new(SystemClock))
    }

    /// Creates a verifier with an explicit clock.
    pub fn with_clock(store: Arc<dyn LicenseStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Verifies a key, binding the presented hwid on first use.
    ///
    /// # Errors
    ///
    /// Only storage faults are errors; every refusal is a
    /// [`VerificationResult::Rejected`].
    pub fn verify(&self, request: &VerifyRequest) -> LicenseResult<VerificationResult> {
        let Ok(key) = LicenseKey::parse(&request.key) else {
            debug!("rejected malformed license key");
            return Ok(VerificationResult::Rejected(RejectReason::InvalidKey));
        };
        let Some(found) = self.store.license_by_key(&key)? else {
            debug!(key = %key.redacted(), "rejected unknown license key");
            return Ok(VerificationResult::Rejected(RejectReason::InvalidKey));
        };

        let now = self.clock.now();
        let hwid = request.hwid();
        let product = request.product();
        let mut decision = None;

        let stored = self.store.modify_license(&found.id, &mut |license: &mut License| {
            let verdict = decide(license, hwid, product, now);
            decision = Some(verdict);
            match verdict {
                Decision::Bind => {
                    license.hwid = hwid.map(String::from);
                    license.current_activations += 1;
                    license.last_used = Some(now);
                    Ok(true)
                }
                Decision::Refresh => {
                    license.last_used = Some(now);
                    Ok(true)
                }
                Decision::Unbound | Decision::Reject(_) => Ok(false),
            }
        })?;

        // Deleted between the key lookup and the modification.
        let (Some(license), Some(decision)) = (stored, decision) else {
            return Ok(VerificationResult::Rejected(RejectReason::InvalidKey));
        };

        let result = match decision {
            Decision::Reject(reason) => {
                match reason {
                    RejectReason::ActivationLimitReached | RejectReason::HwidMismatch => {
                        warn!(license = %license.id, %reason, "verification refused");
                    }
                    _ => debug!(license = %license.id, %reason, "verification refused"),
                }
                VerificationResult::Rejected(reason)
            }
            Decision::Unbound => VerificationResult::Valid {
                status: VerifyStatus::ValidUnbound,
                grant: Grant::from_license(&license),
            },
            Decision::Bind | Decision::Refresh => {
                if decision == Decision::Bind {
                    debug!(
                        license = %license.id,
                        current = license.current_activations,
                        remaining = license.activations().remaining(),
                        "bound license to device"
                    );
                }
                VerificationResult::Valid {
                    status: VerifyStatus::ValidBound,
                    grant: Grant::from_license(&license),
                }
            }
        };
        Ok(result)
    }
}
