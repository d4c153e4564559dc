//! License issuance, verification and activation binding for Bastion.
//!
//! This crate handles:
//! - License key generation and shape validation
//! - The license/user record store, behind an injectable [`LicenseStore`]
//! - The verification engine with first-use hardware binding
//! - Hardware fingerprinting for client software that needs an hwid
//!
//! # Design Principles
//!
//! - **Stateless verification**: every decision is recomputed from the store
//! - **Atomic binding**: the activation check and the write happen under the
//!   same per-record guard, so concurrent devices cannot overshoot the ceiling
//! - **Failures are values**: a rejected key is a [`VerificationResult`], not
//!   an error; errors are reserved for bad input and storage faults
//!
//! # License Key Format
//!
//! Keys are formatted as `XXXXX-XXXXX-XXXXX-XXXXX`, four groups of five
//! characters from a 32-symbol alphabet without look-alike glyphs.

mod device;
mod error;
mod key;
mod model;
mod registry;
mod service;
mod store;
mod verify;

pub use device::{DeviceFingerprint, DeviceInfo};
pub use error::{LicenseError, LicenseResult};
pub use key::{LicenseKey, GROUP_COUNT, GROUP_LEN, KEY_ALPHABET};
pub use model::{Activations, License, LicensePatch, NewLicense, User};
pub use registry::{LicenseRegistry, MAX_KEY_ATTEMPTS};
pub use service::{CreateLicense, LicenseService};
pub use store::{ensure_identity_unchanged, LicenseStore, MemoryLicenseStore};
pub use verify::{Grant, RejectReason, VerificationResult, VerifyRequest, VerifyStatus, Verifier};
