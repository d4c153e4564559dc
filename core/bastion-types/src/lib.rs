//! Core type definitions for Bastion.
//!
//! This crate defines the small, storage-agnostic types shared by the
//! licensing core, the storage backends and the HTTP server:
//! - License and user identifiers (UUID v7)
//! - A clock abstraction so expiry decisions can be driven in tests

mod clock;
mod ids;

pub use clock::{Clock, ManualClock, SystemClock};
pub use ids::{LicenseId, UserId};
