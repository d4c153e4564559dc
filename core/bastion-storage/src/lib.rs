//! SQLite storage backend for Bastion.
//!
//! Provides a durable [`bastion_license::LicenseStore`] so the licensing
//! core can survive restarts. The in-memory store in `bastion-license`
//! remains the default for tests and throwaway servers.
//!
//! # Architecture
//!
//! - One `licenses` table carries both lookup paths (`id` and
//!   `license_key`, each `UNIQUE`), so a row is indexed under both or neither
//! - Record modifications run in an `IMMEDIATE` transaction, which takes the
//!   write lock before the read and closes the check-then-write window even
//!   across processes sharing the database file
//! - Timestamps are RFC 3339 text with nanosecond precision

mod error;
mod sqlite;

pub use error::{StorageError, StorageResult};
pub use sqlite::SqliteLicenseStore;
