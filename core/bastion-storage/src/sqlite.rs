//! `LicenseStore` backed by a SQLite file.

use crate::error::{StorageError, StorageResult};
use bastion_license::{
    License, LicenseError, LicenseKey, LicenseResult, LicenseStore, User, ensure_identity_unchanged,
};
use bastion_types::{LicenseId, UserId};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior, params};
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error};

const LICENSE_COLS: &str = "id, license_key, product, user_id, hwid, active, expires_at, \
                            created_at, last_used, max_activations, current_activations, metadata";

const USER_COLS: &str = "id, username, email, created_at";

/// Persistent license store backed by SQLite.
pub struct SqliteLicenseStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteLicenseStore {
    /// Opens (or creates) a store at the given path.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        let mode: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
        debug!(path = %path.display(), journal_mode = %mode, "opened license database");
        Self::from_connection(conn)
    }

    /// Opens an in-memory store (for testing).
    pub fn open_in_memory() -> StorageResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> StorageResult<Self> {
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> StorageResult<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS licenses (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                license_key TEXT NOT NULL UNIQUE,
                product TEXT NOT NULL,
                user_id TEXT NOT NULL,
                hwid TEXT,
                active INTEGER NOT NULL,
                expires_at TEXT NOT NULL,
                created_at TEXT NOT NULL,
                last_used TEXT,
                max_activations INTEGER NOT NULL CHECK (max_activations >= 1),
                current_activations INTEGER NOT NULL
                    CHECK (current_activations >= 0 AND current_activations <= max_activations),
                metadata TEXT NOT NULL DEFAULT '{}'
            );

            CREATE TABLE IF NOT EXISTS users (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                username TEXT NOT NULL UNIQUE,
                email TEXT,
                created_at TEXT NOT NULL
            );
            ",
        )?;
        Ok(())
    }

    fn lock(&self) -> StorageResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StorageError::Corrupt("connection mutex poisoned".into()))
    }

    fn query_license(
        conn: &Connection,
        filter: &str,
        value: &str,
    ) -> StorageResult<Option<License>> {
        let sql = format!("SELECT {LICENSE_COLS} FROM licenses WHERE {filter} = ?1");
        let row = conn
            .query_row(&sql, params![value], LicenseRow::from_row)
            .optional()?;
        row.map(LicenseRow::into_license).transpose()
    }

    fn query_user(conn: &Connection, filter: &str, value: &str) -> StorageResult<Option<User>> {
        let sql = format!("SELECT {USER_COLS} FROM users WHERE {filter} = ?1");
        let row = conn
            .query_row(&sql, params![value], UserRow::from_row)
            .optional()?;
        row.map(UserRow::into_user).transpose()
    }

    fn write_back(conn: &Connection, license: &License) -> StorageResult<()> {
        conn.execute(
            "UPDATE licenses SET product = ?2, user_id = ?3, hwid = ?4, active = ?5,
                 expires_at = ?6, last_used = ?7, max_activations = ?8,
                 current_activations = ?9, metadata = ?10
             WHERE id = ?1",
            params![
                license.id.to_string(),
                license.product,
                license.user_id,
                license.hwid,
                license.active,
                timestamp(&license.expires_at),
                license.last_used.as_ref().map(timestamp),
                license.max_activations,
                license.current_activations,
                serde_json::to_string(&license.metadata)?,
            ],
        )?;
        Ok(())
    }
}

/// Converts a write failure, turning constraint violations into conflicts.
fn conflict_or_storage(err: StorageError, what: impl FnOnce() -> String) -> LicenseError {
    if err.is_constraint_violation() {
        LicenseError::Conflict(what())
    } else {
        error!(error = %err, "license store write failed");
        err.into()
    }
}

impl LicenseStore for SqliteLicenseStore {
    fn insert_license(&self, license: License) -> LicenseResult<()> {
        let conn = self.lock()?;
        let result = conn
            .execute(
                &format!(
                    "INSERT INTO licenses ({LICENSE_COLS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
                ),
                params![
                    license.id.to_string(),
                    license.key.as_str(),
                    license.product,
                    license.user_id,
                    license.hwid,
                    license.active,
                    timestamp(&license.expires_at),
                    timestamp(&license.created_at),
                    license.last_used.as_ref().map(timestamp),
                    license.max_activations,
                    license.current_activations,
                    serde_json::to_string(&license.metadata)?,
                ],
            )
            .map_err(StorageError::from);

        match result {
            Ok(_) => Ok(()),
            Err(e) => Err(conflict_or_storage(e, || {
                format!("license {} or its key already exists", license.id)
            })),
        }
    }

    fn license(&self, id: &LicenseId) -> LicenseResult<Option<License>> {
        let conn = self.lock()?;
        Ok(Self::query_license(&conn, "id", &id.to_string())?)
    }

    fn license_by_key(&self, key: &LicenseKey) -> LicenseResult<Option<License>> {
        let conn = self.lock()?;
        Ok(Self::query_license(&conn, "license_key", key.as_str())?)
    }

    fn licenses(&self) -> LicenseResult<Vec<License>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!("SELECT {LICENSE_COLS} FROM licenses ORDER BY seq"))
            .map_err(StorageError::from)?;
        let rows = stmt
            .query_map([], LicenseRow::from_row)
            .map_err(StorageError::from)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(StorageError::from)?;
        Ok(rows
            .into_iter()
            .map(LicenseRow::into_license)
            .collect::<StorageResult<Vec<_>>>()?)
    }

    fn license_count(&self) -> LicenseResult<usize> {
        let conn = self.lock()?;
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM licenses", [], |row| row.get(0))
            .map_err(StorageError::from)?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    fn modify_license(
        &self,
        id: &LicenseId,
        apply: &mut dyn FnMut(&mut License) -> LicenseResult<bool>,
    ) -> LicenseResult<Option<License>> {
        let mut conn = self.lock()?;
        // IMMEDIATE takes the write lock up front, so no other writer can slip
        // in between the read below and the UPDATE.
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(StorageError::from)?;

        let Some(current) = Self::query_license(&tx, "id", &id.to_string())? else {
            return Ok(None);
        };

        let mut draft = current.clone();
        if !apply(&mut draft)? {
            return Ok(Some(current));
        }
        ensure_identity_unchanged(&current, &draft)?;

        if let Err(e) = Self::write_back(&tx, &draft) {
            return Err(conflict_or_storage(e, || {
                format!("license {id} violates a stored constraint")
            }));
        }
        tx.commit().map_err(StorageError::from)?;
        Ok(Some(draft))
    }

    fn remove_license(&self, id: &LicenseId) -> LicenseResult<bool> {
        let conn = self.lock()?;
        let removed = conn
            .execute("DELETE FROM licenses WHERE id = ?1", params![id.to_string()])
            .map_err(StorageError::from)?;
        Ok(removed > 0)
    }

    fn insert_user(&self, user: User) -> LicenseResult<()> {
        let conn = self.lock()?;
        let result = conn
            .execute(
                &format!("INSERT INTO users ({USER_COLS}) VALUES (?1, ?2, ?3, ?4)"),
                params![
                    user.id.to_string(),
                    user.username,
                    user.email,
                    timestamp(&user.created_at),
                ],
            )
            .map_err(StorageError::from);

        match result {
            Ok(_) => Ok(()),
            Err(e) => Err(conflict_or_storage(e, || {
                format!("username {:?} is taken", user.username)
            })),
        }
    }

    fn user(&self, id: &UserId) -> LicenseResult<Option<User>> {
        let conn = self.lock()?;
        Ok(Self::query_user(&conn, "id", &id.to_string())?)
    }

    fn user_by_username(&self, username: &str) -> LicenseResult<Option<User>> {
        let conn = self.lock()?;
        Ok(Self::query_user(&conn, "username", username)?)
    }
}

fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_timestamp(column: &str, text: &str) -> StorageResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StorageError::Corrupt(format!("{column}: {e}")))
}

/// A `licenses` row before its text columns are decoded.
struct LicenseRow {
    id: String,
    key: String,
    product: String,
    user_id: String,
    hwid: Option<String>,
    active: bool,
    expires_at: String,
    created_at: String,
    last_used: Option<String>,
    max_activations: u32,
    current_activations: u32,
    metadata: String,
}

impl LicenseRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            key: row.get(1)?,
            product: row.get(2)?,
            user_id: row.get(3)?,
            hwid: row.get(4)?,
            active: row.get(5)?,
            expires_at: row.get(6)?,
            created_at: row.get(7)?,
            last_used: row.get(8)?,
            max_activations: row.get(9)?,
            current_activations: row.get(10)?,
            metadata: row.get(11)?,
        })
    }

    fn into_license(self) -> StorageResult<License> {
        let metadata: Map<String, Value> = serde_json::from_str(&self.metadata)?;
        Ok(License {
            id: LicenseId::parse(&self.id).map_err(|e| StorageError::Corrupt(format!("id: {e}")))?,
            key: LicenseKey::parse(&self.key)
                .map_err(|e| StorageError::Corrupt(format!("license_key: {e}")))?,
            product: self.product,
            user_id: self.user_id,
            hwid: self.hwid,
            active: self.active,
            expires_at: parse_timestamp("expires_at", &self.expires_at)?,
            created_at: parse_timestamp("created_at", &self.created_at)?,
            last_used: self
                .last_used
                .as_deref()
                .map(|t| parse_timestamp("last_used", t))
                .transpose()?,
            max_activations: self.max_activations,
            current_activations: self.current_activations,
            metadata,
        })
    }
}

/// A `users` row before its text columns are decoded.
struct UserRow {
    id: String,
    username: String,
    email: Option<String>,
    created_at: String,
}

impl UserRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            username: row.get(1)?,
            email: row.get(2)?,
            created_at: row.get(3)?,
        })
    }

    fn into_user(self) -> StorageResult<User> {
        Ok(User {
            id: UserId::parse(&self.id).map_err(|e| StorageError::Corrupt(format!("id: {e}")))?,
            username: self.username,
            email: self.email,
            created_at: parse_timestamp("created_at", &self.created_at)?,
        })
    }
}
