//! [`SqliteStore`] -- SQLite-backed storage implementation.

use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use rusqlite::Connection;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::error::{Result, StorageError};
use crate::migrations;

/// SQLite-backed implementation of the [`Storage`](crate::traits::Storage)
/// trait.
///
/// Wraps a [`rusqlite::Connection`] in a `Mutex`. All public methods acquire
/// the lock, execute SQL, and release it; the database's own transaction
/// facility serializes concurrent writers.
pub struct SqliteStore {
    /// The mutex-protected SQLite connection.
    pub(crate) conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Opens (or creates) a SQLite database at the given path.
    ///
    /// Enables WAL mode and foreign keys, then applies pending migrations.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!(?path, "opening SQLite database");

        let conn = Connection::open(path).map_err(|e| {
            StorageError::Connection(format!("failed to open {}: {e}", path.display()))
        })?;

        Self::from_connection(conn)
    }

    /// Opens an in-memory SQLite database (useful for tests).
    pub fn open_in_memory() -> Result<Self> {
        debug!("opening in-memory SQLite database");
        let conn = Connection::open_in_memory()
            .map_err(|e| StorageError::Connection(format!("failed to open in-memory db: {e}")))?;

        Self::from_connection(conn)
    }

    fn from_connection(mut conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .map_err(|e| StorageError::Connection(format!("failed to set pragmas: {e}")))?;

        migrations::migrate(&mut conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Acquires the connection lock. Helper used by all operation modules.
    pub(crate) fn lock_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| StorageError::Connection(format!("mutex poisoned: {e}")))
    }

    /// Returns the applied schema version.
    pub fn schema_version_impl(&self) -> Result<i64> {
        let conn = self.lock_conn()?;
        migrations::current_version(&conn)
    }
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Entity id minting
// ---------------------------------------------------------------------------

/// Process-wide counter folded into minted entity ids.
static ENTITY_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Mints a primary key for store-owned entities (git refs, attachments,
/// admin users): `<prefix>-<12 hex chars>`.
pub(crate) fn new_entity_id(prefix: &str, scope: &str) -> String {
    let counter = ENTITY_COUNTER.fetch_add(1, Ordering::Relaxed);
    let nanos = Utc::now().timestamp_nanos_opt().unwrap_or(0);
    let hash = Sha256::digest(format!("{prefix}|{scope}|{nanos}|{counter}").as_bytes());
    let mut hex = String::with_capacity(12);
    for byte in &hash[..6] {
        hex.push_str(&format!("{byte:02x}"));
    }
    format!("{prefix}-{hex}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_in_memory_migrates() {
        let store = SqliteStore::open_in_memory().unwrap();
        let version = store.schema_version_impl().unwrap();
        assert_eq!(version, migrations::available_version());
    }

    #[test]
    fn open_on_disk_reopens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grns.db");
        {
            let _store = SqliteStore::open(&path).unwrap();
        }
        // Reopening an already migrated file is a no-op.
        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(
            store.schema_version_impl().unwrap(),
            migrations::available_version()
        );
    }

    #[test]
    fn entity_ids_are_unique() {
        let a = new_entity_id("att", "gr-aaaa");
        let b = new_entity_id("att", "gr-aaaa");
        assert_ne!(a, b);
        assert!(a.starts_with("att-"));
        assert_eq!(a.len(), 4 + 12);
    }
}
