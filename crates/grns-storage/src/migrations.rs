//! Versioned schema migrations.
//!
//! The schema is an ordered list of numbered, forward-only migrations. The
//! highest applied version is recorded in the `schema_version` table; the
//! version never decreases. Each migration runs inside its own transaction,
//! and a failure stops the run before later migrations are attempted.
//!
//! Timestamps are stored as TEXT in ISO 8601 format (SQLite has no native
//! datetime type). Booleans are stored as INTEGER (0/1). JSON blobs are TEXT.

use rusqlite::Connection;
use tracing::{debug, info};

use crate::error::{Result, StorageError};

/// One schema migration step.
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    pub version: i64,
    pub description: &'static str,
    pub sql: &'static str,
}

/// The result of planning a migration run.
#[derive(Debug, Clone)]
pub struct MigrationPlan {
    /// Highest applied version (0 on a fresh database).
    pub current: i64,
    /// Highest version this binary knows about.
    pub available: i64,
    /// Pending `(version, description)` pairs, in apply order.
    pub pending: Vec<(i64, &'static str)>,
}

/// All migrations, in apply order.
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "task tables: tasks, labels, dependencies",
        sql: r#"
        CREATE TABLE tasks (
            id                  TEXT PRIMARY KEY,
            title               TEXT NOT NULL,
            description         TEXT NOT NULL DEFAULT '',
            notes               TEXT NOT NULL DEFAULT '',
            design              TEXT NOT NULL DEFAULT '',
            acceptance_criteria TEXT NOT NULL DEFAULT '',
            status              TEXT NOT NULL DEFAULT 'open',
            task_type           TEXT NOT NULL DEFAULT 'task',
            priority            INTEGER NOT NULL DEFAULT 2,
            assignee            TEXT NOT NULL DEFAULT '',
            parent_id           TEXT,
            source_repo         TEXT NOT NULL DEFAULT '',
            spec_id             TEXT NOT NULL DEFAULT '',
            custom              TEXT NOT NULL DEFAULT '{}',
            created_at          TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
            updated_at          TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
            closed_at           TEXT
        );
        CREATE INDEX idx_tasks_status ON tasks(status);
        CREATE INDEX idx_tasks_priority ON tasks(priority);
        CREATE INDEX idx_tasks_task_type ON tasks(task_type);
        CREATE INDEX idx_tasks_assignee ON tasks(assignee);
        CREATE INDEX idx_tasks_parent_id ON tasks(parent_id);
        CREATE INDEX idx_tasks_spec_id ON tasks(spec_id);
        CREATE INDEX idx_tasks_created_at ON tasks(created_at);
        CREATE INDEX idx_tasks_updated_at ON tasks(updated_at);

        CREATE TABLE labels (
            task_id TEXT NOT NULL,
            label   TEXT NOT NULL,
            PRIMARY KEY (task_id, label),
            FOREIGN KEY (task_id) REFERENCES tasks(id) ON DELETE CASCADE
        );
        CREATE INDEX idx_labels_label ON labels(label);

        CREATE TABLE dependencies (
            child_id   TEXT NOT NULL,
            parent_id  TEXT NOT NULL,
            type       TEXT NOT NULL DEFAULT 'blocks',
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
            PRIMARY KEY (child_id, parent_id, type),
            FOREIGN KEY (child_id) REFERENCES tasks(id) ON DELETE CASCADE
        );
        CREATE INDEX idx_dependencies_child ON dependencies(child_id);
        CREATE INDEX idx_dependencies_parent ON dependencies(parent_id);
        CREATE INDEX idx_dependencies_parent_type ON dependencies(parent_id, type);
        "#,
    },
    Migration {
        version: 2,
        description: "git references",
        sql: r#"
        CREATE TABLE git_refs (
            id              TEXT PRIMARY KEY,
            task_id         TEXT NOT NULL,
            repo            TEXT NOT NULL,
            relation        TEXT NOT NULL DEFAULT 'references',
            object_type     TEXT NOT NULL DEFAULT 'commit',
            object_value    TEXT NOT NULL,
            resolved_commit TEXT,
            note            TEXT NOT NULL DEFAULT '',
            created_at      TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
            FOREIGN KEY (task_id) REFERENCES tasks(id) ON DELETE CASCADE
        );
        CREATE INDEX idx_git_refs_task ON git_refs(task_id);
        "#,
    },
    Migration {
        version: 3,
        description: "attachments and blob refcounts",
        sql: r#"
        CREATE TABLE blobs (
            id         TEXT PRIMARY KEY,
            size_bytes INTEGER NOT NULL,
            ref_count  INTEGER NOT NULL DEFAULT 0
        );
        CREATE INDEX idx_blobs_ref_count ON blobs(ref_count);

        CREATE TABLE attachments (
            id           TEXT PRIMARY KEY,
            task_id      TEXT NOT NULL,
            kind         TEXT NOT NULL DEFAULT '',
            source_type  TEXT NOT NULL DEFAULT 'managed',
            title        TEXT NOT NULL DEFAULT '',
            filename     TEXT NOT NULL DEFAULT '',
            media_type   TEXT NOT NULL DEFAULT '',
            labels       TEXT NOT NULL DEFAULT '[]',
            blob_id      TEXT,
            size_bytes   INTEGER,
            external_url TEXT,
            repo_path    TEXT,
            expires_at   TEXT,
            created_at   TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
            FOREIGN KEY (task_id) REFERENCES tasks(id) ON DELETE CASCADE
        );
        CREATE INDEX idx_attachments_task ON attachments(task_id);
        CREATE INDEX idx_attachments_blob ON attachments(blob_id);
        "#,
    },
    Migration {
        version: 4,
        description: "admin users",
        sql: r#"
        CREATE TABLE admin_users (
            id            TEXT PRIMARY KEY,
            username      TEXT NOT NULL UNIQUE,
            password_hash TEXT NOT NULL,
            role          TEXT NOT NULL DEFAULT 'admin',
            disabled      INTEGER NOT NULL DEFAULT 0,
            created_at    TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        );
        "#,
    },
];

/// Highest version this binary can migrate to.
pub fn available_version() -> i64 {
    MIGRATIONS.last().map_or(0, |m| m.version)
}

/// Reads the currently applied version; 0 if the database is fresh.
pub fn current_version(conn: &Connection) -> Result<i64> {
    let exists: bool = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'schema_version'",
            [],
            |row| row.get::<_, i64>(0),
        )
        .map(|n| n > 0)?;
    if !exists {
        return Ok(0);
    }
    let version: Option<i64> =
        conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| {
            row.get(0)
        })?;
    Ok(version.unwrap_or(0))
}

/// Computes the migration plan for a database file without opening a store.
///
/// Safe on a path that does not exist yet: the fresh file reports version 0
/// with everything pending.
pub fn plan_at_path(path: impl AsRef<std::path::Path>) -> Result<MigrationPlan> {
    let conn = Connection::open(path.as_ref())
        .map_err(|e| StorageError::Connection(format!("failed to open database: {e}")))?;
    plan(&conn)
}

/// Computes the migration plan without touching the schema.
pub fn plan(conn: &Connection) -> Result<MigrationPlan> {
    let current = current_version(conn)?;
    let available = available_version();
    let pending = MIGRATIONS
        .iter()
        .filter(|m| m.version > current)
        .map(|m| (m.version, m.description))
        .collect();
    Ok(MigrationPlan {
        current,
        available,
        pending,
    })
}

/// Applies all pending migrations, each in its own transaction.
///
/// Returns the resulting schema version. Running against a fully migrated
/// database is a no-op. A database whose recorded version is ahead of this
/// binary is rejected rather than downgraded.
pub fn migrate(conn: &mut Connection) -> Result<i64> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER NOT NULL
        )",
    )?;

    let current = current_version(conn)?;
    let available = available_version();
    if current > available {
        return Err(StorageError::Migration {
            version: current,
            reason: format!(
                "database schema version {current} is newer than this binary supports ({available})"
            ),
        });
    }

    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        debug!(
            version = migration.version,
            description = migration.description,
            "applying migration"
        );

        let tx = conn
            .transaction()
            .map_err(|e| StorageError::Transaction(format!("failed to begin: {e}")))?;

        tx.execute_batch(migration.sql)
            .map_err(|e| StorageError::Migration {
                version: migration.version,
                reason: e.to_string(),
            })?;

        tx.execute("DELETE FROM schema_version", [])
            .and_then(|_| {
                tx.execute(
                    "INSERT INTO schema_version (version) VALUES (?1)",
                    [migration.version],
                )
            })
            .map_err(|e| StorageError::Migration {
                version: migration.version,
                reason: format!("failed to record version: {e}"),
            })?;

        tx.commit()
            .map_err(|e| StorageError::Transaction(format!("failed to commit: {e}")))?;
    }

    let applied = current_version(conn)?;
    if applied > current {
        info!(from = current, to = applied, "schema migrated");
    }
    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_conn() -> Connection {
        Connection::open_in_memory().unwrap()
    }

    #[test]
    fn versions_are_strictly_increasing() {
        let mut last = 0;
        for m in MIGRATIONS {
            assert!(m.version > last, "migration {} out of order", m.version);
            last = m.version;
        }
    }

    #[test]
    fn plan_on_fresh_database() {
        let conn = fresh_conn();
        let plan = plan(&conn).unwrap();
        assert_eq!(plan.current, 0);
        assert_eq!(plan.available, available_version());
        assert_eq!(plan.pending.len(), MIGRATIONS.len());
    }

    #[test]
    fn migrate_applies_all() {
        let mut conn = fresh_conn();
        let version = migrate(&mut conn).unwrap();
        assert_eq!(version, available_version());

        // All tables present.
        for table in ["tasks", "labels", "dependencies", "git_refs", "attachments", "blobs", "admin_users"] {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                    [table],
                    |row| row.get(0),
                )
                .unwrap();
            assert_eq!(count, 1, "missing table {table}");
        }
    }

    #[test]
    fn migrate_is_idempotent() {
        let mut conn = fresh_conn();
        migrate(&mut conn).unwrap();
        let version = migrate(&mut conn).unwrap();
        assert_eq!(version, available_version());
        let plan = plan(&conn).unwrap();
        assert!(plan.pending.is_empty());
    }

    #[test]
    fn migrate_rejects_newer_database() {
        let mut conn = fresh_conn();
        migrate(&mut conn).unwrap();
        conn.execute("UPDATE schema_version SET version = 999", [])
            .unwrap();
        let err = migrate(&mut conn).unwrap_err();
        assert!(matches!(err, StorageError::Migration { .. }));
    }
}
