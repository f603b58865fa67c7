//! Label operations for [`SqliteStore`].
//!
//! Label membership is a set: adding an existing label and removing a missing
//! one are no-ops. Any change to the set bumps the owning task's `updated_at`.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};

use crate::error::{Result, StorageError};
use crate::sqlite::store::SqliteStore;
use crate::sqlite::tasks::{format_datetime, task_exists_on_conn};

// ---------------------------------------------------------------------------
// Connection-level helpers (shared with Transaction)
// ---------------------------------------------------------------------------

pub(crate) fn add_labels_on_conn(
    conn: &Connection,
    task_id: &str,
    labels: &[String],
    now: DateTime<Utc>,
) -> Result<usize> {
    if !task_exists_on_conn(conn, task_id)? {
        return Err(StorageError::not_found("task", task_id));
    }

    let mut added = 0;
    for label in labels {
        added += conn.execute(
            "INSERT OR IGNORE INTO labels (task_id, label) VALUES (?1, ?2)",
            params![task_id, label],
        )?;
    }

    if added > 0 {
        bump_updated_at(conn, task_id, now)?;
    }
    Ok(added)
}

pub(crate) fn remove_labels_on_conn(
    conn: &Connection,
    task_id: &str,
    labels: &[String],
    now: DateTime<Utc>,
) -> Result<usize> {
    if !task_exists_on_conn(conn, task_id)? {
        return Err(StorageError::not_found("task", task_id));
    }

    let mut removed = 0;
    for label in labels {
        removed += conn.execute(
            "DELETE FROM labels WHERE task_id = ?1 AND label = ?2",
            params![task_id, label],
        )?;
    }

    if removed > 0 {
        bump_updated_at(conn, task_id, now)?;
    }
    Ok(removed)
}

/// Replaces a task's label set wholesale (import overwrite).
pub(crate) fn replace_labels_on_conn(
    conn: &Connection,
    task_id: &str,
    labels: &[String],
    now: DateTime<Utc>,
) -> Result<()> {
    conn.execute("DELETE FROM labels WHERE task_id = ?1", params![task_id])?;
    for label in labels {
        conn.execute(
            "INSERT OR IGNORE INTO labels (task_id, label) VALUES (?1, ?2)",
            params![task_id, label],
        )?;
    }
    bump_updated_at(conn, task_id, now)?;
    Ok(())
}

pub(crate) fn get_labels_on_conn(conn: &Connection, task_id: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT label FROM labels WHERE task_id = ?1 ORDER BY label")?;
    let rows = stmt.query_map(params![task_id], |row| row.get::<_, String>(0))?;
    let mut labels = Vec::new();
    for row in rows {
        labels.push(row?);
    }
    Ok(labels)
}

/// Bumps a task's `updated_at` after a membership change.
pub(crate) fn bump_updated_at(
    conn: &Connection,
    task_id: &str,
    now: DateTime<Utc>,
) -> Result<()> {
    conn.execute(
        "UPDATE tasks SET updated_at = ?1 WHERE id = ?2",
        params![format_datetime(&now), task_id],
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// SqliteStore methods
// ---------------------------------------------------------------------------

impl SqliteStore {
    pub fn add_labels_impl(
        &self,
        task_id: &str,
        labels: &[String],
        now: DateTime<Utc>,
    ) -> Result<usize> {
        let conn = self.lock_conn()?;
        add_labels_on_conn(&conn, task_id, labels, now)
    }

    pub fn remove_labels_impl(
        &self,
        task_id: &str,
        labels: &[String],
        now: DateTime<Utc>,
    ) -> Result<usize> {
        let conn = self.lock_conn()?;
        remove_labels_on_conn(&conn, task_id, labels, now)
    }

    pub fn get_labels_impl(&self, task_id: &str) -> Result<Vec<String>> {
        let conn = self.lock_conn()?;
        get_labels_on_conn(&conn, task_id)
    }

    pub fn list_all_labels_impl(&self) -> Result<Vec<String>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare("SELECT DISTINCT label FROM labels ORDER BY label")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut labels = Vec::new();
        for row in rows {
            labels.push(row?);
        }
        Ok(labels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grns_core::task::TaskBuilder;

    fn test_store() -> SqliteStore {
        SqliteStore::open_in_memory().unwrap()
    }

    fn seed(store: &SqliteStore, id: &str) {
        let task = TaskBuilder::new("Labeled task").id(id).build();
        store.create_task_impl(&task).unwrap();
    }

    #[test]
    fn add_and_get_labels() {
        let store = test_store();
        seed(&store, "gr-lbl2");

        let added = store
            .add_labels_impl("gr-lbl2", &["bug".into(), "critical".into()], Utc::now())
            .unwrap();
        assert_eq!(added, 2);

        let labels = store.get_labels_impl("gr-lbl2").unwrap();
        assert_eq!(labels, vec!["bug", "critical"]);
    }

    #[test]
    fn add_existing_label_is_noop() {
        let store = test_store();
        seed(&store, "gr-lbl3");
        store
            .add_labels_impl("gr-lbl3", &["p0".into()], Utc::now())
            .unwrap();
        let t1 = store.get_task_impl("gr-lbl3").unwrap().updated_at;

        let added = store
            .add_labels_impl("gr-lbl3", &["p0".into()], Utc::now())
            .unwrap();
        assert_eq!(added, 0);
        // No membership change, no bump.
        let t2 = store.get_task_impl("gr-lbl3").unwrap().updated_at;
        assert_eq!(t1, t2);
    }

    #[test]
    fn label_change_bumps_updated_at() {
        let store = test_store();
        seed(&store, "gr-lbl4");
        let before = store.get_task_impl("gr-lbl4").unwrap().updated_at;

        let later = before + chrono::Duration::seconds(5);
        store
            .add_labels_impl("gr-lbl4", &["tech-debt".into()], later)
            .unwrap();
        let after = store.get_task_impl("gr-lbl4").unwrap().updated_at;
        assert!(after > before);

        let even_later = later + chrono::Duration::seconds(5);
        store
            .remove_labels_impl("gr-lbl4", &["tech-debt".into()], even_later)
            .unwrap();
        let after_remove = store.get_task_impl("gr-lbl4").unwrap().updated_at;
        assert!(after_remove > after);
    }

    #[test]
    fn remove_missing_label_is_noop() {
        let store = test_store();
        seed(&store, "gr-lbl5");
        let removed = store
            .remove_labels_impl("gr-lbl5", &["ghost".into()], Utc::now())
            .unwrap();
        assert_eq!(removed, 0);
    }

    #[test]
    fn labels_on_unknown_task_fail() {
        let store = test_store();
        let err = store
            .add_labels_impl("gr-none", &["x".into()], Utc::now())
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn list_all_labels_union() {
        let store = test_store();
        seed(&store, "gr-lbl6");
        seed(&store, "gr-lbl7");
        store
            .add_labels_impl("gr-lbl6", &["backend".into(), "p0".into()], Utc::now())
            .unwrap();
        store
            .add_labels_impl("gr-lbl7", &["p0".into(), "ui".into()], Utc::now())
            .unwrap();

        let all = store.list_all_labels_impl().unwrap();
        assert_eq!(all, vec!["backend", "p0", "ui"]);
    }
}
