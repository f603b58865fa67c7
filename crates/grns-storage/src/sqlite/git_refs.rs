//! Git reference operations for [`SqliteStore`].

use rusqlite::{Connection, Row, params};

use grns_core::git_ref::GitRef;

use crate::error::{Result, StorageError};
use crate::sqlite::store::{SqliteStore, new_entity_id};
use crate::sqlite::tasks::task_exists_on_conn;

fn scan_git_ref(row: &Row<'_>) -> rusqlite::Result<GitRef> {
    Ok(GitRef {
        id: row.get("id")?,
        task_id: row.get("task_id")?,
        repo: row.get("repo")?,
        relation: row.get::<_, String>("relation")?.into(),
        object_type: row.get::<_, String>("object_type")?.into(),
        object_value: row.get("object_value")?,
        resolved_commit: row.get("resolved_commit")?,
        note: row.get("note")?,
    })
}

/// Inserts a git reference on the given connection, minting its id.
pub(crate) fn add_git_ref_on_conn(conn: &Connection, git_ref: &GitRef) -> Result<GitRef> {
    if !task_exists_on_conn(conn, &git_ref.task_id)? {
        return Err(StorageError::not_found("task", &git_ref.task_id));
    }

    let mut stored = git_ref.clone();
    if stored.id.is_empty() {
        stored.id = new_entity_id("ref", &stored.task_id);
    }

    conn.execute(
        "INSERT INTO git_refs (id, task_id, repo, relation, object_type, object_value, resolved_commit, note)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            stored.id,
            stored.task_id,
            stored.repo,
            stored.relation.as_str(),
            stored.object_type.as_str(),
            stored.object_value,
            stored.resolved_commit,
            stored.note,
        ],
    )?;

    Ok(stored)
}

pub(crate) fn get_git_refs_on_conn(conn: &Connection, task_id: &str) -> Result<Vec<GitRef>> {
    let mut stmt = conn.prepare(
        "SELECT id, task_id, repo, relation, object_type, object_value, resolved_commit, note
         FROM git_refs WHERE task_id = ?1 ORDER BY created_at, id",
    )?;
    let rows = stmt.query_map(params![task_id], scan_git_ref)?;
    let mut refs = Vec::new();
    for row in rows {
        refs.push(row?);
    }
    Ok(refs)
}

impl SqliteStore {
    pub fn add_git_ref_impl(&self, git_ref: &GitRef) -> Result<GitRef> {
        let conn = self.lock_conn()?;
        add_git_ref_on_conn(&conn, git_ref)
    }

    pub fn get_git_refs_impl(&self, task_id: &str) -> Result<Vec<GitRef>> {
        let conn = self.lock_conn()?;
        get_git_refs_on_conn(&conn, task_id)
    }

    pub fn delete_git_ref_impl(&self, id: &str) -> Result<()> {
        let conn = self.lock_conn()?;
        let affected = conn.execute("DELETE FROM git_refs WHERE id = ?1", params![id])?;
        if affected == 0 {
            return Err(StorageError::not_found("git ref", id));
        }
        Ok(())
    }
}
