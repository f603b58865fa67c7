//! Attachment operations and blob refcounting for [`SqliteStore`].
//!
//! Managed attachments keep the blob refcount row in sync inside the same
//! transaction as the attachment row, so a crash can never leave the count
//! out of step with the live attachment set.

use chrono::Utc;
use rusqlite::{Connection, Row, params};

use grns_core::attachment::Attachment;
use grns_core::enums::AttachmentSource;

use crate::error::{Result, StorageError};
use crate::sqlite::labels::bump_updated_at;
use crate::sqlite::store::{SqliteStore, new_entity_id};
use crate::sqlite::tasks::{format_datetime, parse_datetime, task_exists_on_conn};
use crate::traits::BlobRow;

fn scan_attachment(row: &Row<'_>) -> rusqlite::Result<Attachment> {
    let labels_str: String = row.get("labels")?;
    let labels: Vec<String> = serde_json::from_str(&labels_str).unwrap_or_default();
    let expires_at_str: Option<String> = row.get("expires_at")?;
    let created_at_str: String = row.get("created_at")?;

    Ok(Attachment {
        id: row.get("id")?,
        task_id: row.get("task_id")?,
        kind: row.get("kind")?,
        source_type: row.get::<_, String>("source_type")?.into(),
        title: row.get("title")?,
        filename: row.get("filename")?,
        media_type: row.get("media_type")?,
        labels,
        blob_id: row.get("blob_id")?,
        size_bytes: row.get("size_bytes")?,
        external_url: row.get("external_url")?,
        repo_path: row.get("repo_path")?,
        expires_at: expires_at_str.as_deref().map(parse_datetime),
        created_at: parse_datetime(&created_at_str),
    })
}

const ATTACHMENT_COLUMNS: &str = r#"
    id, task_id, kind, source_type, title, filename, media_type, labels,
    blob_id, size_bytes, external_url, repo_path, expires_at, created_at
"#;

// ---------------------------------------------------------------------------
// Connection-level helpers
// ---------------------------------------------------------------------------

/// Inserts an attachment on the given connection, minting its id.
///
/// Managed attachments upsert the blob refcount row (+1). The owning task's
/// `updated_at` is bumped.
pub(crate) fn insert_attachment_on_conn(
    conn: &Connection,
    attachment: &Attachment,
) -> Result<Attachment> {
    if !task_exists_on_conn(conn, &attachment.task_id)? {
        return Err(StorageError::not_found("task", &attachment.task_id));
    }

    if attachment.source_type == AttachmentSource::Managed && attachment.blob_id.is_none() {
        return Err(StorageError::validation(
            "managed attachment requires a blob_id",
        ));
    }

    let mut stored = attachment.clone();
    if stored.id.is_empty() {
        stored.id = new_entity_id("att", &stored.task_id);
    }

    let labels_str = serde_json::to_string(&stored.labels)?;

    conn.execute(
        &format!(
            "INSERT INTO attachments ({ATTACHMENT_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)"
        ),
        params![
            stored.id,
            stored.task_id,
            stored.kind,
            stored.source_type.as_str(),
            stored.title,
            stored.filename,
            stored.media_type,
            labels_str,
            stored.blob_id,
            stored.size_bytes,
            stored.external_url,
            stored.repo_path,
            stored.expires_at.as_ref().map(format_datetime),
            format_datetime(&stored.created_at),
        ],
    )?;

    if let Some(ref blob_id) = stored.blob_id {
        let size = stored.size_bytes.unwrap_or(0);
        conn.execute(
            "INSERT INTO blobs (id, size_bytes, ref_count) VALUES (?1, ?2, 1)
             ON CONFLICT(id) DO UPDATE SET ref_count = ref_count + 1",
            params![blob_id, size],
        )?;
    }

    bump_updated_at(conn, &stored.task_id, Utc::now())?;

    Ok(stored)
}

pub(crate) fn get_attachment_on_conn(conn: &Connection, id: &str) -> Result<Attachment> {
    let sql = format!("SELECT {ATTACHMENT_COLUMNS} FROM attachments WHERE id = ?1");
    conn.query_row(&sql, params![id], scan_attachment)
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => StorageError::not_found("attachment", id),
            other => StorageError::Query(other),
        })
}

pub(crate) fn list_attachments_on_conn(conn: &Connection, task_id: &str) -> Result<Vec<Attachment>> {
    let sql = format!(
        "SELECT {ATTACHMENT_COLUMNS} FROM attachments
         WHERE task_id = ?1 ORDER BY created_at DESC, id"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![task_id], scan_attachment)?;
    let mut attachments = Vec::new();
    for row in rows {
        attachments.push(row?);
    }
    Ok(attachments)
}

// ---------------------------------------------------------------------------
// SqliteStore methods
// ---------------------------------------------------------------------------

impl SqliteStore {
    pub fn insert_attachment_impl(&self, attachment: &Attachment) -> Result<Attachment> {
        let conn = self.lock_conn()?;
        insert_attachment_on_conn(&conn, attachment)
    }

    pub fn get_attachment_impl(&self, id: &str) -> Result<Attachment> {
        let conn = self.lock_conn()?;
        get_attachment_on_conn(&conn, id)
    }

    pub fn list_attachments_impl(&self, task_id: &str) -> Result<Vec<Attachment>> {
        let conn = self.lock_conn()?;
        list_attachments_on_conn(&conn, task_id)
    }

    /// Deletes an attachment row and decrements its blob refcount in one
    /// transaction. The freed blob (if the count reaches zero) is picked up
    /// by the next GC scan.
    pub fn delete_attachment_impl(&self, id: &str) -> Result<Attachment> {
        let conn = self.lock_conn()?;
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| StorageError::Transaction(format!("failed to begin: {e}")))?;

        let attachment = get_attachment_on_conn(&tx, id)?;
        tx.execute("DELETE FROM attachments WHERE id = ?1", params![id])?;
        if let Some(ref blob_id) = attachment.blob_id {
            tx.execute(
                "UPDATE blobs SET ref_count = ref_count - 1 WHERE id = ?1",
                params![blob_id],
            )?;
        }
        bump_updated_at(&tx, &attachment.task_id, Utc::now())?;

        tx.commit()
            .map_err(|e| StorageError::Transaction(format!("failed to commit: {e}")))?;
        Ok(attachment)
    }

    pub fn get_blob_row_impl(&self, blob_id: &str) -> Result<Option<BlobRow>> {
        let conn = self.lock_conn()?;
        let result = conn.query_row(
            "SELECT id, size_bytes, ref_count FROM blobs WHERE id = ?1",
            params![blob_id],
            |row| {
                Ok(BlobRow {
                    id: row.get(0)?,
                    size_bytes: row.get(1)?,
                    ref_count: row.get(2)?,
                })
            },
        );
        match result {
            Ok(row) => Ok(Some(row)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StorageError::Query(e)),
        }
    }

    pub fn zero_ref_blobs_impl(&self, limit: i64) -> Result<Vec<BlobRow>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, size_bytes, ref_count FROM blobs
             WHERE ref_count <= 0 ORDER BY id LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit], |row| {
            Ok(BlobRow {
                id: row.get(0)?,
                size_bytes: row.get(1)?,
                ref_count: row.get(2)?,
            })
        })?;
        let mut blobs = Vec::new();
        for row in rows {
            blobs.push(row?);
        }
        Ok(blobs)
    }

    pub fn delete_blob_row_impl(&self, blob_id: &str) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute("DELETE FROM blobs WHERE id = ?1", params![blob_id])?;
        Ok(())
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
        let task = TaskBuilder::new(format!("Task {id}")).id(id).build();
        store.create_task_impl(&task).unwrap();
    }

    fn managed(task_id: &str, blob_id: &str, size: i64) -> Attachment {
        Attachment {
            task_id: task_id.into(),
            filename: "file.bin".into(),
            media_type: "application/octet-stream".into(),
            blob_id: Some(blob_id.into()),
            size_bytes: Some(size),
            ..Attachment::default()
        }
    }

    #[test]
    fn insert_managed_increments_refcount() {
        let store = test_store();
        seed(&store, "gr-at2a");
        let blob_id = "ab".repeat(32);

        let stored = store
            .insert_attachment_impl(&managed("gr-at2a", &blob_id, 42))
            .unwrap();
        assert!(stored.id.starts_with("att-"));

        let row = store.get_blob_row_impl(&blob_id).unwrap().unwrap();
        assert_eq!(row.ref_count, 1);
        assert_eq!(row.size_bytes, 42);
    }

    #[test]
    fn shared_blob_refcount_reaches_two() {
        let store = test_store();
        seed(&store, "gr-at2b");
        seed(&store, "gr-at2c");
        let blob_id = "cd".repeat(32);

        store
            .insert_attachment_impl(&managed("gr-at2b", &blob_id, 1))
            .unwrap();
        store
            .insert_attachment_impl(&managed("gr-at2c", &blob_id, 1))
            .unwrap();

        let row = store.get_blob_row_impl(&blob_id).unwrap().unwrap();
        assert_eq!(row.ref_count, 2);
    }

    #[test]
    fn delete_decrements_and_queues_for_gc() {
        let store = test_store();
        seed(&store, "gr-at2d");
        let blob_id = "ef".repeat(32);

        let stored = store
            .insert_attachment_impl(&managed("gr-at2d", &blob_id, 7))
            .unwrap();
        store.delete_attachment_impl(&stored.id).unwrap();

        let row = store.get_blob_row_impl(&blob_id).unwrap().unwrap();
        assert_eq!(row.ref_count, 0);

        let zero = store.zero_ref_blobs_impl(10).unwrap();
        assert_eq!(zero.len(), 1);
        assert_eq!(zero[0].id, blob_id);
    }

    #[test]
    fn managed_without_blob_rejected() {
        let store = test_store();
        seed(&store, "gr-at2e");
        let mut att = managed("gr-at2e", "xx", 0);
        att.blob_id = None;
        let err = store.insert_attachment_impl(&att).unwrap_err();
        assert!(matches!(err, StorageError::Validation { .. }));
    }

    #[test]
    fn link_attachment_no_blob_row() {
        let store = test_store();
        seed(&store, "gr-at2f");
        let att = Attachment {
            task_id: "gr-at2f".into(),
            source_type: AttachmentSource::ExternalUrl,
            external_url: Some("https://example.com".into()),
            ..Attachment::default()
        };
        let stored = store.insert_attachment_impl(&att).unwrap();
        assert!(stored.blob_id.is_none());
        assert_eq!(store.zero_ref_blobs_impl(10).unwrap().len(), 0);
    }

    #[test]
    fn task_delete_decrements_refcount() {
        let store = test_store();
        seed(&store, "gr-at2g");
        let blob_id = "aa".repeat(32);
        store
            .insert_attachment_impl(&managed("gr-at2g", &blob_id, 3))
            .unwrap();

        store.delete_task_impl("gr-at2g").unwrap();

        let row = store.get_blob_row_impl(&blob_id).unwrap().unwrap();
        assert_eq!(row.ref_count, 0);
        // Attachment rows cascade with the task.
        assert!(store.list_attachments_impl("gr-at2g").unwrap().is_empty());
    }
}
