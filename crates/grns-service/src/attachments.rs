//! Attachment upload, linking, and content retrieval.
//!
//! Managed uploads stream through the blob store (hashing on the fly) and
//! then commit the attachment row plus refcount in one store transaction. A
//! failure at any stage removes the temp artifact (the blob store's temp file
//! drops on error) and leaves refcounts untouched.

use std::io::Read;

use tracing::{debug, warn};

use grns_blob::BlobReader;
use grns_core::attachment::Attachment;
use grns_core::enums::AttachmentSource;

use crate::error::{Result, ServiceError};
use crate::service::TaskService;

/// Caller-supplied metadata for an upload or link.
#[derive(Debug, Clone, Default)]
pub struct AttachmentMeta {
    pub kind: String,
    pub title: String,
    pub filename: String,
    pub media_type: String,
    pub labels: Vec<String>,
    pub expires_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// A reader that fails once more than `limit` bytes have been produced.
struct CappedReader<R> {
    inner: R,
    remaining: u64,
}

impl<R: Read> Read for CappedReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        if (n as u64) > self.remaining {
            return Err(std::io::Error::other(UploadTooLarge));
        }
        self.remaining -= n as u64;
        Ok(n)
    }
}

/// Marker error carried through `io::Error` when an upload exceeds the cap.
#[derive(Debug, thiserror::Error)]
#[error("upload exceeds configured size cap")]
struct UploadTooLarge;

impl TaskService {
    /// Checks the declared media type against the configured allow-list.
    fn check_media_type(&self, media_type: &str) -> Result<()> {
        let allowed = &self.options.allowed_media_types;
        if allowed.is_empty() || media_type.is_empty() {
            return Ok(());
        }
        if allowed.iter().any(|a| a == media_type) {
            return Ok(());
        }
        if self.options.reject_media_type_mismatch {
            return Err(ServiceError::invalid(format!(
                "media type not allowed: {media_type}"
            )));
        }
        Ok(())
    }

    /// Uploads managed content for a task.
    ///
    /// States: receiving/hashing/persisting happen inside the blob store's
    /// `put`; deduping consults the refcount row implicitly via the upsert.
    pub fn upload_attachment<R: Read>(
        &self,
        task_id: &str,
        meta: AttachmentMeta,
        content: R,
    ) -> Result<Attachment> {
        if !self.store.task_exists(task_id)? {
            return Err(ServiceError::NotFound(format!("task not found: {task_id}")));
        }
        self.check_media_type(&meta.media_type)?;

        let capped = CappedReader {
            inner: content,
            remaining: self.options.max_upload_bytes,
        };
        let outcome = self.blobs().put(capped).map_err(|e| match e {
            grns_blob::BlobError::Io(io)
                if io
                    .get_ref()
                    .is_some_and(|inner| inner.is::<UploadTooLarge>()) =>
            {
                ServiceError::ResourceExhausted(format!(
                    "upload exceeds max_upload_bytes ({})",
                    self.options.max_upload_bytes
                ))
            }
            other => other.into(),
        })?;

        let attachment = Attachment {
            task_id: task_id.to_owned(),
            kind: meta.kind,
            source_type: AttachmentSource::Managed,
            title: meta.title,
            filename: meta.filename,
            media_type: meta.media_type,
            labels: meta.labels,
            blob_id: Some(outcome.id.clone()),
            size_bytes: Some(outcome.size_bytes as i64),
            expires_at: meta.expires_at,
            ..Attachment::default()
        };

        match self.store.insert_attachment(&attachment) {
            Ok(stored) => {
                debug!(id = %stored.id, blob = %outcome.id, "attachment uploaded");
                Ok(stored)
            }
            Err(e) => {
                // Leave no orphaned content behind a failed commit. Content
                // that predated this upload keeps its references.
                if !outcome.existed {
                    if let Err(del) = self.blobs().delete(&outcome.id) {
                        warn!(blob = %outcome.id, error = %del, "failed to remove orphaned blob");
                    }
                }
                Err(e.into())
            }
        }
    }

    /// Records a link attachment (external URL or repo path).
    pub fn link_attachment(
        &self,
        task_id: &str,
        meta: AttachmentMeta,
        external_url: Option<String>,
        repo_path: Option<String>,
    ) -> Result<Attachment> {
        if !self.store.task_exists(task_id)? {
            return Err(ServiceError::NotFound(format!("task not found: {task_id}")));
        }

        let (source_type, external_url, repo_path) = match (external_url, repo_path) {
            (Some(url), None) if !url.trim().is_empty() => {
                (AttachmentSource::ExternalUrl, Some(url), None)
            }
            (None, Some(path)) if !path.trim().is_empty() => {
                (AttachmentSource::RepoPath, None, Some(path))
            }
            _ => {
                return Err(ServiceError::invalid(
                    "exactly one of external_url or repo_path is required",
                ));
            }
        };

        let attachment = Attachment {
            task_id: task_id.to_owned(),
            kind: meta.kind,
            source_type,
            title: meta.title,
            filename: meta.filename,
            media_type: meta.media_type,
            labels: meta.labels,
            external_url,
            repo_path,
            expires_at: meta.expires_at,
            ..Attachment::default()
        };

        Ok(self.store.insert_attachment(&attachment)?)
    }

    pub fn get_attachment(&self, id: &str) -> Result<Attachment> {
        Ok(self.store.get_attachment(id)?)
    }

    pub fn list_attachments(&self, task_id: &str) -> Result<Vec<Attachment>> {
        if !self.store.task_exists(task_id)? {
            return Err(ServiceError::NotFound(format!("task not found: {task_id}")));
        }
        Ok(self.store.list_attachments(task_id)?)
    }

    /// Deletes an attachment; the blob refcount drops in the same store
    /// transaction and a freed blob waits for the next GC pass.
    pub fn delete_attachment(&self, id: &str) -> Result<Attachment> {
        Ok(self.store.delete_attachment(id)?)
    }

    /// Opens a managed attachment's content for streaming.
    pub fn open_attachment_content(&self, id: &str) -> Result<(Attachment, BlobReader)> {
        let attachment = self.store.get_attachment(id)?;
        let Some(ref blob_id) = attachment.blob_id else {
            return Err(ServiceError::invalid(format!(
                "attachment {id} is a link, it has no stored content"
            )));
        };
        let reader = self.blobs().open(blob_id)?;
        Ok((attachment, reader))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::tests::test_service;
    use crate::service::{CreateTaskRequest, ServiceOptions, TaskService};
    use grns_core::task::TaskBuilder;
    use std::io::Cursor;
    use std::sync::Arc;

    fn seed_task(service: &TaskService, title: &str) -> String {
        service
            .create_task(CreateTaskRequest {
                task: TaskBuilder::new(title).build(),
                labels: Vec::new(),
                deps: Vec::new(),
            })
            .unwrap()
            .task
            .id
    }

    fn meta(filename: &str) -> AttachmentMeta {
        AttachmentMeta {
            filename: filename.into(),
            media_type: "text/plain".into(),
            ..AttachmentMeta::default()
        }
    }

    #[test]
    fn upload_and_read_back() {
        let (_dir, service) = test_service();
        let id = seed_task(&service, "Holder");

        let att = service
            .upload_attachment(&id, meta("notes.txt"), Cursor::new(b"attachment body"))
            .unwrap();
        assert!(att.is_managed());
        assert_eq!(att.size_bytes, Some(15));

        let (_att, mut reader) = service.open_attachment_content(&att.id).unwrap();
        let mut content = Vec::new();
        reader.read_to_end(&mut content).unwrap();
        assert_eq!(content, b"attachment body");
    }

    #[test]
    fn identical_content_dedupes() {
        let (_dir, service) = test_service();
        let a = seed_task(&service, "First");
        let b = seed_task(&service, "Second");

        let att_a = service
            .upload_attachment(&a, meta("x.bin"), Cursor::new(b"x"))
            .unwrap();
        let att_b = service
            .upload_attachment(&b, meta("y.bin"), Cursor::new(b"x"))
            .unwrap();

        assert_eq!(att_a.blob_id, att_b.blob_id);
        let row = service
            .store
            .get_blob_row(att_a.blob_id.as_deref().unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(row.ref_count, 2);
    }

    #[test]
    fn oversized_upload_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(grns_storage::SqliteStore::open_in_memory().unwrap());
        let blobs = grns_blob::BlobStore::open(dir.path().join("blobs")).unwrap();
        let options = ServiceOptions {
            max_upload_bytes: 4,
            ..ServiceOptions::default()
        };
        let service = TaskService::new(store, blobs, options);
        let id = seed_task(&service, "Small limits");

        let err = service
            .upload_attachment(&id, meta("big.bin"), Cursor::new(b"way too large"))
            .unwrap_err();
        assert_eq!(err.code(), "resource_exhausted");
    }

    #[test]
    fn media_type_allow_list() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(grns_storage::SqliteStore::open_in_memory().unwrap());
        let blobs = grns_blob::BlobStore::open(dir.path().join("blobs")).unwrap();
        let options = ServiceOptions {
            allowed_media_types: vec!["text/plain".into()],
            reject_media_type_mismatch: true,
            ..ServiceOptions::default()
        };
        let service = TaskService::new(store, blobs, options);
        let id = seed_task(&service, "Strict types");

        let mut bad = meta("app.exe");
        bad.media_type = "application/x-msdownload".into();
        let err = service
            .upload_attachment(&id, bad, Cursor::new(b"mz"))
            .unwrap_err();
        assert_eq!(err.code(), "invalid_argument");

        service
            .upload_attachment(&id, meta("ok.txt"), Cursor::new(b"fine"))
            .unwrap();
    }

    #[test]
    fn link_requires_exactly_one_target() {
        let (_dir, service) = test_service();
        let id = seed_task(&service, "Linker");

        let err = service
            .link_attachment(&id, meta("x"), None, None)
            .unwrap_err();
        assert_eq!(err.code(), "invalid_argument");

        let att = service
            .link_attachment(
                &id,
                meta("doc"),
                Some("https://example.com/design".into()),
                None,
            )
            .unwrap();
        assert!(!att.is_managed());
        assert!(att.blob_id.is_none());

        let err = service.open_attachment_content(&att.id).unwrap_err();
        assert_eq!(err.code(), "invalid_argument");
    }

    #[test]
    fn delete_decrements_refcount() {
        let (_dir, service) = test_service();
        let a = seed_task(&service, "A");
        let b = seed_task(&service, "B");

        let att_a = service
            .upload_attachment(&a, meta("f"), Cursor::new(b"z"))
            .unwrap();
        let att_b = service
            .upload_attachment(&b, meta("g"), Cursor::new(b"z"))
            .unwrap();
        let blob_id = att_a.blob_id.clone().unwrap();

        service.delete_attachment(&att_a.id).unwrap();
        let row = service.store.get_blob_row(&blob_id).unwrap().unwrap();
        assert_eq!(row.ref_count, 1);
        // Content still present for the surviving reference.
        assert!(service.blobs().contains(&blob_id).unwrap());

        service.delete_attachment(&att_b.id).unwrap();
        let row = service.store.get_blob_row(&blob_id).unwrap().unwrap();
        assert_eq!(row.ref_count, 0);
    }
}
