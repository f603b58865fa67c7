//! Attachment types -- files and links associated with tasks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::enums::AttachmentSource;

/// Helper for `skip_serializing_if` on `Vec` fields.
fn is_empty_vec<T>(v: &Vec<T>) -> bool {
    v.is_empty()
}

/// Metadata for a file or link attached to a task.
///
/// Managed attachments carry a `blob_id` referencing content in the blob
/// store; link attachments carry `external_url` or `repo_path` instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    #[serde(default)]
    pub id: String,

    #[serde(default)]
    pub task_id: String,

    /// Free-form category (e.g. `log`, `screenshot`, `patch`).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kind: String,

    #[serde(default)]
    pub source_type: AttachmentSource,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub title: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub filename: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub media_type: String,

    #[serde(default, skip_serializing_if = "is_empty_vec")]
    pub labels: Vec<String>,

    /// Content hash; present iff `source_type` is managed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blob_id: Option<String>,

    /// Content size; present iff `source_type` is managed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_path: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Default for Attachment {
    fn default() -> Self {
        Self {
            id: String::new(),
            task_id: String::new(),
            kind: String::new(),
            source_type: AttachmentSource::Managed,
            title: String::new(),
            filename: String::new(),
            media_type: String::new(),
            labels: Vec::new(),
            blob_id: None,
            size_bytes: None,
            external_url: None,
            repo_path: None,
            expires_at: None,
            created_at: Utc::now(),
        }
    }
}

impl Attachment {
    /// Returns `true` if the attachment's content lives in the blob store.
    pub fn is_managed(&self) -> bool {
        self.source_type == AttachmentSource::Managed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn managed_attachment_serde() {
        let a = Attachment {
            id: "att-1".into(),
            task_id: "gr-aaaa".into(),
            kind: "log".into(),
            filename: "build.log".into(),
            media_type: "text/plain".into(),
            blob_id: Some("ab".repeat(32)),
            size_bytes: Some(1024),
            ..Attachment::default()
        };
        assert!(a.is_managed());
        let json = serde_json::to_string(&a).unwrap();
        assert!(json.contains(r#""source_type":"managed""#));
        let back: Attachment = serde_json::from_str(&json).unwrap();
        assert_eq!(back.blob_id, a.blob_id);
    }

    #[test]
    fn link_attachment_has_no_blob() {
        let a = Attachment {
            source_type: AttachmentSource::ExternalUrl,
            external_url: Some("https://example.com/doc".into()),
            ..Attachment::default()
        };
        assert!(!a.is_managed());
        assert!(a.blob_id.is_none());
    }
}
