//! Admin user types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A local admin account.
///
/// The password hash is an opaque PHC string produced and verified by the
/// service's auth module; storage treats it as a blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminUser {
    pub id: String,

    /// Normalized (lowercase, trimmed) and unique.
    pub username: String,

    #[serde(skip_serializing)]
    pub password_hash: String,

    #[serde(default = "default_role")]
    pub role: String,

    #[serde(default)]
    pub disabled: bool,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

fn default_role() -> String {
    "admin".to_string()
}

/// Normalizes a username: trim surrounding whitespace, lowercase.
pub fn normalize_username(username: &str) -> String {
    username.trim().to_lowercase()
}
