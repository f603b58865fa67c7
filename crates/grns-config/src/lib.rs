//! Configuration types and loading for the grns system.
//!
//! Configuration is merged from, in increasing precedence: built-in defaults,
//! the global `config.toml`, a project-local `.grns/config.toml` (only when
//! trusted), and `GRNS_`-prefixed environment variables. Nested sections use
//! a double underscore in the environment (`GRNS_ATTACHMENTS__MAX_UPLOAD_BYTES`).

use std::path::{Path, PathBuf};

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors that can occur during configuration operations.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The merged configuration could not be extracted.
    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    /// A configuration value was invalid.
    #[error("invalid configuration value for '{key}': {reason}")]
    InvalidValue {
        /// The configuration key that had an invalid value.
        key: String,
        /// Why the value is invalid.
        reason: String,
    },

    /// Serializing the configuration back to TOML failed.
    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),
}

/// A specialized `Result` type for configuration operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// Attachment limits and media-type policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttachmentsConfig {
    /// Hard cap on a single upload's content size.
    pub max_upload_bytes: u64,

    /// Ceiling for buffering multipart bodies in memory.
    pub multipart_max_memory: u64,

    /// Allow-list of media types; empty allows everything.
    pub allowed_media_types: Vec<String>,

    /// Reject uploads whose declared media type is not on the allow-list
    /// (instead of storing them with a generic type).
    pub reject_media_type_mismatch: bool,

    /// How many zero-refcount blobs one GC pass deletes.
    pub gc_batch_size: i64,
}

impl Default for AttachmentsConfig {
    fn default() -> Self {
        Self {
            max_upload_bytes: 64 * 1024 * 1024,
            multipart_max_memory: 8 * 1024 * 1024,
            allowed_media_types: Vec::new(),
            reject_media_type_mismatch: false,
            gc_batch_size: 100,
        }
    }
}

/// HTTP server tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Worker threads pulling from the shared listener.
    pub worker_threads: usize,

    /// Concurrent import/export/search requests before `resource_exhausted`.
    pub heavy_request_limit: usize,

    /// Body size cap on JSON endpoints.
    pub request_body_limit: u64,

    /// Per-request deadline.
    pub request_timeout_ms: u64,

    /// How long shutdown waits for in-flight handlers to drain.
    pub shutdown_grace_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            worker_threads: 8,
            heavy_request_limit: 2,
            request_body_limit: 1024 * 1024,
            request_timeout_ms: 30_000,
            shutdown_grace_ms: 3_000,
        }
    }
}

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Process-wide configuration, initialized once at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GrnsConfig {
    /// Prefix for minted task ids (`<prefix>-<slug>`).
    pub project_prefix: String,

    /// Base URL the server binds to (host and port are taken from it).
    pub api_url: String,

    /// Path of the SQLite database file.
    pub db_path: PathBuf,

    /// Log filter (`error` | `warn` | `info` | `debug` | `trace` or any
    /// `EnvFilter` directive string).
    pub log_level: String,

    /// Static bearer token; unset disables authentication.
    pub api_token: Option<String>,

    /// Token granting access to `/admin` endpoints.
    pub admin_token: Option<String>,

    pub attachments: AttachmentsConfig,

    pub server: ServerConfig,
}

impl Default for GrnsConfig {
    fn default() -> Self {
        Self {
            project_prefix: "gr".to_string(),
            api_url: "http://127.0.0.1:7733".to_string(),
            db_path: PathBuf::from(".grns/grns.db"),
            log_level: "info".to_string(),
            api_token: None,
            admin_token: None,
            attachments: AttachmentsConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

impl GrnsConfig {
    /// Loads configuration from the standard locations plus the environment.
    ///
    /// `trust_project` gates the project-local `.grns/config.toml`; untrusted
    /// working directories only see the global file and the environment.
    pub fn load(trust_project: bool) -> Result<Self> {
        let global = global_config_path();
        let project = PathBuf::from(".grns/config.toml");
        Self::load_from(global.as_deref(), trust_project.then_some(project.as_path()))
    }

    /// Loads configuration from explicit file paths plus the environment.
    pub fn load_from(global: Option<&Path>, project: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(path) = global {
            figment = figment.merge(Toml::file(path));
        }
        if let Some(path) = project {
            figment = figment.merge(Toml::file(path));
        }
        let config: Self = figment
            .merge(Env::prefixed("GRNS_").split("__"))
            .extract()
            .map_err(Box::new)?;
        config.validate()?;
        Ok(config)
    }

    /// Sanity-checks values that would break the daemon at runtime.
    pub fn validate(&self) -> Result<()> {
        if self.project_prefix.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "project_prefix".into(),
                reason: "must be non-empty".into(),
            });
        }
        if self.project_prefix.contains(['-', ' ']) {
            return Err(ConfigError::InvalidValue {
                key: "project_prefix".into(),
                reason: "must not contain '-' or spaces".into(),
            });
        }
        if self.listen_addr().is_none() {
            return Err(ConfigError::InvalidValue {
                key: "api_url".into(),
                reason: format!("cannot derive listen address from '{}'", self.api_url),
            });
        }
        if self.server.worker_threads == 0 {
            return Err(ConfigError::InvalidValue {
                key: "server.worker_threads".into(),
                reason: "must be at least 1".into(),
            });
        }
        Ok(())
    }

    /// Derives the `host:port` listen address from `api_url`.
    pub fn listen_addr(&self) -> Option<String> {
        let rest = self
            .api_url
            .strip_prefix("http://")
            .or_else(|| self.api_url.strip_prefix("https://"))?;
        let authority = rest.split('/').next()?;
        if authority.is_empty() {
            return None;
        }
        let addr = if authority.contains(':') {
            authority.to_string()
        } else {
            format!("{authority}:80")
        };
        Some(addr)
    }

    /// The blob store root: a `.grns/blobs` directory beside the database.
    pub fn blobs_dir(&self) -> PathBuf {
        let dir = self.db_path.parent().unwrap_or_else(|| Path::new("."));
        dir.join(".grns").join("blobs")
    }

    /// Renders the effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

/// The global config file: `$XDG_CONFIG_HOME/grns/config.toml` or
/// `~/.config/grns/config.toml`.
pub fn global_config_path() -> Option<PathBuf> {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        if !xdg.is_empty() {
            return Some(PathBuf::from(xdg).join("grns").join("config.toml"));
        }
    }
    std::env::var("HOME").ok().map(|home| {
        PathBuf::from(home)
            .join(".config")
            .join("grns")
            .join("config.toml")
    })
}
