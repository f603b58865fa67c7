//! Server internals for the `grnsd` binary.
//!
//! Split out as a library so integration tests can start a real server on an
//! ephemeral port and drive it over HTTP.

pub mod auth;
pub mod handlers;
pub mod limits;
pub mod multipart;
pub mod pipe;
pub mod server;
pub mod state;

use std::sync::Arc;

use grns_blob::BlobStore;
use grns_config::GrnsConfig;
use grns_service::{ServiceOptions, TaskService};
use grns_storage::SqliteStore;

use crate::state::AppState;

/// Builds the shared state for a server from loaded configuration.
pub fn build_state(config: GrnsConfig) -> anyhow::Result<Arc<AppState>> {
    let store = Arc::new(SqliteStore::open(&config.db_path)?);
    let blobs = BlobStore::open(config.blobs_dir())?;
    let options = ServiceOptions {
        project_prefix: config.project_prefix.clone(),
        max_upload_bytes: config.attachments.max_upload_bytes,
        allowed_media_types: config.attachments.allowed_media_types.clone(),
        reject_media_type_mismatch: config.attachments.reject_media_type_mismatch,
        gc_batch_size: config.attachments.gc_batch_size,
    };
    let service = Arc::new(TaskService::new(store, blobs, options));
    Ok(Arc::new(AppState::new(service, config)))
}
