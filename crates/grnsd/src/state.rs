//! Shared server state.

use std::sync::Arc;

use grns_config::GrnsConfig;
use grns_service::{ServiceError, TaskService};

use crate::auth::SessionStore;
use crate::limits::{HeavyGuard, HeavySlots};

/// Everything a request handler needs, shared across worker threads.
pub struct AppState {
    pub service: Arc<TaskService>,
    pub config: GrnsConfig,
    pub sessions: SessionStore,
    pub heavy: HeavySlots,
}

impl AppState {
    pub fn new(service: Arc<TaskService>, config: GrnsConfig) -> Self {
        let heavy = HeavySlots::new(config.server.heavy_request_limit);
        Self {
            service,
            config,
            sessions: SessionStore::new(),
            heavy,
        }
    }

    /// Takes a heavy-request slot or reports saturation.
    pub fn acquire_heavy(&self) -> Result<HeavyGuard, ServiceError> {
        self.heavy.try_acquire().ok_or_else(|| {
            ServiceError::ResourceExhausted(
                "too many concurrent import/export/search requests".into(),
            )
        })
    }
}
