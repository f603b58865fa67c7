//! Business logic for the grns task tracker.
//!
//! [`TaskService`] sits between the HTTP layer and the store: it mints ids,
//! enforces the status/closed-at and dependency-graph invariants, runs
//! import/export, and orchestrates cleanup and blob GC.

pub mod admin;
pub mod attachments;
pub mod error;
pub mod export;
pub mod import;
pub mod service;

pub use admin::{CleanupReport, GcReport};
pub use attachments::AttachmentMeta;
pub use error::{Result, ServiceError};
pub use import::{DedupeMode, ImportOptions, ImportReport, OrphanHandling};
pub use service::{
    CreateTaskRequest, InfoResponse, ServiceOptions, TaskService, TaskView, TreeNodeView,
    UpdateTaskRequest,
};
