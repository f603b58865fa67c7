//! Core domain types for the grns task tracker.
//!
//! Everything the storage and service layers agree on lives here: the task
//! model, enum types, query filters, slug ID generation, cancellation tokens,
//! and the NDJSON record format used by import/export.

pub mod admin;
pub mod attachment;
pub mod cancel;
pub mod dependency;
pub mod enums;
pub mod filter;
pub mod git_ref;
pub mod idgen;
pub mod ndjson;
pub mod task;
