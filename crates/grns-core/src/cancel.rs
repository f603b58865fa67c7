//! Cancellation tokens for long-running operations.
//!
//! Handlers create a token per request; import/export/search loops call
//! [`CancelToken::check`] between records and bail out with a typed error.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

/// Why an operation was interrupted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Interrupt {
    /// The caller canceled the operation.
    #[error("operation canceled")]
    Canceled,

    /// The request-level deadline expired.
    #[error("deadline exceeded")]
    DeadlineExceeded,
}

/// A cloneable cancellation handle with an optional deadline.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancelToken {
    /// Creates a token that can only be canceled explicitly.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a token that also trips once `deadline` passes.
    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            deadline: Some(deadline),
        }
    }

    /// Marks the token canceled. Idempotent; visible to all clones.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Returns `true` if [`cancel`](Self::cancel) was called.
    pub fn is_canceled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Returns the interrupt reason, if any.
    pub fn interrupted(&self) -> Option<Interrupt> {
        if self.is_canceled() {
            return Some(Interrupt::Canceled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(Interrupt::DeadlineExceeded),
            _ => None,
        }
    }

    /// Errors if the token is canceled or past its deadline.
    pub fn check(&self) -> Result<(), Interrupt> {
        match self.interrupted() {
            Some(reason) => Err(reason),
            None => Ok(()),
        }
    }
}
