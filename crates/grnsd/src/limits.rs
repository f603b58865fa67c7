//! Concurrency limiting for heavy requests.
//!
//! Import, export, and search share one process-global slot pool; a request
//! that cannot get a slot is answered with `resource_exhausted` instead of
//! queueing.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug)]
struct Inner {
    limit: usize,
    active: AtomicUsize,
}

/// A fixed pool of slots with try-acquire semantics.
///
/// Cloning is cheap; all clones share the same pool. Guards own a reference
/// so they can outlive the handler that acquired them (streaming responses
/// hold their slot until the stream finishes).
#[derive(Debug, Clone)]
pub struct HeavySlots {
    inner: Arc<Inner>,
}

impl HeavySlots {
    pub fn new(limit: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                limit: limit.max(1),
                active: AtomicUsize::new(0),
            }),
        }
    }

    /// Takes a slot if one is free. The guard releases it on drop.
    pub fn try_acquire(&self) -> Option<HeavyGuard> {
        let mut current = self.inner.active.load(Ordering::Acquire);
        loop {
            if current >= self.inner.limit {
                return None;
            }
            match self.inner.active.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    return Some(HeavyGuard {
                        inner: Arc::clone(&self.inner),
                    });
                }
                Err(observed) => current = observed,
            }
        }
    }

    /// Currently held slots.
    pub fn active(&self) -> usize {
        self.inner.active.load(Ordering::Acquire)
    }
}

/// RAII slot handle.
pub struct HeavyGuard {
    inner: Arc<Inner>,
}

impl Drop for HeavyGuard {
    fn drop(&mut self) {
        self.inner.active.fetch_sub(1, Ordering::AcqRel);
    }
}
