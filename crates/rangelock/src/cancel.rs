//! Cooperative cancellation for a thread blocked inside `lock`.
//!
//! Rust threads have no built-in interrupt signal, so cancellation is
//! modeled as an explicit, shareable flag the caller can set from another
//! thread. `lock` (without a token) can never be interrupted; only callers
//! that opt in via `lock_cancellable` with a token observe
//! `LockError::Interrupted`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A shareable cancellation flag.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    /// Creates a fresh, not-yet-cancelled token.
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    /// Marks the token cancelled. Any `lock_cancellable` call holding a
    /// clone of this token will observe the cancellation on its next check
    /// (at most once per wait-loop iteration).
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// `true` once `cancel` has been called.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
