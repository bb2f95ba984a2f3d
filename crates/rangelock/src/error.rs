//! Error type for argument-precondition violations and interruption.
//!
//! Timeout outcomes (`WAIT_TIMEOUT_EXPIRED`, `HOLD_TIMEOUT_EXPIRED`) are
//! *not* represented here — per §7 of the design, those are normal return
//! values (see `LockOutcome`), not errors.

/// Failure modes for `LockManager::lock`/`lock_cancellable`.
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    /// Both endpoints were given and `min > max`.
    #[error("invalid lock range: min must be <= max")]
    InvalidRange,

    /// The wait was aborted by an external cancellation before the
    /// candidate became admissible or the wait timeout elapsed. Distinct
    /// from `WAIT_TIMEOUT_EXPIRED`: the manager does not know how long the
    /// caller would otherwise have waited.
    #[error("lock wait was interrupted")]
    Interrupted,
}
