//! Lock owner identity.
//!
//! An owner represents one logical transaction's claim on zero or more
//! ranges. It is a cheap, `Copy` handle — the manager never stores a strong
//! reference to caller state, only this opaque id, so there is nothing for
//! the manager to leak if a caller drops its owner without calling
//! `release` (see `manager::LockManager::forget` for the explicit cleanup
//! path in that case).

use std::fmt;
use uuid::Uuid;

/// Identity of a transaction holding (or attempting to hold) locks.
///
/// Two `LockOwner`s are equal iff they were minted from the same `new()`
/// call (or are clones of one another); there is no meaningful ordering
/// beyond identity.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct LockOwner(Uuid);

impl LockOwner {
    /// Mints a fresh, globally unique owner identity.
    pub fn new() -> Self {
        LockOwner(Uuid::new_v4())
    }
}

impl Default for LockOwner {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for LockOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LockOwner({})", self.0)
    }
}

impl fmt::Display for LockOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
