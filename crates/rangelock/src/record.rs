//! Lock records: the immutable values the index and the conflict engine
//! reason about.

use crate::key::{min_lt_max, union_max, union_min, Key};
use crate::owner::LockOwner;
use std::sync::atomic::{AtomicU64, Ordering};

/// Mode of a lock: shared (read) or exclusive (write).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockMode {
    /// Shared lock — any number of readers of different owners may coexist.
    Read,
    /// Exclusive lock — no other owner may hold an overlapping lock of
    /// either mode.
    Write,
}

impl LockMode {
    fn is_write(self) -> bool {
        matches!(self, LockMode::Write)
    }
}

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// One held (or candidate) lock over a half-open key range `[min, max)`.
///
/// Lock records are never mutated once constructed: merging two records
/// produces a brand-new record and discards the originals (see
/// `merge_with`). The `id` field exists purely so records with identical
/// owner/range/mode content remain distinguishable entities while both are
/// briefly live (e.g. a candidate about to absorb an existing record during
/// merge) — it plays no role in the locking semantics themselves.
#[derive(Clone, Debug)]
pub struct LockRecord {
    id: u64,
    pub owner: LockOwner,
    pub min: Option<Key>,
    pub max: Option<Key>,
    pub mode: LockMode,
}

impl LockRecord {
    /// Builds a new lock record. Panics if both endpoints are present and
    /// `min > max` — callers must validate ranges before constructing a
    /// record (see `LockManager::lock`, which returns `LockError` instead of
    /// panicking on caller-supplied ranges).
    pub fn new(owner: LockOwner, min: Option<Key>, max: Option<Key>, mode: LockMode) -> Self {
        if let (Some(mn), Some(mx)) = (&min, &max) {
            assert!(mn <= mx, "lock range min must be <= max");
        }
        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        LockRecord {
            id,
            owner,
            min,
            max,
            mode,
        }
    }

    /// Internal identity, used for tie-breaking and index membership tests.
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub fn is_write(&self) -> bool {
        self.mode.is_write()
    }

    /// `true` iff the range is empty (`min == max`, both present). An empty
    /// range conflicts and overlaps with nothing, including itself — see
    /// DESIGN.md for why this needs an explicit guard rather than falling
    /// out of the general overlap test.
    pub fn is_empty_range(&self) -> bool {
        matches!((&self.min, &self.max), (Some(a), Some(b)) if a == b)
    }

    /// `true` iff the two half-open ranges intersect.
    pub fn overlaps(&self, other: &LockRecord) -> bool {
        if self.is_empty_range() || other.is_empty_range() {
            return false;
        }
        min_lt_max(&self.min, &other.max) && min_lt_max(&other.min, &self.max)
    }

    /// `true` iff the two ranges are immediately adjacent (`self.max ==
    /// other.min` or vice versa). Two unbounded endpoints are never
    /// adjacent to one another — adjacency only applies between two real
    /// keys.
    fn touches(&self, other: &LockRecord) -> bool {
        matches!((&self.max, &other.min), (Some(a), Some(b)) if a == b)
            || matches!((&other.max, &self.min), (Some(a), Some(b)) if a == b)
    }

    /// `true` iff `self` and `other` conflict: they overlap, belong to
    /// different owners, and at least one is a write lock. Same-owner locks
    /// never conflict — they are merge candidates instead.
    pub fn conflicts_with(&self, other: &LockRecord) -> bool {
        self.overlaps(other)
            && self.owner != other.owner
            && (self.is_write() || other.is_write())
    }

    /// If `self` and `other` can be merged — same owner, same mode, and
    /// overlapping or touching ranges — returns the union record. Otherwise
    /// `None`. Same-owner write-vs-read pairs are never merged (differing
    /// modes), so a transaction's read lock and write lock over the same
    /// range both persist as distinct records.
    pub fn merge_with(&self, other: &LockRecord) -> Option<LockRecord> {
        if self.owner != other.owner {
            return None;
        }
        if self.mode != other.mode {
            return None;
        }
        if !(self.overlaps(other) || self.touches(other)) {
            return None;
        }
        Some(LockRecord::new(
            self.owner,
            union_min(&self.min, &other.min),
            union_max(&self.max, &other.max),
            self.mode,
        ))
    }
}

impl PartialEq for LockRecord {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
impl Eq for LockRecord {}

impl std::hash::Hash for LockRecord {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}
