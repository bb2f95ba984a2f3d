//! The lock index: two ordered views of the same population of lock
//! records, one keyed by `min`, one by `max`, enabling O(log n + k)
//! retrieval of all locks overlapping a query range (§4.3 of the design).

use crate::key::{next_key, MaxBound, MinBound};
use crate::record::LockRecord;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

/// Dual ordered index over outstanding lock records.
///
/// Invariant: `by_min` and `by_max` always contain exactly the same set of
/// records (enforced by only ever inserting/removing through `insert`/
/// `remove`, never touching the maps individually).
#[derive(Default)]
pub struct LockIndex {
    by_min: BTreeMap<(MinBound, u64), Arc<LockRecord>>,
    by_max: BTreeMap<(MaxBound, u64), Arc<LockRecord>>,
}

impl LockIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.by_min.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_min.is_empty()
    }

    pub fn insert(&mut self, record: Arc<LockRecord>) {
        let id = record.id();
        self.by_min
            .insert((MinBound(record.min.clone()), id), record.clone());
        self.by_max.insert((MaxBound(record.max.clone()), id), record);
    }

    pub fn remove(&mut self, record: &LockRecord) {
        self.by_min.remove(&(MinBound(record.min.clone()), record.id()));
        self.by_max.remove(&(MaxBound(record.max.clone()), record.id()));
    }

    /// All records currently in the index, in `min` order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<LockRecord>> {
        self.by_min.values()
    }

    /// Records in the index overlapping `candidate`, per §4.3:
    ///
    /// 1. `lhs` = records whose `min < candidate.max` (all, if
    ///    `candidate.max` is absent).
    /// 2. `rhs` = records whose `max > candidate.min`, computed as `max >=
    ///    next_key(candidate.min)` (all, if `candidate.min` is absent).
    /// 3. The overlap set is `lhs ∩ rhs`, computed by iterating the smaller
    ///    side and testing membership in the larger.
    pub fn overlapping(&self, candidate: &LockRecord) -> Vec<Arc<LockRecord>> {
        let lhs: Vec<&Arc<LockRecord>> = match &candidate.max {
            None => self.by_min.values().collect(),
            Some(_) => {
                let lhs_upper = MinBound(candidate.max.clone());
                self.by_min
                    .range(..(lhs_upper, 0))
                    .map(|(_, rec)| rec)
                    .collect()
            }
        };

        let rhs_lower = match &candidate.min {
            None => MaxBound(None),
            Some(m) => MaxBound(Some(next_key(m))),
        };
        let rhs: Vec<&Arc<LockRecord>> = match &candidate.min {
            None => self.by_max.values().collect(),
            Some(_) => self
                .by_max
                .range((rhs_lower, 0)..)
                .map(|(_, rec)| rec)
                .collect(),
        };

        if lhs.len() <= rhs.len() {
            let rhs_ids: HashSet<u64> = rhs.iter().map(|r| r.id()).collect();
            lhs.into_iter()
                .filter(|r| rhs_ids.contains(&r.id()))
                .cloned()
                .collect()
        } else {
            let lhs_ids: HashSet<u64> = lhs.iter().map(|r| r.id()).collect();
            rhs.into_iter()
                .filter(|r| lhs_ids.contains(&r.id()))
                .cloned()
                .collect()
        }
    }
}
