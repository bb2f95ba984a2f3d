//! The conflict/merge engine and the wait/retry loop (§4.4–§4.6), wired
//! together behind a single mutex per §5: "every public operation acquires
//! this mutex for its entire duration... fine-grained locking is
//! deliberately avoided."

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::cancel::CancellationToken;
use crate::error::LockError;
use crate::index::LockIndex;
use crate::key::Key;
use crate::owner::LockOwner;
use crate::record::{LockMode, LockRecord};
use crate::result::{LockOutcome, ReleaseOutcome};

/// Ten years, the ceiling both timeouts are clamped to so that `now +
/// timeout` never overflows `Instant` arithmetic.
const MAX_TIMEOUT: Duration = Duration::from_secs(60 * 60 * 24 * 365 * 10);

fn clamp_timeout(d: Duration) -> Duration {
    if d > MAX_TIMEOUT {
        MAX_TIMEOUT
    } else {
        d
    }
}

/// Per-owner hold-timeout bookkeeping. Entries are created lazily (§4.6)
/// the first time some other owner's `lock` call finds itself blocked by a
/// lock of this owner.
#[derive(Clone, Copy, Debug)]
enum HoldState {
    Deadline(Instant),
    Expired,
}

enum CheckOutcome {
    Admissible(Vec<Arc<LockRecord>>),
    Blocked,
}

struct ManagerState {
    index: LockIndex,
    owner_locks: HashMap<LockOwner, HashSet<Arc<LockRecord>>>,
    hold_deadlines: HashMap<LockOwner, HoldState>,
    hold_timeout: Duration,
}

impl ManagerState {
    fn new() -> Self {
        ManagerState {
            index: LockIndex::new(),
            owner_locks: HashMap::new(),
            hold_deadlines: HashMap::new(),
            hold_timeout: Duration::ZERO,
        }
    }

    /// Removes every lock held by `owner` from the index and from the
    /// owner's own set. Does not touch `hold_deadlines` — callers decide
    /// what to do with that entry.
    fn remove_owner_locks(&mut self, owner: &LockOwner) {
        if let Some(locks) = self.owner_locks.remove(owner) {
            for rec in &locks {
                self.index.remove(rec);
            }
        }
    }

    /// §4.4: decides whether `candidate` is admissible right now, handling
    /// hold-timeout expiry (§4.6) along the way. On admission, returns the
    /// set of same-owner records `candidate` should absorb via merging.
    ///
    /// When a conflicting owner's hold timeout has just expired, that
    /// owner's locks are force-released and the whole overlap scan is
    /// restarted from scratch (the index has changed mid-scan) — see the
    /// "start over on forced release" design note.
    fn check(&mut self, candidate: &LockRecord, now: Instant, condvar: &Condvar) -> CheckOutcome {
        'restart: loop {
            let overlapping = self.index.overlapping(candidate);

            for other in &overlapping {
                if !candidate.conflicts_with(other) {
                    continue;
                }

                if self.hold_timeout.is_zero() {
                    return CheckOutcome::Blocked;
                }

                let deadline = *self
                    .hold_deadlines
                    .entry(other.owner)
                    .or_insert_with(|| HoldState::Deadline(now + self.hold_timeout));

                match deadline {
                    HoldState::Deadline(d) if now >= d => {
                        tracing::debug!(owner = ?other.owner, "hold timeout expired, forcing release");
                        self.hold_deadlines.insert(other.owner, HoldState::Expired);
                        self.remove_owner_locks(&other.owner);
                        condvar.notify_all();
                        continue 'restart;
                    }
                    _ => return CheckOutcome::Blocked,
                }
            }

            // No conflicts remain. Collect same-owner mergers.
            let mut mergers = Vec::new();
            for other in &overlapping {
                if candidate.owner == other.owner && candidate.merge_with(other).is_some() {
                    mergers.push(other.clone());
                }
            }
            return CheckOutcome::Admissible(mergers);
        }
    }

    /// §4.4, post-admission: folds `mergers` into `candidate`, removing the
    /// absorbed records from the index and from the owner's set, then
    /// inserts the final record into both.
    fn admit(&mut self, candidate: LockRecord, mergers: Vec<Arc<LockRecord>>) {
        let mut merged = candidate;
        for m in &mergers {
            self.index.remove(m);
            if let Some(set) = self.owner_locks.get_mut(&merged.owner) {
                set.remove(m);
            }
            merged = merged
                .merge_with(m)
                .expect("check() only returns mergers for which merge_with succeeds");
        }
        let rec = Arc::new(merged);
        self.index.insert(rec.clone());
        self.owner_locks
            .entry(rec.owner)
            .or_default()
            .insert(rec);
    }
}

/// The range lock manager (§6).
///
/// Mediates `lock`/`release` calls from many threads over a single ordered
/// byte-keyed key space. Does no I/O itself — it only arbitrates lock
/// ownership.
pub struct LockManager {
    state: Mutex<ManagerState>,
    condvar: Condvar,
}

impl LockManager {
    /// Creates a manager with no outstanding locks and an unlimited (zero)
    /// hold timeout.
    pub fn new() -> Self {
        LockManager {
            state: Mutex::new(ManagerState::new()),
            condvar: Condvar::new(),
        }
    }

    /// Sets the hold timeout. Zero means unlimited (the default). Clamped
    /// to ten years.
    pub fn set_hold_timeout(&self, timeout: Duration) {
        self.state.lock().hold_timeout = clamp_timeout(timeout);
    }

    /// Current hold timeout.
    pub fn hold_timeout(&self) -> Duration {
        self.state.lock().hold_timeout
    }

    /// Number of locks currently indexed, across all owners. Exposed for
    /// tests and diagnostics.
    pub fn lock_count(&self) -> usize {
        self.state.lock().index.len()
    }

    /// Acquires a lock over `[min, max)`, blocking up to `wait` (zero means
    /// indefinitely) while the candidate conflicts with an existing lock of
    /// another owner. See `lock_cancellable` for an interruptible variant.
    pub fn lock(
        &self,
        owner: &LockOwner,
        min: Option<Key>,
        max: Option<Key>,
        write: bool,
        wait: Duration,
    ) -> Result<LockOutcome, LockError> {
        self.lock_cancellable(owner, min, max, write, wait, None)
    }

    /// Like `lock`, but polls `cancel` (if given) on every wait-loop
    /// iteration; if it has been cancelled, returns
    /// `LockError::Interrupted` without inserting the candidate (§5,
    /// Cancellation).
    pub fn lock_cancellable(
        &self,
        owner: &LockOwner,
        min: Option<Key>,
        max: Option<Key>,
        write: bool,
        wait: Duration,
        cancel: Option<&CancellationToken>,
    ) -> Result<LockOutcome, LockError> {
        if let (Some(mn), Some(mx)) = (&min, &max) {
            if mn > mx {
                return Err(LockError::InvalidRange);
            }
        }
        let wait = clamp_timeout(wait);
        let mode = if write { LockMode::Write } else { LockMode::Read };
        let candidate = LockRecord::new(*owner, min, max, mode);

        let mut state = self.state.lock();

        if matches!(state.hold_deadlines.get(owner), Some(HoldState::Expired)) {
            state.hold_deadlines.remove(owner);
            return Ok(LockOutcome::HoldTimeoutExpired);
        }

        let deadline = if wait.is_zero() {
            None
        } else {
            Some(Instant::now() + wait)
        };

        loop {
            if let Some(tok) = cancel {
                if tok.is_cancelled() {
                    return Err(LockError::Interrupted);
                }
            }

            match state.check(&candidate, Instant::now(), &self.condvar) {
                CheckOutcome::Admissible(mergers) => {
                    state.admit(candidate, mergers);
                    return Ok(LockOutcome::Success);
                }
                CheckOutcome::Blocked => match deadline {
                    None => {
                        self.condvar.wait(&mut state);
                    }
                    Some(d) => {
                        let now = Instant::now();
                        if now >= d {
                            return Ok(LockOutcome::WaitTimeoutExpired);
                        }
                        let timed_out = self
                            .condvar
                            .wait_for(&mut state, d - now)
                            .timed_out();
                        if timed_out {
                            return Ok(LockOutcome::WaitTimeoutExpired);
                        }
                    }
                },
            }
        }
    }

    /// Releases every lock `owner` holds, atomically, and wakes all
    /// waiters. Never blocks.
    pub fn release(&self, owner: &LockOwner) -> ReleaseOutcome {
        let mut state = self.state.lock();
        let expired = matches!(state.hold_deadlines.get(owner), Some(HoldState::Expired));
        state.remove_owner_locks(owner);
        state.hold_deadlines.remove(owner);
        drop(state);
        self.condvar.notify_all();
        if expired {
            ReleaseOutcome::HoldTimeoutExpired
        } else {
            ReleaseOutcome::Success
        }
    }

    /// Explicitly discards any hold-deadline bookkeeping for `owner` without
    /// releasing locks, for callers that mint an owner, never acquire a
    /// lock with it, and want to drop it cleanly (the supplemental API
    /// mentioned in §9 for non-garbage-collected targets).
    pub fn forget(&self, owner: &LockOwner) {
        self.state.lock().hold_deadlines.remove(owner);
    }

    /// Test-only introspection: every record currently in the index, plus
    /// every record currently in some owner's set, for invariant checking.
    /// Not part of the public API.
    #[cfg(test)]
    fn snapshot(&self) -> (Vec<Arc<LockRecord>>, Vec<Arc<LockRecord>>) {
        let state = self.state.lock();
        let from_index: Vec<Arc<LockRecord>> = state.index.iter().cloned().collect();
        let from_owners: Vec<Arc<LockRecord>> = state
            .owner_locks
            .values()
            .flat_map(|set| set.iter().cloned())
            .collect();
        (from_index, from_owners)
    }
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::sync::Arc as StdArc;
    use std::thread;

    fn key(b: &'static [u8]) -> Option<Key> {
        Some(Bytes::from_static(b))
    }

    #[test]
    fn non_overlapping_reads_both_succeed() {
        let mgr = LockManager::new();
        let a = LockOwner::new();
        let b = LockOwner::new();

        assert_eq!(
            mgr.lock(&a, key(b"\x01"), key(b"\x05"), false, Duration::ZERO)
                .unwrap(),
            LockOutcome::Success
        );
        assert_eq!(
            mgr.lock(&b, key(b"\x05"), key(b"\x09"), false, Duration::ZERO)
                .unwrap(),
            LockOutcome::Success
        );
        assert_eq!(mgr.lock_count(), 2);
    }

    #[test]
    fn overlapping_reads_both_succeed_unmerged() {
        let mgr = LockManager::new();
        let a = LockOwner::new();
        let b = LockOwner::new();

        mgr.lock(&a, key(b"\x01"), key(b"\x05"), false, Duration::ZERO)
            .unwrap();
        mgr.lock(&b, key(b"\x03"), key(b"\x07"), false, Duration::ZERO)
            .unwrap();
        assert_eq!(mgr.lock_count(), 2);
    }

    #[test]
    fn same_owner_sequential_reads_merge() {
        let mgr = LockManager::new();
        let a = LockOwner::new();

        mgr.lock(&a, key(b"\x01"), key(b"\x05"), false, Duration::ZERO)
            .unwrap();
        mgr.lock(&a, key(b"\x05"), key(b"\x09"), false, Duration::ZERO)
            .unwrap();
        assert_eq!(mgr.lock_count(), 1);
    }

    #[test]
    fn write_blocks_conflicting_read_until_released() {
        let mgr = StdArc::new(LockManager::new());
        let a = LockOwner::new();
        let b = LockOwner::new();

        assert_eq!(
            mgr.lock(&a, key(b"\x01"), key(b"\x09"), true, Duration::ZERO)
                .unwrap(),
            LockOutcome::Success
        );

        let outcome = mgr
            .lock(&b, key(b"\x03"), key(b"\x05"), false, Duration::from_millis(50))
            .unwrap();
        assert_eq!(outcome, LockOutcome::WaitTimeoutExpired);

        assert_eq!(mgr.release(&a), ReleaseOutcome::Success);

        let outcome = mgr
            .lock(&b, key(b"\x03"), key(b"\x05"), false, Duration::from_millis(500))
            .unwrap();
        assert_eq!(outcome, LockOutcome::Success);
    }

    #[test]
    fn unbounded_write_blocks_everything() {
        let mgr = LockManager::new();
        let a = LockOwner::new();
        let b = LockOwner::new();

        mgr.lock(&a, None, None, true, Duration::ZERO).unwrap();
        let outcome = mgr
            .lock(&b, key(b"\x03"), key(b"\x05"), false, Duration::from_millis(20))
            .unwrap();
        assert_eq!(outcome, LockOutcome::WaitTimeoutExpired);

        mgr.release(&a);
        let outcome = mgr
            .lock(&b, key(b"\x03"), key(b"\x05"), false, Duration::from_millis(20))
            .unwrap();
        assert_eq!(outcome, LockOutcome::Success);
    }

    #[test]
    fn release_is_complete() {
        let mgr = LockManager::new();
        let a = LockOwner::new();

        mgr.lock(&a, key(b"\x01"), key(b"\x05"), true, Duration::ZERO)
            .unwrap();
        mgr.lock(&a, key(b"\x07"), key(b"\x09"), false, Duration::ZERO)
            .unwrap();
        assert_eq!(mgr.lock_count(), 2);

        mgr.release(&a);
        assert_eq!(mgr.lock_count(), 0);
    }

    #[test]
    fn invalid_range_is_rejected_without_side_effects() {
        let mgr = LockManager::new();
        let a = LockOwner::new();

        let err = mgr
            .lock(&a, key(b"\x09"), key(b"\x01"), false, Duration::ZERO)
            .unwrap_err();
        assert!(matches!(err, LockError::InvalidRange));
        assert_eq!(mgr.lock_count(), 0);
    }

    #[test]
    fn empty_range_always_succeeds() {
        let mgr = LockManager::new();
        let a = LockOwner::new();
        let b = LockOwner::new();

        mgr.lock(&a, key(b"\x05"), key(b"\x05"), true, Duration::ZERO)
            .unwrap();
        let outcome = mgr
            .lock(&b, key(b"\x05"), key(b"\x05"), true, Duration::ZERO)
            .unwrap();
        assert_eq!(outcome, LockOutcome::Success);
    }

    #[test]
    fn hold_timeout_forces_release_of_contested_owner() {
        let mgr = StdArc::new(LockManager::new());
        mgr.set_hold_timeout(Duration::from_millis(100));
        let a = LockOwner::new();
        let b = LockOwner::new();

        mgr.lock(&a, key(b"\x01"), key(b"\x09"), true, Duration::ZERO)
            .unwrap();

        let mgr2 = mgr.clone();
        let b2 = b;
        let handle = thread::spawn(move || {
            mgr2.lock(&b2, key(b"\x03"), key(b"\x05"), false, Duration::from_millis(2000))
        });

        let outcome = handle.join().unwrap().unwrap();
        assert_eq!(outcome, LockOutcome::Success);

        // A's next call observes the expired marker.
        let a_outcome = mgr
            .lock(&a, key(b"\x01"), key(b"\x02"), false, Duration::ZERO)
            .unwrap();
        assert_eq!(a_outcome, LockOutcome::HoldTimeoutExpired);
    }

    #[test]
    fn uncontested_owner_never_gets_hold_deadline() {
        let mgr = LockManager::new();
        mgr.set_hold_timeout(Duration::from_millis(50));
        let a = LockOwner::new();

        mgr.lock(&a, key(b"\x01"), key(b"\x09"), true, Duration::ZERO)
            .unwrap();
        thread::sleep(Duration::from_millis(150));

        // Nobody ever contested A's lock, so it is never force-released.
        assert_eq!(mgr.release(&a), ReleaseOutcome::Success);
    }

    #[test]
    fn release_clears_live_hold_deadline() {
        let mgr = StdArc::new(LockManager::new());
        mgr.set_hold_timeout(Duration::from_secs(10));
        let a = LockOwner::new();
        let b = LockOwner::new();

        mgr.lock(&a, key(b"\x01"), key(b"\x09"), true, Duration::ZERO)
            .unwrap();

        let mgr2 = mgr.clone();
        let handle = thread::spawn(move || {
            mgr2.lock(&b, key(b"\x03"), key(b"\x05"), false, Duration::from_millis(50))
        });
        handle.join().unwrap().unwrap();

        // B's attempt created a deadline entry for A even though it timed out.
        assert_eq!(mgr.release(&a), ReleaseOutcome::Success);
    }

    #[test]
    fn cancellation_aborts_the_wait() {
        let mgr = StdArc::new(LockManager::new());
        let a = LockOwner::new();
        let b = LockOwner::new();

        mgr.lock(&a, key(b"\x01"), key(b"\x09"), true, Duration::ZERO)
            .unwrap();

        let token = CancellationToken::new();
        let token2 = token.clone();
        let mgr2 = mgr.clone();
        let handle = thread::spawn(move || {
            mgr2.lock_cancellable(
                &b,
                key(b"\x03"),
                key(b"\x05"),
                false,
                Duration::from_secs(30),
                Some(&token2),
            )
        });

        thread::sleep(Duration::from_millis(30));
        token.cancel();
        let result = handle.join().unwrap();
        assert!(matches!(result, Err(LockError::Interrupted)));
        // The interrupted candidate must not have been inserted.
        assert_eq!(mgr.lock_count(), 1);
    }

    #[test]
    fn forget_clears_hold_deadline_without_touching_locks() {
        let mgr = StdArc::new(LockManager::new());
        mgr.set_hold_timeout(Duration::from_secs(10));
        let a = LockOwner::new();
        let b = LockOwner::new();

        mgr.lock(&a, key(b"\x01"), key(b"\x09"), true, Duration::ZERO)
            .unwrap();
        let mgr2 = mgr.clone();
        let handle = thread::spawn(move || {
            mgr2.lock(&b, key(b"\x03"), key(b"\x05"), false, Duration::from_millis(50))
        });
        handle.join().unwrap().unwrap();

        mgr.forget(&a);
        assert_eq!(mgr.lock_count(), 1);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;
        use std::collections::HashSet as StdHashSet;

        /// A small, closed alphabet of keys so ranges actually overlap and
        /// merge in interesting ways instead of almost always missing.
        const ALPHABET: [u8; 5] = [1, 2, 3, 4, 5];

        fn arb_endpoint() -> impl Strategy<Value = Option<Key>> {
            prop_oneof![
                Just(None),
                (0..ALPHABET.len()).prop_map(|i| Some(Key::copy_from_slice(&ALPHABET[i..i + 1]))),
            ]
        }

        #[derive(Clone, Debug)]
        enum Op {
            Lock { owner_idx: usize, min: Option<Key>, max: Option<Key>, write: bool },
            Release { owner_idx: usize },
        }

        fn arb_op() -> impl Strategy<Value = Op> {
            prop_oneof![
                3 => (0usize..3, arb_endpoint(), arb_endpoint(), any::<bool>())
                    .prop_map(|(owner_idx, a, b, write)| {
                        let (min, max) = match (&a, &b) {
                            (Some(x), Some(y)) if x > y => (b, a),
                            _ => (a, b),
                        };
                        Op::Lock { owner_idx, min, max, write }
                    }),
                1 => (0usize..3).prop_map(|owner_idx| Op::Release { owner_idx }),
            ]
        }

        fn check_invariants(mgr: &LockManager) {
            let (from_index, from_owners) = mgr.snapshot();

            // Index consistency: the index's population equals the union of
            // owners' per-owner sets (compared by id, since these are Arcs
            // over distinct allocations after merges).
            let index_ids: StdHashSet<u64> = from_index.iter().map(|r| r.id()).collect();
            let owner_ids: StdHashSet<u64> = from_owners.iter().map(|r| r.id()).collect();
            assert_eq!(index_ids, owner_ids, "index population must equal union of owner sets");

            // Merge soundness: no two records of the same owner overlap or
            // touch with the same mode (they would have been merged).
            for i in 0..from_owners.len() {
                for j in (i + 1)..from_owners.len() {
                    let a = &from_owners[i];
                    let b = &from_owners[j];
                    if a.owner == b.owner && a.mode == b.mode {
                        assert!(
                            a.merge_with(b).is_none(),
                            "same-owner same-mode records should have been merged: {:?} vs {:?}",
                            a,
                            b
                        );
                    }
                }
            }

            // Conflict soundness: no two records of different owners
            // conflict (overlap with at least one write).
            for i in 0..from_index.len() {
                for j in (i + 1)..from_index.len() {
                    let a = &from_index[i];
                    let b = &from_index[j];
                    assert!(
                        !a.conflicts_with(b),
                        "conflicting locks must not coexist: {:?} vs {:?}",
                        a,
                        b
                    );
                }
            }
        }

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(200))]

            #[test]
            fn invariants_hold_after_any_sequence_of_ops(ops in prop::collection::vec(arb_op(), 0..40)) {
                let mgr = LockManager::new();
                let owners: Vec<LockOwner> = (0..3).map(|_| LockOwner::new()).collect();

                for op in ops {
                    match op {
                        Op::Lock { owner_idx, min, max, write } => {
                            let _ = mgr.lock(&owners[owner_idx], min, max, write, Duration::ZERO);
                        }
                        Op::Release { owner_idx } => {
                            mgr.release(&owners[owner_idx]);
                        }
                    }
                    check_invariants(&mgr);
                }

                // Release completeness: after releasing everyone, the index
                // must be empty.
                for owner in &owners {
                    mgr.release(owner);
                }
                prop_assert_eq!(mgr.lock_count(), 0);
            }
        }
    }
}
