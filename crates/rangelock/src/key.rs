//! Lexicographic byte-key ordering and the half-open range endpoint types.
//!
//! A range is `[min, max)`: inclusive at `min`, exclusive at `max`. Either
//! endpoint may be absent — absent `min` means "from the smallest possible
//! key", absent `max` means "to beyond every key". `MinBound`/`MaxBound`
//! give those two "missing endpoint" conventions distinct, independently
//! orderable wrapper types so the lock index can keep two `BTreeMap`s over
//! the same population of records, one ordered by `min` and one by `max`.

use bytes::Bytes;
use std::cmp::Ordering;

/// A byte-sequence key. Cheaply cloneable.
pub type Key = Bytes;

/// Returns the smallest key strictly greater than `k`, under lexicographic
/// (byte-wise) ordering. Used to turn a strict `max > x` query into a
/// half-open `max >= next_key(x)` range query over an ordered set.
pub fn next_key(k: &[u8]) -> Key {
    let mut buf = Vec::with_capacity(k.len() + 1);
    buf.extend_from_slice(k);
    buf.push(0);
    Bytes::from(buf)
}

/// A `min` endpoint for ordering purposes: absent sorts before every real
/// key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MinBound(pub Option<Key>);

impl PartialOrd for MinBound {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MinBound {
    fn cmp(&self, other: &Self) -> Ordering {
        match (&self.0, &other.0) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (Some(a), Some(b)) => a.cmp(b),
        }
    }
}

/// A `max` endpoint for ordering purposes: absent sorts after every real
/// key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MaxBound(pub Option<Key>);

impl PartialOrd for MaxBound {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MaxBound {
    fn cmp(&self, other: &Self) -> Ordering {
        match (&self.0, &other.0) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (Some(a), Some(b)) => a.cmp(b),
        }
    }
}

/// `true` iff `min` (as a min-endpoint) is strictly less than `max` (as a
/// max-endpoint) under the half-open conventions above: absent-min is
/// `-inf`, absent-max is `+inf`.
pub fn min_lt_max(min: &Option<Key>, max: &Option<Key>) -> bool {
    match (min, max) {
        (_, None) => true,
        (None, Some(_)) => true,
        (Some(m), Some(x)) => m < x,
    }
}

/// The smaller of two min-endpoints (absent wins, since it represents
/// `-inf`).
pub fn union_min(a: &Option<Key>, b: &Option<Key>) -> Option<Key> {
    match (a, b) {
        (None, _) | (_, None) => None,
        (Some(x), Some(y)) => Some(if x <= y { x.clone() } else { y.clone() }),
    }
}

/// The larger of two max-endpoints (absent wins, since it represents
/// `+inf`).
pub fn union_max(a: &Option<Key>, b: &Option<Key>) -> Option<Key> {
    match (a, b) {
        (None, _) | (_, None) => None,
        (Some(x), Some(y)) => Some(if x >= y { x.clone() } else { y.clone() }),
    }
}
