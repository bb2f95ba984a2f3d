#![warn(missing_docs)]

//! Range lock manager: mediates concurrent access to a single ordered
//! byte-keyed key/value store by issuing read (shared) and write
//! (exclusive) locks over half-open key ranges.
//!
//! The manager does no I/O on the store itself; it only arbitrates lock
//! ownership so that callers who honor the protocol — read lock before
//! reading a range, write lock before writing it — get serializable
//! access. See `LockManager` for the entry point.

/// Cooperative cancellation for a thread blocked inside `lock`.
pub mod cancel;
/// Argument-precondition and interruption errors.
pub mod error;
/// The dual ordered index over outstanding lock records.
pub mod index;
/// Lexicographic byte-key ordering and half-open range endpoints.
pub mod key;
/// The conflict/merge engine and wait/retry loop.
pub mod manager;
/// Lock owner identity.
pub mod owner;
/// Immutable lock record values and their conflict/merge predicates.
pub mod record;
/// Outcome enums for `lock` and `release`.
pub mod result;

pub use cancel::CancellationToken;
pub use error::LockError;
pub use index::LockIndex;
pub use key::{next_key, Key};
pub use manager::LockManager;
pub use owner::LockOwner;
pub use record::{LockMode, LockRecord};
pub use result::{LockOutcome, ReleaseOutcome};
