//! Persistent hash array mapped trie.
//!
//! A [`Hamt`] is an immutable map: every update returns a new map value that
//! shares as much of the existing trie as possible with its input. Cloning a
//! map is O(1), and any number of threads may traverse the same node graph
//! concurrently since no node is ever mutated after it is published.
//!
//! The trie has a fan-out of 32, indexed by 5-bit slices of a 32-bit mixed
//! hash. Besides the usual map operations, it supports a structural
//! [`merge`](Hamt::merge) whose cost scales with the difference between the
//! two maps rather than with their total size.

mod bitmap;
mod hamt;
mod hash;
mod helper;
mod node;
mod operation;
mod sharedref;

#[cfg(any(test, feature = "property-test-api"))]
pub mod property;

pub use hamt::{Hamt, HamtIter, IterKeys, IterValues};
pub use hash::{mix, Hash, HashedKey, Hasher};
pub use operation::{RemoveError, ReplaceError, UpdateError};
