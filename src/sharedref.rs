//! Sharing primitive for trie nodes.
//!
//! Nodes are immutable once published, so sharing them between maps and
//! across threads is plain atomic reference counting. Pointer identity
//! doubles as the structural-sharing fast path: two handles comparing equal
//! under `SharedRef::ptr_eq` are known to hold the same subtree without
//! looking at it.

pub type SharedRef<T> = std::sync::Arc<T>;
