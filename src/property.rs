//! Generation strategies for property tests.

use crate::hash::{Hash, Hasher};
use crate::Hamt;
use proptest::collection::vec;
use proptest::prelude::*;
use std::fmt::Debug;

/// Strategy building a map out of up to `max_len` generated entries.
///
/// Duplicate keys collapse through the usual replace-on-insert semantics,
/// so the resulting map may be smaller than the generated entry list.
pub fn arbitrary_hamt<H, K, V>(
    keys: impl Strategy<Value = K>,
    values: impl Strategy<Value = V>,
    max_len: usize,
) -> impl Strategy<Value = Hamt<H, K, V>>
where
    H: Hasher + Default + Debug,
    K: Eq + Hash + Clone + Debug,
    V: Clone + Debug,
{
    vec((keys, values), 0..=max_len).prop_map(|entries| entries.into_iter().collect())
}
