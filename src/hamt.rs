use super::hash::{Hash, HashedKey, Hasher};
use super::node::{
    filter_rec, insert_rec, lookup_one, merge_rec, remove_match_rec, remove_rec, replace_rec,
    replace_with_rec, split_node, update_rec, LookupRet, Merger, Node,
};
pub use super::operation::{RemoveError, ReplaceError, UpdateError};
use std::borrow::Borrow;
use std::cmp;
use std::convert::Infallible;
use std::error::Error;
use std::fmt::Debug;
use std::iter::FromIterator;
use std::marker::PhantomData;
use std::mem::swap;
use std::slice;

/// A persistent map from keys to values, indexed by a 32-bit mixed hash.
///
/// Every update returns a new map sharing as much of the trie as possible
/// with its input; cloning is O(1) and never copies entries.
#[derive(Debug)]
pub struct Hamt<H: Hasher + Default, K: PartialEq + Eq + Hash, V> {
    root: Node<K, V>,
    hasher: PhantomData<H>,
}

pub struct HamtIter<'a, K, V> {
    stack: Vec<slice::Iter<'a, Node<K, V>>>,
    content: Option<slice::Iter<'a, (K, V)>>,
}

pub type IterKeys<'a, K, V> = std::iter::Map<HamtIter<'a, K, V>, fn((&'a K, &'a V)) -> &'a K>;
pub type IterValues<'a, K, V> = std::iter::Map<HamtIter<'a, K, V>, fn((&'a K, &'a V)) -> &'a V>;

impl<H: Hasher + Default, K: Eq + Hash, V> Clone for Hamt<H, K, V> {
    fn clone(&self) -> Self {
        Hamt {
            root: self.root.clone(),
            hasher: PhantomData,
        }
    }
}

impl<H: Hasher + Default, K: Eq + Hash, V> Default for Hamt<H, K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: Hasher + Default, K: Eq + Hash, V> Hamt<H, K, V> {
    pub fn new() -> Self {
        Hamt {
            root: Node::Empty,
            hasher: PhantomData,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    /// Number of entries. The count is kept on the nodes, so this is O(1).
    pub fn size(&self) -> usize {
        self.root.size()
    }
}

impl<H: Hasher + Default, K: Clone + Eq + Hash, V: Clone> Hamt<H, K, V> {
    /// Add or replace the value at the key, returning the new map.
    pub fn insert(&self, k: K, v: V) -> Self {
        let h = HashedKey::compute(self.hasher, &k);
        let root = match insert_rec(
            &self.root,
            h,
            0,
            k,
            v,
            Merger::<_, _, Infallible>::prefer_right(),
        ) {
            Ok(root) => root,
            Err(e) => match e {},
        };
        Hamt {
            root,
            hasher: PhantomData,
        }
    }

    /// Add the entry, resolving a conflict on an already-present key with
    /// the callback. The callback sees the existing entry first and the
    /// incoming entry second; its error is returned unchanged.
    pub fn insert_with<F, E>(&self, k: K, v: V, f: F) -> Result<Self, E>
    where
        F: Fn((&K, &V), (&K, &V)) -> Result<(K, V), E>,
    {
        let h = HashedKey::compute(self.hasher, &k);
        let root = insert_rec(&self.root, h, 0, k, v, Merger::from_fn(&f))?;
        Ok(Hamt {
            root,
            hasher: PhantomData,
        })
    }

    /// Remove the key, returning the new map. Removing an absent key
    /// returns the map unchanged.
    pub fn remove<Q>(&self, k: &Q) -> Self
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let h = HashedKey::compute(self.hasher, k);
        let root = remove_rec(&self.root, h, 0, k);
        Hamt {
            root,
            hasher: PhantomData,
        }
    }
}

impl<H: Hasher + Default, K: Eq + Hash + Clone, V: PartialEq + Clone> Hamt<H, K, V> {
    /// Remove the key only if its value matches the expected one.
    pub fn remove_match<Q>(&self, k: &Q, v: &V) -> Result<Self, RemoveError>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let h = HashedKey::compute(self.hasher, k);
        let root = remove_match_rec(&self.root, h, 0, k, v)?;
        Ok(Hamt {
            root,
            hasher: PhantomData,
        })
    }
}

impl<H: Hasher + Default, K: Eq + Hash + Clone, V: Clone> Hamt<H, K, V> {
    /// Replace the element at the key by v and return the new tree
    /// and the old value.
    pub fn replace(&self, k: &K, v: V) -> Result<(Self, V), ReplaceError> {
        let h = HashedKey::compute(self.hasher, k);
        let (root, oldv) = replace_rec(&self.root, h, 0, k, v)?;
        Ok((
            Hamt {
                root,
                hasher: PhantomData,
            },
            oldv,
        ))
    }

    /// Replace the element at the key by the result of the callback on the
    /// old value.
    pub fn replace_with<F>(&self, k: &K, f: F) -> Result<Self, ReplaceError>
    where
        F: FnOnce(&V) -> V,
    {
        let h = HashedKey::compute(self.hasher, k);
        let root = replace_with_rec(&self.root, h, 0, k, f)?;
        Ok(Hamt {
            root,
            hasher: PhantomData,
        })
    }

    /// Update the element at the key K.
    ///
    /// If the closure F in parameter returns None, then the key is deleted.
    ///
    /// If the key is not present then UpdateError::KeyNotFound is returned.
    pub fn update<F, E>(&self, k: &K, f: F) -> Result<Self, UpdateError<E>>
    where
        F: FnOnce(&V) -> Result<Option<V>, E>,
        E: Error + Debug + 'static,
    {
        let h = HashedKey::compute(self.hasher, k);
        let root = update_rec(&self.root, h, 0, k, f)?;
        Ok(Hamt {
            root,
            hasher: PhantomData,
        })
    }

    /// Keep the entries satisfying the predicate.
    pub fn filter<F: Fn(&K, &V) -> bool>(&self, f: F) -> Self {
        self.filter_impl(&f, false)
    }

    /// Keep the entries rejected by the predicate.
    pub fn filter_not<F: Fn(&K, &V) -> bool>(&self, f: F) -> Self {
        self.filter_impl(&f, true)
    }

    fn filter_impl<F: Fn(&K, &V) -> bool>(&self, f: &F, negate: bool) -> Self {
        // room for the survivors of every level of the deepest spine
        let mut buffer = Vec::with_capacity(cmp::min(self.size() + 6, 32 * 7));
        let root = match filter_rec(&self.root, f, negate, &mut buffer) {
            None => Node::Empty,
            Some(root) => root,
        };
        Hamt {
            root,
            hasher: PhantomData,
        }
    }

    /// Union of both maps. A key present on both sides keeps the value of
    /// `self`. Subtrees the two maps already share are reused as-is, so the
    /// cost scales with the difference between the maps, not their size.
    pub fn merge(&self, other: &Self) -> Self {
        let root = match merge_rec(
            &self.root,
            &other.root,
            0,
            Merger::<_, _, Infallible>::prefer_left(),
        ) {
            Ok(root) => root,
            Err(e) => match e {},
        };
        Hamt {
            root,
            hasher: PhantomData,
        }
    }

    /// Union of both maps, resolving a key present on both sides with the
    /// callback. The callback always sees this map's entry first; its error
    /// is returned unchanged.
    pub fn merge_with<F, E>(&self, other: &Self, f: F) -> Result<Self, E>
    where
        F: Fn((&K, &V), (&K, &V)) -> Result<(K, V), E>,
    {
        let root = merge_rec(&self.root, &other.root, 0, Merger::from_fn(&f))?;
        Ok(Hamt {
            root,
            hasher: PhantomData,
        })
    }

    /// Break the map into one or two submaps whose union is the original.
    /// The partition is implementation-defined but stable for a given
    /// structure.
    pub fn split(&self) -> Vec<Self> {
        split_node(&self.root)
            .into_iter()
            .map(|root| Hamt {
                root,
                hasher: PhantomData,
            })
            .collect()
    }
}

impl<H: Hasher + Default, K: Eq + Hash, V> Hamt<H, K, V> {
    /// Try to get the element related to key K.
    pub fn lookup<Q>(&self, k: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let h = HashedKey::compute(self.hasher, k);
        let mut n = &self.root;
        let mut lvl = 0;
        loop {
            match lookup_one(n, h, lvl, k) {
                LookupRet::NotFound => return None,
                LookupRet::Found(v) => return Some(v),
                LookupRet::ContinueIn(subnode) => {
                    lvl += 1;
                    n = subnode;
                }
            }
        }
    }

    /// Check if the key is contained into the HAMT.
    pub fn contains_key<Q>(&self, k: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.lookup(k).is_some()
    }

    pub fn iter(&self) -> HamtIter<K, V> {
        HamtIter {
            stack: vec![slice::from_ref(&self.root).iter()],
            content: None,
        }
    }

    pub fn keys(&self) -> IterKeys<'_, K, V> {
        self.iter().map(|(k, _)| k)
    }

    pub fn values(&self) -> IterValues<'_, K, V> {
        self.iter().map(|(_, v)| v)
    }
}

impl<'a, K, V> Iterator for HamtIter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let mut x = None;
            swap(&mut self.content, &mut x);
            match x {
                Some(mut iter) => match iter.next() {
                    None => self.content = None,
                    Some(o) => {
                        self.content = Some(iter);
                        return Some((&o.0, &o.1));
                    }
                },
                None => match self.stack.last_mut() {
                    None => return None,
                    Some(last) => match last.next() {
                        None => {
                            self.stack.pop();
                        }
                        Some(next) => match next {
                            Node::Empty => {}
                            Node::Leaf(l) => return Some((&l.key, &l.value)),
                            Node::Collision(c) => self.content = Some(c.iter()),
                            Node::Trie(t) => self.stack.push(t.children.iter()),
                        },
                    },
                },
            }
        }
    }
}

impl<H: Default + Hasher, K: Eq + Hash + Clone, V: Clone> FromIterator<(K, V)> for Hamt<H, K, V> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut h = Hamt::new();
        for (k, v) in iter {
            h = h.insert(k, v);
        }
        h
    }
}

impl<H: Default + Hasher, K: Eq + Hash, V: PartialEq> PartialEq for Hamt<H, K, V> {
    fn eq(&self, other: &Self) -> bool {
        // sizes are O(1), compare them first
        if self.size() != other.size() {
            return false;
        }
        for (k, v) in self.iter() {
            match other.lookup(k) {
                Some(v2) if v == v2 => {}
                _ => return false,
            }
        }
        true
    }
}

impl<H: Default + Hasher, K: Eq + Hash, V: Eq> Eq for Hamt<H, K, V> {}

impl<'a, H: Default + Hasher, K: Eq + Hash, V> IntoIterator for &'a Hamt<H, K, V> {
    type Item = (&'a K, &'a V);

    type IntoIter = HamtIter<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property::arbitrary_hamt;
    use proptest::prelude::*;
    use std::collections::hash_map::DefaultHasher;
    use std::collections::HashMap;
    use test_strategy::proptest;
    use thiserror::Error;

    type M = Hamt<DefaultHasher, u32, u32>;

    #[derive(Debug, Clone, PartialEq, Eq, Error)]
    #[error("test failure")]
    struct TestError;

    /// A key with a controllable raw hash, to force full 32-bit collisions.
    #[derive(Debug, Clone, PartialEq, Eq)]
    struct CollidingKey {
        id: u32,
        forced_hash: u32,
    }

    impl CollidingKey {
        const fn new(id: u32, forced_hash: u32) -> Self {
            CollidingKey { id, forced_hash }
        }
    }

    impl Hash for CollidingKey {
        fn hash<S: Hasher>(&self, state: &mut S) {
            state.write_u32(self.forced_hash);
        }
    }

    type CM = Hamt<DefaultHasher, CollidingKey, u32>;

    fn hashes_below<K, V>(node: &Node<K, V>, out: &mut Vec<HashedKey>) {
        match node {
            Node::Empty => {}
            Node::Leaf(l) => out.push(l.hash),
            Node::Collision(c) => out.extend(std::iter::repeat(c.hash).take(c.len())),
            Node::Trie(t) => {
                for child in t.children.iter() {
                    hashes_below(child, out);
                }
            }
        }
    }

    // walk a node verifying every structural invariant, returning its size
    fn check_node<K, V>(node: &Node<K, V>, lvl: usize) -> usize {
        match node {
            Node::Empty => 0,
            Node::Leaf(_) => 1,
            Node::Collision(c) => {
                assert!(c.len() >= 2);
                c.len()
            }
            Node::Trie(t) => {
                assert_eq!(t.bitmap.present(), t.children.len());
                assert!(t.children.len() >= 2 || t.children[0].is_trie());
                let mut sum = 0;
                for (child, idx) in t.children.iter().zip(t.bitmap.iter()) {
                    assert!(!child.is_empty());
                    let mut hs = Vec::new();
                    hashes_below(child, &mut hs);
                    for h in hs {
                        assert_eq!(h.level_index(lvl), idx);
                    }
                    sum += check_node(child, lvl + 1);
                }
                assert_eq!(sum, t.size);
                assert!(t.size >= 2);
                sum
            }
        }
    }

    fn check_map<H: Hasher + Default, K: Eq + Hash, V>(m: &Hamt<H, K, V>) {
        assert_eq!(check_node(&m.root, 0), m.size());
    }

    // number of nodes of `new` not shared with `old`
    fn fresh_nodes<K, V>(old: &Node<K, V>, new: &Node<K, V>) -> usize {
        if new.ptr_eq(old) {
            return 0;
        }
        match (old, new) {
            (Node::Trie(to), Node::Trie(tn)) => {
                let mut count = 1;
                for (child, idx) in tn.children.iter().zip(tn.bitmap.iter()) {
                    let opos = to.bitmap.get_index_sparse(idx);
                    if opos.is_not_found() {
                        count += 1;
                    } else {
                        count += fresh_nodes(&to.children[opos.get_found()], child);
                    }
                }
                count
            }
            _ => 1,
        }
    }

    #[test]
    fn empty_map() {
        let m = M::new();
        assert!(m.is_empty());
        assert_eq!(m.size(), 0);
        assert_eq!(m.lookup(&1), None);
        assert!(!m.contains_key(&1));
        assert_eq!(m.iter().count(), 0);
        assert!(m.remove(&1).is_empty());
        check_map(&m);
    }

    #[test]
    fn insert_lookup() {
        let m = M::new().insert(1, 10).insert(2, 20).insert(3, 30);
        assert_eq!(m.size(), 3);
        assert_eq!(m.lookup(&1), Some(&10));
        assert_eq!(m.lookup(&2), Some(&20));
        assert_eq!(m.lookup(&3), Some(&30));
        assert_eq!(m.lookup(&4), None);
        check_map(&m);
    }

    #[test]
    fn insert_replaces_existing() {
        let m = M::new().insert(1, 10);
        let m2 = m.insert(1, 11);
        assert_eq!(m2.size(), 1);
        assert_eq!(m2.lookup(&1), Some(&11));
        // the original map is untouched
        assert_eq!(m.lookup(&1), Some(&10));
    }

    #[test]
    fn insert_idempotent() {
        let m: M = (0..50u32).map(|i| (i, i)).collect();
        let m1 = m.insert(7, 777);
        let m2 = m1.insert(7, 777);
        assert_eq!(m1, m2);
        check_map(&m2);
    }

    #[test]
    fn insert_with_resolves() {
        let m = M::new().insert(1, 10);
        let m2 = m
            .insert_with(1, 5, |(k, v1), (_, v2)| {
                Ok::<_, Infallible>((*k, *v1 + *v2))
            })
            .unwrap();
        assert_eq!(m2.lookup(&1), Some(&15));
        // absent key: the callback is not consulted
        let m3 = m
            .insert_with(2, 20, |_, _| Err(TestError))
            .unwrap();
        assert_eq!(m3.lookup(&2), Some(&20));
    }

    #[test]
    fn remove_present_and_absent() {
        let m: M = (0..20u32).map(|i| (i, i * 2)).collect();
        let m2 = m.remove(&7);
        assert_eq!(m2.size(), 19);
        assert_eq!(m2.lookup(&7), None);
        assert_eq!(m.lookup(&7), Some(&14));
        // absent key shares the whole trie
        let m3 = m.remove(&100);
        assert!(m3.root.ptr_eq(&m.root));
        check_map(&m2);
    }

    #[test]
    fn remove_down_to_empty() {
        let mut m: M = (0..16u32).map(|i| (i, i)).collect();
        for i in 0..16u32 {
            m = m.remove(&i);
            check_map(&m);
        }
        assert!(m.is_empty());
    }

    #[test]
    fn remove_match_errors() {
        let m = M::new().insert(1, 10);
        assert_eq!(m.remove_match(&2, &10), Err(RemoveError::KeyNotFound));
        assert_eq!(m.remove_match(&1, &11), Err(RemoveError::ValueNotMatching));
        let m2 = m.remove_match(&1, &10).unwrap();
        assert!(m2.is_empty());
    }

    #[test]
    fn replace_and_replace_with() {
        let m = M::new().insert(1, 10).insert(2, 20);
        let (m2, old) = m.replace(&1, 11).unwrap();
        assert_eq!(old, 10);
        assert_eq!(m2.lookup(&1), Some(&11));
        assert_eq!(m.replace(&9, 0), Err(ReplaceError::KeyNotFound));

        let m3 = m.replace_with(&2, |v| v + 1).unwrap();
        assert_eq!(m3.lookup(&2), Some(&21));
        assert_eq!(
            m.replace_with(&9, |v| *v),
            Err(ReplaceError::KeyNotFound)
        );
    }

    #[test]
    fn update_changes_deletes_and_fails() {
        let m = M::new().insert(1, 10).insert(2, 20);
        let m2 = m.update(&1, |v| Ok::<_, TestError>(Some(v + 1))).unwrap();
        assert_eq!(m2.lookup(&1), Some(&11));

        let m3 = m.update(&1, |_| Ok::<_, TestError>(None)).unwrap();
        assert_eq!(m3.size(), 1);
        assert_eq!(m3.lookup(&1), None);
        check_map(&m3);

        assert_eq!(
            m.update(&9, |v| Ok::<_, TestError>(Some(*v))),
            Err(UpdateError::KeyNotFound)
        );
        assert_eq!(
            m.update(&1, |_| Err(TestError)),
            Err(UpdateError::ValueCallbackError(TestError))
        );
    }

    #[test]
    fn persistence_across_updates() {
        let m1: M = (0..100u32).map(|i| (i, i)).collect();
        let before: Vec<(u32, u32)> = {
            let mut v: Vec<_> = m1.iter().map(|(k, v)| (*k, *v)).collect();
            v.sort_unstable();
            v
        };
        let _m2 = m1.insert(1000, 1);
        let _m3 = m1.remove(&50);
        let _m4 = m1.insert(50, 999);
        let after: Vec<(u32, u32)> = {
            let mut v: Vec<_> = m1.iter().map(|(k, v)| (*k, *v)).collect();
            v.sort_unstable();
            v
        };
        assert_eq!(before, after);
        assert_eq!(m1.lookup(&50), Some(&50));
        assert_eq!(m1.size(), 100);
    }

    #[test]
    fn structural_sharing_on_insert() {
        let m: M = (0..1000u32).map(|i| (i, i)).collect();
        let m2 = m.insert(1000, 1000);
        // only the spine down to the new leaf is rebuilt; a 7-level trie
        // bounds that spine
        let fresh = fresh_nodes(&m.root, &m2.root);
        assert!(fresh >= 1 && fresh <= 8, "fresh = {}", fresh);
        check_map(&m2);
    }

    #[test]
    fn deterministic_iteration() {
        let asc: M = (0..200u32).map(|i| (i, i)).collect();
        let desc: M = (0..200u32).rev().map(|i| (i, i)).collect();
        let a: Vec<(u32, u32)> = asc.iter().map(|(k, v)| (*k, *v)).collect();
        let b: Vec<(u32, u32)> = desc.iter().map(|(k, v)| (*k, *v)).collect();
        assert_eq!(a, b);
    }

    #[test]
    fn keys_and_values_follow_iter() {
        let m: M = (0..10u32).map(|i| (i, i + 100)).collect();
        let ks: Vec<u32> = m.keys().copied().collect();
        let vs: Vec<u32> = m.values().copied().collect();
        let kvs: Vec<(u32, u32)> = m.iter().map(|(k, v)| (*k, *v)).collect();
        assert_eq!(ks, kvs.iter().map(|(k, _)| *k).collect::<Vec<_>>());
        assert_eq!(vs, kvs.iter().map(|(_, v)| *v).collect::<Vec<_>>());
    }

    #[test]
    fn filter_partitions() {
        let m: M = (0..100u32).map(|i| (i, i)).collect();
        let even = m.filter(|k, _| k % 2 == 0);
        let odd = m.filter_not(|k, _| k % 2 == 0);
        assert_eq!(even.size(), 50);
        assert_eq!(odd.size(), 50);
        assert_eq!(even.merge(&odd), m);
        check_map(&even);
        check_map(&odd);

        // keeping everything shares the root, dropping everything is empty
        let all = m.filter(|_, _| true);
        assert!(all.root.ptr_eq(&m.root));
        assert!(m.filter(|_, _| false).is_empty());
    }

    #[test]
    fn merge_with_empty_shares_root() {
        let m: M = (0..50u32).map(|i| (i, i)).collect();
        let e = M::new();
        assert!(m.merge(&e).root.ptr_eq(&m.root));
        assert!(e.merge(&m).root.ptr_eq(&m.root));
    }

    #[test]
    fn self_merge_is_identity() {
        let leaf = M::new().insert(1, 1);
        assert!(leaf.merge(&leaf).root.ptr_eq(&leaf.root));

        let m: M = (0..100u32).map(|i| (i, i)).collect();
        assert!(m.merge(&m).root.ptr_eq(&m.root));
    }

    #[test]
    fn self_merge_with_sum_resolver() {
        let leaf = M::new().insert(1, 1);
        let merged = leaf
            .merge_with(&leaf, |(k, v1), (_, v2)| {
                Ok::<_, Infallible>((*k, *v1 + *v2))
            })
            .unwrap();
        assert_eq!(merged.size(), 1);
        assert_eq!(merged.lookup(&1), Some(&2));
    }

    #[test]
    fn merge_prefers_left() {
        let a = M::new().insert(1, 1).insert(2, 2);
        let b = M::new().insert(2, 20).insert(3, 30);
        let m = a.merge(&b);
        assert_eq!(m.size(), 3);
        assert_eq!(m.lookup(&1), Some(&1));
        assert_eq!(m.lookup(&2), Some(&2));
        assert_eq!(m.lookup(&3), Some(&30));
    }

    #[test]
    fn merge_resolver_sees_left_first() {
        let a = M::new().insert(1, 100);
        let b = M::new().insert(1, 7);
        // keep the pair as (left, right) to observe the order
        let m = a
            .merge_with(&b, |(k, v1), (_, v2)| {
                Ok::<_, Infallible>((*k, *v1 * 1000 + *v2))
            })
            .unwrap();
        assert_eq!(m.lookup(&1), Some(&100_007));
        // and flipped operands flip the observed order
        let m2 = b
            .merge_with(&a, |(k, v1), (_, v2)| {
                Ok::<_, Infallible>((*k, *v1 * 1000 + *v2))
            })
            .unwrap();
        assert_eq!(m2.lookup(&1), Some(&7_100));
    }

    #[test]
    fn merge_shares_untouched_subtrees() {
        let base: M = (0..1000u32).map(|i| (i, i)).collect();
        let extra = M::new().insert(5000, 1);
        let m = base.merge(&extra);
        assert_eq!(m.size(), 1001);
        let fresh = fresh_nodes(&base.root, &m.root);
        assert!(fresh <= 8, "fresh = {}", fresh);
    }

    #[test]
    fn colliding_keys_basics() {
        let k1 = CollidingKey::new(1, 0xdead_beef);
        let k2 = CollidingKey::new(2, 0xdead_beef);
        let k3 = CollidingKey::new(3, 0xdead_beef);
        let m: CM = CM::new()
            .insert(k1.clone(), 10)
            .insert(k2.clone(), 20)
            .insert(k3.clone(), 30);
        assert_eq!(m.size(), 3);
        assert_eq!(m.lookup(&k1), Some(&10));
        assert_eq!(m.lookup(&k2), Some(&20));
        assert_eq!(m.lookup(&k3), Some(&30));
        check_map(&m);

        // removal demotes the bucket step by step
        let m2 = m.remove(&k2);
        assert_eq!(m2.size(), 2);
        assert_eq!(m2.lookup(&k2), None);
        assert_eq!(m2.lookup(&k3), Some(&30));
        let m3 = m2.remove(&k1).remove(&k3);
        assert!(m3.is_empty());
        check_map(&m2);
    }

    #[test]
    fn colliding_keys_next_to_plain_ones() {
        let k1 = CollidingKey::new(1, 77);
        let k2 = CollidingKey::new(2, 77);
        let mut m = CM::new().insert(k1.clone(), 1).insert(k2.clone(), 2);
        for i in 10..40 {
            m = m.insert(CollidingKey::new(i, i), i);
        }
        assert_eq!(m.size(), 32);
        assert_eq!(m.lookup(&k1), Some(&1));
        assert_eq!(m.lookup(&k2), Some(&2));
        check_map(&m);
    }

    #[test]
    fn merge_of_colliding_leaves() {
        let k1 = CollidingKey::new(1, 0xcafe);
        let k2 = CollidingKey::new(2, 0xcafe);
        let m1 = CM::new().insert(k1.clone(), 1);
        let m2 = CM::new().insert(k2.clone(), 1);
        let merged = m1.merge(&m2);
        assert_eq!(merged.size(), 2);
        assert_eq!(merged.lookup(&k1), Some(&1));
        assert_eq!(merged.lookup(&k2), Some(&1));
        check_map(&merged);

        // the keys are unequal, so a failing resolver must never run
        let merged2 = m1
            .merge_with(&m2, |_, _| Err::<(CollidingKey, u32), _>(TestError))
            .unwrap();
        assert_eq!(merged2, merged);
    }

    #[test]
    fn filter_collision_bucket() {
        let keys: Vec<CollidingKey> = (0..4).map(|i| CollidingKey::new(i, 0xaaaa)).collect();
        let m: CM = keys.iter().map(|k| (k.clone(), k.id)).collect();
        let kept = m.filter(|k, _| k.id % 2 == 0);
        assert_eq!(kept.size(), 2);
        check_map(&kept);
        let one = m.filter(|k, _| k.id == 3);
        assert_eq!(one.size(), 1);
        check_map(&one);
    }

    #[test]
    fn split_of_small_maps() {
        assert_eq!(M::new().split().len(), 1);
        let single = M::new().insert(1, 1);
        let parts = single.split();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0], single);
    }

    #[test]
    fn split_collision_bucket() {
        let keys: Vec<CollidingKey> = (0..3).map(|i| CollidingKey::new(i, 0xbbbb)).collect();
        let m: CM = keys.iter().map(|k| (k.clone(), k.id)).collect();
        let parts = m.split();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts.iter().map(Hamt::size).sum::<usize>(), 3);
        for p in &parts {
            check_map(p);
        }
        assert_eq!(parts[0].merge(&parts[1]), m);
    }

    #[proptest]
    fn prop_reference_parity(
        #[strategy(proptest::collection::vec((any::<u16>(), any::<u32>(), any::<bool>()), 0..200))]
        ops: Vec<(u16, u32, bool)>,
    ) {
        let mut m: Hamt<DefaultHasher, u16, u32> = Hamt::new();
        let mut reference: HashMap<u16, u32> = HashMap::new();
        for (k, v, insert) in ops {
            if insert {
                m = m.insert(k, v);
                reference.insert(k, v);
            } else {
                m = m.remove(&k);
                reference.remove(&k);
            }
        }
        prop_assert_eq!(m.size(), reference.len());
        for (k, v) in reference.iter() {
            prop_assert_eq!(m.lookup(k), Some(v));
        }
        for (k, v) in m.iter() {
            prop_assert_eq!(reference.get(k), Some(v));
        }
        check_map(&m);
    }

    #[proptest]
    fn prop_size_matches_iteration(
        #[strategy(arbitrary_hamt(any::<u16>(), any::<u32>(), 100))] m: Hamt<
            DefaultHasher,
            u16,
            u32,
        >,
    ) {
        prop_assert_eq!(m.size(), m.iter().count());
        check_map(&m);
    }

    #[proptest]
    fn prop_remove_undoes_insert(
        #[strategy(arbitrary_hamt(any::<u16>(), any::<u32>(), 100))] m: Hamt<
            DefaultHasher,
            u16,
            u32,
        >,
        k: u16,
        v: u32,
    ) {
        let base = m.remove(&k);
        let inserted = base.insert(k, v);
        prop_assert_eq!(inserted.remove(&k), base.clone());
        check_map(&inserted);
    }

    #[proptest]
    fn prop_merge_matches_reference(
        #[strategy(arbitrary_hamt(any::<u8>(), any::<u32>(), 60))] a: Hamt<DefaultHasher, u8, u32>,
        #[strategy(arbitrary_hamt(any::<u8>(), any::<u32>(), 60))] b: Hamt<DefaultHasher, u8, u32>,
    ) {
        let merged = a.merge(&b);
        let mut reference: HashMap<u8, u32> = b.iter().map(|(k, v)| (*k, *v)).collect();
        for (k, v) in a.iter() {
            reference.insert(*k, *v);
        }
        prop_assert_eq!(merged.size(), reference.len());
        for (k, v) in merged.iter() {
            prop_assert_eq!(reference.get(k), Some(v));
        }
        check_map(&merged);
    }

    #[proptest]
    fn prop_merge_associative(
        #[strategy(arbitrary_hamt(any::<u8>(), any::<u32>(), 40))] a: Hamt<DefaultHasher, u8, u32>,
        #[strategy(arbitrary_hamt(any::<u8>(), any::<u32>(), 40))] b: Hamt<DefaultHasher, u8, u32>,
        #[strategy(arbitrary_hamt(any::<u8>(), any::<u32>(), 40))] c: Hamt<DefaultHasher, u8, u32>,
    ) {
        prop_assert_eq!(a.merge(&b).merge(&c), a.merge(&b.merge(&c)));
    }

    #[proptest]
    fn prop_merge_identity(
        #[strategy(arbitrary_hamt(any::<u16>(), any::<u32>(), 80))] m: Hamt<
            DefaultHasher,
            u16,
            u32,
        >,
    ) {
        let e = Hamt::new();
        prop_assert!(m.merge(&e).root.ptr_eq(&m.root));
        prop_assert!(e.merge(&m).root.ptr_eq(&m.root));
        prop_assert!(m.merge(&m).root.ptr_eq(&m.root));
    }

    #[proptest]
    fn prop_split_unions_back(
        #[strategy(arbitrary_hamt(any::<u16>(), any::<u32>(), 100))] m: Hamt<
            DefaultHasher,
            u16,
            u32,
        >,
    ) {
        let parts = m.split();
        prop_assert!(parts.len() == 1 || parts.len() == 2);
        prop_assert_eq!(parts.iter().map(Hamt::size).sum::<usize>(), m.size());
        let mut acc = Hamt::new();
        for p in &parts {
            check_map(p);
            acc = acc.merge(p);
        }
        prop_assert_eq!(acc, m);
    }

    #[proptest]
    fn prop_filter_partition(
        #[strategy(arbitrary_hamt(any::<u16>(), any::<u32>(), 100))] m: Hamt<
            DefaultHasher,
            u16,
            u32,
        >,
    ) {
        let yes = m.filter(|k, _| k % 3 == 0);
        let no = m.filter_not(|k, _| k % 3 == 0);
        prop_assert_eq!(yes.size() + no.size(), m.size());
        prop_assert_eq!(yes.merge(&no), m.clone());
        check_map(&yes);
        check_map(&no);
    }

    #[proptest]
    fn prop_iteration_deterministic(
        #[strategy(proptest::collection::vec((any::<u16>(), any::<u32>()), 0..100))] entries: Vec<
            (u16, u32),
        >,
    ) {
        let a: Hamt<DefaultHasher, u16, u32> = entries.iter().cloned().collect();
        let b: Hamt<DefaultHasher, u16, u32> = {
            // same final content, different construction order
            let mut rev: Hamt<DefaultHasher, u16, u32> =
                entries.iter().rev().cloned().collect();
            for (k, v) in entries.iter() {
                rev = rev.insert(*k, *v);
            }
            rev
        };
        prop_assert_eq!(a.clone(), b.clone());
        let sa: Vec<(u16, u32)> = a.iter().map(|(k, v)| (*k, *v)).collect();
        let sb: Vec<(u16, u32)> = b.iter().map(|(k, v)| (*k, *v)).collect();
        prop_assert_eq!(sa, sb);
    }
}
