use super::super::bitmap::{ArrayIndex, SmallBitmap};
use super::super::hash::{HashedKey, LevelIndex, MAX_LEVEL};
use super::super::helper;
use super::super::operation::*;
use super::super::sharedref::SharedRef;
use super::merge::Merger;
use std::borrow::Borrow;
use std::error::Error;
use std::fmt::Debug;
use std::slice;

/// One stored entry: the key, its value and the cached mixed hash.
///
/// The hash is kept on the leaf so it is never recomputed while the trie is
/// being restructured.
#[derive(Debug)]
pub struct Leaf<K, V> {
    pub hash: HashedKey,
    pub key: K,
    pub value: V,
}

/// Two or more entries sharing the same full 32-bit mixed hash.
///
/// Keys are pairwise distinct. Entry order is construction order and is only
/// observable through the determinism of iteration.
#[derive(Debug)]
pub struct Collision<K, V> {
    pub hash: HashedKey,
    entries: Box<[(K, V)]>,
}

impl<K, V> Collision<K, V> {
    pub fn from_box(hash: HashedKey, b: Box<[(K, V)]>) -> Self {
        assert!(b.len() >= 2);
        Collision { hash, entries: b }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn entries(&self) -> &[(K, V)] {
        &self.entries
    }

    pub fn iter(&self) -> slice::Iter<'_, (K, V)> {
        self.entries.iter()
    }
}

/// Internal node of the trie.
///
/// The bitmap is indexed by a 5-bit hash slice and gives the physical
/// position of each child; the subtree entry count is kept inline so that
/// sizing a map is O(1).
#[derive(Debug)]
pub struct Trie<K, V> {
    pub bitmap: SmallBitmap,
    pub children: Box<[Node<K, V>]>,
    pub size: usize,
}

/// A trie value. Cloning shares the underlying allocation.
#[derive(Debug)]
pub enum Node<K, V> {
    Empty,
    Leaf(SharedRef<Leaf<K, V>>),
    Collision(SharedRef<Collision<K, V>>),
    Trie(SharedRef<Trie<K, V>>),
}

impl<K, V> Clone for Node<K, V> {
    fn clone(&self) -> Self {
        match self {
            Node::Empty => Node::Empty,
            Node::Leaf(l) => Node::Leaf(SharedRef::clone(l)),
            Node::Collision(c) => Node::Collision(SharedRef::clone(c)),
            Node::Trie(t) => Node::Trie(SharedRef::clone(t)),
        }
    }
}

impl<K, V> Node<K, V> {
    pub fn leaf(hash: HashedKey, key: K, value: V) -> Self {
        Node::Leaf(SharedRef::new(Leaf { hash, key, value }))
    }

    pub fn collision(hash: HashedKey, entries: Box<[(K, V)]>) -> Self {
        Node::Collision(SharedRef::new(Collision::from_box(hash, entries)))
    }

    pub fn trie(bitmap: SmallBitmap, children: Box<[Node<K, V>]>, size: usize) -> Self {
        debug_assert_eq!(bitmap.present(), children.len());
        Node::Trie(SharedRef::new(Trie {
            bitmap,
            children,
            size,
        }))
    }

    /// Number of entries below this node. O(1).
    pub fn size(&self) -> usize {
        match self {
            Node::Empty => 0,
            Node::Leaf(_) => 1,
            Node::Collision(c) => c.len(),
            Node::Trie(t) => t.size,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Node::Empty)
    }

    pub fn is_trie(&self) -> bool {
        matches!(self, Node::Trie(_))
    }

    /// Same allocation on both sides. Backs the sharing fast paths; results
    /// never depend on it.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Node::Empty, Node::Empty) => true,
            (Node::Leaf(a), Node::Leaf(b)) => SharedRef::ptr_eq(a, b),
            (Node::Collision(a), Node::Collision(b)) => SharedRef::ptr_eq(a, b),
            (Node::Trie(a), Node::Trie(b)) => SharedRef::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// Build the minimal spine separating two nodes whose hashes differ,
/// starting at `lvl`. While the 5-bit slices keep colliding this recurses,
/// emitting single-child spine tries on the way.
pub fn make_trie<K, V>(
    h0: HashedKey,
    n0: Node<K, V>,
    h1: HashedKey,
    n1: Node<K, V>,
    lvl: usize,
    size: usize,
) -> Node<K, V> {
    debug_assert!(h0 != h1);
    debug_assert!(lvl <= MAX_LEVEL);
    let i0 = h0.level_index(lvl);
    let i1 = h1.level_index(lvl);
    if i0 == i1 {
        let child = make_trie(h0, n0, h1, n1, lvl + 1, size);
        Node::trie(SmallBitmap::once(i0), vec![child].into(), size)
    } else {
        let bitmap = SmallBitmap::once(i0).set_index(i1);
        let children = if i0.0 < i1.0 {
            vec![n0, n1]
        } else {
            vec![n1, n0]
        };
        Node::trie(bitmap, children.into(), size)
    }
}

pub enum LookupRet<'a, K, V> {
    Found(&'a V),
    NotFound,
    ContinueIn(&'a Node<K, V>),
}

pub fn lookup_one<'a, Q, K, V>(
    node: &'a Node<K, V>,
    h: HashedKey,
    lvl: usize,
    k: &Q,
) -> LookupRet<'a, K, V>
where
    Q: PartialEq + ?Sized,
    K: Borrow<Q>,
{
    match node {
        Node::Empty => LookupRet::NotFound,
        Node::Leaf(l) => {
            if l.hash == h && l.key.borrow() == k {
                LookupRet::Found(&l.value)
            } else {
                LookupRet::NotFound
            }
        }
        Node::Collision(c) => {
            if c.hash != h {
                LookupRet::NotFound
            } else {
                match c.iter().find(|(lk, _)| lk.borrow() == k) {
                    None => LookupRet::NotFound,
                    Some(lkv) => LookupRet::Found(&lkv.1),
                }
            }
        }
        Node::Trie(t) => {
            let idx = t.bitmap.get_index_sparse(h.level_index(lvl));
            if idx.is_not_found() {
                LookupRet::NotFound
            } else {
                LookupRet::ContinueIn(&t.children[idx.get_found()])
            }
        }
    }
}

// Insert an entry recursively, setting parent nodes back to cope with the
// change.
//
// The merger decides what survives when the key is already present: the
// plain insert path keeps the incoming entry, the merge engine passes its
// resolver through. When the existing entry survives untouched the node is
// returned as-is, pointer-shared.
//
// This is guaranteed by the trie design not to recurse forever: two
// different hashes diverge at some level, producing leaf or collision nodes
// instead of deeper tries.
pub fn insert_rec<K, V, E>(
    node: &Node<K, V>,
    h: HashedKey,
    lvl: usize,
    key: K,
    value: V,
    merger: Merger<'_, K, V, E>,
) -> Result<Node<K, V>, E>
where
    K: Clone + PartialEq,
    V: Clone,
{
    match node {
        Node::Empty => Ok(Node::leaf(h, key, value)),
        Node::Leaf(l) => {
            if l.hash == h {
                if l.key == key {
                    if merger.keeps_first() {
                        Ok(node.clone())
                    } else {
                        let (nk, nv) = merger.resolve((&l.key, &l.value), (&key, &value))?;
                        Ok(Node::leaf(h, nk, nv))
                    }
                } else {
                    // same full hash, different keys
                    let dat = vec![(l.key.clone(), l.value.clone()), (key, value)];
                    Ok(Node::collision(h, dat.into()))
                }
            } else {
                let new = Node::leaf(h, key, value);
                Ok(make_trie(l.hash, node.clone(), h, new, lvl, 2))
            }
        }
        Node::Collision(c) => {
            if c.hash == h {
                match c.iter().position(|(lk, _)| lk == &key) {
                    None => {
                        let entries = helper::clone_array_and_extend(c.entries(), (key, value));
                        Ok(Node::collision(h, entries))
                    }
                    Some(pos) => {
                        if merger.keeps_first() {
                            Ok(node.clone())
                        } else {
                            let (lk, lv) = &c.entries()[pos];
                            let kv = merger.resolve((lk, lv), (&key, &value))?;
                            let entries = helper::clone_array_and_set_at_pos(c.entries(), kv, pos);
                            Ok(Node::collision(h, entries))
                        }
                    }
                }
            } else {
                let size = c.len() + 1;
                let new = Node::leaf(h, key, value);
                Ok(make_trie(c.hash, node.clone(), h, new, lvl, size))
            }
        }
        Node::Trie(t) => {
            let level_hash = h.level_index(lvl);
            let idx = t.bitmap.get_index_sparse(level_hash);
            if idx.is_not_found() {
                let pos = t.bitmap.get_sparse_pos(level_hash);
                let children = helper::clone_array_and_insert_at_pos(
                    &t.children,
                    Node::leaf(h, key, value),
                    pos.get_found(),
                );
                Ok(Node::trie(
                    t.bitmap.set_index(level_hash),
                    children,
                    t.size + 1,
                ))
            } else {
                let pos = idx.get_found();
                let child = &t.children[pos];
                let newchild = insert_rec(child, h, lvl + 1, key, value, merger)?;
                if newchild.ptr_eq(child) {
                    Ok(node.clone())
                } else {
                    let size = t.size + newchild.size() - child.size();
                    let children = helper::clone_array_and_set_at_pos(&t.children, newchild, pos);
                    Ok(Node::trie(t.bitmap, children, size))
                }
            }
        }
    }
}

// drop the entry at `pos`, demoting to a leaf when one entry remains
fn collision_without<K: Clone, V: Clone>(c: &Collision<K, V>, pos: usize) -> Node<K, V> {
    if c.len() == 2 {
        let keep = if pos == 0 {
            &c.entries()[1]
        } else {
            &c.entries()[0]
        };
        Node::leaf(c.hash, keep.0.clone(), keep.1.clone())
    } else {
        Node::collision(
            c.hash,
            helper::clone_array_and_remove_at_pos(c.entries(), pos),
        )
    }
}

// Reattach a changed child after a removal or update, enforcing that a trie
// never keeps a single non-trie child.
fn rebuild_shrunk<K: Clone, V: Clone>(
    node: &Node<K, V>,
    t: &Trie<K, V>,
    level_hash: LevelIndex,
    idx: ArrayIndex,
    newchild: Node<K, V>,
) -> Node<K, V> {
    let pos = idx.get_found();
    let oldsize = t.children[pos].size();
    if newchild.ptr_eq(&t.children[pos]) {
        return node.clone();
    }
    if newchild.is_empty() {
        let bitmap = t.bitmap.clear_index(level_hash);
        if bitmap.is_empty() {
            return Node::Empty;
        }
        if t.children.len() == 2 {
            let keep = &t.children[1 - pos];
            if !keep.is_trie() {
                return keep.clone();
            }
        }
        let children = helper::clone_array_and_remove_at_pos(&t.children, pos);
        Node::trie(bitmap, children, t.size - oldsize)
    } else {
        if t.children.len() == 1 && !newchild.is_trie() {
            return newchild;
        }
        let size = t.size + newchild.size() - oldsize;
        let children = helper::clone_array_and_set_at_pos(&t.children, newchild, pos);
        Node::trie(t.bitmap, children, size)
    }
}

// Recursively remove a key. Removing an absent key returns the node
// unchanged, pointer-shared.
pub fn remove_rec<Q, K, V>(node: &Node<K, V>, h: HashedKey, lvl: usize, k: &Q) -> Node<K, V>
where
    Q: PartialEq + ?Sized,
    K: Borrow<Q> + Clone,
    V: Clone,
{
    match node {
        Node::Empty => Node::Empty,
        Node::Leaf(l) => {
            if l.hash == h && l.key.borrow() == k {
                Node::Empty
            } else {
                node.clone()
            }
        }
        Node::Collision(c) => {
            if c.hash != h {
                return node.clone();
            }
            match c.iter().position(|(lk, _)| lk.borrow() == k) {
                None => node.clone(),
                Some(pos) => collision_without(c, pos),
            }
        }
        Node::Trie(t) => {
            let level_hash = h.level_index(lvl);
            let idx = t.bitmap.get_index_sparse(level_hash);
            if idx.is_not_found() {
                return node.clone();
            }
            let newchild = remove_rec(&t.children[idx.get_found()], h, lvl + 1, k);
            rebuild_shrunk(node, t, level_hash, idx, newchild)
        }
    }
}

// Recursively remove a key with an expected equality value.
pub fn remove_match_rec<Q, K, V>(
    node: &Node<K, V>,
    h: HashedKey,
    lvl: usize,
    k: &Q,
    v: &V,
) -> Result<Node<K, V>, RemoveError>
where
    Q: PartialEq + ?Sized,
    K: Borrow<Q> + Clone,
    V: PartialEq + Clone,
{
    match node {
        Node::Empty => Err(RemoveError::KeyNotFound),
        Node::Leaf(l) => {
            if l.hash == h && l.key.borrow() == k {
                if &l.value == v {
                    Ok(Node::Empty)
                } else {
                    Err(RemoveError::ValueNotMatching)
                }
            } else {
                Err(RemoveError::KeyNotFound)
            }
        }
        Node::Collision(c) => {
            if c.hash != h {
                return Err(RemoveError::KeyNotFound);
            }
            let pos = c
                .iter()
                .position(|(lk, _)| lk.borrow() == k)
                .ok_or(RemoveError::KeyNotFound)?;
            if &c.entries()[pos].1 != v {
                Err(RemoveError::ValueNotMatching)
            } else {
                Ok(collision_without(c, pos))
            }
        }
        Node::Trie(t) => {
            let level_hash = h.level_index(lvl);
            let idx = t.bitmap.get_index_sparse(level_hash);
            if idx.is_not_found() {
                return Err(RemoveError::KeyNotFound);
            }
            let newchild = remove_match_rec(&t.children[idx.get_found()], h, lvl + 1, k, v)?;
            Ok(rebuild_shrunk(node, t, level_hash, idx, newchild))
        }
    }
}

// Recursively replace a key's value, returning the old value as well.
pub fn replace_rec<K, V>(
    node: &Node<K, V>,
    h: HashedKey,
    lvl: usize,
    k: &K,
    v: V,
) -> Result<(Node<K, V>, V), ReplaceError>
where
    K: PartialEq + Clone,
    V: Clone,
{
    match node {
        Node::Empty => Err(ReplaceError::KeyNotFound),
        Node::Leaf(l) => {
            if l.hash == h && &l.key == k {
                Ok((Node::leaf(h, l.key.clone(), v), l.value.clone()))
            } else {
                Err(ReplaceError::KeyNotFound)
            }
        }
        Node::Collision(c) => {
            if c.hash != h {
                return Err(ReplaceError::KeyNotFound);
            }
            let pos = c
                .iter()
                .position(|(lk, _)| lk == k)
                .ok_or(ReplaceError::KeyNotFound)?;
            let oldv = c.entries()[pos].1.clone();
            let entries = helper::clone_array_and_set_at_pos(c.entries(), (k.clone(), v), pos);
            Ok((Node::collision(h, entries), oldv))
        }
        Node::Trie(t) => {
            let level_hash = h.level_index(lvl);
            let idx = t.bitmap.get_index_sparse(level_hash);
            if idx.is_not_found() {
                return Err(ReplaceError::KeyNotFound);
            }
            let pos = idx.get_found();
            let (newchild, oldv) = replace_rec(&t.children[pos], h, lvl + 1, k, v)?;
            let children = helper::clone_array_and_set_at_pos(&t.children, newchild, pos);
            Ok((Node::trie(t.bitmap, children, t.size), oldv))
        }
    }
}

// Recursively replace a key's value through a callback.
pub fn replace_with_rec<K, V, F>(
    node: &Node<K, V>,
    h: HashedKey,
    lvl: usize,
    k: &K,
    f: F,
) -> Result<Node<K, V>, ReplaceError>
where
    K: PartialEq + Clone,
    V: Clone,
    F: FnOnce(&V) -> V,
{
    match node {
        Node::Empty => Err(ReplaceError::KeyNotFound),
        Node::Leaf(l) => {
            if l.hash == h && &l.key == k {
                let v = f(&l.value);
                Ok(Node::leaf(h, l.key.clone(), v))
            } else {
                Err(ReplaceError::KeyNotFound)
            }
        }
        Node::Collision(c) => {
            if c.hash != h {
                return Err(ReplaceError::KeyNotFound);
            }
            let pos = c
                .iter()
                .position(|(lk, _)| lk == k)
                .ok_or(ReplaceError::KeyNotFound)?;
            let v = f(&c.entries()[pos].1);
            let entries = helper::clone_array_and_set_at_pos(c.entries(), (k.clone(), v), pos);
            Ok(Node::collision(h, entries))
        }
        Node::Trie(t) => {
            let level_hash = h.level_index(lvl);
            let idx = t.bitmap.get_index_sparse(level_hash);
            if idx.is_not_found() {
                return Err(ReplaceError::KeyNotFound);
            }
            let pos = idx.get_found();
            let newchild = replace_with_rec(&t.children[pos], h, lvl + 1, k, f)?;
            let children = helper::clone_array_and_set_at_pos(&t.children, newchild, pos);
            Ok(Node::trie(t.bitmap, children, t.size))
        }
    }
}

// Recursively update a key.
//
// An update cannot create a new value, it can only change or delete an
// existing one; deletions contract the trie on the way back up.
pub fn update_rec<K, V, F, E>(
    node: &Node<K, V>,
    h: HashedKey,
    lvl: usize,
    k: &K,
    f: F,
) -> Result<Node<K, V>, UpdateError<E>>
where
    K: PartialEq + Clone,
    V: Clone,
    F: FnOnce(&V) -> Result<Option<V>, E>,
    E: Error + Debug + 'static,
{
    match node {
        Node::Empty => Err(UpdateError::KeyNotFound),
        Node::Leaf(l) => {
            if l.hash == h && &l.key == k {
                match f(&l.value).map_err(UpdateError::ValueCallbackError)? {
                    None => Ok(Node::Empty),
                    Some(newv) => Ok(Node::leaf(h, l.key.clone(), newv)),
                }
            } else {
                Err(UpdateError::KeyNotFound)
            }
        }
        Node::Collision(c) => {
            if c.hash != h {
                return Err(UpdateError::KeyNotFound);
            }
            let pos = c
                .iter()
                .position(|(lk, _)| lk == k)
                .ok_or(UpdateError::KeyNotFound)?;
            match f(&c.entries()[pos].1).map_err(UpdateError::ValueCallbackError)? {
                None => Ok(collision_without(c, pos)),
                Some(newv) => {
                    let entries =
                        helper::clone_array_and_set_at_pos(c.entries(), (k.clone(), newv), pos);
                    Ok(Node::collision(h, entries))
                }
            }
        }
        Node::Trie(t) => {
            let level_hash = h.level_index(lvl);
            let idx = t.bitmap.get_index_sparse(level_hash);
            if idx.is_not_found() {
                return Err(UpdateError::KeyNotFound);
            }
            let newchild = update_rec(&t.children[idx.get_found()], h, lvl + 1, k, f)?;
            Ok(rebuild_shrunk(node, t, level_hash, idx, newchild))
        }
    }
}

// Recursively keep the entries matching the predicate (or, with `negate`,
// the ones rejected by it). `None` means nothing below this node survived;
// the caller folds that back to the empty map at the public boundary.
//
// Survivors accumulate in a scratch buffer shared across the whole
// recursion, so building a filtered trie does not allocate per level; each
// trie drains its own slice of the buffer on the way out.
pub fn filter_rec<K, V, F>(
    node: &Node<K, V>,
    f: &F,
    negate: bool,
    buffer: &mut Vec<Node<K, V>>,
) -> Option<Node<K, V>>
where
    K: Clone,
    V: Clone,
    F: Fn(&K, &V) -> bool,
{
    match node {
        Node::Empty => None,
        Node::Leaf(l) => {
            if f(&l.key, &l.value) != negate {
                Some(node.clone())
            } else {
                None
            }
        }
        Node::Collision(c) => {
            let kept: Vec<&(K, V)> = c.iter().filter(|(k, v)| f(k, v) != negate).collect();
            if kept.is_empty() {
                None
            } else if kept.len() == c.len() {
                Some(node.clone())
            } else if let [(k, v)] = kept.as_slice() {
                Some(Node::leaf(c.hash, k.clone(), v.clone()))
            } else {
                let entries: Vec<(K, V)> = kept.into_iter().cloned().collect();
                Some(Node::collision(c.hash, entries.into()))
            }
        }
        Node::Trie(t) => {
            let offset = buffer.len();
            let mut bitmap = SmallBitmap::new();
            let mut size = 0;
            for (child, idx) in t.children.iter().zip(t.bitmap.iter()) {
                if let Some(kept) = filter_rec(child, f, negate, buffer) {
                    size += kept.size();
                    bitmap = bitmap.set_index(idx);
                    buffer.push(kept);
                }
            }
            let survivors = buffer.split_off(offset);
            if survivors.is_empty() {
                None
            } else if size == t.size {
                // every entry survived, so every child came back shared
                Some(node.clone())
            } else {
                if let [only] = survivors.as_slice() {
                    if !only.is_trie() {
                        return Some(only.clone());
                    }
                }
                Some(Node::trie(bitmap, survivors.into(), size))
            }
        }
    }
}

/// Break a node into one or two nodes whose entries union to the original.
///
/// Halving happens on the child array of the topmost branching node; spine
/// nodes delegate downward. Single-child halves are contracted so the
/// result respects the same invariants as any other map.
pub fn split_node<K: Clone, V: Clone>(node: &Node<K, V>) -> Vec<Node<K, V>> {
    match node {
        Node::Empty | Node::Leaf(_) => vec![node.clone()],
        Node::Collision(c) => {
            let (a, b) = c.entries().split_at(c.len() / 2);
            vec![collision_slice(c.hash, a), collision_slice(c.hash, b)]
        }
        Node::Trie(t) => {
            if t.children.len() > 1 {
                let mid = t.children.len() / 2;
                let (lo_bm, hi_bm) = t.bitmap.split_at(mid);
                let (lo, hi) = t.children.split_at(mid);
                vec![trie_slice(lo_bm, lo), trie_slice(hi_bm, hi)]
            } else {
                split_node(&t.children[0])
            }
        }
    }
}

fn collision_slice<K: Clone, V: Clone>(h: HashedKey, entries: &[(K, V)]) -> Node<K, V> {
    if let [(k, v)] = entries {
        Node::leaf(h, k.clone(), v.clone())
    } else {
        Node::collision(h, entries.to_vec().into())
    }
}

fn trie_slice<K: Clone, V: Clone>(bitmap: SmallBitmap, children: &[Node<K, V>]) -> Node<K, V> {
    if let [only] = children {
        if !only.is_trie() {
            return only.clone();
        }
    }
    let size = children.iter().map(Node::size).sum();
    Node::trie(bitmap, children.to_vec().into(), size)
}
