use super::super::sharedref::SharedRef;
use super::reference::{insert_rec, make_trie, Node, Trie};

/// Conflict resolution callback: sees two entries for the same key and
/// returns the one to keep.
pub type ResolveFn<'a, K, V, E> = dyn Fn((&K, &V), (&K, &V)) -> Result<(K, V), E> + 'a;

/// Decides which entry survives when both sides of a merge contain the same
/// key.
///
/// The caller's resolver always sees the left map's entry as its first
/// argument; [`invert`](Merger::invert) flips the direction so the engine
/// can recurse with its operands swapped without losing that orientation.
/// The default (no callback) keeps the entry of the left map, and is
/// recognized by the engine to reuse identity-shared subtrees without
/// recursing into them.
pub struct Merger<'a, K, V, E> {
    func: Option<&'a ResolveFn<'a, K, V, E>>,
    swapped: bool,
}

impl<K, V, E> Clone for Merger<'_, K, V, E> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<K, V, E> Copy for Merger<'_, K, V, E> {}

impl<'a, K, V, E> Merger<'a, K, V, E> {
    /// The default resolver: the left map's entry wins.
    pub fn prefer_left() -> Self {
        Merger {
            func: None,
            swapped: false,
        }
    }

    /// The default resolver with its arguments swapped: the incoming entry
    /// wins. This is plain replace-on-collision insertion.
    pub fn prefer_right() -> Self {
        Merger {
            func: None,
            swapped: true,
        }
    }

    pub fn from_fn(f: &'a ResolveFn<'a, K, V, E>) -> Self {
        Merger {
            func: Some(f),
            swapped: false,
        }
    }

    /// The same resolver seeing its arguments in the other order.
    pub fn invert(self) -> Self {
        Merger {
            func: self.func,
            swapped: !self.swapped,
        }
    }

    /// Default resolver, in either direction. When it holds, a child
    /// pointer shared by both sides can be emitted without recursion.
    pub fn is_default(self) -> bool {
        self.func.is_none()
    }

    /// True when the first (existing) entry survives untouched, so the node
    /// holding it can be returned as-is.
    pub fn keeps_first(self) -> bool {
        self.func.is_none() && !self.swapped
    }

    pub fn resolve(self, first: (&K, &V), second: (&K, &V)) -> Result<(K, V), E>
    where
        K: Clone,
        V: Clone,
    {
        match self.func {
            None => {
                let (k, v) = if self.swapped { second } else { first };
                Ok((k.clone(), v.clone()))
            }
            Some(f) => {
                if self.swapped {
                    f(second, first)
                } else {
                    f(first, second)
                }
            }
        }
    }
}

// Merge two nodes sitting at the same level into their union, resolving
// overlapping keys through the merger.
//
// Folding a single entry or a collision bucket into the other side goes
// through the insertion path; the merger is inverted whenever the fold puts
// the right side's node on the receiving end, so the resolver still sees the
// left map's entry first.
pub fn merge_rec<K, V, E>(
    left: &Node<K, V>,
    right: &Node<K, V>,
    lvl: usize,
    merger: Merger<'_, K, V, E>,
) -> Result<Node<K, V>, E>
where
    K: Clone + PartialEq,
    V: Clone,
{
    match (left, right) {
        (Node::Empty, _) => Ok(right.clone()),
        (_, Node::Empty) => Ok(left.clone()),

        (Node::Leaf(l), Node::Leaf(r)) => {
            if l.hash == r.hash {
                if l.key == r.key {
                    if merger.keeps_first() {
                        Ok(left.clone())
                    } else if merger.is_default() {
                        Ok(right.clone())
                    } else {
                        let (k, v) = merger.resolve((&l.key, &l.value), (&r.key, &r.value))?;
                        Ok(Node::leaf(l.hash, k, v))
                    }
                } else {
                    let dat = vec![
                        (l.key.clone(), l.value.clone()),
                        (r.key.clone(), r.value.clone()),
                    ];
                    Ok(Node::collision(l.hash, dat.into()))
                }
            } else {
                Ok(make_trie(l.hash, left.clone(), r.hash, right.clone(), lvl, 2))
            }
        }

        (Node::Leaf(l), Node::Collision(_)) | (Node::Leaf(l), Node::Trie(_)) => insert_rec(
            right,
            l.hash,
            lvl,
            l.key.clone(),
            l.value.clone(),
            merger.invert(),
        ),
        (Node::Collision(_), Node::Leaf(r)) | (Node::Trie(_), Node::Leaf(r)) => {
            insert_rec(left, r.hash, lvl, r.key.clone(), r.value.clone(), merger)
        }

        (Node::Collision(lc), Node::Collision(rc)) => {
            if lc.hash == rc.hash {
                let mut node = left.clone();
                for (k, v) in rc.iter() {
                    node = insert_rec(&node, rc.hash, lvl, k.clone(), v.clone(), merger)?;
                }
                Ok(node)
            } else {
                Ok(make_trie(
                    lc.hash,
                    left.clone(),
                    rc.hash,
                    right.clone(),
                    lvl,
                    lc.len() + rc.len(),
                ))
            }
        }

        (Node::Collision(lc), Node::Trie(_)) => {
            let inv = merger.invert();
            let mut node = right.clone();
            for (k, v) in lc.iter() {
                node = insert_rec(&node, lc.hash, lvl, k.clone(), v.clone(), inv)?;
            }
            Ok(node)
        }
        (Node::Trie(_), Node::Collision(rc)) => {
            let mut node = left.clone();
            for (k, v) in rc.iter() {
                node = insert_rec(&node, rc.hash, lvl, k.clone(), v.clone(), merger)?;
            }
            Ok(node)
        }

        (Node::Trie(lt), Node::Trie(rt)) => merge_trie_trie(left, lt, right, rt, lvl, merger),
    }
}

// Walk the union of both bitmaps from the lowest set bit upward. As long as
// every emitted child is pointer-equal to the corresponding child of one
// side, that whole side can be returned unchanged; the accumulated children
// are only turned into a fresh node once both flags are gone.
fn merge_trie_trie<K, V, E>(
    left: &Node<K, V>,
    lt: &SharedRef<Trie<K, V>>,
    right: &Node<K, V>,
    rt: &SharedRef<Trie<K, V>>,
    lvl: usize,
    merger: Merger<'_, K, V, E>,
) -> Result<Node<K, V>, E>
where
    K: Clone + PartialEq,
    V: Clone,
{
    let union = lt.bitmap | rt.bitmap;
    let mut children = Vec::with_capacity(union.present());
    let mut can_be_left = true;
    let mut can_be_right = true;
    let mut size = 0;

    for idx in union.iter() {
        let lpos = lt.bitmap.get_index_sparse(idx);
        let rpos = rt.bitmap.get_index_sparse(idx);
        let child = if lpos.is_not_found() {
            rt.children[rpos.get_found()].clone()
        } else if rpos.is_not_found() {
            lt.children[lpos.get_found()].clone()
        } else {
            let lc = &lt.children[lpos.get_found()];
            let rc = &rt.children[rpos.get_found()];
            if merger.is_default() && lc.ptr_eq(rc) {
                lc.clone()
            } else {
                merge_rec(lc, rc, lvl + 1, merger)?
            }
        };
        if lpos.is_not_found() || !child.ptr_eq(&lt.children[lpos.get_found()]) {
            can_be_left = false;
        }
        if rpos.is_not_found() || !child.ptr_eq(&rt.children[rpos.get_found()]) {
            can_be_right = false;
        }
        size += child.size();
        children.push(child);
    }

    if can_be_left {
        Ok(left.clone())
    } else if can_be_right {
        Ok(right.clone())
    } else {
        Ok(Node::trie(union, children.into(), size))
    }
}
