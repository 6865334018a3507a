mod merge;
mod reference;

pub use merge::{merge_rec, Merger, ResolveFn};
pub use reference::{
    filter_rec, insert_rec, lookup_one, remove_match_rec, remove_rec, replace_rec,
    replace_with_rec, split_node, update_rec, Collision, Leaf, LookupRet, Node, Trie,
};
