pub use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

/// Bits of mixed hash consumed per trie level.
const BITS_PER_LEVEL: usize = 5;

/// Deepest level at which hashes can still diverge. Below this the whole
/// 32-bit hash has been consumed and equal hashes collide for good.
pub const MAX_LEVEL: usize = 6;

/// Post-mix a raw 32-bit hash to spread entropy into the low bits.
///
/// The exact sequence is an interoperability contract: two tries can only be
/// merged structurally if they were indexed on identical mixed hashes.
pub fn mix(h: u32) -> u32 {
    let h = h.wrapping_add(!(h << 9));
    let h = h ^ (h >> 14);
    let h = h.wrapping_add(h << 4);
    h ^ (h >> 10)
}

/// A key's mixed hash. The trie is indexed exclusively on this value.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub struct HashedKey(pub u32);

impl HashedKey {
    /// Compute the mixed hash of a key, using the specified hasher type.
    pub fn compute<H: Hasher + Default, K: Hash + ?Sized>(
        _hasher: PhantomData<H>,
        k: &K,
    ) -> Self {
        let mut hs = H::default();
        k.hash(&mut hs);
        HashedKey(mix(hs.finish() as u32))
    }

    /// The 5-bit slice selecting this hash's slot at the given level.
    pub fn level_index(self, level: usize) -> LevelIndex {
        LevelIndex(((self.0 >> (level * BITS_PER_LEVEL)) & 0b1_1111) as u8)
    }
}

/// Slot index within a trie node, in `0..32`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct LevelIndex(pub u8);

impl LevelIndex {
    pub fn mask(self) -> u32 {
        1 << self.0
    }
}
