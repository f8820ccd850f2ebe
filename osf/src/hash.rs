//! The hash chain that gives trie nodes their identity.
//!
//! A node has no stored id; its 64-bit hash is derived from the filter's
//! hash seed and the sequence of child bits leading to it. The derivation
//! must match bit-for-bit between construction and queries, or lookups land
//! on unrelated dictionary cells.

use std::hash::{BuildHasher, Hasher};

/// One step of the 64-bit xorshift sequence driving node hashing.
#[inline(always)]
pub(crate) const fn next_rand(mut value: u64) -> u64 {
    value ^= value << 13;
    value ^= value >> 7;
    value ^= value << 17;
    value
}

/// Child hashes and child seed of a node with hash `hash` and seed `seed`,
/// as the builder derives them.
#[inline]
pub(crate) fn child_hashes(hash: u64, seed: u64) -> ([u64; 2], u64) {
    let step1 = next_rand(next_rand(seed));
    let step2 = next_rand(step1);
    ([hash ^ step1, hash ^ step2], step2)
}

/// Memoized prefix of the xorshift orbit started at the filter's hash seed.
///
/// The seed chain of a query is a single orbit of [`next_rand`], so its
/// `id`-th step can be answered from this table whenever `id` is small,
/// without re-deriving it from the current seed. Construction never
/// consults the cache; only queries do.
pub(crate) struct HashCache {
    steps: Box<[u64]>,
}

impl HashCache {
    pub fn new(hash_seed: u64, size: usize) -> Self {
        let mut steps = Vec::with_capacity(size);
        let mut value = hash_seed;
        for _ in 0..size {
            value = next_rand(value);
            steps.push(value);
        }
        Self { steps: steps.into_boxed_slice() }
    }

    #[inline(always)]
    fn next(&self, seed: u64, id: usize) -> u64 {
        match self.steps.get(id) {
            Some(&step) => step,
            None => next_rand(seed),
        }
    }

    /// Advances the traversal along child `bit`, mirroring [`child_hashes`].
    #[inline]
    pub fn descend(&self, hash: &mut u64, seed: &mut u64, hash_id: &mut usize, bit: bool) {
        let step0 = self.next(*seed, *hash_id);
        let step1 = self.next(step0, *hash_id + 1);
        let step2 = self.next(step1, *hash_id + 2);
        *hash_id += 3;
        *hash ^= if bit { step2 } else { step1 };
        *seed = step2;
    }
}

impl dyn_size_of::GetSize for HashCache {
    #[inline]
    fn size_bytes_dyn(&self) -> usize {
        self.steps.size_bytes_dyn()
    }
    const USES_DYN_MEM: bool = true;
}

/// A fresh 64-bit value drawn from process entropy, never zero.
pub(crate) fn entropy() -> u64 {
    let seed = std::collections::hash_map::RandomState::new().build_hasher().finish();
    if seed == 0 { 0x9E37_79B9_7F4A_7C15 } else { seed }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descend_matches_builder_derivation() {
        let seed = 0xC0FF_EE00_1234_5678u64;
        for cache_size in [0, 2, 1024] {
            let cache = HashCache::new(seed, cache_size);
            let (mut hash, mut chain_seed, mut hash_id) = (seed, seed, 0);
            let mut expected_hash = seed;
            let mut expected_seed = seed;
            for (depth, bit) in [false, true, true, false, true].into_iter().enumerate() {
                let (children, next_seed) = child_hashes(expected_hash, expected_seed);
                expected_hash = children[bit as usize];
                expected_seed = next_seed;
                cache.descend(&mut hash, &mut chain_seed, &mut hash_id, bit);
                assert_eq!(hash, expected_hash, "cache {cache_size}, depth {depth}");
                assert_eq!(chain_seed, expected_seed);
            }
        }
    }

    #[test]
    fn entropy_is_nonzero() {
        assert_ne!(entropy(), 0);
    }
}
