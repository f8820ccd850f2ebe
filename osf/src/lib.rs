#![doc = include_str!("../README.md")]

mod arena;
mod bits;
mod conf;
mod engine;
mod fixed;
mod general;
mod hash;
mod keyset;
mod prefix_free;
mod trie;

pub use conf::FilterConf;
pub use fixed::FixedFilter;
pub use general::GeneralFilter;
pub use prefix_free::PrefixFreeFilter;

pub use dyn_size_of::GetSize;

use std::cmp::Ordering;
use std::io;

use binout::{AsIs, Serializer};

use conf::DEFAULT_HASH_CACHE_SIZE;
use engine::Engine;
use keyset::{classify, KeySetKind};

/// Error returned when a filter cannot be constructed from the given keys.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// The key set is empty.
    #[error("cannot build a filter over an empty key set")]
    Empty,
    /// The key set contains the empty string.
    #[error("cannot build a filter over a key set containing the empty string")]
    EmptyKey,
    /// The keys are not sorted or contain duplicates.
    #[error("the keys are not sorted and unique")]
    Unsorted,
    /// Fuse-graph peeling failed for every drawn hash seed.
    #[error("construction failed after {0} retries")]
    RetriesExhausted(u32),
}

/// A static succinct filter over a sorted set of unique byte-string keys.
///
/// The filter answers point, prefix and range membership with one-sided
/// error: a `false` answer is authoritative, a `true` answer may be a false
/// positive with small probability. The encoding is selected automatically
/// from the shape of the key set at construction and is preserved by
/// serialization.
pub enum Filter {
    /// All keys have the same length.
    Fixed(FixedFilter),
    /// Key lengths vary but no key is a prefix of another.
    PrefixFree(PrefixFreeFilter),
    /// Arbitrary key sets.
    General(GeneralFilter),
}

impl Filter {
    /// Builds a filter over `keys`, which must be non-empty byte strings in
    /// strictly increasing lexicographic order.
    #[inline]
    pub fn from_sorted<K: AsRef<[u8]>>(keys: &[K]) -> Result<Self, BuildError> {
        Self::from_sorted_with_conf(keys, FilterConf::default())
    }

    /// Builds a filter over `keys` using the given configuration.
    pub fn from_sorted_with_conf<K: AsRef<[u8]>>(keys: &[K], conf: FilterConf) -> Result<Self, BuildError> {
        let keys: Vec<&[u8]> = keys.iter().map(AsRef::as_ref).collect();
        let info = classify(&keys)?;
        Ok(match info.kind {
            KeySetKind::Fixed => Self::Fixed(FixedFilter::new(&keys, &info, &conf)?),
            KeySetKind::PrefixFree => Self::PrefixFree(PrefixFreeFilter::new(&keys, &info, &conf)?),
            KeySetKind::General => Self::General(GeneralFilter::new(&keys, &info, &conf)?),
        })
    }

    #[inline]
    fn core(&self) -> &Engine {
        match self {
            Self::Fixed(f) => f.core(),
            Self::PrefixFree(f) => f.core(),
            Self::General(f) => f.core(),
        }
    }

    /// May the exact string `key` belong to the set?
    pub fn point(&self, key: &[u8]) -> bool {
        if key.is_empty() {
            return false;
        }
        let Some(mut buffer) = self.core().link_buffer() else {
            return true;
        };
        match self {
            Self::Fixed(f) => f.point_in(key, &mut buffer),
            Self::PrefixFree(f) => f.point_in(key, &mut buffer),
            Self::General(f) => f.point_in(key, &mut buffer),
        }
    }

    /// May the set contain a string starting with `prefix`?
    pub fn prefix(&self, prefix: &[u8]) -> bool {
        if prefix.is_empty() {
            return true;
        }
        let Some(mut buffer) = self.core().link_buffer() else {
            return true;
        };
        match self {
            Self::Fixed(f) => f.prefix_in(prefix, &mut buffer),
            Self::PrefixFree(f) => f.prefix_in(prefix, &mut buffer),
            Self::General(f) => f.prefix_in(prefix, &mut buffer),
        }
    }

    /// May the set contain a string inside the interval bounded by `left`
    /// and `right`, with each bound included as requested?
    ///
    /// An inverted interval is empty; a degenerate one (`left == right`)
    /// holds at most `left` itself.
    pub fn range(&self, left: &[u8], include_left: bool, right: &[u8], include_right: bool) -> bool {
        match left.cmp(right) {
            Ordering::Greater => false,
            Ordering::Equal => include_left && include_right && self.point(left),
            Ordering::Less => {
                let (Some(mut prefix_buf), Some(mut tail_buf)) =
                    (self.core().link_buffer(), self.core().link_buffer())
                else {
                    return true;
                };
                match self {
                    Self::Fixed(f) => {
                        f.range_in(left, include_left, right, include_right, &mut prefix_buf, &mut tail_buf)
                    }
                    Self::PrefixFree(f) => {
                        f.range_in(left, include_left, right, include_right, &mut prefix_buf, &mut tail_buf)
                    }
                    Self::General(f) => {
                        f.range_in(left, include_left, right, include_right, &mut prefix_buf, &mut tail_buf)
                    }
                }
            }
        }
    }

    /// Returns the number of bytes which `write` will write.
    pub fn write_bytes(&self) -> usize {
        1 + match self {
            Self::Fixed(f) => f.write_bytes(),
            Self::PrefixFree(f) => f.write_bytes(),
            Self::General(f) => f.write_bytes(),
        }
    }

    /// Writes `self` to `output`. The first byte tags the trie encoding;
    /// the rest is the encoding-specific image.
    pub fn write(&self, output: &mut dyn io::Write) -> io::Result<()> {
        match self {
            Self::Fixed(f) => {
                AsIs::write(output, 1u8)?;
                f.write(output)
            }
            Self::PrefixFree(f) => {
                AsIs::write(output, 2u8)?;
                f.write(output)
            }
            Self::General(f) => {
                AsIs::write(output, 3u8)?;
                f.write(output)
            }
        }
    }

    /// Reads a filter written by [`Self::write`].
    pub fn read(input: &mut dyn io::Read) -> io::Result<Self> {
        match AsIs::read(input)? {
            1u8 => Ok(Self::Fixed(FixedFilter::read(input, DEFAULT_HASH_CACHE_SIZE)?)),
            2 => Ok(Self::PrefixFree(PrefixFreeFilter::read(input, DEFAULT_HASH_CACHE_SIZE)?)),
            3 => Ok(Self::General(GeneralFilter::read(input, DEFAULT_HASH_CACHE_SIZE)?)),
            _ => Err(io::Error::new(io::ErrorKind::InvalidData, "unknown filter variant tag")),
        }
    }

    /// Serializes `self` to an owned buffer; the inverse of [`Self::deserialize`].
    pub fn serialize(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.write_bytes());
        self.write(&mut bytes).expect("writing to a vector cannot fail");
        bytes
    }

    /// Restores a filter from a buffer produced by [`Self::serialize`].
    #[inline]
    pub fn deserialize(mut bytes: &[u8]) -> io::Result<Self> {
        Self::read(&mut bytes)
    }
}

impl GetSize for Filter {
    fn size_bytes_dyn(&self) -> usize {
        match self {
            Self::Fixed(f) => f.size_bytes_dyn(),
            Self::PrefixFree(f) => f.size_bytes_dyn(),
            Self::General(f) => f.size_bytes_dyn(),
        }
    }
    const USES_DYN_MEM: bool = true;
}

#[cfg(test)]
mod tests {
    use super::*;
    use butils::XorShift64;

    fn built(keys: &[&[u8]]) -> Filter {
        Filter::from_sorted_with_conf(keys, FilterConf::seeded(0x5EED_0123)).unwrap()
    }

    fn assert_fixed_scenario(filter: &Filter) {
        assert!(filter.prefix(b"a"));
        assert!(filter.prefix(b"b"));
        assert!(!filter.prefix(b"d"));
        assert!(filter.point(b"ab"));
        assert!(filter.point(b"ac"));
        assert!(!filter.point(b"dc"));
        assert!(filter.range(b"a", true, b"b", false));
        assert!(filter.range(b"ab", true, b"ac", true));
        assert!(!filter.range(b"ab", false, b"ac", false));
    }

    fn assert_variable_scenario(filter: &Filter) {
        assert!(filter.prefix(b"am"));
        assert!(!filter.prefix(b"ac"));
        assert!(filter.point(b"amogus"));
        assert!(!filter.point(b"acab"));
        assert!(filter.range(b"abc", true, b"am", false));
        assert!(!filter.range(b"abc", false, b"amogus", false));
    }

    #[test]
    fn fixed_scenario() {
        let filter = built(&[b"ab", b"ac", b"bc"]);
        assert!(matches!(filter, Filter::Fixed(_)));
        assert_fixed_scenario(&filter);
    }

    #[test]
    fn prefix_free_scenario() {
        let filter = built(&[b"abc", b"amogus", b"kek"]);
        assert!(matches!(filter, Filter::PrefixFree(_)));
        assert_variable_scenario(&filter);
    }

    #[test]
    fn general_scenario() {
        let filter = built(&[b"abc", b"amogus", b"kek", b"kekw"]);
        assert!(matches!(filter, Filter::General(_)));
        assert_variable_scenario(&filter);
        assert!(filter.point(b"kek"));
        assert!(filter.point(b"kekw"));
        assert!(filter.prefix(b"kek"));
    }

    #[test]
    fn serialization_round_trips_preserve_answers() {
        let sets: [&[&[u8]]; 3] = [
            &[b"ab", b"ac", b"bc"],
            &[b"abc", b"amogus", b"kek"],
            &[b"abc", b"amogus", b"kek", b"kekw"],
        ];
        for (i, keys) in sets.into_iter().enumerate() {
            let filter = built(keys);
            let bytes = filter.serialize();
            assert_eq!(bytes.len(), filter.write_bytes(), "set {i}");
            let restored = Filter::deserialize(&bytes).unwrap();
            match i {
                0 => assert_fixed_scenario(&restored),
                _ => assert_variable_scenario(&restored),
            }
            for key in keys {
                assert_eq!(restored.point(key), filter.point(key));
            }
            assert!(restored.size_bytes() > 0);
        }
    }

    #[test]
    fn truncated_or_garbled_buffers_fail_to_deserialize() {
        let filter = built(&[b"ab", b"ac", b"bc"]);
        let mut bytes = filter.serialize();
        assert!(Filter::deserialize(&bytes[..bytes.len() - 1]).is_err());
        bytes[0] = 9;
        assert!(Filter::deserialize(&bytes).is_err());
    }

    #[test]
    fn every_stored_key_and_prefix_is_found() {
        let sets: [&[&[u8]]; 4] = [
            &[b"ab", b"ac", b"bc"],
            &[b"abc", b"amogus", b"kek"],
            &[b"abc", b"amogus", b"kek", b"kekw"],
            &[b"a", b"ab", b"abc", b"abcd"],
        ];
        for keys in sets {
            let filter = built(keys);
            for key in keys {
                assert!(filter.point(key));
                assert!(filter.prefix(key), "point implies prefix");
                for end in 1..key.len() {
                    assert!(filter.prefix(&key[..end]));
                }
                assert!(filter.range(key, true, key, true));
            }
        }
    }

    #[test]
    fn degenerate_and_inverted_intervals() {
        let filter = built(&[b"abc", b"amogus", b"kek"]);
        assert!(!filter.range(b"kek", true, b"abc", true), "inverted interval is empty");
        assert_eq!(filter.range(b"abc", true, b"abc", true), filter.point(b"abc"));
        assert_eq!(filter.range(b"nope", true, b"nope", true), filter.point(b"nope"));
        assert!(!filter.range(b"abc", false, b"abc", true));
        assert!(!filter.range(b"abc", true, b"abc", false));
    }

    #[test]
    fn ranges_between_neighbour_keys() {
        let filter = built(&[b"abc", b"amogus", b"kek", b"kekw"]);
        assert!(filter.range(b"abc", true, b"amogus", false));
        assert!(filter.range(b"amogus", false, b"kekw", false), "contains kek");
        assert!(filter.range(b"a", false, b"b", false));
        assert!(filter.range(b"kek", false, b"kekw", true));
    }

    #[test]
    fn empty_query_strings() {
        let filter = built(&[b"ab", b"ac", b"bc"]);
        assert!(!filter.point(b""));
        assert!(filter.prefix(b""));
        assert!(filter.range(b"", true, b"zz", true), "unbounded below, contains everything");
        assert!(!filter.range(b"", true, b"", true), "the empty string is never stored");
    }

    #[test]
    fn single_key_set() {
        let filter = built(&[b"a"]);
        assert!(matches!(filter, Filter::Fixed(_)));
        assert!(filter.point(b"a"));
        assert!(!filter.point(b"aa"), "wrong length");
        assert!(filter.prefix(b"a"));
        assert!(filter.range(b"a", true, b"a", true));
        assert!(!filter.range(b"a", false, b"a", true));
    }

    #[test]
    fn dense_single_byte_keys_have_empty_links() {
        let keys: Vec<[u8; 1]> = (0u8..=255).map(|b| [b]).collect();
        let filter = Filter::from_sorted_with_conf(&keys, FilterConf::seeded(31)).unwrap();
        for key in &keys {
            assert!(filter.point(key));
        }
        assert!(!filter.point(b"aa"));
        assert!(filter.range(&[17], false, &[19], false), "contains 18");
        let restored = Filter::deserialize(&filter.serialize()).unwrap();
        assert!(restored.point(&[0]) && restored.point(&[255]));
    }

    #[test]
    fn invalid_inputs_are_rejected() {
        let no_keys: [&[u8]; 0] = [];
        assert!(matches!(Filter::from_sorted(&no_keys), Err(BuildError::Empty)));
        assert!(matches!(
            Filter::from_sorted(&[b"".as_slice(), b"a"]),
            Err(BuildError::EmptyKey)
        ));
        assert!(matches!(
            Filter::from_sorted(&[b"b".as_slice(), b"a"]),
            Err(BuildError::Unsorted)
        ));
        assert!(matches!(
            Filter::from_sorted(&[b"a".as_slice(), b"a"]),
            Err(BuildError::Unsorted)
        ));
    }

    #[test]
    fn construction_recovers_from_peeling_failures() {
        let mut conf = FilterConf::seeded(0xF00D);
        conf.forced_failures = 2;
        let keys: [&[u8]; 3] = [b"ab", b"ac", b"bc"];
        let filter = Filter::from_sorted_with_conf(&keys, conf).unwrap();
        for key in keys {
            assert!(filter.point(key));
        }
    }

    #[test]
    fn exhausted_retry_budget_is_an_error() {
        let mut conf = FilterConf::seeded(0xF00D);
        conf.forced_failures = 5;
        conf.max_retries = 1;
        let result = Filter::from_sorted_with_conf(&[b"ab", b"ac"], conf);
        assert!(matches!(result, Err(BuildError::RetriesExhausted(1))));
    }

    #[test]
    fn answers_do_not_depend_on_the_hash_cache_size() {
        let keys: [&[u8]; 4] = [b"abc", b"amogus", b"kek", b"kekw"];
        let queries: [&[u8]; 7] = [b"abc", b"kek", b"kekw", b"acab", b"zzz", b"am", b"k"];
        let reference = built(&keys);
        for cache_size in [0, 3, 64, 4096] {
            let mut conf = FilterConf::seeded(0x5EED_0123);
            conf.hash_cache_size = cache_size;
            let filter = Filter::from_sorted_with_conf(&keys, conf).unwrap();
            for q in queries {
                assert_eq!(filter.point(q), reference.point(q), "point {q:?}, cache {cache_size}");
                assert_eq!(filter.prefix(q), reference.prefix(q), "prefix {q:?}, cache {cache_size}");
            }
            assert_eq!(
                filter.range(b"am", true, b"kek", false),
                reference.range(b"am", true, b"kek", false)
            );
        }
    }

    /// Builds a large prefix-free key set the way the benchmark generators
    /// do, then sweeps true-positive point and range queries and measures
    /// the false-positive fraction on keys sampled between neighbours.
    #[test]
    fn large_prefix_free_set() {
        const KEYS: usize = 200_000;
        let mut rng = XorShift64(0xBADC_0FFE_E0DD_F00D);
        let mut word = move || rng.next().unwrap_or(1);
        let mut keys: Vec<Vec<u8>> = (0..KEYS)
            .map(|_| {
                let len = 32 + (word() % 33) as usize;
                let mut key = Vec::with_capacity(len);
                while key.len() < len {
                    let bytes = word().to_le_bytes();
                    key.extend_from_slice(&bytes[..(len - key.len()).min(8)]);
                }
                key
            })
            .collect();
        keys.sort_unstable();
        keys.dedup();

        let filter = Filter::from_sorted_with_conf(&keys, FilterConf::seeded(0xFEED)).unwrap();
        assert!(matches!(filter, Filter::PrefixFree(_)));

        for key in keys.iter().step_by(10) {
            assert!(filter.point(key));
        }
        for pair in keys.windows(2).step_by(20) {
            assert!(filter.range(&pair[0], true, &pair[1], false), "interval contains its left key");
            assert!(filter.range(&pair[0], false, &pair[1], true), "interval contains its right key");
        }

        // keys strictly between neighbours are guaranteed absent; a few
        // false positives are expected, a large fraction is a defect
        let mut queried = 0usize;
        let mut false_positives = 0usize;
        for pair in keys.windows(2).step_by(10) {
            let mut absent = pair[0].clone();
            absent.push(0);
            queried += 1;
            false_positives += filter.point(&absent) as usize;
        }
        assert!(
            false_positives < queried / 2,
            "{false_positives} false positives out of {queried}"
        );
    }
}
