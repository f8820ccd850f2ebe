//! The machinery shared by the three filter variants: construction with
//! retry, the per-side link dictionaries, link extraction, and the common
//! part of the serialized form.

use std::io;

use bfuse::Dictionary;
use binout::{AsIs, Serializer};
use bitm::ceiling_div;
use butils::XorShift64;
use dyn_size_of::GetSize;

use crate::conf::FilterConf;
use crate::hash::{entropy, HashCache};
use crate::keyset::KeySetInfo;
use crate::trie::{TrieData, Walker};
use crate::BuildError;

/// Width in bits of the length dictionaries: the smallest whole-byte width
/// able to hold `max_link` as a value.
pub(crate) fn length_bits(max_link: u64) -> u32 {
    let mut bits = 8;
    while 1u64 << bits <= max_link {
        bits += 8;
    }
    bits
}

/// Dictionaries and hashing state common to all trie encodings.
pub(crate) struct Engine {
    /// Stored link length per child side, minus the implied first bit.
    pub lengths: [Dictionary; 2],
    /// Link chunks per child side and power-of-two width.
    pub links: [[Option<Dictionary>; 32]; 2],
    /// Bit `w` set iff a chunk dictionary of width `2^w` exists on that side.
    pub links_mask: [u32; 2],
    pub max_link_bits: u32,
    pub hash_seed: u64,
    pub cache: HashCache,
}

/// Drives the shared construction skeleton: walk once collecting payloads,
/// build every dictionary, and on any peeling failure redraw the hash seed,
/// re-walk hashes only, and rebuild, up to the configured retry budget.
///
/// `make_extras` sizes the variant-specific dictionaries after the first
/// walk; `build_extras` (re)builds them from the collected payloads and
/// reports success.
pub(crate) fn construct<X>(
    keys: &[&[u8]],
    info: &KeySetInfo,
    conf: &FilterConf,
    make_extras: impl FnOnce(&TrieData) -> X,
    build_extras: impl Fn(&mut X, &TrieData) -> bool,
) -> Result<(Engine, X), BuildError> {
    let walker = Walker { keys };
    let mut data = TrieData::new(keys.len(), info.total_bytes, conf.inline_bits);
    let mut seeds = XorShift64(conf.seed.unwrap_or_else(entropy).max(1));

    let mut hash_seed = draw(&mut seeds);
    walker.walk::<true>(&mut data, 0, keys.len() - 1, 0, hash_seed, hash_seed);

    let len_bits = length_bits(data.max_link_bits as u64);
    log::debug!(
        "trie of {} nodes, max link {} bits, {}-bit length cells",
        data.hashes.len(), data.max_link_bits, len_bits
    );
    let mut lengths = [
        Dictionary::new(data.lengths[0].len(), len_bits),
        Dictionary::new(data.lengths[1].len(), len_bits),
    ];
    let mut links: [[Option<Dictionary>; 32]; 2] = std::array::from_fn(|side| {
        std::array::from_fn(|w| {
            let chunks = &data.chunks[side][w];
            (!chunks.is_empty()).then(|| Dictionary::new(chunks.len(), 1u32 << w))
        })
    });
    let mut links_mask = [0u32; 2];
    for side in 0..2 {
        for w in 0..32 {
            if links[side][w].is_some() {
                links_mask[side] |= 1 << w;
            }
        }
    }
    let mut extras = make_extras(&data);

    let mut forced = conf.forced_failures;
    let mut retries = 0u32;
    loop {
        let mut built = build_links(&data, &mut lengths, &mut links);
        built &= build_extras(&mut extras, &data);
        if forced > 0 {
            forced -= 1;
            built = false;
        }
        if built {
            break;
        }
        retries += 1;
        if retries > conf.max_retries {
            return Err(BuildError::RetriesExhausted(conf.max_retries));
        }
        hash_seed = draw(&mut seeds);
        data.hashes.clear();
        walker.walk::<false>(&mut data, 0, keys.len() - 1, 0, hash_seed, hash_seed);
    }
    if retries > 0 {
        log::debug!("construction succeeded after {retries} retries");
    }

    let engine = Engine {
        lengths,
        links,
        links_mask,
        max_link_bits: data.max_link_bits as u32,
        hash_seed,
        cache: HashCache::new(hash_seed, conf.hash_cache_size),
    };
    Ok((engine, extras))
}

#[inline]
fn draw(seeds: &mut XorShift64) -> u64 {
    seeds.next().unwrap_or(0x9E37_79B9_7F4A_7C15)
}

fn build_links(
    data: &TrieData,
    lengths: &mut [Dictionary; 2],
    links: &mut [[Option<Dictionary>; 32]; 2],
) -> bool {
    let hashes = &data.hashes;
    let mut built = true;
    for side in 0..2 {
        let entries = &data.lengths[side];
        built &= lengths[side].try_build(
            entries.len(),
            |i| hashes[entries[i].0 as usize],
            |i, out| {
                let bytes = entries[i].1.to_le_bytes();
                let take = out.len().min(8);
                out[..take].copy_from_slice(&bytes[..take]);
            },
        );
        for w in 0..32 {
            if let Some(dict) = &mut links[side][w] {
                let entries = &data.chunks[side][w];
                built &= dict.try_build(
                    entries.len(),
                    |i| hashes[entries[i].0 as usize],
                    |i, out| entries[i].1.copy_to(&data.arena, out),
                );
            }
        }
    }
    built
}

impl Engine {
    /// Reconstructs the link of child `bit` at the node identified by `hash`
    /// into the front of `buffer`, returning its length in bits.
    ///
    /// Returns [`None`] for a fetched length the builder could not have
    /// stored, which can only happen off the real trie; the caller treats
    /// the node as having no link on that side.
    pub fn extract_link(&self, bit: bool, hash: u64, buffer: &mut [u8]) -> Option<usize> {
        let side = bit as usize;
        let len = self.lengths[side].get_u64(hash);
        if len > self.max_link_bits as u64 {
            return None;
        }
        let len = len as usize;
        let mut at = 0;
        for w in (3..32).rev() {
            if len & (1 << w) == 0 {
                continue;
            }
            let bytes = 1usize << (w - 3);
            match &self.links[side][w] {
                Some(dict) => dict.get_into(hash, &mut buffer[at..at + bytes]),
                None => buffer[at..at + bytes].fill(0),
            }
            at += bytes;
        }
        if len & 7 != 0 {
            let mut tail = 0u8;
            if len & 1 != 0 {
                tail |= self.chunk(side, 0, hash);
            }
            if len & 2 != 0 {
                tail = (tail << 2) | self.chunk(side, 1, hash);
            }
            if len & 4 != 0 {
                tail = (tail << 4) | self.chunk(side, 2, hash);
            }
            buffer[at] = tail;
        }
        Some(len)
    }

    #[inline]
    fn chunk(&self, side: usize, w: usize, hash: u64) -> u8 {
        match &self.links[side][w] {
            Some(dict) => dict.get_u64(hash) as u8,
            None => 0,
        }
    }

    /// A scratch buffer able to hold any link of this filter, or [`None`]
    /// when the allocation fails; queries then answer `true`, which a
    /// membership filter may always do.
    pub fn link_buffer(&self) -> Option<Vec<u8>> {
        let bytes = ceiling_div(self.max_link_bits as usize, 8);
        let mut buffer = Vec::new();
        buffer.try_reserve_exact(bytes).ok()?;
        buffer.resize(bytes, 0);
        Some(buffer)
    }

    pub fn write(&self, output: &mut dyn io::Write) -> io::Result<()> {
        AsIs::write(output, self.hash_seed)?;
        AsIs::write(output, self.max_link_bits)?;
        for side in 0..2 {
            self.lengths[side].write(output)?;
            AsIs::write(output, self.links_mask[side])?;
            for dict in self.links[side].iter().flatten() {
                dict.write(output)?;
            }
        }
        Ok(())
    }

    pub fn write_bytes(&self) -> usize {
        let mut bytes = 8 + 4;
        for side in 0..2 {
            bytes += self.lengths[side].write_bytes() + 4;
            bytes += self.links[side].iter().flatten().map(Dictionary::write_bytes).sum::<usize>();
        }
        bytes
    }

    pub fn read(input: &mut dyn io::Read, hash_cache_size: usize) -> io::Result<Self> {
        let hash_seed = AsIs::read(input)?;
        let max_link_bits = AsIs::read(input)?;
        let (length0, mask0, links0) = read_side(input)?;
        let (length1, mask1, links1) = read_side(input)?;
        Ok(Self {
            lengths: [length0, length1],
            links: [links0, links1],
            links_mask: [mask0, mask1],
            max_link_bits,
            hash_seed,
            cache: HashCache::new(hash_seed, hash_cache_size),
        })
    }
}

fn read_side(input: &mut dyn io::Read) -> io::Result<(Dictionary, u32, [Option<Dictionary>; 32])> {
    let length = Dictionary::read(input)?;
    let mask: u32 = AsIs::read(input)?;
    let mut links: [Option<Dictionary>; 32] = std::array::from_fn(|_| None);
    for (w, slot) in links.iter_mut().enumerate() {
        if mask & (1 << w) != 0 {
            *slot = Some(Dictionary::read(input)?);
        }
    }
    Ok((length, mask, links))
}

impl GetSize for Engine {
    fn size_bytes_dyn(&self) -> usize {
        self.lengths.iter().map(|d| d.size_bytes_dyn()).sum::<usize>()
            + self.links.iter().flatten().flatten().map(|d| d.size_bytes_dyn()).sum::<usize>()
            + self.cache.size_bytes_dyn()
    }
    const USES_DYN_MEM: bool = true;
}

/// Bit-level traversal state of a query: the current node hash with its
/// seed-chain position, and the partially consumed link.
#[derive(Clone, Copy)]
pub(crate) struct Cursor<'f> {
    engine: &'f Engine,
    pub hash: u64,
    seed: u64,
    hash_id: usize,
    link_len: usize,
    link_pos: usize,
}

/// Bit `pos` of a link buffer (LSB-first within each byte).
#[inline(always)]
pub(crate) fn link_bit(buffer: &[u8], pos: usize) -> bool {
    (buffer[pos >> 3] >> (pos & 7)) & 1 != 0
}

impl<'f> Cursor<'f> {
    #[inline]
    pub fn new(engine: &'f Engine) -> Self {
        Self {
            engine,
            hash: engine.hash_seed,
            seed: engine.hash_seed,
            hash_id: 0,
            link_len: 0,
            link_pos: 0,
        }
    }

    /// True while the current link still has unmatched bits.
    #[inline(always)]
    pub fn in_link(&self) -> bool {
        self.link_pos < self.link_len
    }

    /// The next unmatched bit of the current link.
    #[inline(always)]
    pub fn peek(&self, buffer: &[u8]) -> bool {
        link_bit(buffer, self.link_pos)
    }

    /// Consumes one link bit; a fully consumed link is forgotten.
    #[inline(always)]
    pub fn advance(&mut self) {
        self.link_pos += 1;
        if self.link_pos == self.link_len {
            self.link_pos = 0;
            self.link_len = 0;
        }
    }

    /// Fetches the link of child `bit` at the current node into `buffer` and
    /// steps the hash to that child. `false` means the node cannot have such
    /// a link (off-trie state, see [`Engine::extract_link`]).
    #[inline]
    pub fn take_link(&mut self, bit: bool, buffer: &mut [u8]) -> bool {
        let engine = self.engine;
        match engine.extract_link(bit, self.hash, buffer) {
            Some(len) => {
                self.link_len = len;
                self.link_pos = 0;
                engine.cache.descend(&mut self.hash, &mut self.seed, &mut self.hash_id, bit);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn length_cells_widen_by_whole_bytes() {
        assert_eq!(length_bits(0), 8);
        assert_eq!(length_bits(255), 8);
        assert_eq!(length_bits(256), 16);
        assert_eq!(length_bits(65_535), 16);
        assert_eq!(length_bits(65_536), 24);
    }
}
