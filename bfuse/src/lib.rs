#![doc = include_str!("../README.md")]

mod byte;
mod layout;
mod narrow;
mod peel;

pub use byte::ByteDictionary;
pub use layout::{Layout, Location};
pub use narrow::NarrowDictionary;

pub use dyn_size_of::GetSize;

use std::io;

use binout::{AsIs, Serializer};
use peel::{peel, sort_by_first_bucket};

/// A static dictionary mapping 64-bit hashes to fixed-width values,
/// in one of four width-specialized representations.
///
/// The width is fixed at construction: sub-byte widths are bit-packed,
/// anything else is stored as whole-byte rows.
pub enum Dictionary {
    Bit(NarrowDictionary<1>),
    TwoBit(NarrowDictionary<2>),
    FourBit(NarrowDictionary<4>),
    Byte(ByteDictionary),
}

impl Dictionary {
    /// Constructs an empty dictionary sized for `keys` values of
    /// `bits_per_value` bits each.
    pub fn new(keys: usize, bits_per_value: u32) -> Self {
        match bits_per_value {
            1 => Self::Bit(NarrowDictionary::new(keys)),
            2 => Self::TwoBit(NarrowDictionary::new(keys)),
            4 => Self::FourBit(NarrowDictionary::new(keys)),
            _ => Self::Byte(ByteDictionary::new(keys, bits_per_value)),
        }
    }

    #[inline]
    pub fn layout(&self) -> &Layout {
        match self {
            Self::Bit(d) => d.layout(),
            Self::TwoBit(d) => d.layout(),
            Self::FourBit(d) => d.layout(),
            Self::Byte(d) => d.layout(),
        }
    }

    /// Tries to assign a value to each of `n` entries. `hash_of(i)` must
    /// return the hash of entry `i`; `value_of(i, out)` must write its value
    /// into the row-sized buffer `out` as little-endian bytes.
    ///
    /// Returns `false` if the fuse graph of the hashes failed to peel.
    /// The dictionary can then be rebuilt in place with re-hashed entries.
    pub fn try_build<H, V>(&mut self, n: usize, hash_of: H, value_of: V) -> bool
    where
        H: Fn(usize) -> u64,
        V: Fn(usize, &mut [u8]),
    {
        debug_assert_eq!(n, self.layout().keys as usize);
        let mut entries: Vec<(Location, u32)> =
            (0..n).map(|i| (self.layout().location(hash_of(i)), i as u32)).collect();
        sort_by_first_bucket(&mut entries, self.layout());
        let Some(order) = peel(&entries, self.layout().total_pages) else {
            return false;
        };
        match self {
            Self::Bit(d) => d.populate(&entries, &order, value_of),
            Self::TwoBit(d) => d.populate(&entries, &order, value_of),
            Self::FourBit(d) => d.populate(&entries, &order, value_of),
            Self::Byte(d) => d.populate(&entries, &order, value_of),
        }
        true
    }

    /// Returns the value assigned to `hash` as a little-endian integer.
    /// The cell width must not exceed 64 bits.
    #[inline]
    pub fn get_u64(&self, hash: u64) -> u64 {
        match self {
            Self::Bit(d) => d.get(hash) as u64,
            Self::TwoBit(d) => d.get(hash) as u64,
            Self::FourBit(d) => d.get(hash) as u64,
            Self::Byte(d) => d.get_u64(hash),
        }
    }

    /// Writes the value assigned to `hash` into the row-sized prefix of `out`.
    #[inline]
    pub fn get_into(&self, hash: u64, out: &mut [u8]) {
        match self {
            Self::Bit(d) => out[0] = d.get(hash),
            Self::TwoBit(d) => out[0] = d.get(hash),
            Self::FourBit(d) => out[0] = d.get(hash),
            Self::Byte(d) => d.get_into(hash, out),
        }
    }

    /// Returns the number of bytes which `write` will write.
    #[inline]
    pub fn write_bytes(&self) -> usize {
        8 + self.layout().total_bytes
    }

    /// Writes `self` to `output`: key count, cell width, then the backing bytes.
    pub fn write(&self, output: &mut dyn io::Write) -> io::Result<()> {
        AsIs::write(output, self.layout().keys)?;
        AsIs::write(output, self.layout().bits_per_value)?;
        match self {
            Self::Bit(d) => d.write_values(output),
            Self::TwoBit(d) => d.write_values(output),
            Self::FourBit(d) => d.write_values(output),
            Self::Byte(d) => d.write_values(output),
        }
    }

    /// Reads a dictionary written by [`Self::write`].
    pub fn read(input: &mut dyn io::Read) -> io::Result<Self> {
        let keys: u32 = AsIs::read(input)?;
        let bits_per_value: u32 = AsIs::read(input)?;
        Ok(match bits_per_value {
            1 => Self::Bit(NarrowDictionary::read_values(keys as usize, input)?),
            2 => Self::TwoBit(NarrowDictionary::read_values(keys as usize, input)?),
            4 => Self::FourBit(NarrowDictionary::read_values(keys as usize, input)?),
            _ => Self::Byte(ByteDictionary::read_values(keys as usize, bits_per_value, input)?),
        })
    }
}

impl GetSize for Dictionary {
    #[inline]
    fn size_bytes_dyn(&self) -> usize {
        match self {
            Self::Bit(d) => d.size_bytes_dyn(),
            Self::TwoBit(d) => d.size_bytes_dyn(),
            Self::FourBit(d) => d.size_bytes_dyn(),
            Self::Byte(d) => d.size_bytes_dyn(),
        }
    }
    const USES_DYN_MEM: bool = true;
}

#[cfg(test)]
mod tests {
    use super::*;
    use butils::XorShift64;

    /// Builds a dictionary over `n` pseudo-random hashes, re-hashing on the
    /// rare peeling failure, the way filter construction drives it.
    fn built(n: usize, bits_per_value: u32, value_of: impl Fn(usize, &mut [u8]) + Copy) -> (Dictionary, Vec<u64>) {
        for seed in XorShift64(0x0123_4567_89AB_CDEF).take(32) {
            let hashes: Vec<u64> = XorShift64(seed).take(n).collect();
            let mut dict = Dictionary::new(n, bits_per_value);
            if dict.try_build(n, |i| hashes[i], value_of) {
                return (dict, hashes);
            }
        }
        panic!("no seed produced a peelable graph");
    }

    fn scalar_value(i: usize, bits: u32) -> u64 {
        (i as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15) & ((1u64 << bits) - 1)
    }

    fn check_scalar_width(n: usize, bits: u32) {
        let (dict, hashes) = built(n, bits, |i, out| {
            let bytes = scalar_value(i, bits).to_le_bytes();
            let take = out.len().min(8);
            out[..take].copy_from_slice(&bytes[..take]);
        });
        for (i, &hash) in hashes.iter().enumerate() {
            assert_eq!(dict.get_u64(hash), scalar_value(i, bits), "width {bits}, entry {i}");
        }
    }

    #[test]
    fn stores_values_of_every_narrow_width() {
        for bits in [1, 2, 4] {
            check_scalar_width(1000, bits);
        }
    }

    #[test]
    fn stores_values_of_byte_widths() {
        for bits in [8, 16, 24, 32] {
            check_scalar_width(700, bits);
        }
    }

    #[test]
    fn stores_wide_rows() {
        let rows: Vec<[u8; 16]> = XorShift64(99)
            .take(300 * 2)
            .collect::<Vec<_>>()
            .chunks(2)
            .map(|c| {
                let mut row = [0u8; 16];
                row[..8].copy_from_slice(&c[0].to_le_bytes());
                row[8..].copy_from_slice(&c[1].to_le_bytes());
                row
            })
            .collect();
        let (dict, hashes) = built(300, 128, |i, out| out.copy_from_slice(&rows[i]));
        let mut out = [0u8; 16];
        for (i, &hash) in hashes.iter().enumerate() {
            dict.get_into(hash, &mut out);
            assert_eq!(out, rows[i]);
        }
    }

    #[test]
    fn empty_dictionary_maps_everything_to_zero() {
        let mut dict = Dictionary::new(0, 1);
        assert!(dict.try_build(0, |_| 0, |_, _| ()));
        assert_eq!(dict.get_u64(0xABCD), 0);
    }

    #[test]
    fn serialization_round_trips() {
        for bits in [1, 2, 4, 8, 24] {
            let (dict, hashes) = built(500, bits, |i, out| out[0] = (i % 251) as u8);
            let mut bytes = Vec::new();
            dict.write(&mut bytes).unwrap();
            assert_eq!(bytes.len(), dict.write_bytes());
            let restored = Dictionary::read(&mut &bytes[..]).unwrap();
            for &hash in &hashes {
                assert_eq!(restored.get_u64(hash), dict.get_u64(hash));
            }
        }
    }

    #[test]
    fn truncated_input_fails_to_read() {
        let (dict, _) = built(100, 8, |i, out| out[0] = i as u8);
        let mut bytes = Vec::new();
        dict.write(&mut bytes).unwrap();
        bytes.truncate(bytes.len() - 1);
        assert!(Dictionary::read(&mut &bytes[..]).is_err());
    }
}
