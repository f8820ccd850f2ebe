use std::io;

use bitm::{BitAccess, BitVec};
use dyn_size_of::GetSize;

use super::layout::{Layout, Location};
use super::peel::PeelOrder;

/// Dictionary with cells narrower than a byte (1, 2 or 4 bits),
/// bit-packed into an array of 64-bit words.
pub struct NarrowDictionary<const BITS: u8> {
    values: Box<[u64]>,
    layout: Layout,
}

impl<const BITS: u8> NarrowDictionary<BITS> {
    pub fn new(keys: usize) -> Self {
        let layout = Layout::new(keys, BITS as u32);
        Self {
            values: Box::with_zeroed_bits(layout.total_pages * BITS as usize),
            layout,
        }
    }

    #[inline]
    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Returns the value assigned to `hash`.
    /// For hashes outside the build set the result is unpredictable.
    #[inline]
    pub fn get(&self, hash: u64) -> u8 {
        let loc = self.layout.location(hash);
        let mut value = 0u64;
        for &page in &loc.pages {
            value ^= self.values.get_fragment(page as usize, BITS);
        }
        value as u8
    }

    pub(crate) fn populate<V>(&mut self, entries: &[(Location, u32)], order: &PeelOrder, value_of: V)
    where
        V: Fn(usize, &mut [u8]),
    {
        self.values.iter_mut().for_each(|w| *w = 0);
        let mut buf = [0u8; 1];
        for i in (0..order.cell.len()).rev() {
            let (loc, entry) = entries[order.entry[i] as usize];
            buf[0] = 0;
            value_of(entry as usize, &mut buf);
            let mut value = buf[0] as u64;
            for &page in &loc.pages {
                value ^= self.values.get_fragment(page as usize, BITS);
            }
            self.values.init_fragment(order.cell[i] as usize, value & ((1 << BITS) - 1), BITS);
        }
    }

    pub(crate) fn write_values(&self, output: &mut dyn io::Write) -> io::Result<()> {
        write_trailing_bytes(output, &self.values, self.layout.total_bytes)
    }

    pub(crate) fn read_values(keys: usize, input: &mut dyn io::Read) -> io::Result<Self> {
        let layout = Layout::new(keys, BITS as u32);
        let values = read_trailing_bytes(input, layout.total_pages * BITS as usize, layout.total_bytes)?;
        Ok(Self { values, layout })
    }
}

/// Writes the first `total_bytes` bytes of the little-endian image of `words`.
fn write_trailing_bytes(output: &mut dyn io::Write, words: &[u64], total_bytes: usize) -> io::Result<()> {
    let mut left = total_bytes;
    for word in words {
        if left == 0 { break; }
        let take = left.min(8);
        output.write_all(&word.to_le_bytes()[..take])?;
        left -= take;
    }
    Ok(())
}

/// Reads `total_bytes` bytes back into a zero-padded word array of `bit_len` bits.
fn read_trailing_bytes(input: &mut dyn io::Read, bit_len: usize, total_bytes: usize) -> io::Result<Box<[u64]>> {
    let mut words = Box::<[u64]>::with_zeroed_bits(bit_len);
    let mut left = total_bytes;
    for word in words.iter_mut() {
        if left == 0 { break; }
        let take = left.min(8);
        let mut buf = [0u8; 8];
        input.read_exact(&mut buf[..take])?;
        *word = u64::from_le_bytes(buf);
        left -= take;
    }
    Ok(words)
}

impl<const BITS: u8> GetSize for NarrowDictionary<BITS> {
    #[inline]
    fn size_bytes_dyn(&self) -> usize {
        self.values.size_bytes_dyn()
    }
    const USES_DYN_MEM: bool = true;
}
