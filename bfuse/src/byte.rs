use std::io;

use dyn_size_of::GetSize;

use super::layout::{Layout, Location};
use super::peel::PeelOrder;

/// Dictionary with cells occupying a whole number of bytes
/// (widths 8, 16, 24, ... bits).
pub struct ByteDictionary {
    values: Box<[u8]>,
    layout: Layout,
}

impl ByteDictionary {
    pub fn new(keys: usize, bits_per_value: u32) -> Self {
        let layout = Layout::new(keys, bits_per_value);
        Self {
            values: vec![0u8; layout.total_bytes].into_boxed_slice(),
            layout,
        }
    }

    #[inline]
    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    #[inline]
    fn row(&self, page: u32) -> &[u8] {
        let begin = page as usize * self.layout.bytes_per_value;
        &self.values[begin..begin + self.layout.bytes_per_value]
    }

    /// XORs the four cells of `hash` into the row-sized prefix of `out`.
    /// For hashes outside the build set the result is unpredictable.
    pub fn get_into(&self, hash: u64, out: &mut [u8]) {
        let loc = self.layout.location(hash);
        let row_len = self.layout.bytes_per_value;
        out[..row_len].copy_from_slice(self.row(loc.pages[0]));
        for &page in &loc.pages[1..] {
            for (o, v) in out[..row_len].iter_mut().zip(self.row(page)) {
                *o ^= v;
            }
        }
    }

    /// Returns the value of `hash` assembled as a little-endian integer.
    /// The cell width must not exceed 64 bits.
    pub fn get_u64(&self, hash: u64) -> u64 {
        debug_assert!(self.layout.bytes_per_value <= 8);
        if self.layout.bytes_per_value == 1 {
            let loc = self.layout.location(hash);
            return (self.values[loc.pages[0] as usize]
                ^ self.values[loc.pages[1] as usize]
                ^ self.values[loc.pages[2] as usize]
                ^ self.values[loc.pages[3] as usize]) as u64;
        }
        let mut buf = [0u8; 8];
        self.get_into(hash, &mut buf);
        u64::from_le_bytes(buf)
    }

    pub(crate) fn populate<V>(&mut self, entries: &[(Location, u32)], order: &PeelOrder, value_of: V)
    where
        V: Fn(usize, &mut [u8]),
    {
        self.values.fill(0);
        let row_len = self.layout.bytes_per_value;
        let mut buf = vec![0u8; row_len];
        for i in (0..order.cell.len()).rev() {
            let (loc, entry) = entries[order.entry[i] as usize];
            buf.fill(0);
            value_of(entry as usize, &mut buf);
            for &page in &loc.pages {
                let begin = page as usize * row_len;
                for (b, v) in buf.iter_mut().zip(&self.values[begin..begin + row_len]) {
                    *b ^= v;
                }
            }
            let begin = order.cell[i] as usize * row_len;
            self.values[begin..begin + row_len].copy_from_slice(&buf);
        }
    }

    pub(crate) fn write_values(&self, output: &mut dyn io::Write) -> io::Result<()> {
        output.write_all(&self.values)
    }

    pub(crate) fn read_values(keys: usize, bits_per_value: u32, input: &mut dyn io::Read) -> io::Result<Self> {
        let layout = Layout::new(keys, bits_per_value);
        let mut values = vec![0u8; layout.total_bytes].into_boxed_slice();
        input.read_exact(&mut values)?;
        Ok(Self { values, layout })
    }
}

impl GetSize for ByteDictionary {
    #[inline]
    fn size_bytes_dyn(&self) -> usize {
        self.values.size_bytes_dyn()
    }
    const USES_DYN_MEM: bool = true;
}
