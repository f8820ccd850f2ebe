use bitm::ceiling_div;

/// Placement parameters of a dictionary's backing storage.
///
/// The storage consists of `total_pages` cells of `bits_per_value` bits,
/// organized into equal-length segments. The four cells of a hash lie in
/// four consecutive segments, beginning at the hash's *first bucket*
/// (see [`Layout::location`]).
#[derive(Clone, Copy)]
pub struct Layout {
    /// Number of keys the dictionary was sized for.
    pub keys: u32,
    /// Width of a single cell in bits.
    pub bits_per_value: u32,
    /// Width of a single cell rounded up to whole bytes.
    pub bytes_per_value: usize,
    /// Binary logarithm of the segment length.
    pub segment_len_log: u32,
    /// Total number of cells.
    pub total_pages: usize,
    /// Size of the backing storage in bytes.
    pub total_bytes: usize,
    segment_mask: u64,
    first_segment_count: u64,
}

/// The four cells assigned to a hash, and the segment its first cell falls into.
#[derive(Clone, Copy, Default)]
pub struct Location {
    pub pages: [u32; 4],
    pub first_bucket: u32,
}

impl Layout {
    pub fn new(keys: usize, bits_per_value: u32) -> Self {
        let segment_len_log = segment_len_log(keys);
        let segment_len = 1u64 << segment_len_log;
        let capacity = (keys as f64 * size_factor(keys)) as u64;
        let segment_count = ceiling_div(capacity as usize, segment_len as usize).max(4) as u64;
        let total_pages = (segment_count << segment_len_log) as usize;
        Self {
            keys: keys as u32,
            bits_per_value,
            bytes_per_value: ceiling_div(bits_per_value as usize, 8),
            segment_len_log,
            total_pages,
            total_bytes: ceiling_div(total_pages * bits_per_value as usize, 8),
            segment_mask: segment_len - 1,
            first_segment_count: segment_count - 3,
        }
    }

    /// Number of segments a first bucket can fall into.
    #[inline]
    pub fn first_bucket_count(&self) -> usize {
        self.first_segment_count as usize
    }

    /// Returns the four cells assigned to `hash`, one per segment stripe
    /// starting at the hash's first bucket.
    #[inline]
    pub fn location(&self, hash: u64) -> Location {
        let log = self.segment_len_log;
        let first_bucket = (hash >> log) % self.first_segment_count;
        let offset = first_bucket << log;
        let mut pages = [0u32; 4];
        for i in 0..4u32 {
            pages[i as usize] =
                ((hash.rotate_left(i * log) & self.segment_mask) + ((i as u64) << log) + offset) as u32;
        }
        Location { pages, first_bucket: first_bucket as u32 }
    }
}

/// Binary logarithm of the segment length appropriate for `keys` keys.
fn segment_len_log(keys: usize) -> u32 {
    if keys <= 1 { return 1; }
    (((keys as f64).ln() / 2.91f64.ln() - 0.5).floor() as i64).max(1) as u32
}

/// Storage overprovisioning factor; close to 1.075 for large key counts and
/// growing as the key count shrinks, to keep the fuse graph peelable.
fn size_factor(keys: usize) -> f64 {
    let keys = keys.max(2) as f64;
    (0.77 + 0.305 * 600_000f64.ln() / keys.ln()).max(1.075)
}
