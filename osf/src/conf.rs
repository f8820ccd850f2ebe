pub(crate) const DEFAULT_HASH_CACHE_SIZE: usize = 1024;

/// Configuration accepted by filter constructors.
#[derive(Clone, Copy)]
pub struct FilterConf {
    /// Number of memoized hash-chain steps kept for query traversal.
    /// Larger values speed up lookups at shallow trie depths at the cost of
    /// `8 * hash_cache_size` bytes per filter. (default: 1024)
    pub hash_cache_size: usize,

    /// Longest bit string kept inline in a payload handle during
    /// construction instead of in the shared arena, in bits.
    /// At most 64. (default: 8)
    pub inline_bits: u32,

    /// Seed of the stream that hash seeds are drawn from. [`None`]
    /// (the default) starts the stream from process entropy; a fixed value
    /// makes construction deterministic.
    pub seed: Option<u64>,

    /// Upper bound on construction retries after fuse-graph peeling
    /// failures. (default: 32)
    pub max_retries: u32,

    /// Number of initial construction attempts reported as failed,
    /// for exercising the retry path in tests.
    pub(crate) forced_failures: u32,
}

impl Default for FilterConf {
    fn default() -> Self {
        Self {
            hash_cache_size: DEFAULT_HASH_CACHE_SIZE,
            inline_bits: 8,
            seed: None,
            max_retries: 32,
            forced_failures: 0,
        }
    }
}

impl FilterConf {
    /// Constructs the default configuration.
    #[inline]
    pub fn new() -> Self {
        Default::default()
    }

    /// Constructs a configuration whose hash-seed stream starts at `seed`.
    #[inline]
    pub fn seeded(seed: u64) -> Self {
        Self { seed: Some(seed), ..Default::default() }
    }
}
