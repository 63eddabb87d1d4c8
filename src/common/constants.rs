//! Engine-wide constants

/// Default number of rows a chunk is grown to before a new one is started.
pub const DEFAULT_CHUNK_SIZE: usize = 25_000;

/// Assumed L2 cache capacity in bytes. Both join operators size their
/// partitions against this figure; it is not probed from the hardware.
pub const ASSUMED_L2_CACHE_SIZE: usize = 256_000;

/// Minimum partition size before the sort-merge join writes output chunks
/// through scheduler jobs instead of sequentially.
pub const PARALLEL_OUTPUT_WRITE_THRESHOLD: usize = 10_000;
