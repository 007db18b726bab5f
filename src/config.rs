use std::num::NonZeroUsize;
use std::time::Duration;

/// Hash map used for all lookup tables. Dump input is trusted, so the
/// default is FxHashMap; the `std-hash` feature swaps in SipHash.
#[cfg(not(feature = "std-hash"))]
pub type Hashmap<K, V> = rustc_hash::FxHashMap<K, V>;
#[cfg(feature = "std-hash")]
pub type Hashmap<K, V> = std::collections::HashMap<K, V>;

/// Line queue capacity of the sequential reader (producer blocks when full).
pub const SEQUENTIAL_QUEUE_CAPACITY: usize = 10;

/// Line queue capacity of the parallel reader (producer yields when full).
/// Dump lines are ~1 MiB uncompressed, so this bounds in-flight data to ~32 MiB.
pub const PARALLEL_QUEUE_CAPACITY: usize = 32;

/// Buffer size for the sequential reader's decompressed stream.
pub const READ_BUFFER_SIZE: usize = 1024 * 1024;

/// Decompressed stripe size processed per iteration by the parallel reader.
pub const STRIPE_SIZE: usize = 32 * 1024 * 1024;

/// Default read chunk size used to fill a stripe.
pub const DEFAULT_CHUNK_SIZE: usize = 4 * 1024 * 1024;

/// Default minimum interval between progress callbacks.
pub const DEFAULT_REFRESH_RATE: Duration = Duration::from_millis(200);

/// Outstanding parse tasks per worker before the pump blocks on a result.
pub const MAX_OUTSTANDING_FACTOR: usize = 2;

/// Which line-reader backend decompresses the dump files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum DecompressionBackend {
    #[default]
    Sequential,
    Parallel,
}

/// Runtime knobs consumed by the readers and the parse pump.
#[derive(Debug, Clone)]
pub struct LoaderOptions {
    pub backend: DecompressionBackend,
    /// Parse worker threads in parallel mode; 0 means all cores.
    pub workers: usize,
    /// Read chunk size in bytes for the parallel reader.
    pub chunk_size: usize,
}

impl Default for LoaderOptions {
    fn default() -> Self {
        Self {
            backend: DecompressionBackend::Sequential,
            workers: 0,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl LoaderOptions {
    pub fn effective_workers(&self) -> usize {
        if self.workers == 0 {
            std::thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(1)
        } else {
            self.workers
        }
    }
}
