//! Sled pool configuration.

use std::path::PathBuf;

/// Default page cache size for one pool.
const DEFAULT_CACHE_BYTES: u64 = 256 * 1024 * 1024;

/// Where and how a [`SledPool`](super::SledPool) keeps its data.
///
/// A migration opens two of these, one per side.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Directory of the store. Unused when `in_memory` is set.
    pub path: PathBuf,

    /// Bytes of page cache sled may hold.
    pub cache_capacity: u64,

    /// Background flush period. `None` leaves flushing to [`SledPool::flush`](super::SledPool::flush).
    pub flush_every_ms: Option<u64>,

    /// Compress pages with zstd.
    pub compression: bool,

    /// Keep everything in memory and discard it when the pool is dropped.
    pub in_memory: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./migrator_data"),
            cache_capacity: DEFAULT_CACHE_BYTES,
            flush_every_ms: Some(500),
            compression: true,
            in_memory: false,
        }
    }
}

impl StorageConfig {
    /// A persistent store under `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// A throwaway in-memory store.
    pub fn temporary() -> Self {
        Self {
            path: PathBuf::new(),
            in_memory: true,
            ..Default::default()
        }
    }

    /// Set the page cache size.
    pub fn with_cache_capacity(mut self, bytes: u64) -> Self {
        self.cache_capacity = bytes;
        self
    }

    /// Set the background flush period.
    pub fn with_flush_every_ms(mut self, ms: Option<u64>) -> Self {
        self.flush_every_ms = ms;
        self
    }

    pub(crate) fn to_sled_config(&self) -> sled::Config {
        let base = sled::Config::new()
            .cache_capacity(self.cache_capacity)
            .use_compression(self.compression)
            .flush_every_ms(self.flush_every_ms);

        if self.in_memory {
            base.temporary(true)
        } else {
            base.path(&self.path)
        }
    }
}
