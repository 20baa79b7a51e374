//! Metadata for one cached version of a logical path.

use std::path::PathBuf;

/// One versioned file in the cache directory.
///
/// Entries are pure bookkeeping; the bytes live at `cache_path`. An entry
/// with `valid == false` is a sentinel for a file the server does not have
/// yet (a create-mode open); sentinels are handed to the session layer but
/// never installed in the store.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Unique on-disk path, version suffix included.
    pub cache_path: PathBuf,
    /// Server-relative identifier this entry caches.
    pub logical_path: String,
    /// Version of the content at `cache_path`.
    pub version: i64,
    pub size_bytes: u64,
    /// Open descriptors currently holding this version.
    pub ref_count: u32,
    /// Coarse LRU clock; higher means longer since last use.
    pub lru_tick: u64,
    /// Superseded by a newer installed version.
    pub stale: bool,
    /// Backed by a real cached file rather than a sentinel.
    pub valid: bool,
}

impl CacheEntry {
    pub fn new(
        cache_path: PathBuf,
        logical_path: impl Into<String>,
        version: i64,
        size_bytes: u64,
    ) -> Self {
        Self {
            cache_path,
            logical_path: logical_path.into(),
            version,
            size_bytes,
            ref_count: 0,
            lru_tick: 0,
            stale: false,
            valid: true,
        }
    }

    /// Sentinel for a server-absent file: no bytes behind it.
    pub fn sentinel(cache_path: PathBuf, logical_path: impl Into<String>, version: i64) -> Self {
        Self {
            valid: false,
            ..Self::new(cache_path, logical_path, version, 0)
        }
    }

    pub fn pinned(&self) -> bool {
        self.ref_count > 0
    }
}
