//! Shared test utilities for proxy session tests

use std::sync::Arc;

use tempfile::TempDir;
use tokio::sync::RwLock;

use proxy::cache::{CacheEntry, CacheStore};
use proxy::prelude::PathMapper;
use proxy::session::SessionManager;
use proxy::testkit::TestRemote;

/// An in-process proxy: shared cache in a temp directory, counting remote.
pub struct TestEnv {
    pub remote: Arc<TestRemote>,
    pub cache: Arc<RwLock<CacheStore>>,
    pub mapper: Arc<PathMapper>,
    pub temp: TempDir,
}

/// Set up a test environment with the given cache budget.
pub fn setup(max_cache_bytes: u64) -> TestEnv {
    let temp = TempDir::new().unwrap();
    TestEnv {
        remote: Arc::new(TestRemote::new()),
        cache: Arc::new(RwLock::new(CacheStore::new(max_cache_bytes))),
        mapper: Arc::new(PathMapper::new(temp.path())),
        temp,
    }
}

impl TestEnv {
    /// A fresh client session sharing this environment's cache.
    pub fn session(&self) -> SessionManager<TestRemote> {
        SessionManager::new(
            Arc::clone(&self.remote),
            Arc::clone(&self.cache),
            Arc::clone(&self.mapper),
        )
    }

    pub async fn entry(&self, logical: &str, version: i64) -> Option<CacheEntry> {
        let path = self.mapper.versioned_cache_path(logical, version);
        self.cache.read().await.lookup(&path).cloned()
    }

    pub async fn cache_size(&self) -> u64 {
        self.cache.read().await.current_size()
    }
}
