//! Bounded cache index with LRU-with-pinning eviction.
//!
//! The store is plain data: every caller that mutates it already holds the
//! proxy-wide write lock, so methods take `&mut self` and appear atomic to
//! the rest of the system. `current_size` tracks installed entries plus the
//! working copies writers register through [`CacheStore::adjust_size`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use super::entry::CacheEntry;

pub struct CacheStore {
    entries: HashMap<PathBuf, CacheEntry>,
    current_size: u64,
    max_size: u64,
}

impl CacheStore {
    pub fn new(max_size: u64) -> Self {
        Self {
            entries: HashMap::new(),
            current_size: 0,
            max_size,
        }
    }

    pub fn current_size(&self) -> u64 {
        self.current_size
    }

    pub fn max_size(&self) -> u64 {
        self.max_size
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert a new entry. Capacity is the caller's problem: run
    /// [`CacheStore::make_room`] first. Replacing a path re-uses its slot
    /// and fixes the accounting.
    pub fn install(&mut self, entry: CacheEntry) {
        if let Some(old) = self.entries.remove(&entry.cache_path) {
            tracing::warn!(
                path = %old.cache_path.display(),
                "installing over an existing entry"
            );
            self.current_size = self.current_size.saturating_sub(old.size_bytes);
        }
        tracing::debug!(
            path = %entry.cache_path.display(),
            version = entry.version,
            size = entry.size_bytes,
            "install"
        );
        self.current_size += entry.size_bytes;
        self.entries.insert(entry.cache_path.clone(), entry);
    }

    pub fn lookup(&self, cache_path: &Path) -> Option<&CacheEntry> {
        self.entries.get(cache_path)
    }

    /// Drop an entry and unlink its file. Absent entries and already-gone
    /// files are ignored.
    pub fn remove(&mut self, cache_path: &Path) {
        let Some(entry) = self.entries.remove(cache_path) else {
            return;
        };
        self.current_size = self.current_size.saturating_sub(entry.size_bytes);
        tracing::debug!(path = %entry.cache_path.display(), "remove");
        if let Err(err) = std::fs::remove_file(&entry.cache_path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(
                    path = %entry.cache_path.display(),
                    %err,
                    "failed to unlink evicted cache file"
                );
            }
        }
    }

    pub fn pin(&mut self, cache_path: &Path) {
        match self.entries.get_mut(cache_path) {
            Some(entry) => entry.ref_count += 1,
            None => tracing::warn!(path = %cache_path.display(), "pin on absent entry"),
        }
    }

    /// Decrement the pin, clamping at zero, and refresh recency.
    pub fn unpin(&mut self, cache_path: &Path) {
        let Some(entry) = self.entries.get_mut(cache_path) else {
            tracing::warn!(path = %cache_path.display(), "unpin on absent entry");
            return;
        };
        if entry.ref_count == 0 {
            tracing::warn!(path = %cache_path.display(), "unpin below zero");
        } else {
            entry.ref_count -= 1;
        }
        entry.lru_tick = 0;
    }

    /// Age every entry by one tick. Called at the top of each open; this is
    /// the whole LRU clock.
    pub fn touch_all(&mut self) {
        for entry in self.entries.values_mut() {
            entry.lru_tick += 1;
        }
    }

    pub fn reset_lru(&mut self, cache_path: &Path) {
        if let Some(entry) = self.entries.get_mut(cache_path) {
            entry.lru_tick = 0;
        }
    }

    /// Mark every entry whose cache path starts with `prefix` as stale.
    pub fn mark_stale(&mut self, prefix: &Path) {
        for entry in self.entries.values_mut() {
            if has_prefix(&entry.cache_path, prefix) {
                entry.stale = true;
            }
        }
    }

    /// Remove every stale, unpinned entry under `prefix`.
    pub fn sweep_stale(&mut self, prefix: &Path) {
        let doomed: Vec<PathBuf> = self
            .entries
            .values()
            .filter(|e| e.stale && e.ref_count == 0 && has_prefix(&e.cache_path, prefix))
            .map(|e| e.cache_path.clone())
            .collect();
        for path in doomed {
            self.remove(&path);
        }
    }

    pub fn is_full(&self, incoming: u64) -> bool {
        self.current_size + incoming > self.max_size
    }

    /// Evict unpinned entries, oldest tick first, until `incoming` bytes
    /// fit. Pinned entries are never deleted; if only pinned entries remain
    /// the store is left over budget and the caller proceeds anyway.
    pub fn make_room(&mut self, incoming: u64) {
        while self.current_size + incoming > self.max_size {
            let victim = self
                .entries
                .values()
                .filter(|e| e.ref_count == 0)
                .max_by_key(|e| e.lru_tick)
                .map(|e| e.cache_path.clone());
            match victim {
                Some(path) => {
                    tracing::info!(path = %path.display(), "evict");
                    self.remove(&path);
                }
                None => {
                    tracing::warn!(
                        current = self.current_size,
                        max = self.max_size,
                        "every entry is pinned; running over budget"
                    );
                    break;
                }
            }
        }
    }

    /// Track working-copy footprint. The caller holds the write lock across
    /// the disk operation the delta describes.
    pub fn adjust_size(&mut self, delta: i64) {
        self.current_size = self.current_size.saturating_add_signed(delta);
    }
}

fn has_prefix(path: &Path, prefix: &Path) -> bool {
    path.as_os_str()
        .as_encoded_bytes()
        .starts_with(prefix.as_os_str().as_encoded_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn entry_with_file(dir: &TempDir, name: &str, version: i64, size: usize) -> CacheEntry {
        let path = dir.path().join(format!("{}_v{}", name, version));
        std::fs::write(&path, vec![0u8; size]).unwrap();
        CacheEntry::new(path, name, version, size as u64)
    }

    #[test]
    fn install_and_remove_track_size() {
        let dir = TempDir::new().unwrap();
        let mut store = CacheStore::new(1000);

        let entry = entry_with_file(&dir, "a.txt", 0, 400);
        let path = entry.cache_path.clone();
        store.install(entry);
        assert_eq!(store.current_size(), 400);

        store.remove(&path);
        assert_eq!(store.current_size(), 0);
        assert!(!path.exists());

        // removing again is a no-op
        store.remove(&path);
        assert_eq!(store.current_size(), 0);
    }

    #[test]
    fn make_room_evicts_highest_tick_first() {
        let dir = TempDir::new().unwrap();
        let mut store = CacheStore::new(1000);

        let old = entry_with_file(&dir, "old", 0, 400);
        let old_path = old.cache_path.clone();
        store.install(old);
        store.touch_all();

        let young = entry_with_file(&dir, "young", 0, 400);
        let young_path = young.cache_path.clone();
        store.install(young);

        // 800 in use; 400 incoming forces one eviction, and it must be the
        // entry that has aged the most.
        store.make_room(400);
        assert!(store.lookup(&old_path).is_none());
        assert!(store.lookup(&young_path).is_some());
        assert_eq!(store.current_size(), 400);
    }

    #[test]
    fn make_room_skips_pinned_entries() {
        let dir = TempDir::new().unwrap();
        let mut store = CacheStore::new(500);

        let pinned = entry_with_file(&dir, "pinned", 0, 400);
        let pinned_path = pinned.cache_path.clone();
        store.install(pinned);
        store.pin(&pinned_path);
        store.touch_all();

        // Nothing evictable: the store accepts running over budget.
        store.make_room(400);
        assert!(store.lookup(&pinned_path).is_some());
        assert_eq!(store.current_size(), 400);
        assert!(store.is_full(400));

        // Once unpinned it becomes the victim.
        store.unpin(&pinned_path);
        store.touch_all();
        store.make_room(400);
        assert!(store.lookup(&pinned_path).is_none());
        assert_eq!(store.current_size(), 0);
    }

    #[test]
    fn unpin_clamps_and_refreshes() {
        let dir = TempDir::new().unwrap();
        let mut store = CacheStore::new(1000);

        let entry = entry_with_file(&dir, "a", 0, 10);
        let path = entry.cache_path.clone();
        store.install(entry);
        store.touch_all();
        assert_eq!(store.lookup(&path).unwrap().lru_tick, 1);

        store.unpin(&path);
        let entry = store.lookup(&path).unwrap();
        assert_eq!(entry.ref_count, 0);
        assert_eq!(entry.lru_tick, 0);
    }

    #[test]
    fn mark_and_sweep_respect_pins() {
        let dir = TempDir::new().unwrap();
        let mut store = CacheStore::new(1000);

        let v0 = entry_with_file(&dir, "a.txt", 0, 100);
        let v1 = entry_with_file(&dir, "a.txt", 1, 100);
        let other = entry_with_file(&dir, "b.txt", 0, 100);
        let (v0_path, v1_path, other_path) = (
            v0.cache_path.clone(),
            v1.cache_path.clone(),
            other.cache_path.clone(),
        );
        store.install(v0);
        store.install(v1);
        store.install(other);

        let prefix = dir.path().join("a.txt");
        store.mark_stale(&prefix);
        assert!(store.lookup(&v0_path).unwrap().stale);
        assert!(store.lookup(&v1_path).unwrap().stale);
        assert!(!store.lookup(&other_path).unwrap().stale);

        // a pinned stale entry survives the sweep
        store.pin(&v1_path);
        store.sweep_stale(&prefix);
        assert!(store.lookup(&v0_path).is_none());
        assert!(store.lookup(&v1_path).is_some());
        assert!(store.lookup(&other_path).is_some());

        store.unpin(&v1_path);
        store.sweep_stale(&prefix);
        assert!(store.lookup(&v1_path).is_none());
    }

    #[test]
    fn install_over_existing_replaces_accounting() {
        let dir = TempDir::new().unwrap();
        let mut store = CacheStore::new(1000);

        let first = entry_with_file(&dir, "a", 0, 300);
        let path = first.cache_path.clone();
        store.install(first);

        let replacement = CacheEntry::new(path.clone(), "a", 0, 100);
        store.install(replacement);
        assert_eq!(store.current_size(), 100);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn adjust_size_tracks_working_copies() {
        let mut store = CacheStore::new(1000);
        store.adjust_size(600);
        assert_eq!(store.current_size(), 600);
        assert!(store.is_full(500));
        store.adjust_size(-600);
        assert_eq!(store.current_size(), 0);
    }
}
