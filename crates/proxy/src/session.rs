//! Per-client sessions and the open-close semantics.
//!
//! Each connected client gets its own `SessionManager`; only the
//! [`CacheStore`] behind the shared write lock is common ground. The lock is
//! deliberately held across the whole fetch of an open and the whole install
//! of a close, so "fetch-or-hit" and "install-and-supersede" are atomic with
//! respect to every other client.

use std::collections::HashMap;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::RwLock;

use common::errno::{
    OpenOption, Whence, EBADF, EINVAL, EIO, EISDIR, ENOENT, EPERM, MODE_R,
};
use common::fs_path::{strip_versioning, PathMapper};
use common::proto::{UploadChunk, CHUNK_SIZE};

use crate::cache::{CacheEntry, CacheStore};
use crate::remote::{RemoteError, RemoteStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    Read,
    ReadWrite,
}

/// State of one open descriptor.
pub struct SessionState {
    pub descriptor_id: u64,
    pub logical_path: String,
    pub mode: SessionMode,
    /// Cache version pinned at open time.
    pub cache_path: PathBuf,
    /// Writer's private copy; `None` for readers and after promotion.
    pub work_path: Option<PathBuf>,
    /// Positioned handle; `None` for directory-sentinel opens.
    pub handle: Option<File>,
    pub dirty: bool,
    /// Current size of the bytes behind the handle.
    pub size_bytes: u64,
    /// Whether this descriptor holds a pin on `cache_path`.
    pub pinned: bool,
}

/// What an open's fetch resolved to.
enum Fetched {
    /// The server refused the open outright.
    Refused(i64),
    /// The path is a directory; the descriptor is a sentinel.
    Directory,
    /// A file entry, cached or sentinel, ready for a descriptor.
    Entry {
        entry: CacheEntry,
        status: i64,
        pinned: bool,
    },
}

#[derive(Debug, thiserror::Error)]
enum FetchError {
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("server returned error status {0} mid-transfer")]
    Protocol(i64),
}

enum FlushError {
    /// The upload itself failed; the working copy is intact for retry.
    Upload(RemoteError),
    Io(std::io::Error),
}

pub struct SessionManager<R: RemoteStore> {
    remote: Arc<R>,
    cache: Arc<RwLock<CacheStore>>,
    mapper: Arc<PathMapper>,
    descriptors: HashMap<u64, SessionState>,
    next_fd: u64,
}

impl<R: RemoteStore> SessionManager<R> {
    pub fn new(remote: Arc<R>, cache: Arc<RwLock<CacheStore>>, mapper: Arc<PathMapper>) -> Self {
        Self {
            remote,
            cache,
            mapper,
            descriptors: HashMap::new(),
            next_fd: 0,
        }
    }

    pub fn open_descriptors(&self) -> usize {
        self.descriptors.len()
    }

    /// Open `logical`, fetching or reusing a cached version, and return a
    /// descriptor (or a negative errno).
    pub async fn open(&mut self, logical: &str, option: OpenOption) -> i64 {
        let cache = Arc::clone(&self.cache);
        let mut store = cache.write().await;
        store.touch_all();

        let fetched = match self.fetch(&mut store, logical, option).await {
            Ok(fetched) => fetched,
            Err(err) => {
                tracing::error!(path = logical, %err, "fetch failed");
                return EIO;
            }
        };

        match fetched {
            Fetched::Refused(code) => code,
            Fetched::Directory => {
                let fd = self.alloc_fd();
                self.descriptors.insert(
                    fd,
                    SessionState {
                        descriptor_id: fd,
                        logical_path: logical.to_string(),
                        mode: SessionMode::Read,
                        cache_path: self.mapper.server_path(logical),
                        work_path: None,
                        handle: None,
                        dirty: false,
                        size_bytes: 0,
                        pinned: false,
                    },
                );
                tracing::debug!(fd, path = logical, "directory descriptor open");
                fd as i64
            }
            Fetched::Entry {
                entry,
                status,
                pinned,
            } => match self
                .install_descriptor(&mut store, &entry, status, pinned, logical)
                .await
            {
                Ok(fd) => fd as i64,
                Err(err) => {
                    tracing::error!(path = logical, %err, "open failed");
                    if pinned {
                        store.unpin(&entry.cache_path);
                    }
                    EIO
                }
            },
        }
    }

    /// Probe the server and land on a cached entry: a hit pins the existing
    /// version, a miss installs and streams a new one, a server-absent file
    /// under a create option yields a sentinel.
    async fn fetch(
        &self,
        store: &mut CacheStore,
        logical: &str,
        option: OpenOption,
    ) -> Result<Fetched, FetchError> {
        let probe = self
            .remote
            .download_chunk(logical, 0, option, true)
            .await?;
        if !probe.valid {
            return Ok(Fetched::Refused(probe.status));
        }
        if probe.is_dir {
            return Ok(Fetched::Directory);
        }
        if !probe.exists {
            if probe.status < 0 {
                return Ok(Fetched::Refused(probe.status));
            }
            let cache_path = self.mapper.versioned_cache_path(logical, probe.version);
            let entry = CacheEntry::sentinel(cache_path, logical, probe.version);
            return Ok(Fetched::Entry {
                entry,
                status: probe.status,
                pinned: false,
            });
        }

        let cache_path = self.mapper.versioned_cache_path(logical, probe.version);
        if let Some(entry) = store.lookup(&cache_path).cloned() {
            store.pin(&cache_path);
            tracing::debug!(path = logical, version = probe.version, "cache hit");
            return Ok(Fetched::Entry {
                entry,
                status: probe.status,
                pinned: true,
            });
        }

        // Miss: reserve space, supersede older versions, then stream. The
        // just-installed entry is pinned before the first chunk arrives so
        // a concurrent make_room cannot take it.
        let prefix = strip_versioning(&cache_path);
        store.make_room(probe.total_size);
        store.mark_stale(&prefix);
        let entry = CacheEntry::new(cache_path.clone(), logical, probe.version, probe.total_size);
        store.install(entry.clone());
        store.pin(&cache_path);

        if let Err(err) = self.stream_into_cache(&cache_path, logical, option).await {
            // roll the store forward to a consistent point before reporting
            store.unpin(&cache_path);
            store.remove(&cache_path);
            return Err(err);
        }
        store.sweep_stale(&prefix);
        tracing::info!(
            path = logical,
            version = probe.version,
            size = probe.total_size,
            "fetched from server"
        );
        Ok(Fetched::Entry {
            entry,
            status: probe.status,
            pinned: true,
        })
    }

    /// Drive non-probe chunks in order until the server marks the last one.
    async fn stream_into_cache(
        &self,
        cache_path: &Path,
        logical: &str,
        option: OpenOption,
    ) -> Result<(), FetchError> {
        if let Some(parent) = cache_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = File::create(cache_path).await?;
        let mut chunk_num: u64 = 0;
        loop {
            let chunk = self
                .remote
                .download_chunk(logical, chunk_num, option, false)
                .await?;
            if !chunk.valid {
                return Err(FetchError::Protocol(chunk.status));
            }
            file.seek(SeekFrom::Start(chunk_num * CHUNK_SIZE as u64))
                .await?;
            file.write_all(&chunk.data).await?;
            if chunk.last {
                break;
            }
            chunk_num += 1;
        }
        file.flush().await?;
        Ok(())
    }

    /// Build the descriptor for a fetched entry: readers open the cached
    /// file in place, writers get a private working copy.
    async fn install_descriptor(
        &mut self,
        store: &mut CacheStore,
        entry: &CacheEntry,
        status: i64,
        pinned: bool,
        logical: &str,
    ) -> Result<u64, FetchError> {
        let (mode, handle, work_path, size_bytes) = if status == MODE_R {
            let handle = File::open(&entry.cache_path).await?;
            (SessionMode::Read, handle, None, entry.size_bytes)
        } else {
            let work = self.mapper.fresh_temp_path(logical, entry.version);
            if let Some(parent) = work.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let size = if entry.valid {
                // the copy is extra cache footprint until close promotes
                // or discards it
                let copy_size = entry.size_bytes;
                if store.is_full(copy_size) {
                    store.make_room(copy_size);
                }
                store.adjust_size(copy_size as i64);
                if let Err(err) = tokio::fs::copy(&entry.cache_path, &work).await {
                    store.adjust_size(-(copy_size as i64));
                    return Err(err.into());
                }
                copy_size
            } else {
                0
            };
            let handle = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .open(&work)
                .await?;
            (SessionMode::ReadWrite, handle, Some(work), size)
        };

        let fd = self.alloc_fd();
        self.descriptors.insert(
            fd,
            SessionState {
                descriptor_id: fd,
                logical_path: logical.to_string(),
                mode,
                cache_path: entry.cache_path.clone(),
                work_path,
                handle: Some(handle),
                dirty: false,
                size_bytes,
                pinned,
            },
        );
        tracing::debug!(fd, path = logical, mode = ?mode, "descriptor open");
        Ok(fd)
    }

    /// Read up to `len` bytes from the current position.
    pub async fn read(&mut self, fd: u64, len: u64) -> (i64, Vec<u8>) {
        let Some(session) = self.descriptors.get_mut(&fd) else {
            return (EBADF, Vec::new());
        };
        let Some(handle) = session.handle.as_mut() else {
            return (EISDIR, Vec::new());
        };
        // replies must fit one frame; a short read is legal byte-stream
        // behavior and the shim simply asks again
        let len = len.min(CHUNK_SIZE as u64) as usize;
        let mut buf = vec![0u8; len];
        match handle.read(&mut buf).await {
            Ok(n) => {
                buf.truncate(n);
                (n as i64, buf)
            }
            Err(err) => {
                tracing::warn!(fd, %err, "read failed");
                (EIO, Vec::new())
            }
        }
    }

    /// Write at the current position, growing the tracked working-copy
    /// footprint (and evicting first) when the write extends the file.
    pub async fn write(&mut self, fd: u64, data: &[u8]) -> i64 {
        let cache = Arc::clone(&self.cache);
        let Some(session) = self.descriptors.get_mut(&fd) else {
            return EBADF;
        };
        if session.mode != SessionMode::ReadWrite {
            return EBADF;
        }
        let Some(handle) = session.handle.as_mut() else {
            return EBADF;
        };

        let pos = match handle.stream_position().await {
            Ok(pos) => pos,
            Err(err) => {
                tracing::warn!(fd, %err, "write failed");
                return EIO;
            }
        };
        let end = pos + data.len() as u64;
        let grow = end.saturating_sub(session.size_bytes);
        if grow > 0 {
            let mut store = cache.write().await;
            if store.is_full(grow) {
                store.make_room(grow);
            }
            store.adjust_size(grow as i64);
        }

        match handle.write_all(data).await {
            Ok(()) => {
                session.dirty = true;
                session.size_bytes = session.size_bytes.max(end);
                data.len() as i64
            }
            Err(err) => {
                if grow > 0 {
                    let mut store = cache.write().await;
                    store.adjust_size(-(grow as i64));
                }
                tracing::warn!(fd, %err, "write failed");
                EIO
            }
        }
    }

    /// Reposition the descriptor.
    pub async fn lseek(&mut self, fd: u64, offset: i64, whence: Whence) -> i64 {
        let Some(session) = self.descriptors.get_mut(&fd) else {
            return EBADF;
        };
        let Some(handle) = session.handle.as_mut() else {
            return EISDIR;
        };
        let target = match whence {
            Whence::FromStart => {
                if offset < 0 {
                    return EINVAL;
                }
                offset
            }
            Whence::FromCurrent => {
                let pos = match handle.stream_position().await {
                    Ok(pos) => pos as i64,
                    Err(_) => return EIO,
                };
                let target = pos + offset;
                if target < 0 {
                    return EINVAL;
                }
                target
            }
            Whence::FromEnd => {
                if offset > 0 {
                    return EINVAL;
                }
                let target = session.size_bytes as i64 + offset;
                if target < 0 {
                    return EINVAL;
                }
                target
            }
        };
        match handle.seek(SeekFrom::Start(target as u64)).await {
            Ok(pos) => pos as i64,
            Err(err) => {
                tracing::warn!(fd, %err, "lseek failed");
                EIO
            }
        }
    }

    /// Close a descriptor. A dirty writer uploads and installs its new
    /// version first; if the upload fails the descriptor stays open and the
    /// working copy stays on disk so the client can retry.
    pub async fn close(&mut self, fd: u64) -> i64 {
        let Some(mut session) = self.descriptors.remove(&fd) else {
            return EBADF;
        };
        let cache = Arc::clone(&self.cache);
        let mut store = cache.write().await;

        if session.mode == SessionMode::ReadWrite && session.dirty {
            match self.flush_writer(&mut store, &mut session).await {
                Ok(()) => {}
                Err(FlushError::Upload(err)) => {
                    tracing::error!(
                        path = %session.logical_path,
                        %err,
                        "upload failed; keeping working copy for retry"
                    );
                    drop(store);
                    self.descriptors.insert(fd, session);
                    return EIO;
                }
                Err(FlushError::Io(err)) => {
                    tracing::error!(path = %session.logical_path, %err, "close failed");
                    self.release(&mut store, &mut session).await;
                    return EIO;
                }
            }
        }

        self.release(&mut store, &mut session).await;
        tracing::debug!(fd, path = %session.logical_path, "descriptor closed");
        0
    }

    /// Upload the working copy, then promote it to the next version.
    async fn flush_writer(
        &self,
        store: &mut CacheStore,
        session: &mut SessionState,
    ) -> Result<(), FlushError> {
        let Some(work) = session.work_path.clone() else {
            return Ok(());
        };
        if let Some(handle) = session.handle.as_mut() {
            handle.flush().await.map_err(FlushError::Io)?;
        }

        let new_version = self
            .remote
            .version(&session.logical_path)
            .await
            .map_err(FlushError::Upload)?
            + 1;

        self.upload_file(&session.logical_path, &work, new_version)
            .await
            .map_err(FlushError::Upload)?;

        let size = tokio::fs::metadata(&work)
            .await
            .map_err(FlushError::Io)?
            .len();
        let new_path = self
            .mapper
            .versioned_cache_path(&session.logical_path, new_version);
        tokio::fs::rename(&work, &new_path)
            .await
            .map_err(FlushError::Io)?;
        session.work_path = None;
        store.adjust_size(-(session.size_bytes as i64));

        // supersede every version this close replaces, then install the
        // new one fresh
        store.mark_stale(&strip_versioning(&new_path));
        store.install(CacheEntry::new(
            new_path,
            session.logical_path.clone(),
            new_version,
            size,
        ));
        session.dirty = false;
        tracing::info!(
            path = %session.logical_path,
            version = new_version,
            size,
            "installed new version"
        );
        Ok(())
    }

    /// Stream the working copy to the server in fixed-size chunks.
    async fn upload_file(
        &self,
        logical: &str,
        work: &Path,
        version: i64,
    ) -> Result<(), RemoteError> {
        let mut file = File::open(work).await?;
        let len = file.metadata().await?.len();
        let total_chunks = len.div_ceil(CHUNK_SIZE as u64).max(1);
        for chunk_num in 0..total_chunks {
            let remaining = len - chunk_num * CHUNK_SIZE as u64;
            let take = remaining.min(CHUNK_SIZE as u64) as usize;
            let mut data = vec![0u8; take];
            file.read_exact(&mut data).await?;
            self.remote
                .upload_chunk(UploadChunk {
                    path: logical.to_string(),
                    data,
                    version,
                    chunk_num,
                    last: chunk_num + 1 == total_chunks,
                })
                .await?;
        }
        Ok(())
    }

    /// Drop a descriptor's hold on the cache: discard an unpromoted working
    /// copy, release the pin, and collect superseded versions.
    async fn release(&self, store: &mut CacheStore, session: &mut SessionState) {
        if let Some(work) = session.work_path.take() {
            if let Err(err) = tokio::fs::remove_file(&work).await {
                if err.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %work.display(), %err, "failed to remove working copy");
                }
            }
            store.adjust_size(-(session.size_bytes as i64));
        }
        if session.pinned {
            if store.lookup(&session.cache_path).is_some() {
                store.unpin(&session.cache_path);
                store.reset_lru(&session.cache_path);
            }
            session.pinned = false;
        }
        store.sweep_stale(&strip_versioning(&session.cache_path));
    }

    /// Delete a file on the server. Cached versions are left alone; the
    /// next open of the path re-versions it and makes them sweepable.
    pub async fn unlink(&mut self, logical: &str) -> i64 {
        let exists = match self.remote.exists(logical).await {
            Ok(exists) => exists,
            Err(err) => {
                tracing::warn!(path = logical, %err, "unlink failed");
                return EIO;
            }
        };
        if !exists {
            return ENOENT;
        }
        match self.remote.is_directory(logical).await {
            Ok(true) => return EISDIR,
            Ok(false) => {}
            Err(err) => {
                tracing::warn!(path = logical, %err, "unlink failed");
                return EIO;
            }
        }
        match self.remote.delete(logical).await {
            Ok(true) => 0,
            Ok(false) => EPERM,
            Err(err) => {
                tracing::warn!(path = logical, %err, "unlink failed");
                EIO
            }
        }
    }

    /// Tear the session down: close every straggler, forcing the release
    /// even when a final flush cannot complete.
    pub async fn client_done(&mut self) {
        let fds: Vec<u64> = self.descriptors.keys().copied().collect();
        for fd in fds {
            let code = self.close(fd).await;
            if code != 0 {
                tracing::warn!(fd, code, "close during teardown failed");
                if let Some(mut session) = self.descriptors.remove(&fd) {
                    let cache = Arc::clone(&self.cache);
                    let mut store = cache.write().await;
                    self.release(&mut store, &mut session).await;
                }
            }
        }
    }

    fn alloc_fd(&mut self) -> u64 {
        let fd = self.next_fd;
        self.next_fd += 1;
        fd
    }
}
