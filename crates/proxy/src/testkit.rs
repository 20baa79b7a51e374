//! In-process remote store for session-level tests.
//!
//! `TestRemote` mirrors the server's probe and upload semantics over plain
//! in-memory state, and counts RPC traffic so tests can assert that a cache
//! hit moved no bytes. Failure switches let tests drive the error paths.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use common::errno::{OpenOption, EEXIST, EIO, EISDIR, ENOENT, EPERM, MODE_R, MODE_RW};
use common::fs_path::normalize_logical;
use common::proto::{ChunkResponse, UploadChunk, CHUNK_SIZE};

use crate::remote::{RemoteError, RemoteStore};

#[derive(Default)]
struct RemoteState {
    files: HashMap<String, Vec<u8>>,
    dirs: Vec<String>,
    versions: HashMap<String, i64>,
    staging: HashMap<(String, i64), Vec<u8>>,
}

#[derive(Default)]
pub struct TestRemote {
    state: Mutex<RemoteState>,
    pub probes: AtomicUsize,
    pub chunk_downloads: AtomicUsize,
    pub uploads: AtomicUsize,
    fail_uploads: AtomicBool,
    refuse_deletes: AtomicBool,
}

impl TestRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_file(&self, path: &str, data: &[u8]) {
        let mut state = self.state.lock().unwrap();
        state.files.insert(path.to_string(), data.to_vec());
    }

    pub fn add_dir(&self, path: &str) {
        let mut state = self.state.lock().unwrap();
        state.dirs.push(path.to_string());
    }

    pub fn data(&self, path: &str) -> Option<Vec<u8>> {
        self.state.lock().unwrap().files.get(path).cloned()
    }

    pub fn version_of(&self, path: &str) -> i64 {
        let state = self.state.lock().unwrap();
        if state.files.contains_key(path) {
            state.versions.get(path).copied().unwrap_or(0)
        } else {
            -1
        }
    }

    pub fn set_fail_uploads(&self, fail: bool) {
        self.fail_uploads.store(fail, Ordering::SeqCst);
    }

    pub fn set_refuse_deletes(&self, refuse: bool) {
        self.refuse_deletes.store(refuse, Ordering::SeqCst);
    }

    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    pub fn chunk_download_count(&self) -> usize {
        self.chunk_downloads.load(Ordering::SeqCst)
    }

    pub fn upload_count(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    fn probe(&self, state: &RemoteState, path: &str, option: OpenOption) -> ChunkResponse {
        if normalize_logical(path).starts_with("..") {
            return ChunkResponse::refused(EPERM);
        }
        if state.dirs.iter().any(|d| d == path) {
            return match option {
                OpenOption::Read => ChunkResponse {
                    valid: true,
                    exists: true,
                    is_dir: true,
                    version: 0,
                    total_size: 0,
                    chunk_num: 0,
                    last: true,
                    data: Vec::new(),
                    status: MODE_R,
                },
                _ => ChunkResponse::refused(EISDIR),
            };
        }
        match state.files.get(path) {
            Some(data) => {
                if option == OpenOption::CreateNew {
                    return ChunkResponse::refused(EEXIST);
                }
                let status = if option == OpenOption::Read {
                    MODE_R
                } else {
                    MODE_RW
                };
                ChunkResponse {
                    valid: true,
                    exists: true,
                    is_dir: false,
                    version: state.versions.get(path).copied().unwrap_or(0),
                    total_size: data.len() as u64,
                    chunk_num: 0,
                    last: true,
                    data: Vec::new(),
                    status,
                }
            }
            None => match option {
                OpenOption::Read | OpenOption::Write => ChunkResponse {
                    valid: true,
                    exists: false,
                    is_dir: false,
                    version: 0,
                    total_size: 0,
                    chunk_num: 0,
                    last: true,
                    data: Vec::new(),
                    status: ENOENT,
                },
                OpenOption::Create | OpenOption::CreateNew => ChunkResponse {
                    valid: true,
                    exists: false,
                    is_dir: false,
                    version: 0,
                    total_size: 0,
                    chunk_num: 0,
                    last: true,
                    data: Vec::new(),
                    status: MODE_RW,
                },
            },
        }
    }
}

#[async_trait]
impl RemoteStore for TestRemote {
    async fn download_chunk(
        &self,
        logical: &str,
        chunk_num: u64,
        option: OpenOption,
        probe: bool,
    ) -> Result<ChunkResponse, RemoteError> {
        let state = self.state.lock().unwrap();
        if probe {
            self.probes.fetch_add(1, Ordering::SeqCst);
            return Ok(self.probe(&state, logical, option));
        }
        self.chunk_downloads.fetch_add(1, Ordering::SeqCst);
        let Some(data) = state.files.get(logical) else {
            return Ok(ChunkResponse::refused(ENOENT));
        };
        let offset = (chunk_num as usize).saturating_mul(CHUNK_SIZE);
        let end = (offset + CHUNK_SIZE).min(data.len());
        let slice = if offset < data.len() {
            data[offset..end].to_vec()
        } else {
            Vec::new()
        };
        Ok(ChunkResponse {
            valid: true,
            exists: true,
            is_dir: false,
            version: state.versions.get(logical).copied().unwrap_or(0),
            total_size: data.len() as u64,
            chunk_num,
            last: end >= data.len(),
            data: slice,
            status: MODE_R,
        })
    }

    async fn upload_chunk(&self, chunk: UploadChunk) -> Result<(), RemoteError> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(RemoteError::Rejected(EIO));
        }
        let mut state = self.state.lock().unwrap();
        let key = (chunk.path.clone(), chunk.version);
        let staged = state.staging.entry(key.clone()).or_default();
        let offset = (chunk.chunk_num as usize).saturating_mul(CHUNK_SIZE);
        if staged.len() < offset + chunk.data.len() {
            staged.resize(offset + chunk.data.len(), 0);
        }
        staged[offset..offset + chunk.data.len()].copy_from_slice(&chunk.data);
        if chunk.last {
            let staged = state.staging.remove(&key).unwrap_or_default();
            state.files.insert(chunk.path.clone(), staged);
            state.versions.insert(chunk.path, chunk.version);
        }
        Ok(())
    }

    async fn exists(&self, logical: &str) -> Result<bool, RemoteError> {
        let state = self.state.lock().unwrap();
        Ok(state.files.contains_key(logical) || state.dirs.iter().any(|d| d == logical))
    }

    async fn is_directory(&self, logical: &str) -> Result<bool, RemoteError> {
        let state = self.state.lock().unwrap();
        Ok(state.dirs.iter().any(|d| d == logical))
    }

    async fn version(&self, logical: &str) -> Result<i64, RemoteError> {
        Ok(self.version_of(logical))
    }

    async fn delete(&self, logical: &str) -> Result<bool, RemoteError> {
        if self.refuse_deletes.load(Ordering::SeqCst) {
            return Ok(false);
        }
        let mut state = self.state.lock().unwrap();
        if state.files.remove(logical).is_none() {
            return Ok(false);
        }
        state.versions.remove(logical);
        Ok(true)
    }
}
