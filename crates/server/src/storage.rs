//! Versioned file storage rooted at a single directory.
//!
//! Files live in the root under their logical names; versions exist only in
//! the in-memory table and start over at zero when the server restarts.
//! Uploads are staged beside the target file and promoted with a rename on
//! the final chunk, so a half-finished upload never shadows the previous
//! content.

use std::collections::HashMap;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use common::errno::{io_errno, OpenOption, EEXIST, EISDIR, ENOENT, EPERM, MODE_R, MODE_RW};
use common::fs_path::normalize_logical;
use common::proto::{ChunkResponse, UploadChunk, CHUNK_SIZE};

pub struct Storage {
    root: PathBuf,
    versions: HashMap<String, i64>,
}

impl Storage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            versions: HashMap::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a logical path below the root. Any path that would escape
    /// the root is rejected with `EPERM`.
    fn resolve(&self, logical: &str) -> Result<PathBuf, i64> {
        let normalized = normalize_logical(logical);
        if normalized.starts_with("..") {
            return Err(EPERM);
        }
        Ok(self.root.join(normalized))
    }

    fn version_of(&self, logical: &str) -> i64 {
        self.versions.get(logical).copied().unwrap_or(0)
    }

    /// Answer the first request of an open: metadata, version, and the
    /// open-status code for the requested option. No payload moves.
    pub async fn probe(&self, logical: &str, option: OpenOption) -> ChunkResponse {
        let path = match self.resolve(logical) {
            Ok(path) => path,
            Err(code) => return ChunkResponse::refused(code),
        };
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_dir() => match option {
                OpenOption::Read => ChunkResponse {
                    valid: true,
                    exists: true,
                    is_dir: true,
                    version: self.version_of(logical),
                    total_size: 0,
                    chunk_num: 0,
                    last: true,
                    data: Vec::new(),
                    status: MODE_R,
                },
                _ => ChunkResponse::refused(EISDIR),
            },
            Ok(meta) => {
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
                    version: self.version_of(logical),
                    total_size: meta.len(),
                    chunk_num: 0,
                    last: true,
                    data: Vec::new(),
                    status,
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => match option {
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
            Err(err) => ChunkResponse::refused(io_errno(&err)),
        }
    }

    /// Serve one content chunk.
    pub async fn read_chunk(&self, logical: &str, chunk_num: u64) -> ChunkResponse {
        let path = match self.resolve(logical) {
            Ok(path) => path,
            Err(code) => return ChunkResponse::refused(code),
        };
        match self.read_chunk_inner(&path, chunk_num).await {
            Ok((data, total_size, last)) => ChunkResponse {
                valid: true,
                exists: true,
                is_dir: false,
                version: self.version_of(logical),
                total_size,
                chunk_num,
                last,
                data,
                status: MODE_R,
            },
            Err(err) => {
                tracing::warn!(path = logical, chunk_num, %err, "read_chunk failed");
                ChunkResponse::refused(io_errno(&err))
            }
        }
    }

    async fn read_chunk_inner(
        &self,
        path: &Path,
        chunk_num: u64,
    ) -> std::io::Result<(Vec<u8>, u64, bool)> {
        let mut file = File::open(path).await?;
        let total_size = file.metadata().await?.len();
        let offset = chunk_num * CHUNK_SIZE as u64;
        let take = total_size.saturating_sub(offset).min(CHUNK_SIZE as u64) as usize;
        let mut data = vec![0u8; take];
        if take > 0 {
            file.seek(SeekFrom::Start(offset)).await?;
            file.read_exact(&mut data).await?;
        }
        let last = offset + take as u64 >= total_size;
        Ok((data, total_size, last))
    }

    /// Accept one upload chunk. Data lands in a staging file; the final
    /// chunk renames it over the target and bumps the version table.
    pub async fn apply_upload(&mut self, chunk: UploadChunk) -> i64 {
        let path = match self.resolve(&chunk.path) {
            Ok(path) => path,
            Err(code) => return code,
        };
        let staging = staging_path(&path, chunk.version);
        match self.apply_upload_inner(&path, &staging, &chunk).await {
            Ok(()) => {
                if chunk.last {
                    self.versions.insert(chunk.path.clone(), chunk.version);
                    tracing::info!(path = %chunk.path, version = chunk.version, "upload complete");
                }
                0
            }
            Err(err) => {
                tracing::warn!(path = %chunk.path, %err, "upload failed");
                io_errno(&err)
            }
        }
    }

    async fn apply_upload_inner(
        &self,
        path: &Path,
        staging: &Path,
        chunk: &UploadChunk,
    ) -> std::io::Result<()> {
        if chunk.chunk_num == 0 {
            if let Some(parent) = staging.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(chunk.chunk_num == 0)
            .open(staging)
            .await?;
        file.seek(SeekFrom::Start(chunk.chunk_num * CHUNK_SIZE as u64))
            .await?;
        file.write_all(&chunk.data).await?;
        file.flush().await?;
        if chunk.last {
            tokio::fs::rename(staging, path).await?;
        }
        Ok(())
    }

    pub async fn exists(&self, logical: &str) -> bool {
        match self.resolve(logical) {
            Ok(path) => tokio::fs::metadata(&path).await.is_ok(),
            Err(_) => false,
        }
    }

    pub async fn is_directory(&self, logical: &str) -> bool {
        match self.resolve(logical) {
            Ok(path) => tokio::fs::metadata(&path)
                .await
                .map(|m| m.is_dir())
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    /// Version of a file; -1 when absent.
    pub async fn version(&self, logical: &str) -> i64 {
        if self.exists(logical).await {
            self.version_of(logical)
        } else {
            -1
        }
    }

    /// Delete a file. Directories and escapes are refused.
    pub async fn delete(&mut self, logical: &str) -> bool {
        let Ok(path) = self.resolve(logical) else {
            return false;
        };
        let Ok(meta) = tokio::fs::metadata(&path).await else {
            return false;
        };
        if !meta.is_file() {
            return false;
        }
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                self.versions.remove(logical);
                true
            }
            Err(err) => {
                tracing::warn!(path = logical, %err, "delete failed");
                false
            }
        }
    }
}

fn staging_path(path: &Path, version: i64) -> PathBuf {
    let mut raw = path.as_os_str().to_os_string();
    raw.push(format!(".v{}.part", version));
    PathBuf::from(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn storage(dir: &TempDir) -> Storage {
        Storage::new(dir.path())
    }

    #[tokio::test]
    async fn probe_rejects_root_escape() {
        let dir = TempDir::new().unwrap();
        let store = storage(&dir);
        let resp = store.probe("../outside", OpenOption::Read).await;
        assert!(!resp.valid);
        assert_eq!(resp.status, EPERM);
    }

    #[tokio::test]
    async fn probe_status_matrix() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"hello").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let store = storage(&dir);

        let read = store.probe("a.txt", OpenOption::Read).await;
        assert!(read.valid && read.exists);
        assert_eq!(read.status, MODE_R);
        assert_eq!(read.total_size, 5);
        assert_eq!(read.version, 0);

        let write = store.probe("a.txt", OpenOption::Write).await;
        assert_eq!(write.status, MODE_RW);

        let create_new = store.probe("a.txt", OpenOption::CreateNew).await;
        assert!(!create_new.valid);
        assert_eq!(create_new.status, EEXIST);

        let missing = store.probe("nope.txt", OpenOption::Read).await;
        assert!(missing.valid && !missing.exists);
        assert_eq!(missing.status, ENOENT);

        let create = store.probe("nope.txt", OpenOption::Create).await;
        assert!(create.valid && !create.exists);
        assert_eq!(create.status, MODE_RW);

        let dir_read = store.probe("sub", OpenOption::Read).await;
        assert!(dir_read.valid && dir_read.is_dir);
        assert_eq!(dir_read.status, MODE_R);

        let dir_write = store.probe("sub", OpenOption::Write).await;
        assert!(!dir_write.valid);
        assert_eq!(dir_write.status, EISDIR);
    }

    #[tokio::test]
    async fn chunked_read_walks_the_file() {
        let dir = TempDir::new().unwrap();
        let content = vec![7u8; CHUNK_SIZE + 100];
        std::fs::write(dir.path().join("big.bin"), &content).unwrap();
        let store = storage(&dir);

        let first = store.read_chunk("big.bin", 0).await;
        assert!(first.valid);
        assert_eq!(first.data.len(), CHUNK_SIZE);
        assert!(!first.last);

        let second = store.read_chunk("big.bin", 1).await;
        assert_eq!(second.data.len(), 100);
        assert!(second.last);
    }

    #[tokio::test]
    async fn staged_upload_promotes_on_last_chunk() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"old").unwrap();
        let mut store = storage(&dir);

        let code = store
            .apply_upload(UploadChunk {
                path: "a.txt".to_string(),
                data: b"new-".to_vec(),
                version: 1,
                chunk_num: 0,
                last: false,
            })
            .await;
        assert_eq!(code, 0);
        // not promoted yet
        assert_eq!(std::fs::read(dir.path().join("a.txt")).unwrap(), b"old");

        let code = store
            .apply_upload(UploadChunk {
                path: "a.txt".to_string(),
                data: b"content".to_vec(),
                version: 1,
                chunk_num: 1,
                last: true,
            })
            .await;
        assert_eq!(code, 0);
        assert_eq!(store.version("a.txt").await, 1);
        let promoted = std::fs::read(dir.path().join("a.txt")).unwrap();
        assert_eq!(&promoted[..4], b"new-");
    }

    #[tokio::test]
    async fn version_is_minus_one_for_absent_files() {
        let dir = TempDir::new().unwrap();
        let store = storage(&dir);
        assert_eq!(store.version("ghost.txt").await, -1);
    }

    #[tokio::test]
    async fn delete_refuses_directories() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("a.txt"), b"x").unwrap();
        let mut store = storage(&dir);

        assert!(!store.delete("sub").await);
        assert!(store.delete("a.txt").await);
        assert!(!store.delete("a.txt").await);
        assert_eq!(store.version("a.txt").await, -1);
    }
}
