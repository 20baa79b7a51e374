//! Chunk-level payloads of the proxy <-> server RPC.

use serde::{Deserialize, Serialize};

/// Fixed transfer unit for downloads and uploads, both sides: 300 KiB.
pub const CHUNK_SIZE: usize = 307_200;

/// Reply to a `DownloadChunk` request.
///
/// The first request of an open is a probe: it carries no payload and the
/// server answers with the file's version, size, and an open-status code so
/// the proxy can resolve a cache hit without moving bytes. Non-probe
/// replies carry `data` for the requested `chunk_num`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkResponse {
    /// The request was legal; when false, `status` says why not.
    pub valid: bool,
    /// The file is present on the server.
    pub exists: bool,
    /// The path names a directory.
    pub is_dir: bool,
    /// Server-authoritative version of the file.
    pub version: i64,
    /// Total file size in bytes.
    pub total_size: u64,
    /// Which chunk this reply carries.
    pub chunk_num: u64,
    /// No chunks follow this one.
    pub last: bool,
    /// Chunk payload; empty for probes.
    pub data: Vec<u8>,
    /// `MODE_R`, `MODE_RW`, or a negative errno.
    pub status: i64,
}

impl ChunkResponse {
    /// A refusal: the open may not proceed at all.
    pub fn refused(status: i64) -> Self {
        Self {
            valid: false,
            exists: false,
            is_dir: false,
            version: -1,
            total_size: 0,
            chunk_num: 0,
            last: true,
            data: Vec::new(),
            status,
        }
    }
}

/// One slice of a writer's upload stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadChunk {
    pub path: String,
    pub data: Vec<u8>,
    /// Version the completed upload will install as.
    pub version: i64,
    pub chunk_num: u64,
    /// Final chunk; the server promotes the staged file on receipt.
    pub last: bool,
}
