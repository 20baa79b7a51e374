//! Requests and responses on the proxy <-> server wire.

use serde::{Deserialize, Serialize};

use crate::errno::OpenOption;

use super::chunk::{ChunkResponse, UploadChunk};

/// One RPC from the proxy. Each request rides its own connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ServerRequest {
    DownloadChunk {
        path: String,
        chunk_num: u64,
        option: OpenOption,
        /// First request of an open: reply with metadata only.
        probe: bool,
    },
    UploadChunk(UploadChunk),
    Exists { path: String },
    IsDirectory { path: String },
    Version { path: String },
    Delete { path: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ServerResponse {
    Chunk(ChunkResponse),
    Flag(bool),
    /// Version of a file; -1 when absent.
    Version(i64),
    /// Upload outcome: 0 on success, a negative errno otherwise.
    Ack(i64),
}
