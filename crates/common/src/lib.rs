/**
 * Stable numeric codes shared by every process:
 *  errnos reported to clients, and the open-status
 *  codes the server hands back on a probe.
 */
pub mod errno;
/**
 * Translation between logical (server-relative) paths
 *  and the versioned on-disk paths the proxy keeps
 *  inside its cache directory.
 */
pub mod fs_path;
/**
 * Framed bincode messages for both wires:
 *  client <-> proxy operations and the
 *  proxy <-> server chunk RPC.
 */
pub mod proto;

pub mod prelude {
    pub use crate::errno::{OpenOption, Whence};
    pub use crate::fs_path::PathMapper;
    pub use crate::proto::{ChunkResponse, UploadChunk, CHUNK_SIZE};
}
