//! Typed facade over the server's chunk RPC.
//!
//! [`RemoteStore`] is the seam between the session layer and the network:
//! production code talks to [`RpcClient`], tests plug in
//! [`crate::testkit::TestRemote`].

use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::net::TcpStream;

use common::errno::OpenOption;
use common::proto::{self, ChunkResponse, ServerRequest, ServerResponse, UploadChunk, WireError};

#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("wire error: {0}")]
    Wire(#[from] WireError),
    #[error("server rejected the request: {0}")]
    Rejected(i64),
    #[error("unexpected response to {0}")]
    UnexpectedResponse(&'static str),
}

/// Chunk-oriented remote file API, mirroring the wire contract.
#[async_trait]
pub trait RemoteStore: Send + Sync + 'static {
    /// Fetch one chunk, or probe for metadata when `probe` is set.
    async fn download_chunk(
        &self,
        logical: &str,
        chunk_num: u64,
        option: OpenOption,
        probe: bool,
    ) -> Result<ChunkResponse, RemoteError>;

    async fn upload_chunk(&self, chunk: UploadChunk) -> Result<(), RemoteError>;

    async fn exists(&self, logical: &str) -> Result<bool, RemoteError>;

    async fn is_directory(&self, logical: &str) -> Result<bool, RemoteError>;

    /// Server-authoritative version of a file; -1 when absent.
    async fn version(&self, logical: &str) -> Result<i64, RemoteError>;

    /// Delete a file; false means the server refused.
    async fn delete(&self, logical: &str) -> Result<bool, RemoteError>;
}

/// TCP-backed implementation. Each call opens a fresh connection, sends one
/// request frame, and reads one reply frame; there is no connection state to
/// share or poison between concurrent sessions.
#[derive(Debug, Clone)]
pub struct RpcClient {
    server_addr: SocketAddr,
}

impl RpcClient {
    pub fn new(server_addr: SocketAddr) -> Self {
        Self { server_addr }
    }

    async fn call(&self, request: ServerRequest) -> Result<ServerResponse, RemoteError> {
        let mut stream = TcpStream::connect(self.server_addr).await?;
        proto::write_frame(&mut stream, &request).await?;
        let response = proto::read_frame(&mut stream).await?;
        Ok(response)
    }
}

#[async_trait]
impl RemoteStore for RpcClient {
    async fn download_chunk(
        &self,
        logical: &str,
        chunk_num: u64,
        option: OpenOption,
        probe: bool,
    ) -> Result<ChunkResponse, RemoteError> {
        tracing::debug!(path = logical, chunk_num, probe, "download_chunk");
        let request = ServerRequest::DownloadChunk {
            path: logical.to_string(),
            chunk_num,
            option,
            probe,
        };
        match self.call(request).await? {
            ServerResponse::Chunk(chunk) => Ok(chunk),
            _ => Err(RemoteError::UnexpectedResponse("download_chunk")),
        }
    }

    async fn upload_chunk(&self, chunk: UploadChunk) -> Result<(), RemoteError> {
        tracing::debug!(
            path = %chunk.path,
            chunk_num = chunk.chunk_num,
            last = chunk.last,
            "upload_chunk"
        );
        match self.call(ServerRequest::UploadChunk(chunk)).await? {
            ServerResponse::Ack(0) => Ok(()),
            ServerResponse::Ack(code) => Err(RemoteError::Rejected(code)),
            _ => Err(RemoteError::UnexpectedResponse("upload_chunk")),
        }
    }

    async fn exists(&self, logical: &str) -> Result<bool, RemoteError> {
        let request = ServerRequest::Exists {
            path: logical.to_string(),
        };
        match self.call(request).await? {
            ServerResponse::Flag(flag) => Ok(flag),
            _ => Err(RemoteError::UnexpectedResponse("exists")),
        }
    }

    async fn is_directory(&self, logical: &str) -> Result<bool, RemoteError> {
        let request = ServerRequest::IsDirectory {
            path: logical.to_string(),
        };
        match self.call(request).await? {
            ServerResponse::Flag(flag) => Ok(flag),
            _ => Err(RemoteError::UnexpectedResponse("is_directory")),
        }
    }

    async fn version(&self, logical: &str) -> Result<i64, RemoteError> {
        let request = ServerRequest::Version {
            path: logical.to_string(),
        };
        match self.call(request).await? {
            ServerResponse::Version(version) => Ok(version),
            _ => Err(RemoteError::UnexpectedResponse("version")),
        }
    }

    async fn delete(&self, logical: &str) -> Result<bool, RemoteError> {
        let request = ServerRequest::Delete {
            path: logical.to_string(),
        };
        match self.call(request).await? {
            ServerResponse::Flag(flag) => Ok(flag),
            _ => Err(RemoteError::UnexpectedResponse("delete")),
        }
    }
}
