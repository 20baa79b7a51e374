//! Framed request dispatch for one proxy connection.
//!
//! The proxy opens a fresh connection per RPC, but the loop happily serves
//! multiple requests on one stream until EOF either way.

use std::sync::Arc;

use tokio::net::TcpStream;
use tokio::sync::RwLock;

use common::proto::{self, ServerRequest, ServerResponse};

use crate::storage::Storage;

pub async fn serve_conn(mut stream: TcpStream, storage: Arc<RwLock<Storage>>) {
    loop {
        let request: ServerRequest = match proto::read_frame(&mut stream).await {
            Ok(request) => request,
            Err(err) => {
                tracing::debug!(%err, "connection ended");
                return;
            }
        };

        let response = dispatch(&storage, request).await;
        if let Err(err) = proto::write_frame(&mut stream, &response).await {
            tracing::warn!(%err, "failed to send response");
            return;
        }
    }
}

async fn dispatch(storage: &Arc<RwLock<Storage>>, request: ServerRequest) -> ServerResponse {
    match request {
        ServerRequest::DownloadChunk {
            path,
            chunk_num,
            option,
            probe,
        } => {
            let storage = storage.read().await;
            let chunk = if probe {
                storage.probe(&path, option).await
            } else {
                storage.read_chunk(&path, chunk_num).await
            };
            ServerResponse::Chunk(chunk)
        }
        ServerRequest::UploadChunk(chunk) => {
            let mut storage = storage.write().await;
            ServerResponse::Ack(storage.apply_upload(chunk).await)
        }
        ServerRequest::Exists { path } => {
            let storage = storage.read().await;
            ServerResponse::Flag(storage.exists(&path).await)
        }
        ServerRequest::IsDirectory { path } => {
            let storage = storage.read().await;
            ServerResponse::Flag(storage.is_directory(&path).await)
        }
        ServerRequest::Version { path } => {
            let storage = storage.read().await;
            ServerResponse::Version(storage.version(&path).await)
        }
        ServerRequest::Delete { path } => {
            let mut storage = storage.write().await;
            ServerResponse::Flag(storage.delete(&path).await)
        }
    }
}
