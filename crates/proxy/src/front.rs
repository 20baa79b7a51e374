//! Client-facing accept loop.
//!
//! One connection is one session: each accepted client gets a fresh
//! [`SessionManager`] whose descriptor table nobody else can see. Operations
//! from a single client are serialized by construction; cross-client
//! coordination happens entirely on the shared cache lock.

use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, RwLock};

use common::fs_path::PathMapper;
use common::proto::{self, ClientReply, ClientRequest};

use crate::cache::CacheStore;
use crate::remote::RemoteStore;
use crate::session::SessionManager;

/// Shared pieces every session is built from.
pub struct ProxyState<R: RemoteStore> {
    pub remote: Arc<R>,
    pub cache: Arc<RwLock<CacheStore>>,
    pub mapper: Arc<PathMapper>,
}

impl<R: RemoteStore> ProxyState<R> {
    fn session(&self) -> SessionManager<R> {
        SessionManager::new(
            Arc::clone(&self.remote),
            Arc::clone(&self.cache),
            Arc::clone(&self.mapper),
        )
    }
}

/// Accept clients until the shutdown channel fires.
pub async fn run<R: RemoteStore>(
    listener: TcpListener,
    state: ProxyState<R>,
    mut shutdown: watch::Receiver<()>,
) -> anyhow::Result<()> {
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                tracing::info!("proxy front shutting down");
                return Ok(());
            }
            accepted = listener.accept() => {
                let (stream, peer) = accepted?;
                tracing::info!(%peer, "client connected");
                let session = state.session();
                tokio::spawn(async move {
                    serve_client(stream, session).await;
                    tracing::info!(%peer, "client disconnected");
                });
            }
        }
    }
}

/// Dispatch one client's requests until it says done or the stream dies.
async fn serve_client<R: RemoteStore>(mut stream: TcpStream, mut session: SessionManager<R>) {
    loop {
        let request: ClientRequest = match proto::read_frame(&mut stream).await {
            Ok(request) => request,
            Err(err) => {
                tracing::debug!(%err, "client stream ended");
                break;
            }
        };

        let reply = match request {
            ClientRequest::Open { path, option } => {
                ClientReply::Code(session.open(&path, option).await)
            }
            ClientRequest::Read { fd, len } => {
                let (code, data) = session.read(fd, len).await;
                ClientReply::Data { code, data }
            }
            ClientRequest::Write { fd, data } => ClientReply::Code(session.write(fd, &data).await),
            ClientRequest::Lseek { fd, offset, whence } => {
                ClientReply::Code(session.lseek(fd, offset, whence).await)
            }
            ClientRequest::Close { fd } => ClientReply::Code(session.close(fd).await),
            ClientRequest::Unlink { path } => ClientReply::Code(session.unlink(&path).await),
            ClientRequest::Done => {
                let _ = proto::write_frame(&mut stream, &ClientReply::Code(0)).await;
                break;
            }
        };

        if let Err(err) = proto::write_frame(&mut stream, &reply).await {
            tracing::warn!(%err, "failed to reply; dropping client");
            break;
        }
    }
    session.client_done().await;
}
