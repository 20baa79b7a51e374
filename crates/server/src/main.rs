//! cachefs server - versioned file storage behind the chunk RPC

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::{watch, RwLock};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use server::handler;
use server::storage::Storage;

/// cachefs server - versioned file storage behind the chunk RPC
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Port to listen on
    port: u16,

    /// Directory served as the storage root
    root_dir: PathBuf,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let (non_blocking_writer, _guard) = tracing_appender::non_blocking(std::io::stdout());
    let log_level: tracing::Level = args.log_level.parse().unwrap_or(tracing::Level::INFO);
    let env_filter = EnvFilter::builder()
        .with_default_directive(log_level.into())
        .from_env_lossy();

    let stderr_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(non_blocking_writer)
        .with_filter(env_filter);

    tracing_subscriber::registry().with(stderr_layer).init();

    tokio::fs::create_dir_all(&args.root_dir).await?;
    let storage = Arc::new(RwLock::new(Storage::new(&args.root_dir)));

    tracing::info!(
        root = %args.root_dir.display(),
        port = args.port,
        "starting cachefs server"
    );

    // Set up graceful shutdown
    let (shutdown_tx, mut shutdown_rx) = watch::channel(());
    let graceful_shutdown = async move {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to listen for ctrl+c");
        tracing::info!("received shutdown signal");
        let _ = shutdown_tx.send(());
    };
    tokio::spawn(graceful_shutdown);

    let listen_addr = SocketAddr::new(IpAddr::from([0, 0, 0, 0]), args.port);
    let listener = TcpListener::bind(listen_addr).await?;
    tracing::info!("server listening on {}", listen_addr);

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => break,
            accepted = listener.accept() => {
                let (stream, peer) = accepted?;
                tracing::debug!(%peer, "proxy connected");
                let storage = Arc::clone(&storage);
                tokio::spawn(handler::serve_conn(stream, storage));
            }
        }
    }

    tracing::info!("server shutdown complete");
    Ok(())
}
