//! cachefs proxy - caching intermediary between file clients and the server
//!
//! Accepts client connections, serves file operations out of a bounded
//! local cache, and propagates written files back to the server at close.

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

use common::fs_path::PathMapper;
use proxy::cache::CacheStore;
use proxy::config::ProxyConfig;
use proxy::front::{self, ProxyState};
use proxy::remote::RpcClient;

/// cachefs proxy - caching intermediary between file clients and the server
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address of the remote file server
    server_ip: IpAddr,

    /// Port of the remote file server
    server_port: u16,

    /// Directory to keep cached files in
    cache_dir: PathBuf,

    /// Cache budget in bytes
    cache_size_bytes: u64,

    /// Port to accept clients on
    #[arg(long, default_value = "9091")]
    listen_port: u16,

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

    let config = ProxyConfig {
        server_addr: SocketAddr::new(args.server_ip, args.server_port),
        listen_addr: SocketAddr::new(IpAddr::from([0, 0, 0, 0]), args.listen_port),
        cache_dir: args.cache_dir,
        max_cache_bytes: args.cache_size_bytes,
        log_level,
    };

    tracing::info!(
        server = %config.server_addr,
        cache_dir = %config.cache_dir.display(),
        budget = config.max_cache_bytes,
        "starting cachefs proxy"
    );

    // The cache starts cold; leftovers from a previous run are ignored
    // rather than reconstructed.
    tokio::fs::create_dir_all(&config.cache_dir).await?;

    let state = ProxyState {
        remote: Arc::new(RpcClient::new(config.server_addr)),
        cache: Arc::new(RwLock::new(CacheStore::new(config.max_cache_bytes))),
        mapper: Arc::new(PathMapper::new(&config.cache_dir)),
    };

    // Set up graceful shutdown
    let (shutdown_tx, shutdown_rx) = watch::channel(());
    let graceful_shutdown = async move {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to listen for ctrl+c");
        tracing::info!("received shutdown signal");
        let _ = shutdown_tx.send(());
    };
    tokio::spawn(graceful_shutdown);

    let listener = TcpListener::bind(config.listen_addr).await?;
    tracing::info!("proxy listening on {}", config.listen_addr);

    front::run(listener, state, shutdown_rx).await?;

    tracing::info!("proxy shutdown complete");
    Ok(())
}
