//! Runtime configuration for the proxy process.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Address of the remote file server.
    pub server_addr: SocketAddr,
    /// Address the proxy accepts clients on.
    pub listen_addr: SocketAddr,
    /// Directory holding the on-disk cache.
    pub cache_dir: PathBuf,
    /// Cache budget in bytes; soft under pin pressure.
    pub max_cache_bytes: u64,
    pub log_level: tracing::Level,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            server_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 9090),
            listen_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)), 9091),
            cache_dir: PathBuf::from("cache"),
            max_cache_bytes: 100 * 1024 * 1024,
            log_level: tracing::Level::INFO,
        }
    }
}
