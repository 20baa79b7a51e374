/**
 * The shared cache: versioned entries, size accounting,
 *  and the LRU-with-pinning eviction discipline.
 */
pub mod cache;
/**
 * Runtime configuration assembled from the CLI.
 */
pub mod config;
/**
 * Accept loop: one connection, one session.
 */
pub mod front;
/**
 * Typed facade over the server's chunk RPC, plus the
 *  trait seam tests plug an in-process remote into.
 */
pub mod remote;
/**
 * Per-descriptor state and the open-close semantics.
 */
pub mod session;
/**
 * In-process remote store for session-level tests.
 */
pub mod testkit;

pub mod prelude {
    pub use crate::cache::{CacheEntry, CacheStore};
    pub use crate::config::ProxyConfig;
    pub use crate::remote::{RemoteStore, RpcClient};
    pub use crate::session::SessionManager;
    pub use common::errno;
    pub use common::errno::{OpenOption, Whence};
    pub use common::fs_path::PathMapper;
}
