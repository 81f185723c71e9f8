//! Configuration for the store and the network service.

use core::fmt;
use core::str::FromStr;
use core::time::Duration;
use std::net::{Ipv4Addr, SocketAddr};

/// Default capacity of the store: 64 MiB of key+value bytes.
pub const DEFAULT_MAX_SIZE: u64 = 64 * 1024 * 1024;

/// Default ceiling on a single declared value: 1 MiB.
pub const DEFAULT_MAX_VALUE_SIZE: usize = 1024 * 1024;

/// Configuration for the LRU store.
#[derive(Debug, Clone, Copy)]
pub struct StoreConfig {
    /// Upper bound on the sum of entry sizes, in bytes.
    pub max_size: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            max_size: DEFAULT_MAX_SIZE,
        }
    }
}

/// Which network personality drives connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    /// One thread accepts and services connections inline. Diagnostics only.
    StBlocking,
    /// One acceptor plus a capped pool of per-connection worker threads.
    MtBlocking,
    /// One acceptor plus a fixed set of non-blocking reactor threads.
    MtNonblocking,
}

impl Variant {
    pub fn as_str(&self) -> &'static str {
        match self {
            Variant::StBlocking => "st-blocking",
            Variant::MtBlocking => "mt-blocking",
            Variant::MtNonblocking => "mt-nonblocking",
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Variant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "st-blocking" | "st" => Ok(Variant::StBlocking),
            "mt-blocking" | "mt" => Ok(Variant::MtBlocking),
            "mt-nonblocking" | "epoll" => Ok(Variant::MtNonblocking),
            other => Err(format!(
                "unknown variant `{other}` (expected st-blocking, mt-blocking or mt-nonblocking)"
            )),
        }
    }
}

/// Configuration for the network service.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to listen on. Port 0 binds an ephemeral port; the bound
    /// address is reported by the running server.
    pub listen: SocketAddr,
    /// Which personality to run.
    pub variant: Variant,
    /// Cap on simultaneously served connections in the thread-per-connection
    /// personality.
    pub max_workers: usize,
    /// Reactor thread count for the non-blocking personality. Zero means one
    /// per available core.
    pub reactor_threads: usize,
    /// Receive timeout applied to client sockets in the blocking
    /// personalities, so stalled peers cannot pin a worker forever.
    pub read_timeout: Duration,
    /// Ceiling on the `bytes` field a storage command may declare.
    pub max_value_size: usize,
    /// Listen backlog.
    pub backlog: i32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            listen: SocketAddr::from((Ipv4Addr::LOCALHOST, 11211)),
            variant: Variant::MtNonblocking,
            max_workers: 64,
            reactor_threads: 0,
            read_timeout: Duration::from_secs(5),
            max_value_size: DEFAULT_MAX_VALUE_SIZE,
            backlog: 128,
        }
    }
}

impl ServerConfig {
    /// Effective reactor thread count.
    pub fn effective_reactor_threads(&self) -> usize {
        if self.reactor_threads > 0 {
            self.reactor_threads
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        }
    }
}
