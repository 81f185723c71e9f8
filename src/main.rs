use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use lrucached::config::{ServerConfig, StoreConfig, Variant};
use lrucached::network;
use lrucached::storage::SharedLru;

/// Memcached-style LRU cache server.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to listen on
    #[arg(short, long, default_value = "127.0.0.1:11211")]
    listen: SocketAddr,

    /// Network personality (st-blocking, mt-blocking, mt-nonblocking)
    #[arg(short, long, default_value = "mt-nonblocking")]
    variant: Variant,

    /// Cache capacity in bytes of key+value data
    #[arg(long, default_value = "67108864")]
    max_size: u64,

    /// Worker cap for the mt-blocking variant
    #[arg(long, default_value = "64")]
    max_workers: usize,

    /// Reactor threads for the mt-nonblocking variant (0 = one per core)
    #[arg(long, default_value = "0")]
    reactor_threads: usize,

    /// Receive timeout in seconds for the blocking variants
    #[arg(long, default_value = "5")]
    read_timeout_secs: u64,

    /// Largest value a storage command may declare, in bytes
    #[arg(long, default_value = "1048576")]
    max_value_size: usize,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let store = Arc::new(SharedLru::new(StoreConfig {
        max_size: args.max_size,
    }));

    let config = ServerConfig {
        listen: args.listen,
        variant: args.variant,
        max_workers: args.max_workers,
        reactor_threads: args.reactor_threads,
        read_timeout: Duration::from_secs(args.read_timeout_secs),
        max_value_size: args.max_value_size,
        ..ServerConfig::default()
    };

    // The Rust runtime already ignores SIGPIPE before main runs; a peer
    // vanishing mid-write surfaces as an EPIPE error on the send path.
    let server = network::start(&config, store)?;
    info!(
        addr = %server.local_addr(),
        variant = %args.variant,
        max_size = args.max_size,
        "cache service ready"
    );

    // Runs until killed; stop/join exists for embedders and tests.
    server.join();
    Ok(())
}
