#![doc = include_str!("../README.md")]
//!
//! ---
//!
//! # Crate layout
//!
//! | Module | Responsibility |
//! |--------|----------------|
//! | [`lru`] | size-bounded LRU store over an index arena |
//! | [`storage`] | backend trait and the mutex-shared store |
//! | [`protocol`] | incremental command header parser |
//! | [`execute`] | command objects and reply formatting |
//! | [`network`] | the three server personalities and their lifecycle |
//! | [`config`] | store and server configuration |
//! | [`metrics`] | store counters surfaced by the `stats` command |
//!
//! Data flows bytes → connection buffer → parser → command → store → reply
//! queue → socket. Control flows from an acceptor to per-connection
//! scheduling that differs per personality; everything else is shared.

/// Store and server configuration.
pub mod config;

/// Cache entry and lookup value types.
pub mod entry;

/// Executable commands and reply formatting.
pub mod execute;

/// Arena-backed ordered list tracking usage recency.
///
/// Internal infrastructure of the store; kept crate-private because its
/// index contract is easy to misuse from the outside.
pub(crate) mod list;

/// Size-bounded LRU store.
pub mod lru;

/// Store counters and the `stats` snapshot.
pub mod metrics;

/// Network personalities and server lifecycle.
pub mod network;

/// Incremental parser for the memcached text protocol subset.
pub mod protocol;

/// Backend trait and the shared, mutex-guarded store.
pub mod storage;

pub use config::{ServerConfig, StoreConfig, Variant};
pub use entry::{StoreEntry, Value};
pub use execute::Command;
pub use lru::LruStore;
pub use network::ServerControl;
pub use protocol::{ParseError, Parser};
pub use storage::{SharedLru, Storage};
