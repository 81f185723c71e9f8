//! Storage interface shared by every network personality.
//!
//! Connections never see the concrete store; they execute against the
//! [`Storage`] trait. [`SharedLru`] is the production implementation: one
//! [`LruStore`] behind a single mutex, held for the full duration of each
//! call. Lock granularity is deliberately coarse; every operation observes
//! and leaves a consistent store.

use crate::config::StoreConfig;
use crate::entry::Value;
use crate::lru::LruStore;
use crate::metrics::StatsSnapshot;

use parking_lot::Mutex;

/// The backend contract of the cache service.
///
/// All mutating operations report success as a plain boolean; the store has
/// no richer error taxonomy. Implementations must serialize operations so
/// each caller sees a consistent view of its own writes.
pub trait Storage: Send + Sync {
    /// Unconditional store. Fails only when the entry alone exceeds capacity.
    fn put(&self, key: &[u8], flags: u32, value: &[u8]) -> bool;

    /// Store only if `key` is absent.
    fn put_if_absent(&self, key: &[u8], flags: u32, value: &[u8]) -> bool;

    /// Store only if `key` is present.
    fn replace(&self, key: &[u8], flags: u32, value: &[u8]) -> bool;

    /// Extend an existing value at the end.
    fn append(&self, key: &[u8], suffix: &[u8]) -> bool;

    /// Extend an existing value at the front.
    fn prepend(&self, key: &[u8], prefix: &[u8]) -> bool;

    /// Touching lookup; copies the value out.
    fn get(&self, key: &[u8]) -> Option<Value>;

    /// Remove `key`.
    fn delete(&self, key: &[u8]) -> bool;

    /// Counters for the `stats` command.
    fn stats(&self) -> StatsSnapshot;
}

/// An [`LruStore`] behind one mutex, shared across all connections.
#[derive(Debug)]
pub struct SharedLru {
    inner: Mutex<LruStore>,
}

impl SharedLru {
    /// Creates a shared store with the given configuration.
    pub fn new(config: StoreConfig) -> Self {
        SharedLru {
            inner: Mutex::new(LruStore::new(config)),
        }
    }
}

impl Storage for SharedLru {
    fn put(&self, key: &[u8], flags: u32, value: &[u8]) -> bool {
        self.inner.lock().put(key, flags, value)
    }

    fn put_if_absent(&self, key: &[u8], flags: u32, value: &[u8]) -> bool {
        self.inner.lock().put_if_absent(key, flags, value)
    }

    fn replace(&self, key: &[u8], flags: u32, value: &[u8]) -> bool {
        self.inner.lock().replace(key, flags, value)
    }

    fn append(&self, key: &[u8], suffix: &[u8]) -> bool {
        self.inner.lock().append(key, suffix)
    }

    fn prepend(&self, key: &[u8], prefix: &[u8]) -> bool {
        self.inner.lock().prepend(key, prefix)
    }

    fn get(&self, key: &[u8]) -> Option<Value> {
        self.inner.lock().get(key)
    }

    fn delete(&self, key: &[u8]) -> bool {
        self.inner.lock().delete(key)
    }

    fn stats(&self) -> StatsSnapshot {
        self.inner.lock().stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn make_shared(max_size: u64) -> Arc<SharedLru> {
        Arc::new(SharedLru::new(StoreConfig { max_size }))
    }

    #[test]
    fn test_shared_round_trip() {
        let store = make_shared(1024);
        assert!(store.put(b"k", 1, b"v"));
        let hit = store.get(b"k").unwrap();
        assert_eq!(hit.data, b"v");
        assert_eq!(hit.flags, 1);
        assert!(store.delete(b"k"));
        assert!(!store.delete(b"k"));
    }

    #[test]
    fn test_concurrent_writers_stay_bounded() {
        let store = make_shared(4096);
        let threads = 8;
        let per_thread = 200;

        let handles: Vec<_> = (0..threads)
            .map(|t| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for i in 0..per_thread {
                        let key = format!("t{t}-k{i}");
                        let value = vec![b'x'; 16];
                        store.put(key.as_bytes(), 0, &value);
                        let _ = store.get(key.as_bytes());
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let stats = store.stats();
        assert!(stats.bytes <= stats.limit_maxbytes);
        assert_eq!(
            stats.metrics.cmd_set as usize,
            threads * per_thread
        );
    }

    #[test]
    fn test_same_key_writes_serialize() {
        let store = make_shared(1024);
        store.put(b"counter", 0, b"seed");
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for _ in 0..100 {
                        store.append(b"counter", &[b'0' + t]);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        // Every append landed exactly once.
        let hit = store.get(b"counter").unwrap();
        assert_eq!(hit.data.len(), 4 + 400);
    }
}
