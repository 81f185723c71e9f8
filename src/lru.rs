//! Size-bounded LRU store.
//!
//! The store is an ordered key/value map bounded by the total number of
//! key+value bytes it holds. When an insert or update needs more room than is
//! free, entries are evicted from the least recently used end, oldest first,
//! one at a time, until the new data fits.
//!
//! # Data Structure
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                          LruStore                              │
//! │                                                                │
//! │  HashMap<key, slot>          arena List<StoreEntry>            │
//! │  ┌──────────────┐          ┌────────────────────────────┐     │
//! │  │ "apple"  ─────────────▶ │ front ◀──▶ ... ◀──▶ back   │     │
//! │  │ "banana" ─────────────▶ │ (oldest)        (newest)   │     │
//! │  └──────────────┘          └────────────────────────────┘     │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The index maps each key to the stable arena slot of its list node, so
//! lookup, touch, and unlink are all O(1). Nodes are recycled through the
//! arena's free-list; no owning pointers exist anywhere in the structure.
//!
//! # Update ordering
//!
//! Updating an existing key runs in a fixed order: the entry's old bytes are
//! released from the accounting, the entry moves to the back, eviction runs
//! from the front until the new bytes fit, and only then is the new value
//! installed and charged. Because the entry being updated sits at the back
//! during eviction, capacity-making can never remove it out from under the
//! update.
//!
//! # Operations
//!
//! | Operation | Fails when |
//! |-----------|------------|
//! | `put` | `key + value` exceeds the total capacity |
//! | `put_if_absent` | key present, or too large |
//! | `replace` | key absent, or too large |
//! | `append` / `prepend` | key absent, or combined value too large |
//! | `get` | key absent |
//! | `delete` | key absent |
//!
//! The store is not thread-safe on its own; see
//! [`SharedLru`](crate::storage::SharedLru) for the mutex-guarded form shared
//! across connections.

use crate::config::StoreConfig;
use crate::entry::{StoreEntry, Value};
use crate::list::List;
use crate::metrics::{StatsSnapshot, StoreMetrics};

use hashbrown::HashMap;

/// A byte-bounded LRU key/value store.
///
/// # Example
///
/// ```
/// use lrucached::config::StoreConfig;
/// use lrucached::lru::LruStore;
///
/// let mut store = LruStore::new(StoreConfig { max_size: 8 });
/// assert!(store.put(b"a", 0, b"AAA"));
/// assert!(store.put(b"b", 0, b"BBB"));
/// // Storing "c" forces the oldest entry out.
/// assert!(store.put(b"c", 0, b"CCC"));
/// assert!(store.get(b"a").is_none());
/// assert!(store.get(b"c").is_some());
/// ```
#[derive(Debug)]
pub struct LruStore {
    max_size: u64,
    used_size: u64,
    cas_counter: u64,
    list: List<StoreEntry>,
    index: HashMap<Vec<u8>, usize>,
    metrics: StoreMetrics,
}

impl LruStore {
    /// Creates an empty store with the configured byte capacity.
    pub fn new(config: StoreConfig) -> Self {
        LruStore {
            max_size: config.max_size,
            used_size: 0,
            cas_counter: 0,
            list: List::new(),
            index: HashMap::new(),
            metrics: StoreMetrics::default(),
        }
    }

    /// Configured capacity in bytes.
    #[inline]
    pub fn max_size(&self) -> u64 {
        self.max_size
    }

    /// Bytes currently charged against the capacity.
    #[inline]
    pub fn used_size(&self) -> u64 {
        self.used_size
    }

    /// Number of resident entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Stores `value` under `key` unconditionally.
    ///
    /// An absent key is inserted at the most recent position; a present key
    /// is updated in place and touched. Returns `false` only when the entry
    /// alone exceeds the total capacity, in which case nothing changes.
    pub fn put(&mut self, key: &[u8], flags: u32, value: &[u8]) -> bool {
        let need = (key.len() + value.len()) as u64;
        if need > self.max_size {
            return false;
        }

        if let Some(&slot) = self.index.get(key) {
            // Release the old bytes and park the entry at the back before
            // making room, so eviction cannot reach it.
            let old = self.list.get(slot).size();
            self.used_size -= old;
            self.list.move_to_back(slot);
            self.make_room(need, Some(slot));

            let cas = self.next_cas();
            let entry = self.list.get_mut(slot);
            entry.value = value.to_vec();
            entry.flags = flags;
            entry.cas = cas;
            self.used_size += need;
        } else {
            self.make_room(need, None);
            let cas = self.next_cas();
            let slot = self
                .list
                .push_back(StoreEntry::new(key.to_vec(), value.to_vec(), flags, cas));
            self.index.insert(key.to_vec(), slot);
            self.used_size += need;
        }

        self.metrics.record_store(need);
        true
    }

    /// Stores `value` under `key` only if the key is absent.
    pub fn put_if_absent(&mut self, key: &[u8], flags: u32, value: &[u8]) -> bool {
        if self.index.contains_key(key) {
            return false;
        }
        self.put(key, flags, value)
    }

    /// Updates an existing key; fails if the key is absent.
    pub fn replace(&mut self, key: &[u8], flags: u32, value: &[u8]) -> bool {
        if !self.index.contains_key(key) {
            return false;
        }
        self.put(key, flags, value)
    }

    /// Appends `suffix` to an existing value, with full eviction rules.
    pub fn append(&mut self, key: &[u8], suffix: &[u8]) -> bool {
        self.splice(key, suffix, false)
    }

    /// Prepends `prefix` to an existing value, with full eviction rules.
    pub fn prepend(&mut self, key: &[u8], prefix: &[u8]) -> bool {
        self.splice(key, prefix, true)
    }

    /// Looks `key` up, touching it on a hit.
    ///
    /// A hit moves the entry to the most recent position and returns an owned
    /// copy of its value and metadata.
    pub fn get(&mut self, key: &[u8]) -> Option<Value> {
        match self.index.get(key) {
            Some(&slot) => {
                self.list.move_to_back(slot);
                let entry = self.list.get(slot);
                let value = Value {
                    flags: entry.flags,
                    cas: entry.cas,
                    data: entry.value.clone(),
                };
                self.metrics.record_hit();
                Some(value)
            }
            None => {
                self.metrics.record_miss();
                None
            }
        }
    }

    /// Removes `key`; returns `false` if it was absent.
    pub fn delete(&mut self, key: &[u8]) -> bool {
        match self.index.remove(key) {
            Some(slot) => {
                let entry = self.list.remove(slot);
                self.used_size -= entry.size();
                true
            }
            None => false,
        }
    }

    /// Removes every entry and resets the accounting. Lifetime counters keep
    /// their values.
    pub fn clear(&mut self) {
        self.index.clear();
        self.list.clear();
        self.used_size = 0;
    }

    /// Point-in-time counters for the `stats` command.
    pub fn stats(&self) -> StatsSnapshot {
        StatsSnapshot {
            curr_items: self.index.len() as u64,
            bytes: self.used_size,
            limit_maxbytes: self.max_size,
            metrics: self.metrics.clone(),
        }
    }

    fn splice(&mut self, key: &[u8], extra: &[u8], front: bool) -> bool {
        let Some(&slot) = self.index.get(key) else {
            return false;
        };
        let entry = self.list.get(slot);
        let flags = entry.flags;
        let mut combined = Vec::with_capacity(entry.value.len() + extra.len());
        if front {
            combined.extend_from_slice(extra);
            combined.extend_from_slice(&entry.value);
        } else {
            combined.extend_from_slice(&entry.value);
            combined.extend_from_slice(extra);
        }
        self.put(key, flags, &combined)
    }

    /// Evicts from the front until `need` more bytes fit.
    ///
    /// `keep` names a slot whose bytes were already released by the caller;
    /// that slot sits at the back, so the front can never be it while another
    /// entry remains.
    fn make_room(&mut self, need: u64, keep: Option<usize>) {
        while self.used_size + need > self.max_size {
            let Some(front) = self.list.front() else {
                break;
            };
            debug_assert!(Some(front) != keep, "eviction reached the updated entry");
            if Some(front) == keep {
                break;
            }
            self.evict_front();
        }
    }

    fn evict_front(&mut self) {
        if let Some(entry) = self.list.pop_front() {
            self.index.remove(&entry.key);
            self.used_size -= entry.size();
            self.metrics.record_eviction();
        }
    }

    fn next_cas(&mut self) -> u64 {
        self.cas_counter += 1;
        self.cas_counter
    }

    /// Recomputes the byte accounting from scratch. Test hook.
    #[cfg(test)]
    fn recount(&self) -> u64 {
        self.list.iter().map(StoreEntry::size).sum()
    }
}
