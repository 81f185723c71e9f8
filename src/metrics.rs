//! Store metrics and the `stats` snapshot.
//!
//! The store keeps a handful of plain counters updated inline by its
//! operations. A [`StatsSnapshot`] is a point-in-time copy rendered by the
//! `stats` command; its entries come out in a fixed order so output is
//! deterministic across runs.

/// Counters maintained by the store.
#[derive(Debug, Default, Clone)]
pub struct StoreMetrics {
    /// Number of retrieval lookups performed (one per key of a `get`/`gets`).
    pub cmd_get: u64,
    /// Number of storage operations accepted.
    pub cmd_set: u64,
    /// Lookups that found their key.
    pub get_hits: u64,
    /// Lookups that missed.
    pub get_misses: u64,
    /// Entries removed to make room for new data.
    pub evictions: u64,
    /// Entries ever stored, including overwrites.
    pub total_items: u64,
    /// Bytes of key+value accepted into the store over its lifetime.
    pub bytes_written: u64,
}

impl StoreMetrics {
    pub fn record_hit(&mut self) {
        self.cmd_get += 1;
        self.get_hits += 1;
    }

    pub fn record_miss(&mut self) {
        self.cmd_get += 1;
        self.get_misses += 1;
    }

    pub fn record_store(&mut self, object_size: u64) {
        self.cmd_set += 1;
        self.total_items += 1;
        self.bytes_written += object_size;
    }

    pub fn record_eviction(&mut self) {
        self.evictions += 1;
    }

    /// Fraction of lookups that hit, in `[0.0, 1.0]`.
    pub fn hit_rate(&self) -> f64 {
        if self.cmd_get > 0 {
            self.get_hits as f64 / self.cmd_get as f64
        } else {
            0.0
        }
    }
}

/// Point-in-time view of the store, as rendered by the `stats` command.
#[derive(Debug, Clone)]
pub struct StatsSnapshot {
    /// Entries currently resident.
    pub curr_items: u64,
    /// Bytes currently charged against capacity.
    pub bytes: u64,
    /// Configured capacity in bytes.
    pub limit_maxbytes: u64,
    /// Lifetime counters.
    pub metrics: StoreMetrics,
}

impl StatsSnapshot {
    /// Stat lines in their wire order.
    pub fn entries(&self) -> Vec<(&'static str, u64)> {
        vec![
            ("cmd_get", self.metrics.cmd_get),
            ("cmd_set", self.metrics.cmd_set),
            ("get_hits", self.metrics.get_hits),
            ("get_misses", self.metrics.get_misses),
            ("curr_items", self.curr_items),
            ("total_items", self.metrics.total_items),
            ("bytes", self.bytes),
            ("limit_maxbytes", self.limit_maxbytes),
            ("evictions", self.metrics.evictions),
        ]
    }
}
