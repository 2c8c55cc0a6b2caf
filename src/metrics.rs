//! Lock-free counters for the flow cache and packet parser.
//!
//! `AtomicU64` counters behind small `record_*` methods, with a
//! `.snapshot()` that copies them into a plain `Copy` struct for callers
//! who want a consistent read without holding a lock.

use std::sync::atomic::{AtomicU64, Ordering};

/// Flow-cache performance counters.
///
/// All counters use atomic operations for thread-safe reads, though the
/// cache itself is single-threaded cooperative (see `spec.md` §5) and
/// should not be shared across worker threads.
#[derive(Debug, Default)]
pub struct CacheMetrics {
    /// A packet's hash matched an already-occupied slot (MRU promotion).
    pub hits: AtomicU64,
    /// A packet's hash landed on an empty slot (new flow).
    pub misses: AtomicU64,
    /// A full line evicted its tail slot to make room.
    pub evictions: AtomicU64,
    /// A flow was exported by the inactive-timeout scan.
    pub expired: AtomicU64,
    /// A flow was exported because its active timeout elapsed.
    pub active_timeouts: AtomicU64,
    /// `add_packet` detected a header-type conflict and recursed.
    pub conflict_splits: AtomicU64,
}

impl CacheMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_expiration(&self) {
        self.expired.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_active_timeout(&self) {
        self.active_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_conflict_split(&self) {
        self.conflict_splits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CacheMetricsSnapshot {
        CacheMetricsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
            active_timeouts: self.active_timeouts.load(Ordering::Relaxed),
            conflict_splits: self.conflict_splits.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheMetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expired: u64,
    pub active_timeouts: u64,
    pub conflict_splits: u64,
}

impl CacheMetricsSnapshot {
    pub fn hit_rate(&self) -> Option<f64> {
        let total = self.hits + self.misses;
        if total == 0 {
            None
        } else {
            Some(self.hits as f64 / total as f64)
        }
    }
}

/// Packet-parser performance counters.
#[derive(Debug, Default)]
pub struct ParserMetrics {
    pub packets_parsed: AtomicU64,
    pub packets_rejected: AtomicU64,
    pub bytes_consumed: AtomicU64,
    pub out_of_memory: AtomicU64,
    pub too_short: AtomicU64,
}

impl ParserMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_parsed(&self, bytes: u64) {
        self.packets_parsed.fetch_add(1, Ordering::Relaxed);
        self.bytes_consumed.fetch_add(bytes, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_rejected(&self) {
        self.packets_rejected.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_out_of_memory(&self) {
        self.out_of_memory.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_too_short(&self) {
        self.too_short.fetch_add(1, Ordering::Relaxed);
    }
}
