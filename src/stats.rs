//! Statistics tracking for the filter server.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Atomic counters updated by connection handlers.
pub struct Stats {
    lookups: AtomicU64,
    blocked: AtomicU64,
    probes: AtomicU64,
    dropped: AtomicU64,
    /// Cumulative handling time in microseconds for averaging.
    total_handle_time_us: AtomicU64,
    started: Instant,
}

impl Stats {
    pub fn new() -> Self {
        Self {
            lookups: AtomicU64::new(0),
            blocked: AtomicU64::new(0),
            probes: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            total_handle_time_us: AtomicU64::new(0),
            started: Instant::now(),
        }
    }

    pub fn record_lookup(&self, blocked: bool, handle_time_ms: f64) {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        if blocked {
            self.blocked.fetch_add(1, Ordering::Relaxed);
        }
        self.add_time(handle_time_ms);
    }

    pub fn record_probe(&self, handle_time_ms: f64) {
        self.probes.fetch_add(1, Ordering::Relaxed);
        self.add_time(handle_time_ms);
    }

    /// A connection closed without a response.
    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    fn add_time(&self, handle_time_ms: f64) {
        self.total_handle_time_us
            .fetch_add((handle_time_ms * 1000.0) as u64, Ordering::Relaxed);
    }

    pub fn snapshot_and_reset(&self) -> StatsSnapshot {
        let lookups = self.lookups.swap(0, Ordering::Relaxed);
        let blocked = self.blocked.swap(0, Ordering::Relaxed);
        let probes = self.probes.swap(0, Ordering::Relaxed);
        let dropped = self.dropped.swap(0, Ordering::Relaxed);
        let total_us = self.total_handle_time_us.swap(0, Ordering::Relaxed);

        let answered = lookups + probes;
        let avg_handle_ms = if answered > 0 {
            (total_us as f64 / answered as f64) / 1000.0
        } else {
            0.0
        };

        StatsSnapshot {
            uptime_secs: self.started.elapsed().as_secs(),
            lookups,
            blocked,
            probes,
            dropped,
            avg_handle_ms,
        }
    }
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

pub struct StatsSnapshot {
    pub uptime_secs: u64,
    pub lookups: u64,
    pub blocked: u64,
    pub probes: u64,
    pub dropped: u64,
    pub avg_handle_ms: f64,
}

impl StatsSnapshot {
    /// True when no connection arrived during the interval.
    pub fn is_idle(&self) -> bool {
        self.lookups == 0 && self.probes == 0 && self.dropped == 0
    }
}
