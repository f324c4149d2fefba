//! Run counters for a batch of domains.
//!
//! Logged as a one-line summary when the batch ends and embedded in the
//! lookup journal when that is enabled.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use tracing::info;

pub struct RunMetrics {
    /// Input domains processed
    pub domains: AtomicU64,
    /// Seed hostnames walked
    pub seeds: AtomicU64,
    /// Distinct names looked up across all walks
    pub names_expanded: AtomicU64,
    /// Lookups that produced no CNAME (any reason)
    pub lookup_failures: AtomicU64,
    /// CNAME edges discovered
    pub edges: AtomicU64,
    /// Walks stopped by the per-seed name cap
    pub walks_capped: AtomicU64,
    /// Tree documents handed to the sink successfully
    pub trees_written: AtomicU64,
    /// Domains whose trees could not be written
    pub sink_failures: AtomicU64,
    /// Leaf payloads shadowed by a same-named label in the document
    pub collisions: AtomicU64,
    pub start_time: Instant,
}

impl RunMetrics {
    pub fn new() -> Self {
        Self {
            domains: AtomicU64::new(0),
            seeds: AtomicU64::new(0),
            names_expanded: AtomicU64::new(0),
            lookup_failures: AtomicU64::new(0),
            edges: AtomicU64::new(0),
            walks_capped: AtomicU64::new(0),
            trees_written: AtomicU64::new(0),
            sink_failures: AtomicU64::new(0),
            collisions: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn add(counter: &AtomicU64, n: usize) {
        counter.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> serde_json::Value {
        serde_json::json!({
            "domains": self.domains.load(Ordering::Relaxed),
            "seeds": self.seeds.load(Ordering::Relaxed),
            "names_expanded": self.names_expanded.load(Ordering::Relaxed),
            "lookup_failures": self.lookup_failures.load(Ordering::Relaxed),
            "edges": self.edges.load(Ordering::Relaxed),
            "walks_capped": self.walks_capped.load(Ordering::Relaxed),
            "trees_written": self.trees_written.load(Ordering::Relaxed),
            "sink_failures": self.sink_failures.load(Ordering::Relaxed),
            "collisions": self.collisions.load(Ordering::Relaxed),
            "elapsed_ms": self.start_time.elapsed().as_millis() as u64,
        })
    }

    pub fn log_summary(&self) {
        info!(
            "Done: {} domains, {} seeds, {} names looked up ({} without CNAME), {} edges, {} trees written, {} sink failures in {:.1}s",
            self.domains.load(Ordering::Relaxed),
            self.seeds.load(Ordering::Relaxed),
            self.names_expanded.load(Ordering::Relaxed),
            self.lookup_failures.load(Ordering::Relaxed),
            self.edges.load(Ordering::Relaxed),
            self.trees_written.load(Ordering::Relaxed),
            self.sink_failures.load(Ordering::Relaxed),
            self.start_time.elapsed().as_secs_f64(),
        );
    }
}

impl Default for RunMetrics {
    fn default() -> Self {
        Self::new()
    }
}
