use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use once_cell::sync::Lazy;

/// Global runtime metrics for the collector.
///
/// Purpose:
/// - Track running provider collections
/// - Track request volume and failure classes
/// - Track records persisted vs. dropped
///
/// Design:
/// - Lock-free (Atomics)
/// - Cheap to update
/// - Safe in async + multithreaded contexts
#[derive(Default)]
pub struct RuntimeMetrics {
    // High-level
    pub collections_active: AtomicUsize,

    // Requests
    pub requests_sent: AtomicUsize,
    pub transient_failures: AtomicUsize,
    pub rate_limited: AtomicUsize,
    pub quota_rotations: AtomicUsize,
    pub fatal_requests: AtomicUsize,

    // Pages / records
    pub pages_fetched: AtomicUsize,
    pub pois_inserted: AtomicUsize,
    pub pois_duplicate: AtomicUsize,
    pub pois_dropped: AtomicUsize,
}

impl RuntimeMetrics {
    /// One-line summary for the periodic reporter.
    pub fn summary(&self) -> String {
        format!(
            "active={} req={} transient={} 429={} rotations={} fatal={} pages={} inserted={} dup={} dropped={}",
            self.collections_active.load(Ordering::Relaxed),
            self.requests_sent.load(Ordering::Relaxed),
            self.transient_failures.load(Ordering::Relaxed),
            self.rate_limited.load(Ordering::Relaxed),
            self.quota_rotations.load(Ordering::Relaxed),
            self.fatal_requests.load(Ordering::Relaxed),
            self.pages_fetched.load(Ordering::Relaxed),
            self.pois_inserted.load(Ordering::Relaxed),
            self.pois_duplicate.load(Ordering::Relaxed),
            self.pois_dropped.load(Ordering::Relaxed),
        )
    }
}

/// Global metrics registry (singleton)
pub static METRICS: Lazy<Arc<RuntimeMetrics>> =
    Lazy::new(|| Arc::new(RuntimeMetrics::default()));

/// Increments a counter by one.
pub fn bump(counter: &AtomicUsize) {
    counter.fetch_add(1, Ordering::Relaxed);
}
