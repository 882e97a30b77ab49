use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Default)]
pub struct CacheMetrics {
    total_requests: AtomicUsize,
    layer_hits: Vec<AtomicUsize>,
    misses: AtomicUsize,
    stale_hits: AtomicUsize,
    expired_hits: AtomicUsize,
    backfills: AtomicUsize,
    computations: AtomicUsize,
    compute_failures: AtomicUsize,
    coalesced_waits: AtomicUsize,
    background_refreshes: AtomicUsize,
    refresh_failures: AtomicUsize,
    layer_errors: AtomicUsize,
    serialization_errors: AtomicUsize,
    write_failures: AtomicUsize,
    cleanup_runs: AtomicUsize,
    cleanup_removed: AtomicUsize,
    cleanup_failures: AtomicUsize,
}

impl CacheMetrics {
    pub fn new(layer_count: usize) -> Self {
        Self {
            layer_hits: (0..layer_count).map(|_| AtomicUsize::new(0)).collect(),
            ..Default::default()
        }
    }

    pub(crate) fn record_request(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_hit(&self, layer_index: usize) {
        if let Some(counter) = self.layer_hits.get(layer_index) {
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_stale_hit(&self) {
        self.stale_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_expired_hit(&self) {
        self.expired_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_backfill(&self, layers: usize) {
        self.backfills.fetch_add(layers, Ordering::Relaxed);
    }

    pub(crate) fn record_computation(&self) {
        self.computations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_compute_failure(&self) {
        self.compute_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_coalesced_wait(&self) {
        self.coalesced_waits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_background_refresh(&self) {
        self.background_refreshes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_refresh_failure(&self) {
        self.refresh_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_layer_error(&self) {
        self.layer_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_serialization_error(&self) {
        self.serialization_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_write_failure(&self) {
        self.write_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cleanup(&self, removed: usize, failures: usize) {
        self.cleanup_runs.fetch_add(1, Ordering::Relaxed);
        self.cleanup_removed.fetch_add(removed, Ordering::Relaxed);
        self.cleanup_failures.fetch_add(failures, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CacheMetricsSnapshot {
        CacheMetricsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            layer_hits: self
                .layer_hits
                .iter()
                .map(|hits| hits.load(Ordering::Relaxed))
                .collect(),
            misses: self.misses.load(Ordering::Relaxed),
            stale_hits: self.stale_hits.load(Ordering::Relaxed),
            expired_hits: self.expired_hits.load(Ordering::Relaxed),
            backfills: self.backfills.load(Ordering::Relaxed),
            computations: self.computations.load(Ordering::Relaxed),
            compute_failures: self.compute_failures.load(Ordering::Relaxed),
            coalesced_waits: self.coalesced_waits.load(Ordering::Relaxed),
            background_refreshes: self.background_refreshes.load(Ordering::Relaxed),
            refresh_failures: self.refresh_failures.load(Ordering::Relaxed),
            layer_errors: self.layer_errors.load(Ordering::Relaxed),
            serialization_errors: self.serialization_errors.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
            cleanup_runs: self.cleanup_runs.load(Ordering::Relaxed),
            cleanup_removed: self.cleanup_removed.load(Ordering::Relaxed),
            cleanup_failures: self.cleanup_failures.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheMetricsSnapshot {
    pub total_requests: usize,
    pub layer_hits: Vec<usize>,
    pub misses: usize,
    pub stale_hits: usize,
    pub expired_hits: usize,
    pub backfills: usize,
    pub computations: usize,
    pub compute_failures: usize,
    pub coalesced_waits: usize,
    pub background_refreshes: usize,
    pub refresh_failures: usize,
    pub layer_errors: usize,
    pub serialization_errors: usize,
    pub write_failures: usize,
    pub cleanup_runs: usize,
    pub cleanup_removed: usize,
    pub cleanup_failures: usize,
}

impl CacheMetricsSnapshot {
    pub fn hits(&self) -> usize {
        self.layer_hits.iter().sum()
    }

    pub fn hit_rate(&self) -> f64 {
        let total = self.hits() + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits() as f64 / total as f64
        }
    }

    pub fn layer_hit_rate(&self, layer_index: usize) -> f64 {
        let hits = self.layer_hits.get(layer_index).copied().unwrap_or(0);
        if self.total_requests == 0 {
            0.0
        } else {
            hits as f64 / self.total_requests as f64
        }
    }
}

/// Counters a layer keeps about its own backend.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct LayerStats {
    pub requests: usize,
    pub hits: usize,
    pub misses: usize,
    pub errors: usize,
    pub breaker_open: bool,
    pub breaker_rejections: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_counts() {
        let metrics = CacheMetrics::new(2);
        metrics.record_request();
        metrics.record_request();
        metrics.record_hit(1);
        metrics.record_miss();
        metrics.record_cleanup(3, 1);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_requests, 2);
        assert_eq!(snapshot.layer_hits, vec![0, 1]);
        assert_eq!(snapshot.cleanup_removed, 3);
        assert_eq!(snapshot.cleanup_failures, 1);
        assert_eq!(snapshot.hit_rate(), 0.5);
        assert_eq!(snapshot.layer_hit_rate(1), 0.5);
    }

    #[test]
    fn test_empty_rates() {
        let snapshot = CacheMetrics::new(1).snapshot();
        assert_eq!(snapshot.hit_rate(), 0.0);
        assert_eq!(snapshot.layer_hit_rate(0), 0.0);
        assert_eq!(snapshot.layer_hit_rate(7), 0.0);
    }

    #[test]
    fn test_out_of_range_hit_ignored() {
        let metrics = CacheMetrics::new(1);
        metrics.record_hit(5);
        assert_eq!(metrics.snapshot().hits(), 0);
    }
}
