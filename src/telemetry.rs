//! In-process observability: counters and duration histograms.
//!
//! Spans come from [`tracing`] at the call sites; this module only holds
//! the numeric side. The metrics registry is the single allowed
//! process-wide singleton, initialized on first use and immutable
//! afterwards.

use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::tool::registry::{DispatchEvent, DispatchObserver};

/// Histogram bucket upper bounds in milliseconds; the last bucket is open.
const BUCKET_BOUNDS_MS: [u64; 7] = [10, 50, 100, 500, 1_000, 5_000, 30_000];

/// A fixed-bucket duration histogram.
#[derive(Debug, Default)]
pub struct Histogram {
    buckets: [AtomicU64; BUCKET_BOUNDS_MS.len() + 1],
    count: AtomicU64,
    sum_ms: AtomicU64,
}

impl Histogram {
    /// Record one duration.
    pub fn observe(&self, duration: Duration) {
        let ms = duration.as_millis() as u64;
        let bucket = BUCKET_BOUNDS_MS
            .iter()
            .position(|bound| ms <= *bound)
            .unwrap_or(BUCKET_BOUNDS_MS.len());
        self.buckets[bucket].fetch_add(1, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum_ms.fetch_add(ms, Ordering::Relaxed);
    }

    /// Observation count.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Sum of observed milliseconds.
    #[must_use]
    pub fn sum_ms(&self) -> u64 {
        self.sum_ms.load(Ordering::Relaxed)
    }

    /// Per-bucket counts, cumulative-free.
    #[must_use]
    pub fn buckets(&self) -> Vec<u64> {
        self.buckets
            .iter()
            .map(|b| b.load(Ordering::Relaxed))
            .collect()
    }
}

/// Process-wide counters and histograms.
#[derive(Debug, Default)]
pub struct Metrics {
    /// Agent runs started.
    pub runs_total: AtomicU64,
    /// Tool dispatches observed.
    pub tool_dispatch_total: AtomicU64,
    /// Tool dispatches that failed.
    pub tool_dispatch_errors: AtomicU64,
    /// Retrieval queries executed.
    pub retrieval_queries: AtomicU64,
    /// Agent run durations.
    pub run_duration: Histogram,
    /// Tool dispatch durations.
    pub tool_duration: Histogram,
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

/// The global metrics registry.
pub fn metrics() -> &'static Metrics {
    METRICS.get_or_init(Metrics::default)
}

/// Dispatch observer feeding the metrics registry; compose it with a
/// [`RecordingRegistry`](crate::tool::RecordingRegistry).
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsObserver;

impl DispatchObserver for MetricsObserver {
    fn on_dispatch(&self, event: &DispatchEvent) {
        let metrics = metrics();
        metrics.tool_dispatch_total.fetch_add(1, Ordering::Relaxed);
        if event.error.is_some() {
            metrics.tool_dispatch_errors.fetch_add(1, Ordering::Relaxed);
        }
        metrics.tool_duration.observe(event.duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn histogram_buckets_by_bound() {
        let histogram = Histogram::default();
        histogram.observe(Duration::from_millis(5));
        histogram.observe(Duration::from_millis(75));
        histogram.observe(Duration::from_secs(60));

        assert_eq!(histogram.count(), 3);
        let buckets = histogram.buckets();
        assert_eq!(buckets[0], 1);
        assert_eq!(buckets[2], 1);
        assert_eq!(buckets[BUCKET_BOUNDS_MS.len()], 1);
        assert!(histogram.sum_ms() >= 60_000);
    }

    #[test]
    fn observer_counts_dispatches() {
        let before = metrics().tool_dispatch_total.load(Ordering::Relaxed);
        MetricsObserver.on_dispatch(&DispatchEvent {
            name: "upper".into(),
            args: serde_json::Value::Null,
            payload: None,
            error: Some("boom".into()),
            duration: Duration::from_millis(3),
        });
        assert!(metrics().tool_dispatch_total.load(Ordering::Relaxed) > before);
        assert!(metrics().tool_dispatch_errors.load(Ordering::Relaxed) > 0);
    }
}
