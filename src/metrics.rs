use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use metrics::{Counter, Gauge, Histogram, counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

use crate::source::FetchErrorKind;

/// Upper bounds (seconds) of the latency histogram buckets.
///
/// Same layout as the default Prometheus client buckets so
/// dashboards built for the stock histogram keep working.
pub const LATENCY_BUCKETS: [f64; 11] = [
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

const LATENCY_METRIC: &str = "request_latency_seconds";

/// Receiver of per-fetch measurements.
///
/// Every worker gets a handle at construction time; implementations
/// must absorb contention themselves (workers never lock around calls).
///
/// Only the two success-path operations are mandatory. The lifecycle
/// hooks default to no-ops so small test sinks stay small.
pub trait MetricsSink: Send + Sync {
    /// One more successful fetch.
    fn increment_completed(&self);

    /// Time between admission and decode completion of a successful fetch.
    fn record_latency(&self, seconds: f64);

    fn record_failure(&self, _kind: FetchErrorKind) {}

    fn worker_started(&self) {}

    fn worker_stopped(&self) {}

    fn record_restart(&self) {}
}

/// Fetch metrics backed by a private Prometheus recorder.
///
/// Design:
/// - The recorder is never installed globally; each instance owns its
///   own registry and is passed explicitly as `Arc<FetchMetrics>`
/// - Series handles are registered once, updates are lock-free
/// - A few plain counters mirror the series for the periodic log line
pub struct FetchMetrics {
    handle: PrometheusHandle,

    completed: Counter,
    latency: Histogram,
    transport_errors: Counter,
    decode_errors: Counter,
    workers_active: Gauge,
    restarts: Counter,

    // Mirrors read by `snapshot()`
    completed_count: AtomicU64,
    latency_count: AtomicU64,
    latency_sum_micros: AtomicU64,
    transport_count: AtomicU64,
    decode_count: AtomicU64,
    active_count: AtomicUsize,
    restart_count: AtomicU64,
}

/// Point-in-time copy of the counters, used by the periodic reporter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricsSnapshot {
    pub completed: u64,
    pub latency_count: u64,
    pub latency_sum_seconds: f64,
    pub transport_errors: u64,
    pub decode_errors: u64,
    pub workers_active: usize,
    pub restarts: u64,
}

impl MetricsSnapshot {
    pub fn mean_latency(&self) -> Option<f64> {
        (self.latency_count > 0).then(|| self.latency_sum_seconds / self.latency_count as f64)
    }
}

impl Default for FetchMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl FetchMetrics {
    pub fn new() -> Self {
        // Only an empty bucket list is rejected; fall back to summaries.
        let recorder = PrometheusBuilder::new()
            .set_buckets_for_metric(Matcher::Full(LATENCY_METRIC.to_string()), &LATENCY_BUCKETS)
            .unwrap_or_else(|_| PrometheusBuilder::new())
            .build_recorder();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            metrics::describe_counter!("total_requests", "Total number of requests made");
            metrics::describe_histogram!(LATENCY_METRIC, "Request latency in seconds");
            metrics::describe_counter!("fetch_errors_total", "Failed fetches by error kind");
            metrics::describe_gauge!("workers_active", "Fetch workers currently running");
            metrics::describe_counter!(
                "worker_restarts_total",
                "Workers restarted after a failure"
            );

            let workers_active = gauge!("workers_active");
            workers_active.set(0.0);

            Self {
                handle,
                completed: counter!("total_requests"),
                latency: histogram!(LATENCY_METRIC),
                transport_errors: counter!("fetch_errors_total", "kind" => "transport"),
                decode_errors: counter!("fetch_errors_total", "kind" => "decode"),
                workers_active,
                restarts: counter!("worker_restarts_total"),
                completed_count: AtomicU64::new(0),
                latency_count: AtomicU64::new(0),
                latency_sum_micros: AtomicU64::new(0),
                transport_count: AtomicU64::new(0),
                decode_count: AtomicU64::new(0),
                active_count: AtomicUsize::new(0),
                restart_count: AtomicU64::new(0),
            }
        })
    }

    pub fn completed(&self) -> u64 {
        self.completed_count.load(Ordering::Relaxed)
    }

    pub fn workers_active(&self) -> usize {
        self.active_count.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            completed: self.completed_count.load(Ordering::Relaxed),
            latency_count: self.latency_count.load(Ordering::Relaxed),
            latency_sum_seconds: self.latency_sum_micros.load(Ordering::Relaxed) as f64 / 1e6,
            transport_errors: self.transport_count.load(Ordering::Relaxed),
            decode_errors: self.decode_count.load(Ordering::Relaxed),
            workers_active: self.active_count.load(Ordering::Relaxed),
            restarts: self.restart_count.load(Ordering::Relaxed),
        }
    }

    /// Renders all series in the Prometheus text exposition format.
    pub fn render_prometheus(&self) -> String {
        self.handle.render()
    }
}

impl MetricsSink for FetchMetrics {
    fn increment_completed(&self) {
        self.completed.increment(1);
        self.completed_count.fetch_add(1, Ordering::Relaxed);
    }

    fn record_latency(&self, seconds: f64) {
        let seconds = if seconds.is_finite() { seconds.max(0.0) } else { 0.0 };
        self.latency.record(seconds);
        self.latency_count.fetch_add(1, Ordering::Relaxed);
        self.latency_sum_micros
            .fetch_add((seconds * 1e6).round() as u64, Ordering::Relaxed);
    }

    fn record_failure(&self, kind: FetchErrorKind) {
        match kind {
            FetchErrorKind::Transport => {
                self.transport_errors.increment(1);
                self.transport_count.fetch_add(1, Ordering::Relaxed);
            }
            FetchErrorKind::Decode => {
                self.decode_errors.increment(1);
                self.decode_count.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn worker_started(&self) {
        let now = self.active_count.fetch_add(1, Ordering::Relaxed) + 1;
        self.workers_active.set(now as f64);
    }

    fn worker_stopped(&self) {
        // Saturating: a stray stop must never wrap the gauge.
        let previous = self
            .active_count
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
        if let Ok(previous) = previous {
            self.workers_active.set((previous - 1) as f64);
        }
    }

    fn record_restart(&self) {
        self.restarts.increment(1);
        self.restart_count.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn latency_samples_land_in_cumulative_buckets() {
        let metrics = FetchMetrics::new();
        metrics.record_latency(0.004);
        metrics.record_latency(0.2);
        metrics.record_latency(30.0);

        let text = metrics.render_prometheus();
        assert!(text.contains("request_latency_seconds_bucket{le=\"0.005\"} 1"));
        assert!(text.contains("request_latency_seconds_bucket{le=\"0.25\"} 2"));
        assert!(text.contains("request_latency_seconds_bucket{le=\"+Inf\"} 3"));
        assert!(text.contains("request_latency_seconds_count 3"));
    }

    #[test]
    fn snapshot_tracks_counters_and_gauge() {
        let metrics = FetchMetrics::new();
        metrics.worker_started();
        metrics.worker_started();
        metrics.increment_completed();
        metrics.record_latency(0.5);
        metrics.record_failure(FetchErrorKind::Decode);
        metrics.worker_stopped();
        metrics.worker_stopped();
        metrics.worker_stopped();

        let snap = metrics.snapshot();
        assert_eq!(snap.completed, 1);
        assert_eq!(snap.decode_errors, 1);
        assert_eq!(snap.transport_errors, 0);
        assert_eq!(snap.workers_active, 0);
        assert_eq!(snap.mean_latency(), Some(0.5));
    }

    #[test]
    fn concurrent_increments_are_not_lost() {
        let metrics = Arc::new(FetchMetrics::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let metrics = metrics.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        metrics.increment_completed();
                        metrics.record_latency(0.01);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(metrics.completed(), 8000);
        assert_eq!(metrics.snapshot().latency_count, 8000);
    }

    #[test]
    fn exposition_names_match_scrape_contract() {
        let metrics = FetchMetrics::new();
        metrics.increment_completed();
        let text = metrics.render_prometheus();
        assert!(text.contains("# TYPE total_requests counter"));
        assert!(text.contains("total_requests 1"));
        assert!(text.contains("# TYPE request_latency_seconds histogram"));
        assert!(text.contains("fetch_errors_total{kind=\"transport\"} 0"));
    }

    #[test]
    fn instances_do_not_share_series() {
        let first = FetchMetrics::new();
        let second = FetchMetrics::new();
        first.increment_completed();
        first.increment_completed();
        second.record_failure(FetchErrorKind::Transport);

        assert!(first.render_prometheus().contains("total_requests 2"));
        let other = second.render_prometheus();
        assert!(other.contains("total_requests 0"));
        assert!(other.contains("fetch_errors_total{kind=\"transport\"} 1"));
    }
}
