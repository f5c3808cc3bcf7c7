use hdrhistogram::Histogram;
use std::sync::atomic::{AtomicU64, Ordering::Relaxed};
use std::time::{Duration, Instant};

/// Datagram counters kept by the listener.
#[derive(Debug, Default)]
pub struct ListenerStats {
    pub received: AtomicU64,
    pub accepted: AtomicU64,
    pub malformed: AtomicU64,
    pub dropped_full: AtomicU64,
    pub receive_errors: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListenerCounts {
    pub received: u64,
    pub accepted: u64,
    pub malformed: u64,
    pub dropped_full: u64,
    pub receive_errors: u64,
}

impl ListenerStats {
    pub fn counts(&self) -> ListenerCounts {
        ListenerCounts {
            received: self.received.load(Relaxed),
            accepted: self.accepted.load(Relaxed),
            malformed: self.malformed.load(Relaxed),
            dropped_full: self.dropped_full.load(Relaxed),
            receive_errors: self.receive_errors.load(Relaxed),
        }
    }
}

impl std::fmt::Display for ListenerCounts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "received={}, accepted={}, malformed={}, dropped_full={}, receive_errors={}",
            self.received, self.accepted, self.malformed, self.dropped_full, self.receive_errors
        )
    }
}

/// Summary of ingest latencies, in nanoseconds.
#[derive(Debug, Clone, Default)]
pub struct LatencyStats {
    pub count: u64,
    pub min: u64,
    pub max: u64,
    pub mean: f64,
    pub p50: u64,
    pub p99: u64,
    pub p999: u64,
}

/// HdrHistogram of per-datagram ingest time.
pub struct IngestLatency {
    histogram: Histogram<u64>,
}

impl IngestLatency {
    pub fn new() -> Self {
        // Range: 1ns to 10s, 3 significant figures. Constant bounds, cannot fail.
        let histogram = Histogram::<u64>::new_with_bounds(1, 10_000_000_000, 3).unwrap();
        Self { histogram }
    }

    pub fn record(&mut self, elapsed: Duration) {
        let nanos = (elapsed.as_nanos() as u64).clamp(1, 10_000_000_000);
        let _ = self.histogram.record(nanos);
    }

    /// Times `f` and records it.
    pub fn time<R>(&mut self, f: impl FnOnce() -> R) -> R {
        let start = Instant::now();
        let out = f();
        self.record(start.elapsed());
        out
    }

    pub fn stats(&self) -> LatencyStats {
        if self.histogram.is_empty() {
            return LatencyStats::default();
        }
        LatencyStats {
            count: self.histogram.len(),
            min: self.histogram.min(),
            max: self.histogram.max(),
            mean: self.histogram.mean(),
            p50: self.histogram.value_at_quantile(0.5),
            p99: self.histogram.value_at_quantile(0.99),
            p999: self.histogram.value_at_quantile(0.999),
        }
    }

    pub fn format_stats(&self) -> String {
        let stats = self.stats();
        if stats.count == 0 {
            return "No stats collected yet".into();
        }
        format!(
            "count={}, min={}, mean={}, p50={}, p99={}, p999={}, max={}",
            stats.count,
            format_duration(stats.min as f64),
            format_duration(stats.mean),
            format_duration(stats.p50 as f64),
            format_duration(stats.p99 as f64),
            format_duration(stats.p999 as f64),
            format_duration(stats.max as f64),
        )
    }
}

impl Default for IngestLatency {
    fn default() -> Self {
        Self::new()
    }
}

fn format_duration(nanos: f64) -> String {
    if nanos < 1000.0 {
        format!("{:.1}ns", nanos)
    } else if nanos < 1_000_000.0 {
        format!("{:.1}us", nanos / 1000.0)
    } else if nanos < 1_000_000_000.0 {
        format!("{:.1}ms", nanos / 1_000_000.0)
    } else {
        format!("{:.2}s", nanos / 1_000_000_000.0)
    }
}
