use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Number of transform latencies kept per stage
const LATENCY_WINDOW: usize = 1024;

/// Sliding window of the most recent transform latencies
#[derive(Debug, Clone)]
pub struct LatencyWindow {
    samples: Arc<Mutex<VecDeque<Duration>>>,
    window_size: usize,
}

impl LatencyWindow {
    pub fn new(window_size: usize) -> Self {
        let window_size = window_size.max(1);
        Self {
            samples: Arc::new(Mutex::new(VecDeque::with_capacity(window_size))),
            window_size,
        }
    }

    pub fn record(&self, latency: Duration) {
        let mut samples = self.samples.lock();
        if samples.len() == self.window_size {
            samples.pop_front();
        }
        samples.push_back(latency);
    }

    /// Latency at quantile `q` (0.0..=1.0), or zero when nothing was recorded
    pub fn quantile(&self, q: f64) -> Duration {
        let mut sorted: Vec<Duration> = self.samples.lock().iter().copied().collect();
        if sorted.is_empty() {
            return Duration::ZERO;
        }
        sorted.sort_unstable();
        let rank = (sorted.len() as f64 * q.clamp(0.0, 1.0)).ceil() as usize;
        sorted[rank.saturating_sub(1)]
    }

    pub fn len(&self) -> usize {
        self.samples.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Per-stage counters shared by every worker of the stage
#[derive(Debug, Clone)]
pub struct StageMetrics {
    /// Items transformed and forwarded downstream
    processed: Arc<AtomicU64>,
    /// Items whose transform failed
    failed: Arc<AtomicU64>,
    /// Items discarded without transforming after a fail-fast abort
    skipped: Arc<AtomicU64>,
    latency: LatencyWindow,
    start_time: Instant,
}

impl StageMetrics {
    pub fn new() -> Self {
        Self {
            processed: Arc::new(AtomicU64::new(0)),
            failed: Arc::new(AtomicU64::new(0)),
            skipped: Arc::new(AtomicU64::new(0)),
            latency: LatencyWindow::new(LATENCY_WINDOW),
            start_time: Instant::now(),
        }
    }

    pub fn record_processed(&self, latency: Duration) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        self.latency.record(latency);
    }

    pub fn record_failed(&self, latency: Duration) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        self.latency.record(latency);
    }

    pub fn record_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn total_processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn total_failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn total_skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    /// Items processed per second since the stage started
    pub fn throughput(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed == 0.0 {
            0.0
        } else {
            self.total_processed() as f64 / elapsed
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            processed: self.total_processed(),
            failed: self.total_failed(),
            skipped: self.total_skipped(),
            throughput: self.throughput(),
            latency_p50: self.latency.quantile(0.50),
            latency_p95: self.latency.quantile(0.95),
            latency_p99: self.latency.quantile(0.99),
            elapsed: self.start_time.elapsed(),
        }
    }
}

impl Default for StageMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of a stage's metrics
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsSnapshot {
    pub processed: u64,
    pub failed: u64,
    pub skipped: u64,
    pub throughput: f64,
    pub latency_p50: Duration,
    pub latency_p95: Duration,
    pub latency_p99: Duration,
    pub elapsed: Duration,
}

impl fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Processed: {}, Failed: {}, Skipped: {}, Throughput: {:.2} items/s, \
             Latency P50: {:?}, P95: {:?}, P99: {:?}, Elapsed: {:.2}s",
            self.processed,
            self.failed,
            self.skipped,
            self.throughput,
            self.latency_p50,
            self.latency_p95,
            self.latency_p99,
            self.elapsed.as_secs_f64()
        )
    }
}
