//! Request and scoring statistics for the scoring service.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tracing::info;

/// How a `/predict` request ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    Success,
    BadRequest,
    ModelUnavailable,
    Failed,
}

/// Metrics collector shared by all request handlers
pub struct ScoringMetrics {
    /// Requests answered with predictions
    pub requests_succeeded: AtomicU64,
    /// Requests rejected as invalid (400)
    pub requests_rejected: AtomicU64,
    /// Requests that found no usable model
    pub requests_model_unavailable: AtomicU64,
    /// Requests that failed during parsing or inference
    pub requests_failed: AtomicU64,
    /// Total rows scored across all successful requests
    pub rows_scored: AtomicU64,
    /// Request processing times (in microseconds)
    processing_times: RwLock<Vec<u64>>,
    /// Fraud probability distribution buckets
    score_buckets: RwLock<[u64; 10]>,
    /// Start time for rate calculation
    start_time: Instant,
}

impl ScoringMetrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            requests_succeeded: AtomicU64::new(0),
            requests_rejected: AtomicU64::new(0),
            requests_model_unavailable: AtomicU64::new(0),
            requests_failed: AtomicU64::new(0),
            rows_scored: AtomicU64::new(0),
            processing_times: RwLock::new(Vec::with_capacity(1000)),
            score_buckets: RwLock::new([0; 10]),
            start_time: Instant::now(),
        }
    }

    /// Record a finished request
    pub fn record_request(&self, outcome: RequestOutcome, processing_time: Duration) {
        let counter = match outcome {
            RequestOutcome::Success => &self.requests_succeeded,
            RequestOutcome::BadRequest => &self.requests_rejected,
            RequestOutcome::ModelUnavailable => &self.requests_model_unavailable,
            RequestOutcome::Failed => &self.requests_failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        let mut times = self
            .processing_times
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        times.push(processing_time.as_micros() as u64);
        // Keep only last 10000 for memory efficiency
        if times.len() > 10000 {
            times.drain(0..5000);
        }
    }

    /// Record the probabilities returned for one request
    pub fn record_scores(&self, probabilities: &[f64]) {
        self.rows_scored
            .fetch_add(probabilities.len() as u64, Ordering::Relaxed);

        let mut buckets = self
            .score_buckets
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        for p in probabilities.iter().filter(|p| p.is_finite()) {
            let bucket = (p.clamp(0.0, 1.0) * 10.0).min(9.0) as usize;
            buckets[bucket] += 1;
        }
    }

    /// Total requests seen, whatever their outcome
    pub fn total_requests(&self) -> u64 {
        self.requests_succeeded.load(Ordering::Relaxed)
            + self.requests_rejected.load(Ordering::Relaxed)
            + self.requests_model_unavailable.load(Ordering::Relaxed)
            + self.requests_failed.load(Ordering::Relaxed)
    }

    /// Get processing time statistics
    pub fn get_processing_stats(&self) -> ProcessingStats {
        let times = self
            .processing_times
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        if times.is_empty() {
            return ProcessingStats::default();
        }

        let mut sorted: Vec<u64> = times.clone();
        drop(times);
        sorted.sort_unstable();

        let sum: u64 = sorted.iter().sum();
        let count = sorted.len();
        let at = |q: f64| sorted[((count as f64 * q) as usize).min(count - 1)];

        ProcessingStats {
            count: count as u64,
            mean_us: sum / count as u64,
            p50_us: sorted[count / 2],
            p95_us: at(0.95),
            p99_us: at(0.99),
            max_us: *sorted.last().unwrap_or(&0),
        }
    }

    /// Get current throughput (rows per second)
    pub fn get_throughput(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.rows_scored.load(Ordering::Relaxed) as f64 / elapsed
        } else {
            0.0
        }
    }

    /// Get score distribution
    pub fn get_score_distribution(&self) -> [u64; 10] {
        *self
            .score_buckets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Point-in-time copy of every counter, for the health endpoint
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests_total: self.total_requests(),
            requests_succeeded: self.requests_succeeded.load(Ordering::Relaxed),
            requests_rejected: self.requests_rejected.load(Ordering::Relaxed),
            requests_model_unavailable: self.requests_model_unavailable.load(Ordering::Relaxed),
            requests_failed: self.requests_failed.load(Ordering::Relaxed),
            rows_scored: self.rows_scored.load(Ordering::Relaxed),
            uptime_secs: self.start_time.elapsed().as_secs(),
            processing: self.get_processing_stats(),
            score_distribution: self.get_score_distribution(),
        }
    }

    /// Print summary statistics
    pub fn print_summary(&self) {
        let snapshot = self.snapshot();
        let processing = &snapshot.processing;
        let throughput = self.get_throughput();

        info!("╔══════════════════════════════════════════════════════════════╗");
        info!("║             FRAUD SCORING SERVICE - METRICS SUMMARY          ║");
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!(
            "║ Requests: {:>8}  │  Rows Scored: {:>8}  │  {:>7.1} rows/s ║",
            snapshot.requests_total, snapshot.rows_scored, throughput
        );
        info!(
            "║ OK: {:>6}  Rejected: {:>6}  No model: {:>6}  Failed: {:>6} ║",
            snapshot.requests_succeeded,
            snapshot.requests_rejected,
            snapshot.requests_model_unavailable,
            snapshot.requests_failed
        );
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!(
            "║ Request Time (μs): mean={:>6} p50={:>6} p95={:>6} p99={:>6} ║",
            processing.mean_us, processing.p50_us, processing.p95_us, processing.p99_us
        );
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!("║ Fraud Probability Distribution:                              ║");
        let total: u64 = snapshot.score_distribution.iter().sum();
        for (i, &count) in snapshot.score_distribution.iter().enumerate() {
            let pct = if total > 0 { (count as f64 / total as f64) * 100.0 } else { 0.0 };
            let bar_len = (pct / 2.0) as usize;
            let bar: String = "█".repeat(bar_len.min(20));
            info!(
                "║   {:.1}-{:.1}: {:>8} ({:>5.1}%) {}",
                i as f64 / 10.0,
                (i + 1) as f64 / 10.0,
                count,
                pct,
                bar
            );
        }
        info!("╚══════════════════════════════════════════════════════════════╝");
    }
}

impl Default for ScoringMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Processing time statistics
#[derive(Debug, Default, Clone, Serialize)]
pub struct ProcessingStats {
    pub count: u64,
    pub mean_us: u64,
    pub p50_us: u64,
    pub p95_us: u64,
    pub p99_us: u64,
    pub max_us: u64,
}

/// Serializable view of [`ScoringMetrics`]
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub requests_total: u64,
    pub requests_succeeded: u64,
    pub requests_rejected: u64,
    pub requests_model_unavailable: u64,
    pub requests_failed: u64,
    pub rows_scored: u64,
    pub uptime_secs: u64,
    pub processing: ProcessingStats,
    pub score_distribution: [u64; 10],
}

/// Periodic metrics reporter that prints summaries
pub struct MetricsReporter {
    metrics: Arc<ScoringMetrics>,
    interval_secs: u64,
}

impl MetricsReporter {
    pub fn new(metrics: Arc<ScoringMetrics>, interval_secs: u64) -> Self {
        Self {
            metrics,
            interval_secs,
        }
    }

    /// Start the periodic reporting task
    pub async fn start(self) {
        let mut interval = tokio::time::interval(Duration::from_secs(self.interval_secs.max(1)));
        // First tick completes immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            self.metrics.print_summary();
        }
    }
}
