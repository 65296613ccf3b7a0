//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics for hot-path operations to avoid mutex contention.
//! All counter updates are lock-free; reporting is the only operation
//! that needs synchronization (via atomic swap).
//!
//! NOTE: All atomics use Relaxed ordering since these are statistical
//! counters only. Do NOT use these atomics for coordination or logic decisions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Prometheus-style exponential bucket boundaries (microseconds)
/// Buckets: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200
const BUCKET_BOUNDS: [u64; 10] = [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200];
const NUM_BUCKETS: usize = 11;

/// Compute bucket index for a latency value using binary search
#[inline]
fn bucket_index(latency_us: u64) -> usize {
    BUCKET_BOUNDS.partition_point(|&bound| bound < latency_us)
}

/// Update an atomic max value using compare-and-swap loop
#[inline]
fn update_atomic_max(atomic_max: &AtomicU64, new_value: u64) {
    let mut current_max = atomic_max.load(Ordering::Relaxed);
    while new_value > current_max {
        match atomic_max.compare_exchange_weak(
            current_max,
            new_value,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => break,
            Err(actual) => current_max = actual,
        }
    }
}

/// Swap all buckets to zero and return their values
#[inline]
fn swap_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    let mut result = [0u64; NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.swap(0, Ordering::Relaxed);
    }
    result
}

/// Load all bucket values without resetting
#[inline]
fn load_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    let mut result = [0u64; NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.load(Ordering::Relaxed);
    }
    result
}

/// Compute percentile from histogram buckets
/// Returns the upper bound of the bucket containing the percentile
fn percentile_from_buckets(buckets: &[u64; NUM_BUCKETS], percentile: f64) -> u64 {
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0;
    }

    let target = (total as f64 * percentile) as u64;
    let mut cumulative = 0u64;

    // Upper bounds for each bucket (last bucket uses 2x the previous bound)
    const BUCKET_UPPER_BOUNDS: [u64; NUM_BUCKETS] =
        [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200, 102400];

    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return BUCKET_UPPER_BOUNDS[i];
        }
    }
    BUCKET_UPPER_BOUNDS[NUM_BUCKETS - 1]
}

/// Lock-free metrics collector
///
/// All recording operations are lock-free using atomics.
/// The `report()` method atomically swaps counters to get a consistent snapshot.
pub struct Metrics {
    /// Aggregated samples pushed into the batch buffer (monotonic)
    samples_total: AtomicU64,
    /// Samples since last report (reset on report)
    samples_since_report: AtomicU64,
    /// Successful batch saves (monotonic)
    batches_saved: AtomicU64,
    /// Records persisted by successful saves (monotonic)
    records_saved: AtomicU64,
    /// Failed save attempts (monotonic)
    save_failures: AtomicU64,
    /// Samples currently held by the batch buffer
    buffered_samples: AtomicU64,
    /// Save call latency histogram (reset on report)
    save_latency_buckets: [AtomicU64; NUM_BUCKETS],
    save_latency_sum_us: AtomicU64,
    save_latency_max_us: AtomicU64,
    /// Save call latency histogram since start (never reset, for Prometheus)
    save_latency_total_buckets: [AtomicU64; NUM_BUCKETS],
    save_latency_total_sum_us: AtomicU64,
    /// Records offered to an identity with at least one listener (monotonic)
    records_published: AtomicU64,
    /// Listener deliveries that failed and pruned the listener (monotonic)
    listener_send_failures: AtomicU64,
    /// Currently connected live-feed listeners
    active_listeners: AtomicU64,
    /// Live-feed sessions opened (monotonic)
    live_sessions_total: AtomicU64,
    /// Submissions stored through the HTTP API (monotonic)
    submissions_accepted: AtomicU64,
    /// Submissions rejected by validation (monotonic)
    submissions_rejected: AtomicU64,
    /// Last report time (only accessed from reporter, not atomic)
    last_report_time: parking_lot::Mutex<Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            samples_total: AtomicU64::new(0),
            samples_since_report: AtomicU64::new(0),
            batches_saved: AtomicU64::new(0),
            records_saved: AtomicU64::new(0),
            save_failures: AtomicU64::new(0),
            buffered_samples: AtomicU64::new(0),
            save_latency_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            save_latency_sum_us: AtomicU64::new(0),
            save_latency_max_us: AtomicU64::new(0),
            save_latency_total_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            save_latency_total_sum_us: AtomicU64::new(0),
            records_published: AtomicU64::new(0),
            listener_send_failures: AtomicU64::new(0),
            active_listeners: AtomicU64::new(0),
            live_sessions_total: AtomicU64::new(0),
            submissions_accepted: AtomicU64::new(0),
            submissions_rejected: AtomicU64::new(0),
            last_report_time: parking_lot::Mutex::new(Instant::now()),
        }
    }

    /// Record an aggregated sample entering the buffer (lock-free)
    #[inline]
    pub fn record_sample(&self) {
        self.samples_total.fetch_add(1, Ordering::Relaxed);
        self.samples_since_report.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    fn record_save_latency(&self, latency_us: u64) {
        let bucket = bucket_index(latency_us);
        self.save_latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);
        self.save_latency_buckets[bucket].fetch_add(1, Ordering::Relaxed);
        self.save_latency_total_sum_us.fetch_add(latency_us, Ordering::Relaxed);
        self.save_latency_total_buckets[bucket].fetch_add(1, Ordering::Relaxed);
        update_atomic_max(&self.save_latency_max_us, latency_us);
    }

    /// Record a successful batch save
    #[inline]
    pub fn record_save(&self, records: usize, latency_us: u64) {
        self.batches_saved.fetch_add(1, Ordering::Relaxed);
        self.records_saved.fetch_add(records as u64, Ordering::Relaxed);
        self.record_save_latency(latency_us);
    }

    /// Record a failed batch save (batch retained)
    #[inline]
    pub fn record_save_failure(&self, latency_us: u64) {
        self.save_failures.fetch_add(1, Ordering::Relaxed);
        self.record_save_latency(latency_us);
    }

    #[inline]
    pub fn set_buffered_samples(&self, count: usize) {
        self.buffered_samples.store(count as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_published(&self) {
        self.records_published.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_listener_send_failure(&self) {
        self.listener_send_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn listener_connected(&self) {
        self.live_sessions_total.fetch_add(1, Ordering::Relaxed);
        self.active_listeners.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn listener_disconnected(&self) {
        // Saturating: never underflow the gauge
        let _ = self.active_listeners.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
            Some(n.saturating_sub(1))
        });
    }

    #[inline]
    pub fn record_submission(&self, accepted: bool) {
        if accepted {
            self.submissions_accepted.fetch_add(1, Ordering::Relaxed);
        } else {
            self.submissions_rejected.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn samples_total(&self) -> u64 {
        self.samples_total.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn save_failures(&self) -> u64 {
        self.save_failures.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn records_published(&self) -> u64 {
        self.records_published.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn active_listeners(&self) -> u64 {
        self.active_listeners.load(Ordering::Relaxed)
    }

    /// Calculate and return metrics summary, then reset periodic counters
    ///
    /// This is the only method that resets counters. It uses atomic swap
    /// to get a consistent snapshot while allowing concurrent updates.
    pub fn report(&self) -> MetricsSummary {
        let samples_count = self.samples_since_report.swap(0, Ordering::Relaxed);
        let save_latency_buckets = swap_buckets(&self.save_latency_buckets);
        let save_latency_sum = self.save_latency_sum_us.swap(0, Ordering::Relaxed);
        let save_latency_max_us = self.save_latency_max_us.swap(0, Ordering::Relaxed);

        let elapsed = {
            let mut last = self.last_report_time.lock();
            let elapsed = last.elapsed();
            *last = Instant::now();
            elapsed
        };

        self.summarize(
            samples_count,
            elapsed,
            save_latency_buckets,
            save_latency_sum,
            save_latency_max_us,
        )
    }

    /// Read-only summary; periodic counters keep accumulating until `report()`
    pub fn snapshot(&self) -> MetricsSummary {
        let elapsed = self.last_report_time.lock().elapsed();
        self.summarize(
            self.samples_since_report.load(Ordering::Relaxed),
            elapsed,
            load_buckets(&self.save_latency_buckets),
            self.save_latency_sum_us.load(Ordering::Relaxed),
            self.save_latency_max_us.load(Ordering::Relaxed),
        )
    }

    fn summarize(
        &self,
        samples_count: u64,
        elapsed: std::time::Duration,
        save_latency_buckets: [u64; NUM_BUCKETS],
        save_latency_sum: u64,
        save_latency_max_us: u64,
    ) -> MetricsSummary {
        let samples_per_sec = if elapsed.as_secs_f64() > 0.0 {
            samples_count as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };

        let save_count: u64 = save_latency_buckets.iter().sum();
        let save_latency_avg_us = if save_count > 0 { save_latency_sum / save_count } else { 0 };
        let save_latency_p99_us = percentile_from_buckets(&save_latency_buckets, 0.99);

        MetricsSummary {
            samples_total: self.samples_total.load(Ordering::Relaxed),
            samples_per_sec,
            batches_saved: self.batches_saved.load(Ordering::Relaxed),
            records_saved: self.records_saved.load(Ordering::Relaxed),
            save_failures: self.save_failures.load(Ordering::Relaxed),
            buffered_samples: self.buffered_samples.load(Ordering::Relaxed),
            save_latency_buckets,
            save_latency_avg_us,
            save_latency_max_us,
            save_latency_p99_us,
            save_latency_total_buckets: load_buckets(&self.save_latency_total_buckets),
            save_latency_total_sum_us: self.save_latency_total_sum_us.load(Ordering::Relaxed),
            records_published: self.records_published.load(Ordering::Relaxed),
            listener_send_failures: self.listener_send_failures.load(Ordering::Relaxed),
            active_listeners: self.active_listeners.load(Ordering::Relaxed),
            live_sessions_total: self.live_sessions_total.load(Ordering::Relaxed),
            submissions_accepted: self.submissions_accepted.load(Ordering::Relaxed),
            submissions_rejected: self.submissions_rejected.load(Ordering::Relaxed),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Number of histogram buckets (exported for Prometheus formatting)
pub const METRICS_NUM_BUCKETS: usize = NUM_BUCKETS;
/// Exported bucket bounds for Prometheus formatting
pub const METRICS_BUCKET_BOUNDS: [u64; 10] = BUCKET_BOUNDS;

#[derive(Debug)]
pub struct MetricsSummary {
    pub samples_total: u64,
    pub samples_per_sec: f64,
    pub batches_saved: u64,
    pub records_saved: u64,
    pub save_failures: u64,
    /// Samples held by the batch buffer (snapshot)
    pub buffered_samples: u64,
    /// Save latency histogram buckets
    /// Bounds: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200 µs
    pub save_latency_buckets: [u64; NUM_BUCKETS],
    pub save_latency_avg_us: u64,
    pub save_latency_max_us: u64,
    pub save_latency_p99_us: u64,
    /// Cumulative save latency histogram (same bounds, never reset)
    pub save_latency_total_buckets: [u64; NUM_BUCKETS],
    pub save_latency_total_sum_us: u64,
    pub records_published: u64,
    pub listener_send_failures: u64,
    /// Connected live-feed listeners (snapshot)
    pub active_listeners: u64,
    pub live_sessions_total: u64,
    pub submissions_accepted: u64,
    pub submissions_rejected: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            samples_total = %self.samples_total,
            samples_per_sec = format!("{:.1}", self.samples_per_sec),
            batches_saved = %self.batches_saved,
            save_failures = %self.save_failures,
            buffered = %self.buffered_samples,
            save_avg_us = %self.save_latency_avg_us,
            save_p99_us = %self.save_latency_p99_us,
            published = %self.records_published,
            listeners = %self.active_listeners,
            rejected = %self.submissions_rejected,
            "metrics"
        );
    }
}
