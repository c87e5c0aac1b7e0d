//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics for hot-path operations to avoid mutex contention.
//! All counter updates are lock-free; reporting is the only operation
//! that needs synchronization (via atomic swap).
//!
//! NOTE: All atomics use Relaxed ordering intentionally—these are statistical
//! counters only. Do NOT use these atomics for coordination or logic decisions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Prometheus-style exponential bucket boundaries (microseconds)
/// Buckets: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200
pub const METRICS_BUCKET_BOUNDS: [u64; 10] =
    [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200];
pub const METRICS_NUM_BUCKETS: usize = 11;

/// Compute bucket index for a latency value using binary search
#[inline]
fn bucket_index(latency_us: u64) -> usize {
    METRICS_BUCKET_BOUNDS.partition_point(|&bound| bound < latency_us)
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
fn swap_buckets(buckets: &[AtomicU64; METRICS_NUM_BUCKETS]) -> [u64; METRICS_NUM_BUCKETS] {
    let mut result = [0u64; METRICS_NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.swap(0, Ordering::Relaxed);
    }
    result
}

/// Compute percentile from histogram buckets
/// Returns the upper bound of the bucket containing the percentile
fn percentile_from_buckets(buckets: &[u64; METRICS_NUM_BUCKETS], percentile: f64) -> u64 {
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0;
    }

    let target = (total as f64 * percentile) as u64;
    let mut cumulative = 0u64;

    // Upper bounds for each bucket (last bucket uses 2x the previous bound)
    const BUCKET_UPPER_BOUNDS: [u64; METRICS_NUM_BUCKETS] =
        [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200, 102400];

    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return BUCKET_UPPER_BOUNDS[i];
        }
    }
    BUCKET_UPPER_BOUNDS[METRICS_NUM_BUCKETS - 1]
}

/// Lock-free metrics collector
///
/// All recording operations are lock-free using atomics.
/// The `report()` method atomically swaps periodic counters to get a
/// consistent snapshot.
pub struct Metrics {
    /// Total detection frames processed (monotonic)
    frames_total: AtomicU64,
    /// Frames since last report (reset on report)
    frames_since_report: AtomicU64,
    /// Total individual detections seen (monotonic)
    detections_total: AtomicU64,
    /// Detections rejected below the confidence threshold (monotonic)
    below_threshold_total: AtomicU64,
    /// Detections suppressed by an active cooldown window (monotonic)
    cooldown_suppressed_total: AtomicU64,
    /// Labels resolved via the two-token fallback rule (monotonic)
    resolution_fallback_total: AtomicU64,
    /// Scans confirmed past the cooldown gate (monotonic)
    scans_confirmed_total: AtomicU64,
    /// Pending scans discarded as flicker at confirmation (monotonic)
    flicker_discarded_total: AtomicU64,
    /// Pending scans discarded by confidence re-validation (monotonic)
    stale_confidence_total: AtomicU64,
    /// Confirmed scans with no catalog entry (monotonic)
    catalog_miss_total: AtomicU64,
    /// Reconciliations that appended a new line (monotonic)
    lines_created_total: AtomicU64,
    /// Reconciliations that incremented a quantity (monotonic)
    lines_incremented_total: AtomicU64,
    /// Reconciliations that failed at the store (monotonic)
    reconcile_failed_total: AtomicU64,
    /// Detection frames dropped on a full ingest channel (monotonic)
    frames_dropped: AtomicU64,
    /// Confirmed scans dropped on a full reconcile queue (monotonic)
    scans_dropped: AtomicU64,
    /// Frame processing latency (reset on report)
    frame_latency_sum_us: AtomicU64,
    frame_latency_max_us: AtomicU64,
    frame_latency_buckets: [AtomicU64; METRICS_NUM_BUCKETS],
    /// Reconcile end-to-end latency (reset on report)
    reconcile_count_since_report: AtomicU64,
    reconcile_latency_sum_us: AtomicU64,
    reconcile_latency_max_us: AtomicU64,
    reconcile_latency_buckets: [AtomicU64; METRICS_NUM_BUCKETS],
    /// Current detection channel depth (updated by sampler)
    event_queue_depth: AtomicU64,
    /// Current reconcile queue depth (updated by sampler)
    scan_queue_depth: AtomicU64,
    /// Last report time (only accessed from reporter, not atomic)
    last_report_time: parking_lot::Mutex<Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            frames_total: AtomicU64::new(0),
            frames_since_report: AtomicU64::new(0),
            detections_total: AtomicU64::new(0),
            below_threshold_total: AtomicU64::new(0),
            cooldown_suppressed_total: AtomicU64::new(0),
            resolution_fallback_total: AtomicU64::new(0),
            scans_confirmed_total: AtomicU64::new(0),
            flicker_discarded_total: AtomicU64::new(0),
            stale_confidence_total: AtomicU64::new(0),
            catalog_miss_total: AtomicU64::new(0),
            lines_created_total: AtomicU64::new(0),
            lines_incremented_total: AtomicU64::new(0),
            reconcile_failed_total: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
            scans_dropped: AtomicU64::new(0),
            frame_latency_sum_us: AtomicU64::new(0),
            frame_latency_max_us: AtomicU64::new(0),
            frame_latency_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            reconcile_count_since_report: AtomicU64::new(0),
            reconcile_latency_sum_us: AtomicU64::new(0),
            reconcile_latency_max_us: AtomicU64::new(0),
            reconcile_latency_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            event_queue_depth: AtomicU64::new(0),
            scan_queue_depth: AtomicU64::new(0),
            last_report_time: parking_lot::Mutex::new(Instant::now()),
        }
    }

    /// Record a frame was processed with given latency (lock-free)
    #[inline]
    pub fn record_frame_processed(&self, latency_us: u64) {
        self.frames_total.fetch_add(1, Ordering::Relaxed);
        self.frames_since_report.fetch_add(1, Ordering::Relaxed);
        self.frame_latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);

        let bucket = bucket_index(latency_us);
        self.frame_latency_buckets[bucket].fetch_add(1, Ordering::Relaxed);

        update_atomic_max(&self.frame_latency_max_us, latency_us);
    }

    #[inline]
    pub fn record_detection(&self) {
        self.detections_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_below_threshold(&self) {
        self.below_threshold_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_cooldown_suppressed(&self) {
        self.cooldown_suppressed_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_resolution_fallback(&self) {
        self.resolution_fallback_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_scan_confirmed(&self) {
        self.scans_confirmed_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_flicker_discarded(&self) {
        self.flicker_discarded_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_stale_confidence(&self) {
        self.stale_confidence_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_catalog_miss(&self) {
        self.catalog_miss_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_line_created(&self) {
        self.lines_created_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_line_incremented(&self) {
        self.lines_incremented_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_reconcile_failed(&self) {
        self.reconcile_failed_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_frame_dropped(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_scan_dropped(&self) {
        self.scans_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Record reconcile end-to-end latency (confirmation to store write)
    #[inline]
    pub fn record_reconcile_latency(&self, latency_us: u64) {
        self.reconcile_count_since_report.fetch_add(1, Ordering::Relaxed);
        self.reconcile_latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);

        let bucket = bucket_index(latency_us);
        self.reconcile_latency_buckets[bucket].fetch_add(1, Ordering::Relaxed);

        update_atomic_max(&self.reconcile_latency_max_us, latency_us);
    }

    /// Set current detection channel depth (called by sampler)
    #[inline]
    pub fn set_event_queue_depth(&self, depth: u64) {
        self.event_queue_depth.store(depth, Ordering::Relaxed);
    }

    /// Set current reconcile queue depth (called by sampler)
    #[inline]
    pub fn set_scan_queue_depth(&self, depth: u64) {
        self.scan_queue_depth.store(depth, Ordering::Relaxed);
    }

    #[inline]
    pub fn frames_total(&self) -> u64 {
        self.frames_total.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn scans_confirmed_total(&self) -> u64 {
        self.scans_confirmed_total.load(Ordering::Relaxed)
    }

    /// Calculate and return metrics summary, then reset periodic counters
    ///
    /// This is the only method that resets counters. It uses atomic swap
    /// to get a consistent snapshot while allowing concurrent updates.
    pub fn report(&self) -> MetricsSummary {
        let frames_count = self.frames_since_report.swap(0, Ordering::Relaxed);
        let frame_latency_sum = self.frame_latency_sum_us.swap(0, Ordering::Relaxed);
        let frame_latency_max = self.frame_latency_max_us.swap(0, Ordering::Relaxed);
        let frame_lat_buckets = swap_buckets(&self.frame_latency_buckets);

        let reconcile_count = self.reconcile_count_since_report.swap(0, Ordering::Relaxed);
        let reconcile_latency_sum = self.reconcile_latency_sum_us.swap(0, Ordering::Relaxed);
        let reconcile_latency_max = self.reconcile_latency_max_us.swap(0, Ordering::Relaxed);
        let reconcile_lat_buckets = swap_buckets(&self.reconcile_latency_buckets);

        let elapsed = {
            let mut last = self.last_report_time.lock();
            let elapsed = last.elapsed();
            *last = Instant::now();
            elapsed
        };

        let frames_per_sec = if elapsed.as_secs_f64() > 0.0 {
            frames_count as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };

        let frame_lat_avg_us = if frames_count > 0 { frame_latency_sum / frames_count } else { 0 };
        let reconcile_lat_avg_us =
            if reconcile_count > 0 { reconcile_latency_sum / reconcile_count } else { 0 };

        MetricsSummary {
            frames_total: self.frames_total.load(Ordering::Relaxed),
            frames_per_sec,
            detections_total: self.detections_total.load(Ordering::Relaxed),
            below_threshold_total: self.below_threshold_total.load(Ordering::Relaxed),
            cooldown_suppressed_total: self.cooldown_suppressed_total.load(Ordering::Relaxed),
            resolution_fallback_total: self.resolution_fallback_total.load(Ordering::Relaxed),
            scans_confirmed_total: self.scans_confirmed_total.load(Ordering::Relaxed),
            flicker_discarded_total: self.flicker_discarded_total.load(Ordering::Relaxed),
            stale_confidence_total: self.stale_confidence_total.load(Ordering::Relaxed),
            catalog_miss_total: self.catalog_miss_total.load(Ordering::Relaxed),
            lines_created_total: self.lines_created_total.load(Ordering::Relaxed),
            lines_incremented_total: self.lines_incremented_total.load(Ordering::Relaxed),
            reconcile_failed_total: self.reconcile_failed_total.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            scans_dropped: self.scans_dropped.load(Ordering::Relaxed),
            frame_lat_buckets,
            frame_lat_avg_us,
            frame_lat_max_us: frame_latency_max,
            frame_lat_p50_us: percentile_from_buckets(&frame_lat_buckets, 0.50),
            frame_lat_p99_us: percentile_from_buckets(&frame_lat_buckets, 0.99),
            reconcile_lat_buckets,
            reconcile_lat_avg_us,
            reconcile_lat_max_us: reconcile_latency_max,
            reconcile_lat_p99_us: percentile_from_buckets(&reconcile_lat_buckets, 0.99),
            event_queue_depth: self.event_queue_depth.load(Ordering::Relaxed),
            scan_queue_depth: self.scan_queue_depth.load(Ordering::Relaxed),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time metrics snapshot for logging and egress
#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricsSummary {
    pub frames_total: u64,
    pub frames_per_sec: f64,
    pub detections_total: u64,
    pub below_threshold_total: u64,
    pub cooldown_suppressed_total: u64,
    pub resolution_fallback_total: u64,
    pub scans_confirmed_total: u64,
    pub flicker_discarded_total: u64,
    pub stale_confidence_total: u64,
    pub catalog_miss_total: u64,
    pub lines_created_total: u64,
    pub lines_incremented_total: u64,
    pub reconcile_failed_total: u64,
    pub frames_dropped: u64,
    pub scans_dropped: u64,
    /// Frame processing latency histogram buckets
    /// Bounds: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200 µs
    pub frame_lat_buckets: [u64; METRICS_NUM_BUCKETS],
    pub frame_lat_avg_us: u64,
    pub frame_lat_max_us: u64,
    pub frame_lat_p50_us: u64,
    pub frame_lat_p99_us: u64,
    /// Reconcile latency histogram buckets (same bounds)
    pub reconcile_lat_buckets: [u64; METRICS_NUM_BUCKETS],
    pub reconcile_lat_avg_us: u64,
    pub reconcile_lat_max_us: u64,
    pub reconcile_lat_p99_us: u64,
    pub event_queue_depth: u64,
    pub scan_queue_depth: u64,
}

impl MetricsSummary {
    /// Log the summary as a single structured event
    pub fn log(&self) {
        info!(
            frames_total = %self.frames_total,
            frames_per_sec = format!("{:.1}", self.frames_per_sec),
            detections = %self.detections_total,
            below_threshold = %self.below_threshold_total,
            suppressed = %self.cooldown_suppressed_total,
            confirmed = %self.scans_confirmed_total,
            flicker = %self.flicker_discarded_total,
            catalog_miss = %self.catalog_miss_total,
            created = %self.lines_created_total,
            incremented = %self.lines_incremented_total,
            failed = %self.reconcile_failed_total,
            frame_lat_avg_us = %self.frame_lat_avg_us,
            frame_lat_p99_us = %self.frame_lat_p99_us,
            reconcile_lat_avg_us = %self.reconcile_lat_avg_us,
            reconcile_lat_p99_us = %self.reconcile_lat_p99_us,
            "metrics_report"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_index() {
        assert_eq!(bucket_index(50), 0);
        assert_eq!(bucket_index(100), 0);
        assert_eq!(bucket_index(101), 1);
        assert_eq!(bucket_index(51200), 9);
        assert_eq!(bucket_index(100000), 10);
    }

    #[test]
    fn test_record_and_report() {
        let metrics = Metrics::new();

        metrics.record_frame_processed(150);
        metrics.record_frame_processed(350);
        metrics.record_detection();
        metrics.record_detection();
        metrics.record_below_threshold();
        metrics.record_scan_confirmed();
        metrics.record_line_created();

        let summary = metrics.report();
        assert_eq!(summary.frames_total, 2);
        assert_eq!(summary.detections_total, 2);
        assert_eq!(summary.below_threshold_total, 1);
        assert_eq!(summary.scans_confirmed_total, 1);
        assert_eq!(summary.lines_created_total, 1);
        assert_eq!(summary.frame_lat_avg_us, 250);
        assert_eq!(summary.frame_lat_max_us, 350);
        // Buckets: 150 -> ≤200, 350 -> ≤400
        assert_eq!(summary.frame_lat_buckets[1], 1);
        assert_eq!(summary.frame_lat_buckets[2], 1);
    }

    #[test]
    fn test_report_resets_periodic_counters() {
        let metrics = Metrics::new();
        metrics.record_frame_processed(100);

        let first = metrics.report();
        assert_eq!(first.frame_lat_max_us, 100);

        let second = metrics.report();
        assert_eq!(second.frame_lat_max_us, 0);
        assert_eq!(second.frame_lat_buckets, [0; METRICS_NUM_BUCKETS]);
        // Monotonic counter survives the reset
        assert_eq!(second.frames_total, 1);
    }

    #[test]
    fn test_percentile_from_buckets() {
        let mut buckets = [0u64; METRICS_NUM_BUCKETS];
        buckets[0] = 90;
        buckets[5] = 10;
        assert_eq!(percentile_from_buckets(&buckets, 0.50), 100);
        assert_eq!(percentile_from_buckets(&buckets, 0.99), 3200);
    }
}
