//! Scanner - central detection event processor
//!
//! The Scanner is the single-threaded orchestrator that coordinates:
//! - class resolution (detector label -> catalog key)
//! - cooldown deduplication and scan confirmation
//! - dispatch of confirmed scans to the reconcile worker
//! - the idle watchdog (no-recognition indicator)
//!
//! It consumes detection frames from a bounded channel and never blocks
//! on store I/O; confirmed scans go to the worker via try_send.

use crate::domain::types::{new_uuid_v7, DetectionFrame};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::feedback::{FeedbackSender, Indicator};
use crate::services::cooldown::{CooldownGate, Discard, Observation};
use crate::services::resolver::{ClassResolver, Resolution};
use crate::services::scan_worker::ScanJob;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::interval;
use tracing::{debug, info, warn};

/// Confirmation/idle tick granularity
const TICK_INTERVAL: Duration = Duration::from_millis(100);

/// Central detection event processor
pub struct Scanner {
    resolver: ClassResolver,
    cooldown: CooldownGate,
    job_tx: mpsc::Sender<ScanJob>,
    feedback: Option<FeedbackSender>,
    metrics: Arc<Metrics>,
    confidence_threshold: f32,
    idle_timeout: Duration,
    /// Last time any detection cleared the confidence threshold
    last_recognition: Instant,
    idle: bool,
}

impl Scanner {
    pub fn new(
        config: &Config,
        job_tx: mpsc::Sender<ScanJob>,
        feedback: Option<FeedbackSender>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let cooldown = CooldownGate::new(
            config.confidence_threshold(),
            Duration::from_millis(config.cooldown_window_ms()),
            Duration::from_millis(config.confirm_delay_ms()),
            Duration::from_millis(config.liveness_ms()),
        );

        Self {
            resolver: ClassResolver::new(config.catalog_keys()),
            cooldown,
            job_tx,
            feedback,
            metrics,
            confidence_threshold: config.confidence_threshold(),
            idle_timeout: Duration::from_millis(config.idle_timeout_ms()),
            // Start idle: the red indicator stays lit until the first recognition
            last_recognition: Instant::now(),
            idle: true,
        }
    }

    /// Start the scanner, consuming frames from the channel
    pub async fn run(&mut self, mut frame_rx: mpsc::Receiver<DetectionFrame>) {
        let mut tick_interval = interval(TICK_INTERVAL);

        loop {
            tokio::select! {
                frame = frame_rx.recv() => {
                    match frame {
                        Some(frame) => self.process_frame(frame, Instant::now()),
                        None => break, // Channel closed
                    }
                }
                _ = tick_interval.tick() => {
                    self.tick(Instant::now());
                }
            }
        }
    }

    /// Process a single detection frame
    pub fn process_frame(&mut self, frame: DetectionFrame, now: Instant) {
        let process_start = Instant::now();
        let mut recognized = false;

        for detection in &frame.detections {
            self.metrics.record_detection();

            if detection.conf >= self.confidence_threshold {
                recognized = true;
            }

            let (key, resolution) = self.resolver.resolve(&detection.label);
            if resolution == Resolution::Fallback {
                self.metrics.record_resolution_fallback();
            }

            match self.cooldown.observe(&key, detection.conf, now) {
                Observation::Rejected => self.metrics.record_below_threshold(),
                Observation::Suppressed => self.metrics.record_cooldown_suppressed(),
                Observation::Opened | Observation::Refreshed => {}
            }
        }

        if recognized {
            self.note_recognition(now);
        }

        let latency_us = process_start.elapsed().as_micros() as u64;
        self.metrics.record_frame_processed(latency_us);
    }

    /// Confirm due scans and drive the idle watchdog
    pub fn tick(&mut self, now: Instant) {
        let result = self.cooldown.tick(now);

        for (key, discard) in result.discarded {
            match discard {
                Discard::Flicker => self.metrics.record_flicker_discarded(),
                Discard::StaleConfidence => self.metrics.record_stale_confidence(),
            }
            debug!(key = %key, reason = ?discard, "pending_scan_discarded");
        }

        for scan in result.confirmed {
            self.metrics.record_scan_confirmed();
            let job = ScanJob { scan, sid: new_uuid_v7(), enqueued_at: Instant::now() };

            match self.job_tx.try_send(job) {
                Ok(()) => {}
                Err(TrySendError::Full(job)) => {
                    self.metrics.record_scan_dropped();
                    warn!(key = %job.scan.key, "scan_queue_full_scan_dropped");
                }
                Err(TrySendError::Closed(_)) => {
                    warn!("scan_queue_closed");
                }
            }
        }

        self.check_idle(now);
    }

    fn note_recognition(&mut self, now: Instant) {
        self.last_recognition = now;
        if self.idle {
            self.idle = false;
            info!("recognition_resumed");
            if let Some(ref feedback) = self.feedback {
                feedback.send_indicator(Indicator::Active, None);
            }
        }
    }

    fn check_idle(&mut self, now: Instant) {
        if !self.idle && now.duration_since(self.last_recognition) > self.idle_timeout {
            self.idle = true;
            info!(timeout_ms = %self.idle_timeout.as_millis(), "recognition_idle");
            if let Some(ref feedback) = self.feedback {
                feedback.send_indicator(Indicator::Idle, None);
            }
        }
    }

    /// Whether the idle indicator is currently active
    pub fn is_idle(&self) -> bool {
        self.idle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::Detection;
    use smallvec::smallvec;

    const MS: Duration = Duration::from_millis(1);

    fn frame(label: &str, conf: f32) -> DetectionFrame {
        DetectionFrame {
            ts: 0,
            detections: smallvec![Detection { label: label.to_string(), conf, bbox: [0.0; 4] }],
        }
    }

    fn scanner(queue: usize) -> (Scanner, mpsc::Receiver<ScanJob>) {
        let config = Config::default();
        let (job_tx, job_rx) = mpsc::channel(queue);
        let scanner = Scanner::new(&config, job_tx, None, Arc::new(Metrics::new()));
        (scanner, job_rx)
    }

    #[tokio::test]
    async fn test_below_threshold_never_dispatches() {
        let (mut scanner, mut job_rx) = scanner(16);
        let t0 = Instant::now();

        for i in 0..30u32 {
            scanner.process_frame(frame("maggi", 0.4), t0 + i * 100 * MS);
        }
        scanner.tick(t0 + 3000 * MS);

        assert!(job_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_sustained_detection_dispatches_one_job() {
        let (mut scanner, mut job_rx) = scanner(16);
        let t0 = Instant::now();

        // 15 fps for ~1.2s, always in view
        for i in 0..18u32 {
            scanner.process_frame(frame("maggi_masala_70g", 0.9), t0 + i * 66 * MS);
        }
        scanner.tick(t0 + 1200 * MS);

        let job = job_rx.try_recv().unwrap();
        assert_eq!(job.scan.key.as_str(), "maggi");
        // Exactly one job inside the window
        assert!(job_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_detector_variants_cool_down_jointly() {
        let (mut scanner, mut job_rx) = scanner(16);
        let t0 = Instant::now();

        // Two detector labels resolving to the same catalog key
        for i in 0..18u32 {
            let label = if i % 2 == 0 { "maggi_masala_70g" } else { "maggi_masala_140g" };
            scanner.process_frame(frame(label, 0.9), t0 + i * 66 * MS);
        }
        scanner.tick(t0 + 1200 * MS);

        assert_eq!(job_rx.try_recv().unwrap().scan.key.as_str(), "maggi");
        assert!(job_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_single_frame_flicker_never_dispatches() {
        let (mut scanner, mut job_rx) = scanner(16);
        let t0 = Instant::now();

        scanner.process_frame(frame("lux", 0.9), t0);
        scanner.tick(t0 + 1500 * MS);

        assert!(job_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_idle_watchdog_transitions() {
        let (mut scanner, _job_rx) = scanner(16);
        let t0 = Instant::now();

        assert!(scanner.is_idle());

        scanner.process_frame(frame("maggi", 0.9), t0);
        assert!(!scanner.is_idle());

        // Below-threshold frames do not count as recognition
        scanner.process_frame(frame("maggi", 0.3), t0 + 1000 * MS);
        scanner.tick(t0 + 2500 * MS);
        assert!(scanner.is_idle());

        scanner.process_frame(frame("maggi", 0.9), t0 + 2600 * MS);
        assert!(!scanner.is_idle());
    }

    #[tokio::test]
    async fn test_full_scan_queue_drops_instead_of_blocking() {
        let (mut scanner, _job_rx) = scanner(1);
        let t0 = Instant::now();

        // Two different products confirmed in the same tick; queue cap 1
        for i in 0..18u32 {
            scanner.process_frame(frame("maggi", 0.9), t0 + i * 66 * MS);
            scanner.process_frame(frame("lux", 0.9), t0 + i * 66 * MS);
        }
        scanner.tick(t0 + 1200 * MS);
        // No deadlock, no panic; one job queued, one dropped and counted
    }
}
