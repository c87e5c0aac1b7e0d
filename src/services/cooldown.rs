//! Cooldown deduplication for the detection stream
//!
//! Collapses per-frame detections into discrete scan events:
//! - a confidence floor rejects weak detections outright;
//! - a per-key cooldown window suppresses repeats while an object stays
//!   in view after a committed scan;
//! - a confirmation delay holds an accepted detection open and commits it
//!   only if the key kept being detected, absorbing single-frame false
//!   positives and occlusion flicker.
//!
//! Confidence is re-validated at confirmation time against the latest
//! observed score: a pending scan whose most recent detection fell below
//! the threshold is discarded rather than committed on a stale frame's
//! score. Keys are resolved catalog keys, not raw detector labels, so
//! detector classes mapping to one catalog entry cool down jointly.

use crate::domain::types::{CatalogKey, ConfirmedScan};
use rustc_hash::FxHashMap;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// What `observe` did with a detection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// Below the confidence threshold with no pending entry; ignored
    Rejected,
    /// Inside the cooldown window of a committed scan; ignored
    Suppressed,
    /// Opened a new pending entry
    Opened,
    /// Refreshed an existing pending entry
    Refreshed,
}

/// A detection accepted but not yet committed
#[derive(Debug, Clone)]
struct PendingScan {
    first_seen: Instant,
    last_seen: Instant,
    /// Confidence of the most recent detection (any score, for re-validation)
    last_confidence: f32,
}

/// Why a pending entry was discarded at confirmation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Discard {
    /// The key stopped being detected before the delay elapsed
    Flicker,
    /// The latest observed confidence fell below the threshold
    StaleConfidence,
}

/// Result of a confirmation tick
#[derive(Debug, Default)]
pub struct TickResult {
    pub confirmed: Vec<ConfirmedScan>,
    pub discarded: Vec<(CatalogKey, Discard)>,
}

/// Per-key cooldown and confirmation state
pub struct CooldownGate {
    threshold: f32,
    window: Duration,
    confirm_delay: Duration,
    liveness: Duration,
    last_emitted: FxHashMap<CatalogKey, Instant>,
    pending: FxHashMap<CatalogKey, PendingScan>,
}

impl CooldownGate {
    pub fn new(threshold: f32, window: Duration, confirm_delay: Duration, liveness: Duration) -> Self {
        Self {
            threshold,
            window,
            confirm_delay,
            liveness,
            last_emitted: FxHashMap::default(),
            pending: FxHashMap::default(),
        }
    }

    /// Feed one resolved detection into the gate
    pub fn observe(&mut self, key: &CatalogKey, confidence: f32, now: Instant) -> Observation {
        // An existing pending entry is refreshed by any detection of its
        // key, whatever the score; the latest score decides at commit time
        if let Some(pending) = self.pending.get_mut(key) {
            pending.last_seen = now;
            pending.last_confidence = confidence;
            return Observation::Refreshed;
        }

        if confidence < self.threshold {
            return Observation::Rejected;
        }

        if let Some(&emitted_at) = self.last_emitted.get(key) {
            if now.duration_since(emitted_at) < self.window {
                return Observation::Suppressed;
            }
        }

        debug!(key = %key, confidence = %confidence, "scan_pending_opened");
        self.pending.insert(
            key.clone(),
            PendingScan { first_seen: now, last_seen: now, last_confidence: confidence },
        );
        Observation::Opened
    }

    /// Commit pending entries whose confirmation delay has elapsed
    ///
    /// An entry commits only if its key was re-seen within the liveness
    /// window of this tick and its latest confidence still clears the
    /// threshold; otherwise it is discarded.
    pub fn tick(&mut self, now: Instant) -> TickResult {
        let mut result = TickResult::default();

        let due: Vec<CatalogKey> = self
            .pending
            .iter()
            .filter(|(_, p)| now.duration_since(p.first_seen) >= self.confirm_delay)
            .map(|(key, _)| key.clone())
            .collect();

        for key in due {
            let Some(pending) = self.pending.remove(&key) else {
                continue;
            };

            if now.duration_since(pending.last_seen) > self.liveness {
                debug!(key = %key, "scan_discarded_flicker");
                result.discarded.push((key, Discard::Flicker));
                continue;
            }

            if pending.last_confidence < self.threshold {
                debug!(
                    key = %key,
                    confidence = %pending.last_confidence,
                    "scan_discarded_stale_confidence"
                );
                result.discarded.push((key, Discard::StaleConfidence));
                continue;
            }

            self.last_emitted.insert(key.clone(), now);
            info!(key = %key, confidence = %pending.last_confidence, "scan_confirmed");
            result.confirmed.push(ConfirmedScan { key, confidence: pending.last_confidence });
        }

        result
    }

    /// Number of entries awaiting confirmation
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
