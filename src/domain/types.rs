//! Shared types for the smart-cart scanner

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Generate a new UUIDv7 (time-sortable)
pub fn new_uuid_v7() -> String {
    Uuid::now_v7().to_string()
}

/// Get current epoch milliseconds
#[inline]
pub fn epoch_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// Newtype wrapper for catalog keys to provide type safety
///
/// A catalog key is the normalized product family name (e.g.
/// "balaji_wafers_chaatchaska") that detector class labels resolve to.
/// Several detector labels may map to the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CatalogKey(pub String);

impl CatalogKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CatalogKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CatalogKey {
    fn from(s: &str) -> Self {
        CatalogKey(s.to_string())
    }
}

/// Newtype wrapper for product barcodes
///
/// The barcode is the uniqueness key for cart line items.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Barcode(pub String);

impl Barcode {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Barcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Barcode {
    fn from(s: &str) -> Self {
        Barcode(s.to_string())
    }
}

/// A single detection reported by the camera process for one frame
#[derive(Debug, Clone, Deserialize)]
pub struct Detection {
    /// Detector class label (opaque; resolved to a CatalogKey)
    pub label: String,
    /// Confidence score in [0, 1]
    pub conf: f32,
    /// Bounding box [x1, y1, x2, y2] in frame pixels
    #[serde(default)]
    pub bbox: [f64; 4],
}

/// One processed frame from the detection stream
#[derive(Debug, Clone, Deserialize)]
pub struct DetectionFrame {
    /// Frame timestamp (epoch ms) as stamped by the camera process
    #[serde(default)]
    pub ts: u64,
    #[serde(default)]
    pub detections: SmallVec<[Detection; 4]>,
}

/// A detection that passed the cooldown gate and is ready for reconciliation
#[derive(Debug, Clone)]
pub struct ConfirmedScan {
    pub key: CatalogKey,
    /// Latest observed confidence at confirmation time
    pub confidence: f32,
}

/// Result of reconciling a confirmed scan against the cart document
#[derive(Debug, Clone, PartialEq)]
pub enum ScanOutcome {
    /// A new line item was appended (or the cart document was created)
    Created,
    /// An existing line item's quantity was incremented
    Incremented,
    /// The store could not be read or written; the scan is dropped
    Failed(String),
}

impl ScanOutcome {
    pub fn as_str(&self) -> &str {
        match self {
            ScanOutcome::Created => "created",
            ScanOutcome::Incremented => "incremented",
            ScanOutcome::Failed(_) => "failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_detection_frame() {
        let json = r#"{"ts":1700000000000,"detections":[
            {"label":"maggi_masala_70g","conf":0.91,"bbox":[10.0,20.0,110.0,180.0]},
            {"label":"tata_salt","conf":0.42}
        ]}"#;

        let frame: DetectionFrame = serde_json::from_str(json).unwrap();
        assert_eq!(frame.ts, 1700000000000);
        assert_eq!(frame.detections.len(), 2);
        assert_eq!(frame.detections[0].label, "maggi_masala_70g");
        assert!((frame.detections[1].conf - 0.42).abs() < f32::EPSILON);
        assert_eq!(frame.detections[1].bbox, [0.0; 4]);
    }

    #[test]
    fn test_parse_empty_frame() {
        let frame: DetectionFrame = serde_json::from_str("{}").unwrap();
        assert_eq!(frame.ts, 0);
        assert!(frame.detections.is_empty());
    }

    #[test]
    fn test_outcome_as_str() {
        assert_eq!(ScanOutcome::Created.as_str(), "created");
        assert_eq!(ScanOutcome::Incremented.as_str(), "incremented");
        assert_eq!(ScanOutcome::Failed("timeout".into()).as_str(), "failed");
    }
}
