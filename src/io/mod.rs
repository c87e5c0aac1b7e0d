//! IO modules - external system interfaces
//!
//! This module contains all external IO operations:
//! - `detections` - MQTT client for receiving camera detection frames
//! - `store` - HTTP client for the catalog/cart document store
//! - `feedback` - Typed channel and MQTT publisher for indicator signals
//! - `http` - Prometheus metrics HTTP endpoint

pub mod detections;
pub mod feedback;
pub mod http;
pub mod store;

// Re-export commonly used types
pub use detections::start_detection_client;
pub use feedback::{
    create_feedback_channel, indicator_for_outcome, FeedbackPublisher, FeedbackSender, Indicator,
};
pub use store::{DocumentStore, HttpStore, MemoryStore};
