//! Feedback egress - typed channel and MQTT publisher
//!
//! Routes reconciliation outcomes and scanner state to downstream
//! indicators. The engine only emits discrete signals; the LED driver /
//! cart-review UI consuming the topics decides how to display them.
//!
//! Topics:
//! - scancart/feedback - indicator signals (QoS 0)
//! - scancart/scans    - committed scan records (QoS 1)
//! - scancart/metrics  - periodic metrics snapshots (QoS 0)

use crate::domain::types::{epoch_ms, Barcode, CatalogKey, ScanOutcome};
use crate::infra::config::Config;
use crate::infra::metrics::MetricsSummary;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Discrete indicator signals for the hardware/UI collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Indicator {
    /// New line item added (green LED)
    Created,
    /// Existing line item incremented (blue LED)
    Updated,
    /// Nothing recognized for the idle timeout (red LED on)
    Idle,
    /// Recognition resumed after idle (red LED off)
    Active,
}

impl Indicator {
    pub fn as_str(&self) -> &str {
        match self {
            Indicator::Created => "created",
            Indicator::Updated => "updated",
            Indicator::Idle => "idle",
            Indicator::Active => "active",
        }
    }
}

/// Payload for indicator signals
#[derive(Debug, Clone, Serialize)]
pub struct IndicatorPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site: Option<String>,
    pub ts: u64,
    pub signal: Indicator,
    /// Catalog key that triggered the signal (absent for idle/active)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

/// Payload for committed scan records
#[derive(Debug, Clone, Serialize)]
pub struct ScanPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site: Option<String>,
    /// UUIDv7 scan id
    pub sid: String,
    pub ts: u64,
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub barcode: Option<String>,
    pub confidence: f32,
    pub outcome: String,
    /// Line quantity after reconciliation (absent on failure)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quantity: Option<u32>,
}

/// Payload for metrics snapshots
#[derive(Debug, Serialize)]
pub struct MetricsPayload {
    pub site: String,
    pub ts: u64,
    #[serde(flatten)]
    pub summary: MetricsSummary,
}

/// Messages that can be sent to the MQTT publisher
#[derive(Debug)]
pub enum FeedbackMessage {
    Indicator(IndicatorPayload),
    Scan(ScanPayload),
    Metrics(MetricsPayload),
}

/// Sender handle for feedback messages
///
/// Clone this to share across multiple producers.
/// Non-blocking - if the channel is full, messages are dropped.
#[derive(Clone)]
pub struct FeedbackSender {
    tx: mpsc::Sender<FeedbackMessage>,
    site_id: String,
}

impl FeedbackSender {
    pub fn new(tx: mpsc::Sender<FeedbackMessage>, site_id: String) -> Self {
        Self { tx, site_id }
    }

    /// Send an indicator signal
    pub fn send_indicator(&self, signal: Indicator, key: Option<&CatalogKey>) {
        let payload = IndicatorPayload {
            site: Some(self.site_id.clone()),
            ts: epoch_ms(),
            signal,
            key: key.map(|k| k.as_str().to_string()),
        };
        let _ = self.tx.try_send(FeedbackMessage::Indicator(payload));
    }

    /// Send a committed scan record
    pub fn send_scan(
        &self,
        sid: &str,
        key: &CatalogKey,
        barcode: Option<&Barcode>,
        confidence: f32,
        outcome: &ScanOutcome,
        quantity: Option<u32>,
    ) {
        let payload = ScanPayload {
            site: Some(self.site_id.clone()),
            sid: sid.to_string(),
            ts: epoch_ms(),
            key: key.as_str().to_string(),
            barcode: barcode.map(|b| b.as_str().to_string()),
            confidence,
            outcome: outcome.as_str().to_string(),
            quantity,
        };
        let _ = self.tx.try_send(FeedbackMessage::Scan(payload));
    }

    /// Send a metrics snapshot
    pub fn send_metrics(&self, summary: MetricsSummary) {
        let payload =
            MetricsPayload { site: self.site_id.clone(), ts: epoch_ms(), summary };
        let _ = self.tx.try_send(FeedbackMessage::Metrics(payload));
    }
}

/// Create a new feedback channel pair
///
/// Returns (sender, receiver) where sender can be cloned and shared.
pub fn create_feedback_channel(
    buffer_size: usize,
    site_id: String,
) -> (FeedbackSender, mpsc::Receiver<FeedbackMessage>) {
    let (tx, rx) = mpsc::channel(buffer_size);
    (FeedbackSender::new(tx, site_id), rx)
}

/// MQTT publisher actor
///
/// Receives messages from the feedback channel and publishes to MQTT topics.
pub struct FeedbackPublisher {
    client: AsyncClient,
    rx: mpsc::Receiver<FeedbackMessage>,
    feedback_topic: String,
    scans_topic: String,
    metrics_topic: String,
}

impl FeedbackPublisher {
    /// Create a new MQTT publisher
    ///
    /// Connects to the broker at the configured MQTT host/port.
    pub fn new(config: &Config, rx: mpsc::Receiver<FeedbackMessage>) -> Self {
        let client_id = format!("scancart-feedback-{}", std::process::id());
        let mut mqttoptions = MqttOptions::new(client_id, config.mqtt_host(), config.mqtt_port());
        mqttoptions.set_keep_alive(Duration::from_secs(30));
        mqttoptions.set_clean_session(true);

        if let (Some(username), Some(password)) = (config.mqtt_username(), config.mqtt_password()) {
            mqttoptions.set_credentials(username, password);
        }

        let (client, eventloop) = AsyncClient::new(mqttoptions, 100);

        // Spawn the eventloop handler
        tokio::spawn(async move {
            let mut eventloop = eventloop;
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("feedback_mqtt_connected");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "feedback_mqtt_error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        Self {
            client,
            rx,
            feedback_topic: config.feedback_topic().to_string(),
            scans_topic: config.scans_topic().to_string(),
            metrics_topic: config.metrics_topic().to_string(),
        }
    }

    /// Run the publisher loop until shutdown
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            feedback = %self.feedback_topic,
            scans = %self.scans_topic,
            metrics = %self.metrics_topic,
            "feedback_publisher_started"
        );

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("feedback_publisher_shutdown");
                        // Drain remaining messages
                        while let Ok(msg) = self.rx.try_recv() {
                            self.publish_message(msg).await;
                        }
                        return;
                    }
                }
                Some(msg) = self.rx.recv() => {
                    self.publish_message(msg).await;
                }
            }
        }
    }

    async fn publish_message(&self, msg: FeedbackMessage) {
        match msg {
            FeedbackMessage::Indicator(payload) => {
                if let Ok(json) = serde_json::to_string(&payload) {
                    if let Err(e) = self
                        .client
                        .publish(&self.feedback_topic, QoS::AtMostOnce, false, json.as_bytes())
                        .await
                    {
                        debug!(error = %e, "feedback_indicator_publish_failed");
                    }
                }
            }
            FeedbackMessage::Scan(payload) => {
                // QoS 1 for scan records (at-least-once delivery)
                if let Ok(json) = serde_json::to_string(&payload) {
                    if let Err(e) = self
                        .client
                        .publish(&self.scans_topic, QoS::AtLeastOnce, false, json.as_bytes())
                        .await
                    {
                        error!(error = %e, "feedback_scan_publish_failed");
                    }
                }
            }
            FeedbackMessage::Metrics(payload) => {
                if let Ok(json) = serde_json::to_string(&payload) {
                    if let Err(e) = self
                        .client
                        .publish(&self.metrics_topic, QoS::AtMostOnce, false, json.as_bytes())
                        .await
                    {
                        debug!(error = %e, "feedback_metrics_publish_failed");
                    }
                }
            }
        }
    }
}

/// Map a reconciliation outcome to its indicator signal, if any
pub fn indicator_for_outcome(outcome: &ScanOutcome) -> Option<Indicator> {
    match outcome {
        ScanOutcome::Created => Some(Indicator::Created),
        ScanOutcome::Incremented => Some(Indicator::Updated),
        // No positive indicator on failure; the idle watchdog is driven
        // by detection presence, not by reconciliation outcome
        ScanOutcome::Failed(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_indicator_payload_serializes() {
        let (sender, mut rx) = create_feedback_channel(8, "cart-01".to_string());
        sender.send_indicator(Indicator::Created, Some(&"maggi".into()));

        let msg = rx.recv().await.unwrap();
        let FeedbackMessage::Indicator(payload) = msg else {
            panic!("expected indicator message");
        };
        let json = serde_json::to_string(&payload).unwrap();
        assert!(json.contains("\"signal\":\"created\""));
        assert!(json.contains("\"key\":\"maggi\""));
        assert!(json.contains("\"site\":\"cart-01\""));
    }

    #[tokio::test]
    async fn test_channel_full_drops_instead_of_blocking() {
        let (sender, _rx) = create_feedback_channel(1, "cart-01".to_string());
        sender.send_indicator(Indicator::Idle, None);
        // Second send hits a full channel; must not block or panic
        sender.send_indicator(Indicator::Active, None);
    }

    #[test]
    fn test_indicator_for_outcome() {
        assert_eq!(indicator_for_outcome(&ScanOutcome::Created), Some(Indicator::Created));
        assert_eq!(indicator_for_outcome(&ScanOutcome::Incremented), Some(Indicator::Updated));
        assert_eq!(indicator_for_outcome(&ScanOutcome::Failed("x".into())), None);
    }
}
