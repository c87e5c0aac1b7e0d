//! MQTT client for receiving detection frames from the camera process

use crate::domain::types::DetectionFrame;
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Start the MQTT client and send parsed detection frames to the channel
///
/// Frames are sent via try_send to avoid blocking the MQTT eventloop.
/// Dropped frames are counted in metrics and logged (rate-limited).
pub async fn start_detection_client(
    config: &Config,
    frame_tx: mpsc::Sender<DetectionFrame>,
    metrics: Arc<Metrics>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let client_id = format!("scancart-ingest-{}", std::process::id());
    let mut mqttoptions = MqttOptions::new(client_id, config.mqtt_host(), config.mqtt_port());
    mqttoptions.set_keep_alive(Duration::from_secs(30));

    // Set credentials if configured
    if let (Some(username), Some(password)) = (config.mqtt_username(), config.mqtt_password()) {
        mqttoptions.set_credentials(username, password);
    }

    let (client, mut eventloop) = AsyncClient::new(mqttoptions, 100);
    client.subscribe(config.mqtt_topic(), QoS::AtMostOnce).await?;

    info!(
        topic = %config.mqtt_topic(),
        host = %config.mqtt_host(),
        port = %config.mqtt_port(),
        "detection_client_subscribed"
    );

    // Rate-limit drop warnings to 1 per second
    let mut last_drop_warn = Instant::now() - Duration::from_secs(2);

    loop {
        tokio::select! {
            // Check for shutdown signal
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("detection_client_shutdown");
                    return Ok(());
                }
            }
            // Process MQTT events
            result = eventloop.poll() => {
                match result {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let frame = match serde_json::from_slice::<DetectionFrame>(&publish.payload) {
                            Ok(frame) => frame,
                            Err(e) => {
                                warn!(error = %e, topic = %publish.topic, "detection_frame_parse_failed");
                                continue;
                            }
                        };

                        if frame.detections.is_empty() {
                            debug!(ts = %frame.ts, "detection_frame_empty");
                        }

                        match frame_tx.try_send(frame) {
                            Ok(()) => {}
                            Err(TrySendError::Full(_)) => {
                                metrics.record_frame_dropped();
                                if last_drop_warn.elapsed() >= Duration::from_secs(1) {
                                    warn!("detection_channel_full_frame_dropped");
                                    last_drop_warn = Instant::now();
                                }
                            }
                            Err(TrySendError::Closed(_)) => {
                                info!("detection_channel_closed");
                                return Ok(());
                            }
                        }
                    }
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("detection_client_connected");
                        // Re-subscribe after reconnect
                        if let Err(e) = client.subscribe(config.mqtt_topic(), QoS::AtMostOnce).await {
                            error!(error = %e, "detection_resubscribe_failed");
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!(error = %e, "detection_client_error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }
    }
}
