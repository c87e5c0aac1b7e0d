//! Detection stream simulator - scripted frame injection
//!
//! Publishes synthetic detection frames over MQTT so the full pipeline can
//! be exercised without a camera or model. The scripted scenario covers the
//! interesting cases:
//! 1. Product held in view past the confirmation delay (new line item)
//! 2. Single-frame flicker of a second product (must be discarded)
//! 3. A different product held in view (second line item)
//! 4. The first product again after cooldown expiry (quantity increment)
//!
//! Usage:
//!   cargo run --bin scancart-sim -- --mqtt-host localhost --loops 1

use clap::Parser;
use rumqttc::{AsyncClient, MqttOptions, QoS};
use serde_json::json;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::sleep;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "scancart-sim")]
#[command(about = "Detection stream simulator for local testing")]
struct Args {
    /// MQTT broker host
    #[arg(long, default_value = "localhost")]
    mqtt_host: String,

    /// MQTT broker port
    #[arg(long, default_value = "1883")]
    mqtt_port: u16,

    /// Detection topic
    #[arg(long, default_value = "scancart/detections")]
    topic: String,

    /// Frames per second for sustained detections
    #[arg(long, default_value = "15")]
    fps: u64,

    /// How long a product stays in view (ms); keep above the engine's
    /// confirmation delay
    #[arg(long, default_value = "1500")]
    dwell_ms: u64,

    /// Gap between scenario steps (ms); keep above the cooldown window
    #[arg(long, default_value = "1500")]
    gap_ms: u64,

    /// Number of scenario repetitions
    #[arg(long, default_value = "1")]
    loops: u32,
}

fn epoch_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

struct Publisher {
    client: AsyncClient,
    topic: String,
}

impl Publisher {
    async fn publish_frame(&self, detections: &[(&str, f32)]) {
        let payload = json!({
            "ts": epoch_ms(),
            "detections": detections
                .iter()
                .map(|(label, conf)| json!({
                    "label": label,
                    "conf": conf,
                    "bbox": [120.0, 80.0, 420.0, 360.0],
                }))
                .collect::<Vec<_>>(),
        });

        if let Err(e) =
            self.client.publish(&self.topic, QoS::AtMostOnce, false, payload.to_string()).await
        {
            warn!(error = %e, "frame_publish_failed");
        }
    }

    /// Publish a product at `fps` for `dwell_ms`
    async fn hold_in_view(&self, label: &str, conf: f32, fps: u64, dwell_ms: u64) {
        let frame_interval = Duration::from_millis(1000 / fps.max(1));
        let frames = dwell_ms / frame_interval.as_millis().max(1) as u64;

        info!(label = %label, frames = %frames, "sim_hold_in_view");
        for _ in 0..frames {
            self.publish_frame(&[(label, conf)]).await;
            sleep(frame_interval).await;
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();

    let args = Args::parse();

    let client_id = format!("scancart-sim-{}", std::process::id());
    let mut mqttoptions = MqttOptions::new(client_id, &args.mqtt_host, args.mqtt_port);
    mqttoptions.set_keep_alive(Duration::from_secs(30));

    let (client, mut eventloop) = AsyncClient::new(mqttoptions, 64);

    // Drive the eventloop in the background
    tokio::spawn(async move {
        loop {
            if let Err(e) = eventloop.poll().await {
                warn!(error = %e, "sim_mqtt_error");
                sleep(Duration::from_secs(1)).await;
            }
        }
    });

    let publisher = Publisher { client, topic: args.topic.clone() };
    let gap = Duration::from_millis(args.gap_ms);

    info!(
        host = %args.mqtt_host,
        port = %args.mqtt_port,
        topic = %args.topic,
        loops = %args.loops,
        "sim_started"
    );

    for run in 1..=args.loops {
        info!(run = %run, "sim_scenario_start");

        // 1. First product held in view -> new line item
        publisher.hold_in_view("maggi", 0.91, args.fps, args.dwell_ms).await;
        sleep(gap).await;

        // 2. Single-frame flicker -> must never reach the cart
        info!("sim_flicker");
        publisher.publish_frame(&[("lux", 0.88)]).await;
        sleep(gap).await;

        // 3. Second product held in view -> second line item
        publisher.hold_in_view("balaji_wafers_chaatchaska_v2", 0.86, args.fps, args.dwell_ms).await;
        sleep(gap).await;

        // 4. First product again after cooldown -> quantity increment
        publisher.hold_in_view("maggi", 0.93, args.fps, args.dwell_ms).await;
        sleep(gap).await;

        // 5. Weak detections only -> idle indicator after the timeout
        info!("sim_weak_detections");
        for _ in 0..10 {
            publisher.publish_frame(&[("tata_salt", 0.35)]).await;
            sleep(Duration::from_millis(100)).await;
        }
        sleep(Duration::from_secs(3)).await;

        info!(run = %run, "sim_scenario_complete");
    }

    // Let in-flight publishes drain
    sleep(Duration::from_millis(500)).await;
    info!("sim_done");
    Ok(())
}
