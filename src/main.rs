//! scancart - smart-cart product scanner daemon
//!
//! Turns a stream of per-frame object detections from the camera process
//! into updates on the shared cart document, suppressing duplicate
//! additions while an object stays in view. Runs on Raspberry Pi class
//! hardware.
//!
//! Module structure:
//! - `domain/` - Core business types (detections, products, cart document)
//! - `io/` - External interfaces (MQTT ingest, document store, feedback)
//! - `services/` - Business logic (Scanner, CooldownGate, CartReconciler)
//! - `infra/` - Infrastructure (Config, Metrics, Broker)

use clap::Parser;
use scancart::infra::{Config, Metrics};
use scancart::io::{create_feedback_channel, FeedbackPublisher, HttpStore};
use scancart::services::{create_scan_worker, CartReconciler, ProductCache, Scanner};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::info;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// scancart - camera detections to shared cart updates
#[derive(Parser, Debug)]
#[command(name = "scancart", version, about)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, default_value = "config/dev.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured logging with configurable level via RUST_LOG env var
    // Default: INFO, use RUST_LOG=debug for full event visibility
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!(build = %env!("GIT_HASH"), "scancart starting");

    let args = Args::parse();
    let config = Config::load_from_path(&args.config);

    // Start embedded MQTT broker so the camera process can publish locally
    if config.broker_enabled() {
        scancart::infra::broker::start_embedded_broker(&config);
    }

    info!(
        config_file = %config.config_file(),
        mqtt_host = %config.mqtt_host(),
        mqtt_port = %config.mqtt_port(),
        mqtt_topic = %config.mqtt_topic(),
        store_url = %config.store_url(),
        cart_id = %config.store_cart_id(),
        confidence_threshold = %config.confidence_threshold(),
        cooldown_window_ms = %config.cooldown_window_ms(),
        confirm_delay_ms = %config.confirm_delay_ms(),
        catalog_keys = %config.catalog_keys().len(),
        metrics_http_port = %config.metrics_http_port(),
        "config_loaded"
    );

    // Create shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Shared components
    let metrics = Arc::new(Metrics::new());
    let store = Arc::new(HttpStore::new(
        config.store_url(),
        config.store_cart_id(),
        Duration::from_millis(config.store_timeout_ms()),
    )?);
    let catalog = Arc::new(ProductCache::new(store.clone()));
    let reconciler = Arc::new(CartReconciler::new(
        store,
        Duration::from_millis(config.store_timeout_ms()),
    ));

    // Feedback channel and MQTT publisher (if enabled)
    let feedback_sender = if config.feedback_enabled() {
        let (feedback_sender, feedback_rx) =
            create_feedback_channel(1000, config.site_id().to_string());

        let publisher = FeedbackPublisher::new(&config, feedback_rx);
        let publisher_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            publisher.run(publisher_shutdown).await;
        });

        Some(feedback_sender)
    } else {
        None
    };

    // Scan worker (serialized reconcile queue)
    let (job_tx, scan_worker) = create_scan_worker(
        catalog,
        reconciler,
        metrics.clone(),
        feedback_sender.clone(),
        config.scan_queue(),
    );
    tokio::spawn(scan_worker.run());

    // Detection frame channel (bounded for backpressure)
    let (frame_tx, frame_rx) = mpsc::channel(config.event_queue());

    // Start MQTT detection ingest
    let ingest_config = config.clone();
    let ingest_metrics = metrics.clone();
    let ingest_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        if let Err(e) = scancart::io::detections::start_detection_client(
            &ingest_config,
            frame_tx,
            ingest_metrics,
            ingest_shutdown,
        )
        .await
        {
            tracing::error!(error = %e, "detection client error");
        }
    });

    // Start Prometheus metrics HTTP server (if port > 0)
    let metrics_http_port = config.metrics_http_port();
    if metrics_http_port > 0 {
        let http_metrics = metrics.clone();
        let http_site = config.site_id().to_string();
        let http_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = scancart::io::http::start_metrics_server(
                metrics_http_port,
                http_metrics,
                http_site,
                http_shutdown,
            )
            .await
            {
                tracing::error!(error = %e, "metrics server error");
            }
        });
    }

    // Start metrics reporter (lock-free reads with full summary)
    let reporter_metrics = metrics.clone();
    let reporter_feedback = feedback_sender.clone();
    let metrics_interval = config.metrics_interval_secs();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(metrics_interval));
        loop {
            interval.tick().await;
            let summary = reporter_metrics.report();
            summary.log();
            if let Some(ref sender) = reporter_feedback {
                sender.send_metrics(summary);
            }
        }
    });

    // Start scanner (main event processing loop)
    let mut scanner = Scanner::new(&config, job_tx, feedback_sender, metrics);
    info!("scanner_started");

    // Handle shutdown on Ctrl+C
    let shutdown_signal = shutdown_tx;
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_signal.send(true);
    });

    // Run scanner - consumes frames until the channel closes
    scanner.run(frame_rx).await;

    info!("scancart shutdown complete");
    Ok(())
}
