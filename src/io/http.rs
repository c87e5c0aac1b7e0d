//! Prometheus metrics HTTP endpoint
//!
//! Exposes scanner metrics in Prometheus text format at /metrics.
//! Uses hyper for the HTTP server.

use crate::infra::metrics::{Metrics, MetricsSummary, METRICS_BUCKET_BOUNDS, METRICS_NUM_BUCKETS};
use bytes::Bytes;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::fmt::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

/// Prometheus metric type
enum MetricType {
    Counter,
    Gauge,
}

impl MetricType {
    fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
        }
    }
}

/// Write a simple metric (counter or gauge) with site label
fn write_metric(
    output: &mut String,
    name: &str,
    help: &str,
    typ: MetricType,
    site: &str,
    val: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
    let _ = writeln!(output, "{name}{{site=\"{site}\"}} {val}");
}

/// Write a histogram metric with buckets, sum, and count
fn write_histogram(
    output: &mut String,
    name: &str,
    help: &str,
    site: &str,
    buckets: &[u64; METRICS_NUM_BUCKETS],
    avg: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} histogram");

    let mut cumulative = 0u64;
    for (i, &bound) in METRICS_BUCKET_BOUNDS.iter().enumerate() {
        cumulative += buckets[i];
        let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"{bound}\"}} {cumulative}");
    }
    cumulative += buckets[METRICS_NUM_BUCKETS - 1];
    let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"+Inf\"}} {cumulative}");

    let count: u64 = buckets.iter().sum();
    let sum = avg * count;
    let _ = writeln!(output, "{name}_sum{{site=\"{site}\"}} {sum}");
    let _ = writeln!(output, "{name}_count{{site=\"{site}\"}} {count}");
}

/// Format metrics in Prometheus text exposition format
fn format_prometheus_metrics(metrics: &Metrics, site_id: &str) -> String {
    let summary = metrics.report();
    let mut output = String::with_capacity(4096);

    write_pipeline_metrics(&mut output, site_id, &summary);
    write_outcome_metrics(&mut output, site_id, &summary);
    write_latency_metrics(&mut output, site_id, &summary);
    write_queue_metrics(&mut output, site_id, &summary);

    output
}

fn write_pipeline_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "scancart_frames_total",
        "Total detection frames processed",
        MetricType::Counter,
        site,
        summary.frames_total,
    );
    let _ = writeln!(output, "# HELP scancart_frames_per_sec Detection frames per second");
    let _ = writeln!(output, "# TYPE scancart_frames_per_sec gauge");
    let _ =
        writeln!(output, "scancart_frames_per_sec{{site=\"{site}\"}} {:.2}", summary.frames_per_sec);

    write_metric(
        output,
        "scancart_detections_total",
        "Total individual detections seen",
        MetricType::Counter,
        site,
        summary.detections_total,
    );
    write_metric(
        output,
        "scancart_below_threshold_total",
        "Detections rejected below the confidence threshold",
        MetricType::Counter,
        site,
        summary.below_threshold_total,
    );
    write_metric(
        output,
        "scancart_cooldown_suppressed_total",
        "Detections suppressed by an active cooldown window",
        MetricType::Counter,
        site,
        summary.cooldown_suppressed_total,
    );
    write_metric(
        output,
        "scancart_resolution_fallback_total",
        "Labels resolved via the two-token fallback rule",
        MetricType::Counter,
        site,
        summary.resolution_fallback_total,
    );
    write_metric(
        output,
        "scancart_scans_confirmed_total",
        "Scans confirmed past the cooldown gate",
        MetricType::Counter,
        site,
        summary.scans_confirmed_total,
    );
    write_metric(
        output,
        "scancart_flicker_discarded_total",
        "Pending scans discarded as flicker at confirmation",
        MetricType::Counter,
        site,
        summary.flicker_discarded_total,
    );
    write_metric(
        output,
        "scancart_stale_confidence_total",
        "Pending scans discarded by confidence re-validation",
        MetricType::Counter,
        site,
        summary.stale_confidence_total,
    );
    write_metric(
        output,
        "scancart_catalog_miss_total",
        "Confirmed scans with no catalog entry",
        MetricType::Counter,
        site,
        summary.catalog_miss_total,
    );
}

fn write_outcome_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "scancart_lines_created_total",
        "Reconciliations that appended a new line item",
        MetricType::Counter,
        site,
        summary.lines_created_total,
    );
    write_metric(
        output,
        "scancart_lines_incremented_total",
        "Reconciliations that incremented a quantity",
        MetricType::Counter,
        site,
        summary.lines_incremented_total,
    );
    write_metric(
        output,
        "scancart_reconcile_failed_total",
        "Reconciliations that failed at the store",
        MetricType::Counter,
        site,
        summary.reconcile_failed_total,
    );
    write_metric(
        output,
        "scancart_frames_dropped_total",
        "Detection frames dropped on a full ingest channel",
        MetricType::Counter,
        site,
        summary.frames_dropped,
    );
    write_metric(
        output,
        "scancart_scans_dropped_total",
        "Confirmed scans dropped on a full reconcile queue",
        MetricType::Counter,
        site,
        summary.scans_dropped,
    );
}

fn write_latency_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_histogram(
        output,
        "scancart_frame_latency_us",
        "Frame processing latency in microseconds",
        site,
        &summary.frame_lat_buckets,
        summary.frame_lat_avg_us,
    );
    write_metric(
        output,
        "scancart_frame_latency_p99_us",
        "99th percentile frame processing latency",
        MetricType::Gauge,
        site,
        summary.frame_lat_p99_us,
    );

    write_histogram(
        output,
        "scancart_reconcile_latency_us",
        "Reconcile end-to-end latency in microseconds",
        site,
        &summary.reconcile_lat_buckets,
        summary.reconcile_lat_avg_us,
    );
    write_metric(
        output,
        "scancart_reconcile_latency_p99_us",
        "99th percentile reconcile latency",
        MetricType::Gauge,
        site,
        summary.reconcile_lat_p99_us,
    );
}

fn write_queue_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "scancart_event_queue_depth",
        "Current detection channel depth",
        MetricType::Gauge,
        site,
        summary.event_queue_depth,
    );
    write_metric(
        output,
        "scancart_scan_queue_depth",
        "Current reconcile queue depth",
        MetricType::Gauge,
        site,
        summary.scan_queue_depth,
    );
}

/// Handle HTTP requests
async fn handle_request(
    req: Request<hyper::body::Incoming>,
    metrics: Arc<Metrics>,
    site_id: Arc<String>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => {
            let body = format_prometheus_metrics(&metrics, &site_id);
            Ok(Response::builder()
                .status(StatusCode::OK)
                .header("Content-Type", "text/plain; version=0.0.4; charset=utf-8")
                .body(Full::new(Bytes::from(body)))
                .expect("static response should not fail"))
        }
        (&Method::GET, "/health") => Ok(Response::builder()
            .status(StatusCode::OK)
            .body(Full::new(Bytes::from("ok")))
            .expect("static response should not fail")),
        _ => Ok(Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Full::new(Bytes::from("not found")))
            .expect("static response should not fail")),
    }
}

/// Start the metrics HTTP server
pub async fn start_metrics_server(
    port: u16,
    metrics: Arc<Metrics>,
    site_id: String,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    let site_id = Arc::new(site_id);

    info!(port = %port, "metrics_server_started");

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("metrics_server_shutdown");
                    return Ok(());
                }
            }
            accepted = listener.accept() => {
                let (stream, _) = match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        error!(error = %e, "metrics_server_accept_failed");
                        continue;
                    }
                };

                let io = TokioIo::new(stream);
                let metrics = metrics.clone();
                let site_id = site_id.clone();

                tokio::spawn(async move {
                    let service = service_fn(move |req| {
                        handle_request(req, metrics.clone(), site_id.clone())
                    });
                    if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                        error!(error = %e, "metrics_server_connection_error");
                    }
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_prometheus_metrics() {
        let metrics = Metrics::new();
        metrics.record_frame_processed(150);
        metrics.record_detection();
        metrics.record_scan_confirmed();
        metrics.record_line_created();

        let output = format_prometheus_metrics(&metrics, "cart-01");

        assert!(output.contains("scancart_frames_total{site=\"cart-01\"} 1"));
        assert!(output.contains("scancart_scans_confirmed_total{site=\"cart-01\"} 1"));
        assert!(output.contains("scancart_lines_created_total{site=\"cart-01\"} 1"));
        assert!(output.contains("scancart_frame_latency_us_bucket{site=\"cart-01\",le=\"+Inf\"} 1"));
        assert!(output.contains("# TYPE scancart_frame_latency_us histogram"));
    }

    #[test]
    fn test_histogram_cumulative_buckets() {
        let mut output = String::new();
        let mut buckets = [0u64; METRICS_NUM_BUCKETS];
        buckets[0] = 2;
        buckets[1] = 3;
        write_histogram(&mut output, "test_metric", "help", "s", &buckets, 10);

        assert!(output.contains("test_metric_bucket{site=\"s\",le=\"100\"} 2"));
        assert!(output.contains("test_metric_bucket{site=\"s\",le=\"200\"} 5"));
        assert!(output.contains("test_metric_bucket{site=\"s\",le=\"+Inf\"} 5"));
        assert!(output.contains("test_metric_count{site=\"s\"} 5"));
    }
}
