//! End-to-end engine tests over the in-memory store
//!
//! Drives the scanner -> cooldown -> worker -> reconciler pipeline with
//! synthetic frames and explicit timestamps, then asserts on the cart
//! document the store ends up holding.

use scancart::domain::cart::ProductRecord;
use scancart::domain::types::{Detection, DetectionFrame};
use scancart::infra::{Config, Metrics};
use scancart::io::store::{DocumentStore, MemoryStore};
use scancart::services::{create_scan_worker, CartReconciler, ProductCache, Scanner};
use smallvec::smallvec;
use std::sync::Arc;
use std::time::{Duration, Instant};

const MS: Duration = Duration::from_millis(1);

fn frame(label: &str, conf: f32) -> DetectionFrame {
    DetectionFrame {
        ts: 0,
        detections: smallvec![Detection { label: label.to_string(), conf, bbox: [0.0; 4] }],
    }
}

async fn seed_store() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    for (barcode, name, price) in [
        ("100000001", "maggi", 14.0),
        ("100000002", "lux", 40.0),
        ("100000003", "balaji_wafers_chaatchaska", 30.0),
    ] {
        store
            .put_product(&ProductRecord { barcode: barcode.into(), name: name.into(), price })
            .await
            .unwrap();
    }
    store
}

struct Pipeline {
    scanner: Scanner,
    worker: tokio::task::JoinHandle<()>,
    store: Arc<MemoryStore>,
}

async fn pipeline() -> Pipeline {
    let store = seed_store().await;
    let config = Config::default();
    let metrics = Arc::new(Metrics::new());

    let catalog = Arc::new(ProductCache::new(store.clone()));
    let reconciler = Arc::new(CartReconciler::new(store.clone(), Duration::from_millis(500)));

    let (job_tx, worker) =
        create_scan_worker(catalog, reconciler, metrics.clone(), None, 16);
    let worker = tokio::spawn(worker.run());

    let scanner = Scanner::new(&config, job_tx, None, metrics);
    Pipeline { scanner, worker, store }
}

/// Hold a label in view at ~15 fps for `dwell_ms`, then run one tick
fn hold_in_view(scanner: &mut Scanner, label: &str, conf: f32, t0: Instant, dwell_ms: u32) {
    let mut offset = 0u32;
    while offset < dwell_ms {
        scanner.process_frame(frame(label, conf), t0 + offset * MS);
        offset += 66;
    }
    scanner.tick(t0 + dwell_ms * MS);
}

async fn drain(pipeline: Pipeline) -> Arc<MemoryStore> {
    let Pipeline { scanner, worker, store } = pipeline;
    // Dropping the scanner closes the job channel; the worker then drains
    // the queue and exits
    drop(scanner);
    worker.await.unwrap();
    store
}

#[tokio::test]
async fn test_sustained_scan_creates_line_item() {
    let mut p = pipeline().await;
    let t0 = Instant::now();

    hold_in_view(&mut p.scanner, "maggi_masala_70g", 0.9, t0, 1200);

    let store = drain(p).await;
    let cart = store.cart_snapshot().unwrap();
    assert_eq!(cart.items.len(), 1);
    assert_eq!(cart.items[0].barcode.as_str(), "100000001");
    assert_eq!(cart.items[0].quantity, 1);
}

#[tokio::test]
async fn test_rescan_after_cooldown_increments() {
    let mut p = pipeline().await;
    let t0 = Instant::now();

    hold_in_view(&mut p.scanner, "maggi", 0.9, t0, 1200);
    // Product leaves the frame, comes back well after the cooldown window
    let t1 = t0 + 4000 * MS;
    hold_in_view(&mut p.scanner, "maggi", 0.9, t1, 1200);

    let store = drain(p).await;
    let cart = store.cart_snapshot().unwrap();
    assert_eq!(cart.items.len(), 1);
    assert_eq!(cart.items[0].quantity, 2);
}

#[tokio::test]
async fn test_two_products_two_lines_in_commit_order() {
    let mut p = pipeline().await;
    let t0 = Instant::now();

    hold_in_view(&mut p.scanner, "maggi", 0.9, t0, 1200);
    let t1 = t0 + 4000 * MS;
    hold_in_view(&mut p.scanner, "lux", 0.85, t1, 1200);

    let store = drain(p).await;
    let cart = store.cart_snapshot().unwrap();
    let barcodes: Vec<&str> = cart.items.iter().map(|i| i.barcode.as_str()).collect();
    assert_eq!(barcodes, vec!["100000001", "100000002"]);
}

#[tokio::test]
async fn test_longest_prefix_resolution_reaches_right_product() {
    let mut p = pipeline().await;
    let t0 = Instant::now();

    // The detector label carries a variant suffix; the longest registered
    // key must win the resolution
    hold_in_view(&mut p.scanner, "balaji_wafers_chaatchaska_v2", 0.9, t0, 1200);

    let store = drain(p).await;
    let cart = store.cart_snapshot().unwrap();
    assert_eq!(cart.items.len(), 1);
    assert_eq!(cart.items[0].name.as_str(), "balaji_wafers_chaatchaska");
}

#[tokio::test]
async fn test_below_threshold_never_touches_cart() {
    let mut p = pipeline().await;
    let t0 = Instant::now();

    hold_in_view(&mut p.scanner, "maggi", 0.45, t0, 2000);

    let store = drain(p).await;
    assert!(store.cart_snapshot().is_none());
}

#[tokio::test]
async fn test_flicker_never_touches_cart() {
    let mut p = pipeline().await;
    let t0 = Instant::now();

    // One frame only, then gone
    p.scanner.process_frame(frame("lux", 0.9), t0);
    p.scanner.tick(t0 + 1500 * MS);

    let store = drain(p).await;
    assert!(store.cart_snapshot().is_none());
}

#[tokio::test]
async fn test_unknown_product_is_dropped_silently() {
    let mut p = pipeline().await;
    let t0 = Instant::now();

    // Resolves via fallback to a key with no catalog entry
    hold_in_view(&mut p.scanner, "parle_g_original", 0.9, t0, 1200);

    let store = drain(p).await;
    assert!(store.cart_snapshot().is_none());
}

#[tokio::test]
async fn test_store_outage_drops_event_then_recovers() {
    let mut p = pipeline().await;
    let t0 = Instant::now();
    let store = p.store.clone();

    // First scan lands normally (and memoizes the catalog entry)
    hold_in_view(&mut p.scanner, "maggi", 0.9, t0, 1200);
    tokio::time::sleep(Duration::from_millis(200)).await;

    store.set_failing(true);
    let t1 = t0 + 4000 * MS;
    hold_in_view(&mut p.scanner, "maggi", 0.9, t1, 1200);

    // Give the worker a moment to hit the failing store, then recover
    tokio::time::sleep(Duration::from_millis(200)).await;
    store.set_failing(false);

    let t2 = t1 + 4000 * MS;
    hold_in_view(&mut p.scanner, "maggi", 0.9, t2, 1200);

    let store = drain(p).await;
    let cart = store.cart_snapshot().unwrap();
    // First scan created the line, outage scan was dropped (no retry),
    // third scan incremented: quantity 2, not 3
    assert_eq!(cart.items.len(), 1);
    assert_eq!(cart.items[0].quantity, 2);
}
