//! Scan worker - processes confirmed scans off the hot path
//!
//! This worker decouples reconciliation from the scanner loop to prevent
//! store I/O from blocking frame processing. The scanner enqueues confirmed
//! scans via an mpsc channel; the worker resolves the product and performs
//! the cart write. Because a single worker drains the queue, scans reach the
//! reconciler one at a time - the serialized update queue the cart document
//! requires.

use crate::domain::types::{ConfirmedScan, ScanOutcome};
use crate::infra::metrics::Metrics;
use crate::io::feedback::{indicator_for_outcome, FeedbackSender};
use crate::services::catalog::ProductCache;
use crate::services::reconciler::CartReconciler;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// A confirmed scan to be processed by the worker
#[derive(Debug)]
pub struct ScanJob {
    pub scan: ConfirmedScan,
    /// UUIDv7 scan id, assigned at confirmation
    pub sid: String,
    /// When the job was enqueued (for queue delay measurement)
    pub enqueued_at: Instant,
}

/// Worker that resolves and reconciles confirmed scans
pub struct ScanWorker {
    catalog: Arc<ProductCache>,
    reconciler: Arc<CartReconciler>,
    metrics: Arc<Metrics>,
    feedback: Option<FeedbackSender>,
    job_rx: mpsc::Receiver<ScanJob>,
}

impl ScanWorker {
    pub fn new(
        catalog: Arc<ProductCache>,
        reconciler: Arc<CartReconciler>,
        metrics: Arc<Metrics>,
        feedback: Option<FeedbackSender>,
        job_rx: mpsc::Receiver<ScanJob>,
    ) -> Self {
        Self { catalog, reconciler, metrics, feedback, job_rx }
    }

    /// Run the worker, processing scans until the channel closes
    pub async fn run(mut self) {
        info!("scan_worker_started");

        while let Some(job) = self.job_rx.recv().await {
            self.process_job(job).await;
        }

        info!("scan_worker_stopped");
    }

    async fn process_job(&self, job: ScanJob) {
        let ScanJob { scan, sid, enqueued_at } = job;

        let product = match self.catalog.get(&scan.key).await {
            Ok(Some(product)) => product,
            Ok(None) => {
                // Definitive catalog miss: drop silently, no cart mutation
                self.metrics.record_catalog_miss();
                debug!(sid = %sid, key = %scan.key, "scan_dropped_catalog_miss");
                return;
            }
            Err(e) => {
                self.metrics.record_reconcile_failed();
                warn!(sid = %sid, key = %scan.key, error = %e, "catalog_lookup_failed");
                return;
            }
        };

        let (outcome, quantity) = self.reconciler.reconcile(&product).await;
        let latency_us = enqueued_at.elapsed().as_micros() as u64;
        self.metrics.record_reconcile_latency(latency_us);

        match outcome {
            ScanOutcome::Created => self.metrics.record_line_created(),
            ScanOutcome::Incremented => self.metrics.record_line_incremented(),
            ScanOutcome::Failed(_) => self.metrics.record_reconcile_failed(),
        }

        info!(
            sid = %sid,
            key = %scan.key,
            barcode = %product.barcode,
            outcome = %outcome.as_str(),
            quantity = ?quantity,
            latency_us = %latency_us,
            "scan_reconciled"
        );

        if let Some(ref feedback) = self.feedback {
            feedback.send_scan(
                &sid,
                &scan.key,
                Some(&product.barcode),
                scan.confidence,
                &outcome,
                quantity,
            );
            if let Some(signal) = indicator_for_outcome(&outcome) {
                feedback.send_indicator(signal, Some(&scan.key));
            }
        }
    }
}

/// Create a scan job channel and worker
///
/// Returns the sender (for the scanner) and the worker (to be spawned).
pub fn create_scan_worker(
    catalog: Arc<ProductCache>,
    reconciler: Arc<CartReconciler>,
    metrics: Arc<Metrics>,
    feedback: Option<FeedbackSender>,
    buffer_size: usize,
) -> (mpsc::Sender<ScanJob>, ScanWorker) {
    let (job_tx, job_rx) = mpsc::channel(buffer_size);
    let worker = ScanWorker::new(catalog, reconciler, metrics, feedback, job_rx);
    (job_tx, worker)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::cart::ProductRecord;
    use crate::domain::types::new_uuid_v7;
    use crate::io::store::{DocumentStore, MemoryStore};
    use std::time::Duration;

    fn job(key: &str) -> ScanJob {
        ScanJob {
            scan: ConfirmedScan { key: key.into(), confidence: 0.9 },
            sid: new_uuid_v7(),
            enqueued_at: Instant::now(),
        }
    }

    async fn setup() -> (Arc<MemoryStore>, mpsc::Sender<ScanJob>, tokio::task::JoinHandle<()>) {
        let store = Arc::new(MemoryStore::new());
        store
            .put_product(&ProductRecord {
                barcode: "100000001".into(),
                name: "maggi".into(),
                price: 14.0,
            })
            .await
            .unwrap();

        let catalog = Arc::new(ProductCache::new(store.clone()));
        let reconciler =
            Arc::new(CartReconciler::new(store.clone(), Duration::from_millis(500)));
        let metrics = Arc::new(Metrics::new());
        let (job_tx, worker) = create_scan_worker(catalog, reconciler, metrics, None, 16);
        let handle = tokio::spawn(worker.run());
        (store, job_tx, handle)
    }

    #[tokio::test]
    async fn test_worker_reconciles_known_product() {
        let (store, job_tx, handle) = setup().await;

        job_tx.send(job("maggi")).await.unwrap();
        job_tx.send(job("maggi")).await.unwrap();
        drop(job_tx);
        handle.await.unwrap();

        let cart = store.cart_snapshot().unwrap();
        assert_eq!(cart.items.len(), 1);
        assert_eq!(cart.items[0].quantity, 2);
    }

    #[tokio::test]
    async fn test_worker_drops_catalog_miss() {
        let (store, job_tx, handle) = setup().await;

        job_tx.send(job("unknown_product")).await.unwrap();
        drop(job_tx);
        handle.await.unwrap();

        // No cart mutation for an unknown key
        assert!(store.cart_snapshot().is_none());
    }
}
