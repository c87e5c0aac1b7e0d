//! Cart reconciliation - the single writer for the cart document
//!
//! Reconciling a product is a read-then-write on a small shared document:
//! increment the line if the barcode is present, append a quantity-1 line
//! otherwise. Without serialization two near-simultaneous scans of one
//! product can both read quantity N and both write N+1, losing an
//! increment. The document mutex below makes steps read/compare/write one
//! critical section; it is the one correctness-critical lock in the
//! system. Store operations are bounded by a timeout so a dead store
//! surfaces as a failed outcome instead of a wedged worker.

use crate::domain::cart::{CartChange, CartDocument, CartLineItem, ProductRecord};
use crate::domain::types::{Barcode, ScanOutcome};
use crate::io::store::DocumentStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{error, info, warn};

pub struct CartReconciler {
    store: Arc<dyn DocumentStore>,
    /// Serializes all read-modify-write cycles on the cart document
    doc_lock: Mutex<()>,
    op_timeout: Duration,
}

impl CartReconciler {
    pub fn new(store: Arc<dyn DocumentStore>, op_timeout: Duration) -> Self {
        Self { store, doc_lock: Mutex::new(()), op_timeout }
    }

    async fn store_op<T>(
        &self,
        what: &str,
        fut: impl std::future::Future<Output = anyhow::Result<T>>,
    ) -> Result<T, ScanOutcome> {
        match timeout(self.op_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                error!(op = %what, error = %e, "cart_store_error");
                Err(ScanOutcome::Failed(format!("{what}: {e}")))
            }
            Err(_) => {
                error!(op = %what, timeout_ms = %self.op_timeout.as_millis(), "cart_store_timeout");
                Err(ScanOutcome::Failed(format!("{what}: timed out")))
            }
        }
    }

    /// Reconcile one product against the cart document
    ///
    /// Returns the line quantity after the write alongside the outcome.
    pub async fn reconcile(&self, product: &ProductRecord) -> (ScanOutcome, Option<u32>) {
        let _guard = self.doc_lock.lock().await;

        let cart = match self.store_op("get_cart", self.store.get_cart()).await {
            Ok(cart) => cart,
            Err(failed) => return (failed, None),
        };

        match cart {
            None => {
                // First scan of the session: create the document whole
                let mut doc = CartDocument::new();
                doc.apply_add(product);
                if let Err(failed) = self.store_op("put_cart", self.store.put_cart(&doc)).await {
                    return (failed, None);
                }
                info!(barcode = %product.barcode, name = %product.name, "cart_created");
                (ScanOutcome::Created, Some(1))
            }
            Some(mut doc) => match doc.apply_add(product) {
                CartChange::Incremented => {
                    // Full items rewrite keeps the barcode-uniqueness
                    // invariant under our control
                    if let Err(failed) =
                        self.store_op("update_items", self.store.update_items(&doc.items)).await
                    {
                        return (failed, None);
                    }
                    let qty = doc.find(&product.barcode).map(|item| item.quantity);
                    info!(
                        barcode = %product.barcode,
                        name = %product.name,
                        quantity = %qty.unwrap_or(0),
                        "cart_quantity_incremented"
                    );
                    (ScanOutcome::Incremented, qty)
                }
                CartChange::Appended => {
                    let item = doc
                        .items
                        .last()
                        .cloned()
                        .unwrap_or_else(|| CartLineItem::for_product(product));
                    if let Err(failed) =
                        self.store_op("append_item", self.store.append_item(&item)).await
                    {
                        return (failed, None);
                    }
                    info!(barcode = %product.barcode, name = %product.name, "cart_line_added");
                    (ScanOutcome::Created, Some(1))
                }
            },
        }
    }

    /// Adjust a line's quantity by a signed delta (cart-review path)
    ///
    /// Dropping below quantity 1 removes the line; the cart never retains
    /// a zero-quantity line. Unknown barcodes are a no-op.
    pub async fn adjust_quantity(&self, barcode: &Barcode, delta: i64) -> anyhow::Result<()> {
        let _guard = self.doc_lock.lock().await;

        let Some(mut doc) = timeout(self.op_timeout, self.store.get_cart()).await?? else {
            warn!(barcode = %barcode, "cart_adjust_without_document");
            return Ok(());
        };

        if !doc.adjust_quantity(barcode, delta) {
            warn!(barcode = %barcode, "cart_adjust_unknown_barcode");
            return Ok(());
        }

        timeout(self.op_timeout, self.store.update_items(&doc.items)).await??;
        info!(barcode = %barcode, delta = %delta, "cart_quantity_adjusted");
        Ok(())
    }

    /// Reset the cart to an empty items list (checkout / explicit clear)
    pub async fn clear(&self) -> anyhow::Result<()> {
        let _guard = self.doc_lock.lock().await;

        if timeout(self.op_timeout, self.store.get_cart()).await??.is_none() {
            return Ok(());
        }

        timeout(self.op_timeout, self.store.update_items(&[])).await??;
        info!("cart_cleared");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::store::MemoryStore;

    fn product(barcode: &str, name: &str, price: f64) -> ProductRecord {
        ProductRecord { barcode: barcode.into(), name: name.into(), price }
    }

    fn reconciler(store: Arc<MemoryStore>) -> CartReconciler {
        CartReconciler::new(store, Duration::from_millis(500))
    }

    #[tokio::test]
    async fn test_created_then_incremented() {
        let store = Arc::new(MemoryStore::new());
        let rec = reconciler(store.clone());
        let maggi = product("100000001", "maggi", 14.0);

        let (outcome, qty) = rec.reconcile(&maggi).await;
        assert_eq!(outcome, ScanOutcome::Created);
        assert_eq!(qty, Some(1));

        let (outcome, qty) = rec.reconcile(&maggi).await;
        assert_eq!(outcome, ScanOutcome::Incremented);
        assert_eq!(qty, Some(2));

        let cart = store.cart_snapshot().unwrap();
        assert_eq!(cart.items.len(), 1);
        assert_eq!(cart.items[0].quantity, 2);
    }

    #[tokio::test]
    async fn test_two_products_preserve_commit_order() {
        let store = Arc::new(MemoryStore::new());
        let rec = reconciler(store.clone());

        rec.reconcile(&product("b1", "tata_salt", 25.0)).await;
        rec.reconcile(&product("b2", "lux", 40.0)).await;

        let cart = store.cart_snapshot().unwrap();
        let barcodes: Vec<&str> = cart.items.iter().map(|i| i.barcode.as_str()).collect();
        assert_eq!(barcodes, vec!["b1", "b2"]);
    }

    #[tokio::test]
    async fn test_store_failure_yields_failed_outcome() {
        let store = Arc::new(MemoryStore::new());
        let rec = reconciler(store.clone());

        store.set_failing(true);
        let (outcome, qty) = rec.reconcile(&product("b1", "lux", 40.0)).await;
        assert!(matches!(outcome, ScanOutcome::Failed(_)));
        assert_eq!(qty, None);

        // The event was dropped, not queued: a later scan after recovery
        // starts clean
        store.set_failing(false);
        let (outcome, _) = rec.reconcile(&product("b1", "lux", 40.0)).await;
        assert_eq!(outcome, ScanOutcome::Created);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_same_barcode_never_loses_increment() {
        let store = Arc::new(MemoryStore::new());
        let rec = Arc::new(reconciler(store.clone()));
        let maggi = product("100000001", "maggi", 14.0);

        // Cart already holds quantity 1
        rec.reconcile(&maggi).await;

        let a = {
            let rec = rec.clone();
            let p = maggi.clone();
            tokio::spawn(async move { rec.reconcile(&p).await })
        };
        let b = {
            let rec = rec.clone();
            let p = maggi.clone();
            tokio::spawn(async move { rec.reconcile(&p).await })
        };

        let (ra, rb) = (a.await.unwrap(), b.await.unwrap());
        assert_eq!(ra.0, ScanOutcome::Incremented);
        assert_eq!(rb.0, ScanOutcome::Incremented);

        // Single-writer discipline: deterministically 3, never a lost update
        let cart = store.cart_snapshot().unwrap();
        assert_eq!(cart.items[0].quantity, 3);
    }

    #[tokio::test]
    async fn test_adjust_quantity_removes_at_zero() {
        let store = Arc::new(MemoryStore::new());
        let rec = reconciler(store.clone());
        let lux = product("b1", "lux", 40.0);

        rec.reconcile(&lux).await;
        rec.reconcile(&lux).await;

        rec.adjust_quantity(&"b1".into(), -1).await.unwrap();
        assert_eq!(store.cart_snapshot().unwrap().items[0].quantity, 1);

        rec.adjust_quantity(&"b1".into(), -1).await.unwrap();
        assert!(store.cart_snapshot().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_clear_resets_items() {
        let store = Arc::new(MemoryStore::new());
        let rec = reconciler(store.clone());

        rec.reconcile(&product("b1", "lux", 40.0)).await;
        rec.reconcile(&product("b2", "pears", 50.0)).await;

        rec.clear().await.unwrap();
        assert!(store.cart_snapshot().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_clear_without_document_is_noop() {
        let store = Arc::new(MemoryStore::new());
        let rec = reconciler(store.clone());
        rec.clear().await.unwrap();
        assert!(store.cart_snapshot().is_none());
    }
}
