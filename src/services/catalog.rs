//! Product cache - memoized catalog lookups
//!
//! Avoids a remote read per confirmed scan. Exactly one store lookup is
//! issued per key; both hits and definitive not-found results are
//! memoized. Store errors are NOT memoized - a later scan retries the
//! lookup. There is no in-process eviction; a restart is the only flush
//! (the catalog is read-mostly for the session).

use crate::domain::cart::ProductRecord;
use crate::domain::types::CatalogKey;
use crate::io::store::DocumentStore;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use tracing::{debug, info};

pub struct ProductCache {
    store: Arc<dyn DocumentStore>,
    /// key -> Some(product) or definitive not-found
    cache: parking_lot::Mutex<FxHashMap<String, Option<ProductRecord>>>,
    /// Serializes insert-on-miss; reads stay lock-free of the store
    miss_lock: tokio::sync::Mutex<()>,
}

impl ProductCache {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            cache: parking_lot::Mutex::new(FxHashMap::default()),
            miss_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Look up a product by catalog key, memoizing the result
    pub async fn get(&self, key: &CatalogKey) -> anyhow::Result<Option<ProductRecord>> {
        if let Some(cached) = self.cache.lock().get(key.as_str()).cloned() {
            return Ok(cached);
        }

        let _guard = self.miss_lock.lock().await;

        // Re-check: another task may have populated the entry while we
        // waited for the miss lock
        if let Some(cached) = self.cache.lock().get(key.as_str()).cloned() {
            return Ok(cached);
        }

        let fetched = self.store.get_product(key).await?;
        match fetched {
            Some(ref product) => {
                info!(key = %key, barcode = %product.barcode, "catalog_lookup_hit");
            }
            None => {
                debug!(key = %key, "catalog_lookup_not_found");
            }
        }

        self.cache.lock().insert(key.as_str().to_string(), fetched.clone());
        Ok(fetched)
    }

    /// Number of memoized keys (hits and not-founds)
    pub fn cached_count(&self) -> usize {
        self.cache.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::store::MemoryStore;

    fn product(barcode: &str, name: &str, price: f64) -> ProductRecord {
        ProductRecord { barcode: barcode.into(), name: name.into(), price }
    }

    #[tokio::test]
    async fn test_hit_is_memoized() {
        let store = Arc::new(MemoryStore::new());
        store.put_product(&product("100000001", "maggi", 14.0)).await.unwrap();

        let cache = ProductCache::new(store.clone());
        let first = cache.get(&"maggi".into()).await.unwrap().unwrap();
        assert_eq!(first.price, 14.0);

        // Remote goes away; the memoized entry still answers
        store.set_failing(true);
        let second = cache.get(&"maggi".into()).await.unwrap().unwrap();
        assert_eq!(second.barcode.as_str(), "100000001");
    }

    #[tokio::test]
    async fn test_not_found_is_memoized() {
        let store = Arc::new(MemoryStore::new());
        let cache = ProductCache::new(store.clone());

        assert!(cache.get(&"unknown_thing".into()).await.unwrap().is_none());
        assert_eq!(cache.cached_count(), 1);

        // The definitive not-found is served from cache, no remote retry
        store.set_failing(true);
        assert!(cache.get(&"unknown_thing".into()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_store_error_is_not_memoized() {
        let store = Arc::new(MemoryStore::new());
        store.put_product(&product("100000002", "lux", 40.0)).await.unwrap();

        let cache = ProductCache::new(store.clone());

        store.set_failing(true);
        assert!(cache.get(&"lux".into()).await.is_err());
        assert_eq!(cache.cached_count(), 0);

        // Store recovers; the next lookup succeeds and memoizes
        store.set_failing(false);
        assert!(cache.get(&"lux".into()).await.unwrap().is_some());
        assert_eq!(cache.cached_count(), 1);
    }
}
