//! Class resolution - detector labels to catalog keys
//!
//! The detector's class space is finer-grained than the catalog (e.g.
//! per-variant labels for one product family), so labels are matched by
//! longest known key prefix. Longest-first order is required: some keys
//! are prefixes of others, and evaluating shorter keys first would
//! misclassify the finer-grained labels.

use crate::domain::types::CatalogKey;
use rustc_hash::FxHashMap;
use tracing::debug;

/// How a label was resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Matched a known catalog key by prefix
    Matched,
    /// No known key matched; fell back to the first two label tokens
    Fallback,
}

/// Resolves detector class labels to catalog keys
///
/// Resolution is deterministic for a given label, so results are memoized
/// per label; the detector's label space is fixed after initialization.
pub struct ClassResolver {
    /// Known catalog keys sorted by descending length
    keys: Vec<String>,
    /// Memoized label -> (key, resolution) mapping
    cache: FxHashMap<String, (CatalogKey, Resolution)>,
}

impl ClassResolver {
    pub fn new(catalog_keys: &[String]) -> Self {
        let mut keys: Vec<String> = catalog_keys.to_vec();
        // Longest first so that the most specific key wins
        keys.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        Self { keys, cache: FxHashMap::default() }
    }

    /// Resolve a detector label to a catalog key. Total: always yields a key.
    pub fn resolve(&mut self, label: &str) -> (CatalogKey, Resolution) {
        if let Some(cached) = self.cache.get(label) {
            return cached.clone();
        }

        let result = match self.keys.iter().find(|key| label.starts_with(key.as_str())) {
            Some(key) => (CatalogKey(key.clone()), Resolution::Matched),
            None => {
                let fallback = Self::fallback_key(label);
                debug!(label = %label, key = %fallback, "class_resolution_fallback");
                (CatalogKey(fallback), Resolution::Fallback)
            }
        };

        self.cache.insert(label.to_string(), result.clone());
        result
    }

    /// First two underscore-delimited tokens of the label, rejoined
    fn fallback_key(label: &str) -> String {
        let mut parts = label.splitn(3, '_');
        match (parts.next(), parts.next()) {
            (Some(a), Some(b)) => format!("{}_{}", a, b),
            (Some(a), None) => a.to_string(),
            _ => label.to_string(),
        }
    }

    /// Number of memoized labels
    #[cfg(test)]
    pub fn cached_count(&self) -> usize {
        self.cache.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> ClassResolver {
        ClassResolver::new(&[
            "balaji_wafers".to_string(),
            "balaji_wafers_chaatchaska".to_string(),
            "maggi".to_string(),
            "lux".to_string(),
        ])
    }

    #[test]
    fn test_exact_match() {
        let mut r = resolver();
        let (key, res) = r.resolve("maggi");
        assert_eq!(key.as_str(), "maggi");
        assert_eq!(res, Resolution::Matched);
    }

    #[test]
    fn test_prefix_match() {
        let mut r = resolver();
        let (key, res) = r.resolve("maggi_masala_70g");
        assert_eq!(key.as_str(), "maggi");
        assert_eq!(res, Resolution::Matched);
    }

    #[test]
    fn test_longest_match_priority() {
        let mut r = resolver();
        // Both "balaji_wafers" and "balaji_wafers_chaatchaska" are prefixes;
        // the longer registered key must win
        let (key, res) = r.resolve("balaji_wafers_chaatchaska_v2");
        assert_eq!(key.as_str(), "balaji_wafers_chaatchaska");
        assert_eq!(res, Resolution::Matched);

        // The shorter key still matches its own family
        let (key, _) = r.resolve("balaji_wafers_tomatotwist");
        assert_eq!(key.as_str(), "balaji_wafers");
    }

    #[test]
    fn test_fallback_two_tokens() {
        let mut r = resolver();
        let (key, res) = r.resolve("parle_g_original_pack");
        assert_eq!(key.as_str(), "parle_g");
        assert_eq!(res, Resolution::Fallback);
    }

    #[test]
    fn test_fallback_single_token() {
        let mut r = resolver();
        let (key, res) = r.resolve("oreo");
        assert_eq!(key.as_str(), "oreo");
        assert_eq!(res, Resolution::Fallback);
    }

    #[test]
    fn test_resolution_is_deterministic_and_cached() {
        let mut r = resolver();
        let first = r.resolve("balaji_wafers_chaatchaska_v2");
        let second = r.resolve("balaji_wafers_chaatchaska_v2");
        assert_eq!(first, second);
        assert_eq!(r.cached_count(), 1);
    }
}
