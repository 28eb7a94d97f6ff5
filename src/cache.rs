//! Durable per-novel assessment cache.
//!
//! Entries live in the key-value store under `geminiAssessment_{canonical_id}`
//! as JSON. Every operation probes the store first and degrades to a no-op
//! when it is unusable; write failures (including a full store) are logged
//! and swallowed so a fresh result is still shown even if it cannot be kept.

use std::sync::Arc;

use novel_lens_core::legacy::{self, CachedAssessment};
use novel_lens_core::store::{KeyValueStore, StoreError};
use serde::Serialize;
use tracing::{debug, info, warn};

pub const CACHE_PREFIX: &str = "geminiAssessment_";

pub fn cache_key(canonical_id: &str) -> String {
    format!("{}{}", CACHE_PREFIX, canonical_id)
}

/// Outcome of [`AssessmentCache::clear_all`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ClearReport {
    pub available: bool,
    pub cleared: usize,
    pub failed: usize,
}

impl ClearReport {
    pub fn is_success(&self) -> bool {
        self.available && self.failed == 0
    }
}

#[derive(Clone)]
pub struct AssessmentCache {
    store: Arc<dyn KeyValueStore>,
}

impl AssessmentCache {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub async fn is_available(&self) -> bool {
        self.store.probe().await
    }

    /// Read and migrate a cached record.
    ///
    /// Corrupted values and records from before the category format are
    /// reported as not found.
    pub async fn get(&self, canonical_id: &str) -> Option<CachedAssessment> {
        if !self.is_available().await {
            return None;
        }

        let raw = match self.store.get(&cache_key(canonical_id)).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!(canonical_id, error = %e, "error retrieving cached assessment");
                return None;
            }
        };

        let value = match serde_json::from_str(&raw) {
            Ok(v) => v,
            Err(e) => {
                warn!(canonical_id, error = %e, "cached assessment is not valid JSON");
                return None;
            }
        };

        let migrated = legacy::migrate(value);
        if migrated.is_none() {
            debug!(canonical_id, "cached value has an unrecognized structure; ignoring");
        }
        migrated
    }

    /// Store a record. Returns whether it was written.
    pub async fn set(&self, canonical_id: &str, record: &CachedAssessment) -> bool {
        if !self.is_available().await {
            return false;
        }

        let value = match serde_json::to_string(record) {
            Ok(v) => v,
            Err(e) => {
                warn!(canonical_id, error = %e, "failed to serialize assessment");
                return false;
            }
        };

        match self.store.set(&cache_key(canonical_id), &value).await {
            Ok(()) => true,
            Err(StoreError::QuotaExceeded) => {
                warn!(canonical_id, "storage quota exceeded, unable to cache assessment");
                false
            }
            Err(e) => {
                warn!(canonical_id, error = %e, "error caching assessment");
                false
            }
        }
    }

    /// Remove every cached assessment. Settings and other namespaces are
    /// left alone.
    pub async fn clear_all(&self) -> ClearReport {
        if !self.is_available().await {
            return ClearReport::default();
        }

        let keys = match self.store.keys(CACHE_PREFIX).await {
            Ok(keys) => keys,
            Err(e) => {
                warn!(error = %e, "error listing cached assessments");
                return ClearReport {
                    available: true,
                    ..Default::default()
                };
            }
        };

        let mut report = ClearReport {
            available: true,
            ..Default::default()
        };
        for key in keys {
            match self.store.remove(&key).await {
                Ok(()) => report.cleared += 1,
                Err(e) => {
                    warn!(key = %key, error = %e, "error removing cached assessment");
                    report.failed += 1;
                }
            }
        }

        info!(cleared = report.cleared, "cleared cached assessments");
        if report.failed > 0 {
            warn!(failed = report.failed, "errors while clearing cached assessments");
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use novel_lens_core::legacy::normalize;
    use novel_lens_core::models::{Assessment, CategoryRating, Verdict};
    use novel_lens_core::store::memory::MemoryKvStore;

    fn record(verdict: Verdict) -> Assessment {
        Assessment {
            novel_summary: "n".into(),
            review_summary: "r".into(),
            assessment: verdict,
            summary: "s".into(),
            character_development: CategoryRating::Good,
            plot_structure: CategoryRating::Bad,
            world_building: CategoryRating::Unknown,
            themes_and_messages: CategoryRating::Mixed,
            writing_style: CategoryRating::Good,
            available_usernames: vec!["alice".into()],
        }
    }

    #[tokio::test]
    async fn test_round_trip_preserves_ratings() {
        let cache = AssessmentCache::new(Arc::new(MemoryKvStore::new()));
        let original = record(Verdict::Bad);
        assert!(cache.set("42", &normalize(original.clone())).await);

        let back = cache.get("42").await.unwrap();
        assert_eq!(back.assessment.assessment, Verdict::Bad);
        assert_eq!(back.assessment.categories(), original.categories());
        assert_eq!(back.unknown.as_deref(), Some("Mixed"));
    }

    #[tokio::test]
    async fn test_corrupt_and_foreign_values_are_not_found() {
        let store = Arc::new(MemoryKvStore::new());
        store.set(&cache_key("1"), "{oops").await.unwrap();
        store.set(&cache_key("2"), r#"{"summary":"x"}"#).await.unwrap();
        let cache = AssessmentCache::new(store);
        assert!(cache.get("1").await.is_none());
        assert!(cache.get("2").await.is_none());
        assert!(cache.get("3").await.is_none());
    }

    #[tokio::test]
    async fn test_unavailable_store_is_a_no_op() {
        let cache = AssessmentCache::new(Arc::new(MemoryKvStore::unavailable()));
        assert!(!cache.is_available().await);
        assert!(!cache.set("1", &normalize(record(Verdict::Good))).await);
        assert!(cache.get("1").await.is_none());
        assert_eq!(cache.clear_all().await, ClearReport::default());
    }

    #[tokio::test]
    async fn test_quota_failure_is_swallowed() {
        let cache = AssessmentCache::new(Arc::new(MemoryKvStore::with_capacity(1)));
        assert!(cache.set("1", &normalize(record(Verdict::Good))).await);
        assert!(!cache.set("2", &normalize(record(Verdict::Good))).await);
        assert!(cache.get("1").await.is_some());
    }

    #[tokio::test]
    async fn test_clear_all_only_touches_cache_namespace() {
        let store = Arc::new(MemoryKvStore::new());
        store.set("setting.geminiModel", "m").await.unwrap();
        let cache = AssessmentCache::new(store.clone());
        cache.set("1", &normalize(record(Verdict::Good))).await;
        cache.set("2", &normalize(record(Verdict::Mixed))).await;

        let report = cache.clear_all().await;
        assert_eq!(report.cleared, 2);
        assert!(report.is_success());
        assert!(cache.get("1").await.is_none());
        assert_eq!(store.get("setting.geminiModel").await.unwrap().as_deref(), Some("m"));
    }
}
