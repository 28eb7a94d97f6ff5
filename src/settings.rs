//! Runtime settings: API key, model name, debug flag, batch limit.
//!
//! Values are layered as config defaults, then overrides persisted in the
//! key-value store under the `setting.` namespace, then `GEMINI_API_KEY` for
//! the key when nothing was persisted. Setters update the in-memory value
//! first and persist best-effort: a storage fault is logged and the new
//! value still applies for the rest of the process.

use std::sync::{Arc, RwLock};

use novel_lens_core::store::KeyValueStore;
use tracing::{debug, warn};

use crate::config::{Config, MAX_BATCH_LIMIT};

const KEY_API_KEY: &str = "setting.geminiApiKey";
const KEY_MODEL: &str = "setting.geminiModel";
const KEY_DEBUG: &str = "setting.debugLoggingEnabled";
const KEY_BATCH_LIMIT: &str = "setting.batchLimit";

pub const API_KEY_ENV: &str = "GEMINI_API_KEY";

/// Model names offered to the user. Anything else is accepted with a warning.
pub const KNOWN_MODELS: &[&str] = &[
    "gemini-2.5-pro",
    "gemini-flash-latest",
    "gemini-flash-lite-latest",
    "gemini-2.5-flash",
    "gemini-2.5-flash-lite",
];

#[derive(Debug, Clone, PartialEq)]
struct Values {
    api_key: String,
    model: String,
    debug: bool,
    batch_limit: usize,
}

pub struct Settings {
    store: Arc<dyn KeyValueStore>,
    values: RwLock<Values>,
}

impl Settings {
    /// Load settings, consulting `GEMINI_API_KEY` for the key.
    pub async fn load(store: Arc<dyn KeyValueStore>, config: &Config) -> Self {
        Self::load_with_env(store, config, std::env::var(API_KEY_ENV).ok()).await
    }

    pub async fn load_with_env(
        store: Arc<dyn KeyValueStore>,
        config: &Config,
        env_key: Option<String>,
    ) -> Self {
        let mut values = Values {
            api_key: String::new(),
            model: config.gemini.model.clone(),
            debug: false,
            batch_limit: config.batch.limit,
        };

        if store.probe().await {
            if let Some(v) = read(store.as_ref(), KEY_API_KEY).await {
                values.api_key = v;
            }
            if let Some(v) = read(store.as_ref(), KEY_MODEL).await.filter(|v| !v.is_empty()) {
                values.model = v;
            }
            if let Some(v) = read(store.as_ref(), KEY_DEBUG).await {
                values.debug = v == "true";
            }
            if let Some(n) = read(store.as_ref(), KEY_BATCH_LIMIT)
                .await
                .and_then(|v| v.parse::<usize>().ok())
            {
                values.batch_limit = clamp_limit(n);
            }
        } else {
            warn!("settings store unavailable; using configuration defaults");
        }

        if values.api_key.is_empty() {
            if let Some(env) = env_key.filter(|k| !k.trim().is_empty()) {
                values.api_key = env.trim().to_string();
            }
        }

        debug!(
            model = %values.model,
            batch_limit = values.batch_limit,
            api_key_set = !values.api_key.is_empty(),
            "settings loaded"
        );
        Self {
            store,
            values: RwLock::new(values),
        }
    }

    fn snapshot(&self) -> Values {
        match self.values.read() {
            Ok(v) => v.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn update(&self, f: impl FnOnce(&mut Values)) {
        match self.values.write() {
            Ok(mut v) => f(&mut v),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }

    /// The configured API key, if any.
    pub fn api_key(&self) -> Option<String> {
        Some(self.snapshot().api_key).filter(|k| !k.is_empty())
    }

    pub async fn set_api_key(&self, key: &str) {
        let key = key.trim().to_string();
        self.update(|v| v.api_key = key.clone());
        persist(self.store.as_ref(), KEY_API_KEY, &key).await;
    }

    pub fn model(&self) -> String {
        self.snapshot().model
    }

    pub async fn set_model(&self, model: &str) {
        if !KNOWN_MODELS.contains(&model) {
            warn!(model, "model is not in the known list; using it anyway");
        }
        let model = model.to_string();
        self.update(|v| v.model = model.clone());
        persist(self.store.as_ref(), KEY_MODEL, &model).await;
    }

    pub fn debug(&self) -> bool {
        self.snapshot().debug
    }

    pub async fn set_debug(&self, enabled: bool) {
        self.update(|v| v.debug = enabled);
        persist(self.store.as_ref(), KEY_DEBUG, if enabled { "true" } else { "false" }).await;
    }

    pub fn batch_limit(&self) -> usize {
        self.snapshot().batch_limit
    }

    /// Set the batch limit, clamped to `1..=MAX_BATCH_LIMIT`. Returns the
    /// value actually applied.
    pub async fn set_batch_limit(&self, limit: usize) -> usize {
        let limit = clamp_limit(limit);
        self.update(|v| v.batch_limit = limit);
        persist(self.store.as_ref(), KEY_BATCH_LIMIT, &limit.to_string()).await;
        limit
    }

    /// Change the batch limit for this process only.
    pub fn override_batch_limit(&self, limit: usize) -> usize {
        let limit = clamp_limit(limit);
        self.update(|v| v.batch_limit = limit);
        limit
    }
}

fn clamp_limit(n: usize) -> usize {
    n.clamp(1, MAX_BATCH_LIMIT)
}

async fn read(store: &dyn KeyValueStore, key: &str) -> Option<String> {
    match store.get(key).await {
        Ok(v) => v,
        Err(e) => {
            warn!(key, error = %e, "failed to read setting");
            None
        }
    }
}

async fn persist(store: &dyn KeyValueStore, key: &str, value: &str) {
    if let Err(e) = store.set(key, value).await {
        warn!(key, error = %e, "failed to persist setting");
    }
}

/// Mask an API key for display, keeping only the last four characters.
pub fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 4 {
        return "*".repeat(chars.len());
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}{}", "*".repeat(chars.len() - 4), tail)
}

#[cfg(test)]
mod tests {
    use super::*;
    use novel_lens_core::store::memory::MemoryKvStore;

    #[tokio::test]
    async fn test_defaults_then_env_key() {
        let store = Arc::new(MemoryKvStore::new());
        let settings =
            Settings::load_with_env(store, &Config::minimal(), Some("env-key".into())).await;
        assert_eq!(settings.api_key().as_deref(), Some("env-key"));
        assert_eq!(settings.model(), "gemini-2.5-flash");
        assert_eq!(settings.batch_limit(), 1);
        assert!(!settings.debug());
    }

    #[tokio::test]
    async fn test_persisted_values_win_over_env() {
        let store = Arc::new(MemoryKvStore::new());
        let first = Settings::load_with_env(store.clone(), &Config::minimal(), None).await;
        assert_eq!(first.api_key(), None);
        first.set_api_key(" stored-key ").await;
        first.set_model("gemini-2.5-pro").await;
        first.set_debug(true).await;
        assert_eq!(first.set_batch_limit(99).await, MAX_BATCH_LIMIT);

        let second =
            Settings::load_with_env(store, &Config::minimal(), Some("env-key".into())).await;
        assert_eq!(second.api_key().as_deref(), Some("stored-key"));
        assert_eq!(second.model(), "gemini-2.5-pro");
        assert!(second.debug());
        assert_eq!(second.batch_limit(), MAX_BATCH_LIMIT);
    }

    #[tokio::test]
    async fn test_unavailable_store_keeps_in_memory_values() {
        let store = Arc::new(MemoryKvStore::unavailable());
        let settings = Settings::load_with_env(store, &Config::minimal(), None).await;
        settings.set_api_key("abc").await;
        assert_eq!(settings.api_key().as_deref(), Some("abc"));
    }

    #[tokio::test]
    async fn test_override_is_not_persisted() {
        let store = Arc::new(MemoryKvStore::new());
        let settings = Settings::load_with_env(store.clone(), &Config::minimal(), None).await;
        assert_eq!(settings.override_batch_limit(0), 1);
        assert_eq!(settings.override_batch_limit(7), 7);
        assert_eq!(settings.batch_limit(), 7);
        assert!(store.is_empty());
    }

    #[test]
    fn test_mask_key() {
        assert_eq!(mask_key("abcdefgh"), "****efgh");
        assert_eq!(mask_key("abc"), "***");
    }
}
