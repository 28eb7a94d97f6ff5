//! Identifier Mapper: keeps the raw → canonical map for the current page.
//!
//! The map is fed from two places:
//!
//! - the embedded `__NEXT_DATA__` payload of the page markup
//!   ([`IdentifierMapper::build_from_embedded_payload`]), retried a few times
//!   because the payload can be missing while the page is still hydrating;
//! - the framework data endpoint after client-side navigation
//!   ([`IdentifierMapper::build_from_fetched_payload`]).
//!
//! Entries are only ever added. All accessors are synchronous and never
//! touch the network. The one-shot "mapping failed" notification flag lives
//! here too and is re-armed by [`IdentifierMapper::reset_notification`].

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, error, warn};

use novel_lens_core::mapping::{self, IdentifierMap, MappingState, PayloadError};

use crate::config::MappingConfig;
use crate::page::{self, PageSource};
use crate::traits::Notifier;

#[derive(Debug, Error)]
pub enum MappingError {
    #[error("page unavailable: {0}")]
    Page(String),

    #[error(transparent)]
    Payload(#[from] PayloadError),

    #[error("no build id known; embedded payload has not been read")]
    NoBuildId,

    #[error("cannot derive data URL from {0}")]
    DataUrl(String),

    #[error("identifier map is empty")]
    Empty,

    #[error("no canonical id mapped for raw id {0}")]
    Unmapped(String),

    #[error("invalid canonical id {canonical_id:?} for raw id {raw_id}")]
    InvalidEntry { raw_id: String, canonical_id: String },
}

struct Inner {
    map: IdentifierMap,
    state: MappingState,
    build_id: Option<String>,
    notified: bool,
}

pub struct IdentifierMapper {
    page: Arc<dyn PageSource>,
    notifier: Arc<dyn Notifier>,
    config: MappingConfig,
    inner: Mutex<Inner>,
}

impl IdentifierMapper {
    pub fn new(page: Arc<dyn PageSource>, notifier: Arc<dyn Notifier>, config: MappingConfig) -> Self {
        Self {
            page,
            notifier,
            config,
            inner: Mutex::new(Inner {
                map: IdentifierMap::new(),
                state: MappingState::Empty,
                build_id: None,
                notified: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn set_state(&self, state: MappingState) {
        self.lock().state = state;
    }

    pub fn page(&self) -> &Arc<dyn PageSource> {
        &self.page
    }

    /// Parse the embedded payload of the current page into the map.
    ///
    /// Returns `false` if the payload is missing, malformed, or yields no
    /// pairs. Pairs from earlier builds stay in the map either way.
    pub async fn build_from_embedded_payload(&self) -> bool {
        debug!("building identifier map from embedded payload");
        self.set_state(MappingState::Building);
        match self.load_embedded().await {
            Ok(added) => {
                let size = self.size();
                debug!(added, size, "built identifier map");
                self.set_state(MappingState::Populated);
                true
            }
            Err(e) => {
                warn!(error = %e, "identifier map build failed");
                self.set_state(MappingState::Failed);
                false
            }
        }
    }

    async fn load_embedded(&self) -> Result<usize, MappingError> {
        let html = self
            .page
            .html()
            .await
            .map_err(|e| MappingError::Page(e.to_string()))?;
        let text = page::extract_embedded_payload(&html).ok_or(PayloadError::Missing)?;
        let parsed = mapping::parse_embedded_payload(&text)?;

        let mut inner = self.lock();
        if parsed.build_id.is_some() {
            inner.build_id = parsed.build_id;
        }
        Ok(inner.map.merge(parsed.pairs))
    }

    /// Refresh the map from the framework data endpoint for `url`.
    ///
    /// Never fails loudly: any network, shape, or parse problem is logged
    /// and reported as `false`.
    pub async fn build_from_fetched_payload(&self, url: &str) -> bool {
        debug!(url, "building identifier map from data endpoint");
        self.set_state(MappingState::Building);
        match self.load_fetched(url).await {
            Ok(added) => {
                debug!(added, size = self.size(), "merged pairs from data endpoint");
                self.set_state(MappingState::Populated);
                true
            }
            Err(e) => {
                warn!(url, error = %e, "data endpoint mapping failed");
                self.set_state(MappingState::Failed);
                false
            }
        }
    }

    async fn load_fetched(&self, url: &str) -> Result<usize, MappingError> {
        let build_id = self.build_id().ok_or(MappingError::NoBuildId)?;
        let data_url =
            mapping::data_url(url, &build_id).ok_or_else(|| MappingError::DataUrl(url.to_string()))?;
        let body = self
            .page
            .fetch(&data_url)
            .await
            .map_err(|e| MappingError::Page(e.to_string()))?;
        let parsed = mapping::parse_data_payload(&body)?;
        Ok(self.lock().map.merge(parsed.pairs))
    }

    /// Build from the embedded payload up to `retry_attempts` times, waiting
    /// `retry_delay_ms` between attempts.
    pub async fn validate_and_build_with_retry(&self) -> bool {
        let attempts = self.config.retry_attempts.max(1);
        for attempt in 1..=attempts {
            debug!(attempt, attempts, "building identifier map");
            if self.build_from_embedded_payload().await && !self.is_empty() {
                debug!("identifier map validation succeeded");
                return true;
            }

            warn!(attempt, attempts, "identifier map build attempt failed");
            if attempt < attempts {
                tokio::time::sleep(Duration::from_millis(self.config.retry_delay_ms)).await;
            }
        }

        error!("identifier map validation failed after all retry attempts");
        self.set_state(MappingState::Failed);
        false
    }

    /// Shape check for a resolved canonical id.
    pub fn validate_entry(&self, raw_id: &str, canonical_id: Option<&str>) -> bool {
        let ok = mapping::validate_entry(raw_id, canonical_id);
        if !ok {
            debug!(raw_id, ?canonical_id, "mapping validation failed");
        }
        ok
    }

    /// Resolve and validate in one step.
    pub fn resolve(&self, raw_id: &str) -> Result<String, MappingError> {
        let canonical = self
            .lookup(raw_id)
            .ok_or_else(|| MappingError::Unmapped(raw_id.to_string()))?;
        if !self.validate_entry(raw_id, Some(&canonical)) {
            return Err(MappingError::InvalidEntry {
                raw_id: raw_id.to_string(),
                canonical_id: canonical,
            });
        }
        Ok(canonical)
    }

    pub fn lookup(&self, raw_id: &str) -> Option<String> {
        self.lock().map.lookup(raw_id).map(str::to_string)
    }

    pub fn has(&self, raw_id: &str) -> bool {
        self.lock().map.has(raw_id)
    }

    pub fn size(&self) -> usize {
        self.lock().map.size()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().map.is_empty()
    }

    pub fn state(&self) -> MappingState {
        self.lock().state
    }

    pub fn build_id(&self) -> Option<String> {
        self.lock().build_id.clone()
    }

    /// Entries sorted by raw id.
    pub fn entries(&self) -> Vec<(String, String)> {
        self.lock()
            .map
            .sorted_entries()
            .into_iter()
            .map(|(r, c)| (r.to_string(), c.to_string()))
            .collect()
    }

    /// Raise the "mapping failed" notification unless it was already shown
    /// since the last reset.
    pub fn notify_failure(&self) {
        {
            let mut inner = self.lock();
            if inner.notified {
                return;
            }
            inner.notified = true;
        }
        error!("identifier mapping failure; user has been notified to reload");
        self.notifier.mapping_failed();
    }

    pub fn reset_notification(&self) {
        self.lock().notified = false;
    }
}
