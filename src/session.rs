//! Page session: initial view, client-side navigation and passive display.
//!
//! A session wraps one [`Orchestrator`] and the page it works on. Cached
//! assessments are shown without any network call besides reading the page
//! itself; nothing here ever talks to the analysis endpoint.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Result;
use tracing::{debug, info, warn};

use novel_lens_core::legacy;
use novel_lens_core::models::Card;

use crate::config::SiteConfig;
use crate::orchestrator::{Orchestrator, RunOutcome};
use crate::page::{self, PageSource};

/// What a view refresh did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewOutcome {
    /// The URL is not a listing page the pipeline runs on.
    Unsupported,
    /// Same URL as the last route change.
    Unchanged,
    /// The identifier map could not be built; the user was notified.
    MappingFailed,
    /// This many cached assessments were rendered.
    Displayed(usize),
}

pub struct Session {
    orchestrator: Arc<Orchestrator>,
    site: SiteConfig,
    checked: Mutex<HashSet<String>>,
    last_url: Mutex<Option<String>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(g) => g,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Identity used for the "already checked" set.
fn card_key(card: &Card) -> String {
    card.raw_id
        .clone()
        .or_else(|| card.href.clone())
        .unwrap_or_else(|| card.title.clone())
}

impl Session {
    pub fn new(orchestrator: Arc<Orchestrator>, site: SiteConfig) -> Self {
        Self {
            orchestrator,
            site,
            checked: Mutex::new(HashSet::new()),
            last_url: Mutex::new(None),
        }
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    fn page(&self) -> &Arc<dyn PageSource> {
        self.orchestrator.mapper().page()
    }

    /// Cards on the current page, in document order.
    pub async fn cards(&self) -> Result<Vec<Card>> {
        let url = self.page().url();
        let html = self.page().html().await?;
        Ok(page::scrape_cards(&html, &url))
    }

    /// Build the identifier map for the current page and show what is
    /// already cached.
    pub async fn init_view(&self) -> Result<ViewOutcome> {
        let url = self.page().url();
        if !self.site.is_supported(&url) {
            debug!(url = %url, "unsupported route; skipping");
            return Ok(ViewOutcome::Unsupported);
        }
        *lock(&self.last_url) = Some(url.clone());

        let mapper = self.orchestrator.mapper();
        mapper.reset_notification();
        if !mapper.validate_and_build_with_retry().await {
            mapper.notify_failure();
            return Ok(ViewOutcome::MappingFailed);
        }

        let shown = self.display_cached().await?;
        info!(url = %url, mapped = mapper.size(), shown, "view initialised");
        Ok(ViewOutcome::Displayed(shown))
    }

    /// Follow a client-side navigation to `url`.
    ///
    /// The map is refreshed from the framework data endpoint first; if that
    /// fails the view is rebuilt from the embedded payload of the new page.
    pub async fn handle_route_change(&self, url: &str) -> Result<ViewOutcome> {
        {
            let mut last = lock(&self.last_url);
            if last.as_deref() == Some(url) {
                return Ok(ViewOutcome::Unchanged);
            }
            *last = Some(url.to_string());
        }

        if !self.site.is_supported(url) {
            debug!(url, "navigated to unsupported route");
            return Ok(ViewOutcome::Unsupported);
        }

        debug!(url, "route changed");
        self.page().set_url(url);
        lock(&self.checked).clear();

        let mapper = self.orchestrator.mapper();
        if mapper.build_from_fetched_payload(url).await {
            mapper.reset_notification();
            let shown = self.display_cached().await?;
            return Ok(ViewOutcome::Displayed(shown));
        }

        warn!(url, "data endpoint unavailable; rebuilding from page payload");
        self.init_view().await
    }

    /// Render cached assessments for every card not yet processed or
    /// checked on this page. Returns how many were rendered.
    pub async fn display_cached(&self) -> Result<usize> {
        let cards = self.cards().await?;
        let mapper = self.orchestrator.mapper();
        let cache = self.orchestrator.cache();
        let renderer = self.orchestrator.renderer();
        let mut shown = 0;

        for card in &cards {
            let key = card_key(card);
            if lock(&self.checked).contains(&key) {
                continue;
            }
            if card.raw_id.as_deref().is_some_and(|r| self.orchestrator.is_processed(r)) {
                continue;
            }

            let canonical = match card.raw_id.as_deref() {
                Some(raw) => mapper
                    .lookup(raw)
                    .filter(|id| mapper.validate_entry(raw, Some(id.as_str()))),
                None => card.href.as_deref().and_then(page::href_canonical_id),
            };

            if let Some(id) = canonical {
                if let Some(cached) = cache.get(&id).await {
                    let cached = legacy::normalize_cached(cached);
                    renderer.render(card, Some(&cached.assessment));
                    shown += 1;
                }
            }
            lock(&self.checked).insert(key);
        }

        debug!(cards = cards.len(), shown, "displayed cached assessments");
        Ok(shown)
    }

    /// Run the user-triggered batch over the current page.
    pub async fn analyze(&self) -> Result<RunOutcome> {
        let cards = self.cards().await?;
        Ok(self.orchestrator.process_novels(&cards).await)
    }

    /// Analyze one card of the current page, ignoring the batch limit.
    pub async fn analyze_card(&self, raw_id: &str) -> Result<RunOutcome> {
        let cards = self.cards().await?;
        Ok(self.orchestrator.analyze_card(&cards, raw_id).await)
    }
}
