//! Batch Orchestrator: the user-triggered analysis flow.
//!
//! ```text
//! process_novels(cards)
//!   ├─ API key present? ── no ──▶ CredentialPrompt ── cancel ──▶ Cancelled
//!   ├─ identifier map empty? ───────────────────────────────────▶ MappingFailed
//!   ├─ select uncached, unprocessed, not in flight
//!   │     (unmapped → skip, invalid canonical id → MappingFailed)
//!   ├─ nothing selected ────────────────────────────────────────▶ NoNewItems
//!   └─ process_batch(first `batch_limit` cards)
//!         ├─ per card: resolve + validate (any fault aborts all)
//!         │            fetch reviews, assemble snapshot, wait
//!         ├─ one AnalysisClient call for the whole batch
//!         ├─ length mismatch / analysis error ──▶ failure labels, no writes
//!         └─ per position: render, cache, mark processed, clear indicator
//! ```
//!
//! Mapping faults fail closed: no card ever reaches the review or analysis
//! stage with an unresolved or malformed canonical id. An explicit in-flight
//! set keeps two concurrent invocations from analyzing the same novel.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use novel_lens_core::legacy;
use novel_lens_core::models::{Card, NovelSnapshot};

use crate::cache::AssessmentCache;
use crate::config::BatchConfig;
use crate::gemini::{AnalysisClient, AnalysisError};
use crate::mapper::{IdentifierMapper, MappingError};
use crate::reviews::ReviewFetcher;
use crate::settings::Settings;
use crate::traits::{CardRenderer, CredentialPrompt, Notifier};

/// Label shown on every card of a batch whose analysis failed.
pub const PROCESSING_FAILED_LABEL: &str = "Processing Failed";

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("no API key configured")]
    MissingApiKey,

    #[error("processing halted: {0}")]
    Mapping(#[from] MappingError),

    #[error("card has no raw id; unable to obtain a canonical id")]
    MissingRawId,

    #[error("mismatch between number of novels sent ({sent}) and analyses received ({received})")]
    LengthMismatch { sent: usize, received: usize },

    #[error(transparent)]
    Analysis(#[from] AnalysisError),
}

/// Result of one user-triggered invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every candidate card already has an assessment.
    NoNewItems,
    /// The user dismissed the credential prompt.
    Cancelled,
    /// The identifier map is empty or unreliable; nothing was fetched.
    MappingFailed,
    /// This many novels received a fresh assessment.
    Analyzed(usize),
    /// The batch failed as a whole; nothing was cached.
    Failed(String),
}

/// Presentation collaborators used by the orchestrator.
#[derive(Clone)]
pub struct Ui {
    pub renderer: Arc<dyn CardRenderer>,
    pub notifier: Arc<dyn Notifier>,
    pub credentials: Arc<dyn CredentialPrompt>,
}

pub struct Orchestrator {
    mapper: Arc<IdentifierMapper>,
    fetcher: ReviewFetcher,
    client: AnalysisClient,
    cache: AssessmentCache,
    settings: Arc<Settings>,
    ui: Ui,
    config: BatchConfig,
    in_flight: Mutex<HashSet<String>>,
    processed: Mutex<HashSet<String>>,
}

/// Canonical ids claimed by one batch; released on drop.
struct Claim<'a> {
    set: &'a Mutex<HashSet<String>>,
    ids: Vec<String>,
}

impl<'a> Claim<'a> {
    fn new(set: &'a Mutex<HashSet<String>>) -> Self {
        Self { set, ids: Vec::new() }
    }

    /// Claim `id`; `false` when another batch already holds it.
    fn take(&mut self, id: &str) -> bool {
        let mut set = lock(self.set);
        if set.contains(id) {
            return false;
        }
        set.insert(id.to_string());
        self.ids.push(id.to_string());
        true
    }
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        let mut set = lock(self.set);
        for id in &self.ids {
            set.remove(id);
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(g) => g,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// A card that made it into the network batch.
struct Prepared {
    card: Card,
    canonical_id: String,
    snapshot: NovelSnapshot,
}

impl Orchestrator {
    pub fn new(
        mapper: Arc<IdentifierMapper>,
        fetcher: ReviewFetcher,
        client: AnalysisClient,
        cache: AssessmentCache,
        settings: Arc<Settings>,
        ui: Ui,
        config: BatchConfig,
    ) -> Self {
        Self {
            mapper,
            fetcher,
            client,
            cache,
            settings,
            ui,
            config,
            in_flight: Mutex::new(HashSet::new()),
            processed: Mutex::new(HashSet::new()),
        }
    }

    pub fn mapper(&self) -> &Arc<IdentifierMapper> {
        &self.mapper
    }

    pub fn cache(&self) -> &AssessmentCache {
        &self.cache
    }

    pub fn renderer(&self) -> &Arc<dyn CardRenderer> {
        &self.ui.renderer
    }

    /// Whether a card with this raw id received a fresh assessment in this
    /// session.
    pub fn is_processed(&self, raw_id: &str) -> bool {
        lock(&self.processed).contains(raw_id)
    }

    pub fn in_flight(&self) -> Vec<String> {
        let mut ids: Vec<String> = lock(&self.in_flight).iter().cloned().collect();
        ids.sort();
        ids
    }

    /// User-triggered run over every card on the page.
    pub async fn process_novels(&self, cards: &[Card]) -> RunOutcome {
        self.run(cards, None).await
    }

    /// Specific-item trigger: analyze one card, ignoring the batch limit.
    pub async fn analyze_card(&self, cards: &[Card], raw_id: &str) -> RunOutcome {
        self.run(cards, Some(raw_id)).await
    }

    async fn run(&self, cards: &[Card], only: Option<&str>) -> RunOutcome {
        if !self.ensure_api_key().await {
            debug!("credential prompt cancelled; aborting");
            return RunOutcome::Cancelled;
        }

        if self.mapper.is_empty() {
            error!("processing halted: identifier map is empty");
            self.mapper.notify_failure();
            return RunOutcome::MappingFailed;
        }

        let candidates: Vec<&Card> = match only {
            Some(raw) => cards.iter().filter(|c| c.raw_id.as_deref() == Some(raw)).collect(),
            None => cards.iter().collect(),
        };

        let selected = match self.select_uncached(&candidates).await {
            Ok(selected) => selected,
            Err(e) => {
                error!(error = %e, "processing halted during selection");
                self.mapper.notify_failure();
                return RunOutcome::MappingFailed;
            }
        };

        if selected.is_empty() {
            self.ui.notifier.no_new_items();
            return RunOutcome::NoNewItems;
        }

        let limit = match only {
            Some(_) => selected.len(),
            None => self.settings.batch_limit(),
        };
        let batch: Vec<Card> = selected.into_iter().take(limit).collect();
        info!(batch = batch.len(), "processing batch");

        let result = self.process_batch(&batch).await;
        self.finish(result)
    }

    /// A batch that ends up analyzing nothing (every card cached or claimed
    /// by a concurrent run meanwhile) reports no new items.
    fn finish(&self, result: Result<usize, BatchError>) -> RunOutcome {
        match result {
            Ok(0) => {
                debug!("batch had nothing left to analyze; no API call made");
                self.ui.notifier.no_new_items();
                RunOutcome::NoNewItems
            }
            Ok(n) => RunOutcome::Analyzed(n),
            Err(BatchError::Mapping(_)) | Err(BatchError::MissingRawId) => RunOutcome::MappingFailed,
            Err(e) => RunOutcome::Failed(e.to_string()),
        }
    }

    async fn ensure_api_key(&self) -> bool {
        if self.settings.api_key().is_some() {
            return true;
        }
        match self.ui.credentials.request_api_key().await {
            Some(key) if !key.trim().is_empty() => {
                self.settings.set_api_key(&key).await;
                true
            }
            _ => false,
        }
    }

    /// Cards eligible for analysis, in page order.
    ///
    /// Cards without a raw id or without a mapping are skipped; a mapping
    /// that exists but has a malformed canonical id aborts the selection.
    async fn select_uncached(&self, cards: &[&Card]) -> Result<Vec<Card>, MappingError> {
        let in_flight = lock(&self.in_flight).clone();
        let mut selected = Vec::new();

        for card in cards {
            let Some(raw_id) = card.raw_id.as_deref() else {
                continue;
            };
            if self.is_processed(raw_id) {
                continue;
            }
            let Some(canonical) = self.mapper.lookup(raw_id) else {
                warn!(raw_id, "no canonical id mapped; skipping this novel");
                continue;
            };
            if !self.mapper.validate_entry(raw_id, Some(&canonical)) {
                return Err(MappingError::InvalidEntry {
                    raw_id: raw_id.to_string(),
                    canonical_id: canonical,
                });
            }
            if in_flight.contains(&canonical) {
                debug!(raw_id, canonical_id = %canonical, "already being analyzed; skipping");
                continue;
            }
            if self.cache.get(&canonical).await.is_none() {
                selected.push((*card).clone());
            }
        }

        Ok(selected)
    }

    /// Analyze a batch of cards as one unit.
    ///
    /// Returns how many cards received a fresh assessment (zero when every
    /// card turned out to be cached). On error nothing is written to the
    /// cache and every indicator of the batch is cleared (mapping faults)
    /// or replaced by a self-clearing failure label (analysis faults).
    pub async fn process_batch(&self, cards: &[Card]) -> Result<usize, BatchError> {
        let Some(api_key) = self.settings.api_key() else {
            return Err(BatchError::MissingApiKey);
        };
        let model = self.settings.model();
        let renderer = &self.ui.renderer;

        for card in cards {
            renderer.show_processing(card);
        }

        let mut claim = Claim::new(&self.in_flight);
        let mut prepared: Vec<Prepared> = Vec::new();

        for card in cards {
            let canonical_id = match self.resolve(card) {
                Ok(id) => id,
                Err(e) => {
                    error!(card = %card.label(), error = %e, "processing halted");
                    self.mapper.notify_failure();
                    for c in cards {
                        renderer.clear_indicator(c);
                    }
                    return Err(e);
                }
            };

            if let Some(cached) = self.cache.get(&canonical_id).await {
                debug!(canonical_id = %canonical_id, "already cached; skipping");
                renderer.render(card, Some(&cached.assessment));
                self.mark_processed(card);
                renderer.clear_indicator(card);
                continue;
            }

            if !claim.take(&canonical_id) {
                debug!(canonical_id = %canonical_id, "claimed by another batch; skipping");
                renderer.clear_indicator(card);
                continue;
            }

            let reviews = self.fetcher.fetch_reviews(&canonical_id).await;
            let snapshot = NovelSnapshot::assemble(&canonical_id, card, &reviews);
            debug!(
                canonical_id = %canonical_id,
                reviews = reviews.len(),
                usernames = snapshot.available_usernames.len(),
                "prepared snapshot"
            );
            prepared.push(Prepared {
                card: card.clone(),
                canonical_id,
                snapshot,
            });

            tokio::time::sleep(Duration::from_millis(self.config.item_delay_ms)).await;
        }

        if prepared.is_empty() {
            return Ok(0);
        }

        let snapshots: Vec<NovelSnapshot> = prepared.iter().map(|p| p.snapshot.clone()).collect();
        let analyses = match self.client.analyze(&snapshots, &api_key, &model).await {
            Ok(a) if a.len() == snapshots.len() => a,
            Ok(a) => {
                let err = BatchError::LengthMismatch {
                    sent: snapshots.len(),
                    received: a.len(),
                };
                self.fail_batch(&prepared, &err);
                return Err(err);
            }
            Err(e) => {
                let err = BatchError::Analysis(e);
                self.fail_batch(&prepared, &err);
                return Err(err);
            }
        };

        for (item, mut analysis) in prepared.iter().zip(analyses) {
            if analysis.available_usernames.is_empty() {
                analysis.available_usernames = item.snapshot.available_usernames.clone();
            }
            let record = legacy::normalize(analysis);
            renderer.render(&item.card, Some(&record.assessment));
            self.cache.set(&item.canonical_id, &record).await;
            self.mark_processed(&item.card);
            renderer.clear_indicator(&item.card);
        }

        info!(analyzed = prepared.len(), "batch complete");
        Ok(prepared.len())
    }

    fn resolve(&self, card: &Card) -> Result<String, BatchError> {
        let raw_id = card.raw_id.as_deref().ok_or(BatchError::MissingRawId)?;
        Ok(self.mapper.resolve(raw_id)?)
    }

    fn mark_processed(&self, card: &Card) {
        if let Some(raw) = &card.raw_id {
            lock(&self.processed).insert(raw.clone());
        }
    }

    /// Replace every indicator of the batch with a failure label that
    /// clears itself after `failure_label_ms`.
    fn fail_batch(&self, prepared: &[Prepared], err: &BatchError) {
        error!(error = %err, "batch analysis failed");
        let renderer = self.ui.renderer.clone();
        let cards: Vec<Card> = prepared.iter().map(|p| p.card.clone()).collect();
        for card in &cards {
            renderer.show_failed(card, PROCESSING_FAILED_LABEL);
        }
        let delay = Duration::from_millis(self.config.failure_label_ms);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            for card in &cards {
                renderer.clear_indicator(card);
            }
        });
    }
}
