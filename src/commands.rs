//! Command handlers behind the `nlens` CLI.
//!
//! [`App`] owns what every command shares (configuration, the durable
//! store, settings) and wires a [`Session`] for a page URL. The `run_*`
//! functions print their results to stdout.

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde_json::json;

use novel_lens_core::store::KeyValueStore;

use crate::cache::AssessmentCache;
use crate::config::Config;
use crate::gemini::{AnalysisClient, GeminiTransport, GenerativeTransport};
use crate::mapper::IdentifierMapper;
use crate::migrate;
use crate::navigation::{self, PollingNavigation, ScriptedNavigation};
use crate::orchestrator::{Orchestrator, RunOutcome, Ui};
use crate::page::{HttpPageSource, PageSource};
use crate::render::{RenderMode, StdinCredentialPrompt};
use crate::reviews::{HttpReviewApi, ReviewApi, ReviewFetcher};
use crate::session::{Session, ViewOutcome};
use crate::settings::{self, Settings, KNOWN_MODELS};
use crate::sqlite_store;

/// Shared state for one CLI invocation.
pub struct App {
    pub config: Config,
    pub store: Arc<dyn KeyValueStore>,
    pub settings: Arc<Settings>,
}

impl App {
    /// Open the SQLite store and load settings.
    pub async fn open(config: Config) -> Result<Self> {
        let store: Arc<dyn KeyValueStore> = Arc::new(sqlite_store::open(&config).await?);
        Ok(Self::with_store(config, store).await)
    }

    pub async fn with_store(config: Config, store: Arc<dyn KeyValueStore>) -> Self {
        let settings = Arc::new(Settings::load(store.clone(), &config).await);
        Self {
            config,
            store,
            settings,
        }
    }

    pub fn cache(&self) -> AssessmentCache {
        AssessmentCache::new(self.store.clone())
    }

    /// Session for `url` talking to the live site and Gemini.
    pub fn session(&self, url: &str, ui: Ui) -> Result<Session> {
        let page: Arc<dyn PageSource> =
            Arc::new(HttpPageSource::new(url, self.config.site.timeout_secs)?);
        let reviews: Arc<dyn ReviewApi> = Arc::new(HttpReviewApi::new(
            &self.config.site.base_url,
            self.config.site.timeout_secs,
        )?);
        let transport: Arc<dyn GenerativeTransport> = Arc::new(GeminiTransport::new(&self.config.gemini)?);
        Ok(self.session_with(page, reviews, transport, ui))
    }

    /// Session over explicit transports.
    pub fn session_with(
        &self,
        page: Arc<dyn PageSource>,
        reviews: Arc<dyn ReviewApi>,
        transport: Arc<dyn GenerativeTransport>,
        ui: Ui,
    ) -> Session {
        let mapper = Arc::new(IdentifierMapper::new(
            page,
            ui.notifier.clone(),
            self.config.mapping.clone(),
        ));
        let orchestrator = Orchestrator::new(
            mapper,
            ReviewFetcher::new(reviews, self.config.reviews.clone()),
            AnalysisClient::new(transport, self.config.gemini.clone()),
            self.cache(),
            self.settings.clone(),
            ui,
            self.config.batch.clone(),
        );
        Session::new(Arc::new(orchestrator), self.config.site.clone())
    }
}

fn terminal_ui(mode: RenderMode) -> Ui {
    Ui {
        renderer: mode.renderer(),
        notifier: mode.notifier(),
        credentials: Arc::new(StdinCredentialPrompt),
    }
}

fn ensure_supported(config: &Config, url: &str) -> Result<()> {
    if !config.site.is_supported(url) {
        bail!(
            "unsupported page: {} (expected one of: {})",
            url,
            config.site.supported_routes.join(", ")
        );
    }
    Ok(())
}

pub async fn run_init(config: &Config) -> Result<()> {
    migrate::run_migrations(config).await?;
    println!("Database initialized at {}.", config.db.path.display());
    Ok(())
}

pub async fn run_analyze(
    app: &App,
    url: &str,
    raw_id: Option<&str>,
    limit: Option<usize>,
    json: bool,
) -> Result<()> {
    ensure_supported(&app.config, url)?;
    if let Some(n) = limit {
        app.settings.override_batch_limit(n);
    }

    let mode = RenderMode::from_flag(json);
    let session = app.session(url, terminal_ui(mode))?;
    if session.init_view().await? == ViewOutcome::MappingFailed {
        bail!("identifier mapping failed for {}", url);
    }

    let outcome = match raw_id {
        Some(id) => session.analyze_card(id).await?,
        None => session.analyze().await?,
    };
    report_outcome(&outcome, mode)
}

fn report_outcome(outcome: &RunOutcome, mode: RenderMode) -> Result<()> {
    if mode == RenderMode::Json {
        let value = match outcome {
            RunOutcome::NoNewItems => json!({ "event": "done", "outcome": "no_new_items" }),
            RunOutcome::Cancelled => json!({ "event": "done", "outcome": "cancelled" }),
            RunOutcome::MappingFailed => json!({ "event": "done", "outcome": "mapping_failed" }),
            RunOutcome::Analyzed(n) => json!({ "event": "done", "outcome": "analyzed", "count": n }),
            RunOutcome::Failed(reason) => json!({ "event": "done", "outcome": "failed", "reason": reason }),
        };
        println!("{}", value);
    }

    match outcome {
        RunOutcome::Analyzed(n) => {
            if mode == RenderMode::Human {
                println!("Analyzed {} novel(s).", n);
            }
            Ok(())
        }
        RunOutcome::NoNewItems => Ok(()),
        RunOutcome::Cancelled => {
            if mode == RenderMode::Human {
                println!("Cancelled: no API key provided.");
            }
            Ok(())
        }
        RunOutcome::MappingFailed => bail!("identifier mapping failed"),
        RunOutcome::Failed(reason) => bail!("analysis failed: {}", reason),
    }
}

pub async fn run_show(app: &App, url: &str, json: bool) -> Result<()> {
    ensure_supported(&app.config, url)?;
    let mode = RenderMode::from_flag(json);
    let session = app.session(url, terminal_ui(mode))?;

    match session.init_view().await? {
        ViewOutcome::Displayed(n) => {
            if mode == RenderMode::Human {
                println!("{} cached assessment(s) shown.", n);
            }
            Ok(())
        }
        ViewOutcome::MappingFailed => bail!("identifier mapping failed for {}", url),
        other => bail!("nothing to show for {} ({:?})", url, other),
    }
}

pub async fn run_map(app: &App, url: &str) -> Result<()> {
    let session = app.session(url, terminal_ui(RenderMode::Human))?;
    let mapper = session.orchestrator().mapper();
    if !mapper.validate_and_build_with_retry().await {
        bail!("could not build the identifier map for {}", url);
    }

    if let Some(build_id) = mapper.build_id() {
        println!("build id: {}", build_id);
    }
    let entries = mapper.entries();
    for (raw, canonical) in &entries {
        let flag = if mapper.validate_entry(raw, Some(canonical.as_str())) { "" } else { "  (invalid)" };
        println!("{} -> {}{}", raw, canonical, flag);
    }
    println!("{} mapping(s).", entries.len());
    Ok(())
}

pub async fn run_reviews(app: &App, canonical_id: &str) -> Result<()> {
    let api = Arc::new(HttpReviewApi::new(
        &app.config.site.base_url,
        app.config.site.timeout_secs,
    )?);
    let fetcher = ReviewFetcher::new(api, app.config.reviews.clone());
    let reviews = fetcher.fetch_reviews(canonical_id).await;

    if reviews.is_empty() {
        println!("No reviews.");
        return Ok(());
    }
    for r in &reviews {
        println!(
            "{} ({}/5): {}",
            r.username.as_deref().unwrap_or("Anonymous"),
            r.rate,
            r.comment.as_deref().unwrap_or("")
        );
    }
    println!("{} review(s).", reviews.len());
    Ok(())
}

pub async fn run_browse(app: &App, urls: &[String], analyze: bool, json: bool) -> Result<()> {
    let Some(first) = urls.first() else {
        bail!("no URLs given");
    };
    let mode = RenderMode::from_flag(json);
    let session = app.session(first, terminal_ui(mode))?;
    let mut nav = ScriptedNavigation::new(urls.iter().cloned());

    for (url, view, run) in navigation::follow(&session, &mut nav, analyze).await? {
        if mode == RenderMode::Human {
            println!("{}: {:?}", url, view);
        }
        if let Some(outcome) = run {
            if let Err(e) = report_outcome(&outcome, mode) {
                println!("{}: {}", url, e);
            }
        }
    }
    Ok(())
}

/// Follow the URL written to `url_file`, refreshing the view whenever it
/// changes and settles. Stops when the file is removed or emptied.
pub async fn run_watch(app: &App, url_file: &Path, analyze: bool, json: bool) -> Result<()> {
    let mut provider = navigation::file_url_provider(url_file.to_path_buf());
    let Some(first) = provider() else {
        bail!("no URL in {}", url_file.display());
    };
    let mode = RenderMode::from_flag(json);
    let session = app.session(&first, terminal_ui(mode))?;

    let start = session.handle_route_change(&first).await?;
    if mode == RenderMode::Human {
        println!("{}: {:?}", first, start);
    }
    if analyze && matches!(start, ViewOutcome::Displayed(_)) {
        if let Err(e) = report_outcome(&session.analyze().await?, mode) {
            println!("{}: {}", first, e);
        }
    }

    let mut nav = PollingNavigation::new(provider, &app.config.navigation).starting_at(&first);
    for (url, view, run) in navigation::follow(&session, &mut nav, analyze).await? {
        if mode == RenderMode::Human {
            println!("{}: {:?}", url, view);
        }
        if let Some(outcome) = run {
            if let Err(e) = report_outcome(&outcome, mode) {
                println!("{}: {}", url, e);
            }
        }
    }
    Ok(())
}

pub async fn run_cache_get(app: &App, canonical_id: &str) -> Result<()> {
    match app.cache().get(canonical_id).await {
        Some(record) => {
            let text = serde_json::to_string_pretty(&record).context("failed to encode record")?;
            println!("{}", text);
        }
        None => println!("No cached assessment for {}.", canonical_id),
    }
    Ok(())
}

pub async fn run_cache_clear(app: &App) -> Result<()> {
    let report = app.cache().clear_all().await;
    if !report.available {
        bail!("storage is unavailable");
    }
    println!("Cleared {} cached assessment(s).", report.cleared);
    if report.failed > 0 {
        bail!("{} entr(ies) could not be removed", report.failed);
    }
    Ok(())
}

pub fn run_settings_show(app: &App) {
    let s = &app.settings;
    println!(
        "api key:     {}",
        s.api_key().map(|k| settings::mask_key(&k)).unwrap_or_else(|| "(not set)".into())
    );
    println!("model:       {}", s.model());
    println!("debug:       {}", s.debug());
    println!("batch limit: {}", s.batch_limit());
}

pub fn run_settings_models(app: &App) {
    let current = app.settings.model();
    for model in KNOWN_MODELS {
        let marker = if *model == current { "*" } else { " " };
        println!("{} {}", marker, model);
    }
}
