//! TOML configuration parsing and validation.
//!
//! Every section is optional; omitted keys fall back to the host site's
//! production values. The Gemini API key is deliberately absent from the
//! file format: it comes from the settings store or `GEMINI_API_KEY`.

use anyhow::{Context, Result};
use regex::Regex;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default)]
    pub gemini: GeminiConfig,
    #[serde(default)]
    pub reviews: ReviewsConfig,
    #[serde(default)]
    pub mapping: MappingConfig,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub navigation: NavigationConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SiteConfig {
    #[serde(default = "default_site_base_url")]
    pub base_url: String,
    #[serde(default = "default_supported_routes")]
    pub supported_routes: Vec<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// `supported_routes` compiled on first use.
    #[serde(skip)]
    route_patterns: OnceLock<Vec<Regex>>,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            base_url: default_site_base_url(),
            supported_routes: default_supported_routes(),
            timeout_secs: default_timeout_secs(),
            route_patterns: OnceLock::new(),
        }
    }
}

fn default_site_base_url() -> String {
    "https://wtr-lab.com".to_string()
}
fn default_supported_routes() -> Vec<String> {
    vec![
        r"^https://wtr-lab\.com/en/for-you".to_string(),
        r"^https://wtr-lab\.com/en/novel-finder".to_string(),
    ]
}
fn default_timeout_secs() -> u64 {
    30
}

impl SiteConfig {
    /// Whether `url` is a listing page the pipeline runs on.
    pub fn is_supported(&self, url: &str) -> bool {
        self.route_patterns
            .get_or_init(|| {
                self.supported_routes
                    .iter()
                    .filter_map(|p| Regex::new(p).ok())
                    .collect()
            })
            .iter()
            .any(|re| re.is_match(url))
    }

    /// Replace the route patterns, dropping any compiled ones.
    pub fn set_supported_routes(&mut self, routes: Vec<String>) {
        self.supported_routes = routes;
        self.route_patterns = OnceLock::new();
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct GeminiConfig {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_gemini_base_url")]
    pub base_url: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_gemini_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            base_url: default_gemini_base_url(),
            temperature: default_temperature(),
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            timeout_secs: default_gemini_timeout_secs(),
        }
    }
}

pub fn default_model() -> String {
    "gemini-2.5-flash".to_string()
}
fn default_gemini_base_url() -> String {
    "https://generativelanguage.googleapis.com".to_string()
}
fn default_temperature() -> f64 {
    0.3
}
fn default_max_retries() -> u32 {
    3
}
fn default_initial_backoff_ms() -> u64 {
    1000
}
fn default_gemini_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReviewsConfig {
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
    #[serde(default = "default_page_delay_ms")]
    pub page_delay_ms: u64,
    #[serde(default = "default_sufficient_comments")]
    pub sufficient_comments: usize,
}

impl Default for ReviewsConfig {
    fn default() -> Self {
        Self {
            max_pages: default_max_pages(),
            page_delay_ms: default_page_delay_ms(),
            sufficient_comments: default_sufficient_comments(),
        }
    }
}

fn default_max_pages() -> u32 {
    5
}
fn default_page_delay_ms() -> u64 {
    100
}
fn default_sufficient_comments() -> usize {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct MappingConfig {
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Default for MappingConfig {
    fn default() -> Self {
        Self {
            retry_attempts: default_retry_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

fn default_retry_attempts() -> u32 {
    3
}
fn default_retry_delay_ms() -> u64 {
    2000
}

/// Upper bound on the per-invocation batch size.
pub const MAX_BATCH_LIMIT: usize = 20;

#[derive(Debug, Deserialize, Clone)]
pub struct BatchConfig {
    #[serde(default = "default_batch_limit")]
    pub limit: usize,
    #[serde(default = "default_item_delay_ms")]
    pub item_delay_ms: u64,
    #[serde(default = "default_failure_label_ms")]
    pub failure_label_ms: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            limit: default_batch_limit(),
            item_delay_ms: default_item_delay_ms(),
            failure_label_ms: default_failure_label_ms(),
        }
    }
}

fn default_batch_limit() -> usize {
    1
}
fn default_item_delay_ms() -> u64 {
    300
}
fn default_failure_label_ms() -> u64 {
    4000
}

#[derive(Debug, Deserialize, Clone)]
pub struct NavigationConfig {
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for NavigationConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

fn default_debounce_ms() -> u64 {
    500
}
fn default_poll_interval_ms() -> u64 {
    1000
}

impl Config {
    /// Configuration used when no file is present: production defaults with
    /// the database under `./data`.
    pub fn minimal() -> Self {
        Self {
            db: DbConfig {
                path: PathBuf::from("./data/nlens.sqlite"),
            },
            site: SiteConfig::default(),
            gemini: GeminiConfig::default(),
            reviews: ReviewsConfig::default(),
            mapping: MappingConfig::default(),
            batch: BatchConfig::default(),
            navigation: NavigationConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Load `path` if it exists, otherwise fall back to [`Config::minimal`].
///
/// A file that exists but does not parse or validate is still an error.
pub fn load_or_minimal(path: &Path) -> Result<Config> {
    if path.exists() {
        load_config(path)
    } else {
        Ok(Config::minimal())
    }
}

pub fn validate(config: &Config) -> Result<()> {
    // Validate gemini
    if config.gemini.model.trim().is_empty() {
        anyhow::bail!("gemini.model must not be empty");
    }
    if !(0.0..=2.0).contains(&config.gemini.temperature) {
        anyhow::bail!("gemini.temperature must be in [0.0, 2.0]");
    }
    if config.gemini.initial_backoff_ms == 0 {
        anyhow::bail!("gemini.initial_backoff_ms must be > 0");
    }

    // Validate reviews
    if config.reviews.max_pages == 0 {
        anyhow::bail!("reviews.max_pages must be > 0");
    }
    if config.reviews.sufficient_comments == 0 {
        anyhow::bail!("reviews.sufficient_comments must be > 0");
    }

    // Validate mapping
    if config.mapping.retry_attempts == 0 {
        anyhow::bail!("mapping.retry_attempts must be > 0");
    }

    // Validate batch
    if !(1..=MAX_BATCH_LIMIT).contains(&config.batch.limit) {
        anyhow::bail!("batch.limit must be in [1, {}]", MAX_BATCH_LIMIT);
    }

    // Validate site
    for pattern in &config.site.supported_routes {
        Regex::new(pattern)
            .with_context(|| format!("site.supported_routes: invalid pattern '{}'", pattern))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_example_config_is_valid() {
        let cfg: Config = toml::from_str(include_str!("../config/nlens.example.toml")).unwrap();
        validate(&cfg).unwrap();
        assert!(cfg.site.is_supported("https://wtr-lab.com/en/for-you?page=2"));
        assert!(!cfg.site.is_supported("https://wtr-lab.com/en/novel/1/x"));
    }

    #[test]
    fn test_minimal_file_uses_production_defaults() {
        let cfg: Config = toml::from_str("[db]\npath = \"x.sqlite\"\n").unwrap();
        validate(&cfg).unwrap();
        assert_eq!(cfg.gemini.model, "gemini-2.5-flash");
        assert_eq!(cfg.gemini.max_retries, 3);
        assert_eq!(cfg.reviews.max_pages, 5);
        assert_eq!(cfg.mapping.retry_delay_ms, 2000);
        assert_eq!(cfg.batch.limit, 1);
        assert_eq!(cfg.batch.failure_label_ms, 4000);
        assert_eq!(cfg.navigation.debounce_ms, 500);
    }

    #[test]
    fn test_rejects_unbounded_batch() {
        let cfg: Config = toml::from_str("[db]\npath = \"x\"\n[batch]\nlimit = 0\n").unwrap();
        assert!(validate(&cfg).is_err());
        let cfg: Config = toml::from_str("[db]\npath = \"x\"\n[batch]\nlimit = 500\n").unwrap();
        assert!(validate(&cfg).is_err());
    }

    #[test]
    fn test_rejects_bad_route_pattern() {
        let cfg: Config =
            toml::from_str("[db]\npath = \"x\"\n[site]\nsupported_routes = [\"(\"]\n").unwrap();
        assert!(validate(&cfg).is_err());
    }

    #[test]
    fn test_supported_routes() {
        let site = SiteConfig::default();
        assert!(site.is_supported("https://wtr-lab.com/en/for-you?page=2"));
        assert!(site.is_supported("https://wtr-lab.com/en/novel-finder"));
        assert!(!site.is_supported("https://wtr-lab.com/en/novel/123/some-title"));
    }

    #[test]
    fn test_route_patterns_compile_once_and_reset_on_change() {
        let mut site = SiteConfig::default();
        assert!(site.route_patterns.get().is_none());
        assert!(site.is_supported("https://wtr-lab.com/en/for-you"));
        assert_eq!(site.route_patterns.get().map(Vec::len), Some(2));

        site.set_supported_routes(vec![r"^https://mirror\.test/".to_string()]);
        assert!(site.route_patterns.get().is_none());
        assert!(site.is_supported("https://mirror.test/en/for-you"));
        assert!(!site.is_supported("https://wtr-lab.com/en/for-you"));
    }
}
