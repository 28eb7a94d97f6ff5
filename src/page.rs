//! Listing page access and card scraping.
//!
//! A [`PageSource`] stands for "the page the user is looking at": it knows
//! its current URL, can produce the page markup, and can GET same-origin
//! resources such as the framework data endpoint. [`HttpPageSource`] talks
//! to the live site with `reqwest`; [`StaticPageSource`] serves canned
//! responses for tests and offline runs.
//!
//! Card scraping follows the host's listing markup:
//!
//! | Field | Selector | Pattern |
//! |-------|----------|---------|
//! | raw id / href | `a[data-novel-id]`, else `a.title` for href | attribute / `href` |
//! | title | `a.title` minus `.rawtitle` | leading `#N` dropped |
//! | views | `.detail-buttons .detail-line:nth-of-type(1)` | `(\d+) views` |
//! | readers | `.detail-buttons .detail-line:nth-of-type(2)` | `(\d+) Readers` |
//! | rating | `.rating-text` | `(\d+\.\d+)` |
//! | genres | `.genres .genre` | |
//! | description | `.description` | default `No description.` |

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{LazyLock, RwLock};
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use novel_lens_core::models::Card;

static SEL_CARD: LazyLock<Selector> = LazyLock::new(|| css(".series-list > .card"));
static SEL_LINK: LazyLock<Selector> = LazyLock::new(|| css("a[data-novel-id]"));
static SEL_TITLE: LazyLock<Selector> = LazyLock::new(|| css("a.title"));
static SEL_RAW_TITLE: LazyLock<Selector> = LazyLock::new(|| css(".rawtitle"));
static SEL_VIEWS: LazyLock<Selector> =
    LazyLock::new(|| css(".detail-buttons .detail-line:nth-of-type(1)"));
static SEL_READERS: LazyLock<Selector> =
    LazyLock::new(|| css(".detail-buttons .detail-line:nth-of-type(2)"));
static SEL_RATING: LazyLock<Selector> = LazyLock::new(|| css(".rating-text"));
static SEL_GENRE: LazyLock<Selector> = LazyLock::new(|| css(".genres .genre"));
static SEL_DESCRIPTION: LazyLock<Selector> = LazyLock::new(|| css(".description"));
static SEL_NEXT_DATA: LazyLock<Selector> = LazyLock::new(|| css("script#__NEXT_DATA__"));

static RE_VIEWS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d+) views").unwrap());
static RE_READERS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d+) Readers").unwrap());
static RE_RATING: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d+\.\d+)").unwrap());
static RE_NOVEL_HREF: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"/novel/(\d+)/").unwrap());

fn css(selector: &str) -> Selector {
    Selector::parse(selector).unwrap()
}

pub const NO_DESCRIPTION: &str = "No description.";
pub const NO_TITLE: &str = "No title";

/// The page currently being enriched.
#[async_trait]
pub trait PageSource: Send + Sync {
    /// Current page URL.
    fn url(&self) -> String;

    /// Point the source at a new URL (client-side navigation).
    fn set_url(&self, url: &str);

    /// Markup of the current page.
    async fn html(&self) -> Result<String>;

    /// GET a resource relative to the current page's origin.
    async fn fetch(&self, url: &str) -> Result<String>;
}

/// Live page source backed by `reqwest`.
pub struct HttpPageSource {
    client: reqwest::Client,
    url: RwLock<String>,
}

impl HttpPageSource {
    pub fn new(url: &str, timeout_secs: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            client,
            url: RwLock::new(url.to_string()),
        })
    }

    async fn get(&self, url: &str) -> Result<String> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            bail!("GET {} returned {}", url, status);
        }
        Ok(response.text().await?)
    }
}

#[async_trait]
impl PageSource for HttpPageSource {
    fn url(&self) -> String {
        read_url(&self.url)
    }

    fn set_url(&self, url: &str) {
        write_url(&self.url, url);
    }

    async fn html(&self) -> Result<String> {
        let url = self.url();
        self.get(&url).await
    }

    async fn fetch(&self, url: &str) -> Result<String> {
        self.get(url).await
    }
}

/// Canned page source: fixed markup per page URL plus arbitrary resources.
#[derive(Default)]
pub struct StaticPageSource {
    url: RwLock<String>,
    pages: RwLock<HashMap<String, String>>,
    resources: RwLock<HashMap<String, String>>,
    html_reads: AtomicUsize,
}

impl StaticPageSource {
    pub fn new(url: &str, html: &str) -> Self {
        let source = Self::default();
        write_url(&source.url, url);
        source.set_page(url, html);
        source
    }

    pub fn with_resource(self, url: &str, body: &str) -> Self {
        self.set_resource(url, body);
        self
    }

    pub fn set_resource(&self, url: &str, body: &str) {
        if let Ok(mut r) = self.resources.write() {
            r.insert(url.to_string(), body.to_string());
        }
    }

    /// Replace the markup served for `url`.
    pub fn set_page(&self, url: &str, html: &str) {
        if let Ok(mut p) = self.pages.write() {
            p.insert(url.to_string(), html.to_string());
        }
    }

    /// How many times [`PageSource::html`] has been called.
    pub fn html_reads(&self) -> usize {
        self.html_reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PageSource for StaticPageSource {
    fn url(&self) -> String {
        read_url(&self.url)
    }

    fn set_url(&self, url: &str) {
        write_url(&self.url, url);
    }

    async fn html(&self) -> Result<String> {
        self.html_reads.fetch_add(1, Ordering::SeqCst);
        let url = self.url();
        let pages = self
            .pages
            .read()
            .map_err(|_| anyhow::anyhow!("page table poisoned"))?;
        match pages.get(&url) {
            Some(html) => Ok(html.clone()),
            None => bail!("no page for {}", url),
        }
    }

    async fn fetch(&self, url: &str) -> Result<String> {
        let resources = self
            .resources
            .read()
            .map_err(|_| anyhow::anyhow!("resource table poisoned"))?;
        match resources.get(url) {
            Some(body) => Ok(body.clone()),
            None => bail!("GET {} returned 404 Not Found", url),
        }
    }
}

fn read_url(lock: &RwLock<String>) -> String {
    match lock.read() {
        Ok(u) => u.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}

fn write_url(lock: &RwLock<String>, url: &str) {
    match lock.write() {
        Ok(mut u) => *u = url.to_string(),
        Err(poisoned) => *poisoned.into_inner() = url.to_string(),
    }
}

/// Text of the embedded `__NEXT_DATA__` payload, if the page has one.
pub fn extract_embedded_payload(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let script = document.select(&SEL_NEXT_DATA).next()?;
    let text: String = script.text().collect();
    Some(text).filter(|t| !t.trim().is_empty())
}

/// Scrape every listing card on the page, in document order.
///
/// Relative `href`s are resolved against `page_url` when it parses.
pub fn scrape_cards(html: &str, page_url: &str) -> Vec<Card> {
    let base = Url::parse(page_url).ok();
    let document = Html::parse_document(html);
    document
        .select(&SEL_CARD)
        .map(|el| scrape_card(el, base.as_ref()))
        .collect()
}

fn scrape_card(card: ElementRef<'_>, base: Option<&Url>) -> Card {
    let link = card.select(&SEL_LINK).next();
    let raw_id = link
        .and_then(|a| a.value().attr("data-novel-id"))
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string);
    let href = link
        .or_else(|| card.select(&SEL_TITLE).next())
        .and_then(|a| a.value().attr("href"))
        .map(|h| {
            base.and_then(|b| b.join(h).ok())
                .map(|u| u.to_string())
                .unwrap_or_else(|| h.to_string())
        });

    Card {
        raw_id,
        href,
        title: scrape_title(card),
        total_views: first_number(card, &SEL_VIEWS, &RE_VIEWS),
        total_readers: first_number(card, &SEL_READERS, &RE_READERS),
        rating: card
            .select(&SEL_RATING)
            .next()
            .and_then(|el| capture(&element_text(el), &RE_RATING))
            .and_then(|m| m.parse().ok())
            .unwrap_or(0.0),
        genres: card
            .select(&SEL_GENRE)
            .map(|g| element_text(g).trim().to_string())
            .collect(),
        description: card
            .select(&SEL_DESCRIPTION)
            .next()
            .map(|d| element_text(d).trim().to_string())
            .filter(|d| !d.is_empty())
            .unwrap_or_else(|| NO_DESCRIPTION.to_string()),
    }
}

fn scrape_title(card: ElementRef<'_>) -> String {
    let Some(title_el) = card.select(&SEL_TITLE).next() else {
        return NO_TITLE.to_string();
    };

    let mut title = element_text(title_el).trim().to_string();
    if title.starts_with('#') {
        title = title.split(' ').skip(1).collect::<Vec<_>>().join(" ");
    }
    if let Some(raw) = title_el.select(&SEL_RAW_TITLE).next() {
        let raw_text = element_text(raw);
        if !raw_text.is_empty() {
            title = title.replacen(&raw_text, "", 1).trim().to_string();
        }
    }
    title
}

fn first_number(card: ElementRef<'_>, selector: &Selector, pattern: &Regex) -> u64 {
    card.select(selector)
        .next()
        .and_then(|el| capture(&element_text(el), pattern))
        .and_then(|m| m.parse().ok())
        .unwrap_or(0)
}

fn capture(text: &str, pattern: &Regex) -> Option<String> {
    pattern
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

fn element_text(el: ElementRef<'_>) -> String {
    el.text().collect()
}

/// Canonical id embedded in a novel link (`/novel/{id}/...`).
pub fn href_canonical_id(href: &str) -> Option<String> {
    capture(href, &RE_NOVEL_HREF)
}

#[cfg(test)]
pub(crate) mod fixtures {
    /// Build a listing page with the given cards and embedded payload.
    pub fn listing_html(cards: &[(&str, &str)], next_data: Option<&str>) -> String {
        let cards_html: String = cards
            .iter()
            .enumerate()
            .map(|(i, (raw_id, title))| {
                format!(
                    r#"<div class="card">
  <a class="title" href="/en/novel/{raw}/slug" data-novel-id="{raw}">#{n} {title}<span class="rawtitle">原题</span></a>
  <div class="detail-buttons"><span class="detail-line">{views} views</span><span class="detail-line">{readers} Readers</span></div>
  <span class="rating-text">4.25 (12)</span>
  <div class="genres"><span class="genre">Action</span><span class="genre"> Fantasy </span></div>
  <div class="description">  About {title}.  </div>
</div>"#,
                    raw = raw_id,
                    n = i + 1,
                    title = title,
                    views = 1000 + i,
                    readers = 10 + i,
                )
            })
            .collect();
        let script = next_data
            .map(|d| format!(r#"<script id="__NEXT_DATA__" type="application/json">{}</script>"#, d))
            .unwrap_or_default();
        format!(
            r#"<html><body><div class="series-list">{}</div>{}</body></html>"#,
            cards_html, script
        )
    }
}
