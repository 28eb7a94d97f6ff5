//! Navigation sources: where route changes come from.
//!
//! [`ScriptedNavigation`] replays a fixed list of URLs (`nlens browse`).
//! [`PollingNavigation`] watches a URL provider on an interval and emits a
//! URL only once it has stayed the same for the debounce window, so a burst
//! of history updates produces one route change (`nlens watch`).

use std::collections::VecDeque;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::config::NavigationConfig;
use crate::orchestrator::RunOutcome;
use crate::session::{Session, ViewOutcome};

#[async_trait]
pub trait NavigationSource: Send {
    /// The next URL the page moved to, or `None` when navigation is over.
    async fn next_url(&mut self) -> Option<String>;
}

pub struct ScriptedNavigation {
    urls: VecDeque<String>,
}

impl ScriptedNavigation {
    pub fn new<I, S>(urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            urls: urls.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl NavigationSource for ScriptedNavigation {
    async fn next_url(&mut self) -> Option<String> {
        self.urls.pop_front()
    }
}

/// Reads the current URL. `None` ends the navigation.
pub type UrlProvider = Box<dyn FnMut() -> Option<String> + Send>;

/// Provider reading the current URL from a file another process rewrites.
///
/// A missing or empty file ends the navigation.
pub fn file_url_provider(path: PathBuf) -> UrlProvider {
    Box::new(move || {
        std::fs::read_to_string(&path)
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    })
}

pub struct PollingNavigation {
    provider: UrlProvider,
    poll: Duration,
    debounce: Duration,
    last: Option<String>,
}

impl PollingNavigation {
    pub fn new(provider: UrlProvider, config: &NavigationConfig) -> Self {
        Self {
            provider,
            poll: Duration::from_millis(config.poll_interval_ms.max(1)),
            debounce: Duration::from_millis(config.debounce_ms),
            last: None,
        }
    }

    /// Treat `url` as already seen so it is not reported again.
    pub fn starting_at(mut self, url: &str) -> Self {
        self.last = Some(url.to_string());
        self
    }
}

#[async_trait]
impl NavigationSource for PollingNavigation {
    async fn next_url(&mut self) -> Option<String> {
        let mut ticker = interval(self.poll);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut pending: Option<(String, Instant)> = None;

        loop {
            ticker.tick().await;
            let current = (self.provider)()?;

            if self.last.as_deref() == Some(current.as_str()) {
                pending = None;
                continue;
            }

            match &pending {
                Some((url, since)) if *url == current => {
                    if since.elapsed() >= self.debounce {
                        self.last = Some(current.clone());
                        return Some(current);
                    }
                }
                _ => {
                    debug!(url = %current, "url changed; waiting for it to settle");
                    if self.debounce.is_zero() {
                        self.last = Some(current.clone());
                        return Some(current);
                    }
                    pending = Some((current, Instant::now()));
                }
            }
        }
    }
}

/// Follow every route change from `nav`, refreshing the view each time and
/// optionally running the batch on each new page.
pub async fn follow(
    session: &Session,
    nav: &mut dyn NavigationSource,
    analyze: bool,
) -> Result<Vec<(String, ViewOutcome, Option<RunOutcome>)>> {
    let mut visited = Vec::new();

    while let Some(url) = nav.next_url().await {
        let view = session.handle_route_change(&url).await?;
        info!(url = %url, ?view, "route handled");

        let run = match view {
            ViewOutcome::Displayed(_) if analyze => Some(session.analyze().await?),
            _ => None,
        };
        visited.push((url, view, run));
    }

    Ok(visited)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use crate::config::Config;
    use crate::orchestrator::fixtures::{Harness, FOR_YOU};

    const CARDS: &[(&str, &str)] = &[("r1", "Sword God"), ("r2", "Tea House")];
    const PAIRS: &[(&str, &str)] = &[("r1", "11"), ("r2", "22")];
    const NOVEL_PAGE: &str = "https://wtr-lab.com/en/novel/11/sword-god";

    fn nav_config() -> NavigationConfig {
        NavigationConfig {
            debounce_ms: 500,
            poll_interval_ms: 100,
        }
    }

    /// Provider that reads from a shared slot.
    fn shared(slot: Arc<Mutex<Option<String>>>) -> UrlProvider {
        Box::new(move || slot.lock().unwrap().clone())
    }

    #[tokio::test]
    async fn test_scripted_navigation_replays_in_order() {
        let mut nav = ScriptedNavigation::new(["a", "b"]);
        assert_eq!(nav.next_url().await.as_deref(), Some("a"));
        assert_eq!(nav.next_url().await.as_deref(), Some("b"));
        assert_eq!(nav.next_url().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_polling_emits_only_settled_changes() {
        let slot = Arc::new(Mutex::new(Some("https://x/1".to_string())));
        let mut nav = PollingNavigation::new(shared(slot.clone()), &nav_config()).starting_at("https://x/1");

        let writer = {
            let slot = slot.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(1000)).await;
                *slot.lock().unwrap() = Some("https://x/2".into());
                tokio::time::sleep(Duration::from_millis(200)).await;
                *slot.lock().unwrap() = Some("https://x/3".into());
            })
        };

        let start = Instant::now();
        assert_eq!(nav.next_url().await.as_deref(), Some("https://x/3"));
        assert!(start.elapsed() >= Duration::from_millis(1700));
        writer.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_polling_ends_when_provider_does() {
        let slot = Arc::new(Mutex::new(None));
        let mut nav = PollingNavigation::new(shared(slot), &nav_config());
        assert_eq!(nav.next_url().await, None);
    }

    #[test]
    fn test_file_provider_reads_trimmed_url() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("current-url");
        let mut provider = file_url_provider(path.clone());
        assert_eq!(provider(), None);

        std::fs::write(&path, "https://x/1\n").unwrap();
        assert_eq!(provider().as_deref(), Some("https://x/1"));

        std::fs::write(&path, "  ").unwrap();
        assert_eq!(provider(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_follow_analyzes_only_displayed_pages() {
        let h = Harness::new(CARDS, PAIRS, Some("key")).await;
        let session = Session::new(h.orchestrator.clone(), Config::minimal().site);
        let mut nav = ScriptedNavigation::new([FOR_YOU, FOR_YOU, NOVEL_PAGE]);

        let visited = follow(&session, &mut nav, true).await.unwrap();
        assert_eq!(
            visited,
            vec![
                (FOR_YOU.to_string(), ViewOutcome::Displayed(0), Some(RunOutcome::Analyzed(1))),
                (FOR_YOU.to_string(), ViewOutcome::Unchanged, None),
                (NOVEL_PAGE.to_string(), ViewOutcome::Unsupported, None),
            ]
        );
        assert_eq!(h.transport.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_follow_without_analyze_never_calls_gemini() {
        let h = Harness::new(CARDS, PAIRS, Some("key")).await;
        let session = Session::new(h.orchestrator.clone(), Config::minimal().site);
        let mut nav = ScriptedNavigation::new([FOR_YOU, NOVEL_PAGE]);

        let visited = follow(&session, &mut nav, false).await.unwrap();
        let views: Vec<_> = visited.iter().map(|(_, v, r)| (v.clone(), r.clone())).collect();
        assert_eq!(
            views,
            vec![(ViewOutcome::Displayed(0), None), (ViewOutcome::Unsupported, None)]
        );
        assert_eq!(h.transport.calls(), 0);
    }
}
