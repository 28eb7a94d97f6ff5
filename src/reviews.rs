//! Review Fetcher: bounded, most-liked-first review retrieval.
//!
//! Page 0 is always requested. If it already carries enough reviews with a
//! comment, nothing more is fetched; otherwise pages 1.. are fetched up to
//! the page ceiling, stopping at the first empty or failed page. Faults are
//! never retried here and never surface as errors: the caller treats an
//! empty result as "no signal".

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use tracing::{debug, warn};

use novel_lens_core::models::ReviewRecord;
use novel_lens_core::reviews::{count_with_comments, ReviewPage};

use crate::config::ReviewsConfig;

pub const SORT_MOST_LIKED: &str = "most_liked";

/// One page of the host's review endpoint.
#[async_trait]
pub trait ReviewApi: Send + Sync {
    async fn fetch_page(&self, canonical_id: &str, page: u32) -> Result<ReviewPage>;
}

/// `GET {base}/api/review/get?serie_id=..&page=..&sort=most_liked`
pub struct HttpReviewApi {
    client: reqwest::Client,
    base_url: String,
}

impl HttpReviewApi {
    pub fn new(base_url: &str, timeout_secs: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl ReviewApi for HttpReviewApi {
    async fn fetch_page(&self, canonical_id: &str, page: u32) -> Result<ReviewPage> {
        let url = format!("{}/api/review/get", self.base_url);
        let page_param = page.to_string();
        let response = self
            .client
            .get(&url)
            .query(&[
                ("serie_id", canonical_id),
                ("page", page_param.as_str()),
                ("sort", SORT_MOST_LIKED),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            bail!("review API returned {}", status);
        }
        Ok(response.json::<ReviewPage>().await?)
    }
}

pub struct ReviewFetcher {
    config: ReviewsConfig,
    api: Arc<dyn ReviewApi>,
}

impl ReviewFetcher {
    pub fn new(api: Arc<dyn ReviewApi>, config: ReviewsConfig) -> Self {
        Self { config, api }
    }

    /// Fetch reviews for a canonical id, most liked first.
    pub async fn fetch_reviews(&self, canonical_id: &str) -> Vec<ReviewRecord> {
        debug!(canonical_id, page = 0, "fetching reviews");
        let first = match self.api.fetch_page(canonical_id, 0).await {
            Ok(page) => page,
            Err(e) => {
                warn!(canonical_id, page = 0, error = %e, "review fetch failed");
                return Vec::new();
            }
        };

        if !first.has_items() {
            debug!(canonical_id, "no reviews on page 0");
            return Vec::new();
        }

        let mut reviews = first.data;
        let with_comments = count_with_comments(&reviews);
        if with_comments >= self.config.sufficient_comments {
            debug!(canonical_id, with_comments, "page 0 is sufficient; stopping");
            return reviews;
        }

        for page in 1..self.config.max_pages {
            tokio::time::sleep(Duration::from_millis(self.config.page_delay_ms)).await;
            debug!(canonical_id, page, "fetching reviews");

            match self.api.fetch_page(canonical_id, page).await {
                Ok(p) if p.has_items() => reviews.extend(p.data),
                Ok(_) => {
                    debug!(canonical_id, page, "empty review page; stopping");
                    break;
                }
                Err(e) => {
                    warn!(canonical_id, page, error = %e, "review fetch failed; stopping");
                    break;
                }
            }
        }

        reviews
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Serves scripted pages and records every request.
    struct ScriptedApi {
        pages: HashMap<u32, Result<ReviewPage, String>>,
        calls: Mutex<Vec<u32>>,
    }

    impl ScriptedApi {
        fn new(pages: Vec<(u32, Result<ReviewPage, String>)>) -> Self {
            Self {
                pages: pages.into_iter().collect(),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ReviewApi for ScriptedApi {
        async fn fetch_page(&self, _id: &str, page: u32) -> Result<ReviewPage> {
            self.calls.lock().unwrap().push(page);
            match self.pages.get(&page) {
                Some(Ok(p)) => Ok(p.clone()),
                Some(Err(e)) => bail!("{}", e),
                None => Ok(ReviewPage {
                    success: true,
                    data: vec![],
                }),
            }
        }
    }

    fn page(n: usize, with_comment: bool) -> ReviewPage {
        ReviewPage {
            success: true,
            data: (0..n)
                .map(|i| ReviewRecord {
                    username: Some(format!("user{}", i)),
                    rate: 4.0,
                    comment: with_comment.then(|| format!("comment {}", i)),
                })
                .collect(),
        }
    }

    fn fetcher(api: ScriptedApi) -> (ReviewFetcher, Arc<ScriptedApi>) {
        let api = Arc::new(api);
        (ReviewFetcher::new(api.clone(), ReviewsConfig::default()), api)
    }

    #[tokio::test(start_paused = true)]
    async fn test_sufficient_first_page_stops_early() {
        let (f, api) = fetcher(ScriptedApi::new(vec![(0, Ok(page(5, true))), (1, Ok(page(5, true)))]));
        let reviews = f.fetch_reviews("1").await;
        assert_eq!(reviews.len(), 5);
        assert_eq!(*api.calls.lock().unwrap(), vec![0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_second_page_stops_loop() {
        let (f, api) = fetcher(ScriptedApi::new(vec![(0, Ok(page(2, true)))]));
        let reviews = f.fetch_reviews("1").await;
        assert_eq!(reviews.len(), 2);
        assert_eq!(*api.calls.lock().unwrap(), vec![0, 1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_page_ceiling() {
        let pages = (0..10).map(|p| (p, Ok(page(1, false)))).collect();
        let (f, api) = fetcher(ScriptedApi::new(pages));
        let reviews = f.fetch_reviews("1").await;
        assert_eq!(reviews.len(), 5);
        assert_eq!(*api.calls.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_page_error_is_empty() {
        let (f, api) = fetcher(ScriptedApi::new(vec![(0, Err("500".into()))]));
        assert!(f.fetch_reviews("1").await.is_empty());
        assert_eq!(*api.calls.lock().unwrap(), vec![0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_later_error_keeps_gathered() {
        let (f, api) = fetcher(ScriptedApi::new(vec![
            (0, Ok(page(1, true))),
            (1, Ok(page(2, false))),
            (2, Err("timeout".into())),
        ]));
        assert_eq!(f.fetch_reviews("1").await.len(), 3);
        assert_eq!(*api.calls.lock().unwrap(), vec![0, 1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_between_pages() {
        let (f, _api) = fetcher(ScriptedApi::new(vec![(0, Ok(page(1, true))), (1, Ok(page(1, true)))]));
        let start = tokio::time::Instant::now();
        f.fetch_reviews("1").await;
        // Pages 1 and 2 were requested, each after a 100 ms pause.
        assert!(start.elapsed() >= Duration::from_millis(200));
    }
}
