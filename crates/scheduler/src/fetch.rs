// crates/scheduler/src/fetch.rs
//! Interfaces to the external fetch and render collaborators, plus the
//! rate-limited, read-through-cached fetch wrapper the executor uses.

use async_trait::async_trait;
use snoovault_core::{RateLimiter, ResponseCache};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request timed out for {0}")]
    Timeout(String),

    #[error("request failed for {url}: {reason}")]
    Request { url: String, reason: String },

    #[error("malformed response for {0}")]
    Malformed(String),
}

#[derive(Debug, Error)]
#[error("render failed for {url}: {reason}")]
pub struct RenderError {
    pub url: String,
    pub reason: String,
}

/// The external Reddit fetcher, seen through the interface the engine
/// consumes: URL listing per subreddit and raw post JSON per URL.
#[async_trait]
pub trait PostFetcher: Send + Sync {
    /// Candidate post URLs for a subreddit, best-first, at most `limit`.
    async fn subreddit_post_urls(
        &self,
        subreddit: &str,
        limit: usize,
    ) -> Result<Vec<String>, FetchError>;

    /// The two-element listing JSON for one post URL.
    async fn fetch_post_json(&self, url: &str) -> Result<serde_json::Value, FetchError>;

    /// Whether requests carry an access token (part of the cache key).
    fn is_authenticated(&self) -> bool {
        false
    }
}

/// The external post renderer: post JSON to Markdown, Markdown to HTML.
pub trait PostRenderer: Send + Sync {
    fn render_markdown(
        &self,
        post_data: &serde_json::Value,
        replies: &[serde_json::Value],
        url: &str,
    ) -> Result<String, RenderError>;

    fn markdown_to_html(&self, markdown: &str) -> String;
}

/// Read-through cache plus sliding-window admission around a fetcher.
pub struct CachedFetcher {
    fetcher: Arc<dyn PostFetcher>,
    cache: ResponseCache<serde_json::Value>,
    limiter: RateLimiter,
}

impl CachedFetcher {
    pub fn new(
        fetcher: Arc<dyn PostFetcher>,
        cache: ResponseCache<serde_json::Value>,
        limiter: RateLimiter,
    ) -> Self {
        Self {
            fetcher,
            cache,
            limiter,
        }
    }

    /// Fetch post JSON, serving fresh cached entries without admission.
    /// On a rate-limit miss the call sleeps out the window before fetching.
    pub async fn fetch_post_json(&self, url: &str) -> Result<serde_json::Value, FetchError> {
        let key = format!("{url}:{}", self.fetcher.is_authenticated());

        if let Some(cached) = self.cache.get(&key) {
            debug!(url, "using cached post data");
            return Ok(cached);
        }

        if !self.limiter.is_allowed() {
            let wait = self.limiter.wait_time();
            info!(url, wait_secs = wait.as_secs_f64(), "rate limit reached, waiting");
            tokio::time::sleep(wait).await;
            let _ = self.limiter.is_allowed();
        }

        let data = self.fetcher.fetch_post_json(url).await?;
        self.cache.insert(key, data.clone());
        Ok(data)
    }

    pub async fn subreddit_post_urls(
        &self,
        subreddit: &str,
        limit: usize,
    ) -> Result<Vec<String>, FetchError> {
        self.fetcher.subreddit_post_urls(subreddit, limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingFetcher {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PostFetcher for CountingFetcher {
        async fn subreddit_post_urls(
            &self,
            _subreddit: &str,
            _limit: usize,
        ) -> Result<Vec<String>, FetchError> {
            Ok(vec![])
        }

        async fn fetch_post_json(&self, url: &str) -> Result<serde_json::Value, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(serde_json::json!({ "url": url }))
        }
    }

    #[tokio::test]
    async fn test_second_fetch_is_served_from_cache() {
        let fetcher = Arc::new(CountingFetcher {
            calls: AtomicUsize::new(0),
        });
        let cached = CachedFetcher::new(
            Arc::clone(&fetcher) as Arc<dyn PostFetcher>,
            ResponseCache::default(),
            RateLimiter::default(),
        );

        let a = cached.fetch_post_json("https://redd.it/abc").await.unwrap();
        let b = cached.fetch_post_json("https://redd.it/abc").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);

        cached.fetch_post_json("https://redd.it/xyz").await.unwrap();
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_fetch_error_propagates() {
        struct FailingFetcher;

        #[async_trait]
        impl PostFetcher for FailingFetcher {
            async fn subreddit_post_urls(
                &self,
                _subreddit: &str,
                _limit: usize,
            ) -> Result<Vec<String>, FetchError> {
                Ok(vec![])
            }

            async fn fetch_post_json(
                &self,
                url: &str,
            ) -> Result<serde_json::Value, FetchError> {
                Err(FetchError::Timeout(url.to_string()))
            }
        }

        let cached = CachedFetcher::new(
            Arc::new(FailingFetcher),
            ResponseCache::default(),
            RateLimiter::default(),
        );
        assert!(matches!(
            cached.fetch_post_json("https://redd.it/abc").await,
            Err(FetchError::Timeout(_))
        ));
    }
}
