use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::{debug, error, warn};

use crate::error::FetchError;
use crate::items::RawItem;
use crate::reddit::SourceClient;
use crate::throttle::Throttle;

/// Attempts per call and the base of the exponential backoff between them.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub retries: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    /// Sleep before the attempt following failed attempt number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.backoff.saturating_mul(factor)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 3,
            backoff: Duration::from_secs(1),
        }
    }
}

/// Results of one fan-out listing fetch. Sources that produced nothing are
/// absent from `by_source`; hard failures are described in `errors`.
#[derive(Debug, Default)]
pub struct MultiFetch {
    pub by_source: HashMap<String, Vec<RawItem>>,
    pub errors: Vec<String>,
}

/// Retrying, throttled, concurrency-bounded access to a `SourceClient`.
pub struct Fetcher {
    client: Arc<dyn SourceClient>,
    throttle: Arc<dyn Throttle>,
    retry: RetryPolicy,
    listing_permits: Semaphore,
    search_permits: Semaphore,
}

impl Fetcher {
    pub fn new(
        client: Arc<dyn SourceClient>,
        throttle: Arc<dyn Throttle>,
        retry: RetryPolicy,
        max_concurrent: usize,
    ) -> Self {
        Self {
            client,
            throttle,
            retry: RetryPolicy {
                retries: retry.retries.max(1),
                ..retry
            },
            listing_permits: Semaphore::new(max_concurrent.max(1)),
            search_permits: Semaphore::new(max_concurrent.max(1)),
        }
    }

    /// Runs `call` until it succeeds, is denied, or attempts run out.
    /// Exhausted transient failures yield `T::default()`.
    async fn with_retry<T, F, Fut>(
        &self,
        op: &'static str,
        source: &str,
        target: &str,
        mut call: F,
    ) -> Result<T, FetchError>
    where
        T: Default,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let retries = self.retry.retries;
        for attempt in 1..=retries {
            self.throttle.acquire().await;
            match call().await {
                Ok(value) => return Ok(value),
                Err(FetchError::Unavailable(name)) => {
                    warn!(op, source, target, "source unavailable, not retrying");
                    return Err(FetchError::Unavailable(name));
                }
                Err(e) => {
                    warn!(op, source, target, attempt, retries, error = %e, "fetch attempt failed");
                    if attempt < retries {
                        tokio::time::sleep(self.retry.delay(attempt)).await;
                    }
                }
            }
        }
        error!(op, source, target, retries, "giving up after retries");
        Ok(T::default())
    }

    /// Listing Fetcher: one source, one category.
    pub async fn listing(
        &self,
        source: &str,
        category: &str,
        limit: usize,
    ) -> Result<Vec<RawItem>, FetchError> {
        let _permit = self.listing_permits.acquire().await.ok();
        self.with_retry("listing", source, category, || {
            self.client.listing(source, category, limit)
        })
        .await
    }

    /// Search Fetcher: keyword-matched items from one source.
    pub async fn search(
        &self,
        source: &str,
        keyword: &str,
        limit: usize,
    ) -> Result<Vec<RawItem>, FetchError> {
        let _permit = self.search_permits.acquire().await.ok();
        self.with_retry("search", source, keyword, || {
            self.client.search(source, keyword, limit)
        })
        .await
    }

    /// Single throttled attempt at the source's random endpoint.
    pub async fn random(&self, source: &str) -> Result<Option<RawItem>, FetchError> {
        self.throttle.acquire().await;
        self.client.random(source).await
    }

    /// Fetches one category from every source under the shared listing
    /// permits. Individual failures are recorded, never propagated.
    pub async fn fetch_concurrent(
        &self,
        sources: &[String],
        category: &str,
        limit: usize,
    ) -> MultiFetch {
        debug!(category, sources = sources.len(), "starting concurrent fetch");

        let calls = sources.iter().map(|source| async move {
            (source, self.listing(source, category, limit).await)
        });
        let results = futures::future::join_all(calls).await;

        let mut out = MultiFetch::default();
        for (source, result) in results {
            match result {
                Ok(items) if !items.is_empty() => {
                    out.by_source.insert(source.clone(), items);
                }
                Ok(_) => {}
                Err(e) => out.errors.push(e.to_string()),
            }
        }
        debug!(
            category,
            produced = out.by_source.len(),
            failed = out.errors.len(),
            "concurrent fetch complete"
        );
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{post, MockSource};
    use crate::throttle::RateThrottle;
    use tokio::time::Instant;

    fn fetcher(source: Arc<MockSource>, max_concurrent: usize) -> Fetcher {
        Fetcher::new(
            source,
            Arc::new(RateThrottle::new(Duration::ZERO)),
            RetryPolicy::default(),
            max_concurrent,
        )
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay(1), Duration::from_secs(1));
        assert_eq!(policy.delay(2), Duration::from_secs(2));
        assert_eq!(policy.delay(3), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_back_off_then_succeed() {
        let source = Arc::new(
            MockSource::new()
                .with_listing("memes", "hot", vec![post("a", "memes", "first")])
                .fail_next(2),
        );
        let fetcher = fetcher(source.clone(), 5);

        let start = Instant::now();
        let items = fetcher.listing("memes", "hot", 10).await.unwrap();
        assert_eq!(items.len(), 1);
        assert!(start.elapsed() >= Duration::from_secs(3));
        assert_eq!(source.listing_calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn search_retries_transient_failures() {
        let source = Arc::new(
            MockSource::new()
                .with_search("memes", vec![post("a", "memes", "cat")])
                .fail_next(2),
        );
        let fetcher = fetcher(source.clone(), 5);

        let start = Instant::now();
        let items = fetcher.search("memes", "cat", 10).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(source.search_calls(), 3);
        assert!(start.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn every_request_kind_shares_the_throttle() {
        let source = Arc::new(
            MockSource::new()
                .with_listing("memes", "hot", vec![post("a", "memes", "x")])
                .with_search("memes", vec![post("b", "memes", "cat")])
                .with_random("memes", post("c", "memes", "y")),
        );
        let fetcher = Fetcher::new(
            source.clone(),
            Arc::new(RateThrottle::new(Duration::from_secs(1))),
            RetryPolicy::default(),
            5,
        );

        let start = Instant::now();
        fetcher.listing("memes", "hot", 10).await.unwrap();
        fetcher.search("memes", "cat", 10).await.unwrap();
        fetcher.random("memes").await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(2));
        assert_eq!(source.calls().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_yield_empty_without_error() {
        let source = Arc::new(
            MockSource::new()
                .with_listing("memes", "hot", vec![post("a", "memes", "first")])
                .fail_next(3),
        );
        let fetcher = fetcher(source.clone(), 5);

        let start = Instant::now();
        let items = fetcher.listing("memes", "hot", 10).await.unwrap();
        assert!(items.is_empty());
        assert_eq!(source.listing_calls(), 3);
        // 1s + 2s between the three attempts, nothing after the last
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(3));
        assert!(elapsed < Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn denied_source_is_not_retried() {
        let source = Arc::new(MockSource::new().deny("private"));
        let fetcher = fetcher(source.clone(), 5);

        let err = fetcher.listing("private", "hot", 10).await.unwrap_err();
        assert!(err.is_unavailable());
        assert_eq!(source.listing_calls(), 1);

        let err = fetcher.search("private", "cat", 10).await.unwrap_err();
        assert!(err.is_unavailable());
        assert_eq!(source.search_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_fetch_omits_empty_and_failed_sources() {
        let source = Arc::new(
            MockSource::new()
                .with_listing("memes", "hot", vec![post("a", "memes", "x")])
                .with_listing("pics", "hot", vec![post("b", "pics", "y")])
                .deny("private"),
        );
        let fetcher = fetcher(source, 5);
        let sources: Vec<String> = ["memes", "pics", "empty", "private"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        let out = fetcher.fetch_concurrent(&sources, "hot", 10).await;
        assert_eq!(out.by_source.len(), 2);
        assert!(out.by_source.contains_key("memes"));
        assert!(out.by_source.contains_key("pics"));
        assert!(!out.by_source.contains_key("empty"));
        assert_eq!(out.errors.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrency_is_capped() {
        let source = Arc::new(MockSource::new().with_delay(Duration::from_millis(100)));
        let fetcher = fetcher(source.clone(), 2);
        let sources: Vec<String> = (0..6).map(|i| format!("s{}", i)).collect();

        fetcher.fetch_concurrent(&sources, "hot", 10).await;
        assert_eq!(source.listing_calls(), 6);
        assert_eq!(source.max_in_flight(), 2);
    }
}
