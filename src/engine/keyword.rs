use futures::StreamExt;
use rand::seq::IndexedRandom;
use rand::Rng;
use tracing::{debug, info, warn};

use super::{source_set, Engine, FetchOutcome, FetchRequest, Tier, Validity};
use crate::cache::CacheKey;
use crate::items::{NormalizedItem, RawItem};

impl Engine {
    pub(super) async fn resolve_keyword(
        &self,
        request: &FetchRequest,
        keyword: &str,
        validity: &Validity<'_>,
    ) -> FetchOutcome {
        let key = CacheKey::keyword(keyword, request.audience);
        let sources = source_set(request);

        let fast = self.cache.get_fast(&key).await;
        let candidates = self.cached_candidates(fast, &sources, validity);
        if let Some(raw) = self.with_rng(|rng| candidates.choose(rng).cloned()) {
            let item = self.accept(&raw).await;
            return FetchOutcome::found(item, Tier::FastCache, Vec::new()).with_category("cache");
        }

        let persistent = self.cache.get_persistent(&key).await;
        let candidates = self.cached_candidates(persistent, &sources, validity);
        if let Some(raw) = self.with_rng(|rng| candidates.choose(rng).cloned()) {
            let item = self.accept(&raw).await;
            return FetchOutcome::found(item, Tier::PersistentCache, Vec::new())
                .with_category("cache");
        }

        if self.cache.is_disabled(&key).await {
            info!(key = %key, "keyword temporarily disabled, skipping live fetch");
            return FetchOutcome::missing(
                Tier::Disabled,
                Vec::new(),
                vec![format!("keyword '{}' is temporarily disabled", keyword)],
            );
        }

        let limit = self.limit(request);
        let tried = request.sources.clone();
        let mut errors = Vec::new();

        let searches = request.sources.iter().map(|source| async move {
            (source, self.fetcher.search(source, keyword, limit).await)
        });
        let mut found = Vec::new();
        for (source, result) in futures::future::join_all(searches).await {
            match result {
                Ok(items) => found.extend(items.into_iter().filter(|i| validity.is_valid(i))),
                Err(e) => {
                    debug!(source = %source, error = %e, "search skipped");
                    errors.push(e.to_string());
                }
            }
        }
        if let Some(outcome) = self
            .serve_batch(&key, found, Tier::LiveSearch, &tried)
            .await
        {
            return outcome.with_category("search");
        }

        for category in self.categories(request) {
            let fetched = self
                .fetcher
                .fetch_concurrent(&request.sources, category, limit)
                .await;
            errors.extend(fetched.errors);
            let mut by_source = fetched.by_source;
            let found: Vec<RawItem> = request
                .sources
                .iter()
                .filter_map(|source| by_source.remove(source))
                .flatten()
                .filter(|i| validity.is_valid(i))
                .collect();
            if let Some(outcome) = self
                .serve_batch(&key, found, Tier::LiveListing, &tried)
                .await
            {
                return outcome.with_category(category.as_str());
            }
        }

        warn!(key = %key, errors = errors.len(), "no valid items for keyword");
        self.cache.record_failure(&key).await;
        errors.push(format!("no valid items for keyword '{}'", keyword));
        FetchOutcome::missing(Tier::None, tried, errors)
    }

    /// Normalizes a live batch, stores it in both cache tiers and serves one.
    async fn serve_batch(
        &self,
        key: &CacheKey,
        found: Vec<RawItem>,
        tier: Tier,
        tried: &[String],
    ) -> Option<FetchOutcome> {
        if found.is_empty() {
            return None;
        }
        let normalized: Vec<NormalizedItem> = futures::stream::iter(found.iter())
            .map(|raw| self.normalizer.normalize(raw))
            .buffered(self.config.max_concurrent.max(1))
            .collect()
            .await;

        self.cache.put_fast(key, normalized.clone()).await;
        self.cache.put_persistent(key, normalized.clone()).await;
        debug!(key = %key, count = normalized.len(), tier = %tier, "cached live batch");

        let index = self.with_rng(|rng| rng.random_range(0..found.len()));
        let item = normalized.into_iter().nth(index)?;
        self.record(&found[index], &item);
        Some(FetchOutcome::found(item, tier, tried.to_vec()))
    }
}
