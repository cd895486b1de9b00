use std::collections::HashSet;

use rand::seq::{IndexedRandom, SliceRandom};
use tracing::{debug, warn};

use super::{source_set, Engine, FetchOutcome, FetchRequest, Reservoir, Tier, Validity};
use crate::cache::CacheKey;
use crate::error::FetchError;
use crate::items::{ItemFields, NormalizedItem, RawItem};

/// Listing used when a source's random endpoint cannot serve.
const RANDOM_FALLBACK_CATEGORY: &str = "hot";

const MEDIA_EXTENSIONS: &[&str] = &[".jpg", ".jpeg", ".png", ".gif", ".gifv", ".webm", ".mp4"];

fn looks_like_media(item: &RawItem) -> bool {
    let url = item.url().unwrap_or_default().to_lowercase();
    let domain = item.domain().unwrap_or_default().to_lowercase();
    MEDIA_EXTENSIONS.iter().any(|ext| url.ends_with(ext)) || domain.contains("redgifs")
}

fn posted_to(item: &RawItem, source: &str) -> bool {
    item.source().is_some_and(|s| s.eq_ignore_ascii_case(source))
}

impl Engine {
    pub(super) async fn resolve_random(
        &self,
        request: &FetchRequest,
        validity: Validity<'_>,
    ) -> FetchOutcome {
        let key = CacheKey::random(request.audience);
        let sources = source_set(request);

        let fast = self.cache.get_fast(&key).await;
        let persistent = self.cache.get_persistent(&key).await;

        let mut pool = HashSet::new();
        for item in fast.iter().chain(&persistent) {
            pool.insert(item.id.clone());
            pool.insert(item.url.clone());
            pool.insert(item.media_url.clone());
        }
        pool.remove("");

        let fast_ids: HashSet<&str> = fast.iter().map(|i| i.id.as_str()).collect();
        let persistent: Vec<NormalizedItem> = persistent
            .iter()
            .filter(|i| !fast_ids.contains(i.id.as_str()))
            .cloned()
            .collect();
        let candidates: Vec<(Tier, RawItem)> = self
            .cached_candidates(fast.clone(), &sources, &validity)
            .into_iter()
            .map(|raw| (Tier::FastCache, raw))
            .chain(
                self.cached_candidates(persistent, &sources, &validity)
                    .into_iter()
                    .map(|raw| (Tier::PersistentCache, raw)),
            )
            .collect();
        if let Some((tier, raw)) = self.with_rng(|rng| candidates.choose(rng).cloned()) {
            let item = self.accept(&raw).await;
            let tried = vec![item.source.clone()];
            return FetchOutcome::found(item, tier, tried).with_category("cache");
        }

        let validity = validity.with_random_pool(pool);
        let categories = self.categories(request);
        let mut order = request.sources.clone();
        self.with_rng(|rng| order.shuffle(rng));

        for category in categories {
            for source in &order {
                while let Some(raw) = self.buffers.pop(source, category) {
                    if !validity.is_valid(&raw) {
                        continue;
                    }
                    let item = self.accept(&raw).await;
                    self.remember_random(&key, &item).await;
                    return FetchOutcome::found(item, Tier::Warm, vec![source.clone()])
                        .with_category(category.as_str());
                }
            }
        }
        debug!(key = %key, "warm buffers exhausted, fetching live");

        let limit = self.limit(request);
        let mut tried = Vec::new();
        let mut errors = Vec::new();
        for source in &order {
            tried.push(source.clone());
            let Some(category) = self.with_rng(|rng| categories.choose(rng).cloned()) else {
                break;
            };
            let items = match self.fetcher.listing(source, &category, limit).await {
                Ok(items) => items,
                Err(e) => {
                    debug!(source = %source, error = %e, "fallback listing skipped");
                    errors.push(e.to_string());
                    continue;
                }
            };
            let chosen = self.with_rng(|rng| {
                let mut reservoir = Reservoir::new();
                for item in items.into_iter().filter(|i| validity.is_valid(i)) {
                    reservoir.offer(item, rng);
                }
                reservoir.into_inner()
            });
            if let Some(raw) = chosen {
                self.buffers
                    .seed(source, &category, raw.clone(), self.config.warmup_limit);
                let item = self.accept(&raw).await;
                self.remember_random(&key, &item).await;
                return FetchOutcome::found(item, Tier::Fallback, tried).with_category(category);
            }
        }

        let first = &request.sources[0];
        if !tried.contains(first) {
            tried.push(first.clone());
        }
        match self.random_from(first, &validity).await {
            Ok(Some(raw)) => {
                let item = self.accept(&raw).await;
                self.remember_random(&key, &item).await;
                return FetchOutcome::found(item, Tier::Random, tried).with_category("random");
            }
            Ok(None) => {}
            Err(e) => errors.push(e.to_string()),
        }

        warn!(key = %key, tried = ?tried, "every random tier failed");
        errors.push("all fallbacks failed".to_string());
        FetchOutcome::missing(Tier::None, tried, errors)
    }

    /// Tries the source's random endpoint, degrading to a uniform pick from
    /// its hot listing when the endpoint is unavailable or unhelpful.
    async fn random_from(
        &self,
        source: &str,
        validity: &Validity<'_>,
    ) -> Result<Option<RawItem>, FetchError> {
        match self.fetcher.random(source).await {
            Ok(Some(raw)) if posted_to(&raw, source) && validity.is_valid(&raw) => {
                debug!(source, "served by random endpoint");
                return Ok(Some(raw));
            }
            Ok(_) => debug!(source, "random endpoint gave nothing usable"),
            Err(FetchError::Unavailable(_)) => {
                debug!(source, "random endpoint unavailable, using listing")
            }
            Err(e) => debug!(source, error = %e, "random endpoint failed"),
        }

        let items = self
            .fetcher
            .listing(
                source,
                RANDOM_FALLBACK_CATEGORY,
                self.config.random_fallback_limit,
            )
            .await?;
        Ok(self.with_rng(|rng| {
            let mut reservoir = Reservoir::new();
            items
                .into_iter()
                .filter(|i| posted_to(i, source) && looks_like_media(i) && validity.is_valid(i))
                .for_each(|i| reservoir.offer(i, rng));
            reservoir.into_inner()
        }))
    }

    /// Adds a served item to the random pool in both tiers.
    async fn remember_random(&self, key: &CacheKey, item: &NormalizedItem) {
        self.cache.put_fast(key, vec![item.clone()]).await;
        self.cache.put_persistent(key, vec![item.clone()]).await;
    }
}
