mod keyword;
mod outcome;
mod random;
mod sample;
mod validity;


pub use outcome::{FetchOutcome, Tier};
pub use sample::Reservoir;
pub use validity::{Rejection, Validity};

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info};

use crate::blocklist::{BlocklistProvider, StaticBlocklist};
use crate::cache::{KeywordCache, NoopKeywordCache};
use crate::dedup::DedupCaches;
use crate::fetch::{Fetcher, RetryPolicy};
use crate::items::{
    Audience, CachedItem, DefaultNormalizer, ItemFields, NormalizedItem, Normalizer, RawItem,
};
use crate::reddit::{RedditClient, SourceClient};
use crate::state::EngineConfig;
use crate::throttle::{RateThrottle, Throttle};
use crate::warm::scheduler::WarmupPlan;
use crate::warm::{WarmBufferStore, WarmupScheduler};

/// Caller-supplied predicate every candidate must also satisfy.
pub type ItemFilter = Arc<dyn Fn(&RawItem) -> bool + Send + Sync>;

/// One resolution request.
#[derive(Clone)]
pub struct FetchRequest {
    pub sources: Vec<String>,
    pub keyword: Option<String>,
    pub audience: Audience,
    /// Recently served ids the caller does not want again.
    pub exclude: HashSet<String>,
    pub filter: Option<ItemFilter>,
    /// Listing preference order; the engine's configured order when unset.
    pub categories: Option<Vec<String>>,
    /// Page size for live fetches; the configured listing limit when unset.
    pub limit: Option<usize>,
}

impl FetchRequest {
    pub fn new<I, S>(sources: I, audience: Audience) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            sources: sources.into_iter().map(Into::into).collect(),
            keyword: None,
            audience,
            exclude: HashSet::new(),
            filter: None,
            categories: None,
            limit: None,
        }
    }

    pub fn keyword(mut self, keyword: impl Into<String>) -> Self {
        self.keyword = Some(keyword.into());
        self
    }

    pub fn excluding<I: IntoIterator<Item = String>>(mut self, ids: I) -> Self {
        self.exclude.extend(ids);
        self
    }

    pub fn filter(mut self, filter: ItemFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn categories<I, S>(mut self, categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.categories = Some(categories.into_iter().map(Into::into).collect());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Trimmed keyword; blank keywords count as none.
    fn search_term(&self) -> Option<&str> {
        self.keyword
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
    }
}

/// Builder for `Engine`. Anything not supplied gets the production default,
/// except the keyword cache which defaults to `NoopKeywordCache`.
pub struct EngineBuilder {
    config: EngineConfig,
    client: Option<Arc<dyn SourceClient>>,
    throttle: Option<Arc<dyn Throttle>>,
    cache: Option<Arc<dyn KeywordCache>>,
    normalizer: Option<Arc<dyn Normalizer>>,
    blocklist: Option<Arc<dyn BlocklistProvider>>,
}

impl EngineBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            client: None,
            throttle: None,
            cache: None,
            normalizer: None,
            blocklist: None,
        }
    }

    pub fn client(mut self, client: Arc<dyn SourceClient>) -> Self {
        self.client = Some(client);
        self
    }

    pub fn throttle(mut self, throttle: Arc<dyn Throttle>) -> Self {
        self.throttle = Some(throttle);
        self
    }

    pub fn keyword_cache(mut self, cache: Arc<dyn KeywordCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn normalizer(mut self, normalizer: Arc<dyn Normalizer>) -> Self {
        self.normalizer = Some(normalizer);
        self
    }

    pub fn blocklist(mut self, blocklist: Arc<dyn BlocklistProvider>) -> Self {
        self.blocklist = Some(blocklist);
        self
    }

    pub fn build(self) -> Result<Engine> {
        let config = self.config;
        let client = match self.client {
            Some(client) => client,
            None => Arc::new(RedditClient::from_config(&config)?),
        };
        let throttle = self
            .throttle
            .unwrap_or_else(|| Arc::new(RateThrottle::new(config.throttle_interval)));
        let fetcher = Arc::new(Fetcher::new(
            client,
            throttle,
            RetryPolicy {
                retries: config.retries,
                backoff: config.backoff,
            },
            config.max_concurrent,
        ));
        let buffers = Arc::new(WarmBufferStore::new());
        let warmup = WarmupScheduler::new(
            fetcher.clone(),
            buffers.clone(),
            WarmupPlan::from_config(&config),
        );
        let rng = match config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        Ok(Engine {
            dedup: DedupCaches::new(
                config.id_cache_capacity,
                config.id_cache_ttl,
                config.media_cache_capacity,
                config.media_cache_ttl,
            ),
            cache: self.cache.unwrap_or_else(|| Arc::new(NoopKeywordCache)),
            normalizer: self
                .normalizer
                .unwrap_or_else(|| Arc::new(DefaultNormalizer::default())),
            blocklist: self
                .blocklist
                .unwrap_or_else(|| Arc::new(StaticBlocklist::default())),
            rng: Mutex::new(rng),
            config,
            fetcher,
            buffers,
            warmup,
        })
    }
}

/// The resolution engine. Owns every piece of shared acquisition state.
pub struct Engine {
    config: EngineConfig,
    fetcher: Arc<Fetcher>,
    buffers: Arc<WarmBufferStore>,
    dedup: DedupCaches,
    cache: Arc<dyn KeywordCache>,
    normalizer: Arc<dyn Normalizer>,
    blocklist: Arc<dyn BlocklistProvider>,
    warmup: WarmupScheduler,
    rng: Mutex<StdRng>,
}

impl Engine {
    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn buffers(&self) -> &WarmBufferStore {
        &self.buffers
    }

    pub fn dedup(&self) -> &DedupCaches {
        &self.dedup
    }

    /// Starts background warmup for `sources`. No-op while already running.
    pub fn start_warmup(&self, sources: Vec<String>) -> bool {
        self.warmup.start(sources)
    }

    pub fn warmup_running(&self) -> bool {
        self.warmup.is_running()
    }

    /// Cancels warmup and waits for the task to exit.
    pub async fn shutdown(&self) {
        self.warmup.stop().await;
    }

    /// Resolves one item through the tiered acquisition order. Never fails;
    /// an absent item comes with the reasons.
    pub async fn resolve(&self, request: FetchRequest) -> FetchOutcome {
        if request.sources.is_empty() {
            return FetchOutcome::missing(
                Tier::None,
                Vec::new(),
                vec!["no sources requested".to_string()],
            );
        }

        let keyword = request.search_term().map(str::to_string);
        let validity = Validity {
            dedup: &self.dedup,
            blocklist: self.blocklist.as_ref(),
            exclude: &request.exclude,
            filter: request.filter.as_ref(),
            keyword: keyword.as_deref().map(str::to_lowercase),
            random_pool: HashSet::new(),
        };

        let outcome = match keyword.as_deref() {
            Some(keyword) => self.resolve_keyword(&request, keyword, &validity).await,
            None => self.resolve_random(&request, validity).await,
        };

        match &outcome.item {
            Some(item) => info!(
                tier = %outcome.tier,
                source = %item.source,
                id = %item.id,
                "resolved item"
            ),
            None => info!(
                tier = %outcome.tier,
                tried = ?outcome.tried,
                errors = ?outcome.errors,
                "resolution failed"
            ),
        }
        outcome
    }

    fn categories<'r>(&'r self, request: &'r FetchRequest) -> &'r [String] {
        request
            .categories
            .as_deref()
            .unwrap_or(&self.config.categories)
    }

    fn limit(&self, request: &FetchRequest) -> usize {
        request.limit.unwrap_or(self.config.listing_limit)
    }

    fn with_rng<T>(&self, f: impl FnOnce(&mut StdRng) -> T) -> T {
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut rng)
    }

    /// Normalizes the chosen candidate and marks it as served.
    async fn accept(&self, raw: &RawItem) -> NormalizedItem {
        let item = self.normalizer.normalize(raw).await;
        self.record(raw, &item);
        item
    }

    fn record(&self, raw: &RawItem, item: &NormalizedItem) {
        let urls = raw
            .url()
            .into_iter()
            .chain(raw.media_url())
            .chain([item.url.as_str(), item.media_url.as_str()]);
        self.dedup.record(&item.id, urls);
        if let Some(id) = raw.id() {
            if id != item.id {
                self.dedup.ids.insert(id);
            }
        }
    }

    /// Wraps cached entries and keeps those usable for this request.
    fn cached_candidates(
        &self,
        items: Vec<NormalizedItem>,
        sources: &HashSet<String>,
        validity: &Validity<'_>,
    ) -> Vec<RawItem> {
        let total = items.len();
        let candidates: Vec<RawItem> = items
            .into_iter()
            .filter(|item| sources.contains(&item.source.to_lowercase()))
            .filter(|item| !item.media_url.is_empty())
            .map(|item| RawItem::from(CachedItem::new(item)))
            .filter(|raw| validity.is_valid_cached(raw))
            .collect();
        debug!(total, usable = candidates.len(), "filtered cached entries");
        candidates
    }
}

fn source_set(request: &FetchRequest) -> HashSet<String> {
    request.sources.iter().map(|s| s.to_lowercase()).collect()
}
