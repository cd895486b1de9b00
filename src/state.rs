use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Engine parameters. Static for the life of the process.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub base_url: String,
    pub user_agent: String,
    pub request_timeout: Duration,
    /// Minimum spacing between any two outbound requests, process-wide.
    pub throttle_interval: Duration,
    pub retries: u32,
    pub backoff: Duration,
    pub max_concurrent: usize,
    pub id_cache_capacity: usize,
    pub id_cache_ttl: Duration,
    pub media_cache_capacity: usize,
    pub media_cache_ttl: Duration,
    /// Listing preference order for resolution.
    pub categories: Vec<String>,
    pub listing_limit: usize,
    pub random_fallback_limit: usize,
    pub warmup_categories: Vec<String>,
    pub warmup_limit: usize,
    pub warmup_interval: Duration,
    pub warmup_settle: Duration,
    pub warmup_batch_size: usize,
    pub warmup_batch_pause: Duration,
    /// Fixed seed for reproducible picks; OS entropy when unset.
    pub rng_seed: Option<u64>,
    pub cache: CacheConfig,
}

/// Keyword cache parameters.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub fast_capacity: usize,
    pub fast_ttl: Duration,
    pub persistent_dir: PathBuf,
    pub persistent_ttl: Duration,
    pub persistent_max_items: usize,
    pub failure_threshold: u32,
    pub failure_cooldown: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.reddit.com".to_string(),
            user_agent: "MemeBot/2.0".to_string(),
            request_timeout: Duration::from_secs(15),
            throttle_interval: Duration::from_secs(1),
            retries: 3,
            backoff: Duration::from_secs(1),
            max_concurrent: 5,
            id_cache_capacity: 10_000,
            id_cache_ttl: Duration::from_secs(6 * 3600),
            media_cache_capacity: 10_000,
            media_cache_ttl: Duration::from_secs(6 * 3600),
            categories: strings(&["hot", "new", "top"]),
            listing_limit: 75,
            random_fallback_limit: 100,
            warmup_categories: strings(&["hot", "new"]),
            warmup_limit: 75,
            warmup_interval: Duration::from_secs(600),
            warmup_settle: Duration::from_secs(10),
            warmup_batch_size: 5,
            warmup_batch_pause: Duration::from_secs(5),
            rng_seed: None,
            cache: CacheConfig::default(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            fast_capacity: 512,
            fast_ttl: Duration::from_secs(3600),
            persistent_dir: PathBuf::from("data/keyword_cache"),
            persistent_ttl: Duration::from_secs(7 * 24 * 3600),
            persistent_max_items: 500,
            failure_threshold: 3,
            failure_cooldown: Duration::from_secs(3600),
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by `MEMER_*` environment variables.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            base_url: dotenv::var("MEMER_BASE_URL").unwrap_or(d.base_url),
            user_agent: dotenv::var("MEMER_USER_AGENT").unwrap_or(d.user_agent),
            request_timeout: secs("MEMER_REQUEST_TIMEOUT_SECS", d.request_timeout),
            throttle_interval: millis("MEMER_THROTTLE_MS", d.throttle_interval),
            retries: parsed("MEMER_RETRIES", d.retries).max(1),
            backoff: millis("MEMER_BACKOFF_MS", d.backoff),
            max_concurrent: parsed("MEMER_MAX_CONCURRENT", d.max_concurrent).max(1),
            id_cache_capacity: parsed("MEMER_ID_CACHE_SIZE", d.id_cache_capacity).max(1),
            id_cache_ttl: secs("MEMER_ID_CACHE_TTL_SECS", d.id_cache_ttl),
            media_cache_capacity: parsed("MEMER_MEDIA_CACHE_SIZE", d.media_cache_capacity).max(1),
            media_cache_ttl: secs("MEMER_MEDIA_CACHE_TTL_SECS", d.media_cache_ttl),
            categories: list("MEMER_CATEGORIES").unwrap_or(d.categories),
            listing_limit: parsed("MEMER_LISTING_LIMIT", d.listing_limit),
            random_fallback_limit: parsed("MEMER_RANDOM_FALLBACK_LIMIT", d.random_fallback_limit),
            warmup_categories: list("MEMER_WARMUP_CATEGORIES").unwrap_or(d.warmup_categories),
            warmup_limit: parsed("MEMER_WARMUP_LIMIT", d.warmup_limit),
            warmup_interval: secs("MEMER_WARMUP_INTERVAL_SECS", d.warmup_interval),
            warmup_settle: secs("MEMER_WARMUP_SETTLE_SECS", d.warmup_settle),
            warmup_batch_size: parsed("MEMER_WARMUP_BATCH_SIZE", d.warmup_batch_size).max(1),
            warmup_batch_pause: secs("MEMER_WARMUP_BATCH_PAUSE_SECS", d.warmup_batch_pause),
            rng_seed: dotenv::var("MEMER_RNG_SEED")
                .ok()
                .and_then(|s| s.trim().parse().ok()),
            cache: CacheConfig::from_env(),
        }
    }
}

impl CacheConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            fast_capacity: parsed("MEMER_CACHE_FAST_SIZE", d.fast_capacity).max(1),
            fast_ttl: secs("MEMER_CACHE_FAST_TTL_SECS", d.fast_ttl),
            persistent_dir: dotenv::var("MEMER_CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or(d.persistent_dir),
            persistent_ttl: secs("MEMER_CACHE_PERSIST_TTL_SECS", d.persistent_ttl),
            persistent_max_items: parsed("MEMER_CACHE_PERSIST_MAX", d.persistent_max_items),
            failure_threshold: parsed("MEMER_CACHE_FAILURE_THRESHOLD", d.failure_threshold).max(1),
            failure_cooldown: secs("MEMER_CACHE_FAILURE_COOLDOWN_SECS", d.failure_cooldown),
        }
    }
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}

fn parsed<T: FromStr>(key: &str, default: T) -> T {
    dotenv::var(key)
        .ok()
        .and_then(|s| s.trim().parse::<T>().ok())
        .unwrap_or(default)
}

fn secs(key: &str, default: Duration) -> Duration {
    dotenv::var(key)
        .ok()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

fn millis(key: &str, default: Duration) -> Duration {
    dotenv::var(key)
        .ok()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}

/// Comma-separated list; `None` when unset or empty.
pub(crate) fn list(key: &str) -> Option<Vec<String>> {
    let raw = dotenv::var(key).ok()?;
    let values: Vec<String> = raw
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if values.is_empty() {
        None
    } else {
        Some(values)
    }
}
