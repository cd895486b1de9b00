pub mod tiered;

pub use tiered::TieredKeywordCache;

use std::fmt;

use async_trait::async_trait;

use crate::items::{Audience, NormalizedItem};

/// Sentinel term under which previously served random picks are pooled.
pub const RANDOM_TERM: &str = "__random__";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheTerm {
    /// Lowercased, trimmed search keyword.
    Keyword(String),
    Random,
}

/// Keyword cache key. Keys differing only by audience are independent.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub term: CacheTerm,
    pub audience: Audience,
}

impl CacheKey {
    pub fn keyword(keyword: &str, audience: Audience) -> Self {
        Self {
            term: CacheTerm::Keyword(keyword.trim().to_lowercase()),
            audience,
        }
    }

    pub fn random(audience: Audience) -> Self {
        Self {
            term: CacheTerm::Random,
            audience,
        }
    }

    pub fn term(&self) -> &str {
        match &self.term {
            CacheTerm::Keyword(keyword) => keyword,
            CacheTerm::Random => RANDOM_TERM,
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.audience.as_str(), self.term())
    }
}

/// Two-tier cache of normalized items per keyword, plus a per-key
/// "temporarily disabled" signal fed by repeated failures.
///
/// Writes merge into the existing entry by item id, newest first.
/// Implementations swallow their own I/O failures.
#[async_trait]
pub trait KeywordCache: Send + Sync {
    async fn get_fast(&self, key: &CacheKey) -> Vec<NormalizedItem>;
    async fn get_persistent(&self, key: &CacheKey) -> Vec<NormalizedItem>;
    async fn put_fast(&self, key: &CacheKey, items: Vec<NormalizedItem>);
    async fn put_persistent(&self, key: &CacheKey, items: Vec<NormalizedItem>);
    async fn is_disabled(&self, key: &CacheKey) -> bool;
    async fn record_failure(&self, key: &CacheKey);
}

/// Cache that stores nothing. For callers that must not touch shared state.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopKeywordCache;

#[async_trait]
impl KeywordCache for NoopKeywordCache {
    async fn get_fast(&self, _key: &CacheKey) -> Vec<NormalizedItem> {
        Vec::new()
    }
    async fn get_persistent(&self, _key: &CacheKey) -> Vec<NormalizedItem> {
        Vec::new()
    }
    async fn put_fast(&self, _key: &CacheKey, _items: Vec<NormalizedItem>) {}
    async fn put_persistent(&self, _key: &CacheKey, _items: Vec<NormalizedItem>) {}
    async fn is_disabled(&self, _key: &CacheKey) -> bool {
        false
    }
    async fn record_failure(&self, _key: &CacheKey) {}
}

/// Wraps a cache so keywords are never disabled and failures are not counted.
pub struct AlwaysOnKeywordCache<C> {
    inner: C,
}

impl<C: KeywordCache> AlwaysOnKeywordCache<C> {
    pub fn new(inner: C) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<C: KeywordCache> KeywordCache for AlwaysOnKeywordCache<C> {
    async fn get_fast(&self, key: &CacheKey) -> Vec<NormalizedItem> {
        self.inner.get_fast(key).await
    }
    async fn get_persistent(&self, key: &CacheKey) -> Vec<NormalizedItem> {
        self.inner.get_persistent(key).await
    }
    async fn put_fast(&self, key: &CacheKey, items: Vec<NormalizedItem>) {
        self.inner.put_fast(key, items).await
    }
    async fn put_persistent(&self, key: &CacheKey, items: Vec<NormalizedItem>) {
        self.inner.put_persistent(key, items).await
    }
    async fn is_disabled(&self, _key: &CacheKey) -> bool {
        false
    }
    async fn record_failure(&self, _key: &CacheKey) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{normalized, MemoryKeywordCache};

    #[test]
    fn keys_are_normalized_and_audience_scoped() {
        let a = CacheKey::keyword("  Cat ", Audience::General);
        assert_eq!(a, CacheKey::keyword("cat", Audience::General));
        assert_ne!(a, CacheKey::keyword("cat", Audience::Restricted));
        assert_eq!(a.to_string(), "general:cat");
        assert_eq!(CacheKey::random(Audience::Restricted).term(), RANDOM_TERM);
    }

    #[tokio::test]
    async fn always_on_never_disables() {
        let inner = MemoryKeywordCache::new();
        let key = CacheKey::keyword("cat", Audience::General);
        inner.disable(&key);
        assert!(inner.is_disabled(&key).await);

        let cache = AlwaysOnKeywordCache::new(inner);
        cache.record_failure(&key).await;
        assert!(!cache.is_disabled(&key).await);

        cache.put_fast(&key, vec![normalized("a", "pics", "cat")]).await;
        assert_eq!(cache.get_fast(&key).await.len(), 1);
    }

    #[tokio::test]
    async fn noop_stores_nothing() {
        let cache = NoopKeywordCache;
        let key = CacheKey::random(Audience::General);
        cache.put_fast(&key, vec![normalized("a", "pics", "cat")]).await;
        assert!(cache.get_fast(&key).await.is_empty());
        assert!(!cache.is_disabled(&key).await);
    }
}
