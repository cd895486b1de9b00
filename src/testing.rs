//! Test doubles shared by the unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::cache::{CacheKey, KeywordCache};
use crate::error::FetchError;
use crate::items::{ListingItem, NormalizedItem, RawItem};
use crate::reddit::SourceClient;

/// Listing item with a direct image URL.
pub(crate) fn post(id: &str, source: &str, title: &str) -> RawItem {
    listing(json!({
        "id": id,
        "subreddit": source,
        "title": title,
        "url": format!("https://i.redd.it/{}.jpg", id),
        "domain": "i.redd.it",
        "permalink": format!("/r/{}/comments/{}/", source, id),
        "author": "someone",
        "ups": 10,
    }))
}

pub(crate) fn listing(value: Value) -> RawItem {
    RawItem::from(ListingItem::from_value(value).expect("listing fixture must be an object"))
}

pub(crate) fn normalized(id: &str, source: &str, title: &str) -> NormalizedItem {
    NormalizedItem {
        id: id.to_string(),
        source: source.to_string(),
        title: title.to_string(),
        url: format!("https://i.redd.it/{}.jpg", id),
        media_url: format!("https://i.redd.it/{}.jpg", id),
        gallery_urls: Vec::new(),
        permalink: format!("/r/{}/comments/{}/", source, id),
        author: "someone".to_string(),
        over_18: false,
        ups: 1,
        num_comments: 0,
        created_utc: 0,
    }
}

/// Scripted source. Unknown (source, category) pairs return empty listings.
#[derive(Default)]
pub(crate) struct MockSource {
    listings: HashMap<(String, String), Vec<RawItem>>,
    searches: HashMap<String, Vec<RawItem>>,
    randoms: HashMap<String, RawItem>,
    denied: HashSet<String>,
    random_denied: HashSet<String>,
    pending_failures: Mutex<u32>,
    delay: Duration,
    listing_calls: AtomicUsize,
    search_calls: AtomicUsize,
    random_calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    calls: Mutex<Vec<String>>,
}

impl MockSource {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_listing(
        mut self,
        source: &str,
        category: &str,
        items: Vec<RawItem>,
    ) -> Self {
        self.listings
            .insert((source.to_string(), category.to_string()), items);
        self
    }

    pub(crate) fn with_search(mut self, source: &str, items: Vec<RawItem>) -> Self {
        self.searches.insert(source.to_string(), items);
        self
    }

    pub(crate) fn with_random(mut self, source: &str, item: RawItem) -> Self {
        self.randoms.insert(source.to_string(), item);
        self
    }

    /// Listing and search requests for `source` are denied.
    pub(crate) fn deny(mut self, source: &str) -> Self {
        self.denied.insert(source.to_string());
        self
    }

    pub(crate) fn deny_random(mut self, source: &str) -> Self {
        self.random_denied.insert(source.to_string());
        self
    }

    /// The next `n` listing or search requests fail transiently.
    pub(crate) fn fail_next(self, n: u32) -> Self {
        if let Ok(mut pending) = self.pending_failures.lock() {
            *pending = n;
        }
        self
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub(crate) fn listing_calls(&self) -> usize {
        self.listing_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn search_calls(&self) -> usize {
        self.search_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn random_calls(&self) -> usize {
        self.random_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Every request so far, as `kind:source:target`.
    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    async fn enter(&self, call: String) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    fn check(&self, source: &str) -> Result<(), FetchError> {
        if self.denied.contains(source) {
            return Err(FetchError::Unavailable(source.to_string()));
        }
        let Ok(mut pending) = self.pending_failures.lock() else {
            return Ok(());
        };
        if *pending > 0 {
            *pending -= 1;
            return Err(FetchError::Transient(format!("{} timed out", source)));
        }
        Ok(())
    }
}

#[async_trait]
impl SourceClient for MockSource {
    async fn listing(
        &self,
        source: &str,
        category: &str,
        _limit: usize,
    ) -> Result<Vec<RawItem>, FetchError> {
        self.listing_calls.fetch_add(1, Ordering::SeqCst);
        self.enter(format!("listing:{}:{}", source, category)).await;
        self.check(source)?;
        Ok(self
            .listings
            .get(&(source.to_string(), category.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn search(
        &self,
        source: &str,
        keyword: &str,
        _limit: usize,
    ) -> Result<Vec<RawItem>, FetchError> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        self.enter(format!("search:{}:{}", source, keyword)).await;
        self.check(source)?;
        Ok(self.searches.get(source).cloned().unwrap_or_default())
    }

    async fn random(&self, source: &str) -> Result<Option<RawItem>, FetchError> {
        self.random_calls.fetch_add(1, Ordering::SeqCst);
        self.enter(format!("random:{}", source)).await;
        if self.random_denied.contains(source) || self.denied.contains(source) {
            return Err(FetchError::Unavailable(source.to_string()));
        }
        Ok(self.randoms.get(source).cloned())
    }
}

/// Keyword cache held entirely in memory, with inspection helpers.
#[derive(Default)]
pub(crate) struct MemoryKeywordCache {
    fast: Mutex<HashMap<CacheKey, Vec<NormalizedItem>>>,
    persistent: Mutex<HashMap<CacheKey, Vec<NormalizedItem>>>,
    disabled: Mutex<HashSet<CacheKey>>,
    failures: Mutex<HashMap<CacheKey, u32>>,
}

impl MemoryKeywordCache {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn seed_fast(&self, key: &CacheKey, items: Vec<NormalizedItem>) {
        if let Ok(mut fast) = self.fast.lock() {
            fast.insert(key.clone(), items);
        }
    }

    pub(crate) fn seed_persistent(&self, key: &CacheKey, items: Vec<NormalizedItem>) {
        if let Ok(mut persistent) = self.persistent.lock() {
            persistent.insert(key.clone(), items);
        }
    }

    pub(crate) fn disable(&self, key: &CacheKey) {
        if let Ok(mut disabled) = self.disabled.lock() {
            disabled.insert(key.clone());
        }
    }

    pub(crate) fn fast(&self, key: &CacheKey) -> Vec<NormalizedItem> {
        self.fast
            .lock()
            .ok()
            .and_then(|f| f.get(key).cloned())
            .unwrap_or_default()
    }

    pub(crate) fn persistent(&self, key: &CacheKey) -> Vec<NormalizedItem> {
        self.persistent
            .lock()
            .ok()
            .and_then(|p| p.get(key).cloned())
            .unwrap_or_default()
    }

    pub(crate) fn failures(&self, key: &CacheKey) -> u32 {
        self.failures
            .lock()
            .ok()
            .and_then(|f| f.get(key).copied())
            .unwrap_or(0)
    }
}

fn merge_into(
    store: &Mutex<HashMap<CacheKey, Vec<NormalizedItem>>>,
    key: &CacheKey,
    items: Vec<NormalizedItem>,
) {
    let Ok(mut store) = store.lock() else {
        return;
    };
    let entry = store.entry(key.clone()).or_default();
    let ids: HashSet<String> = items.iter().map(|i| i.id.clone()).collect();
    entry.retain(|i| !ids.contains(&i.id));
    let mut merged = items;
    merged.append(entry);
    *entry = merged;
}

#[async_trait]
impl KeywordCache for MemoryKeywordCache {
    async fn get_fast(&self, key: &CacheKey) -> Vec<NormalizedItem> {
        self.fast(key)
    }
    async fn get_persistent(&self, key: &CacheKey) -> Vec<NormalizedItem> {
        self.persistent(key)
    }
    async fn put_fast(&self, key: &CacheKey, items: Vec<NormalizedItem>) {
        merge_into(&self.fast, key, items);
    }
    async fn put_persistent(&self, key: &CacheKey, items: Vec<NormalizedItem>) {
        merge_into(&self.persistent, key, items);
    }
    async fn is_disabled(&self, key: &CacheKey) -> bool {
        self.disabled
            .lock()
            .map(|d| d.contains(key))
            .unwrap_or(false)
    }
    async fn record_failure(&self, key: &CacheKey) {
        if let Ok(mut failures) = self.failures.lock() {
            *failures.entry(key.clone()).or_default() += 1;
        }
    }
}
