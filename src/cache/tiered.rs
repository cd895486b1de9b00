use std::collections::{HashMap, HashSet};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lru::LruCache;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{CacheKey, CacheTerm, KeywordCache};
use crate::items::NormalizedItem;
use crate::state::CacheConfig;

struct FastEntry {
    stored_at: Instant,
    items: Vec<NormalizedItem>,
}

struct Failures {
    count: u32,
    first_at: Instant,
}

#[derive(Serialize, Deserialize)]
struct StoredEntry {
    stored_at: DateTime<Utc>,
    items: Vec<NormalizedItem>,
}

/// In-memory LRU fast tier over a directory of JSON files.
pub struct TieredKeywordCache {
    config: CacheConfig,
    fast: Mutex<LruCache<CacheKey, FastEntry>>,
    failures: Mutex<HashMap<CacheKey, Failures>>,
    write_lock: tokio::sync::Mutex<()>,
}

impl TieredKeywordCache {
    pub fn new(config: CacheConfig) -> Self {
        let cap = NonZeroUsize::new(config.fast_capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            config,
            fast: Mutex::new(LruCache::new(cap)),
            failures: Mutex::new(HashMap::new()),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Keywords are stored under a hash of the term; the random pool has a
    /// fixed name outside that namespace.
    fn path_for(&self, key: &CacheKey) -> PathBuf {
        let name = match &key.term {
            CacheTerm::Keyword(keyword) => {
                format!("kw-{}.json", blake3::hash(keyword.as_bytes()).to_hex())
            }
            CacheTerm::Random => "random-pool.json".to_string(),
        };
        self.config
            .persistent_dir
            .join(key.audience.as_str())
            .join(name)
    }

    async fn read_entry(&self, path: &Path) -> Result<Option<StoredEntry>> {
        let text = match tokio::fs::read_to_string(path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
        };
        let entry: StoredEntry = serde_json::from_str(&text)
            .with_context(|| format!("parsing {}", path.display()))?;

        let ttl = chrono::Duration::from_std(self.config.persistent_ttl)
            .unwrap_or_else(|_| chrono::Duration::days(365 * 100));
        if Utc::now() - entry.stored_at > ttl {
            debug!(path = %path.display(), "persistent entry expired");
            return Ok(None);
        }
        Ok(Some(entry))
    }

    async fn write_entry(&self, path: &Path, entry: &StoredEntry) -> Result<()> {
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("creating {}", dir.display()))?;
        }
        let tmp = path.with_extension("json.tmp");
        let body = serde_json::to_vec(entry)?;
        tokio::fs::write(&tmp, body)
            .await
            .with_context(|| format!("writing {}", tmp.display()))?;
        tokio::fs::rename(&tmp, path)
            .await
            .with_context(|| format!("renaming {}", tmp.display()))?;
        Ok(())
    }

    fn clear_failures(&self, key: &CacheKey) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.remove(key);
        }
    }
}

/// Incoming items first, then existing ones not superseded by id.
fn merge(
    incoming: Vec<NormalizedItem>,
    existing: Vec<NormalizedItem>,
    max_items: usize,
) -> Vec<NormalizedItem> {
    let mut seen = HashSet::new();
    incoming
        .into_iter()
        .chain(existing)
        .filter(|item| seen.insert(item.id.clone()))
        .take(max_items)
        .collect()
}

#[async_trait]
impl KeywordCache for TieredKeywordCache {
    async fn get_fast(&self, key: &CacheKey) -> Vec<NormalizedItem> {
        let Ok(mut fast) = self.fast.lock() else {
            return Vec::new();
        };
        match fast.get(key) {
            Some(entry) if entry.stored_at.elapsed() <= self.config.fast_ttl => {
                entry.items.clone()
            }
            Some(_) => {
                fast.pop(key);
                Vec::new()
            }
            None => Vec::new(),
        }
    }

    async fn get_persistent(&self, key: &CacheKey) -> Vec<NormalizedItem> {
        let path = self.path_for(key);
        match self.read_entry(&path).await {
            Ok(entry) => entry.map(|e| e.items).unwrap_or_default(),
            Err(e) => {
                warn!(key = %key, error = %e, "persistent cache read failed");
                Vec::new()
            }
        }
    }

    async fn put_fast(&self, key: &CacheKey, items: Vec<NormalizedItem>) {
        if items.is_empty() {
            return;
        }
        if let Ok(mut fast) = self.fast.lock() {
            let existing = match fast.pop(key) {
                Some(entry) if entry.stored_at.elapsed() <= self.config.fast_ttl => entry.items,
                _ => Vec::new(),
            };
            let items = merge(items, existing, self.config.persistent_max_items);
            fast.put(
                key.clone(),
                FastEntry {
                    stored_at: Instant::now(),
                    items,
                },
            );
        }
        self.clear_failures(key);
    }

    async fn put_persistent(&self, key: &CacheKey, items: Vec<NormalizedItem>) {
        if items.is_empty() {
            return;
        }
        let path = self.path_for(key);
        let _guard = self.write_lock.lock().await;

        let existing = match self.read_entry(&path).await {
            Ok(entry) => entry.map(|e| e.items).unwrap_or_default(),
            Err(e) => {
                warn!(key = %key, error = %e, "discarding unreadable persistent entry");
                Vec::new()
            }
        };
        let entry = StoredEntry {
            stored_at: Utc::now(),
            items: merge(items, existing, self.config.persistent_max_items),
        };
        match self.write_entry(&path, &entry).await {
            Ok(()) => debug!(key = %key, count = entry.items.len(), "persistent cache updated"),
            Err(e) => warn!(key = %key, error = %e, "persistent cache write failed"),
        }
    }

    async fn is_disabled(&self, key: &CacheKey) -> bool {
        let Ok(mut failures) = self.failures.lock() else {
            return false;
        };
        match failures.get(key) {
            Some(f) if f.first_at.elapsed() > self.config.failure_cooldown => {
                failures.remove(key);
                false
            }
            Some(f) => f.count >= self.config.failure_threshold,
            None => false,
        }
    }

    async fn record_failure(&self, key: &CacheKey) {
        let Ok(mut failures) = self.failures.lock() else {
            return;
        };
        let cooldown = self.config.failure_cooldown;
        let entry = failures.entry(key.clone()).or_insert(Failures {
            count: 0,
            first_at: Instant::now(),
        });
        if entry.first_at.elapsed() > cooldown {
            entry.count = 0;
            entry.first_at = Instant::now();
        }
        entry.count += 1;
        if entry.count == self.config.failure_threshold {
            info!(key = %key, count = entry.count, "keyword disabled after repeated failures");
        }
    }
}
