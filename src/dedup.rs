use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::Duration;

use lru::LruCache;
use tokio::time::Instant;
use tracing::debug;

use crate::items::UNKNOWN_ID;

/// Bounded set of keys that expire a fixed time after insertion.
///
/// At capacity the least recently inserted key is evicted. Expired keys are
/// dropped lazily on lookup.
pub struct TtlSet {
    entries: Mutex<LruCache<String, Instant>>,
    ttl: Duration,
}

impl TtlSet {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let cap = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(cap)),
            ttl,
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        let Ok(mut entries) = self.entries.lock() else {
            return false;
        };
        match entries.peek(key) {
            Some(at) if at.elapsed() <= self.ttl => true,
            Some(_) => {
                entries.pop(key);
                false
            }
            None => false,
        }
    }

    pub fn insert(&self, key: &str) {
        if key.is_empty() {
            return;
        }
        if let Ok(mut entries) = self.entries.lock() {
            entries.put(key.to_string(), Instant::now());
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Process-wide "already shown" memory shared by every acquisition tier.
pub struct DedupCaches {
    pub ids: TtlSet,
    pub media: TtlSet,
}

impl DedupCaches {
    pub fn new(
        id_capacity: usize,
        id_ttl: Duration,
        media_capacity: usize,
        media_ttl: Duration,
    ) -> Self {
        Self {
            ids: TtlSet::new(id_capacity, id_ttl),
            media: TtlSet::new(media_capacity, media_ttl),
        }
    }

    /// Marks an item as served: its id and every URL it resolved to.
    pub fn record<'a>(&self, id: &str, urls: impl IntoIterator<Item = &'a str>) {
        if id != UNKNOWN_ID {
            self.ids.insert(id);
        }
        for url in urls {
            self.media.insert(url);
        }
        debug!(id, "recorded served item");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn keys_expire_after_ttl() {
        let set = TtlSet::new(10, Duration::from_secs(60));
        set.insert("abc");
        assert!(set.contains("abc"));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(!set.contains("abc"));
        assert!(set.is_empty());
    }

    #[test]
    fn capacity_evicts_oldest() {
        let set = TtlSet::new(2, Duration::from_secs(60));
        set.insert("a");
        set.insert("b");
        set.insert("c");
        assert_eq!(set.len(), 2);
        assert!(!set.contains("a"));
        assert!(set.contains("b"));
        assert!(set.contains("c"));
    }

    #[test]
    fn record_skips_sentinel_id_and_empty_urls() {
        let caches = DedupCaches::new(10, Duration::from_secs(60), 10, Duration::from_secs(60));
        caches.record("?", ["", "https://i.redd.it/x.png"]);
        assert!(caches.ids.is_empty());
        assert_eq!(caches.media.len(), 1);
        assert!(caches.media.contains("https://i.redd.it/x.png"));
    }
}
