use std::collections::HashSet;

use crate::blocklist::BlocklistProvider;
use crate::dedup::DedupCaches;
use crate::items::{ItemFields, RawItem};

use super::ItemFilter;

/// Why a candidate was turned down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    MissingUrl,
    SeenMedia,
    SeenId,
    Excluded,
    InRandomPool,
    KeywordMismatch,
    Filtered,
    BlockedDomain,
}

/// The validity predicate for one resolution call.
pub struct Validity<'a> {
    pub(super) dedup: &'a DedupCaches,
    pub(super) blocklist: &'a dyn BlocklistProvider,
    pub(super) exclude: &'a HashSet<String>,
    pub(super) filter: Option<&'a ItemFilter>,
    /// Lowercased keyword, if any.
    pub(super) keyword: Option<String>,
    /// Ids and media URLs of the cached random pool. Only consulted without a keyword.
    pub(super) random_pool: HashSet<String>,
}

impl<'a> Validity<'a> {
    pub fn with_random_pool(mut self, pool: HashSet<String>) -> Self {
        self.random_pool = pool;
        self
    }

    pub fn is_valid(&self, item: &RawItem) -> bool {
        self.check(item, true).is_ok()
    }

    /// Validity for items replayed from the keyword cache, which are the
    /// random pool itself.
    pub fn is_valid_cached(&self, item: &RawItem) -> bool {
        self.check(item, false).is_ok()
    }

    pub fn check(&self, item: &RawItem, use_pool: bool) -> Result<(), Rejection> {
        let url = item.url().ok_or(Rejection::MissingUrl)?;
        let media = item.media_url().unwrap_or(url);
        if self.dedup.media.contains(url) || self.dedup.media.contains(media) {
            return Err(Rejection::SeenMedia);
        }

        if let Some(id) = item.id() {
            if self.dedup.ids.contains(id) {
                return Err(Rejection::SeenId);
            }
            if self.exclude.contains(id) {
                return Err(Rejection::Excluded);
            }
        }

        match &self.keyword {
            None if use_pool => {
                let pooled = item.id().is_some_and(|id| self.random_pool.contains(id))
                    || self.random_pool.contains(url)
                    || self.random_pool.contains(media);
                if pooled {
                    return Err(Rejection::InRandomPool);
                }
            }
            None => {}
            Some(keyword) => {
                let title = item.title().unwrap_or_default().to_lowercase();
                if !title.contains(keyword.as_str()) {
                    return Err(Rejection::KeywordMismatch);
                }
            }
        }

        if let Some(filter) = self.filter {
            if !filter(item) {
                return Err(Rejection::Filtered);
            }
        }

        if let Some(domain) = item.domain() {
            if self.blocklist.is_blocked(domain) {
                return Err(Rejection::BlockedDomain);
            }
        }
        Ok(())
    }
}
