use std::fmt;

use serde::Serialize;

use crate::items::NormalizedItem;

/// Acquisition path that satisfied a resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Tier {
    FastCache,
    PersistentCache,
    Disabled,
    LiveSearch,
    LiveListing,
    Warm,
    Fallback,
    Random,
    None,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::FastCache => "fast-cache",
            Tier::PersistentCache => "persistent-cache",
            Tier::Disabled => "disabled",
            Tier::LiveSearch => "live-search",
            Tier::LiveListing => "live-listing",
            Tier::Warm => "warm",
            Tier::Fallback => "fallback",
            Tier::Random => "random",
            Tier::None => "none",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one resolution. `item` is absent exactly when `errors` is non-empty.
#[derive(Debug, Clone, Serialize)]
pub struct FetchOutcome {
    pub item: Option<NormalizedItem>,
    pub source: Option<String>,
    pub tier: Tier,
    /// Sources attempted, in order.
    pub tried: Vec<String>,
    pub errors: Vec<String>,
    /// `"search"` or the listing category the item came from.
    pub category: Option<String>,
}

impl FetchOutcome {
    pub fn found(item: NormalizedItem, tier: Tier, tried: Vec<String>) -> Self {
        Self {
            source: Some(item.source.clone()).filter(|s| !s.is_empty()),
            item: Some(item),
            tier,
            tried,
            errors: Vec::new(),
            category: None,
        }
    }

    pub fn missing(tier: Tier, tried: Vec<String>, mut errors: Vec<String>) -> Self {
        if errors.is_empty() {
            errors.push("no valid items found".to_string());
        }
        Self {
            item: None,
            source: None,
            tier,
            tried,
            errors,
            category: None,
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn is_found(&self) -> bool {
        self.item.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::normalized;

    #[test]
    fn missing_always_explains_itself() {
        let outcome = FetchOutcome::missing(Tier::None, vec!["memes".into()], Vec::new());
        assert!(!outcome.is_found());
        assert_eq!(outcome.errors.len(), 1);
    }

    #[test]
    fn serializes_tier_labels() {
        let item = normalized("a", "pics", "cat");
        let outcome =
            FetchOutcome::found(item, Tier::PersistentCache, vec![]).with_category("search");
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["tier"], "persistent-cache");
        assert_eq!(json["source"], "pics");
        assert_eq!(json["category"], "search");
        assert_eq!(serde_json::to_value(Tier::LiveListing).unwrap(), "live-listing");
    }
}
