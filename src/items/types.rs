use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Author value used when the original author is gone or unknown.
pub const DELETED_AUTHOR: &str = "[deleted]";

/// Id value used when an item carries no identifier.
pub const UNKNOWN_ID: &str = "?";

/// Content partition. Caches and keyword disablement are kept per audience.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Audience {
    General,
    Restricted,
}

impl Audience {
    pub fn as_str(&self) -> &'static str {
        match self {
            Audience::General => "general",
            Audience::Restricted => "restricted",
        }
    }
}

/// Read-only accessor contract shared by every item origin, so filtering and
/// selection never branch on where an item came from.
pub trait ItemFields {
    fn id(&self) -> Option<&str>;
    fn url(&self) -> Option<&str>;
    fn title(&self) -> Option<&str>;
    fn domain(&self) -> Option<&str>;
    /// Name of the source the item was posted to.
    fn source(&self) -> Option<&str>;
    fn over_18(&self) -> bool;
    fn is_video(&self) -> bool;
    fn is_gallery(&self) -> bool;
    /// Loosely-typed access to embedded metadata (`media`, `preview`, ...).
    fn field(&self, name: &str) -> Option<&Value>;

    /// URL this item is known to resolve to, for dedup checks.
    fn media_url(&self) -> Option<&str> {
        self.url()
    }
}

/// An item exactly as a listing, search or random endpoint returned it.
#[derive(Debug, Clone, PartialEq)]
pub struct ListingItem {
    data: Map<String, Value>,
}

impl ListingItem {
    pub fn new(data: Map<String, Value>) -> Self {
        Self { data }
    }

    /// Wraps a JSON object; `None` for any other JSON value.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(data) => Some(Self { data }),
            _ => None,
        }
    }

    fn str_field(&self, name: &str) -> Option<&str> {
        self.data
            .get(name)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    fn bool_field(&self, name: &str) -> bool {
        self.data.get(name).and_then(Value::as_bool).unwrap_or(false)
    }

    pub fn i64_field(&self, name: &str) -> i64 {
        self.data
            .get(name)
            .and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|f| f as i64)))
            .unwrap_or(0)
    }

    pub fn permalink(&self) -> Option<&str> {
        self.str_field("permalink")
    }

    pub fn author(&self) -> Option<&str> {
        self.str_field("author")
    }
}

impl ItemFields for ListingItem {
    fn id(&self) -> Option<&str> {
        self.str_field("id")
    }
    fn url(&self) -> Option<&str> {
        self.str_field("url")
    }
    fn title(&self) -> Option<&str> {
        self.str_field("title")
    }
    fn domain(&self) -> Option<&str> {
        self.str_field("domain")
    }
    fn source(&self) -> Option<&str> {
        self.str_field("subreddit")
    }
    fn over_18(&self) -> bool {
        self.bool_field("over_18")
    }
    fn is_video(&self) -> bool {
        self.bool_field("is_video")
    }
    fn is_gallery(&self) -> bool {
        self.bool_field("is_gallery")
    }
    fn field(&self, name: &str) -> Option<&Value> {
        self.data.get(name).filter(|v| !v.is_null())
    }
}

/// A previously normalized item replayed from the keyword cache.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedItem {
    item: NormalizedItem,
    domain: String,
}

impl CachedItem {
    /// The domain is the host of the post URL, or of the media URL when the
    /// post URL has none.
    pub fn new(item: NormalizedItem) -> Self {
        let domain = host_of(&item.url)
            .or_else(|| host_of(&item.media_url))
            .unwrap_or_default();
        Self { item, domain }
    }

    pub fn item(&self) -> &NormalizedItem {
        &self.item
    }

    pub fn into_item(self) -> NormalizedItem {
        self.item
    }
}

fn host_of(url: &str) -> Option<String> {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_lowercase))
}

impl ItemFields for CachedItem {
    fn id(&self) -> Option<&str> {
        Some(self.item.id.as_str()).filter(|id| *id != UNKNOWN_ID)
    }
    fn url(&self) -> Option<&str> {
        Some(self.item.url.as_str()).filter(|s| !s.is_empty())
    }
    fn title(&self) -> Option<&str> {
        Some(self.item.title.as_str())
    }
    fn domain(&self) -> Option<&str> {
        Some(self.domain.as_str()).filter(|s| !s.is_empty())
    }
    fn source(&self) -> Option<&str> {
        Some(self.item.source.as_str()).filter(|s| !s.is_empty())
    }
    fn over_18(&self) -> bool {
        self.item.over_18
    }
    fn is_video(&self) -> bool {
        false
    }
    fn is_gallery(&self) -> bool {
        !self.item.gallery_urls.is_empty()
    }
    fn field(&self, _name: &str) -> Option<&Value> {
        None
    }
    fn media_url(&self) -> Option<&str> {
        Some(self.item.media_url.as_str()).filter(|s| !s.is_empty())
    }
}

/// Any candidate item, regardless of which tier produced it.
#[derive(Debug, Clone, PartialEq)]
pub enum RawItem {
    Listing(ListingItem),
    Cached(CachedItem),
}

macro_rules! delegate {
    ($self:ident, $method:ident $(, $arg:expr)?) => {
        match $self {
            RawItem::Listing(item) => item.$method($($arg)?),
            RawItem::Cached(item) => item.$method($($arg)?),
        }
    };
}

impl ItemFields for RawItem {
    fn id(&self) -> Option<&str> {
        delegate!(self, id)
    }
    fn url(&self) -> Option<&str> {
        delegate!(self, url)
    }
    fn title(&self) -> Option<&str> {
        delegate!(self, title)
    }
    fn domain(&self) -> Option<&str> {
        delegate!(self, domain)
    }
    fn source(&self) -> Option<&str> {
        delegate!(self, source)
    }
    fn over_18(&self) -> bool {
        delegate!(self, over_18)
    }
    fn is_video(&self) -> bool {
        delegate!(self, is_video)
    }
    fn is_gallery(&self) -> bool {
        delegate!(self, is_gallery)
    }
    fn field(&self, name: &str) -> Option<&Value> {
        delegate!(self, field, name)
    }
    fn media_url(&self) -> Option<&str> {
        delegate!(self, media_url)
    }
}

impl From<ListingItem> for RawItem {
    fn from(item: ListingItem) -> Self {
        RawItem::Listing(item)
    }
}

impl From<CachedItem> for RawItem {
    fn from(item: CachedItem) -> Self {
        RawItem::Cached(item)
    }
}

/// Flat, immutable record handed to consumers and stored in the keyword cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedItem {
    pub id: String,
    pub source: String,
    pub title: String,
    pub url: String,
    pub media_url: String,
    #[serde(default)]
    pub gallery_urls: Vec<String>,
    pub permalink: String,
    pub author: String,
    #[serde(default)]
    pub over_18: bool,
    #[serde(default)]
    pub ups: i64,
    #[serde(default)]
    pub num_comments: i64,
    #[serde(default)]
    pub created_utc: i64,
}

impl NormalizedItem {
    /// Permalink for cached entries that lost theirs.
    pub fn fallback_permalink(source: &str, id: &str) -> String {
        format!("/r/{}/comments/{}/", source, id)
    }
}
