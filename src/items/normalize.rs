use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use tracing::{debug, warn};

use super::types::{
    ItemFields, ListingItem, NormalizedItem, RawItem, DELETED_AUTHOR, UNKNOWN_ID,
};

const IMAGE_EXT: &[&str] = &[".jpg", ".jpeg", ".png", ".gif"];

static EMBED_SRC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"src=["']([^"']+)"#).expect("embed src pattern"));

/// Maps a raw item to the record consumers see. Must not fail: missing
/// fields become sentinel values.
#[async_trait]
pub trait Normalizer: Send + Sync {
    async fn normalize(&self, item: &RawItem) -> NormalizedItem;
}

/// Secondary lookup that turns a page URL into a directly playable media URL.
#[async_trait]
pub trait MediaResolver: Send + Sync {
    async fn resolve(&self, url: &str) -> Option<String>;
}

/// Resolves playable URLs by shelling out to `yt-dlp -g`.
pub struct YtDlpResolver {
    binary: String,
    timeout: Duration,
}

impl YtDlpResolver {
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }
}

impl Default for YtDlpResolver {
    fn default() -> Self {
        Self::new("yt-dlp", Duration::from_secs(30))
    }
}

#[async_trait]
impl MediaResolver for YtDlpResolver {
    async fn resolve(&self, url: &str) -> Option<String> {
        // Prefer a single mp4 over m3u8 streams most players can't handle
        let run = tokio::process::Command::new(&self.binary)
            .args(["-g", "-f", "b[ext=mp4]/best", "--no-playlist", url])
            .kill_on_drop(true)
            .output();

        match tokio::time::timeout(self.timeout, run).await {
            Ok(Ok(output)) if output.status.success() => String::from_utf8_lossy(&output.stdout)
                .lines()
                .next()
                .map(|l| l.trim().to_string())
                .filter(|l| !l.is_empty()),
            Ok(Ok(output)) => {
                debug!(url, stderr = %String::from_utf8_lossy(&output.stderr), "yt-dlp failed");
                None
            }
            Ok(Err(e)) => {
                warn!(url, error = %e, "Error running yt-dlp");
                None
            }
            Err(_) => {
                warn!(url, "yt-dlp timed out");
                None
            }
        }
    }
}

/// Listing-aware normalizer. Cached items pass through unchanged.
#[derive(Default)]
pub struct DefaultNormalizer {
    resolver: Option<Arc<dyn MediaResolver>>,
}

impl DefaultNormalizer {
    pub fn new(resolver: Option<Arc<dyn MediaResolver>>) -> Self {
        Self { resolver }
    }

    async fn normalize_listing(&self, item: &ListingItem) -> NormalizedItem {
        let id = item.id().unwrap_or(UNKNOWN_ID).to_string();
        let source = item.source().unwrap_or_default().to_string();
        let url = item.url().unwrap_or_default().to_string();
        let domain = item.domain().unwrap_or_default().to_lowercase();

        let mut media_url = url.clone();
        let mut gallery_urls = Vec::new();

        let video_like = item.is_video()
            || domain == "v.redd.it"
            || url.starts_with("https://v.redd.it")
            || domain.contains("redgifs")
            || domain.contains("gfycat");

        if video_like {
            let resolved = match &self.resolver {
                Some(resolver) => resolver.resolve(&url).await,
                None => None,
            };
            match resolved {
                Some(best) => media_url = best,
                None => {
                    debug!(url, "no resolved media, trying manual extraction");
                    if domain.contains("redgifs") {
                        if let Some(preview) = redgifs_preview(item) {
                            media_url = preview;
                        }
                    }
                    if media_url == url || media_url.contains("ifr") {
                        let possible = image_url(item);
                        media_url = if !possible.is_empty() && possible != url {
                            unescape(&possible)
                        } else {
                            url.clone()
                        };
                    }
                }
            }
        } else if item.is_gallery() {
            gallery_urls = gallery_images(item);
            if let Some(first) = gallery_urls.first() {
                media_url = first.clone();
            }
        } else {
            media_url = unescape(&image_url(item));
        }

        NormalizedItem {
            permalink: item
                .permalink()
                .map(str::to_string)
                .unwrap_or_else(|| NormalizedItem::fallback_permalink(&source, &id)),
            author: item.author().unwrap_or(DELETED_AUTHOR).to_string(),
            title: item.title().unwrap_or_default().to_string(),
            over_18: item.over_18(),
            ups: item.i64_field("ups"),
            num_comments: item.i64_field("num_comments"),
            created_utc: item.i64_field("created_utc"),
            id,
            source,
            url,
            media_url,
            gallery_urls,
        }
    }
}

#[async_trait]
impl Normalizer for DefaultNormalizer {
    async fn normalize(&self, item: &RawItem) -> NormalizedItem {
        match item {
            RawItem::Listing(listing) => self.normalize_listing(listing).await,
            RawItem::Cached(cached) => cached.item().clone(),
        }
    }
}

/// Best directly displayable URL for an item, falling back to its canonical URL.
pub fn image_url(item: &impl ItemFields) -> String {
    let url = item.url().unwrap_or_default();
    let lower = url.to_lowercase();

    for attr in ["media", "secure_media"] {
        if let Some(fallback) = item
            .field(attr)
            .and_then(|m| m.pointer("/reddit_video/fallback_url"))
            .and_then(Value::as_str)
        {
            return fallback.to_string();
        }
    }

    if lower.ends_with(".gif") {
        return url.to_string();
    }

    if item.is_gallery() {
        if let Some(first) = gallery_images(item).into_iter().next() {
            return first;
        }
    }

    if let Some(variants) = item
        .field("preview")
        .and_then(|p| p.pointer("/images/0/variants"))
    {
        for kind in ["gif", "mp4"] {
            if let Some(u) = variants
                .pointer(&format!("/{}/source/url", kind))
                .and_then(Value::as_str)
            {
                return u.to_string();
            }
        }
    }

    for attr in ["secure_media_embed", "media_embed"] {
        let content = item
            .field(attr)
            .and_then(|e| e.get("content"))
            .and_then(Value::as_str);
        let Some(src) = content
            .and_then(|c| EMBED_SRC.captures(c))
            .and_then(|c| c.get(1))
            .map(|m| m.as_str())
        else {
            continue;
        };
        if src.contains("embedly.com") {
            if let Some(inner) = unwrap_embedly(src) {
                return inner;
            }
        } else {
            return src.to_string();
        }
    }

    if IMAGE_EXT.iter().any(|ext| lower.ends_with(ext)) {
        return url.to_string();
    }

    if url.contains("imgur.com") && url.ends_with(".gifv") {
        return url.replace(".gifv", ".mp4");
    }

    if let Some(source) = item
        .field("preview")
        .and_then(|p| p.pointer("/images/0/source/url"))
        .and_then(Value::as_str)
    {
        return source.to_string();
    }

    url.to_string()
}

/// Every gallery image in display order, HTML-unescaped.
fn gallery_images(item: &impl ItemFields) -> Vec<String> {
    let Some(entries) = item
        .field("gallery_data")
        .and_then(|g| g.get("items"))
        .and_then(Value::as_array)
    else {
        return Vec::new();
    };
    let metadata = item.field("media_metadata");

    entries
        .iter()
        .filter_map(|entry| {
            let media_id = entry.get("media_id")?.as_str()?;
            let meta = metadata?.get(media_id)?;
            let u = meta
                .pointer("/s/u")
                .and_then(Value::as_str)
                .or_else(|| {
                    meta.get("p")
                        .and_then(Value::as_array)
                        .and_then(|p| p.last())
                        .and_then(|last| last.get("u"))
                        .and_then(Value::as_str)
                })?;
            Some(unescape(u))
        })
        .collect()
}

fn redgifs_preview(item: &impl ItemFields) -> Option<String> {
    let preview = item.field("preview")?;
    if let Some(fallback) = preview
        .pointer("/reddit_video_preview/fallback_url")
        .and_then(Value::as_str)
    {
        return Some(fallback.to_string());
    }
    preview
        .pointer("/images/0/variants/mp4/source/url")
        .and_then(Value::as_str)
        .map(unescape)
}

fn unwrap_embedly(src: &str) -> Option<String> {
    let parsed = url::Url::parse(&unescape(src)).ok()?;
    parsed
        .query_pairs()
        .find(|(k, _)| k == "url")
        .map(|(_, v)| v.into_owned())
}

/// Undoes the HTML entity escaping the listing API applies to URLs.
pub fn unescape(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::items::types::CachedItem;
    use serde_json::json;

    fn listing(value: Value) -> ListingItem {
        ListingItem::from_value(value).unwrap()
    }

    struct FixedResolver(Option<&'static str>);

    #[async_trait]
    impl MediaResolver for FixedResolver {
        async fn resolve(&self, _url: &str) -> Option<String> {
            self.0.map(str::to_string)
        }
    }

    #[tokio::test]
    async fn plain_image_keeps_url_and_fills_sentinels() {
        let item = RawItem::from(listing(json!({
            "url": "https://i.redd.it/cat.png",
            "subreddit": "pics",
            "title": "cat",
        })));
        let out = DefaultNormalizer::default().normalize(&item).await;
        assert_eq!(out.id, UNKNOWN_ID);
        assert_eq!(out.author, DELETED_AUTHOR);
        assert_eq!(out.media_url, "https://i.redd.it/cat.png");
        assert_eq!(out.permalink, "/r/pics/comments/?/");
        assert_eq!(out.created_utc, 0);
    }

    #[tokio::test]
    async fn gallery_collects_every_image() {
        let item = RawItem::from(listing(json!({
            "id": "g1",
            "url": "https://www.reddit.com/gallery/g1",
            "is_gallery": true,
            "gallery_data": {"items": [{"media_id": "a"}, {"media_id": "b"}]},
            "media_metadata": {
                "a": {"s": {"u": "https://preview.redd.it/a.jpg?w=1&amp;s=x"}},
                "b": {"p": [{"u": "https://preview.redd.it/b_small.jpg"}, {"u": "https://preview.redd.it/b.jpg"}]}
            }
        })));
        let out = DefaultNormalizer::default().normalize(&item).await;
        assert_eq!(
            out.gallery_urls,
            vec![
                "https://preview.redd.it/a.jpg?w=1&s=x",
                "https://preview.redd.it/b.jpg"
            ]
        );
        assert_eq!(out.media_url, out.gallery_urls[0]);
    }

    #[tokio::test]
    async fn hosted_video_prefers_resolver_then_fallback_url() {
        let raw = json!({
            "id": "v1",
            "url": "https://v.redd.it/v1",
            "domain": "v.redd.it",
            "is_video": true,
            "secure_media": {"reddit_video": {"fallback_url": "https://v.redd.it/v1/DASH_720.mp4"}}
        });

        let resolved = DefaultNormalizer::new(Some(Arc::new(FixedResolver(Some(
            "https://cdn.example/v1.mp4",
        )))))
        .normalize(&RawItem::from(listing(raw.clone())))
        .await;
        assert_eq!(resolved.media_url, "https://cdn.example/v1.mp4");

        let manual = DefaultNormalizer::new(Some(Arc::new(FixedResolver(None))))
            .normalize(&RawItem::from(listing(raw)))
            .await;
        assert_eq!(manual.media_url, "https://v.redd.it/v1/DASH_720.mp4");
    }

    #[tokio::test]
    async fn redgifs_uses_preview_video() {
        let item = RawItem::from(listing(json!({
            "url": "https://www.redgifs.com/watch/abc",
            "domain": "redgifs.com",
            "preview": {"reddit_video_preview": {"fallback_url": "https://v.redd.it/abc/DASH_480.mp4"}}
        })));
        let out = DefaultNormalizer::default().normalize(&item).await;
        assert_eq!(out.media_url, "https://v.redd.it/abc/DASH_480.mp4");
    }

    #[test]
    fn image_url_chain() {
        let imgur = listing(json!({"url": "https://i.imgur.com/x.gifv"}));
        assert_eq!(image_url(&imgur), "https://i.imgur.com/x.mp4");

        let variant = listing(json!({
            "url": "https://example.com/page",
            "preview": {"images": [{"variants": {"mp4": {"source": {"url": "https://preview.redd.it/x.mp4"}}}}]}
        }));
        assert_eq!(image_url(&variant), "https://preview.redd.it/x.mp4");

        let embed = listing(json!({
            "url": "https://example.com/page",
            "secure_media_embed": {"content": "<iframe src=\"https://cdn.embedly.com/widgets/media.html?url=https%3A%2F%2Fgfycat.com%2Fabc&amp;key=1\"></iframe>"}
        }));
        assert_eq!(image_url(&embed), "https://gfycat.com/abc");

        let bare = listing(json!({"url": "https://example.com/page"}));
        assert_eq!(image_url(&bare), "https://example.com/page");
    }

    #[tokio::test]
    async fn cached_items_pass_through() {
        let item = NormalizedItem {
            id: "c1".to_string(),
            source: "memes".to_string(),
            title: "t".to_string(),
            url: "u".to_string(),
            media_url: "https://i.redd.it/c1.png".to_string(),
            gallery_urls: vec![],
            permalink: "/r/memes/comments/c1/".to_string(),
            author: "someone".to_string(),
            over_18: false,
            ups: 0,
            num_comments: 0,
            created_utc: 0,
        };
        let out = DefaultNormalizer::default()
            .normalize(&RawItem::from(CachedItem::new(item.clone())))
            .await;
        assert_eq!(out, item);
    }
}
