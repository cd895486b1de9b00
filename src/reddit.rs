use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::FetchError;
use crate::items::{ListingItem, RawItem};
use crate::state::EngineConfig;

/// One remote content service. Every method is a single attempt; retries,
/// throttling and concurrency limits are applied by `Fetcher`.
#[async_trait]
pub trait SourceClient: Send + Sync {
    /// Up to `limit` items of a named listing (`hot`, `new`, `top`, ...).
    async fn listing(
        &self,
        source: &str,
        category: &str,
        limit: usize,
    ) -> std::result::Result<Vec<RawItem>, FetchError>;

    /// Up to `limit` items matching `keyword`, newest first.
    async fn search(
        &self,
        source: &str,
        keyword: &str,
        limit: usize,
    ) -> std::result::Result<Vec<RawItem>, FetchError>;

    /// One item from the source's random endpoint.
    async fn random(&self, source: &str) -> std::result::Result<Option<RawItem>, FetchError>;
}

/// Client for the public JSON endpoints of a reddit-style service.
pub struct RedditClient {
    client: reqwest::Client,
    base_url: String,
}

impl RedditClient {
    pub fn new(base_url: &str, user_agent: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        Self::new(&config.base_url, &config.user_agent, config.request_timeout)
    }

    fn endpoint(&self, source: &str, path: &str) -> String {
        format!("{}/r/{}/{}.json", self.base_url, source, path)
    }

    async fn get_json(
        &self,
        source: &str,
        req: reqwest::RequestBuilder,
        denied: &[StatusCode],
    ) -> std::result::Result<Value, FetchError> {
        let resp = req.send().await?;
        let status = resp.status();
        if denied.contains(&status) {
            warn!(source, status = status.as_u16(), "source denied access");
            return Err(FetchError::Unavailable(source.to_string()));
        }
        if !status.is_success() {
            return Err(FetchError::Transient(format!(
                "{} returned {}",
                source, status
            )));
        }
        let text = resp.text().await?;
        Ok(serde_json::from_str(&text)?)
    }
}

/// Extracts `data.children[*].data` from a listing document.
fn listing_children(doc: &Value) -> Vec<RawItem> {
    doc.pointer("/data/children")
        .and_then(Value::as_array)
        .map(|children| {
            children
                .iter()
                .filter_map(|child| child.get("data").cloned())
                .filter_map(ListingItem::from_value)
                .map(RawItem::from)
                .collect()
        })
        .unwrap_or_default()
}

const DENIED: &[StatusCode] = &[StatusCode::FORBIDDEN, StatusCode::NOT_FOUND];

// "No permission" and "unsupported for this source" both land here.
const RANDOM_DENIED: &[StatusCode] = &[
    StatusCode::BAD_REQUEST,
    StatusCode::FORBIDDEN,
    StatusCode::NOT_FOUND,
];

#[async_trait]
impl SourceClient for RedditClient {
    async fn listing(
        &self,
        source: &str,
        category: &str,
        limit: usize,
    ) -> std::result::Result<Vec<RawItem>, FetchError> {
        let req = self
            .client
            .get(self.endpoint(source, category))
            .query(&[("limit", limit.to_string())]);
        let doc = self.get_json(source, req, DENIED).await?;
        let items = listing_children(&doc);
        debug!(source, category, count = items.len(), "listing fetched");
        Ok(items)
    }

    async fn search(
        &self,
        source: &str,
        keyword: &str,
        limit: usize,
    ) -> std::result::Result<Vec<RawItem>, FetchError> {
        let req = self.client.get(self.endpoint(source, "search")).query(&[
            ("q", keyword.to_string()),
            ("restrict_sr", "1".to_string()),
            ("sort", "new".to_string()),
            ("t", "all".to_string()),
            ("include_over_18", "on".to_string()),
            ("limit", limit.to_string()),
        ]);
        let doc = self.get_json(source, req, DENIED).await?;
        let items = listing_children(&doc);
        debug!(source, keyword, count = items.len(), "search fetched");
        Ok(items)
    }

    async fn random(&self, source: &str) -> std::result::Result<Option<RawItem>, FetchError> {
        let req = self.client.get(self.endpoint(source, "random"));
        let doc = self.get_json(source, req, RANDOM_DENIED).await?;
        // The post listing comes first when comments are included
        let listing = match &doc {
            Value::Array(parts) => parts.first().cloned().unwrap_or(Value::Null),
            other => other.clone(),
        };
        Ok(listing_children(&listing).into_iter().next())
    }
}
