use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn, Level};

use meme_engine::blocklist::FileBlocklist;
use meme_engine::cache::TieredKeywordCache;
use meme_engine::items::{DefaultNormalizer, YtDlpResolver};
use meme_engine::reddit::RedditClient;
use meme_engine::{Audience, Engine, EngineConfig, FetchRequest};

/// Ids remembered per audience so consecutive requests do not repeat.
const RECENT_WINDOW: usize = 200;

const DEFAULT_GENERAL: &[&str] = &["memes", "dankmemes", "funny"];
const DEFAULT_RESTRICTED: &[&str] = &["nsfwmeme"];
const ALWAYS_WARM: &[&str] = &["memes", "nsfwmeme"];

fn sources(key: &str, defaults: &[&str]) -> Vec<String> {
    let configured: Vec<String> = dotenv::var(key)
        .unwrap_or_default()
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if configured.is_empty() {
        defaults.iter().map(|s| s.to_string()).collect()
    } else {
        configured
    }
}

/// `<general|restricted> [keyword words...]`
fn parse_request(line: &str) -> Option<(Audience, Option<String>)> {
    let line = line.trim();
    let (head, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let audience = match head.to_lowercase().as_str() {
        "general" | "sfw" => Audience::General,
        "restricted" | "nsfw" => Audience::Restricted,
        _ => return None,
    };
    let keyword = Some(rest.trim().to_string()).filter(|k| !k.is_empty());
    Some((audience, keyword))
}

struct RecentIds {
    ids: VecDeque<String>,
}

impl RecentIds {
    fn new() -> Self {
        Self {
            ids: VecDeque::with_capacity(RECENT_WINDOW),
        }
    }

    fn snapshot(&self) -> HashSet<String> {
        self.ids.iter().cloned().collect()
    }

    fn push(&mut self, id: &str) {
        if self.ids.len() == RECENT_WINDOW {
            self.ids.pop_front();
        }
        self.ids.push_back(id.to_string());
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load env
    let _ = dotenv::dotenv();
    let level = dotenv::var("MEMER_LOG_LEVEL")
        .ok()
        .and_then(|s| s.parse::<Level>().ok())
        .unwrap_or(Level::DEBUG);
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    let config = EngineConfig::from_env();
    let general = sources("MEMER_SOURCES_GENERAL", DEFAULT_GENERAL);
    let restricted = sources("MEMER_SOURCES_RESTRICTED", DEFAULT_RESTRICTED);

    let client = Arc::new(RedditClient::from_config(&config)?);
    info!(base_url = %config.base_url, "source client initialized");

    let cache = Arc::new(TieredKeywordCache::new(config.cache.clone()));
    info!("Keyword cache at {:?}", config.cache.persistent_dir);

    let normalizer = Arc::new(DefaultNormalizer::new(Some(Arc::new(YtDlpResolver::default()))));

    let mut builder = Engine::builder(config)
        .client(client)
        .keyword_cache(cache)
        .normalizer(normalizer);
    if let Ok(path) = dotenv::var("MEMER_BLOCKLIST_FILE") {
        info!(path = %path, "Blocklist file configured");
        builder = builder.blocklist(Arc::new(FileBlocklist::new(path)));
    }
    let engine = builder.build().context("Failed to build engine")?;

    let mut warm: Vec<String> = Vec::new();
    for source in general
        .iter()
        .chain(&restricted)
        .map(String::as_str)
        .chain(ALWAYS_WARM.iter().copied())
    {
        if !warm.iter().any(|s| s.eq_ignore_ascii_case(source)) {
            warm.push(source.to_string());
        }
    }
    engine.start_warmup(warm);

    info!(
        general = general.len(),
        restricted = restricted.len(),
        "Ready, reading requests from stdin"
    );

    let mut recent_general = RecentIds::new();
    let mut recent_restricted = RecentIds::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            line = lines.next_line() => match line? {
                Some(line) => line,
                None => break,
            },
        };
        if line.trim().is_empty() {
            continue;
        }
        let Some((audience, keyword)) = parse_request(&line) else {
            warn!(line = %line, "Expected `<general|restricted> [keyword]`");
            continue;
        };

        let (pool, recent) = match audience {
            Audience::General => (&general, &mut recent_general),
            Audience::Restricted => (&restricted, &mut recent_restricted),
        };
        let mut request = FetchRequest::new(pool.clone(), audience).excluding(recent.snapshot());
        if let Some(keyword) = keyword {
            request = request.keyword(keyword);
        }

        let outcome = engine.resolve(request).await;
        if let Some(item) = &outcome.item {
            recent.push(&item.id);
        }
        println!("{}", serde_json::to_string(&outcome)?);
    }

    engine.shutdown().await;
    info!("Shut down");
    Ok(())
}
