use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant, SystemTime};

use tracing::{info, warn};

/// Source of blocked domains, polled on every validity check.
pub trait BlocklistProvider: Send + Sync {
    fn blocked_domains(&self) -> Arc<HashSet<String>>;

    /// True when `domain` contains any blocked entry.
    fn is_blocked(&self, domain: &str) -> bool {
        let domain = domain.to_lowercase();
        self.blocked_domains()
            .iter()
            .any(|b| !b.is_empty() && domain.contains(b.as_str()))
    }
}

/// Fixed blocklist, set at startup.
#[derive(Default)]
pub struct StaticBlocklist {
    domains: Arc<HashSet<String>>,
}

impl StaticBlocklist {
    pub fn new<I, S>(domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            domains: Arc::new(
                domains
                    .into_iter()
                    .map(|d| d.as_ref().trim().to_lowercase())
                    .filter(|d| !d.is_empty())
                    .collect(),
            ),
        }
    }
}

impl BlocklistProvider for StaticBlocklist {
    fn blocked_domains(&self) -> Arc<HashSet<String>> {
        self.domains.clone()
    }
}

/// Default spacing between modification-time checks of a `FileBlocklist`.
pub const DEFAULT_RECHECK: Duration = Duration::from_secs(5);

struct Loaded {
    /// When the file was last stat'ed.
    checked_at: Option<Instant>,
    /// Modification time seen at the last load attempt (outer `None`: never loaded).
    mtime: Option<Option<SystemTime>>,
    domains: Arc<HashSet<String>>,
}

/// Blocklist file re-read whenever its modification time changes, checked at
/// most once per `recheck` interval.
/// Entries are separated by commas or newlines; `#` starts a comment line.
pub struct FileBlocklist {
    path: PathBuf,
    recheck: Duration,
    loaded: RwLock<Loaded>,
}

impl FileBlocklist {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_recheck(path, DEFAULT_RECHECK)
    }

    pub fn with_recheck(path: impl Into<PathBuf>, recheck: Duration) -> Self {
        let list = Self {
            path: path.into(),
            recheck,
            loaded: RwLock::new(Loaded {
                checked_at: None,
                mtime: None,
                domains: Arc::new(HashSet::new()),
            }),
        };
        list.refresh();
        list
    }

    fn modified(path: &Path) -> Option<SystemTime> {
        std::fs::metadata(path).and_then(|m| m.modified()).ok()
    }

    fn parse(contents: &str) -> HashSet<String> {
        contents
            .lines()
            .filter(|line| !line.trim_start().starts_with('#'))
            .flat_map(|line| line.split(','))
            .map(|d| d.trim().to_lowercase())
            .filter(|d| !d.is_empty())
            .collect()
    }

    /// Reloads the file if the recheck interval has passed and the file
    /// changed since the last load.
    fn refresh(&self) -> Arc<HashSet<String>> {
        if let Ok(loaded) = self.loaded.read() {
            let fresh = loaded
                .checked_at
                .is_some_and(|at| at.elapsed() < self.recheck);
            if fresh {
                return loaded.domains.clone();
            }
        }

        let mtime = Self::modified(&self.path);
        let Ok(mut loaded) = self.loaded.write() else {
            return Arc::default();
        };
        loaded.checked_at = Some(Instant::now());
        if loaded.mtime == Some(mtime) {
            return loaded.domains.clone();
        }
        loaded.mtime = Some(mtime);

        match std::fs::read_to_string(&self.path) {
            Ok(contents) => {
                loaded.domains = Arc::new(Self::parse(&contents));
                info!(
                    path = %self.path.display(),
                    count = loaded.domains.len(),
                    "blocklist loaded"
                );
            }
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "blocklist unreadable, keeping previous"
                );
            }
        }
        loaded.domains.clone()
    }
}

impl BlocklistProvider for FileBlocklist {
    fn blocked_domains(&self) -> Arc<HashSet<String>> {
        self.refresh()
    }
}
