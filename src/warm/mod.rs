pub mod scheduler;

pub use scheduler::WarmupScheduler;

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use tracing::debug;

use crate::items::RawItem;

type BufferKey = (String, String);

/// Per (source, category) stacks of not-yet-served items.
///
/// The back of each deque is the hot end: `pop` serves from it and fresh
/// listings end there. `seed` inserts at the cold front.
#[derive(Default)]
pub struct WarmBufferStore {
    buffers: Mutex<HashMap<BufferKey, VecDeque<RawItem>>>,
}

impl WarmBufferStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(source: &str, category: &str) -> BufferKey {
        (source.to_string(), category.to_string())
    }

    /// Replaces a buffer with `items`, keeping at most the last `capacity`.
    pub fn replace(&self, source: &str, category: &str, items: Vec<RawItem>, capacity: usize) {
        let skip = items.len().saturating_sub(capacity);
        let buffer: VecDeque<RawItem> = items.into_iter().skip(skip).collect();
        let count = buffer.len();
        if let Ok(mut buffers) = self.buffers.lock() {
            buffers.insert(Self::key(source, category), buffer);
        }
        debug!(source, category, count, "warm buffer replaced");
    }

    /// Removes and returns the hottest item of a buffer.
    pub fn pop(&self, source: &str, category: &str) -> Option<RawItem> {
        let mut buffers = self.buffers.lock().ok()?;
        buffers.get_mut(&Self::key(source, category))?.pop_back()
    }

    /// Adds an item at the cold end, evicting from the hot end when full.
    pub fn seed(&self, source: &str, category: &str, item: RawItem, capacity: usize) {
        if capacity == 0 {
            return;
        }
        let Ok(mut buffers) = self.buffers.lock() else {
            return;
        };
        let buffer = buffers.entry(Self::key(source, category)).or_default();
        while buffer.len() >= capacity {
            buffer.pop_back();
        }
        buffer.push_front(item);
    }

    pub fn len(&self, source: &str, category: &str) -> usize {
        self.buffers
            .lock()
            .ok()
            .and_then(|b| b.get(&Self::key(source, category)).map(VecDeque::len))
            .unwrap_or(0)
    }
}
