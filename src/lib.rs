pub mod blocklist;
pub mod cache;
pub mod dedup;
pub mod engine;
pub mod error;
pub mod fetch;
pub mod items;
pub mod reddit;
pub mod state;
pub mod throttle;
pub mod warm;

#[cfg(test)]
mod testing;

pub use engine::{Engine, EngineBuilder, FetchOutcome, FetchRequest, ItemFilter, Tier};
pub use error::FetchError;
pub use items::{Audience, NormalizedItem};
pub use state::{CacheConfig, EngineConfig};
