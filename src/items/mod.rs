pub mod normalize;
pub mod types;

pub use normalize::{DefaultNormalizer, MediaResolver, Normalizer, YtDlpResolver};
pub use types::{
    Audience, CachedItem, ItemFields, ListingItem, NormalizedItem, RawItem, DELETED_AUTHOR,
    UNKNOWN_ID,
};
