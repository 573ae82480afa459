//! Weighted content cache with soft-delete statuses.
//!
//! - [`WeightedCache`]: capacity-bounded store with LRU eviction
//! - [`CacheEntry`]: a cached item with kind, status, and retrieval priority
//! - [`CacheSnapshot`]: on-disk form used by save and load
//!
//! Lifecycle changes never mutate content: archiving or deprecating an
//! entry flips its status and retrieval priority while id and size stay
//! fixed, so a restore brings back exactly what was stored.

mod entry;
mod persist;
mod store;

pub use entry::{content_id, CacheEntry, EntryKind, EntryStatus};
pub use persist::CacheSnapshot;
pub use store::{CacheStats, WeightedCache};
