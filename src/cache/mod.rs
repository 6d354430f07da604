//! Query cache for collection lists.
//!
//! This module provides the client-side projection of the record store:
//! - Keeps the last known list per collection key, confirmed or predicted
//! - Tracks freshness per entity kind and explicit invalidation
//! - Persists confirmed lists for warm starts (optional)
//! - Provides basic offline mode (serve stale cache when the store is unreachable)

mod key;
mod layer;
mod query_cache;
mod storage;
mod traits;

pub use key::CollectionKey;
pub use layer::CacheLayer;
pub use query_cache::{CacheEntry, CacheTxn, FreshnessPolicy, QueryCache, Snapshot};
pub use storage::{CacheStorage, NoopStorage, PersistedEntry, SqliteStorage};
pub use traits::{CacheResult, CacheSource, Cacheable};
