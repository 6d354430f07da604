//! Cache layer that orchestrates caching logic with record-store fetching.

use std::future::Future;
use tracing::{debug, warn};

use super::key::CollectionKey;
use super::query_cache::QueryCache;
use super::traits::{CacheResult, Cacheable};
use crate::store::StoreError;

/// Cache layer that manages read-through caching for collection lists.
///
/// This layer sits between readers and the record store, providing
/// cache-first reads with offline fallback. It holds no state of its own
/// beyond the shared [`QueryCache`].
#[derive(Clone)]
pub struct CacheLayer {
  cache: QueryCache,
}

impl CacheLayer {
  pub fn new(cache: QueryCache) -> Self {
    Self { cache }
  }

  pub fn cache(&self) -> &QueryCache {
    &self.cache
  }

  /// Fetch a list with cache-first strategy.
  ///
  /// 1. Check cache - if fresh, return immediately
  /// 2. If stale/missing, fetch from the store
  /// 3. On store failure, return stale cache (offline mode)
  /// 4. Update cache with new data
  pub async fn fetch_list<T, F, Fut>(
    &self,
    key: &CollectionKey,
    fetcher: F,
  ) -> Result<CacheResult<Vec<T>>, StoreError>
  where
    T: Cacheable + 'static,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Vec<T>, StoreError>>,
  {
    let Some(cached) = self.cache.read::<T>(key) else {
      // No cache, must fetch
      debug!(key = %key, "cache miss");
      let data = fetcher().await?;
      self.cache.write_confirmed(key, data.clone());
      return Ok(CacheResult::from_network(data));
    };

    if !cached.is_stale {
      return Ok(CacheResult::from_cache(
        cached.records,
        cached.updated_at,
        false,
      ));
    }

    match fetcher().await {
      Ok(data) => {
        self.cache.write_confirmed(key, data.clone());
        Ok(CacheResult::from_network(data))
      }
      Err(e) => {
        warn!(key = %key, error = %e, "refresh failed, serving stale cache");
        Ok(CacheResult::offline(cached.records, cached.updated_at))
      }
    }
  }

  /// Fetch from the store regardless of freshness and replace the cached list.
  pub async fn refetch_list<T, F, Fut>(
    &self,
    key: &CollectionKey,
    fetcher: F,
  ) -> Result<Vec<T>, StoreError>
  where
    T: Cacheable + 'static,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Vec<T>, StoreError>>,
  {
    let data = fetcher().await?;
    self.cache.write_confirmed(key, data.clone());
    Ok(data)
  }
}
