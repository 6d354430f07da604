use crate::cache::{CacheLayer, CacheResult, CollectionKey, QueryCache};
use crate::model::ActivityLog;
use crate::query::Query;
use crate::store::StoreError;
use std::sync::Arc;

use super::DynStore;

/// Read-only activity feed. Entries are written by the backend; other
/// services invalidate the feed after each project write.
pub struct ActivityService {
  layer: CacheLayer,
  store: Arc<DynStore<ActivityLog>>,
}

impl ActivityService {
  pub fn new(cache: QueryCache, store: DynStore<ActivityLog>) -> Self {
    Self {
      layer: CacheLayer::new(cache),
      store: Arc::new(store),
    }
  }

  pub async fn list(&self, project_id: &str) -> Result<CacheResult<Vec<ActivityLog>>, StoreError> {
    let store = Arc::clone(&self.store);
    self
      .layer
      .fetch_list::<ActivityLog, _, _>(&CollectionKey::activity(project_id), || async move {
        store.list(project_id).await
      })
      .await
  }

  pub fn query(&self, project_id: &str) -> Query<Vec<ActivityLog>> {
    Query::collection(
      self.layer.clone(),
      CollectionKey::activity(project_id),
      Arc::clone(&self.store),
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{CacheSource, FreshnessPolicy};
  use crate::store::MemoryStore;

  #[tokio::test]
  async fn test_offline_falls_back_to_invalidated_feed() {
    let cache = QueryCache::new(FreshnessPolicy::default());
    let memory = Arc::new(MemoryStore::<ActivityLog>::new("act"));
    let service = ActivityService::new(cache.clone(), memory.clone());

    assert!(service.list("proj-001").await.unwrap().data.is_empty());

    cache.invalidate(&CollectionKey::activity("proj-001"));
    memory.set_offline(true);
    let result = service.list("proj-001").await.unwrap();
    assert_eq!(result.source, CacheSource::Offline);

    cache.clear();
    assert!(service.list("proj-001").await.is_err());
  }
}
