use std::sync::Arc;

use super::{with_activity, Collection, DynStore};
use crate::cache::{CacheResult, QueryCache};
use crate::feedback::Feedback;
use crate::model::{ScopeItem, ScopeItemDraft, ScopeItemPatch};
use crate::mutation::{MutationError, MutationRequest, Settled};
use crate::query::Query;
use crate::store::StoreError;

/// Agreed scope of works for a project.
pub struct ScopeItemService {
  items: Collection<ScopeItem>,
}

impl ScopeItemService {
  pub fn new(cache: QueryCache, store: DynStore<ScopeItem>, feedback: Arc<dyn Feedback>) -> Self {
    Self {
      items: Collection::new(cache, store, feedback),
    }
  }

  pub async fn list(&self, project_id: &str) -> Result<CacheResult<Vec<ScopeItem>>, StoreError> {
    self.items.list(project_id).await
  }

  pub fn query(&self, project_id: &str) -> Query<Vec<ScopeItem>> {
    self.items.query(project_id)
  }

  pub async fn create(&self, draft: ScopeItemDraft) -> Result<Settled<ScopeItem>, MutationError> {
    let project_id = draft.project_id.clone();
    let request = MutationRequest::create(self.items.key(&project_id), draft);
    self.items.run(with_activity(request, &project_id)).await
  }

  pub async fn update(
    &self,
    project_id: &str,
    id: &str,
    patch: ScopeItemPatch,
  ) -> Result<Settled<ScopeItem>, MutationError> {
    let request = MutationRequest::update(self.items.key(project_id), id, patch);
    self.items.run(with_activity(request, project_id)).await
  }

  pub async fn delete(&self, project_id: &str, id: &str) -> Result<Settled<ScopeItem>, MutationError> {
    let request = MutationRequest::delete(self.items.key(project_id), id);
    self.items.run(with_activity(request, project_id)).await
  }

  pub async fn reorder(
    &self,
    project_id: &str,
    ids: Vec<String>,
  ) -> Result<Settled<ScopeItem>, MutationError> {
    let request = MutationRequest::reorder(self.items.key(project_id), ids);
    self.items.run(with_activity(request, project_id)).await
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{CollectionKey, FreshnessPolicy};
  use crate::feedback::RecordingFeedback;
  use crate::model::ScopeStatus;
  use crate::services::Stores;

  #[tokio::test]
  async fn test_create_update_delete() {
    let cache = QueryCache::new(FreshnessPolicy::default());
    let feedback = Arc::new(RecordingFeedback::new());
    let service = ScopeItemService::new(
      cache.clone(),
      Stores::demo("proj-001", "user-001").scope_items,
      Arc::clone(&feedback) as Arc<dyn Feedback>,
    );
    service.list("proj-001").await.unwrap();

    let created = service
      .create(ScopeItemDraft {
        project_id: "proj-001".to_string(),
        name: "Kitchenette".to_string(),
        description: Some("Tea point with boiling tap".to_string()),
      })
      .await
      .unwrap();
    let id = created.record().map(|r| r.id.clone()).unwrap();

    service
      .update(
        "proj-001",
        &id,
        ScopeItemPatch {
          status: Some(ScopeStatus::Complete),
          description: Some(None),
          ..ScopeItemPatch::default()
        },
      )
      .await
      .unwrap();
    let listed = service.list("proj-001").await.unwrap().data;
    let kitchenette = listed.iter().find(|r| r.id == id).unwrap();
    assert_eq!(kitchenette.status, ScopeStatus::Complete);
    assert_eq!(kitchenette.description, None);

    service.delete("proj-001", &id).await.unwrap();
    assert!(cache.is_stale(&CollectionKey::scope_items("proj-001")));
    assert_eq!(service.list("proj-001").await.unwrap().data.len(), 2);
    assert_eq!(
      feedback.successes(),
      vec!["Scope item created", "Scope item updated", "Scope item deleted"]
    );
  }
}
