use std::sync::Arc;

use super::{with_activity, Collection, DynStore};
use crate::cache::{CacheResult, QueryCache};
use crate::feedback::Feedback;
use crate::model::{Material, MaterialDraft, MaterialPatch, MaterialStatus};
use crate::mutation::{MutationError, MutationMessages, MutationRequest, Settled};
use crate::query::Query;
use crate::store::StoreError;

/// Materials schedule for a project.
pub struct MaterialService {
  materials: Collection<Material>,
}

impl MaterialService {
  pub fn new(cache: QueryCache, store: DynStore<Material>, feedback: Arc<dyn Feedback>) -> Self {
    Self {
      materials: Collection::new(cache, store, feedback),
    }
  }

  pub async fn list(&self, project_id: &str) -> Result<CacheResult<Vec<Material>>, StoreError> {
    self.materials.list(project_id).await
  }

  pub fn query(&self, project_id: &str) -> Query<Vec<Material>> {
    self.materials.query(project_id)
  }

  pub async fn create(&self, draft: MaterialDraft) -> Result<Settled<Material>, MutationError> {
    let project_id = draft.project_id.clone();
    let request = MutationRequest::create(self.materials.key(&project_id), draft);
    self.materials.run(with_activity(request, &project_id)).await
  }

  pub async fn update(
    &self,
    project_id: &str,
    id: &str,
    patch: MaterialPatch,
  ) -> Result<Settled<Material>, MutationError> {
    let request = MutationRequest::update(self.materials.key(project_id), id, patch);
    self.materials.run(with_activity(request, project_id)).await
  }

  /// Move a material through required → ordered → delivered → installed.
  pub async fn set_status(
    &self,
    project_id: &str,
    id: &str,
    status: MaterialStatus,
  ) -> Result<Settled<Material>, MutationError> {
    let patch = MaterialPatch {
      status: Some(status),
      ..MaterialPatch::default()
    };
    let request = MutationRequest::update(self.materials.key(project_id), id, patch).with_messages(
      MutationMessages::new("Material status updated", "Failed to update material status"),
    );
    self.materials.run(with_activity(request, project_id)).await
  }

  pub async fn delete(&self, project_id: &str, id: &str) -> Result<Settled<Material>, MutationError> {
    let request = MutationRequest::delete(self.materials.key(project_id), id);
    self.materials.run(with_activity(request, project_id)).await
  }

  pub async fn reorder(
    &self,
    project_id: &str,
    ids: Vec<String>,
  ) -> Result<Settled<Material>, MutationError> {
    let request = MutationRequest::reorder(self.materials.key(project_id), ids);
    self.materials.run(with_activity(request, project_id)).await
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::FreshnessPolicy;
  use crate::feedback::RecordingFeedback;
  use crate::services::Stores;
  use crate::store::MemoryStore;

  #[tokio::test]
  async fn test_status_change_uses_its_own_messages() {
    let feedback = Arc::new(RecordingFeedback::new());
    let service = MaterialService::new(
      QueryCache::new(FreshnessPolicy::default()),
      Stores::demo("proj-001", "user-001").materials,
      Arc::clone(&feedback) as Arc<dyn Feedback>,
    );
    service.list("proj-001").await.unwrap();

    service
      .set_status("proj-001", "mat-seed-2", MaterialStatus::Ordered)
      .await
      .unwrap();
    let error = service
      .set_status("proj-001", "missing", MaterialStatus::Ordered)
      .await
      .unwrap_err();

    assert_eq!(feedback.successes(), vec!["Material status updated"]);
    assert_eq!(error.message, "Failed to update material status");
    let listed = service.list("proj-001").await.unwrap().data;
    assert_eq!(listed[1].status, MaterialStatus::Ordered);
  }

  #[tokio::test]
  async fn test_reorder_failure_restores_order() {
    let store = Arc::new(MemoryStore::<Material>::new("mat"));
    let feedback = Arc::new(RecordingFeedback::new());
    let cache = QueryCache::new(FreshnessPolicy::default());
    let service = MaterialService::new(cache.clone(), store.clone(), feedback.clone());

    for name in ["Carpet", "Tiles", "Paint"] {
      service
        .create(MaterialDraft {
          project_id: "proj-001".to_string(),
          name: name.to_string(),
          quantity: 1.0,
          unit: "lot".to_string(),
        })
        .await
        .unwrap();
    }
    let before = service.list("proj-001").await.unwrap().data;

    store.fail_next(StoreError::Transport("timeout".to_string()));
    let error = service
      .reorder("proj-001", vec!["mat-003".to_string(), "mat-001".to_string()])
      .await
      .unwrap_err();

    assert_eq!(error.message, "Failed to reorder materials");
    let entry = cache.read::<Material>(&crate::cache::CollectionKey::materials("proj-001")).unwrap();
    assert_eq!(entry.records, before);
  }
}
