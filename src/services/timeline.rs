use std::sync::Arc;

use super::{with_activity, Collection, DynStore};
use crate::cache::{CacheResult, CollectionKey, QueryCache};
use crate::feedback::Feedback;
use crate::model::{
  DependencyDraft, TimelineDependency, TimelineItem, TimelineItemDraft, TimelineItemPatch,
};
use crate::mutation::{Cascade, MutationError, MutationRequest, Settled};
use crate::query::Query;
use crate::store::StoreError;

/// Gantt rows and the dependencies between them.
pub struct TimelineService {
  items: Collection<TimelineItem>,
  dependencies: Collection<TimelineDependency>,
}

impl TimelineService {
  pub fn new(
    cache: QueryCache,
    items: DynStore<TimelineItem>,
    dependencies: DynStore<TimelineDependency>,
    feedback: Arc<dyn Feedback>,
  ) -> Self {
    Self {
      items: Collection::new(cache.clone(), items, Arc::clone(&feedback)),
      dependencies: Collection::new(cache, dependencies, feedback),
    }
  }

  pub async fn items(&self, project_id: &str) -> Result<CacheResult<Vec<TimelineItem>>, StoreError> {
    self.items.list(project_id).await
  }

  pub async fn dependencies(
    &self,
    project_id: &str,
  ) -> Result<CacheResult<Vec<TimelineDependency>>, StoreError> {
    self.dependencies.list(project_id).await
  }

  pub fn items_query(&self, project_id: &str) -> Query<Vec<TimelineItem>> {
    self.items.query(project_id)
  }

  pub fn dependencies_query(&self, project_id: &str) -> Query<Vec<TimelineDependency>> {
    self.dependencies.query(project_id)
  }

  pub async fn create_item(
    &self,
    draft: TimelineItemDraft,
  ) -> Result<Settled<TimelineItem>, MutationError> {
    let project_id = draft.project_id.clone();
    let request = MutationRequest::create(CollectionKey::timeline_items(&project_id), draft);
    self.items.run(with_activity(request, &project_id)).await
  }

  pub async fn update_item(
    &self,
    project_id: &str,
    id: &str,
    patch: TimelineItemPatch,
  ) -> Result<Settled<TimelineItem>, MutationError> {
    let request = MutationRequest::update(CollectionKey::timeline_items(project_id), id, patch);
    self.items.run(with_activity(request, project_id)).await
  }

  /// Delete an item. Dependencies touching it disappear from the cached
  /// dependency list straight away and come back if the store refuses.
  pub async fn delete_item(
    &self,
    project_id: &str,
    id: &str,
  ) -> Result<Settled<TimelineItem>, MutationError> {
    let request = MutationRequest::delete(CollectionKey::timeline_items(project_id), id).with_cascade(
      Cascade::prune_references::<TimelineDependency>(CollectionKey::timeline_dependencies(project_id)),
    );
    self.items.run(with_activity(request, project_id)).await
  }

  pub async fn reorder_items(
    &self,
    project_id: &str,
    ids: Vec<String>,
  ) -> Result<Settled<TimelineItem>, MutationError> {
    let request = MutationRequest::reorder(CollectionKey::timeline_items(project_id), ids);
    self.items.run(with_activity(request, project_id)).await
  }

  pub async fn create_dependency(
    &self,
    draft: DependencyDraft,
  ) -> Result<Settled<TimelineDependency>, MutationError> {
    let project_id = draft.project_id.clone();
    let request = MutationRequest::create(CollectionKey::timeline_dependencies(&project_id), draft);
    self.dependencies.run(with_activity(request, &project_id)).await
  }

  pub async fn delete_dependency(
    &self,
    project_id: &str,
    id: &str,
  ) -> Result<Settled<TimelineDependency>, MutationError> {
    let request = MutationRequest::delete(CollectionKey::timeline_dependencies(project_id), id);
    self.dependencies.run(with_activity(request, project_id)).await
  }
}
