//! Typed entry points for each collection.
//!
//! Services pick the cache keys, cascades and messages for a write and hand
//! it to a [`MutationCoordinator`]; reads go through the [`CacheLayer`].

mod activity;
mod materials;
mod notifications;
mod scope;
mod timeline;

use chrono::{Duration, Utc};
use std::sync::Arc;

use crate::cache::{CacheLayer, CacheResult, CollectionKey, QueryCache};
use crate::feedback::Feedback;
use crate::model::{
  ActivityLog, DependencyType, EntityKind, Material, MaterialStatus, Notification, Record,
  ScopeItem, ScopeStatus, TimelineDependency, TimelineItem, TimelineItemKind,
};
use crate::mutation::{Cascade, MutationCoordinator, MutationError, MutationRequest, Settled};
use crate::query::Query;
use crate::store::{MemoryStore, RecordStore, RestStore, StoreError};

pub use activity::ActivityService;
pub use materials::MaterialService;
pub use notifications::NotificationService;
pub use scope::ScopeItemService;
pub use timeline::TimelineService;

/// A record store behind a trait object, so REST and in-memory backends share one type.
pub type DynStore<R> = Arc<dyn RecordStore<R>>;

/// One store per collection.
#[derive(Clone)]
pub struct Stores {
  pub timeline_items: DynStore<TimelineItem>,
  pub timeline_dependencies: DynStore<TimelineDependency>,
  pub notifications: DynStore<Notification>,
  pub materials: DynStore<Material>,
  pub scope_items: DynStore<ScopeItem>,
  pub activity: DynStore<ActivityLog>,
}

impl Stores {
  pub fn rest(store: RestStore) -> Self {
    let store = Arc::new(store);
    Self {
      timeline_items: store.clone(),
      timeline_dependencies: store.clone(),
      notifications: store.clone(),
      materials: store.clone(),
      scope_items: store.clone(),
      activity: store,
    }
  }

  /// In-process stores seeded with a small fit-out project.
  pub fn demo(project_id: &str, user_id: &str) -> Self {
    let seed = DemoSeed { project_id, user_id };
    Self {
      timeline_items: Arc::new(
        MemoryStore::new("item")
          .with_records(seed.timeline_items())
          .with_delete_rule(phase_with_children),
      ),
      timeline_dependencies: Arc::new(
        MemoryStore::new("dep").with_records(seed.timeline_dependencies()),
      ),
      notifications: Arc::new(MemoryStore::new("ntf").with_records(seed.notifications())),
      materials: Arc::new(MemoryStore::new("mat").with_records(seed.materials())),
      scope_items: Arc::new(MemoryStore::new("scope").with_records(seed.scope_items())),
      activity: Arc::new(MemoryStore::new("act").with_records(seed.activity())),
    }
  }
}

/// Phases that still have child items cannot be deleted.
pub fn phase_with_children(records: &[TimelineItem], target: &TimelineItem) -> Option<String> {
  let has_children = records
    .iter()
    .any(|r| r.parent_id.as_deref() == Some(target.id.as_str()));
  (target.kind == TimelineItemKind::Phase && has_children).then(|| "Cannot delete phase".to_string())
}

/// Every collection service, sharing one cache and feedback surface.
pub struct Services {
  pub cache: QueryCache,
  pub timeline: TimelineService,
  pub notifications: NotificationService,
  pub materials: MaterialService,
  pub scope: ScopeItemService,
  pub activity: ActivityService,
}

impl Services {
  pub fn new(cache: QueryCache, stores: Stores, feedback: Arc<dyn Feedback>) -> Self {
    Self {
      timeline: TimelineService::new(
        cache.clone(),
        stores.timeline_items,
        stores.timeline_dependencies,
        Arc::clone(&feedback),
      ),
      notifications: NotificationService::new(cache.clone(), stores.notifications, Arc::clone(&feedback)),
      materials: MaterialService::new(cache.clone(), stores.materials, Arc::clone(&feedback)),
      scope: ScopeItemService::new(cache.clone(), stores.scope_items, feedback),
      activity: ActivityService::new(cache.clone(), stores.activity),
      cache,
    }
  }
}

// ============================================================================
// Shared plumbing
// ============================================================================

/// Read and write access to one collection kind, keyed by scope.
pub struct Collection<R: Record> {
  layer: CacheLayer,
  coordinator: MutationCoordinator<R, DynStore<R>>,
}

impl<R: Record> Clone for Collection<R> {
  fn clone(&self) -> Self {
    Self {
      layer: self.layer.clone(),
      coordinator: self.coordinator.clone(),
    }
  }
}

impl<R: Record> Collection<R> {
  pub fn new(cache: QueryCache, store: DynStore<R>, feedback: Arc<dyn Feedback>) -> Self {
    Self {
      layer: CacheLayer::new(cache.clone()),
      coordinator: MutationCoordinator::new(Arc::new(store), cache, feedback),
    }
  }

  pub fn key(&self, scope: &str) -> CollectionKey {
    CollectionKey::new(R::KIND, scope)
  }

  pub fn coordinator(&self) -> &MutationCoordinator<R, DynStore<R>> {
    &self.coordinator
  }

  pub async fn list(&self, scope: &str) -> Result<CacheResult<Vec<R>>, StoreError> {
    let store = Arc::clone(self.coordinator.store());
    self
      .layer
      .fetch_list::<R, _, _>(&self.key(scope), || async move { store.list(scope).await })
      .await
  }

  /// Skip the freshness check and replace the cached list.
  pub async fn refetch(&self, scope: &str) -> Result<Vec<R>, StoreError> {
    let store = Arc::clone(self.coordinator.store());
    self
      .layer
      .refetch_list::<R, _, _>(&self.key(scope), || async move { store.list(scope).await })
      .await
  }

  pub fn query(&self, scope: &str) -> Query<Vec<R>> {
    Query::collection(
      self.layer.clone(),
      self.key(scope),
      Arc::clone(self.coordinator.store()),
    )
  }

  pub async fn run(&self, request: MutationRequest<R>) -> Result<Settled<R>, MutationError> {
    self.coordinator.mutate(request).await
  }
}

/// Project writes are mirrored into the activity log server-side.
fn with_activity<R: Record>(request: MutationRequest<R>, project_id: &str) -> MutationRequest<R> {
  if R::KIND == EntityKind::ActivityLog {
    return request;
  }
  request.with_cascade(Cascade::invalidate(CollectionKey::activity(project_id)))
}

// ============================================================================
// Demo data
// ============================================================================

struct DemoSeed<'a> {
  project_id: &'a str,
  user_id: &'a str,
}

impl DemoSeed<'_> {
  fn timeline_items(&self) -> Vec<TimelineItem> {
    let today = Utc::now().date_naive();
    let item = |id: &str, parent: Option<&str>, name: &str, kind, start: i64, days: i64, position| {
      TimelineItem {
        id: id.to_string(),
        project_id: self.project_id.to_string(),
        parent_id: parent.map(str::to_string),
        name: name.to_string(),
        kind,
        start_date: Some(today + Duration::days(start)),
        end_date: Some(today + Duration::days(start + days)),
        progress: 0,
        position,
      }
    };
    vec![
      item("item-phase-1", None, "Strip out", TimelineItemKind::Phase, 0, 10, 0),
      item("item-task-1", Some("item-phase-1"), "Remove ceilings", TimelineItemKind::Task, 0, 4, 1),
      item("item-task-2", Some("item-phase-1"), "Lift floor finishes", TimelineItemKind::Task, 4, 6, 2),
      item("item-phase-2", None, "First fix", TimelineItemKind::Phase, 10, 15, 3),
      item("item-ms-1", None, "Handover", TimelineItemKind::Milestone, 40, 0, 4),
    ]
  }

  fn timeline_dependencies(&self) -> Vec<TimelineDependency> {
    vec![TimelineDependency {
      id: "dep-seed-1".to_string(),
      project_id: self.project_id.to_string(),
      source_id: "item-task-1".to_string(),
      target_id: "item-task-2".to_string(),
      dependency_type: DependencyType::FinishToStart,
    }]
  }

  fn notifications(&self) -> Vec<Notification> {
    let notification = |id: &str, title: &str, message: &str, read| Notification {
      id: id.to_string(),
      user_id: self.user_id.to_string(),
      project_id: Some(self.project_id.to_string()),
      title: title.to_string(),
      message: message.to_string(),
      read,
      created_at: Utc::now(),
    };
    vec![
      notification("ntf-seed-1", "Delivery booked", "Floor tiles arrive Monday 8am", false),
      notification("ntf-seed-2", "Drawing revised", "Ceiling plan rev C issued", false),
      notification("ntf-seed-3", "Site visit", "Client walk-round confirmed", true),
    ]
  }

  fn materials(&self) -> Vec<Material> {
    let material = |id: &str, name: &str, quantity, unit: &str, status, position| Material {
      id: id.to_string(),
      project_id: self.project_id.to_string(),
      name: name.to_string(),
      quantity,
      unit: unit.to_string(),
      status,
      position,
    };
    vec![
      material("mat-seed-1", "Porcelain floor tiles", 120.0, "m2", MaterialStatus::Ordered, 0),
      material("mat-seed-2", "Acoustic ceiling tiles", 85.0, "m2", MaterialStatus::Required, 1),
      material("mat-seed-3", "Oak veneer doors", 6.0, "each", MaterialStatus::Required, 2),
    ]
  }

  fn scope_items(&self) -> Vec<ScopeItem> {
    let scope = |id: &str, name: &str, status, position| ScopeItem {
      id: id.to_string(),
      project_id: self.project_id.to_string(),
      name: name.to_string(),
      description: None,
      status,
      position,
    };
    vec![
      scope("scope-seed-1", "Reception joinery", ScopeStatus::InProgress, 0),
      scope("scope-seed-2", "Meeting room partitions", ScopeStatus::Pending, 1),
    ]
  }

  fn activity(&self) -> Vec<ActivityLog> {
    vec![ActivityLog {
      id: "act-seed-1".to_string(),
      project_id: self.project_id.to_string(),
      action: "created".to_string(),
      entity_type: EntityKind::TimelineItem.tag().to_string(),
      entity_id: Some("item-phase-1".to_string()),
      created_at: Utc::now(),
    }]
  }
}
