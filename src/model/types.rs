use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::{EntityKind, Record};
use crate::cache::Cacheable;

/// Implements `Cacheable` in terms of `Record`.
macro_rules! cacheable_record {
  ($($ty:ty),+ $(,)?) => {
    $(
      impl Cacheable for $ty {
        fn entity_kind() -> EntityKind {
          <$ty as Record>::KIND
        }
      }
    )+
  };
}

cacheable_record!(
  TimelineItem,
  TimelineDependency,
  Notification,
  Material,
  ScopeItem,
  ActivityLog,
);

/// Patch type for collections that are never updated in place.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct NoPatch;

// ============================================================================
// Timeline
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimelineItemKind {
  Phase,
  #[default]
  Task,
  Milestone,
}

/// Row on the project Gantt chart
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineItem {
  pub id: String,
  pub project_id: String,
  pub parent_id: Option<String>,
  pub name: String,
  #[serde(default)]
  pub kind: TimelineItemKind,
  pub start_date: Option<NaiveDate>,
  pub end_date: Option<NaiveDate>,
  #[serde(default)]
  pub progress: u8,
  #[serde(default)]
  pub position: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TimelineItemDraft {
  pub project_id: String,
  pub parent_id: Option<String>,
  pub name: String,
  pub kind: TimelineItemKind,
  pub start_date: Option<NaiveDate>,
  pub end_date: Option<NaiveDate>,
}

/// Partial update; `parent_id` and dates distinguish "clear" (`Some(None)`) from "omit" (`None`).
#[derive(Debug, Clone, Default, Serialize)]
pub struct TimelineItemPatch {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub name: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub parent_id: Option<Option<String>>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub kind: Option<TimelineItemKind>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub start_date: Option<Option<NaiveDate>>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub end_date: Option<Option<NaiveDate>>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub progress: Option<u8>,
}

impl TimelineItemPatch {
  pub fn rename(name: impl Into<String>) -> Self {
    Self {
      name: Some(name.into()),
      ..Self::default()
    }
  }

  pub fn progress(progress: u8) -> Self {
    Self {
      progress: Some(progress.min(100)),
      ..Self::default()
    }
  }
}

impl Record for TimelineItem {
  type Draft = TimelineItemDraft;
  type Patch = TimelineItemPatch;

  const KIND: EntityKind = EntityKind::TimelineItem;

  fn id(&self) -> &str {
    &self.id
  }

  fn scope(&self) -> &str {
    &self.project_id
  }

  fn from_draft(id: String, draft: &Self::Draft) -> Self {
    Self {
      id,
      project_id: draft.project_id.clone(),
      parent_id: draft.parent_id.clone(),
      name: draft.name.clone(),
      kind: draft.kind,
      start_date: draft.start_date,
      end_date: draft.end_date,
      progress: 0,
      position: 0,
    }
  }

  fn apply_patch(&mut self, patch: &Self::Patch) {
    if let Some(name) = &patch.name {
      self.name = name.clone();
    }
    if let Some(parent_id) = &patch.parent_id {
      self.parent_id = parent_id.clone();
    }
    if let Some(kind) = patch.kind {
      self.kind = kind;
    }
    if let Some(start_date) = patch.start_date {
      self.start_date = start_date;
    }
    if let Some(end_date) = patch.end_date {
      self.end_date = end_date;
    }
    if let Some(progress) = patch.progress {
      self.progress = progress.min(100);
    }
  }

  fn position(&self) -> Option<i64> {
    Some(self.position)
  }

  fn set_position(&mut self, position: i64) {
    self.position = position;
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyType {
  #[default]
  FinishToStart,
  StartToStart,
  FinishToFinish,
  StartToFinish,
}

/// Edge between two timeline items
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineDependency {
  pub id: String,
  pub project_id: String,
  pub source_id: String,
  pub target_id: String,
  #[serde(default)]
  pub dependency_type: DependencyType,
}

#[derive(Debug, Clone, Serialize)]
pub struct DependencyDraft {
  pub project_id: String,
  pub source_id: String,
  pub target_id: String,
  pub dependency_type: DependencyType,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DependencyPatch {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub dependency_type: Option<DependencyType>,
}

impl Record for TimelineDependency {
  type Draft = DependencyDraft;
  type Patch = DependencyPatch;

  const KIND: EntityKind = EntityKind::TimelineDependency;

  fn id(&self) -> &str {
    &self.id
  }

  fn scope(&self) -> &str {
    &self.project_id
  }

  fn from_draft(id: String, draft: &Self::Draft) -> Self {
    Self {
      id,
      project_id: draft.project_id.clone(),
      source_id: draft.source_id.clone(),
      target_id: draft.target_id.clone(),
      dependency_type: draft.dependency_type,
    }
  }

  fn apply_patch(&mut self, patch: &Self::Patch) {
    if let Some(dependency_type) = patch.dependency_type {
      self.dependency_type = dependency_type;
    }
  }

  fn references(&self, id: &str) -> bool {
    self.source_id == id || self.target_id == id
  }
}

// ============================================================================
// Notifications
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
  pub id: String,
  pub user_id: String,
  pub project_id: Option<String>,
  pub title: String,
  pub message: String,
  #[serde(default)]
  pub read: bool,
  pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NotificationDraft {
  pub user_id: String,
  pub project_id: Option<String>,
  pub title: String,
  pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct NotificationPatch {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub read: Option<bool>,
}

impl Record for Notification {
  type Draft = NotificationDraft;
  type Patch = NotificationPatch;

  const KIND: EntityKind = EntityKind::Notification;

  fn id(&self) -> &str {
    &self.id
  }

  fn scope(&self) -> &str {
    &self.user_id
  }

  fn from_draft(id: String, draft: &Self::Draft) -> Self {
    Self {
      id,
      user_id: draft.user_id.clone(),
      project_id: draft.project_id.clone(),
      title: draft.title.clone(),
      message: draft.message.clone(),
      read: false,
      created_at: Utc::now(),
    }
  }

  fn apply_patch(&mut self, patch: &Self::Patch) {
    if let Some(read) = patch.read {
      self.read = read;
    }
  }
}

// ============================================================================
// Materials and scope
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaterialStatus {
  #[default]
  Required,
  Ordered,
  Delivered,
  Installed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Material {
  pub id: String,
  pub project_id: String,
  pub name: String,
  pub quantity: f64,
  pub unit: String,
  #[serde(default)]
  pub status: MaterialStatus,
  #[serde(default)]
  pub position: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MaterialDraft {
  pub project_id: String,
  pub name: String,
  pub quantity: f64,
  pub unit: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MaterialPatch {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub name: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub quantity: Option<f64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub unit: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub status: Option<MaterialStatus>,
}

impl Record for Material {
  type Draft = MaterialDraft;
  type Patch = MaterialPatch;

  const KIND: EntityKind = EntityKind::Material;

  fn id(&self) -> &str {
    &self.id
  }

  fn scope(&self) -> &str {
    &self.project_id
  }

  fn from_draft(id: String, draft: &Self::Draft) -> Self {
    Self {
      id,
      project_id: draft.project_id.clone(),
      name: draft.name.clone(),
      quantity: draft.quantity,
      unit: draft.unit.clone(),
      status: MaterialStatus::Required,
      position: 0,
    }
  }

  fn apply_patch(&mut self, patch: &Self::Patch) {
    if let Some(name) = &patch.name {
      self.name = name.clone();
    }
    if let Some(quantity) = patch.quantity {
      self.quantity = quantity;
    }
    if let Some(unit) = &patch.unit {
      self.unit = unit.clone();
    }
    if let Some(status) = patch.status {
      self.status = status;
    }
  }

  fn position(&self) -> Option<i64> {
    Some(self.position)
  }

  fn set_position(&mut self, position: i64) {
    self.position = position;
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeStatus {
  #[default]
  Pending,
  InProgress,
  Complete,
}

/// Line of work agreed with the client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScopeItem {
  pub id: String,
  pub project_id: String,
  pub name: String,
  pub description: Option<String>,
  #[serde(default)]
  pub status: ScopeStatus,
  #[serde(default)]
  pub position: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScopeItemDraft {
  pub project_id: String,
  pub name: String,
  pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ScopeItemPatch {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub name: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub description: Option<Option<String>>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub status: Option<ScopeStatus>,
}

impl Record for ScopeItem {
  type Draft = ScopeItemDraft;
  type Patch = ScopeItemPatch;

  const KIND: EntityKind = EntityKind::ScopeItem;

  fn id(&self) -> &str {
    &self.id
  }

  fn scope(&self) -> &str {
    &self.project_id
  }

  fn from_draft(id: String, draft: &Self::Draft) -> Self {
    Self {
      id,
      project_id: draft.project_id.clone(),
      name: draft.name.clone(),
      description: draft.description.clone(),
      status: ScopeStatus::Pending,
      position: 0,
    }
  }

  fn apply_patch(&mut self, patch: &Self::Patch) {
    if let Some(name) = &patch.name {
      self.name = name.clone();
    }
    if let Some(description) = &patch.description {
      self.description = description.clone();
    }
    if let Some(status) = patch.status {
      self.status = status;
    }
  }

  fn position(&self) -> Option<i64> {
    Some(self.position)
  }

  fn set_position(&mut self, position: i64) {
    self.position = position;
  }
}

// ============================================================================
// Activity log
// ============================================================================

/// Entry written by the backend whenever a project record changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityLog {
  pub id: String,
  pub project_id: String,
  pub action: String,
  pub entity_type: String,
  pub entity_id: Option<String>,
  pub created_at: DateTime<Utc>,
}

/// Activity entries are written server-side; a client draft only names the action.
#[derive(Debug, Clone, Serialize)]
pub struct ActivityDraft {
  pub project_id: String,
  pub action: String,
  pub entity_type: String,
  pub entity_id: Option<String>,
}

impl Record for ActivityLog {
  type Draft = ActivityDraft;
  type Patch = NoPatch;

  const KIND: EntityKind = EntityKind::ActivityLog;

  fn id(&self) -> &str {
    &self.id
  }

  fn scope(&self) -> &str {
    &self.project_id
  }

  fn from_draft(id: String, draft: &Self::Draft) -> Self {
    Self {
      id,
      project_id: draft.project_id.clone(),
      action: draft.action.clone(),
      entity_type: draft.entity_type.clone(),
      entity_id: draft.entity_id.clone(),
      created_at: Utc::now(),
    }
  }

  fn apply_patch(&mut self, _patch: &Self::Patch) {}
}
