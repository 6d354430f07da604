//! Project-tracking records and the trait the mutation layer needs from them.

mod types;

use serde::Serialize;
use std::fmt;

use crate::cache::Cacheable;

pub use types::{
  ActivityDraft, ActivityLog, DependencyDraft, DependencyPatch, DependencyType, Material, MaterialDraft,
  MaterialPatch, MaterialStatus, NoPatch, Notification, NotificationDraft, NotificationPatch,
  ScopeItem, ScopeItemDraft, ScopeItemPatch, ScopeStatus, TimelineDependency, TimelineItem,
  TimelineItemDraft, TimelineItemKind, TimelineItemPatch,
};

/// Kind of collection a record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityKind {
  TimelineItem,
  TimelineDependency,
  Notification,
  Material,
  ScopeItem,
  ActivityLog,
}

impl EntityKind {
  pub const ALL: [EntityKind; 6] = [
    EntityKind::TimelineItem,
    EntityKind::TimelineDependency,
    EntityKind::Notification,
    EntityKind::Material,
    EntityKind::ScopeItem,
    EntityKind::ActivityLog,
  ];

  /// Stable tag used in cache keys and as the remote table name.
  pub fn tag(self) -> &'static str {
    match self {
      Self::TimelineItem => "timeline_items",
      Self::TimelineDependency => "timeline_dependencies",
      Self::Notification => "notifications",
      Self::Material => "materials",
      Self::ScopeItem => "scope_items",
      Self::ActivityLog => "activity_logs",
    }
  }

  /// Human label used in feedback messages.
  pub fn label(self) -> &'static str {
    match self {
      Self::TimelineItem => "timeline item",
      Self::TimelineDependency => "dependency",
      Self::Notification => "notification",
      Self::Material => "material",
      Self::ScopeItem => "scope item",
      Self::ActivityLog => "activity entry",
    }
  }

  pub fn from_tag(tag: &str) -> Option<Self> {
    Self::ALL.into_iter().find(|k| k.tag() == tag)
  }

  /// Whether list order is meaningful and carried in a position field.
  pub fn is_ordered(self) -> bool {
    matches!(self, Self::TimelineItem | Self::Material | Self::ScopeItem)
  }
}

impl fmt::Display for EntityKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.tag())
  }
}

/// A record owned by the remote store and mirrored in the query cache.
///
/// `Draft` is the create payload and `Patch` a partial update in which every
/// omitted field leaves the current value alone.
pub trait Record: Cacheable + fmt::Debug + 'static {
  type Draft: Clone + fmt::Debug + Send + Sync + Serialize + 'static;
  type Patch: Clone + fmt::Debug + Default + Send + Sync + Serialize + 'static;

  const KIND: EntityKind;

  fn id(&self) -> &str;

  /// Id of the project (or user, for notifications) the record is listed under.
  fn scope(&self) -> &str;

  /// Build the record a create is expected to produce, under a temporary id.
  fn from_draft(id: String, draft: &Self::Draft) -> Self;

  fn apply_patch(&mut self, patch: &Self::Patch);

  fn position(&self) -> Option<i64> {
    None
  }

  fn set_position(&mut self, _position: i64) {}

  /// Whether this record points at the record with `id` (dependency edges).
  fn references(&self, _id: &str) -> bool {
    false
  }
}
