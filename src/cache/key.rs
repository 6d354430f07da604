//! Collection keys identifying cached lists.

use sha2::{Digest, Sha256};
use std::fmt;

use crate::model::EntityKind;

/// Identifies one cached list: an entity kind plus the scope it is listed for
/// (project id for project collections, user id for notifications).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CollectionKey {
  pub kind: EntityKind,
  pub scope: String,
}

impl CollectionKey {
  /// Surrounding whitespace in `scope` is dropped, so equal keys persist to
  /// the same row.
  pub fn new(kind: EntityKind, scope: impl Into<String>) -> Self {
    let scope: String = scope.into();
    Self {
      kind,
      scope: scope.trim().to_string(),
    }
  }

  pub fn timeline_items(project_id: &str) -> Self {
    Self::new(EntityKind::TimelineItem, project_id)
  }

  pub fn timeline_dependencies(project_id: &str) -> Self {
    Self::new(EntityKind::TimelineDependency, project_id)
  }

  pub fn notifications(user_id: &str) -> Self {
    Self::new(EntityKind::Notification, user_id)
  }

  pub fn materials(project_id: &str) -> Self {
    Self::new(EntityKind::Material, project_id)
  }

  pub fn scope_items(project_id: &str) -> Self {
    Self::new(EntityKind::ScopeItem, project_id)
  }

  pub fn activity(project_id: &str) -> Self {
    Self::new(EntityKind::ActivityLog, project_id)
  }

  /// Stable, fixed-length key for persisted rows.
  pub fn cache_hash(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.kind.tag().as_bytes());
    hasher.update(b":");
    hasher.update(self.scope.as_bytes());
    hex::encode(hasher.finalize())
  }

  /// Human-readable description for logs.
  pub fn description(&self) -> String {
    format!("{} for {}", self.kind.label(), self.scope)
  }
}

impl fmt::Display for CollectionKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}", self.kind.tag(), self.scope)
  }
}
