//! Optimistic mutations against the record store.
//!
//! A mutation snapshots every affected cache key, writes its predicted result
//! into the cache, calls the store, then either keeps the prediction or
//! restores the snapshots. Every affected key is invalidated once the call
//! settles, whatever the outcome, so the next read resynchronizes with the
//! store.
//!
//! Concurrent mutations on the same key are not serialized. Each builds its
//! prediction on whatever the cache shows at the time, and each rollback
//! restores its own snapshot, so a failing mutation can briefly hide the
//! prediction of a later one. The post-settle invalidation makes the next
//! read authoritative again.

mod coordinator;
pub mod predict;
mod reconcile;

use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::cache::{CacheTxn, CollectionKey, Snapshot};
use crate::model::{EntityKind, Record};
use crate::store::StoreError;

pub use coordinator::MutationCoordinator;
pub use reconcile::Reconciler;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
  Create,
  Update,
  Delete,
  Reorder,
}

impl OperationKind {
  fn verb(self) -> &'static str {
    match self {
      Self::Create => "create",
      Self::Update => "update",
      Self::Delete => "delete",
      Self::Reorder => "reorder",
    }
  }

  fn past_tense(self) -> &'static str {
    match self {
      Self::Create => "created",
      Self::Update => "updated",
      Self::Delete => "deleted",
      Self::Reorder => "reordered",
    }
  }
}

impl fmt::Display for OperationKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.verb())
  }
}

#[derive(Debug, Clone)]
pub enum Mutation<R: Record> {
  Create { draft: R::Draft },
  Update { id: String, patch: R::Patch },
  Delete { id: String },
  Reorder { ids: Vec<String> },
}

impl<R: Record> Mutation<R> {
  pub fn kind(&self) -> OperationKind {
    match self {
      Self::Create { .. } => OperationKind::Create,
      Self::Update { .. } => OperationKind::Update,
      Self::Delete { .. } => OperationKind::Delete,
      Self::Reorder { .. } => OperationKind::Reorder,
    }
  }
}

/// Text shown to the user when a mutation settles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationMessages {
  pub success: String,
  /// Shown when the store gives no message of its own
  pub failure: String,
}

impl MutationMessages {
  pub fn new(success: impl Into<String>, failure: impl Into<String>) -> Self {
    Self {
      success: success.into(),
      failure: failure.into(),
    }
  }

  /// "Timeline item created" / "Failed to create timeline item"
  pub fn for_operation(kind: EntityKind, operation: OperationKind) -> Self {
    let label = kind.label();
    let mut subject = label.to_string();
    if let Some(first) = subject.get_mut(0..1) {
      first.make_ascii_uppercase();
    }

    let success = match operation {
      OperationKind::Reorder => format!("{} order updated", subject),
      _ => format!("{} {}", subject, operation.past_tense()),
    };
    let failure = match operation {
      OperationKind::Reorder => format!("Failed to reorder {}s", label),
      _ => format!("Failed to {} {}", operation.verb(), label),
    };
    Self { success, failure }
  }
}

type HydrateFn = fn(&mut CacheTxn<'_>, &CollectionKey);
type PruneFn = fn(&mut CacheTxn<'_>, &CollectionKey, &str);

/// Another collection a mutation affects besides its target.
#[derive(Clone)]
pub struct Cascade {
  pub key: CollectionKey,
  hydrate: Option<HydrateFn>,
  prune: Option<PruneFn>,
}

impl Cascade {
  /// Snapshot and invalidate `key` without predicting anything for it.
  pub fn invalidate(key: CollectionKey) -> Self {
    Self {
      key,
      hydrate: None,
      prune: None,
    }
  }

  /// On delete, also drop records of `D` that reference the deleted id.
  pub fn prune_references<D: Record>(key: CollectionKey) -> Self {
    Self {
      key,
      hydrate: Some(hydrate_as::<D>),
      prune: Some(prune_as::<D>),
    }
  }

  fn hydrate(&self, tx: &mut CacheTxn<'_>) {
    if let Some(hydrate) = self.hydrate {
      hydrate(tx, &self.key);
    }
  }

  fn apply_delete(&self, tx: &mut CacheTxn<'_>, deleted_id: &str) {
    if let Some(prune) = self.prune {
      prune(tx, &self.key, deleted_id);
    }
  }
}

impl fmt::Debug for Cascade {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Cascade")
      .field("key", &self.key)
      .field("prunes", &self.prune.is_some())
      .finish()
  }
}

fn hydrate_as<D: Record>(tx: &mut CacheTxn<'_>, key: &CollectionKey) {
  let _ = tx.read::<D>(key);
}

fn prune_as<D: Record>(tx: &mut CacheTxn<'_>, key: &CollectionKey, deleted_id: &str) {
  if let Some(entry) = tx.read::<D>(key) {
    let kept = predict::prune_references(&entry.records, deleted_id);
    if kept.len() != entry.records.len() {
      tx.write_predicted(key, kept);
    }
  }
}

/// One logical write: the target collection, the operation, and what else it touches.
#[derive(Debug, Clone)]
pub struct MutationRequest<R: Record> {
  pub key: CollectionKey,
  pub mutation: Mutation<R>,
  pub cascades: Vec<Cascade>,
  pub messages: MutationMessages,
  /// Correlates a create's prediction with the record the store returns
  pub idempotency_key: Option<String>,
}

impl<R: Record> MutationRequest<R> {
  pub fn new(key: CollectionKey, mutation: Mutation<R>) -> Self {
    let messages = MutationMessages::for_operation(R::KIND, mutation.kind());
    Self {
      key,
      mutation,
      cascades: Vec::new(),
      messages,
      idempotency_key: None,
    }
  }

  pub fn create(key: CollectionKey, draft: R::Draft) -> Self {
    Self::new(key, Mutation::Create { draft })
  }

  pub fn update(key: CollectionKey, id: impl Into<String>, patch: R::Patch) -> Self {
    Self::new(
      key,
      Mutation::Update {
        id: id.into(),
        patch,
      },
    )
  }

  pub fn delete(key: CollectionKey, id: impl Into<String>) -> Self {
    Self::new(key, Mutation::Delete { id: id.into() })
  }

  pub fn reorder(key: CollectionKey, ids: Vec<String>) -> Self {
    Self::new(key, Mutation::Reorder { ids })
  }

  pub fn with_cascade(mut self, cascade: Cascade) -> Self {
    self.cascades.push(cascade);
    self
  }

  pub fn with_messages(mut self, messages: MutationMessages) -> Self {
    self.messages = messages;
    self
  }

  pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
    self.idempotency_key = Some(key.into());
    self
  }

  /// Target key first, then cascades, without duplicates.
  pub fn affected_keys(&self) -> Vec<CollectionKey> {
    let mut keys = vec![self.key.clone()];
    for cascade in &self.cascades {
      if !keys.contains(&cascade.key) {
        keys.push(cascade.key.clone());
      }
    }
    keys
  }
}

/// An in-flight mutation: what it touched, what it predicted, and what to
/// restore on failure.
#[derive(Debug)]
pub struct PendingMutation<R> {
  pub id: Uuid,
  pub operation: OperationKind,
  pub key: CollectionKey,
  /// One per affected key, taken just before the optimistic write
  pub snapshots: Vec<Snapshot>,
  /// List written to `key`; `None` when nothing was cached to predict over
  pub predicted: Option<Vec<R>>,
  /// Placeholder id of a predicted create
  pub temp_id: Option<String>,
  pub idempotency_key: Option<String>,
}

impl<R> PendingMutation<R> {
  pub fn affected_keys(&self) -> Vec<CollectionKey> {
    self.snapshots.iter().map(|s| s.key().clone()).collect()
  }
}

/// What the store confirmed.
#[derive(Debug, Clone, PartialEq)]
pub enum Settled<R> {
  Created(R),
  Updated(R),
  Deleted(String),
  Reordered,
}

impl<R> Settled<R> {
  /// The record the store returned, for creates and updates.
  pub fn record(&self) -> Option<&R> {
    match self {
      Self::Created(record) | Self::Updated(record) => Some(record),
      Self::Deleted(_) | Self::Reordered => None,
    }
  }
}

/// A mutation the store rejected or could not be reached for.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct MutationError {
  /// Message shown to the user
  pub message: String,
  pub operation: OperationKind,
  #[source]
  pub cause: StoreError,
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::{Material, TimelineDependency, TimelineItem};

  #[test]
  fn test_default_messages() {
    let m = MutationMessages::for_operation(EntityKind::TimelineItem, OperationKind::Create);
    assert_eq!(m.success, "Timeline item created");
    assert_eq!(m.failure, "Failed to create timeline item");

    let m = MutationMessages::for_operation(EntityKind::Material, OperationKind::Reorder);
    assert_eq!(m.success, "Material order updated");
    assert_eq!(m.failure, "Failed to reorder materials");
  }

  #[test]
  fn test_affected_keys_dedup() {
    let request = MutationRequest::<TimelineItem>::delete(
      CollectionKey::timeline_items("proj-001"),
      "item-001",
    )
    .with_cascade(Cascade::prune_references::<TimelineDependency>(
      CollectionKey::timeline_dependencies("proj-001"),
    ))
    .with_cascade(Cascade::invalidate(CollectionKey::timeline_items("proj-001")));

    assert_eq!(
      request.affected_keys(),
      vec![
        CollectionKey::timeline_items("proj-001"),
        CollectionKey::timeline_dependencies("proj-001"),
      ]
    );
  }

  #[test]
  fn test_mutation_kind() {
    let m = Mutation::<Material>::Reorder { ids: vec![] };
    assert_eq!(m.kind(), OperationKind::Reorder);
  }
}
