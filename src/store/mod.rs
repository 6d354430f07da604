//! The authoritative record store the cache mirrors.

mod memory;
mod rest;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

use crate::model::Record;

pub use memory::{CallGate, MemoryStore, StoreCall};
pub use rest::RestStore;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
  /// The store refused the operation for a business reason.
  #[error("{0}")]
  Rejected(String),
  #[error("record not found: {0}")]
  NotFound(String),
  #[error("transport error: {0}")]
  Transport(String),
  #[error("failed to decode response: {0}")]
  Decode(String),
}

impl StoreError {
  /// The store's own message, for errors users should see verbatim.
  pub fn business_message(&self) -> Option<&str> {
    match self {
      Self::Rejected(message) => Some(message),
      _ => None,
    }
  }
}

impl From<reqwest::Error> for StoreError {
  fn from(e: reqwest::Error) -> Self {
    if e.is_decode() {
      Self::Decode(e.to_string())
    } else {
      Self::Transport(e.to_string())
    }
  }
}

/// Operations the mutation layer needs from the store, for one record type.
#[async_trait]
pub trait RecordStore<R: Record>: Send + Sync {
  async fn list(&self, scope: &str) -> Result<Vec<R>, StoreError>;

  /// Create a record. Repeating a create with the same `idempotency_key`
  /// must not create a second record.
  async fn create(
    &self,
    scope: &str,
    draft: &R::Draft,
    idempotency_key: &str,
  ) -> Result<R, StoreError>;

  async fn update(&self, id: &str, patch: &R::Patch) -> Result<R, StoreError>;

  async fn delete(&self, id: &str) -> Result<(), StoreError>;

  /// Move the given records, in the given order, into the slots they already occupy.
  async fn reorder(&self, scope: &str, ids: &[String]) -> Result<(), StoreError>;
}

#[async_trait]
impl<R: Record, S: RecordStore<R> + ?Sized> RecordStore<R> for Arc<S> {
  async fn list(&self, scope: &str) -> Result<Vec<R>, StoreError> {
    (**self).list(scope).await
  }

  async fn create(
    &self,
    scope: &str,
    draft: &R::Draft,
    idempotency_key: &str,
  ) -> Result<R, StoreError> {
    (**self).create(scope, draft, idempotency_key).await
  }

  async fn update(&self, id: &str, patch: &R::Patch) -> Result<R, StoreError> {
    (**self).update(id, patch).await
  }

  async fn delete(&self, id: &str) -> Result<(), StoreError> {
    (**self).delete(id).await
  }

  async fn reorder(&self, scope: &str, ids: &[String]) -> Result<(), StoreError> {
    (**self).reorder(scope, ids).await
  }
}
