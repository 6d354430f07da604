//! Snapshot, optimistic apply, remote call, reconcile.

use std::marker::PhantomData;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
  predict, Mutation, MutationError, MutationMessages, MutationRequest, PendingMutation,
  Reconciler, Settled,
};
use crate::cache::QueryCache;
use crate::feedback::Feedback;
use crate::model::Record;
use crate::store::{RecordStore, StoreError};

/// Runs writes for one record type against the store while keeping the
/// cache showing their predicted outcome.
///
/// Remote failures are never retried here; a retry is a new mutation.
pub struct MutationCoordinator<R: Record, S: RecordStore<R>> {
  store: Arc<S>,
  cache: QueryCache,
  reconciler: Reconciler,
  feedback: Arc<dyn Feedback>,
  _record: PhantomData<fn() -> R>,
}

impl<R: Record, S: RecordStore<R>> Clone for MutationCoordinator<R, S> {
  fn clone(&self) -> Self {
    Self {
      store: Arc::clone(&self.store),
      cache: self.cache.clone(),
      reconciler: self.reconciler.clone(),
      feedback: Arc::clone(&self.feedback),
      _record: PhantomData,
    }
  }
}

impl<R: Record, S: RecordStore<R>> MutationCoordinator<R, S> {
  pub fn new(store: Arc<S>, cache: QueryCache, feedback: Arc<dyn Feedback>) -> Self {
    let reconciler = Reconciler::new(cache.clone());
    Self {
      store,
      cache,
      reconciler,
      feedback,
      _record: PhantomData,
    }
  }

  pub fn cache(&self) -> &QueryCache {
    &self.cache
  }

  pub fn store(&self) -> &Arc<S> {
    &self.store
  }

  pub fn reconciler(&self) -> &Reconciler {
    &self.reconciler
  }

  /// Snapshot every affected key and write the prediction, in one cache turn.
  ///
  /// The prediction builds on whatever the cache currently shows, including
  /// predictions of other mutations still in flight.
  pub fn begin(&self, request: &MutationRequest<R>) -> PendingMutation<R> {
    let operation = request.mutation.kind();
    let (temp_id, idempotency_key) = match &request.mutation {
      Mutation::Create { .. } => (
        Some(format!("temp-{}", Uuid::new_v4())),
        Some(
          request
            .idempotency_key
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string()),
        ),
      ),
      _ => (None, None),
    };

    let (snapshots, predicted) = self.cache.transact(|tx| {
      let current = tx.read::<R>(&request.key).map(|entry| entry.records);

      let mut snapshots = vec![tx.snapshot(&request.key)];
      for cascade in &request.cascades {
        if snapshots.iter().all(|s| s.key() != &cascade.key) {
          cascade.hydrate(tx);
          snapshots.push(tx.snapshot(&cascade.key));
        }
      }

      let predicted = match (&request.mutation, current) {
        (Mutation::Create { draft }, current) => {
          let id = temp_id.clone().unwrap_or_default();
          Some(predict::create(
            &current.unwrap_or_default(),
            R::from_draft(id, draft),
          ))
        }
        // Nothing displayed yet, so nothing to predict over.
        (_, None) => None,
        (Mutation::Update { id, patch }, Some(current)) => {
          Some(predict::update(&current, id, patch))
        }
        (Mutation::Delete { id }, Some(current)) => Some(predict::delete(&current, id)),
        (Mutation::Reorder { ids }, Some(current)) => Some(predict::reorder(&current, ids)),
      };

      if let Some(predicted) = &predicted {
        tx.write_predicted(&request.key, predicted.clone());
      }

      if let Mutation::Delete { id } = &request.mutation {
        for cascade in &request.cascades {
          cascade.apply_delete(tx, id);
        }
      }

      (snapshots, predicted)
    });

    let pending = PendingMutation {
      id: Uuid::new_v4(),
      operation,
      key: request.key.clone(),
      snapshots,
      predicted,
      temp_id,
      idempotency_key,
    };

    if let (Some(idempotency_key), Some(temp_id)) = (&pending.idempotency_key, &pending.temp_id) {
      self
        .reconciler
        .register_prediction(idempotency_key, &pending.key, temp_id);
    }

    debug!(
      mutation = %pending.id,
      operation = %operation,
      key = %pending.key,
      affected = pending.snapshots.len(),
      "optimistic update applied"
    );
    pending
  }

  /// Run one mutation to completion.
  ///
  /// The store call is the only await; the cache is consistent before and
  /// after it. Failures are reported through the feedback surface and
  /// returned, never panicked.
  pub async fn mutate(&self, request: MutationRequest<R>) -> Result<Settled<R>, MutationError> {
    let pending = self.begin(&request);
    let result = self.call_store(&pending, &request.mutation).await;
    self.settle(pending, &request.messages, result)
  }

  /// Run a mutation on the runtime. It completes and reconciles even if the
  /// handle is dropped.
  pub fn spawn(&self, request: MutationRequest<R>) -> JoinHandle<Result<Settled<R>, MutationError>>
  where
    S: 'static,
  {
    let coordinator = self.clone();
    tokio::spawn(async move { coordinator.mutate(request).await })
  }

  async fn call_store(
    &self,
    pending: &PendingMutation<R>,
    mutation: &Mutation<R>,
  ) -> Result<Settled<R>, StoreError> {
    let scope = &pending.key.scope;
    match mutation {
      Mutation::Create { draft } => {
        let idempotency_key = pending.idempotency_key.as_deref().unwrap_or_default();
        self
          .store
          .create(scope, draft, idempotency_key)
          .await
          .map(Settled::Created)
      }
      Mutation::Update { id, patch } => self.store.update(id, patch).await.map(Settled::Updated),
      Mutation::Delete { id } => self
        .store
        .delete(id)
        .await
        .map(|()| Settled::Deleted(id.clone())),
      Mutation::Reorder { ids } => self
        .store
        .reorder(scope, ids)
        .await
        .map(|()| Settled::Reordered),
    }
  }

  /// Commit or roll back, report, then invalidate every affected key.
  pub fn settle(
    &self,
    pending: PendingMutation<R>,
    messages: &MutationMessages,
    result: Result<Settled<R>, StoreError>,
  ) -> Result<Settled<R>, MutationError> {
    let outcome = match result {
      Ok(settled) => {
        info!(mutation = %pending.id, operation = %pending.operation, key = %pending.key, "mutation confirmed");
        self.reconciler.confirm(&pending, &settled);
        self.feedback.notify_success(&messages.success);
        Ok(settled)
      }
      Err(cause) => {
        warn!(
          mutation = %pending.id,
          operation = %pending.operation,
          key = %pending.key,
          error = %cause,
          "mutation failed, rolling back"
        );
        self.reconciler.restore(&pending);
        let message = cause
          .business_message()
          .map(str::to_string)
          .unwrap_or_else(|| messages.failure.clone());
        self.feedback.notify_failure(&message);
        Err(MutationError {
          message,
          operation: pending.operation,
          cause,
        })
      }
    };

    let invalidated = self.reconciler.invalidate(&pending);
    debug!(mutation = %pending.id, keys = ?invalidated, "affected keys invalidated");
    outcome
  }
}
