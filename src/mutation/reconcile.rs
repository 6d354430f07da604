//! Post-settle reconciliation of the cache with the store.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

use super::{PendingMutation, Settled};
use crate::cache::{CollectionKey, QueryCache};
use crate::model::Record;

/// Where a create's placeholder record was written.
#[derive(Debug, Clone)]
struct Prediction {
  key: CollectionKey,
  temp_id: String,
}

/// Aligns the cache with the store once a mutation settles.
///
/// Predicted creates are registered under their idempotency key, so the
/// confirmed record replaces exactly the placeholder that mutation wrote,
/// wherever it sits in the list. A resubmitted form reuses its key; each
/// create under it keeps its own temp id.
#[derive(Clone)]
pub struct Reconciler {
  cache: QueryCache,
  predictions: Arc<Mutex<HashMap<String, Vec<Prediction>>>>,
}

impl Reconciler {
  pub fn new(cache: QueryCache) -> Self {
    Self {
      cache,
      predictions: Arc::new(Mutex::new(HashMap::new())),
    }
  }

  fn predictions(&self) -> MutexGuard<'_, HashMap<String, Vec<Prediction>>> {
    self
      .predictions
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
  }

  pub fn register_prediction(&self, idempotency_key: &str, key: &CollectionKey, temp_id: &str) {
    self
      .predictions()
      .entry(idempotency_key.to_string())
      .or_default()
      .push(Prediction {
        key: key.clone(),
        temp_id: temp_id.to_string(),
      });
  }

  /// Number of creates still waiting for the store.
  pub fn pending_predictions(&self) -> usize {
    self.predictions().values().map(Vec::len).sum()
  }

  fn take_prediction<R>(&self, pending: &PendingMutation<R>) -> Option<Prediction> {
    let idempotency_key = pending.idempotency_key.as_ref()?;
    let temp_id = pending.temp_id.as_ref()?;
    let mut predictions = self.predictions();
    let registered = predictions.get_mut(idempotency_key)?;
    let index = registered.iter().position(|p| &p.temp_id == temp_id)?;
    let prediction = registered.remove(index);
    if registered.is_empty() {
      predictions.remove(idempotency_key);
    }
    Some(prediction)
  }

  /// Replace a create's placeholder with the record the store returned.
  ///
  /// Other outcomes keep the optimistic view until the next refetch.
  pub fn confirm<R: Record>(&self, pending: &PendingMutation<R>, settled: &Settled<R>) {
    let Some(prediction) = self.take_prediction(pending) else {
      return;
    };
    let Settled::Created(confirmed) = settled else {
      return;
    };

    self.cache.transact(|tx| {
      let Some(entry) = tx.read::<R>(&prediction.key) else {
        return;
      };
      if !entry.records.iter().any(|r| r.id() == prediction.temp_id) {
        // Already replaced by a refetch or a rollback.
        return;
      }

      // A repeated idempotency key confirms a record that may already be listed.
      let listed = entry.records.iter().any(|r| r.id() == confirmed.id());
      let records = entry
        .records
        .into_iter()
        .filter_map(|r| match r.id() == prediction.temp_id {
          true if listed => None,
          true => Some(confirmed.clone()),
          false => Some(r),
        })
        .collect();
      debug!(
        key = %prediction.key,
        temp_id = %prediction.temp_id,
        id = confirmed.id(),
        "placeholder replaced by confirmed record"
      );
      tx.write_predicted(&prediction.key, records);
    });
  }

  /// Put every affected key back the way this mutation found it.
  pub fn restore<R>(&self, pending: &PendingMutation<R>) {
    self.take_prediction(pending);
    self.cache.transact(|tx| {
      for snapshot in pending.snapshots.iter().cloned() {
        tx.restore(snapshot);
      }
    });
  }

  /// Mark every affected key stale. Runs after every settle.
  pub fn invalidate<R>(&self, pending: &PendingMutation<R>) -> Vec<CollectionKey> {
    let keys = pending.affected_keys();
    self.cache.transact(|tx| {
      for key in &keys {
        tx.invalidate(key);
      }
    });
    keys
  }
}
