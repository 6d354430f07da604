//! In-process record store.
//!
//! Stands in for the hosted backend in tests and the `--offline-demo` mode.
//! Supports business-rule rejections, injected failures, and a gate that holds
//! calls in flight until a test releases them.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, Semaphore};

use super::{RecordStore, StoreError};
use crate::model::Record;
use crate::mutation::{predict, OperationKind};

/// Returns a rejection message when `target` may not be deleted from `records`.
type DeleteRule<R> = Box<dyn Fn(&[R], &R) -> Option<String> + Send + Sync>;

/// A call observed by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreCall {
  pub operation: Option<OperationKind>,
  /// Record id for update/delete, scope for list/create/reorder
  pub target: String,
}

struct State<R> {
  records: Vec<R>,
  next_id: u64,
  created: HashMap<String, String>,
  failures: VecDeque<StoreError>,
  offline: bool,
  calls: Vec<StoreCall>,
}

/// Handle for holding mutating calls until released.
pub struct CallGate {
  entered: mpsc::UnboundedReceiver<StoreCall>,
  release: Arc<Semaphore>,
}

impl CallGate {
  /// Wait until a held call reaches the store.
  pub async fn entered(&mut self) -> Option<StoreCall> {
    self.entered.recv().await
  }

  /// Let the oldest held call proceed.
  pub fn release_one(&self) {
    self.release.add_permits(1);
  }
}

pub struct MemoryStore<R: Record> {
  id_prefix: String,
  state: Mutex<State<R>>,
  delete_rules: Vec<DeleteRule<R>>,
  gate: Mutex<Option<(mpsc::UnboundedSender<StoreCall>, Arc<Semaphore>)>>,
}

impl<R: Record> MemoryStore<R> {
  pub fn new(id_prefix: impl Into<String>) -> Self {
    Self {
      id_prefix: id_prefix.into(),
      state: Mutex::new(State {
        records: Vec::new(),
        next_id: 1,
        created: HashMap::new(),
        failures: VecDeque::new(),
        offline: false,
        calls: Vec::new(),
      }),
      delete_rules: Vec::new(),
      gate: Mutex::new(None),
    }
  }

  /// Seed records, as if they had been created earlier.
  pub fn with_records(self, records: Vec<R>) -> Self {
    self.lock().records = records;
    self
  }

  pub fn with_delete_rule(
    mut self,
    rule: impl Fn(&[R], &R) -> Option<String> + Send + Sync + 'static,
  ) -> Self {
    self.delete_rules.push(Box::new(rule));
    self
  }

  fn lock(&self) -> MutexGuard<'_, State<R>> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Fail the next mutating call with `error`.
  pub fn fail_next(&self, error: StoreError) {
    self.lock().failures.push_back(error);
  }

  /// Make every call fail with a transport error until turned off.
  pub fn set_offline(&self, offline: bool) {
    self.lock().offline = offline;
  }

  /// Hold every subsequent mutating call until released through the gate.
  pub fn hold_calls(&self) -> CallGate {
    let (tx, rx) = mpsc::unbounded_channel();
    let release = Arc::new(Semaphore::new(0));
    *self.gate.lock().unwrap_or_else(PoisonError::into_inner) = Some((tx, Arc::clone(&release)));
    CallGate {
      entered: rx,
      release,
    }
  }

  pub fn calls(&self) -> Vec<StoreCall> {
    self.lock().calls.clone()
  }

  /// Every record in every scope, in storage order.
  pub fn records(&self) -> Vec<R> {
    self.lock().records.clone()
  }

  /// Record the call, wait at the gate if one is set, then apply injected failures.
  async fn enter(&self, operation: Option<OperationKind>, target: &str) -> Result<(), StoreError> {
    let call = StoreCall {
      operation,
      target: target.to_string(),
    };
    self.lock().calls.push(call.clone());

    if operation.is_some() {
      let gate = self
        .gate
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone();
      if let Some((entered, release)) = gate {
        let _ = entered.send(call);
        if let Ok(permit) = release.acquire().await {
          permit.forget();
        }
      }
    }

    let mut state = self.lock();
    if state.offline {
      return Err(StoreError::Transport("store unreachable".to_string()));
    }
    if operation.is_some() {
      if let Some(error) = state.failures.pop_front() {
        return Err(error);
      }
    }
    Ok(())
  }
}

fn scoped<R: Record>(records: &[R], scope: &str) -> Vec<R> {
  let mut list: Vec<R> = records.iter().filter(|r| r.scope() == scope).cloned().collect();
  if R::KIND.is_ordered() {
    list.sort_by_key(|r| r.position().unwrap_or_default());
  }
  list
}

#[async_trait]
impl<R: Record> RecordStore<R> for MemoryStore<R> {
  async fn list(&self, scope: &str) -> Result<Vec<R>, StoreError> {
    self.enter(None, scope).await?;
    Ok(scoped(&self.lock().records, scope))
  }

  async fn create(
    &self,
    scope: &str,
    draft: &R::Draft,
    idempotency_key: &str,
  ) -> Result<R, StoreError> {
    self.enter(Some(OperationKind::Create), scope).await?;
    let mut state = self.lock();

    if let Some(existing) = state.created.get(idempotency_key) {
      let existing = existing.clone();
      return state
        .records
        .iter()
        .find(|r| r.id() == existing)
        .cloned()
        .ok_or(StoreError::NotFound(existing));
    }

    let id = format!("{}-{:03}", self.id_prefix, state.next_id);
    state.next_id += 1;

    let current = scoped(&state.records, scope);
    let record = predict::create(&current, R::from_draft(id.clone(), draft))
      .pop()
      .ok_or_else(|| StoreError::Rejected("create produced no record".to_string()))?;

    state.created.insert(idempotency_key.to_string(), id);
    state.records.push(record.clone());
    Ok(record)
  }

  async fn update(&self, id: &str, patch: &R::Patch) -> Result<R, StoreError> {
    self.enter(Some(OperationKind::Update), id).await?;
    let mut state = self.lock();

    let record = state
      .records
      .iter_mut()
      .find(|r| r.id() == id)
      .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
    record.apply_patch(patch);
    Ok(record.clone())
  }

  async fn delete(&self, id: &str) -> Result<(), StoreError> {
    self.enter(Some(OperationKind::Delete), id).await?;
    let mut state = self.lock();

    let target = state
      .records
      .iter()
      .find(|r| r.id() == id)
      .cloned()
      .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

    for rule in &self.delete_rules {
      if let Some(message) = rule(&state.records, &target) {
        return Err(StoreError::Rejected(message));
      }
    }

    state.records.retain(|r| r.id() != id);
    Ok(())
  }

  async fn reorder(&self, scope: &str, ids: &[String]) -> Result<(), StoreError> {
    self.enter(Some(OperationKind::Reorder), scope).await?;
    let mut state = self.lock();

    let reordered = predict::reorder(&scoped(&state.records, scope), ids);
    state.records.retain(|r| r.scope() != scope);
    state.records.extend(reordered);
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::{Material, MaterialDraft, MaterialPatch};

  fn draft(name: &str) -> MaterialDraft {
    MaterialDraft {
      project_id: "proj-001".to_string(),
      name: name.to_string(),
      quantity: 4.0,
      unit: "m2".to_string(),
    }
  }

  #[tokio::test]
  async fn test_create_assigns_ids_and_positions() {
    let store = MemoryStore::<Material>::new("mat");

    let a = store.create("proj-001", &draft("Carpet"), "k1").await.unwrap();
    let b = store.create("proj-001", &draft("Tiles"), "k2").await.unwrap();

    assert_eq!(a.id, "mat-001");
    assert_eq!(b.id, "mat-002");
    assert_eq!(b.position, 1);
    assert_eq!(store.list("proj-001").await.unwrap().len(), 2);
    assert!(store.list("proj-002").await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_create_is_idempotent() {
    let store = MemoryStore::<Material>::new("mat");

    let first = store.create("proj-001", &draft("Carpet"), "same").await.unwrap();
    let again = store.create("proj-001", &draft("Carpet"), "same").await.unwrap();

    assert_eq!(first, again);
    assert_eq!(store.records().len(), 1);
  }

  #[tokio::test]
  async fn test_update_unknown_is_not_found() {
    let store = MemoryStore::<Material>::new("mat");
    let result = store.update("nope", &MaterialPatch::default()).await;
    assert_eq!(result, Err(StoreError::NotFound("nope".to_string())));
  }

  #[tokio::test]
  async fn test_injected_failure_applies_once() {
    let store = MemoryStore::<Material>::new("mat");
    store.fail_next(StoreError::Rejected("Budget locked".to_string()));

    let first = store.create("proj-001", &draft("Carpet"), "k1").await;
    assert_eq!(first, Err(StoreError::Rejected("Budget locked".to_string())));
    assert!(store.create("proj-001", &draft("Carpet"), "k2").await.is_ok());
  }

  #[tokio::test]
  async fn test_delete_rule_rejects() {
    let store = MemoryStore::<Material>::new("mat")
      .with_delete_rule(|_, target| (target.name == "Carpet").then(|| "Carpet is ordered".to_string()));
    let carpet = store.create("proj-001", &draft("Carpet"), "k1").await.unwrap();

    let result = store.delete(&carpet.id).await;
    assert_eq!(result, Err(StoreError::Rejected("Carpet is ordered".to_string())));
    assert_eq!(store.records().len(), 1);
  }

  #[tokio::test]
  async fn test_gate_holds_calls() {
    let store = Arc::new(MemoryStore::<Material>::new("mat"));
    let mut gate = store.hold_calls();

    let handle = tokio::spawn({
      let store = Arc::clone(&store);
      async move { store.create("proj-001", &draft("Carpet"), "k1").await }
    });

    let call = gate.entered().await.unwrap();
    assert_eq!(call.operation, Some(OperationKind::Create));
    assert!(store.records().is_empty());

    gate.release_one();
    assert!(handle.await.unwrap().is_ok());
    assert_eq!(store.records().len(), 1);
  }
}
