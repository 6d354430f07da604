//! Process-wide query cache holding the last known list per collection key.

use chrono::{DateTime, Duration, Utc};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

use super::key::CollectionKey;
use super::storage::{CacheStorage, NoopStorage, PersistedEntry};
use super::traits::Cacheable;
use crate::model::EntityKind;

/// How long a confirmed list stays fresh, per entity kind.
#[derive(Debug, Clone)]
pub struct FreshnessPolicy {
  default_stale_time: Duration,
  stale_times: HashMap<EntityKind, Duration>,
  refetch_intervals: HashMap<EntityKind, Duration>,
}

impl Default for FreshnessPolicy {
  fn default() -> Self {
    let mut refetch_intervals = HashMap::new();
    refetch_intervals.insert(EntityKind::Notification, Duration::seconds(30));

    Self {
      default_stale_time: Duration::minutes(5),
      stale_times: HashMap::new(),
      refetch_intervals,
    }
  }
}

impl FreshnessPolicy {
  pub fn with_default_stale_time(mut self, stale_time: Duration) -> Self {
    self.default_stale_time = stale_time;
    self
  }

  pub fn with_stale_time(mut self, kind: EntityKind, stale_time: Duration) -> Self {
    self.stale_times.insert(kind, stale_time);
    self
  }

  pub fn with_refetch_interval(mut self, kind: EntityKind, interval: Duration) -> Self {
    self.refetch_intervals.insert(kind, interval);
    self
  }

  pub fn stale_time(&self, kind: EntityKind) -> Duration {
    self
      .stale_times
      .get(&kind)
      .copied()
      .unwrap_or(self.default_stale_time)
  }

  /// Fixed polling interval for a kind, if it has one.
  pub fn refetch_interval(&self, kind: EntityKind) -> Option<Duration> {
    self.refetch_intervals.get(&kind).copied()
  }
}

/// A cached list as seen by a reader.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<R> {
  pub records: Vec<R>,
  /// When the store last confirmed this list
  pub updated_at: DateTime<Utc>,
  /// Invalidated or past the freshness window; the caller should refetch
  pub is_stale: bool,
  /// Holds an optimistic prediction not yet confirmed by the store
  pub is_predicted: bool,
}

#[derive(Clone)]
struct Slot {
  value: Arc<dyn Any + Send + Sync>,
  updated_at: DateTime<Utc>,
  invalidated: bool,
  predicted: bool,
}

/// Verbatim copy of one key's cache slot, taken before an optimistic write.
#[derive(Clone)]
pub struct Snapshot {
  key: CollectionKey,
  slot: Option<Slot>,
}

impl Snapshot {
  pub fn key(&self) -> &CollectionKey {
    &self.key
  }
}

impl fmt::Debug for Snapshot {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Snapshot")
      .field("key", &self.key)
      .field("present", &self.slot.is_some())
      .finish()
  }
}

struct Inner {
  slots: HashMap<CollectionKey, Slot>,
  policy: FreshnessPolicy,
  storage: Arc<dyn CacheStorage>,
}

/// Keyed store of the last known list per collection.
///
/// Cloning is cheap and every clone observes the same entries. Each method
/// runs under one lock acquisition, so a write replaces an entry atomically
/// and a reader never sees a torn list. Use [`QueryCache::transact`] to group
/// several steps into one such turn.
#[derive(Clone)]
pub struct QueryCache {
  inner: Arc<Mutex<Inner>>,
}

impl QueryCache {
  /// Create an in-memory cache.
  pub fn new(policy: FreshnessPolicy) -> Self {
    Self::with_storage(policy, Arc::new(NoopStorage))
  }

  /// Create a cache that persists confirmed lists through `storage`.
  pub fn with_storage(policy: FreshnessPolicy, storage: Arc<dyn CacheStorage>) -> Self {
    Self {
      inner: Arc::new(Mutex::new(Inner {
        slots: HashMap::new(),
        policy,
        storage,
      })),
    }
  }

  fn lock(&self) -> MutexGuard<'_, Inner> {
    self.inner.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Run `f` against the cache as a single uninterrupted turn.
  pub fn transact<T>(&self, f: impl FnOnce(&mut CacheTxn<'_>) -> T) -> T {
    let mut guard = self.lock();
    let mut txn = CacheTxn { inner: &mut *guard };
    f(&mut txn)
  }

  pub fn read<R: Cacheable + 'static>(&self, key: &CollectionKey) -> Option<CacheEntry<R>> {
    self.transact(|tx| tx.read(key))
  }

  pub fn write_confirmed<R: Cacheable + 'static>(&self, key: &CollectionKey, records: Vec<R>) {
    self.transact(|tx| tx.write_confirmed(key, records))
  }

  pub fn write_predicted<R: Cacheable + 'static>(&self, key: &CollectionKey, records: Vec<R>) {
    self.transact(|tx| tx.write_predicted(key, records))
  }

  pub fn invalidate(&self, key: &CollectionKey) {
    self.transact(|tx| tx.invalidate(key))
  }

  /// Mark every cached collection for `scope` stale.
  pub fn invalidate_scope(&self, scope: &str) {
    self.transact(|tx| {
      let keys: Vec<CollectionKey> = tx
        .inner
        .slots
        .keys()
        .filter(|k| k.scope == scope)
        .cloned()
        .collect();
      for key in &keys {
        tx.invalidate(key);
      }
    })
  }

  /// Mark every collection of `kind` stale, including persisted ones not yet loaded.
  pub fn invalidate_kind(&self, kind: EntityKind) {
    let mut inner = self.lock();
    for (key, slot) in inner.slots.iter_mut() {
      if key.kind == kind {
        slot.invalidated = true;
      }
    }
    if let Err(e) = inner.storage.mark_kind_stale(kind.tag()) {
      warn!(kind = %kind, error = %e, "failed to mark persisted collections stale");
    }
  }

  /// Absent keys count as stale.
  pub fn is_stale(&self, key: &CollectionKey) -> bool {
    self.transact(|tx| tx.is_stale(key))
  }

  pub fn snapshot(&self, key: &CollectionKey) -> Snapshot {
    self.transact(|tx| tx.snapshot(key))
  }

  pub fn restore(&self, snapshot: Snapshot) {
    self.transact(|tx| tx.restore(snapshot))
  }

  pub fn remove(&self, key: &CollectionKey) {
    let mut inner = self.lock();
    inner.slots.remove(key);
    if let Err(e) = inner.storage.delete(&key.cache_hash()) {
      warn!(key = %key, error = %e, "failed to delete persisted collection");
    }
  }

  pub fn clear(&self) {
    let mut inner = self.lock();
    inner.slots.clear();
    if let Err(e) = inner.storage.clear() {
      warn!(error = %e, "failed to clear persisted cache");
    }
  }

  pub fn keys(&self) -> Vec<CollectionKey> {
    let mut keys: Vec<CollectionKey> = self.lock().slots.keys().cloned().collect();
    keys.sort();
    keys
  }

  pub fn policy(&self) -> FreshnessPolicy {
    self.lock().policy.clone()
  }
}

/// Exclusive access to the cache for the duration of one [`QueryCache::transact`] call.
pub struct CacheTxn<'a> {
  inner: &'a mut Inner,
}

impl CacheTxn<'_> {
  pub fn read<R: Cacheable + 'static>(&mut self, key: &CollectionKey) -> Option<CacheEntry<R>> {
    if !self.inner.slots.contains_key(key) {
      self.hydrate::<R>(key);
    }

    let slot = self.inner.slots.get(key)?;
    let Some(records) = slot.value.downcast_ref::<Vec<R>>() else {
      warn!(key = %key, "cached collection holds a different record type");
      return None;
    };

    Some(CacheEntry {
      records: records.clone(),
      updated_at: slot.updated_at,
      is_stale: self.slot_is_stale(key.kind, slot),
      is_predicted: slot.predicted,
    })
  }

  /// Store a list the record store just returned.
  pub fn write_confirmed<R: Cacheable + 'static>(&mut self, key: &CollectionKey, records: Vec<R>) {
    let now = Utc::now();

    match serde_json::to_vec(&records) {
      Ok(data) => {
        let entry = PersistedEntry {
          hash: key.cache_hash(),
          description: key.description(),
          entity_kind: key.kind.tag().to_string(),
          data,
          cached_at: now,
          stale: false,
        };
        if let Err(e) = self.inner.storage.store(&entry) {
          warn!(key = %key, error = %e, "failed to persist collection");
        }
      }
      Err(e) => warn!(key = %key, error = %e, "failed to serialize collection"),
    }

    debug!(key = %key, count = records.len(), "cache write (confirmed)");
    self.inner.slots.insert(
      key.clone(),
      Slot {
        value: Arc::new(records),
        updated_at: now,
        invalidated: false,
        predicted: false,
      },
    );
  }

  /// Store an optimistic prediction. Never persisted, and never makes the
  /// entry fresher than the last confirmed list.
  pub fn write_predicted<R: Cacheable + 'static>(&mut self, key: &CollectionKey, records: Vec<R>) {
    let (updated_at, invalidated) = match self.inner.slots.get(key) {
      Some(slot) => (slot.updated_at, slot.invalidated),
      None => (Utc::now(), true),
    };

    debug!(key = %key, count = records.len(), "cache write (predicted)");
    self.inner.slots.insert(
      key.clone(),
      Slot {
        value: Arc::new(records),
        updated_at,
        invalidated,
        predicted: true,
      },
    );
  }

  pub fn invalidate(&mut self, key: &CollectionKey) {
    if let Some(slot) = self.inner.slots.get_mut(key) {
      slot.invalidated = true;
    }
    if let Err(e) = self.inner.storage.mark_stale(&key.cache_hash()) {
      warn!(key = %key, error = %e, "failed to mark persisted collection stale");
    }
    debug!(key = %key, "cache invalidated");
  }

  pub fn is_stale(&self, key: &CollectionKey) -> bool {
    match self.inner.slots.get(key) {
      Some(slot) => self.slot_is_stale(key.kind, slot),
      None => true,
    }
  }

  pub fn snapshot(&self, key: &CollectionKey) -> Snapshot {
    Snapshot {
      key: key.clone(),
      slot: self.inner.slots.get(key).cloned(),
    }
  }

  pub fn restore(&mut self, snapshot: Snapshot) {
    debug!(key = %snapshot.key, present = snapshot.slot.is_some(), "cache restored from snapshot");
    match snapshot.slot {
      Some(slot) => {
        self.inner.slots.insert(snapshot.key, slot);
      }
      None => {
        self.inner.slots.remove(&snapshot.key);
      }
    }
  }

  fn slot_is_stale(&self, kind: EntityKind, slot: &Slot) -> bool {
    slot.invalidated || Utc::now() - slot.updated_at >= self.inner.policy.stale_time(kind)
  }

  /// Load a persisted list into memory, keeping its age and stale flag.
  fn hydrate<R: Cacheable + 'static>(&mut self, key: &CollectionKey) {
    let persisted = match self.inner.storage.load(&key.cache_hash()) {
      Ok(Some(persisted)) => persisted,
      Ok(None) => return,
      Err(e) => {
        warn!(key = %key, error = %e, "failed to load persisted collection");
        return;
      }
    };

    if persisted.entity_kind != R::entity_kind().tag() {
      warn!(key = %key, stored = %persisted.entity_kind, "persisted collection kind mismatch");
      return;
    }

    match serde_json::from_slice::<Vec<R>>(&persisted.data) {
      Ok(records) => {
        debug!(key = %key, count = records.len(), "cache hydrated from storage");
        self.inner.slots.insert(
          key.clone(),
          Slot {
            value: Arc::new(records),
            updated_at: persisted.cached_at,
            invalidated: persisted.stale,
            predicted: false,
          },
        );
      }
      Err(e) => warn!(key = %key, error = %e, "failed to decode persisted collection"),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::SqliteStorage;
  use crate::model::{Material, MaterialStatus, TimelineDependency};

  fn material(id: &str, position: i64) -> Material {
    Material {
      id: id.to_string(),
      project_id: "proj-001".to_string(),
      name: format!("Oak veneer {}", id),
      quantity: 12.0,
      unit: "sheet".to_string(),
      status: MaterialStatus::Required,
      position,
    }
  }

  #[test]
  fn test_read_absent_key() {
    let cache = QueryCache::new(FreshnessPolicy::default());
    let key = CollectionKey::materials("proj-001");
    assert!(cache.read::<Material>(&key).is_none());
    assert!(cache.is_stale(&key));
  }

  #[test]
  fn test_confirmed_write_is_fresh_until_invalidated() {
    let cache = QueryCache::new(FreshnessPolicy::default());
    let key = CollectionKey::materials("proj-001");

    cache.write_confirmed(&key, vec![material("m1", 0)]);
    let entry = cache.read::<Material>(&key).unwrap();
    assert!(!entry.is_stale);
    assert!(!entry.is_predicted);

    cache.invalidate(&key);
    let entry = cache.read::<Material>(&key).unwrap();
    assert!(entry.is_stale);
    assert_eq!(entry.records, vec![material("m1", 0)]);
  }

  #[test]
  fn test_freshness_window_per_kind() {
    let policy = FreshnessPolicy::default().with_stale_time(EntityKind::Material, Duration::zero());
    let cache = QueryCache::new(policy);
    let materials = CollectionKey::materials("proj-001");
    let scope = CollectionKey::scope_items("proj-001");

    cache.write_confirmed(&materials, vec![material("m1", 0)]);
    cache.write_confirmed::<Material>(&scope, vec![]);

    assert!(cache.is_stale(&materials));
    assert!(!cache.is_stale(&scope));
  }

  #[test]
  fn test_prediction_does_not_refresh_entry() {
    let cache = QueryCache::new(FreshnessPolicy::default());
    let key = CollectionKey::materials("proj-001");

    cache.write_confirmed(&key, vec![material("m1", 0)]);
    cache.invalidate(&key);
    cache.write_predicted(&key, vec![material("m1", 0), material("m2", 1)]);

    let entry = cache.read::<Material>(&key).unwrap();
    assert!(entry.is_predicted);
    assert!(entry.is_stale);
    assert_eq!(entry.records.len(), 2);
  }

  #[test]
  fn test_snapshot_restore_is_verbatim() {
    let cache = QueryCache::new(FreshnessPolicy::default());
    let key = CollectionKey::materials("proj-001");
    cache.write_confirmed(&key, vec![material("m1", 0)]);
    let before = cache.read::<Material>(&key);

    let snapshot = cache.snapshot(&key);
    cache.write_predicted::<Material>(&key, vec![]);
    cache.restore(snapshot);

    assert_eq!(cache.read::<Material>(&key), before);
  }

  #[test]
  fn test_restore_of_absent_snapshot_removes_entry() {
    let cache = QueryCache::new(FreshnessPolicy::default());
    let key = CollectionKey::materials("proj-001");

    let snapshot = cache.snapshot(&key);
    cache.write_predicted(&key, vec![material("tmp", 0)]);
    cache.restore(snapshot);

    assert!(cache.read::<Material>(&key).is_none());
  }

  #[test]
  fn test_wrong_type_reads_as_absent() {
    let cache = QueryCache::new(FreshnessPolicy::default());
    let key = CollectionKey::materials("proj-001");
    cache.write_confirmed(&key, vec![material("m1", 0)]);

    assert!(cache.read::<TimelineDependency>(&key).is_none());
  }

  #[test]
  fn test_invalidate_scope_only_touches_scope() {
    let cache = QueryCache::new(FreshnessPolicy::default());
    let a = CollectionKey::materials("proj-001");
    let b = CollectionKey::scope_items("proj-001");
    let c = CollectionKey::materials("proj-002");
    cache.write_confirmed::<Material>(&a, vec![]);
    cache.write_confirmed::<Material>(&b, vec![]);
    cache.write_confirmed::<Material>(&c, vec![]);

    cache.invalidate_scope("proj-001");

    assert!(cache.is_stale(&a));
    assert!(cache.is_stale(&b));
    assert!(!cache.is_stale(&c));
  }

  #[test]
  fn test_clones_share_entries() {
    let cache = QueryCache::new(FreshnessPolicy::default());
    let other = cache.clone();
    let key = CollectionKey::materials("proj-001");

    cache.write_confirmed(&key, vec![material("m1", 0)]);
    assert_eq!(other.read::<Material>(&key).unwrap().records.len(), 1);
    assert_eq!(other.keys(), vec![key]);
  }

  #[test]
  fn test_hydrates_confirmed_data_from_storage() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.db");
    let key = CollectionKey::materials("proj-001");

    {
      let storage = Arc::new(SqliteStorage::open_at(&path).unwrap());
      let cache = QueryCache::with_storage(FreshnessPolicy::default(), storage);
      cache.write_confirmed(&key, vec![material("m1", 0)]);
      // Predictions stay in memory.
      cache.write_predicted(&key, vec![material("m1", 0), material("tmp", 1)]);
    }

    let storage = Arc::new(SqliteStorage::open_at(&path).unwrap());
    let cache = QueryCache::with_storage(FreshnessPolicy::default(), storage);
    let entry = cache.read::<Material>(&key).unwrap();
    assert_eq!(entry.records, vec![material("m1", 0)]);
    assert!(!entry.is_predicted);
  }

  #[test]
  fn test_invalidation_is_persisted() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.db");
    let key = CollectionKey::materials("proj-001");

    {
      let storage = Arc::new(SqliteStorage::open_at(&path).unwrap());
      let cache = QueryCache::with_storage(FreshnessPolicy::default(), storage);
      cache.write_confirmed(&key, vec![material("m1", 0)]);
      cache.invalidate(&key);
    }

    let storage = Arc::new(SqliteStorage::open_at(&path).unwrap());
    let cache = QueryCache::with_storage(FreshnessPolicy::default(), storage);
    assert!(cache.read::<Material>(&key).unwrap().is_stale);
  }
}
