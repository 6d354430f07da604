//! Read-side handle for one collection.
//!
//! A `Query<T>` owns the loading/success/error state of a fetch that runs on
//! the runtime, and is polled from the caller's loop. Collection queries read
//! through the [`CacheLayer`], so they see optimistic predictions, fall back
//! to the cached list when the store is unreachable, and refetch once a
//! mutation invalidates their key.
//!
//! # Example
//!
//! ```ignore
//! let mut query = Query::collection(layer.clone(), CollectionKey::materials("proj-001"), store);
//! query.fetch();
//!
//! // In the loop tick
//! if query.tick() {
//!     render(query.state());
//! }
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

use crate::cache::{CacheLayer, CacheSource, CollectionKey};
use crate::model::Record;
use crate::store::RecordStore;

/// The state of a query
#[derive(Debug, Clone)]
pub enum QueryState<T> {
  /// Query has not been started
  Idle,
  /// Query is currently fetching data
  Loading,
  /// Query completed successfully
  Success(T),
  /// Query failed with an error
  Error(String),
}

impl<T> QueryState<T> {
  pub fn is_loading(&self) -> bool {
    matches!(self, QueryState::Loading)
  }

  pub fn is_success(&self) -> bool {
    matches!(self, QueryState::Success(_))
  }

  pub fn is_error(&self) -> bool {
    matches!(self, QueryState::Error(_))
  }

  pub fn data(&self) -> Option<&T> {
    match self {
      QueryState::Success(data) => Some(data),
      _ => None,
    }
  }

  pub fn error(&self) -> Option<&str> {
    match self {
      QueryState::Error(e) => Some(e),
      _ => None,
    }
  }
}

/// Data plus where it came from, when it came through the cache.
type Fetched<T> = (T, Option<CacheSource>);

type BoxFuture<T> = Pin<Box<dyn Future<Output = Result<Fetched<T>, String>> + Send>>;

type FetcherFn<T> = Box<dyn Fn() -> BoxFuture<T> + Send + Sync>;

/// Invalidation check for the key a collection query reads.
type StaleCheck = Box<dyn Fn() -> bool + Send + Sync>;

pub struct Query<T> {
  state: QueryState<T>,
  fetcher: FetcherFn<T>,
  receiver: Option<mpsc::UnboundedReceiver<Result<Fetched<T>, String>>>,
  fetched_at: Option<Instant>,
  source: Option<CacheSource>,
  stale_time: Duration,
  refetch_interval: Option<Duration>,
  cache_stale: Option<StaleCheck>,
}

impl<T: Send + 'static> Query<T> {
  /// Create a query over an arbitrary fetcher.
  pub fn new<F, Fut>(fetcher: F) -> Self
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, String>> + Send + 'static,
  {
    Self::from_fetcher(Box::new(move || {
      let future = fetcher();
      Box::pin(async move { future.await.map(|data| (data, None)) })
    }))
  }

  fn from_fetcher(fetcher: FetcherFn<T>) -> Self {
    Self {
      state: QueryState::Idle,
      fetcher,
      receiver: None,
      fetched_at: None,
      source: None,
      stale_time: Duration::from_secs(300),
      refetch_interval: None,
      cache_stale: None,
    }
  }

  pub fn with_stale_time(mut self, duration: Duration) -> Self {
    self.stale_time = duration;
    self
  }

  /// Refetch on this interval regardless of staleness.
  pub fn with_refetch_interval(mut self, interval: Duration) -> Self {
    self.refetch_interval = Some(interval);
    self
  }

  pub fn state(&self) -> &QueryState<T> {
    &self.state
  }

  pub fn data(&self) -> Option<&T> {
    self.state.data()
  }

  pub fn is_loading(&self) -> bool {
    self.state.is_loading()
  }

  pub fn is_success(&self) -> bool {
    self.state.is_success()
  }

  pub fn is_error(&self) -> bool {
    self.state.is_error()
  }

  pub fn error(&self) -> Option<&str> {
    self.state.error()
  }

  /// Where the current data came from, for collection queries.
  pub fn source(&self) -> Option<CacheSource> {
    self.source
  }

  /// Whether the data is older than the stale time, or its cache key was invalidated.
  ///
  /// An offline result leaves the key invalidated, so after one the query
  /// waits out the stale time before trying the store again.
  pub fn is_stale(&self) -> bool {
    match &self.state {
      QueryState::Success(_) => {
        let aged = self
          .fetched_at
          .map(|t| t.elapsed() > self.stale_time)
          .unwrap_or(true);
        let invalidated = self.source != Some(CacheSource::Offline)
          && self.cache_stale.as_ref().is_some_and(|stale| stale());
        aged || invalidated
      }
      _ => false,
    }
  }

  /// Whether the refetch interval has elapsed since the last result.
  pub fn is_due(&self) -> bool {
    match (self.refetch_interval, self.fetched_at) {
      (Some(interval), Some(at)) => at.elapsed() >= interval,
      _ => false,
    }
  }

  /// Start fetching data if not already loading.
  pub fn fetch(&mut self) {
    if self.state.is_loading() {
      return;
    }
    self.start_fetch();
  }

  /// Force a refetch, dropping any pending result.
  pub fn refetch(&mut self) {
    self.receiver = None;
    self.start_fetch();
  }

  /// Poll for results from a pending fetch.
  ///
  /// Returns `true` if the state changed.
  pub fn poll(&mut self) -> bool {
    let receiver = match &mut self.receiver {
      Some(rx) => rx,
      None => return false,
    };

    match receiver.try_recv() {
      Ok(Ok((data, source))) => {
        self.state = QueryState::Success(data);
        self.source = source;
        self.fetched_at = Some(Instant::now());
        self.receiver = None;
        true
      }
      Ok(Err(error)) => {
        self.state = QueryState::Error(error);
        self.receiver = None;
        true
      }
      Err(mpsc::error::TryRecvError::Empty) => false,
      Err(mpsc::error::TryRecvError::Disconnected) => {
        self.state = QueryState::Error("Query was cancelled".to_string());
        self.receiver = None;
        true
      }
    }
  }

  /// Poll, then start a fetch if the data went stale or the interval elapsed.
  pub fn tick(&mut self) -> bool {
    let changed = self.poll();
    if self.receiver.is_none() && (self.is_stale() || self.is_due()) {
      self.fetch();
    }
    changed
  }

  fn start_fetch(&mut self) {
    let (tx, rx) = mpsc::unbounded_channel();
    self.receiver = Some(rx);
    self.state = QueryState::Loading;

    let future = (self.fetcher)();
    tokio::spawn(async move {
      // Receiver may have been dropped by a refetch
      let _ = tx.send(future.await);
    });
  }
}

impl<R: Record> Query<Vec<R>> {
  /// Query the list behind `key`, reading through the cache layer.
  ///
  /// Stale time and refetch interval come from the cache's freshness policy.
  pub fn collection<S>(layer: CacheLayer, key: CollectionKey, store: Arc<S>) -> Self
  where
    S: RecordStore<R> + 'static,
  {
    let policy = layer.cache().policy();
    let stale_time = policy
      .stale_time(R::KIND)
      .to_std()
      .unwrap_or(Duration::ZERO);
    let refetch_interval = policy
      .refetch_interval(R::KIND)
      .and_then(|d| d.to_std().ok());

    let cache = layer.cache().clone();
    let stale_key = key.clone();

    let mut query = Self::from_fetcher(Box::new(move || {
      let layer = layer.clone();
      let key = key.clone();
      let store = Arc::clone(&store);
      Box::pin(async move {
        let scope = key.scope.clone();
        layer
          .fetch_list::<R, _, _>(&key, || async move { store.list(&scope).await })
          .await
          .map(|result| (result.data, Some(result.source)))
          .map_err(|e| e.to_string())
      })
    }))
    .with_stale_time(stale_time);

    query.refetch_interval = refetch_interval;
    query.cache_stale = Some(Box::new(move || cache.is_stale(&stale_key)));
    query
  }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Query<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Query")
      .field("state", &self.state)
      .field("source", &self.source)
      .field("fetched_at", &self.fetched_at)
      .field("stale_time", &self.stale_time)
      .field("refetch_interval", &self.refetch_interval)
      .finish_non_exhaustive()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{FreshnessPolicy, QueryCache};
  use crate::model::{Material, MaterialStatus, Notification};
  use crate::store::{MemoryStore, StoreError};
  use chrono::Utc;

  fn material(id: &str, name: &str) -> Material {
    Material {
      id: id.to_string(),
      project_id: "proj-001".to_string(),
      name: name.to_string(),
      quantity: 12.0,
      unit: "m2".to_string(),
      status: MaterialStatus::Required,
      position: 0,
    }
  }

  async fn settle<T: Send + 'static>(query: &mut Query<T>) {
    for _ in 0..100 {
      if query.poll() {
        return;
      }
      tokio::time::sleep(Duration::from_millis(5)).await;
    }
  }

  #[tokio::test]
  async fn test_query_success() {
    let mut query = Query::new(|| async { Ok::<_, String>(vec![1, 2, 3]) });

    assert!(matches!(query.state(), QueryState::Idle));

    query.fetch();
    assert!(query.is_loading());

    settle(&mut query).await;
    assert!(query.is_success());
    assert_eq!(query.data(), Some(&vec![1, 2, 3]));
    assert_eq!(query.source(), None);
  }

  #[tokio::test]
  async fn test_query_error() {
    let mut query: Query<i32> = Query::new(|| async { Err("Something went wrong".to_string()) });

    query.fetch();
    settle(&mut query).await;

    assert!(query.is_error());
    assert_eq!(query.error(), Some("Something went wrong"));
  }

  #[tokio::test]
  async fn test_fetch_while_loading_is_noop() {
    let mut query = Query::new(|| async {
      tokio::time::sleep(Duration::from_millis(100)).await;
      Ok::<_, String>(42)
    });

    query.fetch();
    query.fetch();
    assert!(query.is_loading());
  }

  #[tokio::test]
  async fn test_collection_reads_through_cache() {
    let cache = QueryCache::new(FreshnessPolicy::default());
    let key = CollectionKey::materials("proj-001");
    let store = Arc::new(MemoryStore::new("mat").with_records(vec![material("mat-001", "Carpet")]));

    let mut query = Query::collection(CacheLayer::new(cache.clone()), key.clone(), Arc::clone(&store));
    query.fetch();
    settle(&mut query).await;

    assert_eq!(query.source(), Some(CacheSource::Network));
    assert_eq!(query.data().map(|d| d.len()), Some(1));
    assert!(!query.is_stale());

    // A prediction written by a mutation is what the next fetch shows.
    cache.write_predicted(&key, vec![material("mat-001", "Carpet tiles")]);
    query.refetch();
    settle(&mut query).await;
    assert_eq!(query.source(), Some(CacheSource::CacheFresh));
    assert_eq!(query.data().unwrap()[0].name, "Carpet tiles");
  }

  #[tokio::test]
  async fn test_invalidation_triggers_refetch() {
    let cache = QueryCache::new(FreshnessPolicy::default());
    let key = CollectionKey::materials("proj-001");
    let store = Arc::new(MemoryStore::new("mat").with_records(vec![material("mat-001", "Carpet")]));

    let mut query = Query::collection(CacheLayer::new(cache.clone()), key.clone(), Arc::clone(&store));
    query.fetch();
    settle(&mut query).await;

    assert!(!query.tick());
    assert!(!query.is_loading());

    cache.invalidate(&key);
    assert!(query.is_stale());
    query.tick();
    assert!(query.is_loading());
    settle(&mut query).await;
    assert_eq!(query.source(), Some(CacheSource::Network));
  }

  #[tokio::test]
  async fn test_offline_serves_cached_list() {
    let cache = QueryCache::new(FreshnessPolicy::default());
    let key = CollectionKey::materials("proj-001");
    cache.write_confirmed(&key, vec![material("mat-001", "Carpet")]);
    cache.invalidate(&key);

    let store = Arc::new(MemoryStore::<Material>::new("mat"));
    store.set_offline(true);

    let mut query = Query::collection(CacheLayer::new(cache), key, store);
    query.fetch();
    settle(&mut query).await;

    assert_eq!(query.source(), Some(CacheSource::Offline));
    assert_eq!(query.data().unwrap()[0].name, "Carpet");
  }

  #[tokio::test]
  async fn test_offline_result_does_not_refetch_every_tick() {
    let cache = QueryCache::new(FreshnessPolicy::default());
    let key = CollectionKey::materials("proj-001");
    cache.write_confirmed(&key, vec![material("mat-001", "Carpet")]);
    cache.invalidate(&key);

    let store = Arc::new(MemoryStore::<Material>::new("mat"));
    store.set_offline(true);

    let mut query = Query::collection(CacheLayer::new(cache.clone()), key.clone(), Arc::clone(&store));
    query.fetch();
    settle(&mut query).await;
    assert_eq!(query.source(), Some(CacheSource::Offline));
    assert!(cache.is_stale(&key));

    for _ in 0..20 {
      query.tick();
      tokio::time::sleep(Duration::from_millis(2)).await;
    }

    assert!(!query.is_loading());
    assert_eq!(store.calls().len(), 1);
  }

  #[tokio::test]
  async fn test_offline_retries_after_stale_time() {
    let cache = QueryCache::new(FreshnessPolicy::default());
    let key = CollectionKey::materials("proj-001");
    cache.write_confirmed(&key, vec![material("mat-001", "Carpet")]);
    cache.invalidate(&key);

    let store = Arc::new(MemoryStore::<Material>::new("mat"));
    store.set_offline(true);

    let mut query = Query::collection(CacheLayer::new(cache), key, Arc::clone(&store))
      .with_stale_time(Duration::from_millis(20));
    query.fetch();
    settle(&mut query).await;

    store.set_offline(false);
    tokio::time::sleep(Duration::from_millis(30)).await;
    query.tick();
    assert!(query.is_loading());
    settle(&mut query).await;
    assert_eq!(query.source(), Some(CacheSource::Network));
    assert_eq!(store.calls().len(), 2);
  }

  #[tokio::test]
  async fn test_notifications_have_refetch_interval() {
    let cache = QueryCache::new(
      FreshnessPolicy::default().with_refetch_interval(crate::model::EntityKind::Notification, chrono::Duration::zero()),
    );
    let store = Arc::new(MemoryStore::<Notification>::new("ntf").with_records(vec![Notification {
      id: "ntf-001".to_string(),
      user_id: "user-001".to_string(),
      project_id: None,
      title: "Delivery".to_string(),
      message: "Tiles arrive Monday".to_string(),
      read: false,
      created_at: Utc::now(),
    }]));

    let mut query = Query::collection(
      CacheLayer::new(cache),
      CollectionKey::notifications("user-001"),
      store,
    );
    query.fetch();
    settle(&mut query).await;

    assert!(query.is_due());
    query.tick();
    assert!(query.is_loading());
  }

  #[tokio::test]
  async fn test_collection_error_without_cache() {
    let store = Arc::new(MemoryStore::<Material>::new("mat"));
    store.set_offline(true);

    let mut query = Query::collection(
      CacheLayer::new(QueryCache::new(FreshnessPolicy::default())),
      CollectionKey::materials("proj-001"),
      store,
    );
    query.fetch();
    settle(&mut query).await;

    assert_eq!(
      query.error(),
      Some(StoreError::Transport("store unreachable".to_string()).to_string().as_str())
    );
  }
}
