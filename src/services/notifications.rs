use futures::future::join_all;
use std::sync::Arc;
use tracing::info;

use super::{Collection, DynStore};
use crate::cache::{CacheResult, QueryCache};
use crate::feedback::Feedback;
use crate::model::{Notification, NotificationPatch};
use crate::mutation::{MutationError, MutationMessages, MutationRequest, Settled};
use crate::query::Query;
use crate::store::StoreError;

/// Outcome of marking every unread notification as read.
#[derive(Debug, Default)]
pub struct ReadAllReport {
  pub marked: usize,
  pub failed: Vec<MutationError>,
}

/// A user's notification inbox. Keys are scoped by user, not project.
pub struct NotificationService {
  notifications: Collection<Notification>,
}

impl NotificationService {
  pub fn new(cache: QueryCache, store: DynStore<Notification>, feedback: Arc<dyn Feedback>) -> Self {
    Self {
      notifications: Collection::new(cache, store, feedback),
    }
  }

  pub async fn list(&self, user_id: &str) -> Result<CacheResult<Vec<Notification>>, StoreError> {
    self.notifications.list(user_id).await
  }

  /// Inbox query; refetches on the notification interval.
  pub fn query(&self, user_id: &str) -> Query<Vec<Notification>> {
    self.notifications.query(user_id)
  }

  fn read_request(&self, user_id: &str, id: &str) -> MutationRequest<Notification> {
    MutationRequest::update(
      self.notifications.key(user_id),
      id,
      NotificationPatch { read: Some(true) },
    )
    .with_messages(MutationMessages::new(
      "Notification marked as read",
      "Failed to mark notification as read",
    ))
  }

  pub async fn mark_read(&self, user_id: &str, id: &str) -> Result<Settled<Notification>, MutationError> {
    self.notifications.run(self.read_request(user_id, id)).await
  }

  /// Mark every unread notification as read, one mutation each.
  ///
  /// The mutations run concurrently. A failure restores the inbox as it was
  /// when that mutation began, which also hides predictions made after it
  /// until the refetch that follows every settle.
  pub async fn mark_all_read(&self, user_id: &str) -> Result<ReadAllReport, StoreError> {
    let unread: Vec<String> = self
      .list(user_id)
      .await?
      .data
      .into_iter()
      .filter(|n| !n.read)
      .map(|n| n.id)
      .collect();

    let outcomes = join_all(
      unread
        .iter()
        .map(|id| self.notifications.run(self.read_request(user_id, id))),
    )
    .await;

    let mut report = ReadAllReport::default();
    for outcome in outcomes {
      match outcome {
        Ok(_) => report.marked += 1,
        Err(e) => report.failed.push(e),
      }
    }
    info!(user_id, marked = report.marked, failed = report.failed.len(), "marked notifications read");
    Ok(report)
  }

  pub async fn delete(&self, user_id: &str, id: &str) -> Result<Settled<Notification>, MutationError> {
    let request = MutationRequest::delete(self.notifications.key(user_id), id);
    self.notifications.run(request).await
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{CollectionKey, FreshnessPolicy};
  use crate::feedback::RecordingFeedback;
  use crate::services::Stores;

  fn service(feedback: &Arc<RecordingFeedback>) -> (QueryCache, NotificationService) {
    let cache = QueryCache::new(FreshnessPolicy::default());
    let service = NotificationService::new(
      cache.clone(),
      Stores::demo("proj-001", "user-001").notifications,
      Arc::clone(feedback) as Arc<dyn Feedback>,
    );
    (cache, service)
  }

  #[tokio::test]
  async fn test_mark_read_is_visible_before_confirmation() {
    let feedback = Arc::new(RecordingFeedback::new());
    let (cache, service) = service(&feedback);
    service.list("user-001").await.unwrap();

    let pending = service.notifications.coordinator().begin(&service.read_request("user-001", "ntf-seed-1"));
    let predicted = pending.predicted.as_ref().unwrap();
    assert!(predicted.iter().find(|n| n.id == "ntf-seed-1").unwrap().read);
    let shown = cache
      .read::<Notification>(&CollectionKey::notifications("user-001"))
      .unwrap();
    assert!(shown.records.iter().find(|n| n.id == "ntf-seed-1").unwrap().read);
    assert!(shown.is_predicted);

    let messages = MutationMessages::new("ok", "failed");
    service
      .notifications
      .coordinator()
      .settle(pending, &messages, Err(StoreError::Transport("offline".to_string())))
      .unwrap_err();
    let shown = cache
      .read::<Notification>(&CollectionKey::notifications("user-001"))
      .unwrap();
    assert!(!shown.records.iter().find(|n| n.id == "ntf-seed-1").unwrap().read);
  }

  #[tokio::test]
  async fn test_mark_all_read() {
    let feedback = Arc::new(RecordingFeedback::new());
    let (_cache, service) = service(&feedback);

    let report = service.mark_all_read("user-001").await.unwrap();

    assert_eq!(report.marked, 2);
    assert!(report.failed.is_empty());
    assert_eq!(feedback.successes().len(), 2);
    let inbox = service.list("user-001").await.unwrap().data;
    assert!(inbox.iter().all(|n| n.read));
  }

  #[tokio::test]
  async fn test_delete_notification() {
    let feedback = Arc::new(RecordingFeedback::new());
    let (cache, service) = service(&feedback);
    service.list("user-001").await.unwrap();

    service.delete("user-001", "ntf-seed-3").await.unwrap();

    assert!(cache.is_stale(&CollectionKey::notifications("user-001")));
    assert_eq!(service.list("user-001").await.unwrap().data.len(), 2);
    assert_eq!(feedback.successes(), vec!["Notification deleted"]);
  }
}
