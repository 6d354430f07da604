//! Record store backed by a PostgREST-style HTTP API (`/rest/v1/<table>`).

use async_trait::async_trait;
use reqwest::{header, Client, Method, RequestBuilder, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use super::{RecordStore, StoreError};
use crate::config::Config;
use crate::model::{EntityKind, Record};

/// Error body returned by the backend
#[derive(Debug, Deserialize)]
struct ApiError {
  message: Option<String>,
  error: Option<String>,
  hint: Option<String>,
}

#[derive(Debug, Serialize)]
struct ReorderRequest<'a> {
  scope_id: &'a str,
  ordered_ids: &'a [String],
}

/// HTTP record store client
#[derive(Clone)]
pub struct RestStore {
  client: Client,
  base: Url,
  api_key: String,
}

impl RestStore {
  pub fn new(config: &Config) -> color_eyre::Result<Self> {
    let api_key = config.api_key()?;
    Self::with_api_key(&config.backend.url, api_key)
  }

  pub fn with_api_key(url: &str, api_key: String) -> color_eyre::Result<Self> {
    use color_eyre::eyre::eyre;

    let base = base_url(url).map_err(|e| eyre!("Invalid backend url {}: {}", url, e))?;

    let client = Client::builder()
      .timeout(std::time::Duration::from_secs(30))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      client,
      base,
      api_key,
    })
  }

  fn request(&self, method: Method, url: Url) -> RequestBuilder {
    self
      .client
      .request(method, url)
      .header("apikey", &self.api_key)
      .bearer_auth(&self.api_key)
      .header(header::ACCEPT, "application/json")
  }

  async fn send(&self, request: RequestBuilder) -> Result<Response, StoreError> {
    let response = request.send().await?;
    let status = response.status();
    if status.is_success() {
      return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(error_for_status(status, &body))
  }

  /// Decode a `return=representation` body, which is always an array.
  async fn single<T: DeserializeOwned>(response: Response, id: &str) -> Result<T, StoreError> {
    let rows: Vec<T> = response.json().await?;
    if rows.len() > 1 {
      warn!(id, count = rows.len(), "backend returned more than one row");
    }
    rows
      .into_iter()
      .next()
      .ok_or_else(|| StoreError::NotFound(id.to_string()))
  }
}

/// Parse the backend url so relative joins keep its path.
fn base_url(url: &str) -> Result<Url, url::ParseError> {
  let mut base = Url::parse(url)?;
  if !base.path().ends_with('/') {
    let path = format!("{}/", base.path());
    base.set_path(&path);
  }
  Ok(base)
}

fn table_url(base: &Url, kind: EntityKind) -> Result<Url, StoreError> {
  base
    .join(&format!("rest/v1/{}", kind.tag()))
    .map_err(|e| StoreError::Transport(format!("invalid table url: {}", e)))
}

/// Column a collection is scoped by.
fn scope_column(kind: EntityKind) -> &'static str {
  match kind {
    EntityKind::Notification => "user_id",
    _ => "project_id",
  }
}

fn order_clause(kind: EntityKind) -> Option<&'static str> {
  match kind {
    _ if kind.is_ordered() => Some("position.asc"),
    EntityKind::Notification | EntityKind::ActivityLog => Some("created_at.desc"),
    _ => None,
  }
}

/// Map a non-success response: client errors carry a business message,
/// anything else is a transport failure.
fn error_for_status(status: StatusCode, body: &str) -> StoreError {
  let message = serde_json::from_str::<ApiError>(body)
    .ok()
    .and_then(|e| e.message.or(e.error).or(e.hint));

  match (status, message) {
    (StatusCode::NOT_FOUND, message) => {
      StoreError::NotFound(message.unwrap_or_else(|| "not found".to_string()))
    }
    (s, Some(message)) if s.is_client_error() => StoreError::Rejected(message),
    (s, _) => StoreError::Transport(format!("http {}: {}", s.as_u16(), body.trim())),
  }
}

#[async_trait]
impl<R: Record> RecordStore<R> for RestStore {
  async fn list(&self, scope: &str) -> Result<Vec<R>, StoreError> {
    let mut url = table_url(&self.base, R::KIND)?;
    {
      let mut query = url.query_pairs_mut();
      query.append_pair("select", "*");
      query.append_pair(scope_column(R::KIND), &format!("eq.{}", scope));
      if let Some(order) = order_clause(R::KIND) {
        query.append_pair("order", order);
      }
    }

    debug!(kind = %R::KIND, scope, "GET list");
    let response = self.send(self.request(Method::GET, url)).await?;
    Ok(response.json().await?)
  }

  async fn create(
    &self,
    scope: &str,
    draft: &R::Draft,
    idempotency_key: &str,
  ) -> Result<R, StoreError> {
    let url = table_url(&self.base, R::KIND)?;

    debug!(kind = %R::KIND, scope, idempotency_key, "POST create");
    let request = self
      .request(Method::POST, url)
      .header("Prefer", "return=representation")
      .header("Idempotency-Key", idempotency_key)
      .json(draft);
    let response = self.send(request).await?;
    Self::single(response, idempotency_key).await
  }

  async fn update(&self, id: &str, patch: &R::Patch) -> Result<R, StoreError> {
    let mut url = table_url(&self.base, R::KIND)?;
    url.query_pairs_mut().append_pair("id", &format!("eq.{}", id));

    debug!(kind = %R::KIND, id, "PATCH update");
    let request = self
      .request(Method::PATCH, url)
      .header("Prefer", "return=representation")
      .json(patch);
    let response = self.send(request).await?;
    Self::single(response, id).await
  }

  async fn delete(&self, id: &str) -> Result<(), StoreError> {
    let mut url = table_url(&self.base, R::KIND)?;
    url.query_pairs_mut().append_pair("id", &format!("eq.{}", id));

    debug!(kind = %R::KIND, id, "DELETE");
    self.send(self.request(Method::DELETE, url)).await?;
    Ok(())
  }

  async fn reorder(&self, scope: &str, ids: &[String]) -> Result<(), StoreError> {
    let url = self
      .base
      .join(&format!("rest/v1/rpc/reorder_{}", R::KIND.tag()))
      .map_err(|e| StoreError::Transport(format!("invalid rpc url: {}", e)))?;

    debug!(kind = %R::KIND, scope, count = ids.len(), "POST reorder");
    let request = self.request(Method::POST, url).json(&ReorderRequest {
      scope_id: scope,
      ordered_ids: ids,
    });
    self.send(request).await?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_business_message_from_client_error() {
    let error = error_for_status(
      StatusCode::BAD_REQUEST,
      r#"{"code":"P0001","message":"Cannot delete phase","details":null,"hint":null}"#,
    );
    assert_eq!(error, StoreError::Rejected("Cannot delete phase".to_string()));
  }

  #[test]
  fn test_server_error_is_transport() {
    let error = error_for_status(StatusCode::BAD_GATEWAY, "upstream down");
    assert_eq!(
      error,
      StoreError::Transport("http 502: upstream down".to_string())
    );
  }

  #[test]
  fn test_client_error_without_message_is_transport() {
    let error = error_for_status(StatusCode::UNAUTHORIZED, "");
    assert!(matches!(error, StoreError::Transport(_)));
  }

  #[test]
  fn test_not_found() {
    let error = error_for_status(StatusCode::NOT_FOUND, "{}");
    assert_eq!(error, StoreError::NotFound("not found".to_string()));
  }

  #[test]
  fn test_table_url_keeps_base_path() {
    let base = base_url("https://db.example.com/api").unwrap();
    let url = table_url(&base, EntityKind::TimelineItem).unwrap();
    assert_eq!(
      url.as_str(),
      "https://db.example.com/api/rest/v1/timeline_items"
    );
  }

  #[test]
  fn test_scope_and_order() {
    assert_eq!(scope_column(EntityKind::Notification), "user_id");
    assert_eq!(scope_column(EntityKind::Material), "project_id");
    assert_eq!(order_clause(EntityKind::ScopeItem), Some("position.asc"));
    assert_eq!(order_clause(EntityKind::TimelineDependency), None);
  }
}
