use super::wire::{
    CountResponse, DeleteCommand, ErrorResponse, InsertCommand, InsertResponse, ReplaceCommand, UpdateCommand,
};
use crate::core::{RepoError, Result};
use crate::filter::FilterExpr;
use crate::query::QueryPlan;
use crate::repository::{DeleteResult, UpdateResult};
use reqwest::{Client, RequestBuilder, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, instrument};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Thin HTTP client for the document server.
///
/// Holds no locks and never retries: transport failures, timeouts and 5xx
/// answers surface as `RepoError::TransientStore` for the caller to retry.
#[derive(Debug, Clone)]
pub struct DocumentClient {
    client: Client,
    base_url: Url,
}

impl DocumentClient {
    pub fn new(base_url: &str) -> Result<Self> {
        Self::with_timeouts(base_url, DEFAULT_REQUEST_TIMEOUT, DEFAULT_CONNECT_TIMEOUT)
    }

    pub fn with_timeouts(base_url: &str, request_timeout: Duration, connect_timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| RepoError::validation(format!("invalid store URL '{}': {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(RepoError::validation(format!("store URL '{}' cannot be a base", base_url)));
        }
        let client = Client::builder()
            .timeout(request_timeout)
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| RepoError::validation(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn collection_url(&self, collection: &str, rest: &[&str]) -> Url {
        let mut segments = vec!["collections", collection];
        segments.extend_from_slice(rest);
        self.url(&segments)
    }

    pub async fn health(&self) -> Result<()> {
        let _: Value = self.send(self.client.get(self.url(&["health"])), "", None).await?;
        Ok(())
    }

    #[instrument(level = "debug", skip(self, documents), fields(count = documents.len()))]
    pub async fn insert(&self, collection: &str, documents: Vec<Value>) -> Result<InsertResponse> {
        let request = self
            .client
            .post(self.collection_url(collection, &["insert"]))
            .json(&InsertCommand { documents });
        self.send(request, collection, None).await
    }

    /// `Ok(None)` when the server reports the document as absent.
    #[instrument(level = "debug", skip(self))]
    pub async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>> {
        let request = self.client.get(self.collection_url(collection, &["documents", id]));
        match self.send(request, collection, Some(id)).await {
            Ok(document) => Ok(Some(document)),
            Err(RepoError::NotFound { .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }

    #[instrument(level = "debug", skip(self, plan))]
    pub async fn find(&self, collection: &str, plan: &QueryPlan) -> Result<Vec<Value>> {
        let request = self
            .client
            .post(self.collection_url(collection, &["find"]))
            .json(plan);
        self.send(request, collection, None).await
    }

    pub async fn count(&self, collection: &str, filter: &FilterExpr) -> Result<u64> {
        let request = self
            .client
            .post(self.collection_url(collection, &["count"]))
            .json(filter);
        let response: CountResponse = self.send(request, collection, None).await?;
        Ok(response.count)
    }

    #[instrument(level = "debug", skip(self, command), fields(multi = command.multi, ops = command.update.len()))]
    pub async fn update(&self, collection: &str, command: &UpdateCommand) -> Result<UpdateResult> {
        let request = self
            .client
            .post(self.collection_url(collection, &["update"]))
            .json(command);
        let result: UpdateResult = self.send(request, collection, None).await?;
        debug!(matched = result.matched, modified = result.modified, "update applied");
        Ok(result)
    }

    /// Replaces the whole document and returns it as stored.
    #[instrument(level = "debug", skip(self, command))]
    pub async fn replace(&self, collection: &str, id: &str, command: &ReplaceCommand) -> Result<Value> {
        let request = self
            .client
            .put(self.collection_url(collection, &["documents", id]))
            .json(command);
        self.send(request, collection, Some(id)).await
    }

    pub async fn delete_by_id(&self, collection: &str, id: &str) -> Result<DeleteResult> {
        let request = self
            .client
            .delete(self.collection_url(collection, &["documents", id]));
        self.send(request, collection, Some(id)).await
    }

    pub async fn delete(&self, collection: &str, command: &DeleteCommand) -> Result<DeleteResult> {
        let request = self
            .client
            .post(self.collection_url(collection, &["delete"]))
            .json(command);
        self.send(request, collection, None).await
    }

    pub async fn clear(&self, collection: &str) -> Result<DeleteResult> {
        let request = self.client.delete(self.collection_url(collection, &[]));
        self.send(request, collection, None).await
    }

    async fn send<R: DeserializeOwned>(&self, request: RequestBuilder, collection: &str, id: Option<&str>) -> Result<R> {
        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();
        if status.is_success() {
            return response
                .json::<R>()
                .await
                .map_err(|e| RepoError::Serialization(format!("malformed response from store: {}", e)));
        }

        let body = response.text().await.unwrap_or_default();
        let error = serde_json::from_str::<ErrorResponse>(&body).unwrap_or_else(|_| ErrorResponse {
            error: if body.is_empty() {
                status.to_string()
            } else {
                body
            },
            code: String::new(),
        });
        Err(error_from_wire(status, error, collection, id))
    }
}

fn transport_error(err: reqwest::Error) -> RepoError {
    if err.is_timeout() {
        RepoError::TransientStore(format!("store request timed out: {}", err))
    } else if err.is_connect() {
        RepoError::TransientStore(format!("store unreachable: {}", err))
    } else {
        RepoError::TransientStore(format!("store request failed: {}", err))
    }
}

/// Maps a failed response back into the error taxonomy.
pub(crate) fn error_from_wire(status: StatusCode, error: ErrorResponse, collection: &str, id: Option<&str>) -> RepoError {
    if status.is_server_error() {
        return RepoError::TransientStore(format!("store answered {}: {}", status, error.error));
    }
    match error.code.as_str() {
        "not_found" => RepoError::not_found(collection, id.unwrap_or_default()),
        "unsupported_path" => RepoError::UnsupportedPath(error.error),
        "serialization" => RepoError::Serialization(error.error),
        "transient" => RepoError::TransientStore(error.error),
        "validation" => RepoError::Validation(error.error),
        _ if status == StatusCode::NOT_FOUND => RepoError::not_found(collection, id.unwrap_or_default()),
        _ if status == StatusCode::REQUEST_TIMEOUT || status == StatusCode::TOO_MANY_REQUESTS => {
            RepoError::TransientStore(error.error)
        }
        _ => RepoError::Validation(error.error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wire(code: &str) -> ErrorResponse {
        ErrorResponse {
            error: "boom".into(),
            code: code.into(),
        }
    }

    #[test]
    fn server_errors_are_transient() {
        let err = error_from_wire(StatusCode::INTERNAL_SERVER_ERROR, wire("storage"), "Product", None);
        assert!(err.is_retryable());
        let err = error_from_wire(StatusCode::SERVICE_UNAVAILABLE, wire(""), "Product", None);
        assert!(err.is_retryable());
    }

    #[test]
    fn codes_map_back_to_the_taxonomy() {
        assert!(matches!(
            error_from_wire(StatusCode::BAD_REQUEST, wire("unsupported_path"), "P", None),
            RepoError::UnsupportedPath(_)
        ));
        assert!(matches!(
            error_from_wire(StatusCode::UNPROCESSABLE_ENTITY, wire("validation"), "P", None),
            RepoError::Validation(_)
        ));
        match error_from_wire(StatusCode::NOT_FOUND, wire("not_found"), "P", Some("x")) {
            RepoError::NotFound { collection, id } => {
                assert_eq!(collection, "P");
                assert_eq!(id, "x");
            }
            other => panic!("expected not found, got {other:?}"),
        }
    }

    #[test]
    fn messages_are_prefixed_once() {
        let err = error_from_wire(StatusCode::UNPROCESSABLE_ENTITY, wire("validation"), "P", None);
        assert_eq!(err.to_string(), "Validation error: boom");
    }

    #[test]
    fn ids_are_escaped_into_single_segments() {
        let client = DocumentClient::new("http://127.0.0.1:9/api/").unwrap();
        let url = client.collection_url("Product", &["documents", "a/b c"]);
        assert_eq!(url.path(), "/api/collections/Product/documents/a%2Fb%20c");
    }

    #[test]
    fn rejects_non_base_urls() {
        assert!(DocumentClient::new("mailto:someone@example.com").is_err());
        assert!(DocumentClient::new("not a url").is_err());
    }

    #[tokio::test]
    async fn unreachable_store_is_transient() {
        let client = DocumentClient::with_timeouts(
            "http://127.0.0.1:9",
            Duration::from_millis(500),
            Duration::from_millis(200),
        )
        .unwrap();
        let err = client.get("Product", "p1").await.unwrap_err();
        assert!(err.is_retryable(), "got {err:?}");
    }
}
