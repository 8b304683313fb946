use crate::core::RepoError;
use crate::networked::wire::ErrorResponse;
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

#[derive(Debug)]
pub struct ServerError(pub RepoError);

impl From<RepoError> for ServerError {
    fn from(err: RepoError) -> Self {
        Self(err)
    }
}

impl ServerError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            RepoError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            RepoError::NotFound { .. } => StatusCode::NOT_FOUND,
            RepoError::UnsupportedPath(_) | RepoError::Serialization(_) => StatusCode::BAD_REQUEST,
            RepoError::ConcurrencyConflict { .. } => StatusCode::CONFLICT,
            RepoError::TransientStore(_) | RepoError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
            RepoError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        }
        let body = Json(ErrorResponse {
            error: self.0.message(),
            code: self.0.code().to_string(),
        });
        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, ServerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_maps_to_http_status() {
        assert_eq!(
            ServerError(RepoError::validation("bad")).status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ServerError(RepoError::unsupported_path("x()")).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServerError(RepoError::not_found("P", "1")).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ServerError(RepoError::Storage("disk".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn body_carries_the_bare_message() {
        let response = ServerError(RepoError::validation("cannot increment 'name'")).into_response();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: ErrorResponse = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body.error, "cannot increment 'name'");
        assert_eq!(body.code, "validation");
    }
}
