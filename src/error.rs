use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum ObserverError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("supervisor is no longer running")]
    SupervisorGone,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl IntoResponse for ObserverError {
    fn into_response(self) -> Response {
        match self {
            ObserverError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
            }
            ObserverError::NotFound(_) => (StatusCode::NOT_FOUND, "Not Found").into_response(),
            other => {
                tracing::error!(error = %other, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": other.to_string() })),
                )
                    .into_response()
            }
        }
    }
}
