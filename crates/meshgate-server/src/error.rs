use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use meshgate_registry::RegistryError;
use meshgate_shared::RelayError;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("{0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<RegistryError> for ServerError {
    fn from(err: RegistryError) -> Self {
        ServerError::NotFound(err.to_string())
    }
}

impl From<RelayError> for ServerError {
    fn from(err: RelayError) -> Self {
        match err {
            RelayError::NotFound(_) => ServerError::NotFound(err.to_string()),
            RelayError::Unauthorized | RelayError::PolicyViolation(_) => {
                ServerError::Forbidden(err.to_string())
            }
            RelayError::Transport(_) => ServerError::Internal(err.to_string()),
            _ => ServerError::BadRequest(err.to_string()),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ServerError::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            ServerError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ServerError::Forbidden(_) => (StatusCode::FORBIDDEN, self.to_string()),
            ServerError::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, axum::Json(body)).into_response()
    }
}
