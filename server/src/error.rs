//! Unified error handling for the server.

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use folio_engine::ErrorKind;
use serde::Serialize;

/// Application error type.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Engine error: {0}")]
    Engine(#[from] folio_engine::Error),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(&'static str),
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

/// Error response body, same shape as an operation error.
#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorKind,
    message: String,
}

/// HTTP status for an engine error kind.
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::BadRequest => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::NotAuthorized => StatusCode::UNAUTHORIZED,
        ErrorKind::Generic => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (kind, message) = match self {
            AppError::Engine(e) => {
                if e.kind == ErrorKind::Generic {
                    tracing::error!("Engine error: {}", e);
                } else {
                    tracing::warn!("Engine error: {}", e);
                }
                (e.kind, e.message)
            }
            AppError::BadRequest(msg) => (ErrorKind::BadRequest, msg),
            AppError::Unauthorized(msg) => (ErrorKind::NotAuthorized, msg.to_string()),
        };

        let body = Json(ErrorResponse {
            error: kind,
            message,
        });

        (status_for(kind), body).into_response()
    }
}

/// Result type alias for handlers.
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_map_to_statuses() {
        assert_eq!(status_for(ErrorKind::BadRequest), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(ErrorKind::NotFound), StatusCode::NOT_FOUND);
        assert_eq!(status_for(ErrorKind::Conflict), StatusCode::CONFLICT);
        assert_eq!(status_for(ErrorKind::NotAuthorized), StatusCode::UNAUTHORIZED);
        assert_eq!(
            status_for(ErrorKind::Generic),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn engine_error_response() {
        let response =
            AppError::from(folio_engine::Error::not_found("No such entity (x)")).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = AppError::Unauthorized("Missing authorization header").into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
