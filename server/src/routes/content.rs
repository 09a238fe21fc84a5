//! Content operation routes.

use axum::{
    extract::{rejection::JsonRejection, State},
    response::Response,
    routing::post,
    Json, Router,
};
use serde_json::Value;

use crate::auth::AuthSession;
use crate::error::Result;
use crate::handlers::handle_operation;
use crate::AppState;

/// Create content routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/admin", post(admin_handler))
        .route("/published", post(published_handler))
}

/// POST /admin - Run an admin operation.
async fn admin_handler(
    State(state): State<AppState>,
    AuthSession(session): AuthSession,
    request: std::result::Result<Json<Value>, JsonRejection>,
) -> Result<Response> {
    let Json(request) = request?;
    Ok(handle_operation(&state.admin, &session, request).await)
}

/// POST /published - Run a published operation.
async fn published_handler(
    State(state): State<AppState>,
    AuthSession(session): AuthSession,
    request: std::result::Result<Json<Value>, JsonRejection>,
) -> Result<Response> {
    let Json(request) = request?;
    Ok(handle_operation(&state.published, &session, request).await)
}
