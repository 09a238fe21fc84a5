//! Schema routes.

use axum::{extract::State, routing::post, Json, Router};

use crate::auth::AuthSession;
use crate::error::Result;
use crate::handlers::{handle_reload, ReloadResponse};
use crate::AppState;

/// Create schema routes.
pub fn routes() -> Router<AppState> {
    Router::new().route("/schema/reload", post(reload_handler))
}

/// POST /schema/reload - Re-read the schema file.
async fn reload_handler(
    State(state): State<AppState>,
    _auth: AuthSession,
) -> Result<Json<ReloadResponse>> {
    let response = handle_reload(&state.schema, &state.config.schema_path).await?;
    Ok(Json(response))
}
