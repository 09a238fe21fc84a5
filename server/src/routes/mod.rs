//! HTTP route definitions.

mod content;
mod health;
mod schema;

use crate::AppState;
use axum::Router;

/// Create all application routes.
pub fn create_routes() -> Router<AppState> {
    Router::new()
        .merge(health::routes())
        .merge(content::routes())
        .merge(schema::routes())
}
