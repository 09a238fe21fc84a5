//! Folio Server - HTTP front for the Folio content repository.
//!
//! This server exposes the admin and published operation pipelines of
//! folio-engine over HTTP, with entities persisted in PostgreSQL.

mod auth;
mod config;
mod db;
mod error;
mod handlers;
mod routes;

use crate::config::Config;
use axum::Router;
use folio_engine::storage::Storage;
use folio_engine::{
    admin_pipeline, published_pipeline, AdminEngine, AdminOperation, Pipeline, PublishedEngine,
    PublishedOperation, Schema, SchemaRegistry, Session,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub admin: Pipeline<Session, AdminOperation>,
    pub published: Pipeline<Session, PublishedOperation>,
    pub schema: Arc<SchemaRegistry>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(storage: Arc<dyn Storage>, schema: Arc<SchemaRegistry>, config: Config) -> Self {
        Self {
            admin: admin_pipeline(AdminEngine::new(storage.clone(), schema.clone())),
            published: published_pipeline(PublishedEngine::new(storage, schema.clone())),
            schema,
            config: Arc::new(config),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "folio_server=debug,folio_engine=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    tracing::info!("Starting Folio Server on {}:{}", config.host, config.port);

    let schema = Schema::load(&config.schema_path)?;
    let schema = Arc::new(SchemaRegistry::new(schema)?);
    tracing::info!("Loaded schema from {}", config.schema_path.display());

    // Create database pool
    let pool = db::create_pool(&config.database_url, config.max_connections).await?;

    // Run migrations
    tracing::info!("Running database migrations...");
    db::run_migrations(&pool).await?;

    let addr = format!("{}:{}", config.host, config.port);
    let state = AppState::new(Arc::new(db::PgStorage::new(pool)), schema, config);

    // Build router
    let app = Router::new()
        .merge(routes::create_routes())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
