//! # Folio Engine
//!
//! The core of a headless, schema-driven content repository.
//!
//! Entities are typed, versioned records validated against a [`Schema`]. Each
//! entity has a draft head (its latest version) and optionally a published
//! version, so the admin view and the published view of the same data can
//! diverge and be reconciled explicitly by publishing.
//!
//! ## Design Principles
//!
//! - **No IO of its own**: persistence goes through the [`Storage`] trait;
//!   [`MemoryStorage`] ships with the crate, a Postgres adapter lives in the
//!   server
//! - **Errors are values**: every fallible call returns [`Result`]; only
//!   pipeline misconfiguration panics
//! - **One transaction per mutation**: checks and writes of a call commit
//!   together or not at all
//!
//! ## Core Concepts
//!
//! ### Schema & Field Codec
//!
//! A [`Schema`] declares entity types and value types. The [`codec`] encodes
//! external field values into their stored form (and back), normalizing empty
//! values to null and collecting references, locations and text on the way.
//!
//! ### Publishing
//!
//! [`AdminEngine`] versions entities and drives the status of each:
//! [`EntityStatus::Draft`], `Published`, `Modified`, `Withdrawn` or
//! `Archived`. Status is derived from the version pointers, never stored.
//! Publishing is only allowed when everything an entity references is
//! published too; unpublishing only when no published entity references it.
//!
//! ### Paging
//!
//! Searches return Relay-style [`Connection`]s with opaque cursors. One extra
//! row is fetched per page to tell whether there is another page.
//!
//! ### Operation Pipeline
//!
//! [`AdminClient`] and [`PublishedClient`] turn every call into an operation
//! and run it through a [`Pipeline`] of middlewares, ending either in a local
//! engine or in a [`JsonTransport`] to a remote one.
//!
//! ## Quick Start
//!
//! ```rust
//! use folio_engine::{
//!     admin_pipeline, published_pipeline, AdminClient, AdminEngine, EntityCreate,
//!     EntityStatus, EntityTypeSpecification, FieldSpecification, FieldType, MemoryStorage,
//!     MutationOptions, PublishedClient, PublishedEngine, Schema, SchemaRegistry, Session,
//! };
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # tokio_test_block(async {
//! // 1. Define a schema
//! let schema = Schema::new().with_entity_type(EntityTypeSpecification::new(
//!     "Foo",
//!     vec![FieldSpecification::new("title", FieldType::String)],
//! ));
//! let schema = Arc::new(SchemaRegistry::new(schema).unwrap());
//!
//! // 2. Wire engines and clients
//! let storage = Arc::new(MemoryStorage::new());
//! let session = Session::new(uuid::Uuid::new_v4());
//! let admin = AdminClient::new(
//!     session.clone(),
//!     admin_pipeline(AdminEngine::new(storage.clone(), schema.clone())),
//! );
//! let published = PublishedClient::new(
//!     session,
//!     published_pipeline(PublishedEngine::new(storage, schema)),
//! );
//!
//! // 3. Create and publish
//! let created = admin
//!     .create_entity(
//!         EntityCreate::new("Foo", "Foo").with_field("title", json!("Title")),
//!         MutationOptions::publish(),
//!     )
//!     .await
//!     .unwrap();
//! assert_eq!(created.entity.info.status, EntityStatus::Published);
//!
//! // 4. Read the published view
//! let entity = published.get_entity(created.entity.id).await.unwrap();
//! assert_eq!(entity.fields["title"], json!("Title"));
//! # });
//! # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
//! # }
//! ```

pub mod admin;
pub mod client;
pub mod codec;
pub mod entity;
pub mod error;
pub mod memory;
pub mod operation;
pub mod paging;
pub mod pipeline;
pub mod published;
pub mod query;
pub mod resolve;
pub mod schema;
mod search;
pub mod session;
pub mod storage;

// Re-export main types at crate root
pub use admin::AdminEngine;
pub use client::{
    admin_pipeline, execute_json, published_pipeline, AdminClient, AdminDatabaseMiddleware,
    AuthKeyMiddleware, JsonTransport, PublishedClient, PublishedDatabaseMiddleware,
    RemoteEndpoint, TracingMiddleware,
};
pub use codec::{FieldValues, Location};
pub use entity::{
    AdminEntity, AdminEntityInfo, EntityCreate, EntityCreateInfo, EntityHistory,
    EntityMutationPayload, EntityPublishingPayload, EntitySamplingPayload, EntityStatus,
    EntityUpdate, EntityUpdateInfo, EntityUpsert, EntityVersionInfo, EntityVersionReference,
    MutationEffect, MutationOptions, PublishedEntity, PublishedEntityInfo, PublishingEffect,
    PublishingEvent, PublishingEventKind, PublishingHistory, SamplingOptions, DEFAULT_AUTH_KEY,
};
pub use error::{Error, ErrorKind, Result};
pub use memory::MemoryStorage;
pub use operation::{
    AdminOperation, AdminOperationValue, JsonOperation, PublishedOperation,
    PublishedOperationValue, WireResult,
};
pub use paging::{
    from_opaque_cursor, resolve_paging, to_opaque_cursor, Connection, CursorKey, CursorKind,
    Edge, PageInfo, Paging, ResolvedPaging, DEFAULT_PAGE_SIZE,
};
pub use pipeline::{Middleware, Operation, OperationArgs, Pipeline};
pub use published::PublishedEngine;
pub use query::{BoundingBox, EntityOrder, EntityQuery, EntityView, QueryFilter, SearchPlan};
pub use schema::{
    EntityTypeSpecification, FieldSpecification, FieldType, Schema, SchemaRegistry,
    ValueTypeSpecification,
};
pub use session::Session;
pub use storage::{Storage, StorageTx};

/// Type aliases for clarity
pub type EntityId = uuid::Uuid;
pub type Version = u32;
pub type Timestamp = chrono::DateTime<chrono::Utc>;
