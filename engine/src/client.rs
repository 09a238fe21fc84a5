//! Admin and published clients, and the middlewares they are built from.
//!
//! A client turns each method call into an operation and runs it through its
//! pipeline. Whether the operation ends up in a local engine or goes over the
//! wire is decided by the terminal middleware alone:
//!
//! - [`AdminDatabaseMiddleware`] / [`PublishedDatabaseMiddleware`] run it
//!   against an engine.
//! - [`JsonTransport`] sends it to a [`RemoteEndpoint`]; the receiving side
//!   answers with [`execute_json`].

use crate::admin::AdminEngine;
use crate::entity::{
    AdminEntity, EntityCreate, EntityHistory, EntityMutationPayload, EntityPublishingPayload,
    EntitySamplingPayload, EntityUpdate, EntityUpsert, EntityVersionReference, MutationOptions,
    PublishedEntity, PublishingHistory, SamplingOptions,
};
use crate::operation::{
    AdminOperation, AdminOperationValue, JsonOperation, PublishedOperation,
    PublishedOperationValue, WireResult,
};
use crate::paging::{Connection, Paging};
use crate::pipeline::{Middleware, Operation, OperationArgs, Pipeline};
use crate::published::PublishedEngine;
use crate::query::EntityQuery;
use crate::session::Session;
use crate::{EntityId, Error, Result, Version};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Instant;

fn unexpected_value(name: &str) -> Error {
    Error::generic(format!("{name}: unexpected result value"))
}

/// Runs admin operations against an [`AdminEngine`].
pub struct AdminDatabaseMiddleware {
    engine: AdminEngine,
}

impl AdminDatabaseMiddleware {
    pub fn new(engine: AdminEngine) -> Self {
        Self { engine }
    }

    async fn dispatch(&self, session: &Session, args: AdminOperation) -> Result<AdminOperationValue> {
        let engine = &self.engine;
        Ok(match args {
            AdminOperation::GetEntity { id, version } => {
                AdminOperationValue::Entity(engine.get_entity(session, id, version).await?)
            }
            AdminOperation::GetEntities { ids } => {
                AdminOperationValue::Entities(engine.get_entities(session, &ids).await?)
            }
            AdminOperation::SearchEntities { query, paging } => AdminOperationValue::Connection(
                engine.search_entities(session, &query, &paging).await?,
            ),
            AdminOperation::GetTotalCount { query } => {
                AdminOperationValue::TotalCount(engine.get_total_count(session, &query).await?)
            }
            AdminOperation::SampleEntities { query, options } => AdminOperationValue::Sample(
                engine.sample_entities(session, &query, &options).await?,
            ),
            AdminOperation::CreateEntity { entity, options } => {
                AdminOperationValue::Mutation(engine.create_entity(session, entity, options).await?)
            }
            AdminOperation::UpdateEntity { entity, options } => {
                AdminOperationValue::Mutation(engine.update_entity(session, entity, options).await?)
            }
            AdminOperation::UpsertEntity { entity, options } => {
                AdminOperationValue::Mutation(engine.upsert_entity(session, entity, options).await?)
            }
            AdminOperation::PublishEntities { references } => AdminOperationValue::PublishingBatch(
                engine.publish_entities(session, &references).await?,
            ),
            AdminOperation::UnpublishEntities { ids } => AdminOperationValue::PublishingBatch(
                engine.unpublish_entities(session, &ids).await?,
            ),
            AdminOperation::ArchiveEntity { id } => {
                AdminOperationValue::Publishing(engine.archive_entity(session, id).await?)
            }
            AdminOperation::UnarchiveEntity { id } => {
                AdminOperationValue::Publishing(engine.unarchive_entity(session, id).await?)
            }
            AdminOperation::DeleteEntity { id } => {
                AdminOperationValue::Publishing(engine.delete_entity(session, id).await?)
            }
            AdminOperation::GetEntityHistory { id } => {
                AdminOperationValue::EntityHistory(engine.get_entity_history(session, id).await?)
            }
            AdminOperation::GetPublishingHistory { id } => AdminOperationValue::PublishingHistory(
                engine.get_publishing_history(session, id).await?,
            ),
        })
    }
}

#[async_trait]
impl Middleware<Session, AdminOperation> for AdminDatabaseMiddleware {
    async fn handle(&self, context: &Session, operation: Operation<'_, Session, AdminOperation>) {
        let result = self.dispatch(context, operation.args.clone()).await;
        operation.resolve(result);
    }
}

/// Runs published operations against a [`PublishedEngine`].
pub struct PublishedDatabaseMiddleware {
    engine: PublishedEngine,
}

impl PublishedDatabaseMiddleware {
    pub fn new(engine: PublishedEngine) -> Self {
        Self { engine }
    }

    async fn dispatch(
        &self,
        session: &Session,
        args: PublishedOperation,
    ) -> Result<PublishedOperationValue> {
        let engine = &self.engine;
        Ok(match args {
            PublishedOperation::GetEntity { id } => {
                PublishedOperationValue::Entity(engine.get_entity(session, id).await?)
            }
            PublishedOperation::GetEntities { ids } => {
                PublishedOperationValue::Entities(engine.get_entities(session, &ids).await?)
            }
            PublishedOperation::SearchEntities { query, paging } => {
                PublishedOperationValue::Connection(
                    engine.search_entities(session, &query, &paging).await?,
                )
            }
            PublishedOperation::GetTotalCount { query } => {
                PublishedOperationValue::TotalCount(engine.get_total_count(session, &query).await?)
            }
            PublishedOperation::SampleEntities { query, options } => {
                PublishedOperationValue::Sample(
                    engine.sample_entities(session, &query, &options).await?,
                )
            }
        })
    }
}

#[async_trait]
impl Middleware<Session, PublishedOperation> for PublishedDatabaseMiddleware {
    async fn handle(
        &self,
        context: &Session,
        operation: Operation<'_, Session, PublishedOperation>,
    ) {
        let result = self.dispatch(context, operation.args.clone()).await;
        operation.resolve(result);
    }
}

/// Fills in default auth keys and rejects keys the session doesn't hold,
/// before the operation reaches the engine.
#[derive(Debug, Clone, Copy, Default)]
pub struct AuthKeyMiddleware;

fn authorize_query(session: &Session, query: &mut EntityQuery) -> Result<()> {
    query.auth_keys = session.resolve_auth_keys(&query.auth_keys)?;
    Ok(())
}

fn authorize_new_entity(session: &Session, auth_key: &mut Option<String>) -> Result<()> {
    let key = auth_key.get_or_insert_with(|| session.default_auth_key().to_string());
    session.check_auth_key(key)
}

#[async_trait]
impl Middleware<Session, AdminOperation> for AuthKeyMiddleware {
    async fn handle(&self, context: &Session, mut operation: Operation<'_, Session, AdminOperation>) {
        let checked = match &mut operation.args {
            AdminOperation::SearchEntities { query, .. }
            | AdminOperation::GetTotalCount { query }
            | AdminOperation::SampleEntities { query, .. } => authorize_query(context, query),
            AdminOperation::CreateEntity { entity, .. } => {
                authorize_new_entity(context, &mut entity.info.auth_key)
            }
            // Left unset: an existing entity keeps its key, a new one gets the default
            AdminOperation::UpsertEntity { entity, .. } => match &entity.info.auth_key {
                Some(key) => context.check_auth_key(key),
                None => Ok(()),
            },
            _ => Ok(()),
        };
        match checked {
            Ok(()) => operation.pass_through().await,
            Err(err) => operation.resolve(Err(err)),
        }
    }
}

#[async_trait]
impl Middleware<Session, PublishedOperation> for AuthKeyMiddleware {
    async fn handle(
        &self,
        context: &Session,
        mut operation: Operation<'_, Session, PublishedOperation>,
    ) {
        let checked = match &mut operation.args {
            PublishedOperation::SearchEntities { query, .. }
            | PublishedOperation::GetTotalCount { query }
            | PublishedOperation::SampleEntities { query, .. } => authorize_query(context, query),
            _ => Ok(()),
        };
        match checked {
            Ok(()) => operation.pass_through().await,
            Err(err) => operation.resolve(Err(err)),
        }
    }
}

/// Logs every operation with its duration and outcome.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingMiddleware;

#[async_trait]
impl<C, O> Middleware<C, O> for TracingMiddleware
where
    C: Send + Sync,
    O: OperationArgs,
{
    async fn handle(&self, _context: &C, operation: Operation<'_, C, O>) {
        let name = operation.name();
        let started = Instant::now();
        let result = operation.next().await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(_) => tracing::debug!(operation = name, elapsed_ms, "operation succeeded"),
            Err(err) => tracing::warn!(
                operation = name,
                elapsed_ms,
                kind = %err.kind,
                message = %err.message,
                "operation failed"
            ),
        }
        operation.resolve(result);
    }
}

/// Where [`JsonTransport`] sends operations.
#[async_trait]
pub trait RemoteEndpoint: Send + Sync {
    /// Send `{name, args}` and return the `{value}` / `{error, message}` body.
    async fn send(&self, request: Value) -> Result<Value>;
}

/// Terminal middleware that executes operations remotely.
pub struct JsonTransport<E> {
    endpoint: E,
}

impl<E: RemoteEndpoint> JsonTransport<E> {
    pub fn new(endpoint: E) -> Self {
        Self { endpoint }
    }

    async fn call<O: JsonOperation>(&self, args: &O) -> Result<O::Value> {
        let request = serde_json::to_value(args)
            .map_err(|err| Error::generic(format!("{}: can't encode operation: {err}", args.name())))?;
        let response = self.endpoint.send(request).await?;
        let wire: WireResult = serde_json::from_value(response).map_err(|err| {
            Error::generic(format!("{}: malformed response: {err}", args.name()))
        })?;
        wire.decode(args)
    }
}

#[async_trait]
impl<C, O, E> Middleware<C, O> for JsonTransport<E>
where
    C: Send + Sync,
    O: JsonOperation,
    E: RemoteEndpoint,
{
    async fn handle(&self, _context: &C, operation: Operation<'_, C, O>) {
        let result = self.call(&operation.args).await;
        operation.resolve(result);
    }
}

/// Receiving side of [`JsonTransport`]: decode a request, run it, encode the
/// outcome. Never fails; errors become `{error, message}`.
pub async fn execute_json<C, O>(pipeline: &Pipeline<C, O>, context: &C, request: Value) -> Value
where
    C: Send + Sync,
    O: JsonOperation,
{
    let result = match serde_json::from_value::<O>(request) {
        Ok(args) => pipeline.execute(context, args).await,
        Err(err) => Err(Error::bad_request(format!("invalid operation: {err}"))),
    };
    serde_json::to_value(WireResult::encode::<O>(&result)).unwrap_or_else(|err| {
        serde_json::json!({"error": "Generic", "message": format!("can't encode result: {err}")})
    })
}

/// Typed admin API over a pipeline.
pub struct AdminClient<C> {
    context: C,
    pipeline: Pipeline<C, AdminOperation>,
}

impl<C: Send + Sync> AdminClient<C> {
    pub fn new(context: C, pipeline: Pipeline<C, AdminOperation>) -> Self {
        Self { context, pipeline }
    }

    pub fn context(&self) -> &C {
        &self.context
    }

    async fn run(&self, args: AdminOperation) -> Result<AdminOperationValue> {
        self.pipeline.execute(&self.context, args).await
    }

    pub async fn get_entity(&self, id: EntityId, version: Option<Version>) -> Result<AdminEntity> {
        match self.run(AdminOperation::GetEntity { id, version }).await? {
            AdminOperationValue::Entity(entity) => Ok(entity),
            _ => Err(unexpected_value("getEntity")),
        }
    }

    pub async fn get_entities(&self, ids: Vec<EntityId>) -> Result<Vec<Result<AdminEntity>>> {
        match self.run(AdminOperation::GetEntities { ids }).await? {
            AdminOperationValue::Entities(entities) => Ok(entities),
            _ => Err(unexpected_value("getEntities")),
        }
    }

    pub async fn search_entities(
        &self,
        query: EntityQuery,
        paging: Paging,
    ) -> Result<Option<Connection<AdminEntity>>> {
        match self.run(AdminOperation::SearchEntities { query, paging }).await? {
            AdminOperationValue::Connection(connection) => Ok(connection),
            _ => Err(unexpected_value("searchEntities")),
        }
    }

    pub async fn get_total_count(&self, query: EntityQuery) -> Result<u64> {
        match self.run(AdminOperation::GetTotalCount { query }).await? {
            AdminOperationValue::TotalCount(count) => Ok(count),
            _ => Err(unexpected_value("getTotalCount")),
        }
    }

    pub async fn sample_entities(
        &self,
        query: EntityQuery,
        options: SamplingOptions,
    ) -> Result<EntitySamplingPayload<AdminEntity>> {
        match self.run(AdminOperation::SampleEntities { query, options }).await? {
            AdminOperationValue::Sample(sample) => Ok(sample),
            _ => Err(unexpected_value("sampleEntities")),
        }
    }

    pub async fn create_entity(
        &self,
        entity: EntityCreate,
        options: MutationOptions,
    ) -> Result<EntityMutationPayload> {
        match self.run(AdminOperation::CreateEntity { entity, options }).await? {
            AdminOperationValue::Mutation(payload) => Ok(payload),
            _ => Err(unexpected_value("createEntity")),
        }
    }

    pub async fn update_entity(
        &self,
        entity: EntityUpdate,
        options: MutationOptions,
    ) -> Result<EntityMutationPayload> {
        match self.run(AdminOperation::UpdateEntity { entity, options }).await? {
            AdminOperationValue::Mutation(payload) => Ok(payload),
            _ => Err(unexpected_value("updateEntity")),
        }
    }

    pub async fn upsert_entity(
        &self,
        entity: EntityUpsert,
        options: MutationOptions,
    ) -> Result<EntityMutationPayload> {
        match self.run(AdminOperation::UpsertEntity { entity, options }).await? {
            AdminOperationValue::Mutation(payload) => Ok(payload),
            _ => Err(unexpected_value("upsertEntity")),
        }
    }

    pub async fn publish_entities(
        &self,
        references: Vec<EntityVersionReference>,
    ) -> Result<Vec<EntityPublishingPayload>> {
        match self.run(AdminOperation::PublishEntities { references }).await? {
            AdminOperationValue::PublishingBatch(payloads) => Ok(payloads),
            _ => Err(unexpected_value("publishEntities")),
        }
    }

    pub async fn unpublish_entities(
        &self,
        ids: Vec<EntityId>,
    ) -> Result<Vec<EntityPublishingPayload>> {
        match self.run(AdminOperation::UnpublishEntities { ids }).await? {
            AdminOperationValue::PublishingBatch(payloads) => Ok(payloads),
            _ => Err(unexpected_value("unpublishEntities")),
        }
    }

    pub async fn archive_entity(&self, id: EntityId) -> Result<EntityPublishingPayload> {
        match self.run(AdminOperation::ArchiveEntity { id }).await? {
            AdminOperationValue::Publishing(payload) => Ok(payload),
            _ => Err(unexpected_value("archiveEntity")),
        }
    }

    pub async fn unarchive_entity(&self, id: EntityId) -> Result<EntityPublishingPayload> {
        match self.run(AdminOperation::UnarchiveEntity { id }).await? {
            AdminOperationValue::Publishing(payload) => Ok(payload),
            _ => Err(unexpected_value("unarchiveEntity")),
        }
    }

    pub async fn delete_entity(&self, id: EntityId) -> Result<EntityPublishingPayload> {
        match self.run(AdminOperation::DeleteEntity { id }).await? {
            AdminOperationValue::Publishing(payload) => Ok(payload),
            _ => Err(unexpected_value("deleteEntity")),
        }
    }

    pub async fn get_entity_history(&self, id: EntityId) -> Result<EntityHistory> {
        match self.run(AdminOperation::GetEntityHistory { id }).await? {
            AdminOperationValue::EntityHistory(history) => Ok(history),
            _ => Err(unexpected_value("getEntityHistory")),
        }
    }

    pub async fn get_publishing_history(&self, id: EntityId) -> Result<PublishingHistory> {
        match self.run(AdminOperation::GetPublishingHistory { id }).await? {
            AdminOperationValue::PublishingHistory(history) => Ok(history),
            _ => Err(unexpected_value("getPublishingHistory")),
        }
    }
}

/// Typed published API over a pipeline.
pub struct PublishedClient<C> {
    context: C,
    pipeline: Pipeline<C, PublishedOperation>,
}

impl<C: Send + Sync> PublishedClient<C> {
    pub fn new(context: C, pipeline: Pipeline<C, PublishedOperation>) -> Self {
        Self { context, pipeline }
    }

    async fn run(&self, args: PublishedOperation) -> Result<PublishedOperationValue> {
        self.pipeline.execute(&self.context, args).await
    }

    pub async fn get_entity(&self, id: EntityId) -> Result<PublishedEntity> {
        match self.run(PublishedOperation::GetEntity { id }).await? {
            PublishedOperationValue::Entity(entity) => Ok(entity),
            _ => Err(unexpected_value("getEntity")),
        }
    }

    pub async fn get_entities(&self, ids: Vec<EntityId>) -> Result<Vec<Result<PublishedEntity>>> {
        match self.run(PublishedOperation::GetEntities { ids }).await? {
            PublishedOperationValue::Entities(entities) => Ok(entities),
            _ => Err(unexpected_value("getEntities")),
        }
    }

    pub async fn search_entities(
        &self,
        query: EntityQuery,
        paging: Paging,
    ) -> Result<Option<Connection<PublishedEntity>>> {
        match self
            .run(PublishedOperation::SearchEntities { query, paging })
            .await?
        {
            PublishedOperationValue::Connection(connection) => Ok(connection),
            _ => Err(unexpected_value("searchEntities")),
        }
    }

    pub async fn get_total_count(&self, query: EntityQuery) -> Result<u64> {
        match self.run(PublishedOperation::GetTotalCount { query }).await? {
            PublishedOperationValue::TotalCount(count) => Ok(count),
            _ => Err(unexpected_value("getTotalCount")),
        }
    }

    pub async fn sample_entities(
        &self,
        query: EntityQuery,
        options: SamplingOptions,
    ) -> Result<EntitySamplingPayload<PublishedEntity>> {
        match self
            .run(PublishedOperation::SampleEntities { query, options })
            .await?
        {
            PublishedOperationValue::Sample(sample) => Ok(sample),
            _ => Err(unexpected_value("sampleEntities")),
        }
    }
}

/// The standard admin pipeline over a local engine.
pub fn admin_pipeline(engine: AdminEngine) -> Pipeline<Session, AdminOperation> {
    Pipeline::new()
        .with(TracingMiddleware)
        .with(AuthKeyMiddleware)
        .with(AdminDatabaseMiddleware::new(engine))
}

/// The standard published pipeline over a local engine.
pub fn published_pipeline(engine: PublishedEngine) -> Pipeline<Session, PublishedOperation> {
    Pipeline::new()
        .with(TracingMiddleware)
        .with(AuthKeyMiddleware)
        .with(PublishedDatabaseMiddleware::new(engine))
}
