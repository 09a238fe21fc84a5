//! Admin view: versioned mutation and the publishing state machine.
//!
//! Every mutation runs in exactly one storage transaction. Steps that other
//! mutations build on (`create_in`, `update_in`, `publish_in`) take the
//! caller's transaction, so create-and-publish or upsert commit atomically.
//! All integrity checks read through the same transaction that commits the
//! change.

use crate::codec::{collect_missing_required, decode_fields};
use crate::entity::{
    AdminEntity, EntityCreate, EntityHistory, EntityMutationPayload, EntityPublishingPayload,
    EntitySamplingPayload, EntityUpdate, EntityUpsert, EntityVersionInfo, EntityVersionReference,
    MutationEffect, MutationOptions, PublishingEffect, PublishingEvent, PublishingEventKind,
    PublishingHistory, SamplingOptions,
};
use crate::paging::{Connection, Paging};
use crate::query::{EntityQuery, EntityView, QueryFilter};
use crate::resolve::{
    decode_admin_entity, encode_create, resolve_references, resolve_update, NAME_SUFFIX_DIGITS,
};
use crate::schema::{Schema, SchemaRegistry};
use crate::session::Session;
use crate::storage::{
    duplicate_ids, EntityRow, EntityVersionRow, NewEntity, PublishState, Storage, StorageTx,
    VersionIndex,
};
use crate::{search, EntityId, Error, Result, Version};
use chrono::Utc;
use rand::Rng;
use std::sync::Arc;
use uuid::Uuid;

fn join_ids(ids: &[EntityId]) -> String {
    ids.iter()
        .map(Uuid::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

fn no_such_entity(id: EntityId) -> Error {
    Error::not_found(format!("No such entity ({id})"))
}

/// Load an entity head the session may access.
async fn load_entity(
    tx: &mut dyn StorageTx,
    session: &Session,
    id: EntityId,
) -> Result<EntityRow> {
    let entity = tx.get_entity(id).await?.ok_or_else(|| no_such_entity(id))?;
    session.check_auth_key(&entity.auth_key)?;
    Ok(entity)
}

async fn load_version(
    tx: &mut dyn StorageTx,
    id: EntityId,
    version: Version,
) -> Result<EntityVersionRow> {
    tx.get_version(id, version)
        .await?
        .ok_or_else(|| Error::not_found(format!("No such version ({version}) of entity ({id})")))
}

/// Pick a free entity name, appending `#<8 digits>` on collision.
async fn unique_name(
    tx: &mut dyn StorageTx,
    name: &str,
    exclude: Option<EntityId>,
) -> Result<String> {
    if !tx.name_exists(name, exclude).await? {
        return Ok(name.to_string());
    }
    loop {
        let suffix: u32 = rand::thread_rng().gen_range(0..10u32.pow(NAME_SUFFIX_DIGITS as u32));
        let candidate = format!("{name}#{suffix:0width$}", width = NAME_SUFFIX_DIGITS);
        if !tx.name_exists(&candidate, exclude).await? {
            return Ok(candidate);
        }
    }
}

fn publishing_payload(entity: &EntityRow, effect: PublishingEffect) -> EntityPublishingPayload {
    EntityPublishingPayload {
        id: entity.id,
        status: entity.status(),
        effect,
        updated_at: entity.updated_at,
    }
}

/// The admin entry point.
#[derive(Clone)]
pub struct AdminEngine {
    storage: Arc<dyn Storage>,
    schema: Arc<SchemaRegistry>,
}

impl AdminEngine {
    pub fn new(storage: Arc<dyn Storage>, schema: Arc<SchemaRegistry>) -> Self {
        Self { storage, schema }
    }

    pub fn schema(&self) -> Arc<Schema> {
        self.schema.current()
    }

    // --- reads ---

    pub async fn get_entity(
        &self,
        session: &Session,
        id: EntityId,
        version: Option<Version>,
    ) -> Result<AdminEntity> {
        let schema = self.schema.current();
        let mut tx = self.storage.begin_read().await?;
        self.load_admin_entity(tx.as_mut(), &schema, session, id, version)
            .await
    }

    /// One result per id, in request order.
    pub async fn get_entities(
        &self,
        session: &Session,
        ids: &[EntityId],
    ) -> Result<Vec<Result<AdminEntity>>> {
        let schema = self.schema.current();
        let mut tx = self.storage.begin_read().await?;
        let mut results = Vec::with_capacity(ids.len());
        for id in ids {
            results.push(
                self.load_admin_entity(tx.as_mut(), &schema, session, *id, None)
                    .await,
            );
        }
        Ok(results)
    }

    async fn load_admin_entity(
        &self,
        tx: &mut dyn StorageTx,
        schema: &Schema,
        session: &Session,
        id: EntityId,
        version: Option<Version>,
    ) -> Result<AdminEntity> {
        let entity = load_entity(tx, session, id).await?;
        let version = load_version(tx, id, version.unwrap_or(entity.latest_version)).await?;
        decode_admin_entity(schema, &entity, &version)
    }

    fn filter(&self, session: &Session, query: &EntityQuery) -> Result<QueryFilter> {
        let auth_keys = session.resolve_auth_keys(&query.auth_keys)?;
        Ok(QueryFilter::new(EntityView::Admin, query, auth_keys))
    }

    pub async fn search_entities(
        &self,
        session: &Session,
        query: &EntityQuery,
        paging: &Paging,
    ) -> Result<Option<Connection<AdminEntity>>> {
        let schema = self.schema.current();
        let filter = self.filter(session, query)?;
        search::search(self.storage.as_ref(), filter, query, paging, |row| {
            decode_admin_entity(&schema, &row.entity, &row.version)
        })
        .await
    }

    pub async fn get_total_count(&self, session: &Session, query: &EntityQuery) -> Result<u64> {
        let filter = self.filter(session, query)?;
        search::count(self.storage.as_ref(), &filter).await
    }

    pub async fn sample_entities(
        &self,
        session: &Session,
        query: &EntityQuery,
        options: &SamplingOptions,
    ) -> Result<EntitySamplingPayload<AdminEntity>> {
        let schema = self.schema.current();
        let filter = self.filter(session, query)?;
        search::sample(self.storage.as_ref(), &filter, options, |row| {
            decode_admin_entity(&schema, &row.entity, &row.version)
        })
        .await
    }

    pub async fn get_entity_history(&self, session: &Session, id: EntityId) -> Result<EntityHistory> {
        let mut tx = self.storage.begin_read().await?;
        let entity = load_entity(tx.as_mut(), session, id).await?;
        let versions = tx
            .get_versions(id)
            .await?
            .into_iter()
            .map(|version| EntityVersionInfo {
                version: version.version,
                published: entity.published_version == Some(version.version),
                deleted: version.data.is_none(),
                created_by: version.created_by,
                created_at: version.created_at,
            })
            .collect();
        Ok(EntityHistory {
            id,
            entity_type: entity.entity_type,
            name: entity.name,
            versions,
        })
    }

    pub async fn get_publishing_history(
        &self,
        session: &Session,
        id: EntityId,
    ) -> Result<PublishingHistory> {
        let mut tx = self.storage.begin_read().await?;
        load_entity(tx.as_mut(), session, id).await?;
        let events = tx.publishing_events(id).await?;
        Ok(PublishingHistory { id, events })
    }

    // --- mutations ---

    pub async fn create_entity(
        &self,
        session: &Session,
        create: EntityCreate,
        options: MutationOptions,
    ) -> Result<EntityMutationPayload> {
        let mut tx = self.storage.begin().await?;
        let payload = self.create_in(tx.as_mut(), session, create, options).await?;
        tx.commit().await?;
        Ok(payload)
    }

    pub async fn update_entity(
        &self,
        session: &Session,
        update: EntityUpdate,
        options: MutationOptions,
    ) -> Result<EntityMutationPayload> {
        let mut tx = self.storage.begin().await?;
        let payload = self.update_in(tx.as_mut(), session, update, options).await?;
        tx.commit().await?;
        Ok(payload)
    }

    pub async fn upsert_entity(
        &self,
        session: &Session,
        upsert: EntityUpsert,
        options: MutationOptions,
    ) -> Result<EntityMutationPayload> {
        let mut tx = self.storage.begin().await?;
        let payload = if tx.get_entity(upsert.id).await?.is_some() {
            self.update_in(tx.as_mut(), session, upsert.into_update(), options)
                .await?
        } else {
            self.create_in(tx.as_mut(), session, upsert.into_create(), options)
                .await?
        };
        tx.commit().await?;
        Ok(payload)
    }

    pub async fn publish_entities(
        &self,
        session: &Session,
        references: &[EntityVersionReference],
    ) -> Result<Vec<EntityPublishingPayload>> {
        let mut tx = self.storage.begin().await?;
        let payloads = self.publish_in(tx.as_mut(), session, references).await?;
        tx.commit().await?;
        Ok(payloads)
    }

    pub async fn unpublish_entities(
        &self,
        session: &Session,
        ids: &[EntityId],
    ) -> Result<Vec<EntityPublishingPayload>> {
        let mut tx = self.storage.begin().await?;
        let payloads = self.unpublish_in(tx.as_mut(), session, ids).await?;
        tx.commit().await?;
        Ok(payloads)
    }

    pub async fn archive_entity(
        &self,
        session: &Session,
        id: EntityId,
    ) -> Result<EntityPublishingPayload> {
        let mut tx = self.storage.begin().await?;
        let entity = load_entity(tx.as_mut(), session, id).await?;
        if entity.archived {
            return Ok(publishing_payload(&entity, PublishingEffect::None));
        }
        if entity.published_version.is_some() {
            return Err(Error::bad_request(format!(
                "entity({id}): Can't archive a published entity"
            )));
        }

        let state = PublishState {
            published_version: None,
            archived: true,
            ever_published: entity.ever_published,
        };
        let entity = self
            .change_publish_state(tx.as_mut(), session, id, state, PublishingEventKind::Archive, None)
            .await?;
        tx.commit().await?;
        Ok(publishing_payload(&entity, PublishingEffect::Archived))
    }

    pub async fn unarchive_entity(
        &self,
        session: &Session,
        id: EntityId,
    ) -> Result<EntityPublishingPayload> {
        let mut tx = self.storage.begin().await?;
        let entity = load_entity(tx.as_mut(), session, id).await?;
        if !entity.archived {
            return Ok(publishing_payload(&entity, PublishingEffect::None));
        }

        let state = PublishState {
            published_version: None,
            archived: false,
            ever_published: entity.ever_published,
        };
        let entity = self
            .change_publish_state(
                tx.as_mut(),
                session,
                id,
                state,
                PublishingEventKind::Unarchive,
                None,
            )
            .await?;
        tx.commit().await?;
        Ok(publishing_payload(&entity, PublishingEffect::Unarchived))
    }

    /// Replace the head with a deleted draft. Earlier versions are kept.
    pub async fn delete_entity(
        &self,
        session: &Session,
        id: EntityId,
    ) -> Result<EntityPublishingPayload> {
        let mut tx = self.storage.begin().await?;
        let entity = load_entity(tx.as_mut(), session, id).await?;
        if entity.published_version.is_some() {
            return Err(Error::bad_request(format!(
                "entity({id}): Can't delete a published entity"
            )));
        }
        let head = load_version(tx.as_mut(), id, entity.latest_version).await?;
        if head.data.is_none() {
            return Ok(publishing_payload(&entity, PublishingEffect::None));
        }

        let now = Utc::now();
        let version = EntityVersionRow {
            entity_id: id,
            version: entity.latest_version + 1,
            name: entity.name.clone(),
            data: None,
            references: Vec::new(),
            created_by: session.subject_id,
            created_at: now,
        };
        tx.insert_version(&version, &VersionIndex::default()).await?;
        let entity = tx
            .update_entity_head(id, version.version, &entity.name, now)
            .await?;
        tx.commit().await?;

        tracing::debug!(%id, version = version.version, "entity deleted");
        Ok(publishing_payload(&entity, PublishingEffect::Deleted))
    }

    // --- steps on a caller's transaction ---

    async fn create_in(
        &self,
        tx: &mut dyn StorageTx,
        session: &Session,
        create: EntityCreate,
        options: MutationOptions,
    ) -> Result<EntityMutationPayload> {
        let schema = self.schema.current();
        let encoded = encode_create(&schema, &create)?;
        let auth_key = encoded
            .auth_key
            .clone()
            .unwrap_or_else(|| session.default_auth_key().to_string());
        session.check_auth_key(&auth_key)?;

        let reference_ids = encoded.collector.reference_ids();
        let targets = tx.reference_targets(&reference_ids).await?;
        resolve_references(&encoded.collector.references, &targets)?;

        let id = match create.id {
            Some(id) => {
                if tx.get_entity(id).await?.is_some() {
                    return Err(Error::conflict(format!("Entity with id ({id}) already exist")));
                }
                id
            }
            None => Uuid::new_v4(),
        };
        let name = unique_name(tx, &encoded.name, None).await?;
        let now = Utc::now();

        let mut entity = tx
            .insert_entity(NewEntity {
                id,
                entity_type: encoded.entity_type.clone(),
                name: name.clone(),
                auth_key,
                created_at: now,
            })
            .await?;
        let version = EntityVersionRow {
            entity_id: id,
            version: 0,
            name,
            data: Some(encoded.data),
            references: reference_ids,
            created_by: session.subject_id,
            created_at: now,
        };
        let index = VersionIndex {
            locations: encoded.collector.locations,
            full_text: encoded.collector.full_text,
        };
        tx.insert_version(&version, &index).await?;
        tracing::debug!(%id, entity_type = %entity.entity_type, "entity created");

        let mut effect = MutationEffect::Created;
        if options.publish {
            self.publish_in(tx, session, &[EntityVersionReference { id, version: 0 }])
                .await?;
            entity = tx.get_entity(id).await?.ok_or_else(|| no_such_entity(id))?;
            effect = MutationEffect::CreatedAndPublished;
        }

        Ok(EntityMutationPayload {
            effect,
            entity: decode_admin_entity(&schema, &entity, &version)?,
        })
    }

    async fn update_in(
        &self,
        tx: &mut dyn StorageTx,
        session: &Session,
        update: EntityUpdate,
        options: MutationOptions,
    ) -> Result<EntityMutationPayload> {
        let schema = self.schema.current();
        let id = update.id;
        let entity = load_entity(tx, session, id).await?;
        let previous = load_version(tx, id, entity.latest_version).await?;
        if previous.data.is_none() {
            return Err(no_such_entity(id));
        }

        let resolved = resolve_update(&schema, &entity, &previous, &update)?;
        if !resolved.changed {
            let mut effect = MutationEffect::None;
            let mut entity = entity;
            if options.publish && entity.published_version != Some(entity.latest_version) {
                let reference = EntityVersionReference {
                    id,
                    version: entity.latest_version,
                };
                self.publish_in(tx, session, &[reference]).await?;
                entity = tx.get_entity(id).await?.ok_or_else(|| no_such_entity(id))?;
                effect = MutationEffect::Published;
            }
            return Ok(EntityMutationPayload {
                effect,
                entity: decode_admin_entity(&schema, &entity, &previous)?,
            });
        }

        let reference_ids = resolved.collector.reference_ids();
        let targets = tx.reference_targets(&reference_ids).await?;
        resolve_references(&resolved.collector.references, &targets)?;

        let name = if resolved.name == entity.name {
            resolved.name
        } else {
            unique_name(tx, &resolved.name, Some(id)).await?
        };
        let now = Utc::now();
        let version = EntityVersionRow {
            entity_id: id,
            version: entity.latest_version + 1,
            name: name.clone(),
            data: Some(resolved.data),
            references: reference_ids,
            created_by: session.subject_id,
            created_at: now,
        };
        let index = VersionIndex {
            locations: resolved.collector.locations,
            full_text: resolved.collector.full_text,
        };
        tx.insert_version(&version, &index).await?;
        let mut entity = tx
            .update_entity_head(id, version.version, &name, now)
            .await?;
        tracing::debug!(%id, version = version.version, "entity updated");

        let mut effect = MutationEffect::Updated;
        if options.publish {
            let reference = EntityVersionReference {
                id,
                version: version.version,
            };
            self.publish_in(tx, session, &[reference]).await?;
            entity = tx.get_entity(id).await?.ok_or_else(|| no_such_entity(id))?;
            effect = MutationEffect::UpdatedAndPublished;
        }

        Ok(EntityMutationPayload {
            effect,
            entity: decode_admin_entity(&schema, &entity, &version)?,
        })
    }

    /// Publish a batch. The whole batch is validated before anything changes.
    async fn publish_in(
        &self,
        tx: &mut dyn StorageTx,
        session: &Session,
        references: &[EntityVersionReference],
    ) -> Result<Vec<EntityPublishingPayload>> {
        let duplicates = duplicate_ids(references.iter().map(|r| r.id));
        if !duplicates.is_empty() {
            return Err(Error::bad_request(format!(
                "Duplicate ids: {}",
                join_ids(&duplicates)
            )));
        }

        let schema = self.schema.current();
        let mut batch = Vec::with_capacity(references.len());
        for reference in references {
            let entity = load_entity(tx, session, reference.id).await?;
            let version = load_version(tx, reference.id, reference.version).await?;
            check_publishable(&schema, &entity, &version)?;
            batch.push((entity, version));
        }

        let batch_ids: Vec<EntityId> = references.iter().map(|r| r.id).collect();
        for (entity, version) in &batch {
            let targets = tx.reference_targets(&version.references).await?;
            let unpublished: Vec<EntityId> = version
                .references
                .iter()
                .filter(|id| !batch_ids.contains(id))
                .filter(|id| !targets.iter().any(|t| t.id == **id && t.published))
                .copied()
                .collect();
            if !unpublished.is_empty() {
                return Err(Error::bad_request(format!(
                    "entity({}): References unpublished entities: {}",
                    entity.id,
                    join_ids(&unpublished)
                )));
            }
        }

        let mut payloads = Vec::with_capacity(batch.len());
        for (entity, version) in batch {
            if entity.published_version == Some(version.version) && !entity.archived {
                payloads.push(publishing_payload(&entity, PublishingEffect::None));
                continue;
            }
            let state = PublishState {
                published_version: Some(version.version),
                archived: false,
                ever_published: true,
            };
            let entity = self
                .change_publish_state(
                    tx,
                    session,
                    entity.id,
                    state,
                    PublishingEventKind::Publish,
                    Some(version.version),
                )
                .await?;
            payloads.push(publishing_payload(&entity, PublishingEffect::Published));
        }
        Ok(payloads)
    }

    /// Unpublish a batch. The whole batch is validated before anything changes.
    async fn unpublish_in(
        &self,
        tx: &mut dyn StorageTx,
        session: &Session,
        ids: &[EntityId],
    ) -> Result<Vec<EntityPublishingPayload>> {
        let duplicates = duplicate_ids(ids.iter().copied());
        if !duplicates.is_empty() {
            return Err(Error::bad_request(format!(
                "Duplicate ids: {}",
                join_ids(&duplicates)
            )));
        }

        let mut batch = Vec::with_capacity(ids.len());
        for id in ids {
            let entity = load_entity(tx, session, *id).await?;
            if entity.published_version.is_none() {
                return Err(Error::bad_request(format!(
                    "entity({id}): Entity is not published"
                )));
            }
            batch.push(entity);
        }

        let referrers = tx.published_referrers(ids).await?;
        for id in ids {
            let mut sources: Vec<EntityId> = Vec::new();
            for (source, target) in &referrers {
                if target == id && !ids.contains(source) && !sources.contains(source) {
                    sources.push(*source);
                }
            }
            if !sources.is_empty() {
                return Err(Error::bad_request(format!(
                    "entity({id}): Published entities referencing entity: {}",
                    join_ids(&sources)
                )));
            }
        }

        let mut payloads = Vec::with_capacity(batch.len());
        for entity in batch {
            let state = PublishState {
                published_version: None,
                archived: false,
                ever_published: true,
            };
            let entity = self
                .change_publish_state(
                    tx,
                    session,
                    entity.id,
                    state,
                    PublishingEventKind::Unpublish,
                    None,
                )
                .await?;
            payloads.push(publishing_payload(&entity, PublishingEffect::Unpublished));
        }
        Ok(payloads)
    }

    /// Apply a publish state and record the event for it.
    async fn change_publish_state(
        &self,
        tx: &mut dyn StorageTx,
        session: &Session,
        id: EntityId,
        state: PublishState,
        kind: PublishingEventKind,
        version: Option<Version>,
    ) -> Result<EntityRow> {
        let now = Utc::now();
        let entity = tx.update_publish_state(id, state, now).await?;
        let event = PublishingEvent {
            kind,
            version,
            published_at: now,
            published_by: session.subject_id,
        };
        tx.insert_publishing_event(id, &event).await?;
        tracing::debug!(%id, kind = kind.as_str(), status = ?entity.status(), "publishing state changed");
        Ok(entity)
    }
}

/// A version can be published when it has content and no required field is empty.
fn check_publishable(schema: &Schema, entity: &EntityRow, version: &EntityVersionRow) -> Result<()> {
    let prefix = format!("entity({})", entity.id);
    let data = version
        .data
        .as_ref()
        .ok_or_else(|| Error::bad_request(format!("{prefix}: Can't publish a deleted version")))?;
    let spec = schema.get_entity_type_spec(&entity.entity_type).ok_or_else(|| {
        Error::generic(format!(
            "{prefix}: stored entity type {} is not in the schema",
            entity.entity_type
        ))
    })?;
    let decoded = decode_fields(schema, &spec.fields, data)?;
    let missing = collect_missing_required(schema, &spec.fields, "entity.fields", &decoded);
    if !missing.is_empty() {
        return Err(Error::bad_request(format!(
            "{prefix}: Required fields are empty: {}",
            missing.join(", ")
        )));
    }
    Ok(())
}
