//! Published view: read-only access to the published version of entities.

use crate::entity::{EntitySamplingPayload, PublishedEntity, SamplingOptions};
use crate::paging::{Connection, Paging};
use crate::query::{EntityQuery, EntityView, QueryFilter};
use crate::resolve::decode_published_entity;
use crate::schema::{Schema, SchemaRegistry};
use crate::session::Session;
use crate::storage::{Storage, StorageTx};
use crate::{search, EntityId, Error, Result};
use std::sync::Arc;

#[derive(Clone)]
pub struct PublishedEngine {
    storage: Arc<dyn Storage>,
    schema: Arc<SchemaRegistry>,
}

impl PublishedEngine {
    pub fn new(storage: Arc<dyn Storage>, schema: Arc<SchemaRegistry>) -> Self {
        Self { storage, schema }
    }

    /// The published version; `NotFound` when the entity isn't published.
    pub async fn get_entity(&self, session: &Session, id: EntityId) -> Result<PublishedEntity> {
        let schema = self.schema.current();
        let mut tx = self.storage.begin_read().await?;
        load_published(tx.as_mut(), &schema, session, id).await
    }

    pub async fn get_entities(
        &self,
        session: &Session,
        ids: &[EntityId],
    ) -> Result<Vec<Result<PublishedEntity>>> {
        let schema = self.schema.current();
        let mut tx = self.storage.begin_read().await?;
        let mut results = Vec::with_capacity(ids.len());
        for id in ids {
            results.push(load_published(tx.as_mut(), &schema, session, *id).await);
        }
        Ok(results)
    }

    fn filter(&self, session: &Session, query: &EntityQuery) -> Result<QueryFilter> {
        let auth_keys = session.resolve_auth_keys(&query.auth_keys)?;
        Ok(QueryFilter::new(EntityView::Published, query, auth_keys))
    }

    pub async fn search_entities(
        &self,
        session: &Session,
        query: &EntityQuery,
        paging: &Paging,
    ) -> Result<Option<Connection<PublishedEntity>>> {
        let schema = self.schema.current();
        let filter = self.filter(session, query)?;
        search::search(self.storage.as_ref(), filter, query, paging, |row| {
            decode_published_entity(&schema, &row.entity, &row.version)
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
    ) -> Result<EntitySamplingPayload<PublishedEntity>> {
        let schema = self.schema.current();
        let filter = self.filter(session, query)?;
        search::sample(self.storage.as_ref(), &filter, options, |row| {
            decode_published_entity(&schema, &row.entity, &row.version)
        })
        .await
    }
}

async fn load_published(
    tx: &mut dyn StorageTx,
    schema: &Schema,
    session: &Session,
    id: EntityId,
) -> Result<PublishedEntity> {
    let not_found = || Error::not_found(format!("No such entity ({id})"));
    let entity = tx.get_entity(id).await?.ok_or_else(not_found)?;
    let published = entity.published_version.ok_or_else(not_found)?;
    session.check_auth_key(&entity.auth_key)?;
    let version = tx
        .get_version(id, published)
        .await?
        .ok_or_else(|| Error::generic(format!("published version of entity ({id}) is missing")))?;
    decode_published_entity(schema, &entity, &version)
}
