//! In-memory storage.
//!
//! Holds entity heads, versions and publishing events behind one async mutex.
//! A transaction owns the lock for its whole lifetime and works on a copy of
//! the state; `commit` swaps the copy in, dropping the transaction discards
//! it. Transactions are therefore fully serialized.

use crate::entity::PublishingEvent;
use crate::paging::CursorKey;
use crate::query::{EntityView, FilterSubject, QueryFilter, SearchPlan};
use crate::storage::{
    order_key, EntityRow, EntityVersionRow, NewEntity, PublishState, ReferenceTarget, SearchRow,
    Storage, StorageTx, VersionIndex,
};
use crate::{error::Result, EntityId, Error, Timestamp, Version};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Debug, Clone)]
struct StoredVersion {
    row: EntityVersionRow,
    index: VersionIndex,
}

#[derive(Debug, Clone, Default)]
struct MemoryState {
    entities: HashMap<EntityId, EntityRow>,
    versions: BTreeMap<(EntityId, Version), StoredVersion>,
    events: HashMap<EntityId, Vec<PublishingEvent>>,
    /// Last assigned value of the shared sequence
    sequence: i64,
}

impl MemoryState {
    fn next_sequence(&mut self) -> i64 {
        self.sequence += 1;
        self.sequence
    }

    fn entity_mut(&mut self, id: EntityId) -> Result<&mut EntityRow> {
        self.entities
            .get_mut(&id)
            .ok_or_else(|| Error::not_found(format!("No such entity ({id})")))
    }

    /// The version a view shows of an entity, if any.
    fn view_version(&self, view: EntityView, entity: &EntityRow) -> Option<&StoredVersion> {
        let version = match view {
            EntityView::Admin => entity.latest_version,
            EntityView::Published => entity.published_version?,
        };
        self.versions.get(&(entity.id, version))
    }

    /// All rows matching a filter, unordered.
    fn matching(&self, filter: &QueryFilter) -> Vec<SearchRow> {
        self.entities
            .values()
            .filter_map(|entity| {
                let stored = self.view_version(filter.view, entity)?;
                let subject = FilterSubject {
                    entity_type: &entity.entity_type,
                    auth_key: &entity.auth_key,
                    references: &stored.row.references,
                    locations: &stored.index.locations,
                    full_text: &stored.index.full_text,
                };
                filter.matches(&subject).then(|| SearchRow {
                    entity: entity.clone(),
                    version: stored.row.clone(),
                })
            })
            .collect()
    }
}

/// Storage kept in process memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn begin(&self) -> Result<Box<dyn StorageTx>> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryTx { guard, working }))
    }
}

/// A transaction on [`MemoryStorage`].
pub struct MemoryTx {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
}

#[async_trait]
impl StorageTx for MemoryTx {
    async fn get_entity(&mut self, id: EntityId) -> Result<Option<EntityRow>> {
        Ok(self.working.entities.get(&id).cloned())
    }

    async fn get_version(
        &mut self,
        id: EntityId,
        version: Version,
    ) -> Result<Option<EntityVersionRow>> {
        Ok(self
            .working
            .versions
            .get(&(id, version))
            .map(|stored| stored.row.clone()))
    }

    async fn get_versions(&mut self, id: EntityId) -> Result<Vec<EntityVersionRow>> {
        Ok(self
            .working
            .versions
            .range((id, Version::MIN)..=(id, Version::MAX))
            .map(|(_, stored)| stored.row.clone())
            .collect())
    }

    async fn reference_targets(&mut self, ids: &[EntityId]) -> Result<Vec<ReferenceTarget>> {
        Ok(ids
            .iter()
            .filter_map(|id| self.working.entities.get(id))
            .map(|entity| ReferenceTarget {
                id: entity.id,
                entity_type: entity.entity_type.clone(),
                published: entity.published_version.is_some(),
            })
            .collect())
    }

    async fn name_exists(&mut self, name: &str, exclude: Option<EntityId>) -> Result<bool> {
        Ok(self
            .working
            .entities
            .values()
            .any(|entity| entity.name == name && Some(entity.id) != exclude))
    }

    async fn insert_entity(&mut self, entity: NewEntity) -> Result<EntityRow> {
        if self.working.entities.contains_key(&entity.id) {
            return Err(Error::conflict(format!(
                "Entity with id ({}) already exist",
                entity.id
            )));
        }
        let sequence = self.working.next_sequence();
        let row = EntityRow {
            id: entity.id,
            sequence,
            updated_seq: sequence,
            entity_type: entity.entity_type,
            name: entity.name,
            auth_key: entity.auth_key,
            created_at: entity.created_at,
            updated_at: entity.created_at,
            latest_version: 0,
            published_version: None,
            archived: false,
            ever_published: false,
        };
        self.working.entities.insert(row.id, row.clone());
        Ok(row)
    }

    async fn insert_version(
        &mut self,
        version: &EntityVersionRow,
        index: &VersionIndex,
    ) -> Result<()> {
        let key = (version.entity_id, version.version);
        if self.working.versions.contains_key(&key) {
            return Err(Error::conflict(format!(
                "Version {} of entity ({}) already exist",
                version.version, version.entity_id
            )));
        }
        self.working.versions.insert(
            key,
            StoredVersion {
                row: version.clone(),
                index: index.clone(),
            },
        );
        Ok(())
    }

    async fn update_entity_head(
        &mut self,
        id: EntityId,
        latest_version: Version,
        name: &str,
        updated_at: Timestamp,
    ) -> Result<EntityRow> {
        let sequence = self.working.next_sequence();
        let entity = self.working.entity_mut(id)?;
        entity.latest_version = latest_version;
        entity.name = name.to_string();
        entity.updated_at = updated_at;
        entity.updated_seq = sequence;
        Ok(entity.clone())
    }

    async fn update_publish_state(
        &mut self,
        id: EntityId,
        state: PublishState,
        updated_at: Timestamp,
    ) -> Result<EntityRow> {
        if state.archived && state.published_version.is_some() {
            return Err(Error::generic(format!(
                "entity ({id}) can't be archived and published"
            )));
        }
        let sequence = self.working.next_sequence();
        let entity = self.working.entity_mut(id)?;
        entity.published_version = state.published_version;
        entity.archived = state.archived;
        entity.ever_published = state.ever_published;
        entity.updated_at = updated_at;
        entity.updated_seq = sequence;
        Ok(entity.clone())
    }

    async fn insert_publishing_event(
        &mut self,
        id: EntityId,
        event: &PublishingEvent,
    ) -> Result<()> {
        self.working
            .events
            .entry(id)
            .or_default()
            .push(event.clone());
        Ok(())
    }

    async fn publishing_events(&mut self, id: EntityId) -> Result<Vec<PublishingEvent>> {
        Ok(self.working.events.get(&id).cloned().unwrap_or_default())
    }

    async fn published_referrers(
        &mut self,
        targets: &[EntityId],
    ) -> Result<Vec<(EntityId, EntityId)>> {
        let mut pairs = Vec::new();
        let mut sources: Vec<&EntityRow> = self.working.entities.values().collect();
        sources.sort_by_key(|entity| entity.sequence);
        for source in sources {
            let Some(stored) = self.working.view_version(EntityView::Published, source) else {
                continue;
            };
            for target in &stored.row.references {
                if targets.contains(target) {
                    pairs.push((source.id, *target));
                }
            }
        }
        Ok(pairs)
    }

    async fn search(&mut self, plan: &SearchPlan) -> Result<Vec<SearchRow>> {
        let mut rows: Vec<(CursorKey, SearchRow)> = self
            .working
            .matching(&plan.filter)
            .into_iter()
            .map(|row| (order_key(plan.order, &row.entity), row))
            .filter(|(key, _)| plan.after_cursor(key))
            .collect();

        rows.sort_by(|(a, _), (b, _)| if plan.ascending { a.cmp(b) } else { b.cmp(a) });
        rows.truncate(plan.limit);
        Ok(rows.into_iter().map(|(_, row)| row).collect())
    }

    async fn count(&mut self, filter: &QueryFilter) -> Result<u64> {
        Ok(self.working.matching(filter).len() as u64)
    }

    async fn search_at_offset(
        &mut self,
        filter: &QueryFilter,
        offset: u64,
    ) -> Result<Option<SearchRow>> {
        let mut rows = self.working.matching(filter);
        rows.sort_by_key(|row| row.entity.sequence);
        Ok(usize::try_from(offset)
            .ok()
            .and_then(|offset| rows.into_iter().nth(offset)))
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let MemoryTx { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }
}
