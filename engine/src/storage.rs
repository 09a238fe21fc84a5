//! Storage contract.
//!
//! The engine never talks to a database directly. Every operation opens one
//! [`StorageTx`] through [`Storage::begin`], does all its reads and writes on
//! it and commits; dropping a transaction without committing rolls it back.
//! Nested steps take `&mut dyn StorageTx` and so share the caller's
//! transaction instead of opening another one.

use crate::codec::{FieldValues, Location};
use crate::entity::{EntityStatus, PublishingEvent};
use crate::query::{EntityOrder, QueryFilter, SearchPlan};
use crate::{error::Result, EntityId, Timestamp, Version};
use async_trait::async_trait;
use uuid::Uuid;

/// Entity head: identity and version pointers.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityRow {
    pub id: EntityId,
    /// Creation order, assigned by storage
    pub sequence: i64,
    /// Bumped on every mutation and publishing change, assigned by storage
    pub updated_seq: i64,
    pub entity_type: String,
    /// Unique among all entities
    pub name: String,
    pub auth_key: String,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub latest_version: Version,
    pub published_version: Option<Version>,
    pub archived: bool,
    pub ever_published: bool,
}

impl EntityRow {
    pub fn status(&self) -> EntityStatus {
        EntityStatus::derive(
            self.published_version,
            self.latest_version,
            self.archived,
            self.ever_published,
        )
    }
}

/// Values for a new entity head. Storage assigns the sequence numbers.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEntity {
    pub id: EntityId,
    pub entity_type: String,
    pub name: String,
    pub auth_key: String,
    pub created_at: Timestamp,
}

/// One stored version of an entity.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityVersionRow {
    pub entity_id: EntityId,
    pub version: Version,
    pub name: String,
    /// Encoded fields; `None` for a deleted draft
    pub data: Option<FieldValues>,
    /// Outgoing references, unique
    pub references: Vec<EntityId>,
    pub created_by: EntityId,
    pub created_at: Timestamp,
}

/// Search index content of a version; written once, never read back.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VersionIndex {
    pub locations: Vec<Location>,
    pub full_text: Vec<String>,
}

/// What a reference points at, for reference resolution and publish checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceTarget {
    pub id: EntityId,
    pub entity_type: String,
    pub published: bool,
}

/// A search hit: the entity head and the version the view selects.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRow {
    pub entity: EntityRow,
    pub version: EntityVersionRow,
}

/// Change of the version pointers after a publishing operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishState {
    pub published_version: Option<Version>,
    pub archived: bool,
    pub ever_published: bool,
}

/// Opens transactions.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn StorageTx>>;

    /// A transaction for reads only. Entity heads read through it are not
    /// locked, and it must not be used for writes.
    async fn begin_read(&self) -> Result<Box<dyn StorageTx>> {
        self.begin().await
    }
}

/// A storage transaction.
///
/// In a transaction from [`Storage::begin`], reads of entity heads lock the
/// row until the transaction ends, so checks made inside a transaction still
/// hold when it commits.
#[async_trait]
pub trait StorageTx: Send {
    async fn get_entity(&mut self, id: EntityId) -> Result<Option<EntityRow>>;

    async fn get_version(
        &mut self,
        id: EntityId,
        version: Version,
    ) -> Result<Option<EntityVersionRow>>;

    /// All versions of an entity, oldest first.
    async fn get_versions(&mut self, id: EntityId) -> Result<Vec<EntityVersionRow>>;

    /// Existing entities among `ids`; unknown ids are left out.
    async fn reference_targets(&mut self, ids: &[EntityId]) -> Result<Vec<ReferenceTarget>>;

    /// Whether another entity than `exclude` already has this name.
    async fn name_exists(&mut self, name: &str, exclude: Option<EntityId>) -> Result<bool>;

    /// Insert a new entity head with `latest_version` 0.
    ///
    /// Fails with `Conflict` when the id is taken.
    async fn insert_entity(&mut self, entity: NewEntity) -> Result<EntityRow>;

    async fn insert_version(&mut self, version: &EntityVersionRow, index: &VersionIndex)
        -> Result<()>;

    /// Point the head at a new latest version.
    async fn update_entity_head(
        &mut self,
        id: EntityId,
        latest_version: Version,
        name: &str,
        updated_at: Timestamp,
    ) -> Result<EntityRow>;

    async fn update_publish_state(
        &mut self,
        id: EntityId,
        state: PublishState,
        updated_at: Timestamp,
    ) -> Result<EntityRow>;

    async fn insert_publishing_event(&mut self, id: EntityId, event: &PublishingEvent)
        -> Result<()>;

    /// Publishing events of an entity, oldest first.
    async fn publishing_events(&mut self, id: EntityId) -> Result<Vec<PublishingEvent>>;

    /// `(source, target)` pairs where a published version of `source`
    /// references one of `targets`.
    async fn published_referrers(
        &mut self,
        targets: &[EntityId],
    ) -> Result<Vec<(EntityId, EntityId)>>;

    /// Rows of a plan, in fetch order, at most `plan.limit`.
    async fn search(&mut self, plan: &SearchPlan) -> Result<Vec<SearchRow>>;

    async fn count(&mut self, filter: &QueryFilter) -> Result<u64>;

    /// The row at `offset` in creation order.
    async fn search_at_offset(
        &mut self,
        filter: &QueryFilter,
        offset: u64,
    ) -> Result<Option<SearchRow>>;

    async fn commit(self: Box<Self>) -> Result<()>;
}

/// Key of a row under an ordering, used for cursors.
pub fn order_key(order: EntityOrder, entity: &EntityRow) -> crate::paging::CursorKey {
    use crate::paging::CursorKey;
    match order {
        EntityOrder::CreatedAt => CursorKey::Int(entity.sequence),
        EntityOrder::UpdatedAt => CursorKey::Int(entity.updated_seq),
        EntityOrder::Name => CursorKey::String(entity.name.clone()),
    }
}

/// Ids that appear more than once, in first-seen order.
pub fn duplicate_ids(ids: impl IntoIterator<Item = Uuid>) -> Vec<Uuid> {
    let mut seen = Vec::new();
    let mut duplicates = Vec::new();
    for id in ids {
        if seen.contains(&id) {
            if !duplicates.contains(&id) {
                duplicates.push(id);
            }
        } else {
            seen.push(id);
        }
    }
    duplicates
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicates_are_reported_once() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert_eq!(duplicate_ids([a, b, a, a]), vec![a]);
        assert!(duplicate_ids([a, b]).is_empty());
    }

    #[test]
    fn order_keys() {
        let row = EntityRow {
            id: Uuid::nil(),
            sequence: 3,
            updated_seq: 9,
            entity_type: "Foo".into(),
            name: "Foo".into(),
            auth_key: "none".into(),
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
            latest_version: 0,
            published_version: None,
            archived: false,
            ever_published: false,
        };
        use crate::paging::CursorKey;
        assert_eq!(order_key(EntityOrder::CreatedAt, &row), CursorKey::Int(3));
        assert_eq!(order_key(EntityOrder::UpdatedAt, &row), CursorKey::Int(9));
        assert_eq!(
            order_key(EntityOrder::Name, &row),
            CursorKey::String("Foo".into())
        );
        assert_eq!(row.status(), EntityStatus::Draft);
    }
}
