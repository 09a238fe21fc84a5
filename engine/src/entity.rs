//! Entity types: what callers send, what they get back.

use crate::codec::FieldValues;
use crate::{EntityId, Timestamp, Version};
use serde::{Deserialize, Serialize};

/// Auth key assigned to entities when the caller doesn't pick one.
pub const DEFAULT_AUTH_KEY: &str = "none";

/// Publishing status of an entity.
///
/// Never stored; always derived from the version pointers with
/// [`EntityStatus::derive`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityStatus {
    /// Never published
    Draft,
    /// The latest version is published
    Published,
    /// Published, but there are newer versions
    Modified,
    /// Was published, then unpublished
    Withdrawn,
    /// Archived, regardless of publish history
    Archived,
}

impl EntityStatus {
    pub fn derive(
        published_version: Option<Version>,
        latest_version: Version,
        archived: bool,
        ever_published: bool,
    ) -> Self {
        if archived {
            return EntityStatus::Archived;
        }
        match published_version {
            Some(published) if published == latest_version => EntityStatus::Published,
            Some(_) => EntityStatus::Modified,
            None if ever_published => EntityStatus::Withdrawn,
            None => EntityStatus::Draft,
        }
    }
}

/// Info section of an admin entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminEntityInfo {
    #[serde(rename = "type")]
    pub entity_type: String,
    pub name: String,
    pub version: Version,
    pub status: EntityStatus,
    pub auth_key: String,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// An entity as seen through the admin API: any version, with status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdminEntity {
    pub id: EntityId,
    pub info: AdminEntityInfo,
    /// Set when the version is a deleted draft; `fields` is then empty
    #[serde(rename = "_deleted", default, skip_serializing_if = "is_false")]
    pub deleted: bool,
    pub fields: FieldValues,
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Info section of a published entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishedEntityInfo {
    #[serde(rename = "type")]
    pub entity_type: String,
    pub name: String,
    pub auth_key: String,
    pub created_at: Timestamp,
}

/// The currently published version of an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishedEntity {
    pub id: EntityId,
    pub info: PublishedEntityInfo,
    pub fields: FieldValues,
}

/// Info of a create request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityCreateInfo {
    #[serde(rename = "type")]
    pub entity_type: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_key: Option<String>,
}

/// Request to create an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityCreate {
    /// Caller-supplied id; generated when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<EntityId>,
    pub info: EntityCreateInfo,
    #[serde(default)]
    pub fields: FieldValues,
}

impl EntityCreate {
    pub fn new(entity_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: None,
            info: EntityCreateInfo {
                entity_type: entity_type.into(),
                name: name.into(),
                auth_key: None,
            },
            fields: FieldValues::new(),
        }
    }

    pub fn with_id(mut self, id: EntityId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_auth_key(mut self, auth_key: impl Into<String>) -> Self {
        self.info.auth_key = Some(auth_key.into());
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.fields.insert(name.into(), value);
        self
    }
}

/// Info of an update request; every part is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityUpdateInfo {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_key: Option<String>,
    /// Expected new version, for optimistic concurrency
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<Version>,
}

/// Request to update an entity. Fields not mentioned keep their value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityUpdate {
    pub id: EntityId,
    #[serde(default)]
    pub info: EntityUpdateInfo,
    #[serde(default)]
    pub fields: FieldValues,
}

impl EntityUpdate {
    pub fn new(id: EntityId) -> Self {
        Self {
            id,
            info: EntityUpdateInfo::default(),
            fields: FieldValues::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.info.name = Some(name.into());
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.fields.insert(name.into(), value);
        self
    }
}

/// Request to create or update an entity by id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityUpsert {
    pub id: EntityId,
    pub info: EntityCreateInfo,
    #[serde(default)]
    pub fields: FieldValues,
}

impl EntityUpsert {
    pub fn into_create(self) -> EntityCreate {
        EntityCreate {
            id: Some(self.id),
            info: self.info,
            fields: self.fields,
        }
    }

    pub fn into_update(self) -> EntityUpdate {
        EntityUpdate {
            id: self.id,
            info: EntityUpdateInfo {
                entity_type: Some(self.info.entity_type),
                name: Some(self.info.name),
                auth_key: self.info.auth_key,
                version: None,
            },
            fields: self.fields,
        }
    }
}

/// Options for create, update and upsert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationOptions {
    /// Publish the resulting version in the same transaction
    #[serde(default)]
    pub publish: bool,
}

impl MutationOptions {
    pub fn publish() -> Self {
        Self { publish: true }
    }
}

/// A specific version of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityVersionReference {
    pub id: EntityId,
    pub version: Version,
}

/// What a create, update or upsert did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MutationEffect {
    Created,
    CreatedAndPublished,
    Updated,
    UpdatedAndPublished,
    /// Content was unchanged but the latest version got published
    Published,
    None,
}

/// Result of a create, update or upsert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityMutationPayload {
    pub effect: MutationEffect,
    pub entity: AdminEntity,
}

/// What a publishing operation did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PublishingEffect {
    Published,
    Unpublished,
    Archived,
    Unarchived,
    Deleted,
    None,
}

/// Result of a publishing operation, one per entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityPublishingPayload {
    pub id: EntityId,
    pub status: EntityStatus,
    pub effect: PublishingEffect,
    pub updated_at: Timestamp,
}

/// Kind of a publishing history event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PublishingEventKind {
    Publish,
    Unpublish,
    Archive,
    Unarchive,
}

impl PublishingEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PublishingEventKind::Publish => "publish",
            PublishingEventKind::Unpublish => "unpublish",
            PublishingEventKind::Archive => "archive",
            PublishingEventKind::Unarchive => "unarchive",
        }
    }

    pub fn parse(kind: &str) -> Option<Self> {
        match kind {
            "publish" => Some(PublishingEventKind::Publish),
            "unpublish" => Some(PublishingEventKind::Unpublish),
            "archive" => Some(PublishingEventKind::Archive),
            "unarchive" => Some(PublishingEventKind::Unarchive),
            _ => None,
        }
    }
}

/// One row of the append-only publishing history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishingEvent {
    pub kind: PublishingEventKind,
    /// Published version, only set for `publish`
    pub version: Option<Version>,
    pub published_at: Timestamp,
    pub published_by: EntityId,
}

/// Publishing history of an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishingHistory {
    pub id: EntityId,
    pub events: Vec<PublishingEvent>,
}

/// One version in the version history of an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityVersionInfo {
    pub version: Version,
    /// Whether this is the currently published version
    pub published: bool,
    pub deleted: bool,
    pub created_by: EntityId,
    pub created_at: Timestamp,
}

/// Version history of an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityHistory {
    pub id: EntityId,
    #[serde(rename = "type")]
    pub entity_type: String,
    pub name: String,
    pub versions: Vec<EntityVersionInfo>,
}

/// Options for sampling entities.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SamplingOptions {
    /// Seed for reproducible samples; random when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    /// How many entities to pick, defaults to the page size
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
}

/// A random sample of entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitySamplingPayload<T> {
    pub seed: u64,
    pub total_count: u64,
    pub items: Vec<T>,
}
