//! Operations of the admin and published APIs.
//!
//! Each API call is an operation value: a name and its arguments. On the wire
//! an operation is `{"name": "...", "args": {...}}` and its outcome is either
//! `{"value": ...}` or `{"error": "...", "message": "..."}`.

use crate::entity::{
    AdminEntity, EntityCreate, EntityHistory, EntityMutationPayload, EntityPublishingPayload,
    EntitySamplingPayload, EntityUpdate, EntityUpsert, EntityVersionReference, MutationOptions,
    PublishedEntity, PublishingHistory, SamplingOptions,
};
use crate::paging::{Connection, Paging};
use crate::pipeline::OperationArgs;
use crate::query::EntityQuery;
use crate::{EntityId, Error, Result, Version};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An operation that can travel as JSON.
pub trait JsonOperation: OperationArgs + Serialize + DeserializeOwned {
    fn encode_value(value: &Self::Value) -> Result<Value>;

    /// Decode a result value; the operation decides its shape.
    fn decode_value(&self, value: Value) -> Result<Self::Value>;
}

/// Outcome of an operation on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireResult {
    Value { value: Value },
    Error(Error),
}

impl WireResult {
    pub fn encode<O: JsonOperation>(result: &Result<O::Value>) -> Self {
        match result {
            Ok(value) => match O::encode_value(value) {
                Ok(value) => WireResult::Value { value },
                Err(err) => WireResult::Error(err),
            },
            Err(err) => WireResult::Error(err.clone()),
        }
    }

    pub fn decode<O: JsonOperation>(self, operation: &O) -> Result<O::Value> {
        match self {
            WireResult::Value { value } => operation.decode_value(value),
            WireResult::Error(err) => Err(err),
        }
    }
}

fn from_value<T: DeserializeOwned>(name: &str, value: Value) -> Result<T> {
    serde_json::from_value(value)
        .map_err(|err| Error::generic(format!("{name}: invalid result value: {err}")))
}

fn to_value<T: Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value).map_err(|err| Error::generic(format!("invalid result value: {err}")))
}

/// Operations of the admin API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", content = "args", rename_all = "camelCase")]
pub enum AdminOperation {
    GetEntity {
        id: EntityId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        version: Option<Version>,
    },
    GetEntities {
        ids: Vec<EntityId>,
    },
    SearchEntities {
        #[serde(default)]
        query: EntityQuery,
        #[serde(default)]
        paging: Paging,
    },
    GetTotalCount {
        #[serde(default)]
        query: EntityQuery,
    },
    SampleEntities {
        #[serde(default)]
        query: EntityQuery,
        #[serde(default)]
        options: SamplingOptions,
    },
    CreateEntity {
        entity: EntityCreate,
        #[serde(default)]
        options: MutationOptions,
    },
    UpdateEntity {
        entity: EntityUpdate,
        #[serde(default)]
        options: MutationOptions,
    },
    UpsertEntity {
        entity: EntityUpsert,
        #[serde(default)]
        options: MutationOptions,
    },
    PublishEntities {
        references: Vec<EntityVersionReference>,
    },
    UnpublishEntities {
        ids: Vec<EntityId>,
    },
    ArchiveEntity {
        id: EntityId,
    },
    UnarchiveEntity {
        id: EntityId,
    },
    DeleteEntity {
        id: EntityId,
    },
    GetEntityHistory {
        id: EntityId,
    },
    GetPublishingHistory {
        id: EntityId,
    },
}

/// Result of an admin operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AdminOperationValue {
    Entity(AdminEntity),
    Entities(Vec<Result<AdminEntity>>),
    Connection(Option<Connection<AdminEntity>>),
    TotalCount(u64),
    Sample(EntitySamplingPayload<AdminEntity>),
    Mutation(EntityMutationPayload),
    PublishingBatch(Vec<EntityPublishingPayload>),
    Publishing(EntityPublishingPayload),
    EntityHistory(EntityHistory),
    PublishingHistory(PublishingHistory),
}

impl OperationArgs for AdminOperation {
    type Value = AdminOperationValue;

    fn name(&self) -> &'static str {
        match self {
            AdminOperation::GetEntity { .. } => "getEntity",
            AdminOperation::GetEntities { .. } => "getEntities",
            AdminOperation::SearchEntities { .. } => "searchEntities",
            AdminOperation::GetTotalCount { .. } => "getTotalCount",
            AdminOperation::SampleEntities { .. } => "sampleEntities",
            AdminOperation::CreateEntity { .. } => "createEntity",
            AdminOperation::UpdateEntity { .. } => "updateEntity",
            AdminOperation::UpsertEntity { .. } => "upsertEntity",
            AdminOperation::PublishEntities { .. } => "publishEntities",
            AdminOperation::UnpublishEntities { .. } => "unpublishEntities",
            AdminOperation::ArchiveEntity { .. } => "archiveEntity",
            AdminOperation::UnarchiveEntity { .. } => "unarchiveEntity",
            AdminOperation::DeleteEntity { .. } => "deleteEntity",
            AdminOperation::GetEntityHistory { .. } => "getEntityHistory",
            AdminOperation::GetPublishingHistory { .. } => "getPublishingHistory",
        }
    }
}

impl JsonOperation for AdminOperation {
    fn encode_value(value: &AdminOperationValue) -> Result<Value> {
        to_value(value)
    }

    fn decode_value(&self, value: Value) -> Result<AdminOperationValue> {
        let name = self.name();
        Ok(match self {
            AdminOperation::GetEntity { .. } => AdminOperationValue::Entity(from_value(name, value)?),
            AdminOperation::GetEntities { .. } => {
                AdminOperationValue::Entities(from_value(name, value)?)
            }
            AdminOperation::SearchEntities { .. } => {
                AdminOperationValue::Connection(from_value(name, value)?)
            }
            AdminOperation::GetTotalCount { .. } => {
                AdminOperationValue::TotalCount(from_value(name, value)?)
            }
            AdminOperation::SampleEntities { .. } => {
                AdminOperationValue::Sample(from_value(name, value)?)
            }
            AdminOperation::CreateEntity { .. }
            | AdminOperation::UpdateEntity { .. }
            | AdminOperation::UpsertEntity { .. } => {
                AdminOperationValue::Mutation(from_value(name, value)?)
            }
            AdminOperation::PublishEntities { .. } | AdminOperation::UnpublishEntities { .. } => {
                AdminOperationValue::PublishingBatch(from_value(name, value)?)
            }
            AdminOperation::ArchiveEntity { .. }
            | AdminOperation::UnarchiveEntity { .. }
            | AdminOperation::DeleteEntity { .. } => {
                AdminOperationValue::Publishing(from_value(name, value)?)
            }
            AdminOperation::GetEntityHistory { .. } => {
                AdminOperationValue::EntityHistory(from_value(name, value)?)
            }
            AdminOperation::GetPublishingHistory { .. } => {
                AdminOperationValue::PublishingHistory(from_value(name, value)?)
            }
        })
    }
}

/// Operations of the published API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", content = "args", rename_all = "camelCase")]
pub enum PublishedOperation {
    GetEntity {
        id: EntityId,
    },
    GetEntities {
        ids: Vec<EntityId>,
    },
    SearchEntities {
        #[serde(default)]
        query: EntityQuery,
        #[serde(default)]
        paging: Paging,
    },
    GetTotalCount {
        #[serde(default)]
        query: EntityQuery,
    },
    SampleEntities {
        #[serde(default)]
        query: EntityQuery,
        #[serde(default)]
        options: SamplingOptions,
    },
}

/// Result of a published operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PublishedOperationValue {
    Entity(PublishedEntity),
    Entities(Vec<Result<PublishedEntity>>),
    Connection(Option<Connection<PublishedEntity>>),
    TotalCount(u64),
    Sample(EntitySamplingPayload<PublishedEntity>),
}

impl OperationArgs for PublishedOperation {
    type Value = PublishedOperationValue;

    fn name(&self) -> &'static str {
        match self {
            PublishedOperation::GetEntity { .. } => "getEntity",
            PublishedOperation::GetEntities { .. } => "getEntities",
            PublishedOperation::SearchEntities { .. } => "searchEntities",
            PublishedOperation::GetTotalCount { .. } => "getTotalCount",
            PublishedOperation::SampleEntities { .. } => "sampleEntities",
        }
    }
}

impl JsonOperation for PublishedOperation {
    fn encode_value(value: &PublishedOperationValue) -> Result<Value> {
        to_value(value)
    }

    fn decode_value(&self, value: Value) -> Result<PublishedOperationValue> {
        let name = self.name();
        Ok(match self {
            PublishedOperation::GetEntity { .. } => {
                PublishedOperationValue::Entity(from_value(name, value)?)
            }
            PublishedOperation::GetEntities { .. } => {
                PublishedOperationValue::Entities(from_value(name, value)?)
            }
            PublishedOperation::SearchEntities { .. } => {
                PublishedOperationValue::Connection(from_value(name, value)?)
            }
            PublishedOperation::GetTotalCount { .. } => {
                PublishedOperationValue::TotalCount(from_value(name, value)?)
            }
            PublishedOperation::SampleEntities { .. } => {
                PublishedOperationValue::Sample(from_value(name, value)?)
            }
        })
    }
}
