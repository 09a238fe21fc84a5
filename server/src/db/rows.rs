//! Row types read from the entity tables.

use folio_engine::storage::{EntityRow, EntityVersionRow, ReferenceTarget, SearchRow};
use folio_engine::{FieldValues, PublishingEvent, PublishingEventKind, Version};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, Row};
use uuid::Uuid;

/// Columns of `entities` selected into [`StoredEntity`].
pub const ENTITY_COLUMNS: &str = "id, sequence, updated_seq, entity_type, name, auth_key, \
created_at, updated_at, latest_version, published_version, archived, ever_published";

/// Columns of `entity_versions` (aliased `v`) selected into [`StoredVersion`].
pub const VERSION_COLUMNS: &str = "v.entity_id, v.version, v.name, v.data, v.created_by, \
v.created_at, ARRAY(SELECT r.target_id FROM entity_version_references r \
WHERE r.entity_id = v.entity_id AND r.version = v.version ORDER BY r.position) AS refs";

fn decode_error(column: &str, message: String) -> sqlx::Error {
    sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: message.into(),
    }
}

fn version(row: &PgRow, column: &str) -> Result<Version, sqlx::Error> {
    let value: i32 = row.try_get(column)?;
    Version::try_from(value).map_err(|_| decode_error(column, format!("negative version {value}")))
}

fn optional_version(row: &PgRow, column: &str) -> Result<Option<Version>, sqlx::Error> {
    let value: Option<i32> = row.try_get(column)?;
    value
        .map(|v| Version::try_from(v).map_err(|_| decode_error(column, format!("negative version {v}"))))
        .transpose()
}

fn data(row: &PgRow, column: &str) -> Result<Option<FieldValues>, sqlx::Error> {
    let value: Option<serde_json::Value> = row.try_get(column)?;
    match value {
        None => Ok(None),
        Some(serde_json::Value::Object(fields)) => Ok(Some(fields)),
        Some(_) => Err(decode_error(column, "entity data is not an object".to_string())),
    }
}

/// A stored entity head.
#[derive(Debug)]
pub struct StoredEntity(pub EntityRow);

impl<'r> FromRow<'r, PgRow> for StoredEntity {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(StoredEntity(EntityRow {
            id: row.try_get("id")?,
            sequence: row.try_get("sequence")?,
            updated_seq: row.try_get("updated_seq")?,
            entity_type: row.try_get("entity_type")?,
            name: row.try_get("name")?,
            auth_key: row.try_get("auth_key")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            latest_version: version(row, "latest_version")?,
            published_version: optional_version(row, "published_version")?,
            archived: row.try_get("archived")?,
            ever_published: row.try_get("ever_published")?,
        }))
    }
}

/// A stored entity version with its references.
#[derive(Debug)]
pub struct StoredVersion(pub EntityVersionRow);

impl<'r> FromRow<'r, PgRow> for StoredVersion {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(StoredVersion(EntityVersionRow {
            entity_id: row.try_get("entity_id")?,
            version: version(row, "version")?,
            name: row.try_get("name")?,
            data: data(row, "data")?,
            references: row.try_get::<Vec<Uuid>, _>("refs")?,
            created_by: row.try_get("created_by")?,
            created_at: row.try_get("created_at")?,
        }))
    }
}

/// A row of a search: entity head joined with the version its view selects.
#[derive(Debug)]
pub struct StoredSearchRow(pub SearchRow);

impl<'r> FromRow<'r, PgRow> for StoredSearchRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let StoredEntity(entity) = StoredEntity::from_row(row)?;
        let version = EntityVersionRow {
            entity_id: entity.id,
            version: version(row, "version")?,
            name: row.try_get("version_name")?,
            data: data(row, "data")?,
            references: row.try_get::<Vec<Uuid>, _>("refs")?,
            created_by: row.try_get("created_by")?,
            created_at: row.try_get("version_created_at")?,
        };
        Ok(StoredSearchRow(SearchRow { entity, version }))
    }
}

/// Existence, type and publish state of a referenced entity.
#[derive(Debug)]
pub struct StoredTarget(pub ReferenceTarget);

impl<'r> FromRow<'r, PgRow> for StoredTarget {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(StoredTarget(ReferenceTarget {
            id: row.try_get("id")?,
            entity_type: row.try_get("entity_type")?,
            published: row.try_get("published")?,
        }))
    }
}

/// One row of `entity_publishing_events`.
#[derive(Debug)]
pub struct StoredEvent(pub PublishingEvent);

impl<'r> FromRow<'r, PgRow> for StoredEvent {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let kind: String = row.try_get("kind")?;
        let kind = PublishingEventKind::parse(&kind)
            .ok_or_else(|| decode_error("kind", format!("unknown publishing event {kind}")))?;
        Ok(StoredEvent(PublishingEvent {
            kind,
            version: optional_version(row, "version")?,
            published_at: row.try_get("published_at")?,
            published_by: row.try_get("published_by")?,
        }))
    }
}
