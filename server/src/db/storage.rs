//! Postgres implementation of the engine's storage contract.
//!
//! Each engine transaction maps onto one database transaction. In write
//! transactions entity heads are read `FOR UPDATE` and reference targets
//! `FOR SHARE`, so the publishing checks an operation makes can't be
//! invalidated by a concurrent one before it commits. Read transactions are
//! `READ ONLY` and take no row locks.

use super::rows::{
    StoredEntity, StoredEvent, StoredSearchRow, StoredTarget, StoredVersion, ENTITY_COLUMNS,
    VERSION_COLUMNS,
};
use super::Pool;
use async_trait::async_trait;
use folio_engine::query::{count_sql, offset_sql, search_sql, SqlQuery, SqlValue};
use folio_engine::storage::{
    EntityRow, EntityVersionRow, NewEntity, PublishState, ReferenceTarget, SearchRow, Storage,
    StorageTx, VersionIndex,
};
use folio_engine::{
    EntityId, Error, PublishingEvent, QueryFilter, Result, SearchPlan, Timestamp, Version,
};
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::{FromRow, Postgres, Row, Transaction};

/// Map a database error onto an engine error.
fn db_error(err: sqlx::Error) -> Error {
    if let Some(db_err) = err.as_database_error() {
        if db_err.is_unique_violation() && db_err.constraint() == Some("entities_pkey") {
            return Error::conflict("Entity id already exist");
        }
    }
    tracing::error!("Database error: {:?}", err);
    Error::generic(format!("Database error: {err}"))
}

fn pg_version(version: Version) -> i32 {
    i32::try_from(version).unwrap_or(i32::MAX)
}

fn no_such_entity(id: EntityId) -> Error {
    Error::not_found(format!("No such entity ({id})"))
}

/// Bind the values of a rendered query, in placeholder order.
fn bind_all(sql: &SqlQuery) -> Query<'_, Postgres, PgArguments> {
    let mut query = sqlx::query(&sql.text);
    for value in &sql.values {
        query = match value {
            SqlValue::Text(v) => query.bind(v.clone()),
            SqlValue::TextArray(v) => query.bind(v.clone()),
            SqlValue::Uuid(v) => query.bind(*v),
            SqlValue::Int(v) => query.bind(*v),
            SqlValue::Float(v) => query.bind(*v),
        };
    }
    query
}

/// Select of one entity head, row-locked in write transactions.
fn entity_sql(locking: bool) -> String {
    let lock = if locking { " FOR UPDATE" } else { "" };
    format!("SELECT {ENTITY_COLUMNS} FROM entities WHERE id = $1{lock}")
}

/// Select of reference targets, share-locked in write transactions.
fn targets_sql(locking: bool) -> String {
    let lock = if locking { " FOR SHARE" } else { "" };
    format!(
        "SELECT id, entity_type, published_version IS NOT NULL AS published \
         FROM entities WHERE id = ANY($1){lock}"
    )
}

fn search_rows(rows: Vec<PgRow>) -> Result<Vec<SearchRow>> {
    rows.iter()
        .map(|row| StoredSearchRow::from_row(row).map(|r| r.0).map_err(db_error))
        .collect()
}

/// Storage backed by a Postgres pool.
#[derive(Debug, Clone)]
pub struct PgStorage {
    pool: Pool,
}

impl PgStorage {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Storage for PgStorage {
    async fn begin(&self) -> Result<Box<dyn StorageTx>> {
        let tx = self.pool.begin().await.map_err(db_error)?;
        Ok(Box::new(PgTx { tx, locking: true }))
    }

    async fn begin_read(&self) -> Result<Box<dyn StorageTx>> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;
        sqlx::query("SET TRANSACTION READ ONLY")
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;
        Ok(Box::new(PgTx { tx, locking: false }))
    }
}

/// A database transaction; rolled back when dropped without commit.
pub struct PgTx {
    tx: Transaction<'static, Postgres>,
    /// Whether entity reads lock their rows
    locking: bool,
}

impl PgTx {
    async fn fetch_entity(&mut self, sql: String, id: EntityId) -> Result<Option<EntityRow>> {
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(db_error)?;
        row.map(|row| StoredEntity::from_row(&row).map(|e| e.0).map_err(db_error))
            .transpose()
    }
}

#[async_trait]
impl StorageTx for PgTx {
    async fn get_entity(&mut self, id: EntityId) -> Result<Option<EntityRow>> {
        let sql = entity_sql(self.locking);
        self.fetch_entity(sql, id).await
    }

    async fn get_version(
        &mut self,
        id: EntityId,
        version: Version,
    ) -> Result<Option<EntityVersionRow>> {
        let sql = format!(
            "SELECT {VERSION_COLUMNS} FROM entity_versions v WHERE v.entity_id = $1 AND v.version = $2"
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .bind(pg_version(version))
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(db_error)?;
        row.map(|row| StoredVersion::from_row(&row).map(|v| v.0).map_err(db_error))
            .transpose()
    }

    async fn get_versions(&mut self, id: EntityId) -> Result<Vec<EntityVersionRow>> {
        let sql = format!(
            "SELECT {VERSION_COLUMNS} FROM entity_versions v WHERE v.entity_id = $1 ORDER BY v.version"
        );
        let rows = sqlx::query(&sql)
            .bind(id)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(db_error)?;
        rows.iter()
            .map(|row| StoredVersion::from_row(row).map(|v| v.0).map_err(db_error))
            .collect()
    }

    async fn reference_targets(&mut self, ids: &[EntityId]) -> Result<Vec<ReferenceTarget>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = targets_sql(self.locking);
        let rows = sqlx::query(&sql)
            .bind(ids.to_vec())
            .fetch_all(&mut *self.tx)
            .await
            .map_err(db_error)?;
        rows.iter()
            .map(|row| StoredTarget::from_row(row).map(|t| t.0).map_err(db_error))
            .collect()
    }

    async fn name_exists(&mut self, name: &str, exclude: Option<EntityId>) -> Result<bool> {
        let row = sqlx::query(
            "SELECT EXISTS (SELECT 1 FROM entities \
             WHERE name = $1 AND ($2::uuid IS NULL OR id <> $2)) AS taken",
        )
        .bind(name)
        .bind(exclude)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(db_error)?;
        row.try_get("taken").map_err(db_error)
    }

    async fn insert_entity(&mut self, entity: NewEntity) -> Result<EntityRow> {
        let sql = format!(
            "WITH seq AS (SELECT nextval('entity_sequence') AS n) \
             INSERT INTO entities (id, sequence, updated_seq, entity_type, name, auth_key, created_at, updated_at) \
             SELECT $1, seq.n, seq.n, $2, $3, $4, $5, $5 FROM seq \
             ON CONFLICT (id) DO NOTHING \
             RETURNING {ENTITY_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(entity.id)
            .bind(&entity.entity_type)
            .bind(&entity.name)
            .bind(&entity.auth_key)
            .bind(entity.created_at)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(db_error)?;
        match row {
            Some(row) => StoredEntity::from_row(&row).map(|e| e.0).map_err(db_error),
            None => Err(Error::conflict(format!(
                "Entity with id ({}) already exist",
                entity.id
            ))),
        }
    }

    async fn insert_version(
        &mut self,
        version: &EntityVersionRow,
        index: &VersionIndex,
    ) -> Result<()> {
        let data = version.data.clone().map(serde_json::Value::Object);
        sqlx::query(
            "INSERT INTO entity_versions (entity_id, version, name, data, fts, created_by, created_at) \
             VALUES ($1, $2, $3, $4, to_tsvector('simple', $5), $6, $7)",
        )
        .bind(version.entity_id)
        .bind(pg_version(version.version))
        .bind(&version.name)
        .bind(data)
        .bind(index.full_text.join(" "))
        .bind(version.created_by)
        .bind(version.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(db_error)?;

        if !version.references.is_empty() {
            sqlx::query(
                "INSERT INTO entity_version_references (entity_id, version, position, target_id) \
                 SELECT $1, $2, t.position, t.target_id \
                 FROM UNNEST($3::uuid[]) WITH ORDINALITY AS t(target_id, position)",
            )
            .bind(version.entity_id)
            .bind(pg_version(version.version))
            .bind(version.references.clone())
            .execute(&mut *self.tx)
            .await
            .map_err(db_error)?;
        }

        if !index.locations.is_empty() {
            let lats: Vec<f64> = index.locations.iter().map(|l| l.lat).collect();
            let lngs: Vec<f64> = index.locations.iter().map(|l| l.lng).collect();
            sqlx::query(
                "INSERT INTO entity_version_locations (entity_id, version, lat, lng) \
                 SELECT $1, $2, t.lat, t.lng FROM UNNEST($3::float8[], $4::float8[]) AS t(lat, lng)",
            )
            .bind(version.entity_id)
            .bind(pg_version(version.version))
            .bind(lats)
            .bind(lngs)
            .execute(&mut *self.tx)
            .await
            .map_err(db_error)?;
        }
        Ok(())
    }

    async fn update_entity_head(
        &mut self,
        id: EntityId,
        latest_version: Version,
        name: &str,
        updated_at: Timestamp,
    ) -> Result<EntityRow> {
        let sql = format!(
            "UPDATE entities SET latest_version = $2, name = $3, updated_at = $4, \
             updated_seq = nextval('entity_sequence') WHERE id = $1 RETURNING {ENTITY_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .bind(pg_version(latest_version))
            .bind(name)
            .bind(updated_at)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(db_error)?
            .ok_or_else(|| no_such_entity(id))?;
        StoredEntity::from_row(&row).map(|e| e.0).map_err(db_error)
    }

    async fn update_publish_state(
        &mut self,
        id: EntityId,
        state: PublishState,
        updated_at: Timestamp,
    ) -> Result<EntityRow> {
        let sql = format!(
            "UPDATE entities SET published_version = $2, archived = $3, ever_published = $4, \
             updated_at = $5, updated_seq = nextval('entity_sequence') \
             WHERE id = $1 RETURNING {ENTITY_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .bind(state.published_version.map(pg_version))
            .bind(state.archived)
            .bind(state.ever_published)
            .bind(updated_at)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(db_error)?
            .ok_or_else(|| no_such_entity(id))?;
        StoredEntity::from_row(&row).map(|e| e.0).map_err(db_error)
    }

    async fn insert_publishing_event(
        &mut self,
        id: EntityId,
        event: &PublishingEvent,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO entity_publishing_events (entity_id, kind, version, published_at, published_by) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(id)
        .bind(event.kind.as_str())
        .bind(event.version.map(pg_version))
        .bind(event.published_at)
        .bind(event.published_by)
        .execute(&mut *self.tx)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn publishing_events(&mut self, id: EntityId) -> Result<Vec<PublishingEvent>> {
        let rows = sqlx::query(
            "SELECT kind, version, published_at, published_by \
             FROM entity_publishing_events WHERE entity_id = $1 ORDER BY id",
        )
        .bind(id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(db_error)?;
        rows.iter()
            .map(|row| StoredEvent::from_row(row).map(|e| e.0).map_err(db_error))
            .collect()
    }

    async fn published_referrers(
        &mut self,
        targets: &[EntityId],
    ) -> Result<Vec<(EntityId, EntityId)>> {
        if targets.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(
            "SELECT e.id AS source_id, r.target_id FROM entities e \
             JOIN entity_version_references r \
             ON r.entity_id = e.id AND r.version = e.published_version \
             WHERE r.target_id = ANY($1) ORDER BY e.sequence, r.position",
        )
        .bind(targets.to_vec())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(db_error)?;
        rows.iter()
            .map(|row| {
                Ok((
                    row.try_get("source_id").map_err(db_error)?,
                    row.try_get("target_id").map_err(db_error)?,
                ))
            })
            .collect()
    }

    async fn search(&mut self, plan: &SearchPlan) -> Result<Vec<SearchRow>> {
        let sql = search_sql(plan);
        let rows = bind_all(&sql)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(db_error)?;
        search_rows(rows)
    }

    async fn count(&mut self, filter: &QueryFilter) -> Result<u64> {
        let sql = count_sql(filter);
        let row = bind_all(&sql)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(db_error)?;
        let count: i64 = row.try_get(0).map_err(db_error)?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    async fn search_at_offset(
        &mut self,
        filter: &QueryFilter,
        offset: u64,
    ) -> Result<Option<SearchRow>> {
        let sql = offset_sql(filter, offset);
        let rows = bind_all(&sql)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(db_error)?;
        Ok(search_rows(rows)?.into_iter().next())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await.map_err(db_error)
    }
}
