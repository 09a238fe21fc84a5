//! Entity queries and the plans and SQL they compile to.
//!
//! An [`EntityQuery`] from the caller is combined with the session's auth
//! keys into a [`QueryFilter`], then with resolved paging into a
//! [`SearchPlan`]. Storage backends either evaluate the plan directly
//! ([`QueryFilter::matches`]) or render it to Postgres with [`search_sql`],
//! [`count_sql`] and [`offset_sql`].

use crate::codec::Location;
use crate::paging::{CursorKey, CursorKind, ResolvedPaging};
use crate::EntityId;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt::Write as _;
use uuid::Uuid;

/// Ordering key of a search.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EntityOrder {
    /// Creation order
    #[default]
    CreatedAt,
    /// Order of the last mutation or publishing change
    UpdatedAt,
    /// Entity name
    Name,
}

impl EntityOrder {
    pub fn cursor_kind(&self) -> CursorKind {
        match self {
            EntityOrder::CreatedAt | EntityOrder::UpdatedAt => CursorKind::Int,
            EntityOrder::Name => CursorKind::String,
        }
    }

    fn column(&self) -> &'static str {
        match self {
            EntityOrder::CreatedAt => "e.sequence",
            EntityOrder::UpdatedAt => "e.updated_seq",
            EntityOrder::Name => "e.name COLLATE \"C\"",
        }
    }
}

/// A latitude/longitude rectangle.
///
/// When `min_lng > max_lng` the box crosses the antimeridian.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl BoundingBox {
    pub fn crosses_antimeridian(&self) -> bool {
        self.min_lng > self.max_lng
    }

    pub fn contains(&self, location: &Location) -> bool {
        let lat_inside = location.lat >= self.min_lat && location.lat <= self.max_lat;
        let lng_inside = if self.crosses_antimeridian() {
            location.lng >= self.min_lng || location.lng <= self.max_lng
        } else {
            location.lng >= self.min_lng && location.lng <= self.max_lng
        };
        lat_inside && lng_inside
    }
}

/// What the caller asks for.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityQuery {
    /// Only entities of these types; all types when empty
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entity_types: Vec<String>,
    /// Only entities whose version references this entity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referencing: Option<EntityId>,
    /// Only entities with a location inside the box
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounding_box: Option<BoundingBox>,
    /// Only entities whose text contains every word
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default)]
    pub order: EntityOrder,
    #[serde(default)]
    pub reverse: bool,
    /// Only entities with one of these auth keys; the session's keys when empty
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub auth_keys: Vec<String>,
}

impl EntityQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entity_type(mut self, entity_type: impl Into<String>) -> Self {
        self.entity_types.push(entity_type.into());
        self
    }

    pub fn referencing(mut self, id: EntityId) -> Self {
        self.referencing = Some(id);
        self
    }

    pub fn with_bounding_box(mut self, bounding_box: BoundingBox) -> Self {
        self.bounding_box = Some(bounding_box);
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn ordered_by(mut self, order: EntityOrder) -> Self {
        self.order = order;
        self
    }

    pub fn reversed(mut self) -> Self {
        self.reverse = true;
        self
    }
}

/// Which version of an entity a query looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EntityView {
    /// The latest version of every entity
    Admin,
    /// The published version of published entities
    Published,
}

/// Everything that narrows the set of matching entities.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryFilter {
    pub view: EntityView,
    pub entity_types: Vec<String>,
    pub referencing: Option<EntityId>,
    pub bounding_box: Option<BoundingBox>,
    pub text_terms: Vec<String>,
    pub auth_keys: Vec<String>,
}

/// The indexed content of a version a filter is evaluated against.
pub struct FilterSubject<'a> {
    pub entity_type: &'a str,
    pub auth_key: &'a str,
    pub references: &'a [Uuid],
    pub locations: &'a [Location],
    pub full_text: &'a [String],
}

impl QueryFilter {
    /// Combine a query with the auth keys the session may read.
    pub fn new(view: EntityView, query: &EntityQuery, auth_keys: Vec<String>) -> Self {
        Self {
            view,
            entity_types: query.entity_types.clone(),
            referencing: query.referencing,
            bounding_box: query.bounding_box,
            text_terms: query.text.as_deref().map(tokenize).unwrap_or_default(),
            auth_keys,
        }
    }

    pub fn matches(&self, subject: &FilterSubject<'_>) -> bool {
        if !self.auth_keys.iter().any(|key| key == subject.auth_key) {
            return false;
        }
        if !self.entity_types.is_empty()
            && !self.entity_types.iter().any(|t| t == subject.entity_type)
        {
            return false;
        }
        if let Some(target) = self.referencing {
            if !subject.references.contains(&target) {
                return false;
            }
        }
        if let Some(bounding_box) = &self.bounding_box {
            if !subject.locations.iter().any(|l| bounding_box.contains(l)) {
                return false;
            }
        }
        if !self.text_terms.is_empty() {
            let words: HashSet<String> = subject
                .full_text
                .iter()
                .flat_map(|text| tokenize(text))
                .collect();
            if !self.text_terms.iter().all(|term| words.contains(term)) {
                return false;
            }
        }
        true
    }
}

/// Lowercased alphanumeric words of a text.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// A bounded, directional fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchPlan {
    pub filter: QueryFilter,
    pub order: EntityOrder,
    /// Fetch direction; `true` walks the key space upwards
    pub ascending: bool,
    /// Exclusive bound: `key > cursor` ascending, `key < cursor` descending
    pub cursor: Option<CursorKey>,
    /// Rows to fetch, one more than the page size
    pub limit: usize,
}

impl SearchPlan {
    pub fn new(filter: QueryFilter, query: &EntityQuery, paging: &ResolvedPaging) -> Self {
        Self {
            filter,
            order: query.order,
            ascending: paging.is_forwards != query.reverse,
            cursor: paging.cursor.clone(),
            limit: paging.fetch_limit(),
        }
    }

    /// Whether a key lies past the cursor in fetch direction.
    pub fn after_cursor(&self, key: &CursorKey) -> bool {
        match &self.cursor {
            None => true,
            Some(cursor) if self.ascending => key > cursor,
            Some(cursor) => key < cursor,
        }
    }
}

/// A bind value for a rendered query.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Text(String),
    TextArray(Vec<String>),
    Uuid(Uuid),
    Int(i64),
    Float(f64),
}

/// SQL text with `$n` placeholders and the values to bind, in order.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlQuery {
    pub text: String,
    pub values: Vec<SqlValue>,
}

struct SqlBuilder {
    text: String,
    values: Vec<SqlValue>,
}

impl SqlBuilder {
    fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
            values: Vec::new(),
        }
    }

    fn push(&mut self, text: &str) -> &mut Self {
        self.text.push_str(text);
        self
    }

    /// Add a value and append its placeholder.
    fn bind(&mut self, value: SqlValue) -> &mut Self {
        self.values.push(value);
        let _ = write!(self.text, "${}", self.values.len());
        self
    }

    fn finish(self) -> SqlQuery {
        SqlQuery {
            text: self.text,
            values: self.values,
        }
    }
}

/// Columns shared by every query returning search rows.
pub const SEARCH_COLUMNS: &str = "SELECT e.id, e.sequence, e.updated_seq, e.entity_type, e.name, \
e.auth_key, e.created_at, e.updated_at, e.latest_version, e.published_version, e.archived, \
e.ever_published, v.version, v.name AS version_name, v.data, v.created_by, \
v.created_at AS version_created_at, \
ARRAY(SELECT r.target_id FROM entity_version_references r \
WHERE r.entity_id = v.entity_id AND r.version = v.version ORDER BY r.position) AS refs";

fn push_from_where(builder: &mut SqlBuilder, filter: &QueryFilter) {
    builder.push(" FROM entities e JOIN entity_versions v ON v.entity_id = e.id AND v.version = ");
    builder.push(match filter.view {
        EntityView::Admin => "e.latest_version",
        EntityView::Published => "e.published_version",
    });

    builder
        .push(" WHERE e.auth_key = ANY(")
        .bind(SqlValue::TextArray(filter.auth_keys.clone()))
        .push(")");

    if !filter.entity_types.is_empty() {
        builder
            .push(" AND e.entity_type = ANY(")
            .bind(SqlValue::TextArray(filter.entity_types.clone()))
            .push(")");
    }

    if let Some(target) = filter.referencing {
        builder
            .push(
                " AND EXISTS (SELECT 1 FROM entity_version_references r \
WHERE r.entity_id = v.entity_id AND r.version = v.version AND r.target_id = ",
            )
            .bind(SqlValue::Uuid(target))
            .push(")");
    }

    if let Some(bbox) = &filter.bounding_box {
        builder
            .push(
                " AND EXISTS (SELECT 1 FROM entity_version_locations l \
WHERE l.entity_id = v.entity_id AND l.version = v.version AND l.lat >= ",
            )
            .bind(SqlValue::Float(bbox.min_lat))
            .push(" AND l.lat <= ")
            .bind(SqlValue::Float(bbox.max_lat))
            .push(" AND (l.lng >= ")
            .bind(SqlValue::Float(bbox.min_lng))
            .push(if bbox.crosses_antimeridian() {
                " OR l.lng <= "
            } else {
                " AND l.lng <= "
            })
            .bind(SqlValue::Float(bbox.max_lng))
            .push("))");
    }

    if !filter.text_terms.is_empty() {
        builder
            .push(" AND v.fts @@ plainto_tsquery('simple', ")
            .bind(SqlValue::Text(filter.text_terms.join(" ")))
            .push(")");
    }
}

/// Render a search plan.
pub fn search_sql(plan: &SearchPlan) -> SqlQuery {
    let mut builder = SqlBuilder::new(SEARCH_COLUMNS);
    push_from_where(&mut builder, &plan.filter);

    let column = plan.order.column();
    if let Some(cursor) = &plan.cursor {
        let op = if plan.ascending { " > " } else { " < " };
        builder.push(" AND ").push(column).push(op);
        match cursor {
            CursorKey::Int(value) => builder.bind(SqlValue::Int(*value)),
            CursorKey::String(value) => builder.bind(SqlValue::Text(value.clone())),
        };
    }

    builder
        .push(" ORDER BY ")
        .push(column)
        .push(if plan.ascending { " ASC" } else { " DESC" })
        .push(" LIMIT ")
        .bind(SqlValue::Int(i64::try_from(plan.limit).unwrap_or(i64::MAX)));
    builder.finish()
}

/// Render the count of a filter.
pub fn count_sql(filter: &QueryFilter) -> SqlQuery {
    let mut builder = SqlBuilder::new("SELECT COUNT(*)");
    push_from_where(&mut builder, filter);
    builder.finish()
}

/// Render a fetch of the single row at `offset` in creation order.
pub fn offset_sql(filter: &QueryFilter, offset: u64) -> SqlQuery {
    let mut builder = SqlBuilder::new(SEARCH_COLUMNS);
    push_from_where(&mut builder, filter);
    builder
        .push(" ORDER BY e.sequence ASC LIMIT 1 OFFSET ")
        .bind(SqlValue::Int(i64::try_from(offset).unwrap_or(i64::MAX)));
    builder.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paging::{resolve_paging, to_opaque_cursor, Paging};

    fn filter(query: &EntityQuery) -> QueryFilter {
        QueryFilter::new(EntityView::Admin, query, vec!["none".into()])
    }

    fn subject<'a>(
        entity_type: &'a str,
        references: &'a [Uuid],
        locations: &'a [Location],
        full_text: &'a [String],
    ) -> FilterSubject<'a> {
        FilterSubject {
            entity_type,
            auth_key: "none",
            references,
            locations,
            full_text,
        }
    }

    #[test]
    fn bounding_box_across_antimeridian() {
        let bbox = BoundingBox {
            min_lat: -10.0,
            max_lat: 10.0,
            min_lng: 170.0,
            max_lng: -170.0,
        };
        assert!(bbox.crosses_antimeridian());
        assert!(bbox.contains(&Location { lat: 0.0, lng: 175.0 }));
        assert!(bbox.contains(&Location { lat: 0.0, lng: -175.0 }));
        assert!(!bbox.contains(&Location { lat: 0.0, lng: 0.0 }));
        assert!(!bbox.contains(&Location { lat: 20.0, lng: 175.0 }));
    }

    #[test]
    fn filter_matches_type_reference_and_text() {
        let target = Uuid::new_v4();
        let query = EntityQuery::new()
            .with_entity_type("Foo")
            .referencing(target)
            .with_text("Hello WORLD");
        let filter = filter(&query);

        let text = vec!["hello there, world!".to_string()];
        assert!(filter.matches(&subject("Foo", &[target], &[], &text)));
        assert!(!filter.matches(&subject("Bar", &[target], &[], &text)));
        assert!(!filter.matches(&subject("Foo", &[], &[], &text)));

        let partial = vec!["hello".to_string()];
        assert!(!filter.matches(&subject("Foo", &[target], &[], &partial)));
    }

    #[test]
    fn filter_requires_auth_key() {
        let filter = QueryFilter::new(EntityView::Admin, &EntityQuery::new(), vec!["a".into()]);
        assert!(!filter.matches(&subject("Foo", &[], &[], &[])));
    }

    #[test]
    fn plan_direction() {
        let query = EntityQuery::new();
        let forwards = resolve_paging(&Paging::first(10), CursorKind::Int).unwrap();
        let backwards = resolve_paging(&Paging::last(10), CursorKind::Int).unwrap();

        assert!(SearchPlan::new(filter(&query), &query, &forwards).ascending);
        assert!(!SearchPlan::new(filter(&query), &query, &backwards).ascending);

        let reversed = EntityQuery::new().reversed();
        assert!(!SearchPlan::new(filter(&reversed), &reversed, &forwards).ascending);
        assert!(SearchPlan::new(filter(&reversed), &reversed, &backwards).ascending);
        assert_eq!(SearchPlan::new(filter(&query), &query, &forwards).limit, 11);
    }

    #[test]
    fn search_sql_binds_in_order() {
        let target = Uuid::new_v4();
        let query = EntityQuery::new().with_entity_type("Foo").referencing(target);
        let paging = resolve_paging(
            &Paging::first(5).after(to_opaque_cursor(&CursorKey::Int(7))),
            CursorKind::Int,
        )
        .unwrap();
        let plan = SearchPlan::new(filter(&query), &query, &paging);
        let sql = search_sql(&plan);

        assert!(sql.text.contains("v.version = e.latest_version"));
        assert!(sql.text.contains("e.auth_key = ANY($1)"));
        assert!(sql.text.contains("e.entity_type = ANY($2)"));
        assert!(sql.text.contains("r.target_id = $3"));
        assert!(sql.text.contains("e.sequence > $4"));
        assert!(sql.text.ends_with("ORDER BY e.sequence ASC LIMIT $5"));
        assert_eq!(
            sql.values,
            vec![
                SqlValue::TextArray(vec!["none".into()]),
                SqlValue::TextArray(vec!["Foo".into()]),
                SqlValue::Uuid(target),
                SqlValue::Int(7),
                SqlValue::Int(6),
            ]
        );
    }

    #[test]
    fn backward_name_search_sql() {
        let query = EntityQuery::new().ordered_by(EntityOrder::Name);
        let paging = resolve_paging(
            &Paging::last(2).before(to_opaque_cursor(&CursorKey::String("Foo".into()))),
            CursorKind::String,
        )
        .unwrap();
        let mut published = filter(&query);
        published.view = EntityView::Published;
        let sql = search_sql(&SearchPlan::new(published, &query, &paging));

        assert!(sql.text.contains("v.version = e.published_version"));
        assert!(sql.text.contains("e.name COLLATE \"C\" < $2"));
        assert!(sql.text.contains("DESC LIMIT $3"));
    }

    #[test]
    fn bounding_box_sql() {
        let query = EntityQuery::new().with_bounding_box(BoundingBox {
            min_lat: 0.0,
            max_lat: 1.0,
            min_lng: 179.0,
            max_lng: -179.0,
        });
        let sql = count_sql(&filter(&query));
        assert!(sql.text.starts_with("SELECT COUNT(*)"));
        assert!(sql.text.contains("(l.lng >= $4 OR l.lng <= $5)"));
        assert_eq!(sql.values.len(), 5);
    }

    #[test]
    fn offset_sql_orders_by_creation() {
        let sql = offset_sql(&filter(&EntityQuery::new().with_text("a b")), 3);
        assert!(sql.text.contains("plainto_tsquery('simple', $2)"));
        assert!(sql.text.ends_with("LIMIT 1 OFFSET $3"));
        assert_eq!(sql.values[1], SqlValue::Text("a b".into()));
        assert_eq!(sql.values[2], SqlValue::Int(3));
    }

    #[test]
    fn huge_limits_saturate() {
        let query = EntityQuery::new();
        let paging = resolve_paging(&Paging::first(usize::MAX), CursorKind::Int).unwrap();
        let sql = search_sql(&SearchPlan::new(filter(&query), &query, &paging));
        assert_eq!(sql.values.last(), Some(&SqlValue::Int(i64::MAX)));

        let sql = offset_sql(&filter(&query), u64::MAX);
        assert_eq!(sql.values.last(), Some(&SqlValue::Int(i64::MAX)));
    }
}
