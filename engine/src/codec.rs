//! Field codec.
//!
//! Converts external field values (JSON) into their stored form and back,
//! driven by the [`FieldType`] tag of each [`FieldSpecification`]. Encoding is
//! strict about shape and normalizes empty values to null; while encoding, the
//! codec collects everything the storage indexes: referenced entity ids,
//! locations and full-text terms.

use crate::schema::{FieldSpecification, FieldType, Schema, VALUE_TYPE_DISCRIMINANT};
use crate::{error::Result, Error};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Field values keyed by field name.
pub type FieldValues = Map<String, Value>;

/// Rich text block type that embeds a reference to an entity.
pub const RICH_TEXT_ENTITY_BLOCK: &str = "entity";

/// A geographic point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub lat: f64,
    pub lng: f64,
}

/// A reference found while encoding, resolved later in one batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingReference {
    /// Path of the field holding the reference, e.g. `entity.fields.bar`
    pub path: String,
    pub id: Uuid,
    /// Allowed entity types, empty means any
    pub entity_types: Vec<String>,
}

/// Everything collected from the values while encoding.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EncodeCollector {
    pub references: Vec<PendingReference>,
    pub locations: Vec<Location>,
    pub full_text: Vec<String>,
}

impl EncodeCollector {
    /// Unique referenced ids, in first-seen order.
    pub fn reference_ids(&self) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = Vec::with_capacity(self.references.len());
        for reference in &self.references {
            if !ids.contains(&reference.id) {
                ids.push(reference.id);
            }
        }
        ids
    }
}

/// Name of the JSON kind of a value, for error messages.
pub fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}

fn bad(path: &str, message: impl std::fmt::Display) -> Error {
    Error::bad_request(format!("{path}: {message}"))
}

/// Encode the fields of an entity or value type.
///
/// Field names not declared in `fields` are rejected together in one error.
/// Only non-null encoded values end up in the result.
pub fn encode_fields(
    schema: &Schema,
    fields: &[FieldSpecification],
    path: &str,
    values: &FieldValues,
    collector: &mut EncodeCollector,
) -> Result<FieldValues> {
    encode_object(schema, fields, path, values, false, collector)
}

fn encode_object(
    schema: &Schema,
    fields: &[FieldSpecification],
    path: &str,
    values: &FieldValues,
    has_discriminant: bool,
    collector: &mut EncodeCollector,
) -> Result<FieldValues> {
    let unsupported: Vec<&str> = values
        .keys()
        .map(String::as_str)
        .filter(|name| !(has_discriminant && *name == VALUE_TYPE_DISCRIMINANT))
        .filter(|name| !fields.iter().any(|f| f.name == *name))
        .collect();
    if !unsupported.is_empty() {
        return Err(bad(
            path,
            format!("Unsupported field names: {}", unsupported.join(", ")),
        ));
    }

    let mut encoded = Map::new();
    for field in fields {
        let Some(value) = values.get(&field.name) else {
            continue;
        };
        let field_path = format!("{path}.{}", field.name);
        if let Some(value) = encode_field(schema, field, &field_path, value, collector)? {
            encoded.insert(field.name.clone(), value);
        }
    }
    Ok(encoded)
}

/// Encode a single field value. `Ok(None)` means the value normalized to null.
pub fn encode_field(
    schema: &Schema,
    field: &FieldSpecification,
    path: &str,
    value: &Value,
    collector: &mut EncodeCollector,
) -> Result<Option<Value>> {
    if value.is_null() {
        return Ok(None);
    }
    if !field.list {
        return encode_item(schema, field, path, value, collector);
    }

    let items = value
        .as_array()
        .ok_or_else(|| bad(path, format!("expected list, got {}", json_kind(value))))?;
    let mut encoded = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        let item_path = format!("{path}[{index}]");
        if let Some(item) = encode_item(schema, field, &item_path, item, collector)? {
            encoded.push(item);
        }
    }
    Ok((!encoded.is_empty()).then_some(Value::Array(encoded)))
}

fn encode_item(
    schema: &Schema,
    field: &FieldSpecification,
    path: &str,
    value: &Value,
    collector: &mut EncodeCollector,
) -> Result<Option<Value>> {
    match value {
        Value::Null => return Ok(None),
        Value::Array(_) => return Err(bad(path, "expected single value, got list")),
        _ => {}
    }

    match field.field_type {
        FieldType::String => {
            let text = value
                .as_str()
                .ok_or_else(|| bad(path, format!("expected string, got {}", json_kind(value))))?;
            if text.is_empty() {
                return Ok(None);
            }
            collector.full_text.push(text.to_string());
            Ok(Some(Value::String(text.to_string())))
        }
        FieldType::Boolean => {
            let flag = value
                .as_bool()
                .ok_or_else(|| bad(path, format!("expected boolean, got {}", json_kind(value))))?;
            Ok(Some(Value::Bool(flag)))
        }
        FieldType::Location => {
            let location = encode_location(path, value)?;
            collector.locations.push(location);
            Ok(Some(serde_json::json!({"lat": value["lat"], "lng": value["lng"]})))
        }
        FieldType::RichText => encode_rich_text(path, value, collector),
        FieldType::EntityType => {
            let id = parse_reference(path, value)?;
            collector.references.push(PendingReference {
                path: path.to_string(),
                id,
                entity_types: field.entity_types.clone(),
            });
            Ok(Some(Value::String(id.to_string())))
        }
        FieldType::ValueType => encode_value_type(schema, field, path, value, collector),
    }
}

fn encode_location(path: &str, value: &Value) -> Result<Location> {
    let object = value
        .as_object()
        .ok_or_else(|| bad(path, format!("expected location, got {}", json_kind(value))))?;
    let unsupported: Vec<&str> = object
        .keys()
        .map(String::as_str)
        .filter(|k| *k != "lat" && *k != "lng")
        .collect();
    if !unsupported.is_empty() {
        return Err(bad(
            path,
            format!("Unsupported field names: {}", unsupported.join(", ")),
        ));
    }
    let coordinate = |name: &str| {
        object
            .get(name)
            .and_then(Value::as_f64)
            .ok_or_else(|| bad(path, format!("expected number for {name}")))
    };
    let location = Location {
        lat: coordinate("lat")?,
        lng: coordinate("lng")?,
    };
    if !(-90.0..=90.0).contains(&location.lat) || !(-180.0..=180.0).contains(&location.lng) {
        return Err(bad(path, "location is out of range"));
    }
    Ok(location)
}

fn encode_rich_text(
    path: &str,
    value: &Value,
    collector: &mut EncodeCollector,
) -> Result<Option<Value>> {
    let object = value
        .as_object()
        .ok_or_else(|| bad(path, format!("expected rich text, got {}", json_kind(value))))?;
    let blocks = object
        .get("blocks")
        .and_then(Value::as_array)
        .ok_or_else(|| bad(path, "expected rich text with blocks"))?;
    if blocks.is_empty() {
        return Ok(None);
    }

    for (index, block) in blocks.iter().enumerate() {
        let block_path = format!("{path}.blocks[{index}]");
        let block_type = block
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| bad(&block_path, "block is missing type"))?;
        let data = block.get("data");
        if block_type == RICH_TEXT_ENTITY_BLOCK {
            let reference = data.ok_or_else(|| bad(&block_path, "entity block is missing data"))?;
            let id = parse_reference(&block_path, reference)?;
            collector.references.push(PendingReference {
                path: block_path,
                id,
                entity_types: Vec::new(),
            });
        } else if let Some(text) = data.and_then(|d| d.get("text")).and_then(Value::as_str) {
            if !text.is_empty() {
                collector.full_text.push(text.to_string());
            }
        }
    }
    Ok(Some(value.clone()))
}

fn parse_reference(path: &str, value: &Value) -> Result<Uuid> {
    let object = value.as_object().ok_or_else(|| {
        bad(
            path,
            format!("expected entity reference, got {}", json_kind(value)),
        )
    })?;
    let unsupported: Vec<&str> = object
        .keys()
        .map(String::as_str)
        .filter(|k| *k != "id")
        .collect();
    if !unsupported.is_empty() {
        return Err(bad(
            path,
            format!("Unsupported field names: {}", unsupported.join(", ")),
        ));
    }
    let id = object
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| bad(path, "expected reference id to be a string"))?;
    Uuid::parse_str(id).map_err(|_| bad(path, format!("invalid entity id ({id})")))
}

fn encode_value_type(
    schema: &Schema,
    field: &FieldSpecification,
    path: &str,
    value: &Value,
    collector: &mut EncodeCollector,
) -> Result<Option<Value>> {
    let object = value
        .as_object()
        .ok_or_else(|| bad(path, format!("expected value type, got {}", json_kind(value))))?;
    let type_name = object
        .get(VALUE_TYPE_DISCRIMINANT)
        .and_then(Value::as_str)
        .ok_or_else(|| bad(path, "missing type"))?;
    let spec = schema
        .get_value_type_spec(type_name)
        .ok_or_else(|| bad(path, format!("unknown value type {type_name}")))?;
    if !field.value_types.is_empty() && !field.value_types.iter().any(|t| t == type_name) {
        return Err(bad(path, format!("value type {type_name} is not allowed")));
    }

    let encoded = encode_object(schema, &spec.fields, path, object, true, collector)?;
    if encoded.is_empty() {
        return Ok(None);
    }
    let mut result = Map::new();
    result.insert(
        VALUE_TYPE_DISCRIMINANT.to_string(),
        Value::String(type_name.to_string()),
    );
    result.extend(encoded);
    Ok(Some(Value::Object(result)))
}

/// Decode stored field values into their external shape.
///
/// Every declared field is present in the result; absent values are null.
pub fn decode_fields(
    schema: &Schema,
    fields: &[FieldSpecification],
    encoded: &FieldValues,
) -> Result<FieldValues> {
    if let Some(unknown) = encoded
        .keys()
        .find(|name| !fields.iter().any(|f| &f.name == *name))
    {
        return Err(Error::generic(format!(
            "stored field {unknown} has no field specification"
        )));
    }

    let mut decoded = Map::new();
    for field in fields {
        let value = match encoded.get(&field.name) {
            Some(value) => decode_field(schema, field, value)?,
            None => Value::Null,
        };
        decoded.insert(field.name.clone(), value);
    }
    Ok(decoded)
}

/// Decode one stored field value.
pub fn decode_field(schema: &Schema, field: &FieldSpecification, encoded: &Value) -> Result<Value> {
    match encoded {
        Value::Null => Ok(Value::Null),
        Value::Array(items) if field.list => items
            .iter()
            .map(|item| decode_item(schema, field, item))
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        item => decode_item(schema, field, item),
    }
}

fn decode_item(schema: &Schema, field: &FieldSpecification, encoded: &Value) -> Result<Value> {
    match field.field_type {
        FieldType::EntityType => {
            let id = encoded.as_str().ok_or_else(|| {
                Error::generic(format!("stored reference in {} is not an id", field.name))
            })?;
            Ok(serde_json::json!({ "id": id }))
        }
        FieldType::ValueType => {
            let mut object = encoded.as_object().cloned().ok_or_else(|| {
                Error::generic(format!("stored value in {} is not an object", field.name))
            })?;
            let type_name = match object.remove(VALUE_TYPE_DISCRIMINANT) {
                Some(Value::String(name)) => name,
                _ => {
                    return Err(Error::generic(format!(
                        "stored value in {} has no type",
                        field.name
                    )))
                }
            };
            let spec = schema.get_value_type_spec(&type_name).ok_or_else(|| {
                Error::generic(format!("stored value type {type_name} is not in the schema"))
            })?;
            let mut decoded = decode_fields(schema, &spec.fields, &object)?;
            decoded.insert(VALUE_TYPE_DISCRIMINANT.to_string(), Value::String(type_name));
            Ok(Value::Object(decoded))
        }
        FieldType::String | FieldType::Boolean | FieldType::Location | FieldType::RichText => {
            Ok(encoded.clone())
        }
    }
}

/// Ids referenced by a decoded field value, including nested value types and
/// entity blocks in rich text.
pub fn collect_reference_ids(
    schema: &Schema,
    field: &FieldSpecification,
    decoded: &Value,
) -> Vec<Uuid> {
    let mut ids = Vec::new();
    collect_field_references(schema, field, decoded, &mut ids);
    ids
}

/// Ids referenced by all decoded fields, unique and in first-seen order.
pub fn collect_entity_reference_ids(
    schema: &Schema,
    fields: &[FieldSpecification],
    decoded: &FieldValues,
) -> Vec<Uuid> {
    let mut ids = Vec::new();
    for field in fields {
        if let Some(value) = decoded.get(&field.name) {
            collect_field_references(schema, field, value, &mut ids);
        }
    }
    let mut unique = Vec::with_capacity(ids.len());
    for id in ids {
        if !unique.contains(&id) {
            unique.push(id);
        }
    }
    unique
}

fn collect_field_references(
    schema: &Schema,
    field: &FieldSpecification,
    value: &Value,
    ids: &mut Vec<Uuid>,
) {
    if let Value::Array(items) = value {
        for item in items {
            collect_field_references(schema, field, item, ids);
        }
        return;
    }
    match field.field_type {
        FieldType::EntityType => {
            if let Some(id) = reference_id(value) {
                ids.push(id);
            }
        }
        FieldType::RichText => {
            let blocks = value.get("blocks").and_then(Value::as_array);
            for block in blocks.into_iter().flatten() {
                if block.get("type").and_then(Value::as_str) == Some(RICH_TEXT_ENTITY_BLOCK) {
                    if let Some(id) = block.get("data").and_then(reference_id) {
                        ids.push(id);
                    }
                }
            }
        }
        FieldType::ValueType => {
            let spec = value
                .get(VALUE_TYPE_DISCRIMINANT)
                .and_then(Value::as_str)
                .and_then(|name| schema.get_value_type_spec(name));
            if let (Some(spec), Some(object)) = (spec, value.as_object()) {
                for nested in &spec.fields {
                    if let Some(nested_value) = object.get(&nested.name) {
                        collect_field_references(schema, nested, nested_value, ids);
                    }
                }
            }
        }
        FieldType::String | FieldType::Boolean | FieldType::Location => {}
    }
}

fn reference_id(value: &Value) -> Option<Uuid> {
    value
        .get("id")
        .and_then(Value::as_str)
        .and_then(|id| Uuid::parse_str(id).ok())
}

/// Paths of required fields that are empty, recursing into value types.
pub fn collect_missing_required(
    schema: &Schema,
    fields: &[FieldSpecification],
    path: &str,
    decoded: &FieldValues,
) -> Vec<String> {
    let mut missing = Vec::new();
    for field in fields {
        let field_path = format!("{path}.{}", field.name);
        let value = decoded.get(&field.name).unwrap_or(&Value::Null);
        if value.is_null() {
            if field.required {
                missing.push(field_path);
            }
            continue;
        }
        if field.field_type != FieldType::ValueType {
            continue;
        }
        let items: Vec<(String, &Value)> = match value {
            Value::Array(items) => items
                .iter()
                .enumerate()
                .map(|(i, item)| (format!("{field_path}[{i}]"), item))
                .collect(),
            item => vec![(field_path, item)],
        };
        for (item_path, item) in items {
            let spec = item
                .get(VALUE_TYPE_DISCRIMINANT)
                .and_then(Value::as_str)
                .and_then(|name| schema.get_value_type_spec(name));
            if let (Some(spec), Some(object)) = (spec, item.as_object()) {
                missing.extend(collect_missing_required(
                    schema,
                    &spec.fields,
                    &item_path,
                    object,
                ));
            }
        }
    }
    missing
}
