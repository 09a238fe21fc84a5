//! Schema definition and validation.
//!
//! A schema declares entity types (top-level, versioned records) and value
//! types (nested structured values). Every field carries a [`FieldType`] tag
//! which drives the codec.

use crate::{error::Result, Error};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

/// Name of the discriminant key of value type values.
pub const VALUE_TYPE_DISCRIMINANT: &str = "type";

/// Field types supported in schemas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldType {
    String,
    Boolean,
    Location,
    RichText,
    /// Reference to another entity
    EntityType,
    /// Nested value type
    ValueType,
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldType::String => write!(f, "String"),
            FieldType::Boolean => write!(f, "Boolean"),
            FieldType::Location => write!(f, "Location"),
            FieldType::RichText => write!(f, "RichText"),
            FieldType::EntityType => write!(f, "EntityType"),
            FieldType::ValueType => write!(f, "ValueType"),
        }
    }
}

/// Definition of a field in an entity or value type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldSpecification {
    /// Field name
    pub name: String,
    /// Field type
    #[serde(rename = "type")]
    pub field_type: FieldType,
    /// Whether the field holds a list of values
    #[serde(default)]
    pub list: bool,
    /// Whether the field must be non-empty for the entity to be published
    #[serde(default)]
    pub required: bool,
    /// Whether the field value doubles as the entity name
    #[serde(default)]
    pub is_name: bool,
    /// Allowed referenced entity types, empty means any
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entity_types: Vec<String>,
    /// Allowed value types, empty means any
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub value_types: Vec<String>,
}

impl FieldSpecification {
    /// Create a single-valued optional field.
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            list: false,
            required: false,
            is_name: false,
            entity_types: Vec::new(),
            value_types: Vec::new(),
        }
    }

    pub fn list(mut self) -> Self {
        self.list = true;
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn is_name(mut self) -> Self {
        self.is_name = true;
        self
    }

    /// Restrict referenced entity types.
    pub fn entity_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.entity_types = types.into_iter().map(Into::into).collect();
        self
    }

    /// Restrict allowed value types.
    pub fn value_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.value_types = types.into_iter().map(Into::into).collect();
        self
    }
}

/// Schema for an entity type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityTypeSpecification {
    pub name: String,
    pub fields: Vec<FieldSpecification>,
}

impl EntityTypeSpecification {
    pub fn new(name: impl Into<String>, fields: Vec<FieldSpecification>) -> Self {
        Self {
            name: name.into(),
            fields,
        }
    }

    pub fn get_field_spec(&self, name: &str) -> Option<&FieldSpecification> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// Schema for a value type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueTypeSpecification {
    pub name: String,
    pub fields: Vec<FieldSpecification>,
}

impl ValueTypeSpecification {
    pub fn new(name: impl Into<String>, fields: Vec<FieldSpecification>) -> Self {
        Self {
            name: name.into(),
            fields,
        }
    }

    pub fn get_field_spec(&self, name: &str) -> Option<&FieldSpecification> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// The whole schema: entity types and value types.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schema {
    #[serde(default)]
    pub entity_types: Vec<EntityTypeSpecification>,
    #[serde(default)]
    pub value_types: Vec<ValueTypeSpecification>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style method to add an entity type.
    pub fn with_entity_type(mut self, spec: EntityTypeSpecification) -> Self {
        self.entity_types.push(spec);
        self
    }

    /// Builder-style method to add a value type.
    pub fn with_value_type(mut self, spec: ValueTypeSpecification) -> Self {
        self.value_types.push(spec);
        self
    }

    pub fn get_entity_type_spec(&self, name: &str) -> Option<&EntityTypeSpecification> {
        self.entity_types.iter().find(|t| t.name == name)
    }

    pub fn get_value_type_spec(&self, name: &str) -> Option<&ValueTypeSpecification> {
        self.value_types.iter().find(|t| t.name == name)
    }

    /// Parse and validate a schema from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let schema: Schema = serde_json::from_str(json)
            .map_err(|e| Error::bad_request(format!("invalid schema: {e}")))?;
        schema.validate()?;
        Ok(schema)
    }

    /// Read, parse and validate a schema file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            Error::generic(format!("failed to read schema {}: {e}", path.display()))
        })?;
        Self::from_json(&json)
    }

    /// Check the schema for internal consistency.
    pub fn validate(&self) -> Result<()> {
        let mut type_names = HashSet::new();
        let entity_names: HashSet<&str> =
            self.entity_types.iter().map(|t| t.name.as_str()).collect();
        let value_names: HashSet<&str> = self.value_types.iter().map(|t| t.name.as_str()).collect();

        let all_types = self
            .entity_types
            .iter()
            .map(|t| (&t.name, &t.fields, false))
            .chain(self.value_types.iter().map(|t| (&t.name, &t.fields, true)));

        for (type_name, fields, is_value_type) in all_types {
            if type_name.is_empty() {
                return Err(Error::bad_request("schema: type name is empty"));
            }
            if !type_names.insert(type_name.as_str()) {
                return Err(Error::bad_request(format!(
                    "schema: duplicate type name {type_name}"
                )));
            }

            let mut field_names = HashSet::new();
            let mut name_fields = 0;
            for field in fields {
                let path = format!("{type_name}.{}", field.name);
                if !field_names.insert(field.name.as_str()) {
                    return Err(Error::bad_request(format!("{path}: duplicate field name")));
                }
                if is_value_type && field.name == VALUE_TYPE_DISCRIMINANT {
                    return Err(Error::bad_request(format!(
                        "{path}: field name is reserved in value types"
                    )));
                }
                if !field.entity_types.is_empty() && field.field_type != FieldType::EntityType {
                    return Err(Error::bad_request(format!(
                        "{path}: entityTypes is only allowed on EntityType fields"
                    )));
                }
                if !field.value_types.is_empty() && field.field_type != FieldType::ValueType {
                    return Err(Error::bad_request(format!(
                        "{path}: valueTypes is only allowed on ValueType fields"
                    )));
                }
                if let Some(missing) = field
                    .entity_types
                    .iter()
                    .find(|t| !entity_names.contains(t.as_str()))
                {
                    return Err(Error::bad_request(format!(
                        "{path}: referenced entity type {missing} doesn't exist"
                    )));
                }
                if let Some(missing) = field
                    .value_types
                    .iter()
                    .find(|t| !value_names.contains(t.as_str()))
                {
                    return Err(Error::bad_request(format!(
                        "{path}: referenced value type {missing} doesn't exist"
                    )));
                }
                if field.is_name {
                    if field.field_type != FieldType::String || field.list {
                        return Err(Error::bad_request(format!(
                            "{path}: isName is only allowed on single String fields"
                        )));
                    }
                    name_fields += 1;
                }
            }
            if name_fields > 1 {
                return Err(Error::bad_request(format!(
                    "{type_name}: only one field can be the name field"
                )));
            }
        }

        Ok(())
    }
}

/// Holds the schema currently in effect.
///
/// Readers take an `Arc<Schema>` snapshot per request, so a request sees one
/// schema from start to end. [`SchemaRegistry::replace`] is the only way to
/// change it.
#[derive(Debug)]
pub struct SchemaRegistry {
    current: RwLock<Arc<Schema>>,
}

impl SchemaRegistry {
    /// Create a registry, validating the initial schema.
    pub fn new(schema: Schema) -> Result<Self> {
        schema.validate()?;
        Ok(Self {
            current: RwLock::new(Arc::new(schema)),
        })
    }

    /// Snapshot of the current schema.
    pub fn current(&self) -> Arc<Schema> {
        self.current.read().clone()
    }

    /// Swap in a new schema after validating it.
    pub fn replace(&self, schema: Schema) -> Result<()> {
        schema.validate()?;
        let mut current = self.current.write();
        *current = Arc::new(schema);
        tracing::info!(
            entity_types = current.entity_types.len(),
            value_types = current.value_types.len(),
            "schema replaced"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_schema() -> Schema {
        Schema::new()
            .with_entity_type(EntityTypeSpecification::new(
                "Foo",
                vec![
                    FieldSpecification::new("title", FieldType::String).is_name(),
                    FieldSpecification::new("bar", FieldType::EntityType).entity_types(["Bar"]),
                    FieldSpecification::new("nested", FieldType::ValueType)
                        .value_types(["Nested"]),
                ],
            ))
            .with_entity_type(EntityTypeSpecification::new(
                "Bar",
                vec![FieldSpecification::new("title", FieldType::String)],
            ))
            .with_value_type(ValueTypeSpecification::new(
                "Nested",
                vec![FieldSpecification::new("text", FieldType::String)],
            ))
    }

    #[test]
    fn lookups() {
        let schema = test_schema();
        let foo = schema.get_entity_type_spec("Foo").unwrap();
        assert_eq!(
            foo.get_field_spec("bar").unwrap().field_type,
            FieldType::EntityType
        );
        assert!(foo.get_field_spec("missing").is_none());
        assert!(schema.get_entity_type_spec("Nested").is_none());
        assert!(schema.get_value_type_spec("Nested").is_some());
    }

    #[test]
    fn valid_schema() {
        assert!(test_schema().validate().is_ok());
    }

    #[test]
    fn duplicate_type_name() {
        let schema = test_schema().with_value_type(ValueTypeSpecification::new("Foo", vec![]));
        let err = schema.validate().unwrap_err();
        assert_eq!(err.message, "schema: duplicate type name Foo");
    }

    #[test]
    fn unknown_referenced_type() {
        let schema = Schema::new().with_entity_type(EntityTypeSpecification::new(
            "Foo",
            vec![FieldSpecification::new("bar", FieldType::EntityType).entity_types(["Bar"])],
        ));
        let err = schema.validate().unwrap_err();
        assert_eq!(
            err.message,
            "Foo.bar: referenced entity type Bar doesn't exist"
        );
    }

    #[test]
    fn reserved_value_type_field() {
        let schema = Schema::new().with_value_type(ValueTypeSpecification::new(
            "Nested",
            vec![FieldSpecification::new("type", FieldType::String)],
        ));
        assert!(schema.validate().is_err());
    }

    #[test]
    fn name_field_must_be_single_string() {
        let schema = Schema::new().with_entity_type(EntityTypeSpecification::new(
            "Foo",
            vec![FieldSpecification::new("flag", FieldType::Boolean).is_name()],
        ));
        assert!(schema.validate().is_err());
    }

    #[test]
    fn schema_json_roundtrip() {
        let schema = test_schema();
        let json = serde_json::to_string(&schema).unwrap();
        assert!(json.contains(r#""type":"EntityType""#));
        let parsed = Schema::from_json(&json).unwrap();
        assert_eq!(schema, parsed);
    }

    #[test]
    fn registry_replace_validates() {
        let registry = SchemaRegistry::new(test_schema()).unwrap();
        let before = registry.current();

        let broken = Schema::new().with_entity_type(EntityTypeSpecification::new(
            "Foo",
            vec![FieldSpecification::new("bar", FieldType::EntityType).entity_types(["Nope"])],
        ));
        assert!(registry.replace(broken).is_err());
        assert_eq!(*registry.current(), *before);

        registry.replace(Schema::new()).unwrap();
        assert!(registry.current().entity_types.is_empty());
        // Snapshots taken before the swap are unaffected
        assert_eq!(before.entity_types.len(), 2);
    }
}
