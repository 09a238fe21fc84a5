//! Entity codec and resolver.
//!
//! Turns create and update requests into the full encoded content of the next
//! version, and stored versions back into admin and published entities.

use crate::codec::{decode_fields, encode_fields, EncodeCollector, FieldValues, PendingReference};
use crate::entity::{
    AdminEntity, AdminEntityInfo, EntityCreate, EntityUpdate, PublishedEntity,
    PublishedEntityInfo,
};
use crate::schema::{EntityTypeSpecification, Schema};
use crate::storage::{EntityRow, EntityVersionRow, ReferenceTarget};
use crate::{error::Result, Error};
use serde_json::Value;

const FIELDS_PATH: &str = "entity.fields";

/// Encoded content of a create request.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedEntity {
    pub entity_type: String,
    /// Requested name, taken from the name field when the type has one
    pub name: String,
    pub auth_key: Option<String>,
    pub data: FieldValues,
    pub collector: EncodeCollector,
}

/// Encoded content of the version an update would create.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedUpdate {
    pub name: String,
    pub data: FieldValues,
    pub collector: EncodeCollector,
    /// `false` when neither fields nor name differ from the previous version
    pub changed: bool,
}

fn entity_type_spec<'a>(schema: &'a Schema, entity_type: &str) -> Result<&'a EntityTypeSpecification> {
    schema.get_entity_type_spec(entity_type).ok_or_else(|| {
        Error::bad_request(format!(
            "entity.info.type: Entity type {entity_type} doesn't exist"
        ))
    })
}

/// Value of the type's name field, if it has one and it is set.
fn name_from_fields(spec: &EntityTypeSpecification, data: &FieldValues) -> Option<String> {
    let field = spec.fields.iter().find(|f| f.is_name)?;
    data.get(&field.name)
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Digits in the suffix [`crate::AdminEngine`] appends to a taken name.
pub const NAME_SUFFIX_DIGITS: usize = 8;

/// Strip the `#<8 digits>` uniqueness suffix from a stored name.
pub fn base_name(name: &str) -> &str {
    match name.rsplit_once('#') {
        Some((base, suffix))
            if !base.is_empty()
                && suffix.len() == NAME_SUFFIX_DIGITS
                && suffix.chars().all(|c| c.is_ascii_digit()) =>
        {
            base
        }
        _ => name,
    }
}

/// Encode a create request.
pub fn encode_create(schema: &Schema, create: &EntityCreate) -> Result<EncodedEntity> {
    if create.info.entity_type.is_empty() {
        return Err(Error::bad_request("entity.info.type: Type is required"));
    }
    if create.info.name.is_empty() {
        return Err(Error::bad_request("entity.info.name: Name is required"));
    }
    let spec = entity_type_spec(schema, &create.info.entity_type)?;

    let mut collector = EncodeCollector::default();
    let data = encode_fields(schema, &spec.fields, FIELDS_PATH, &create.fields, &mut collector)?;
    let name = name_from_fields(spec, &data).unwrap_or_else(|| create.info.name.clone());

    Ok(EncodedEntity {
        entity_type: spec.name.clone(),
        name,
        auth_key: create.info.auth_key.clone(),
        data,
        collector,
    })
}

/// Check looked-up targets against the references found while encoding.
///
/// Reports the first reference that is missing or has a type its field
/// doesn't allow.
pub fn resolve_references(pending: &[PendingReference], targets: &[ReferenceTarget]) -> Result<()> {
    for reference in pending {
        let Some(target) = targets.iter().find(|t| t.id == reference.id) else {
            return Err(Error::bad_request(format!(
                "{}: referenced entity ({}) doesn't exist",
                reference.path, reference.id
            )));
        };
        if !reference.entity_types.is_empty()
            && !reference.entity_types.contains(&target.entity_type)
        {
            return Err(Error::bad_request(format!(
                "{}: referenced entity ({}) has an invalid type {}",
                reference.path, reference.id, target.entity_type
            )));
        }
    }
    Ok(())
}

/// Resolve an update against the entity's latest version.
///
/// Fields the update doesn't mention keep their previous value. Type and
/// auth key can't change.
pub fn resolve_update(
    schema: &Schema,
    entity: &EntityRow,
    previous: &EntityVersionRow,
    update: &EntityUpdate,
) -> Result<ResolvedUpdate> {
    if let Some(entity_type) = &update.info.entity_type {
        if entity_type != &entity.entity_type {
            return Err(Error::bad_request(format!(
                "entity.info.type: New type {entity_type} doesn't correspond to previous type {}",
                entity.entity_type
            )));
        }
    }
    if let Some(auth_key) = &update.info.auth_key {
        if auth_key != &entity.auth_key {
            return Err(Error::bad_request(format!(
                "entity.info.authKey: New authKey {auth_key} doesn't correspond to previous authKey {}",
                entity.auth_key
            )));
        }
    }
    if let Some(version) = update.info.version {
        let expected = entity.latest_version + 1;
        if version != expected {
            return Err(Error::bad_request(format!(
                "entity.info.version: The latest version of the entity ({}) is not the expected ({})",
                entity.latest_version,
                version.saturating_sub(1)
            )));
        }
    }

    let spec = entity_type_spec(schema, &entity.entity_type)?;
    let previous_data = previous.data.clone().unwrap_or_default();
    let mut merged = decode_fields(schema, &spec.fields, &previous_data)?;
    for (name, value) in &update.fields {
        merged.insert(name.clone(), value.clone());
    }

    let mut collector = EncodeCollector::default();
    let data = encode_fields(schema, &spec.fields, FIELDS_PATH, &merged, &mut collector)?;

    let name_field_updated = spec
        .fields
        .iter()
        .any(|f| f.is_name && update.fields.contains_key(&f.name));
    let requested_name = if name_field_updated {
        name_from_fields(spec, &data)
    } else {
        None
    }
    .or_else(|| update.info.name.clone());

    let name = match requested_name {
        Some(name) if name != base_name(&entity.name) && name != entity.name => name,
        _ => entity.name.clone(),
    };
    let changed = name != entity.name || previous.data.as_ref() != Some(&data);

    Ok(ResolvedUpdate {
        name,
        data,
        collector,
        changed,
    })
}

fn decode_data(schema: &Schema, entity_type: &str, data: &FieldValues) -> Result<FieldValues> {
    let spec = schema.get_entity_type_spec(entity_type).ok_or_else(|| {
        Error::generic(format!("stored entity type {entity_type} is not in the schema"))
    })?;
    decode_fields(schema, &spec.fields, data)
}

/// Decode a version as an admin entity.
pub fn decode_admin_entity(
    schema: &Schema,
    entity: &EntityRow,
    version: &EntityVersionRow,
) -> Result<AdminEntity> {
    let info = AdminEntityInfo {
        entity_type: entity.entity_type.clone(),
        name: version.name.clone(),
        version: version.version,
        status: entity.status(),
        auth_key: entity.auth_key.clone(),
        created_at: entity.created_at,
        updated_at: entity.updated_at,
    };
    let (deleted, fields) = match &version.data {
        None => (true, FieldValues::new()),
        Some(data) => (false, decode_data(schema, &entity.entity_type, data)?),
    };
    Ok(AdminEntity {
        id: entity.id,
        info,
        deleted,
        fields,
    })
}

/// Decode a version as a published entity.
pub fn decode_published_entity(
    schema: &Schema,
    entity: &EntityRow,
    version: &EntityVersionRow,
) -> Result<PublishedEntity> {
    let data = version.data.as_ref().ok_or_else(|| {
        Error::generic(format!("published version of entity ({}) has no data", entity.id))
    })?;
    Ok(PublishedEntity {
        id: entity.id,
        info: PublishedEntityInfo {
            entity_type: entity.entity_type.clone(),
            name: version.name.clone(),
            auth_key: entity.auth_key.clone(),
            created_at: entity.created_at,
        },
        fields: decode_data(schema, &entity.entity_type, data)?,
    })
}
