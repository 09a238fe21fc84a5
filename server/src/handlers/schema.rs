//! Schema handler - swaps in a freshly loaded schema.

use folio_engine::{Error, Schema, SchemaRegistry};
use serde::Serialize;
use std::path::Path;

use crate::error::Result;

/// Response for a schema reload.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReloadResponse {
    pub entity_types: usize,
    pub value_types: usize,
}

/// Re-read the schema file and make it current. An invalid schema leaves the
/// current one in place.
pub async fn handle_reload(registry: &SchemaRegistry, path: &Path) -> Result<ReloadResponse> {
    let json = tokio::fs::read_to_string(path).await.map_err(|e| {
        Error::generic(format!("failed to read schema {}: {e}", path.display()))
    })?;
    let schema = Schema::from_json(&json)?;
    let response = ReloadResponse {
        entity_types: schema.entity_types.len(),
        value_types: schema.value_types.len(),
    };
    registry.replace(schema)?;
    tracing::info!(
        entity_types = response.entity_types,
        value_types = response.value_types,
        "schema reloaded from {}",
        path.display()
    );
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use folio_engine::{EntityTypeSpecification, ErrorKind, FieldSpecification, FieldType};

    fn registry() -> SchemaRegistry {
        SchemaRegistry::new(Schema::new().with_entity_type(EntityTypeSpecification::new(
            "Foo",
            vec![FieldSpecification::new("title", FieldType::String)],
        )))
        .unwrap()
    }

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("folio-{}-{name}", uuid::Uuid::new_v4()))
    }

    #[tokio::test]
    async fn reload_swaps_schema() {
        let registry = registry();
        let path = temp_path("schema.json");
        let schema = Schema::new()
            .with_entity_type(EntityTypeSpecification::new("Foo", vec![]))
            .with_entity_type(EntityTypeSpecification::new("Bar", vec![]));
        tokio::fs::write(&path, serde_json::to_string(&schema).unwrap())
            .await
            .unwrap();

        let response = handle_reload(&registry, &path).await.unwrap();
        assert_eq!(response.entity_types, 2);
        assert_eq!(registry.current().entity_types.len(), 2);

        tokio::fs::remove_file(&path).await.unwrap();
    }

    #[tokio::test]
    async fn failed_reload_keeps_schema() {
        let registry = registry();

        let missing = handle_reload(&registry, &temp_path("missing.json")).await;
        assert!(matches!(missing, Err(AppError::Engine(ref e)) if e.kind == ErrorKind::Generic));

        let path = temp_path("broken.json");
        tokio::fs::write(&path, "{not json").await.unwrap();
        assert!(handle_reload(&registry, &path).await.is_err());
        assert_eq!(registry.current().entity_types.len(), 1);

        tokio::fs::remove_file(&path).await.unwrap();
    }
}
