//! Publishing state machine tests, run through the clients and the default
//! pipelines over in-memory storage.

use folio_engine::{
    admin_pipeline, published_pipeline, AdminClient, AdminEngine, EntityCreate, EntityStatus,
    EntityTypeSpecification, EntityUpdate, EntityUpsert, EntityVersionReference, ErrorKind,
    FieldSpecification, FieldType, MemoryStorage, MutationEffect, MutationOptions,
    PublishedClient, PublishedEngine, PublishingEffect, PublishingEventKind, Schema,
    SchemaRegistry, Session,
};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

fn create_test_schema() -> Schema {
    Schema::new()
        .with_entity_type(EntityTypeSpecification::new(
            "Foo",
            vec![
                FieldSpecification::new("title", FieldType::String),
                FieldSpecification::new("bar", FieldType::EntityType).entity_types(["Bar"]),
            ],
        ))
        .with_entity_type(EntityTypeSpecification::new(
            "Bar",
            vec![FieldSpecification::new("title", FieldType::String)],
        ))
        .with_entity_type(EntityTypeSpecification::new(
            "Article",
            vec![
                FieldSpecification::new("headline", FieldType::String)
                    .required()
                    .is_name(),
            ],
        ))
}

struct Fixture {
    storage: Arc<MemoryStorage>,
    schema: Arc<SchemaRegistry>,
    admin: AdminClient<Session>,
    published: PublishedClient<Session>,
}

impl Fixture {
    fn new() -> Self {
        let storage = Arc::new(MemoryStorage::new());
        let schema = Arc::new(SchemaRegistry::new(create_test_schema()).unwrap());
        let session = Session::new(Uuid::new_v4());
        let (admin, published) = clients(&storage, &schema, session);
        Self {
            storage,
            schema,
            admin,
            published,
        }
    }

    fn admin_for(&self, session: Session) -> AdminClient<Session> {
        clients(&self.storage, &self.schema, session).0
    }

    async fn create(&self, create: EntityCreate) -> Uuid {
        self.admin
            .create_entity(create, MutationOptions::default())
            .await
            .unwrap()
            .entity
            .id
    }

    async fn status(&self, id: Uuid) -> EntityStatus {
        self.admin.get_entity(id, None).await.unwrap().info.status
    }
}

fn clients(
    storage: &Arc<MemoryStorage>,
    schema: &Arc<SchemaRegistry>,
    session: Session,
) -> (AdminClient<Session>, PublishedClient<Session>) {
    let admin = AdminEngine::new(storage.clone(), schema.clone());
    let published = PublishedEngine::new(storage.clone(), schema.clone());
    (
        AdminClient::new(session.clone(), admin_pipeline(admin)),
        PublishedClient::new(session, published_pipeline(published)),
    )
}

fn bar_ref(id: Uuid) -> serde_json::Value {
    json!({ "id": id.to_string() })
}

fn version_ref(id: Uuid, version: u32) -> EntityVersionReference {
    EntityVersionReference { id, version }
}

// ============================================================================
// Create & Publish
// ============================================================================

#[tokio::test]
async fn create_and_publish_in_one_call() {
    let f = Fixture::new();
    let created = f
        .admin
        .create_entity(
            EntityCreate::new("Foo", "Foo").with_field("title", json!("Title")),
            MutationOptions::publish(),
        )
        .await
        .unwrap();
    assert_eq!(created.effect, MutationEffect::CreatedAndPublished);

    let published = f.published.get_entity(created.entity.id).await.unwrap();
    assert_eq!(published.info.entity_type, "Foo");
    assert_eq!(published.info.name, "Foo");
    assert_eq!(published.fields["title"], json!("Title"));

    let admin = f.admin.get_entity(created.entity.id, None).await.unwrap();
    assert_eq!(admin.info.version, 0);
    assert_eq!(admin.info.status, EntityStatus::Published);
}

#[tokio::test]
async fn draft_is_not_in_published_view() {
    let f = Fixture::new();
    let id = f.create(EntityCreate::new("Bar", "Bar")).await;
    assert_eq!(f.status(id).await, EntityStatus::Draft);

    let err = f.published.get_entity(id).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);
}

#[tokio::test]
async fn caller_supplied_id_collision_is_conflict() {
    let f = Fixture::new();
    let id = Uuid::new_v4();
    f.create(EntityCreate::new("Bar", "Bar").with_id(id)).await;
    let err = f
        .admin
        .create_entity(
            EntityCreate::new("Bar", "Other").with_id(id),
            MutationOptions::default(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Conflict);
}

#[tokio::test]
async fn names_are_made_unique() {
    let f = Fixture::new();
    let first = f.create(EntityCreate::new("Bar", "Same")).await;
    let second = f.create(EntityCreate::new("Bar", "Same")).await;

    let first = f.admin.get_entity(first, None).await.unwrap();
    let second = f.admin.get_entity(second, None).await.unwrap();
    assert_eq!(first.info.name, "Same");
    assert!(second.info.name.starts_with("Same#"));
    assert_eq!(second.info.name.len(), "Same#".len() + 8);
}

#[tokio::test]
async fn missing_reference_is_rejected_on_create() {
    let f = Fixture::new();
    let missing = Uuid::new_v4();
    let err = f
        .admin
        .create_entity(
            EntityCreate::new("Foo", "Foo").with_field("bar", bar_ref(missing)),
            MutationOptions::default(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::BadRequest);
    assert_eq!(
        err.message,
        format!("entity.fields.bar: referenced entity ({missing}) doesn't exist")
    );
}

// ============================================================================
// Reference integrity
// ============================================================================

#[tokio::test]
async fn publishing_with_unpublished_reference_fails() {
    let f = Fixture::new();
    let bar = f.create(EntityCreate::new("Bar", "Bar")).await;
    let foo = f
        .create(EntityCreate::new("Foo", "Foo").with_field("bar", bar_ref(bar)))
        .await;

    let err = f
        .admin
        .publish_entities(vec![version_ref(foo, 0)])
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::BadRequest);
    assert_eq!(
        err.message,
        format!("entity({foo}): References unpublished entities: {bar}")
    );
    assert_eq!(f.status(foo).await, EntityStatus::Draft);
}

#[tokio::test]
async fn publishing_referenced_entity_in_same_batch_succeeds() {
    let f = Fixture::new();
    let bar = f.create(EntityCreate::new("Bar", "Bar")).await;
    let foo = f
        .create(EntityCreate::new("Foo", "Foo").with_field("bar", bar_ref(bar)))
        .await;

    let payloads = f
        .admin
        .publish_entities(vec![version_ref(foo, 0), version_ref(bar, 0)])
        .await
        .unwrap();
    assert!(payloads
        .iter()
        .all(|p| p.effect == PublishingEffect::Published && p.status == EntityStatus::Published));
}

#[tokio::test]
async fn unpublishing_referenced_entity_fails() {
    let f = Fixture::new();
    let bar = f.create(EntityCreate::new("Bar", "Bar")).await;
    let foo = f
        .create(EntityCreate::new("Foo", "Foo").with_field("bar", bar_ref(bar)))
        .await;
    f.admin
        .publish_entities(vec![version_ref(bar, 0), version_ref(foo, 0)])
        .await
        .unwrap();

    let err = f.admin.unpublish_entities(vec![bar]).await.unwrap_err();
    assert_eq!(
        err.message,
        format!("entity({bar}): Published entities referencing entity: {foo}")
    );

    // Unpublishing both together is fine
    let payloads = f.admin.unpublish_entities(vec![bar, foo]).await.unwrap();
    assert_eq!(payloads.len(), 2);
    assert_eq!(f.status(bar).await, EntityStatus::Withdrawn);
    assert_eq!(f.status(foo).await, EntityStatus::Withdrawn);
}

#[tokio::test]
async fn unpublishing_draft_fails() {
    let f = Fixture::new();
    let bar = f.create(EntityCreate::new("Bar", "Bar")).await;
    let err = f.admin.unpublish_entities(vec![bar]).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::BadRequest);
}

#[tokio::test]
async fn duplicate_ids_in_batch() {
    let f = Fixture::new();
    let bar = f.create(EntityCreate::new("Bar", "Bar")).await;
    let err = f
        .admin
        .publish_entities(vec![version_ref(bar, 0), version_ref(bar, 0)])
        .await
        .unwrap_err();
    assert_eq!(err.message, format!("Duplicate ids: {bar}"));

    let err = f.admin.unpublish_entities(vec![bar, bar]).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::BadRequest);
}

#[tokio::test]
async fn batch_fails_as_a_whole() {
    let f = Fixture::new();
    let first = f.create(EntityCreate::new("Bar", "First")).await;
    let second = f.create(EntityCreate::new("Bar", "Second")).await;

    let err = f
        .admin
        .publish_entities(vec![version_ref(first, 0), version_ref(second, 7)])
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);
    assert_eq!(f.status(first).await, EntityStatus::Draft);
    assert!(f
        .admin
        .get_publishing_history(first)
        .await
        .unwrap()
        .events
        .is_empty());
}

#[tokio::test]
async fn required_fields_block_publishing() {
    let f = Fixture::new();
    let id = f.create(EntityCreate::new("Article", "Draft article")).await;
    let err = f
        .admin
        .publish_entities(vec![version_ref(id, 0)])
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::BadRequest);
    assert!(err.message.contains("entity.fields.headline"));
}

// ============================================================================
// Updates
// ============================================================================

#[tokio::test]
async fn identical_update_has_no_effect() {
    let f = Fixture::new();
    let created = f
        .admin
        .create_entity(
            EntityCreate::new("Foo", "Foo").with_field("title", json!("Title")),
            MutationOptions::publish(),
        )
        .await
        .unwrap();

    let updated = f
        .admin
        .update_entity(
            EntityUpdate::new(created.entity.id).with_field("title", json!("Title")),
            MutationOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(updated.effect, MutationEffect::None);
    assert_eq!(updated.entity.info.version, 0);
    assert_eq!(updated.entity.info.status, EntityStatus::Published);
}

#[tokio::test]
async fn changed_update_modifies_then_publish() {
    let f = Fixture::new();
    let created = f
        .admin
        .create_entity(
            EntityCreate::new("Foo", "Foo").with_field("title", json!("Title")),
            MutationOptions::publish(),
        )
        .await
        .unwrap();
    let id = created.entity.id;

    let updated = f
        .admin
        .update_entity(
            EntityUpdate::new(id).with_field("title", json!("Updated title")),
            MutationOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(updated.effect, MutationEffect::Updated);
    assert_eq!(updated.entity.info.version, 1);
    assert_eq!(updated.entity.info.status, EntityStatus::Modified);

    // The published view still shows the old version
    let published = f.published.get_entity(id).await.unwrap();
    assert_eq!(published.fields["title"], json!("Title"));

    let payloads = f
        .admin
        .publish_entities(vec![version_ref(id, 1)])
        .await
        .unwrap();
    assert_eq!(payloads[0].status, EntityStatus::Published);
    let published = f.published.get_entity(id).await.unwrap();
    assert_eq!(published.fields["title"], json!("Updated title"));
}

#[tokio::test]
async fn update_with_publish_on_unchanged_draft_publishes() {
    let f = Fixture::new();
    let id = f
        .create(EntityCreate::new("Foo", "Foo").with_field("title", json!("Title")))
        .await;
    let updated = f
        .admin
        .update_entity(EntityUpdate::new(id), MutationOptions::publish())
        .await
        .unwrap();
    assert_eq!(updated.effect, MutationEffect::Published);
    assert_eq!(updated.entity.info.status, EntityStatus::Published);
    assert_eq!(updated.entity.info.version, 0);
}

#[tokio::test]
async fn changing_type_is_rejected() {
    let f = Fixture::new();
    let id = f.create(EntityCreate::new("Foo", "Foo")).await;
    let mut update = EntityUpdate::new(id);
    update.info.entity_type = Some("Bar".into());
    let err = f
        .admin
        .update_entity(update, MutationOptions::default())
        .await
        .unwrap_err();
    assert_eq!(
        err.message,
        "entity.info.type: New type Bar doesn't correspond to previous type Foo"
    );
}

#[tokio::test]
async fn updating_unknown_entity_is_not_found() {
    let f = Fixture::new();
    let err = f
        .admin
        .update_entity(EntityUpdate::new(Uuid::new_v4()), MutationOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);
}

#[tokio::test]
async fn upsert_creates_then_updates() {
    let f = Fixture::new();
    let id = Uuid::new_v4();
    let upsert = |title: &str| EntityUpsert {
        id,
        info: EntityCreate::new("Foo", "Foo").info,
        fields: json!({ "title": title }).as_object().cloned().unwrap(),
    };

    let first = f
        .admin
        .upsert_entity(upsert("One"), MutationOptions::default())
        .await
        .unwrap();
    assert_eq!(first.effect, MutationEffect::Created);

    let second = f
        .admin
        .upsert_entity(upsert("Two"), MutationOptions::default())
        .await
        .unwrap();
    assert_eq!(second.effect, MutationEffect::Updated);
    assert_eq!(second.entity.info.version, 1);

    let third = f
        .admin
        .upsert_entity(upsert("Two"), MutationOptions::default())
        .await
        .unwrap();
    assert_eq!(third.effect, MutationEffect::None);
}

#[tokio::test]
async fn upsert_without_auth_key_keeps_existing_key() {
    let f = Fixture::new();
    let owner = f.admin_for(Session::new(Uuid::new_v4()).with_auth_keys(["none", "subject"]));
    let id = Uuid::new_v4();
    owner
        .create_entity(
            EntityCreate::new("Foo", "Owned")
                .with_id(id)
                .with_auth_key("subject")
                .with_field("title", json!("A")),
            MutationOptions::default(),
        )
        .await
        .unwrap();

    let updated = owner
        .upsert_entity(
            EntityUpsert {
                id,
                info: EntityCreate::new("Foo", "Owned").info,
                fields: json!({"title": "B"}).as_object().cloned().unwrap(),
            },
            MutationOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(updated.effect, MutationEffect::Updated);
    assert_eq!(updated.entity.info.auth_key, "subject");
    assert_eq!(updated.entity.fields["title"], json!("B"));

    // A new entity still gets the session's default key
    let created = owner
        .upsert_entity(
            EntityUpsert {
                id: Uuid::new_v4(),
                info: EntityCreate::new("Foo", "Fresh").info,
                fields: Default::default(),
            },
            MutationOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(created.effect, MutationEffect::Created);
    assert_eq!(created.entity.info.auth_key, "none");
}

#[tokio::test]
async fn name_field_keeps_name_in_sync() {
    let f = Fixture::new();
    let id = f
        .create(EntityCreate::new("Article", "ignored").with_field("headline", json!("Hello")))
        .await;
    assert_eq!(f.admin.get_entity(id, None).await.unwrap().info.name, "Hello");

    let updated = f
        .admin
        .update_entity(
            EntityUpdate::new(id).with_field("headline", json!("Goodbye")),
            MutationOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(updated.entity.info.name, "Goodbye");
}

// ============================================================================
// Archive & History
// ============================================================================

#[tokio::test]
async fn archiving_twice_records_one_event() {
    let f = Fixture::new();
    let id = f.create(EntityCreate::new("Bar", "Bar")).await;

    let first = f.admin.archive_entity(id).await.unwrap();
    assert_eq!(first.effect, PublishingEffect::Archived);
    assert_eq!(first.status, EntityStatus::Archived);
    let second = f.admin.archive_entity(id).await.unwrap();
    assert_eq!(second.effect, PublishingEffect::None);

    let history = f.admin.get_publishing_history(id).await.unwrap();
    assert_eq!(history.events.len(), 1);
    assert_eq!(history.events[0].kind, PublishingEventKind::Archive);
}

#[tokio::test]
async fn archiving_published_entity_fails() {
    let f = Fixture::new();
    let id = f.create(EntityCreate::new("Bar", "Bar")).await;
    f.admin
        .publish_entities(vec![version_ref(id, 0)])
        .await
        .unwrap();
    let err = f.admin.archive_entity(id).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::BadRequest);
}

#[tokio::test]
async fn unarchive_restores_previous_status() {
    let f = Fixture::new();

    let draft = f.create(EntityCreate::new("Bar", "Draft")).await;
    f.admin.archive_entity(draft).await.unwrap();
    let payload = f.admin.unarchive_entity(draft).await.unwrap();
    assert_eq!(payload.effect, PublishingEffect::Unarchived);
    assert_eq!(payload.status, EntityStatus::Draft);

    let withdrawn = f.create(EntityCreate::new("Bar", "Withdrawn")).await;
    f.admin
        .publish_entities(vec![version_ref(withdrawn, 0)])
        .await
        .unwrap();
    f.admin.unpublish_entities(vec![withdrawn]).await.unwrap();
    f.admin.archive_entity(withdrawn).await.unwrap();
    let payload = f.admin.unarchive_entity(withdrawn).await.unwrap();
    assert_eq!(payload.status, EntityStatus::Withdrawn);
}

#[tokio::test]
async fn unarchiving_active_entity_is_noop() {
    let f = Fixture::new();
    let id = f.create(EntityCreate::new("Bar", "Bar")).await;
    let payload = f.admin.unarchive_entity(id).await.unwrap();
    assert_eq!(payload.effect, PublishingEffect::None);
    assert_eq!(payload.status, EntityStatus::Draft);
    assert!(f
        .admin
        .get_publishing_history(id)
        .await
        .unwrap()
        .events
        .is_empty());

    let err = f.admin.unarchive_entity(Uuid::new_v4()).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);
}

#[tokio::test]
async fn publishing_archived_entity_unarchives_it() {
    let f = Fixture::new();
    let id = f.create(EntityCreate::new("Bar", "Bar")).await;
    f.admin.archive_entity(id).await.unwrap();
    let payloads = f
        .admin
        .publish_entities(vec![version_ref(id, 0)])
        .await
        .unwrap();
    assert_eq!(payloads[0].status, EntityStatus::Published);
}

#[tokio::test]
async fn entity_history_lists_versions() {
    let f = Fixture::new();
    let id = f
        .create(EntityCreate::new("Foo", "Foo").with_field("title", json!("One")))
        .await;
    f.admin
        .update_entity(
            EntityUpdate::new(id).with_field("title", json!("Two")),
            MutationOptions::publish(),
        )
        .await
        .unwrap();

    let history = f.admin.get_entity_history(id).await.unwrap();
    assert_eq!(history.entity_type, "Foo");
    let versions: Vec<(u32, bool)> = history
        .versions
        .iter()
        .map(|v| (v.version, v.published))
        .collect();
    assert_eq!(versions, vec![(0, false), (1, true)]);
    assert_eq!(history.versions[0].created_by, f.admin.context().subject_id);

    let old = f.admin.get_entity(id, Some(0)).await.unwrap();
    assert_eq!(old.fields["title"], json!("One"));
    let err = f.admin.get_entity(id, Some(5)).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);
}

#[tokio::test]
async fn publishing_history_is_append_only() {
    let f = Fixture::new();
    let id = f.create(EntityCreate::new("Bar", "Bar")).await;
    f.admin
        .publish_entities(vec![version_ref(id, 0)])
        .await
        .unwrap();
    // Re-publishing the published version changes nothing
    let payloads = f
        .admin
        .publish_entities(vec![version_ref(id, 0)])
        .await
        .unwrap();
    assert_eq!(payloads[0].effect, PublishingEffect::None);
    f.admin.unpublish_entities(vec![id]).await.unwrap();

    let kinds: Vec<(PublishingEventKind, Option<u32>)> = f
        .admin
        .get_publishing_history(id)
        .await
        .unwrap()
        .events
        .iter()
        .map(|e| (e.kind, e.version))
        .collect();
    assert_eq!(
        kinds,
        vec![
            (PublishingEventKind::Publish, Some(0)),
            (PublishingEventKind::Unpublish, None)
        ]
    );
}

#[tokio::test]
async fn deleted_draft_is_marked() {
    let f = Fixture::new();
    let id = f
        .create(EntityCreate::new("Foo", "Foo").with_field("title", json!("Title")))
        .await;
    let payload = f.admin.delete_entity(id).await.unwrap();
    assert_eq!(payload.effect, PublishingEffect::Deleted);

    let entity = f.admin.get_entity(id, None).await.unwrap();
    assert!(entity.deleted);
    assert_eq!(entity.info.version, 1);
    assert!(entity.fields.is_empty());

    let err = f
        .admin
        .update_entity(EntityUpdate::new(id), MutationOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);
    let err = f
        .admin
        .publish_entities(vec![version_ref(id, 1)])
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::BadRequest);
}

// ============================================================================
// Auth keys
// ============================================================================

#[tokio::test]
async fn auth_keys_guard_entities() {
    let f = Fixture::new();
    let owner = f.admin_for(Session::new(Uuid::new_v4()).with_auth_keys(["none", "secret"]));
    let id = owner
        .create_entity(
            EntityCreate::new("Bar", "Secret").with_auth_key("secret"),
            MutationOptions::default(),
        )
        .await
        .unwrap()
        .entity
        .id;
    assert_eq!(owner.get_entity(id, None).await.unwrap().info.auth_key, "secret");

    let err = f.admin.get_entity(id, None).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotAuthorized);
    assert_eq!(err.message, "Wrong authKey provided");

    let err = f
        .admin
        .create_entity(
            EntityCreate::new("Bar", "Nope").with_auth_key("secret"),
            MutationOptions::default(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotAuthorized);
}
