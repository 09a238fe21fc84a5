//! Performance benchmarks for folio-engine

use folio_engine::codec::{decode_fields, encode_fields, EncodeCollector};
use folio_engine::{
    from_opaque_cursor, to_opaque_cursor, AdminEngine, CursorKey, CursorKind, EntityCreate,
    EntityQuery, EntityTypeSpecification, FieldSpecification, FieldType, MemoryStorage,
    MutationOptions, Paging, Schema, SchemaRegistry, Session, ValueTypeSpecification,
};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

fn create_test_schema() -> Schema {
    Schema::new()
        .with_entity_type(EntityTypeSpecification::new(
            "Article",
            vec![
                FieldSpecification::new("title", FieldType::String).is_name(),
                FieldSpecification::new("tags", FieldType::String).list(),
                FieldSpecification::new("location", FieldType::Location),
                FieldSpecification::new("body", FieldType::RichText),
                FieldSpecification::new("author", FieldType::ValueType).value_types(["Person"]),
            ],
        ))
        .with_value_type(ValueTypeSpecification::new(
            "Person",
            vec![
                FieldSpecification::new("name", FieldType::String).required(),
                FieldSpecification::new("email", FieldType::String),
            ],
        ))
}

fn article_fields() -> serde_json::Map<String, serde_json::Value> {
    json!({
        "title": "A day at the harbour",
        "tags": ["travel", "sea", "summer"],
        "location": {"lat": 59.32, "lng": 18.07},
        "body": {"blocks": [
            {"type": "paragraph", "data": {"text": "Boats everywhere."}},
            {"type": "paragraph", "data": {"text": "Then it rained."}}
        ]},
        "author": {"type": "Person", "name": "Test User", "email": "test@example.com"}
    })
    .as_object()
    .cloned()
    .unwrap()
}

fn bench_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec");
    let schema = create_test_schema();
    let spec = schema.get_entity_type_spec("Article").unwrap();
    let fields = article_fields();

    group.bench_function("encode_fields", |b| {
        b.iter(|| {
            let mut collector = EncodeCollector::default();
            encode_fields(
                &schema,
                &spec.fields,
                "entity.fields",
                black_box(&fields),
                &mut collector,
            )
        })
    });

    let mut collector = EncodeCollector::default();
    let encoded = encode_fields(&schema, &spec.fields, "entity.fields", &fields, &mut collector)
        .unwrap();
    group.bench_function("decode_fields", |b| {
        b.iter(|| decode_fields(&schema, &spec.fields, black_box(&encoded)))
    });

    group.finish();
}

fn bench_cursors(c: &mut Criterion) {
    let mut group = c.benchmark_group("cursors");

    group.bench_function("int_cursor_roundtrip", |b| {
        b.iter(|| {
            let cursor = to_opaque_cursor(black_box(&CursorKey::Int(1_234_567)));
            from_opaque_cursor(CursorKind::Int, &cursor)
        })
    });

    group.bench_function("string_cursor_roundtrip", |b| {
        b.iter(|| {
            let cursor = to_opaque_cursor(black_box(&CursorKey::String("Some entity name".into())));
            from_opaque_cursor(CursorKind::String, &cursor)
        })
    });

    group.finish();
}

fn populated_engine(rt: &tokio::runtime::Runtime, count: usize) -> (AdminEngine, Session) {
    let engine = AdminEngine::new(
        Arc::new(MemoryStorage::new()),
        Arc::new(SchemaRegistry::new(create_test_schema()).unwrap()),
    );
    let session = Session::new(Uuid::new_v4());
    rt.block_on(async {
        for i in 0..count {
            let mut create = EntityCreate::new("Article", "Article");
            create.fields = article_fields();
            create
                .fields
                .insert("title".into(), json!(format!("Article {i}")));
            engine
                .create_entity(&session, create, MutationOptions::default())
                .await
                .unwrap();
        }
    });
    (engine, session)
}

fn bench_admin_engine(c: &mut Criterion) {
    let mut group = c.benchmark_group("admin_engine");
    let rt = tokio::runtime::Runtime::new().unwrap();

    group.bench_function("create_entity", |b| {
        let (engine, session) = populated_engine(&rt, 0);
        b.to_async(&rt).iter(|| {
            let mut create = EntityCreate::new("Article", "Article");
            create.fields = article_fields();
            let engine = &engine;
            let session = &session;
            async move {
                engine
                    .create_entity(session, black_box(create), MutationOptions::publish())
                    .await
            }
        })
    });

    for size in [100usize, 1000] {
        let (engine, session) = populated_engine(&rt, size);

        group.bench_with_input(BenchmarkId::new("search_first_page", size), &size, |b, _| {
            b.to_async(&rt).iter(|| {
                let engine = &engine;
                let session = &session;
                async move {
                    engine
                        .search_entities(session, &EntityQuery::new(), &Paging::first(25))
                        .await
                }
            })
        });

        group.bench_with_input(BenchmarkId::new("search_text", size), &size, |b, _| {
            let query = EntityQuery::new().with_text("harbour");
            b.to_async(&rt).iter(|| {
                let engine = &engine;
                let session = &session;
                let query = &query;
                async move {
                    engine
                        .search_entities(session, query, &Paging::first(25))
                        .await
                }
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_codec, bench_cursors, bench_admin_engine);
criterion_main!(benches);
