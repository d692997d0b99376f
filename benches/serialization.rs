use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde_json::json;
use tx2_share::{
    encode_create, share, BinaryFormat, BinarySerializer, CommitScheduler, SchemaRegistry,
    SharedInstance, UpdateOfShared,
};

fn create_registry() -> SchemaRegistry {
    let registry = SchemaRegistry::new();
    registry
        .define_schema_json("Position", &json!({ "x": "number", "y": "number", "z": "number" }))
        .unwrap();
    registry
        .define_schema_json(
            "Entity",
            &json!({ "name": "string", "active": "bool", "pos": "Position" }),
        )
        .unwrap();
    registry.assign_identities().unwrap();
    registry
}

fn create_entities(registry: &SchemaRegistry, count: usize) -> Vec<SharedInstance> {
    (0..count)
        .map(|i| {
            registry
                .plain(
                    "Entity",
                    &json!({
                        "name": format!("Entity_{}", i),
                        "active": i % 2 == 0,
                        "pos": { "x": i as f64, "y": 0.0, "z": -(i as f64) },
                    }),
                )
                .unwrap()
        })
        .collect()
}

fn write_all(registry: &SchemaRegistry, entities: &[SharedInstance], step: f64) {
    for entity in entities {
        let pos = entity.get("pos").unwrap().as_shared().cloned().unwrap();
        pos.set(registry, "x", step).unwrap();
        pos.set(registry, "y", step * 2.0).unwrap();
        entity.set(registry, "active", step as i64 % 2 == 0).unwrap();
    }
}

fn capture_update(registry: &SchemaRegistry, count: usize) -> UpdateOfShared {
    let scheduler = CommitScheduler::new();
    let captured = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
    let sink = captured.clone();
    let observer = scheduler.observer(move |compact, _| {
        *sink.borrow_mut() = compact.clone();
        Ok(())
    });

    let entities = create_entities(registry, count);
    for entity in &entities {
        share(registry, entity, &observer).unwrap();
    }
    write_all(registry, &entities, 1.0);
    scheduler.run_tick().unwrap();

    let update = captured.borrow().clone();
    update
}

fn benchmark_commit(c: &mut Criterion) {
    let registry = create_registry();
    let mut group = c.benchmark_group("commit");

    for count in [10, 100, 1000] {
        let scheduler = CommitScheduler::new();
        let observer = scheduler.observer(|compact, _| {
            black_box(compact);
            Ok(())
        });
        let entities = create_entities(&registry, count);
        for entity in &entities {
            share(&registry, entity, &observer).unwrap();
        }

        group.throughput(Throughput::Elements(count as u64 * 3));
        group.bench_with_input(BenchmarkId::new("write_and_flush", count), &count, |b, _| {
            let mut step = 0.0;
            b.iter(|| {
                step += 1.0;
                write_all(&registry, &entities, step);
                black_box(scheduler.run_tick().unwrap());
            });
        });
    }

    group.finish();
}

fn benchmark_snapshot(c: &mut Criterion) {
    let registry = create_registry();
    let entities = create_entities(&registry, 100);
    let scheduler = CommitScheduler::new();
    let observer = scheduler.observer(|_, _| Ok(()));
    for entity in &entities {
        share(&registry, entity, &observer).unwrap();
    }

    c.bench_function("encode_create/100", |b| {
        b.iter(|| {
            for entity in &entities {
                black_box(encode_create(entity).unwrap());
            }
        });
    });
}

fn benchmark_serialization_formats(c: &mut Criterion) {
    let registry = create_registry();
    let update = capture_update(&registry, 100);

    let mut group = c.benchmark_group("serialization_formats");

    for format in [BinaryFormat::Json, BinaryFormat::MessagePack] {
        let serializer = BinarySerializer::new(format);
        let data = serializer.serialize_update(&update).unwrap();
        group.throughput(Throughput::Bytes(data.len() as u64));

        group.bench_with_input(
            BenchmarkId::new("serialize_update", format.name()),
            &serializer,
            |b, serializer| {
                b.iter(|| black_box(serializer.serialize_update(&update).unwrap()));
            },
        );

        group.bench_with_input(
            BenchmarkId::new("deserialize_update", format.name()),
            &serializer,
            |b, serializer| {
                b.iter(|| black_box(serializer.deserialize_update(&data).unwrap()));
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    benchmark_commit,
    benchmark_snapshot,
    benchmark_serialization_formats,
);
criterion_main!(benches);
