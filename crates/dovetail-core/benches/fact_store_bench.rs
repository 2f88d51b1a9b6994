use criterion::{BatchSize, BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use dovetail_core::{
    Deftemplate, FactStore, FactValue, FieldTest, Pattern, PatternElement, SlotDefinition, SlotPattern,
};
use std::time::Duration;

const COLORS: [&str; 8] = ["red", "green", "blue", "cyan", "magenta", "yellow", "black", "white"];

fn reading_store() -> FactStore {
    let mut store = FactStore::default();
    store
        .define_template(
            Deftemplate::new("reading")
                .with_slot(SlotDefinition::single("sensor"))
                .with_slot(SlotDefinition::single("color"))
                .with_slot(SlotDefinition::single("value")),
        )
        .unwrap();
    store
}

fn assert_readings(store: &mut FactStore, count: usize) {
    for i in 0..count {
        let fact = store.create_fact("reading").unwrap();
        store.put_slot(fact, "sensor", FactValue::Integer(i as i64)).unwrap();
        store.put_slot(fact, "color", FactValue::symbol(COLORS[i % COLORS.len()])).unwrap();
        store.put_slot(fact, "value", FactValue::Float(i as f64 * 0.5)).unwrap();
        store.assert_fact(fact).unwrap();
    }
}

fn bench_assert_retract(c: &mut Criterion) {
    let mut group = c.benchmark_group("fact_lifecycle");
    group.measurement_time(Duration::from_secs(10));
    group.sample_size(20);

    for size in [1_000, 10_000, 50_000].iter() {
        group.bench_with_input(BenchmarkId::new("assert", size), size, |b, &size| {
            b.iter_batched(
                reading_store,
                |mut store| {
                    assert_readings(&mut store, size);
                    black_box(store.fact_count())
                },
                BatchSize::LargeInput,
            );
        });

        group.bench_with_input(BenchmarkId::new("assert_then_clear", size), size, |b, &size| {
            b.iter_batched(
                reading_store,
                |mut store| {
                    assert_readings(&mut store, size);
                    black_box(store.clear().unwrap())
                },
                BatchSize::LargeInput,
            );
        });
    }
    group.finish();
}

fn bench_modify(c: &mut Criterion) {
    let mut group = c.benchmark_group("fact_modify");
    group.sample_size(20);

    for size in [1_000, 10_000].iter() {
        group.bench_with_input(BenchmarkId::new("modify_every_fact", size), size, |b, &size| {
            b.iter_batched(
                || {
                    let mut store = reading_store();
                    assert_readings(&mut store, size);
                    store
                },
                |mut store| {
                    let handles: Vec<_> = store.facts().map(|(handle, _)| handle).collect();
                    for (n, handle) in handles.into_iter().enumerate() {
                        store.modify(handle, &[(2, FactValue::Float(-(n as f64)))]).unwrap();
                    }
                    black_box(store.fact_count())
                },
                BatchSize::LargeInput,
            );
        });
    }
    group.finish();
}

fn bench_pattern_matching(c: &mut Criterion) {
    let mut group = c.benchmark_group("pattern_matching");
    group.sample_size(20);

    // one constant test per color shares a single hashed selector
    group.bench_function("selector_dispatch_10k", |b| {
        b.iter_batched(
            || {
                let mut store = reading_store();
                let id = store.templates().find("reading").unwrap();
                for color in COLORS {
                    let pattern = Pattern::new(id)
                        .slot(SlotPattern::single(1, FieldTest::Constant(FactValue::symbol(color))));
                    store.add_pattern(&pattern, color).unwrap();
                }
                store
            },
            |mut store| {
                assert_readings(&mut store, 10_000);
                black_box(store.alpha_memory().map(|memory| memory.live_matches()))
            },
            BatchSize::LargeInput,
        );
    });

    for width in [4, 16, 64].iter() {
        group.bench_with_input(BenchmarkId::new("two_multifields", width), width, |b, &width| {
            b.iter_batched(
                || {
                    let mut store = FactStore::default();
                    let list = store.templates_mut().implied_template("list").unwrap();
                    let pattern = Pattern::new(list).slot(SlotPattern::sequence(
                        0,
                        vec![
                            PatternElement::Multi(FieldTest::Any),
                            PatternElement::Single(FieldTest::Constant(FactValue::Integer(0))),
                            PatternElement::Multi(FieldTest::Any),
                        ],
                    ));
                    store.add_pattern(&pattern, "zero-anywhere").unwrap();
                    store
                },
                |mut store| {
                    for n in 0..200 {
                        let values = (0..width).map(|i| FactValue::Integer(((i + n) % 5) as i64)).collect();
                        store.assert_ordered("list", values).unwrap();
                    }
                    black_box(store.fact_count())
                },
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

criterion_group!(benches, bench_assert_retract, bench_modify, bench_pattern_matching);
criterion_main!(benches);
