use chrono::{TimeZone as _, Utc};
use criterion::{criterion_group, criterion_main, Criterion};
use telemetry_metric::{FieldValue, Metric};

fn sample_metric() -> Metric {
    Metric::new(
        "cpu",
        [("host", "server01"), ("region", "us-west"), ("cpu", "cpu-total")],
        [
            ("usage_idle", FieldValue::Float(98.4)),
            ("usage_user", FieldValue::Float(1.2)),
            ("usage_system", FieldValue::Float(0.4)),
            ("processes", FieldValue::Int(312)),
            ("state", FieldValue::String("running".to_owned())),
        ],
        Utc.timestamp_nanos(1_481_032_190_000_000_000),
    )
    .expect("metric should be valid")
}

fn serialize_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("metric");

    let metric = sample_metric();
    group.bench_function("len", |b| b.iter(|| metric.len()));
    group.bench_function("serialize", |b| b.iter(|| metric.serialize()));
    group.bench_function("serialize_to", |b| {
        let mut buf = [0u8; 256];
        b.iter(|| metric.serialize_to(&mut buf))
    });
    group.bench_function("split", |b| b.iter(|| metric.split(64)));
    group.bench_function("hash_id", |b| b.iter(|| metric.hash_id()));
    group.bench_function("add_tag", |b| {
        b.iter(|| {
            let mut m = metric.clone();
            m.add_tag("datacenter", "west");
            m
        })
    });

    group.finish();
}

criterion_group!(benches, serialize_benchmark);
criterion_main!(benches);
