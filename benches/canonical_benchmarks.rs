//! Benchmarks for canonicalization and digest computation

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use nyx_evidence::canonical::{canonical_digest, canonicalize, digest};
use serde_json::{json, Value};

fn wide_payload(fields: usize) -> Value {
    let mut map = serde_json::Map::new();
    for i in 0..fields {
        map.insert(format!("field_{i:04}"), json!(i as u64 * 31));
    }
    Value::Object(map)
}

fn nested_payload(depth: usize) -> Value {
    let mut value = json!({"leaf": "end"});
    for i in 0..depth {
        value = json!({"level": i, "inner": value, "tag": format!("d{i}")});
    }
    value
}

fn bench_canonicalize(c: &mut Criterion) {
    let wide = wide_payload(128);
    let nested = nested_payload(16);

    c.bench_function("canonicalize_wide_object", |b| {
        b.iter(|| canonicalize(black_box(&wide)).unwrap())
    });
    c.bench_function("canonicalize_nested_object", |b| {
        b.iter(|| canonicalize(black_box(&nested)).unwrap())
    });
}

fn bench_digest(c: &mut Criterion) {
    let payload = wide_payload(128);
    let bytes = canonicalize(&payload).unwrap();

    c.bench_function("digest_canonical_bytes", |b| {
        b.iter(|| digest(black_box(&bytes)))
    });
    c.bench_function("canonical_digest_end_to_end", |b| {
        b.iter(|| canonical_digest(black_box(&payload)).unwrap())
    });
}

criterion_group!(benches, bench_canonicalize, bench_digest);
criterion_main!(benches);
