// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Snapshot create/restore benchmarks.
//!
//! Measures performance of:
//! - snapshot_create() - full keyspace image serialization
//! - snapshot_restore() - image load back into a fresh keyspace

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use kvengine::config::EngineConfig;
use kvengine::engine::Engine;
use tempfile::TempDir;

fn seeded_engine(keys: usize) -> (TempDir, Engine) {
    let dir = TempDir::new().unwrap();
    let config = EngineConfig::new(dir.path().join("wal.log"), dir.path().join("snapshots"));
    let engine = Engine::open(config).unwrap();
    for i in 0..keys {
        match i % 3 {
            0 => engine.set(format!("k{i}").as_bytes(), format!("v{i}").into_bytes()).unwrap(),
            1 => {
                engine.hset(format!("k{i}").as_bytes(), b"f".to_vec(), format!("v{i}").into_bytes()).unwrap();
            }
            _ => {
                engine.zadd(format!("k{i}").as_bytes(), b"m".to_vec(), i as f64).unwrap();
            }
        }
    }
    (dir, engine)
}

fn bench_snapshot_create(c: &mut Criterion) {
    let mut group = c.benchmark_group("snapshot_create");
    group.sample_size(20);

    for keys in [1_000, 10_000].iter() {
        let (_dir, engine) = seeded_engine(*keys);
        group.bench_with_input(BenchmarkId::from_parameter(keys), keys, |b, _| {
            let mut n = 0u64;
            b.iter(|| {
                let id = format!("bench-{n}");
                n += 1;
                black_box(engine.snapshot_create(Some(&id), true).unwrap());
            });
        });
    }

    group.finish();
}

fn bench_snapshot_restore(c: &mut Criterion) {
    let mut group = c.benchmark_group("snapshot_restore");
    group.sample_size(20);

    for keys in [1_000, 10_000].iter() {
        let (_dir, engine) = seeded_engine(*keys);
        engine.snapshot_create(Some("bench"), true).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(keys), keys, |b, _| {
            b.iter(|| {
                black_box(engine.snapshot_restore(black_box("bench")).unwrap());
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_snapshot_create, bench_snapshot_restore);
criterion_main!(benches);
