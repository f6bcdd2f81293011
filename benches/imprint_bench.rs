//! Performance benchmarks for imprint generation
//!
//! Tracks fingerprint throughput for stream hashing and end-to-end tree
//! imprinting with varying file counts.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use datimprint::generator::GeneratorBuilder;
use datimprint::hash;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fs;
use std::hint::black_box;
use std::io::Cursor;
use std::time::Duration;
use tempfile::TempDir;

/// Benchmark stream hashing across content sizes
fn bench_stream_hash(c: &mut Criterion) {
    let mut group = c.benchmark_group("stream_hash");
    group.measurement_time(Duration::from_secs(2));

    for size in [4 * 1024, 256 * 1024, 4 * 1024 * 1024].iter() {
        let mut rng = StdRng::seed_from_u64(42);
        let data: Vec<u8> = (0..*size).map(|_| rng.gen()).collect();
        group.bench_with_input(BenchmarkId::from_parameter(size), &data, |b, data| {
            b.iter(|| hash::hash_reader(Cursor::new(black_box(data))).unwrap());
        });
    }
    group.finish();
}

/// Benchmark whole-tree imprint generation with varying file counts
fn bench_tree_imprint(c: &mut Criterion) {
    let mut group = c.benchmark_group("tree_imprint");
    group.measurement_time(Duration::from_secs(3));
    group.sample_size(20);

    for file_count in [10, 100, 500].iter() {
        let temp_dir = TempDir::new().unwrap();
        let mut rng = StdRng::seed_from_u64(42);
        for i in 0..*file_count {
            let subdir = temp_dir.path().join(format!("dir_{}", i % 10));
            fs::create_dir_all(&subdir).unwrap();
            let content: Vec<u8> = (0..1024).map(|_| rng.gen()).collect();
            fs::write(subdir.join(format!("file_{i}.bin")), content).unwrap();
        }

        group.bench_with_input(
            BenchmarkId::from_parameter(file_count),
            file_count,
            |b, _| {
                b.iter(|| {
                    let generator = GeneratorBuilder::new().build().unwrap();
                    let imprint = generator.produce_imprint(temp_dir.path()).unwrap();
                    generator.close().unwrap();
                    black_box(imprint)
                });
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_stream_hash, bench_tree_imprint);
criterion_main!(benches);
