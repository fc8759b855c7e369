//! Field encryption cost.
//!
//! Every encrypt and decrypt derives the owner's key, so the PBKDF2 work
//! factor dominates. The `kdf_iterations` group shows how the cost scales
//! with it; `field_size` holds the work factor low to expose the AES-GCM
//! part.
//!
//! Run with: `cargo bench --bench cipher_benchmark`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use immoguard::{Config, Encryptor};

const SECRET: &str = "benchmark-secret-with-at-least-32-bytes";
const SALT: &str = "6b1f0c2e9a4d7e3b5c8a1f2d4e6b8c0a1e3f5d7b9c2a4e6f";

fn engine(iterations: u32) -> Encryptor {
    let mut config = Config::with_key(SECRET);
    config.kdf_iterations = iterations;
    Encryptor::new(&config).unwrap()
}

fn bench_kdf_iterations(c: &mut Criterion) {
    let mut group = c.benchmark_group("kdf_iterations");
    group.sample_size(10);

    for iterations in [1_000u32, 10_000, 100_000] {
        let engine = engine(iterations);
        group.bench_with_input(BenchmarkId::from_parameter(iterations), &iterations, |b, _| {
            b.iter(|| engine.encrypt(black_box("Jean Dupont"), black_box(SALT)).unwrap());
        });
    }
    group.finish();
}

fn bench_field_size(c: &mut Criterion) {
    let mut group = c.benchmark_group("field_size");
    let engine = engine(1_000);

    for (name, size) in [("16B", 16), ("256B", 256), ("4KB", 4 * 1024)] {
        let plaintext = "x".repeat(size);
        let sealed = engine.encrypt(&plaintext, SALT).unwrap();

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("encrypt", name), &plaintext, |b, p| {
            b.iter(|| engine.encrypt(black_box(p), black_box(SALT)).unwrap());
        });
        group.bench_with_input(BenchmarkId::new("decrypt", name), &sealed, |b, s| {
            b.iter(|| engine.decrypt(black_box(s), black_box(SALT)).unwrap());
        });
    }
    group.finish();
}

fn bench_blind_index(c: &mut Criterion) {
    let engine = engine(1_000);
    c.bench_function("blind_index", |b| {
        b.iter(|| engine.hash(black_box("IFU-3201912345678")));
    });
}

criterion_group!(benches, bench_kdf_iterations, bench_field_size, bench_blind_index);
criterion_main!(benches);
