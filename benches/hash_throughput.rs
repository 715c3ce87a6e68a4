//! Feature-hash apply throughput.
//!
//! - **hash_code**: the raw string hash over short random keys.
//! - **block_size_sweep**: dense apply of two hashed columns, sweeping the
//!   rows-per-chunk handed to each rayon worker.
//! - **sparse_vs_dense**: the same transform written through sparse rows.
//!
//! # Running
//!
//! ```sh
//! cargo bench --bench hash_throughput
//! ```

use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, Throughput};
use rand::rngs::StdRng;
use rand::{RngExt, SeedableRng};
use sluice::common::{DenseMatrix, Frame, FrameColumn, SparseMatrix};
use sluice::encoder::TransformInput;
use sluice::feature_hash::hash_code;
use sluice::spec::TransformSpec;
use sluice::transform::{MultiColumnEncoder, TransformConfig};

// ============================================================================
// Test data generators
// ============================================================================

const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789_";

fn random_key(rng: &mut StdRng) -> String {
    let len = rng.random_range(3..24);
    (0..len)
        .map(|_| ALPHABET[rng.random_range(0..ALPHABET.len())] as char)
        .collect()
}

/// A frame of `num_rows` rows: `user` with many distinct keys and `country`
/// drawn from a small vocabulary.
fn generate_frame(num_rows: usize) -> Frame {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let countries: Vec<String> = (0..200).map(|_| random_key(&mut rng)).collect();

    let users: Vec<String> = (0..num_rows).map(|_| random_key(&mut rng)).collect();
    let picks: Vec<&str> = (0..num_rows)
        .map(|_| countries[rng.random_range(0..countries.len())].as_str())
        .collect();

    Frame::new()
        .with_column(FrameColumn::strings("user", users.iter().map(|s| Some(s.as_str()))))
        .with_column(FrameColumn::strings("country", picks.into_iter().map(Some)))
}

fn hash_both(frame: &Frame) -> MultiColumnEncoder {
    let spec = TransformSpec::from_json(r#"{"hash": ["user", "country"], "K": 1048576}"#).unwrap();
    MultiColumnEncoder::from_spec(&spec, &frame.column_names()).unwrap()
}

// ============================================================================
// Benchmarks
// ============================================================================

fn bench_hash_code(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(7);
    let keys: Vec<String> = (0..65_536).map(|_| random_key(&mut rng)).collect();

    let mut group = c.benchmark_group("hash_code");
    group.throughput(Throughput::Elements(keys.len() as u64));
    group.bench_function("short_keys", |b| {
        b.iter(|| {
            keys.iter()
                .fold(0i32, |acc, k| acc ^ hash_code(black_box(k)))
        });
    });
    group.finish();
}

fn bench_block_size_sweep(c: &mut Criterion) {
    let num_rows = 262_144;
    let frame = generate_frame(num_rows);
    let encoder = hash_both(&frame);

    let mut group = c.benchmark_group("block_size_sweep");
    group.sample_size(20);
    group.noise_threshold(0.05);
    group.throughput(Throughput::Elements((num_rows * encoder.len()) as u64));

    for block_size in [0, 1024, 4096, 16_384, 65_536] {
        let config = TransformConfig {
            block_size,
            ..Default::default()
        };
        group.bench_with_input(
            BenchmarkId::new("apply_dense", block_size),
            &config,
            |b, config| {
                let mut out = DenseMatrix::new(num_rows, encoder.len());
                b.iter(|| {
                    encoder
                        .apply_dense(TransformInput::Frame(&frame), &mut out, config)
                        .unwrap();
                    black_box(out.get(num_rows - 1, 0))
                });
            },
        );
    }
    group.finish();
}

fn bench_sparse_vs_dense(c: &mut Criterion) {
    let num_rows = 262_144;
    let frame = generate_frame(num_rows);
    let encoder = hash_both(&frame);
    let config = TransformConfig::default();

    let mut group = c.benchmark_group("sparse_vs_dense");
    group.sample_size(20);
    group.throughput(Throughput::Elements((num_rows * encoder.len()) as u64));

    group.bench_function("dense", |b| {
        let mut out = DenseMatrix::new(num_rows, encoder.len());
        b.iter(|| {
            encoder
                .apply_dense(TransformInput::Frame(&frame), &mut out, &config)
                .unwrap()
        });
    });
    group.bench_function("sparse", |b| {
        let mut out = SparseMatrix::new(num_rows, encoder.len());
        b.iter(|| encoder.apply_sparse(&frame, &mut out, &config).unwrap());
    });
    group.finish();
}

// ============================================================================
// Criterion main
// ============================================================================

fn main() {
    let mut criterion = Criterion::default()
        .warm_up_time(std::time::Duration::from_secs(2))
        .measurement_time(std::time::Duration::from_secs(10))
        .configure_from_args();

    bench_hash_code(&mut criterion);
    bench_block_size_sweep(&mut criterion);
    bench_sparse_vs_dense(&mut criterion);

    criterion.final_summary();
}
