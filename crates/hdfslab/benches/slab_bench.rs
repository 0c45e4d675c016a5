//! Benchmarks for chunk estimation, hyperslab reads and row appends.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use hdfslab::{
    ChunkEstimator, ChunkStrategy, CreateSpec, ElementKind, ReadOptions, Session, ShapeSpec,
    TypeDescriptor, TypedArray,
};

const ROWS: u64 = 1024;
const COLS: u64 = 256;

// ===========================================================================
// Chunk estimation
// ===========================================================================

fn bench_chunk_estimate(c: &mut Criterion) {
    let shape = [100_000u64, 2048, 64];
    for strategy in [ChunkStrategy::Balanced, ChunkStrategy::SkewLast] {
        let estimator = ChunkEstimator::new(strategy);
        c.bench_function(&format!("chunk_estimate_{strategy}"), |b| {
            b.iter(|| estimator.estimate(black_box(&shape), 8, None).unwrap())
        });
    }
}

// ===========================================================================
// Hyperslab reads from a 1024 x 256 f64 dataset
// ===========================================================================

fn bench_hyperslab_read(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let session = Session::default();
    let file = session.open(dir.path().join("bench.h5"), true).unwrap();
    let io = session.datasets();
    io.create_dataset(
        &file,
        "/grid",
        &TypeDescriptor::of(ElementKind::Float64),
        &CreateSpec::new(vec![ROWS, COLS]),
    )
    .unwrap();
    let values: Vec<f64> = (0..ROWS * COLS).map(|i| i as f64).collect();
    io.write_all(&file, "/grid", &TypedArray::from_vec(vec![ROWS, COLS], values).unwrap())
        .unwrap();

    let block = ShapeSpec::region(vec![128, 32], vec![256, 128]).unwrap();
    c.bench_function("hyperslab_read_256x128", |b| {
        b.iter(|| {
            io.read_dataset(&file, "/grid", Some(black_box(&block)), ReadOptions::default())
                .unwrap()
        })
    });

    let strided = ShapeSpec::new(vec![0, 0], vec![512, 64], vec![2, 4]).unwrap();
    c.bench_function("hyperslab_read_strided_512x64", |b| {
        b.iter(|| {
            io.read_dataset(&file, "/grid", Some(black_box(&strided)), ReadOptions::default())
                .unwrap()
        })
    });

    session.close(file).unwrap();
}

// ===========================================================================
// Row appends
// ===========================================================================

fn bench_append_row(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let session = Session::default();
    let file = session.open(dir.path().join("append.h5"), true).unwrap();
    let io = session.datasets();
    let row = TypedArray::from_vec(vec![COLS], vec![1.0f64; COLS as usize]).unwrap();

    c.bench_function("append_row_256_f64", |b| {
        b.iter(|| io.append_row(&file, "/rows", black_box(&row)).unwrap())
    });

    session.close(file).unwrap();
}

criterion_group!(benches, bench_chunk_estimate, bench_hyperslab_read, bench_append_row);
criterion_main!(benches);
