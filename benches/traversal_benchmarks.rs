use std::fs;
use std::path::Path;
use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use sink_digest::{combine, hash_bytes, hash_file};
use sink_store::IndexStore;
use sink_traversal::mark;

fn create_test_tree(root: &Path, depth: usize, breadth: usize) -> std::io::Result<usize> {
    let mut count = 0;

    fn recursive_create(parent: &Path, depth: usize, breadth: usize, count: &mut usize) -> std::io::Result<()> {
        if depth == 0 {
            return Ok(());
        }
        for i in 0..breadth {
            let dir = parent.join(format!("dir_{depth:03}_{i:03}"));
            fs::create_dir_all(&dir)?;
            fs::write(dir.join("leaf.txt"), b"leaf content")?;
            *count += 1;
            recursive_create(&dir, depth - 1, breadth / 2, count)?;
        }
        Ok(())
    }

    recursive_create(root, depth, breadth, &mut count)?;
    Ok(count)
}

/// Benchmark the post-order marker walk over directory trees of different sizes.
fn bench_mark_walk(c: &mut Criterion) {
    let temp_dir = std::env::temp_dir().join("sink_bench_walk");
    let _ = fs::remove_dir_all(&temp_dir);
    fs::create_dir_all(&temp_dir).unwrap();

    let mut group = c.benchmark_group("mark_walk");
    group.sample_size(10);
    group.measurement_time(Duration::from_secs(20));

    for (depth, breadth) in &[(3, 4), (4, 3), (5, 2)] {
        let test_root = temp_dir.join(format!("test_d{depth}_b{breadth}"));
        fs::create_dir_all(&test_root).unwrap();
        let dir_count = create_test_tree(&test_root, *depth, *breadth).unwrap();

        let db_path = temp_dir.join(format!("bench_d{depth}_b{breadth}.db"));
        let _ = fs::remove_file(&db_path);
        let store = IndexStore::open(&db_path).unwrap();

        group.bench_with_input(BenchmarkId::from_parameter(format!("{dir_count} dirs")), &dir_count, |b, _| {
            b.iter(|| black_box(mark(&store, &test_root, &[]).unwrap()))
        });
    }

    group.finish();
    let _ = fs::remove_dir_all(&temp_dir);
}

/// Benchmark streamed file hashing at different chunk sizes.
fn bench_hash_file_chunk_sizes(c: &mut Criterion) {
    let temp_dir = std::env::temp_dir().join("sink_bench_hash");
    let _ = fs::remove_dir_all(&temp_dir);
    fs::create_dir_all(&temp_dir).unwrap();

    let payload: Vec<u8> = (0u8..=255).cycle().take(4 * 1024 * 1024).collect();
    let file_path = temp_dir.join("payload.bin");
    fs::write(&file_path, &payload).unwrap();

    let mut group = c.benchmark_group("hash_file_chunk_sizes");
    for chunk_size in [4 * 1024, 64 * 1024, 1024 * 1024].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(chunk_size), chunk_size, |b, &size| {
            b.iter(|| black_box(hash_file(&file_path, size).unwrap()))
        });
    }

    group.finish();
    let _ = fs::remove_dir_all(&temp_dir);
}

/// Benchmark the directory digest combinator over a growing child set.
fn bench_combine(c: &mut Criterion) {
    let mut group = c.benchmark_group("combine_child_digests");

    for size in [10, 100, 1000, 10_000].iter() {
        let digests: Vec<String> = (0..*size).map(|i| hash_bytes(format!("child-{i}").as_bytes())).collect();

        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| black_box(combine(digests.iter().map(String::as_str)).unwrap()))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_mark_walk, bench_hash_file_chunk_sizes, bench_combine);
criterion_main!(benches);
