//! Allocator benchmarks for parrotdb
//!
//! Measures the hot paths of each pool on an anonymous arena: fixed-size
//! alloc/free churn, arbitrary-size allocation across size classes, string
//! interning and patricia insert/lookup.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use parrotdb::config::{ISTR_DEFAULT_ATOM_SHIFT, ISTR_DEFAULT_MAX_ATOMS, ISTR_DEFAULT_SHIFT};
use parrotdb::{Arena, ArbPool, BitmapPool, FixedPool, PatriciaTree, StringPool};

fn strings(arena: &mut Arena) -> StringPool {
    StringPool::open(
        arena,
        "strings",
        ISTR_DEFAULT_SHIFT,
        ISTR_DEFAULT_ATOM_SHIFT,
        ISTR_DEFAULT_MAX_ATOMS,
    )
    .unwrap()
}

fn words(count: usize) -> Vec<String> {
    (0..count)
        .map(|i| format!("word-{:08x}", (i as u32).wrapping_mul(2_654_435_761)))
        .collect()
}

fn bench_fixed_churn(c: &mut Criterion) {
    let mut group = c.benchmark_group("fixed_pool");

    for atom_size in [16u32, 64, 256] {
        let mut arena = Arena::anonymous().unwrap();
        let pool = FixedPool::open(&mut arena, "bench", 8, atom_size, 1 << 20).unwrap();

        group.bench_with_input(
            BenchmarkId::new("alloc_free", atom_size),
            &atom_size,
            |b, _| {
                b.iter(|| {
                    let atom = pool.alloc(&mut arena);
                    pool.free(&mut arena, black_box(atom));
                });
            },
        );
    }

    group.finish();
}

fn bench_arb_alloc(c: &mut Criterion) {
    let mut group = c.benchmark_group("arb_pool");

    for size in [8usize, 100, 1000, 6000] {
        let mut arena = Arena::anonymous().unwrap();
        let pool = ArbPool::open(&mut arena, "bench").unwrap();

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("alloc_free", size), &size, |b, &size| {
            b.iter(|| {
                let atom = pool.alloc(&mut arena, black_box(size));
                pool.free(&mut arena, atom);
            });
        });
    }

    group.finish();
}

fn bench_intern(c: &mut Criterion) {
    let mut group = c.benchmark_group("string_pool");
    let input = words(1000);

    group.throughput(Throughput::Elements(input.len() as u64));
    group.bench_function("intern_1000", |b| {
        b.iter_batched(
            || {
                let mut arena = Arena::anonymous().unwrap();
                let pool = strings(&mut arena);
                (arena, pool)
            },
            |(mut arena, pool)| {
                for w in &input {
                    black_box(pool.intern_str(&mut arena, w));
                }
            },
            criterion::BatchSize::LargeInput,
        );
    });

    let mut arena = Arena::anonymous().unwrap();
    let pool = strings(&mut arena);
    let atoms: Vec<_> = input.iter().map(|w| pool.intern_str(&mut arena, w)).collect();
    group.bench_function("resolve_1000", |b| {
        b.iter(|| {
            for &atom in &atoms {
                black_box(pool.resolve(&arena, atom));
            }
        });
    });

    group.finish();
}

fn bench_patricia(c: &mut Criterion) {
    let mut group = c.benchmark_group("patricia");
    let input = words(10_000);

    group.throughput(Throughput::Elements(input.len() as u64));
    group.bench_function("add_10k", |b| {
        b.iter_batched(
            || {
                let mut arena = Arena::anonymous().unwrap();
                let pool = strings(&mut arena);
                let atoms: Vec<_> = input.iter().map(|w| pool.intern_str(&mut arena, w)).collect();
                let tree = PatriciaTree::open(&mut arena, "bench", pool, 8, 1 << 16).unwrap();
                (arena, tree, atoms)
            },
            |(mut arena, tree, atoms)| {
                for atom in atoms {
                    black_box(tree.add(&mut arena, atom.into(), 0));
                }
            },
            criterion::BatchSize::LargeInput,
        );
    });

    let mut arena = Arena::anonymous().unwrap();
    let pool = strings(&mut arena);
    let tree = PatriciaTree::open(&mut arena, "bench", pool, 8, 1 << 16).unwrap();
    for w in &input {
        let atom = tree.keys().intern_str(&mut arena, w);
        tree.add(&mut arena, atom.into(), 0);
    }
    let keys: Vec<Vec<u8>> = input
        .iter()
        .map(|w| w.bytes().chain(std::iter::once(0)).collect())
        .collect();

    group.bench_function("get_10k", |b| {
        b.iter(|| {
            for key in &keys {
                black_box(tree.get(&arena, key));
            }
        });
    });

    group.bench_function("iterate_10k", |b| {
        b.iter(|| black_box(tree.iter(&arena).count()));
    });

    group.finish();
}

fn bench_bitmap(c: &mut Criterion) {
    let mut group = c.benchmark_group("bitmap");
    let mut arena = Arena::anonymous().unwrap();
    let maps = BitmapPool::open(&mut arena, "bench").unwrap();
    let id = maps.alloc(&mut arena);
    for bit in (0..parrotdb::bitmap::MAX_BIT).step_by(997) {
        maps.set(&mut arena, id, bit);
    }

    group.bench_function("iterate_sparse", |b| {
        b.iter(|| black_box(maps.iter(&arena, id).count()));
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_fixed_churn,
    bench_arb_alloc,
    bench_intern,
    bench_patricia,
    bench_bitmap
);
criterion_main!(benches);
