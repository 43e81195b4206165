//! Insert and point-read benchmarks across the three index structures.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use stratum::btree::BtreeHeader;
use stratum::fagin::FaginHeader;
use stratum::larson_kalja::LkEntry;
use stratum::page::{page_size_for, HeaderBase};
use stratum::{Btree, Entry, Fagin, LarsonKalja, MemStorage};

const CAPACITY: usize = 64;

fn btree() -> Btree<u64, u64, MemStorage> {
    let store = MemStorage::new(page_size_for::<BtreeHeader, Entry<u64, u64>>(CAPACITY));
    Btree::create(store).unwrap()
}

fn fagin() -> Fagin<u64, u64, MemStorage> {
    let store = MemStorage::new(page_size_for::<FaginHeader, Entry<u64, u64>>(CAPACITY));
    Fagin::create(store, 4).unwrap()
}

fn larson_kalja(count: usize) -> LarsonKalja<u64, u64, MemStorage> {
    let store = MemStorage::new(page_size_for::<HeaderBase, LkEntry<u64, u64>>(CAPACITY));
    LarsonKalja::create(store, count / CAPACITY * 2 + 4).unwrap()
}

fn bench_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("insert");

    for count in [1_000usize, 10_000] {
        group.throughput(Throughput::Elements(count as u64));

        group.bench_with_input(BenchmarkId::new("btree", count), &count, |b, &count| {
            b.iter_with_setup(btree, |mut tree| {
                for k in 0..count as u64 {
                    tree.insert(k.wrapping_mul(0x9E3779B9) % (count as u64 * 2), k)
                        .unwrap();
                }
                tree
            });
        });

        group.bench_with_input(BenchmarkId::new("fagin", count), &count, |b, &count| {
            b.iter_with_setup(fagin, |mut table| {
                for k in 0..count as u64 {
                    table
                        .insert(k.wrapping_mul(0x9E3779B9) % (count as u64 * 2), k)
                        .unwrap();
                }
                table
            });
        });

        group.bench_with_input(
            BenchmarkId::new("larson_kalja", count),
            &count,
            |b, &count| {
                b.iter_with_setup(
                    || larson_kalja(count),
                    |mut table| {
                        for k in 0..count as u64 {
                            table
                                .insert(k.wrapping_mul(0x9E3779B9) % (count as u64 * 2), k)
                                .unwrap();
                        }
                        table
                    },
                );
            },
        );
    }

    group.finish();
}

fn bench_find(c: &mut Criterion) {
    let mut group = c.benchmark_group("find");
    let count = 10_000u64;

    let mut tree = btree();
    let mut hash = fagin();
    let mut lk = larson_kalja(count as usize);
    for k in 0..count {
        tree.insert(k, k).unwrap();
        hash.insert(k, k).unwrap();
        lk.insert(k, k).unwrap();
    }

    group.throughput(Throughput::Elements(1));
    group.bench_function("btree", |b| {
        let mut k = 0u64;
        b.iter(|| {
            k = (k + 7919) % count;
            black_box(tree.get(&k).unwrap())
        });
    });
    group.bench_function("fagin", |b| {
        let mut k = 0u64;
        b.iter(|| {
            k = (k + 7919) % count;
            black_box(hash.get(&k).unwrap())
        });
    });
    group.bench_function("larson_kalja", |b| {
        let mut k = 0u64;
        b.iter(|| {
            k = (k + 7919) % count;
            black_box(lk.get(&k).unwrap())
        });
    });

    group.finish();
}

criterion_group!(benches, bench_insert, bench_find);
criterion_main!(benches);
