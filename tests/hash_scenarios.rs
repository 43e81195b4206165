//! Hash-index structure scenarios: directory doubling, separator
//! tightening, duplicate updates under pressure.

use stratum::fagin::FaginHeader;
use stratum::larson_kalja::LkEntry;
use stratum::page::{page_size_for, HeaderBase};
use stratum::{Entry, Fagin, LarsonKalja, MemStorage, Storage};

#[test]
fn fagin_capacity_two_doubles_the_directory() {
    let store = MemStorage::new(page_size_for::<FaginHeader, Entry<u64, u64>>(2));
    let mut table: Fagin<u64, u64, _> = Fagin::create(store, 1).unwrap();
    let initial_len = table.directory_len();

    for k in 1..=10u64 {
        table.insert(k, k).unwrap();
        assert!(table.verify().unwrap(), "after inserting {k}");
    }

    assert!(
        table.directory_len() >= initial_len * 4,
        "directory doubled fewer than twice: {} slots",
        table.directory_len()
    );
    assert_eq!(table.get(&7).unwrap(), Some(7));
    assert_eq!(table.len(), 10);
}

#[test]
fn fagin_global_depth_matches_directory_len() {
    let store = MemStorage::new(page_size_for::<FaginHeader, Entry<u64, u64>>(2));
    let mut table: Fagin<u64, u64, _> = Fagin::create(store, 4).unwrap();

    for k in 1..=30u64 {
        table.insert(k, k).unwrap();
    }

    assert_eq!(1usize << table.global_depth(), table.directory_len());
    assert!(table.verify().unwrap());
}

#[test]
fn larson_kalja_small_universe_overflow() {
    let store = MemStorage::new(page_size_for::<HeaderBase, LkEntry<u64, u64>>(2));
    let mut table: LarsonKalja<u64, u64, _> = LarsonKalja::create(store, 4).unwrap();

    // ten draws from a small universe over 4 two-entry buckets: the live
    // set fits the fixed directory, separators must tighten, and the
    // placement invariant must hold after every step
    let draws = [3u64, 7, 1, 5, 4, 3, 2, 6, 5, 1];
    for (i, &k) in draws.iter().enumerate() {
        table.insert(k, k * 11).unwrap();
        assert!(table.verify().unwrap(), "after draw #{i} (key {k})");
    }
    assert_eq!(table.len(), 7);

    for k in 1..=7u64 {
        assert_eq!(table.get(&k).unwrap(), Some(k * 11), "key {k}");
    }

    // duplicate insert replaces data without growing the table
    table.insert(7, 777).unwrap();
    assert_eq!(table.len(), 7);
    assert_eq!(table.get(&7).unwrap(), Some(777));
    assert!(table.verify().unwrap());
}

#[test]
fn larson_kalja_capacity_is_fixed_at_construction() {
    let store = MemStorage::new(page_size_for::<HeaderBase, LkEntry<u64, u64>>(4));
    let table: LarsonKalja<u64, u64, _> = LarsonKalja::create(store, 6).unwrap();

    assert_eq!(table.directory_len(), 6);
    assert_eq!(table.capacity(), 24);
    assert_eq!(table.storage().page_count(), 6);
}

#[test]
fn hash_tables_agree_with_each_other_under_load() {
    let fagin_store = MemStorage::new(page_size_for::<FaginHeader, Entry<u64, u64>>(4));
    let lk_store = MemStorage::new(page_size_for::<HeaderBase, LkEntry<u64, u64>>(4));
    let mut fagin: Fagin<u64, u64, _> = Fagin::create(fagin_store, 2).unwrap();
    let mut lk: LarsonKalja<u64, u64, _> = LarsonKalja::create(lk_store, 16).unwrap();

    // keep the live set comfortably inside the fixed larson-kalja
    // directory (16 buckets of 4 slots)
    let mut state = 0x9E3779B97F4A7C15u64;
    for _ in 0..300 {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        let key = state % 40;
        if state % 4 == 0 {
            assert_eq!(
                fagin.erase(&key).unwrap(),
                lk.erase(&key).unwrap(),
                "erase {key}"
            );
        } else {
            fagin.insert(key, state).unwrap();
            lk.insert(key, state).unwrap();
        }
    }

    assert_eq!(fagin.len(), lk.len());
    assert!(fagin.verify().unwrap());
    assert!(lk.verify().unwrap());

    let mut fagin_keys: Vec<u64> = fagin.iter().unwrap().map(|r| r.unwrap().key).collect();
    let mut lk_keys: Vec<u64> = lk.iter().unwrap().map(|r| r.unwrap().key).collect();
    fagin_keys.sort_unstable();
    lk_keys.sort_unstable();
    assert_eq!(fagin_keys, lk_keys);
}
