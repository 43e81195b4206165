//! Snapshot round-trips of backends carrying live index data.

use stratum::btree::BtreeHeader;
use stratum::page::page_size_for;
use stratum::{Btree, Entry, MemStorage, Storage};
use tempfile::tempdir;

#[test]
fn empty_backend_round_trips() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("empty.dat");

    let store = MemStorage::new(64);
    store.save_to(&path).unwrap();

    let mut restored = MemStorage::new(64);
    restored.load_from(&path).unwrap();
    assert_eq!(restored.page_count(), 0);
}

#[test]
fn btree_pages_round_trip_bit_for_bit() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("tree.dat");

    let page_size = page_size_for::<BtreeHeader, Entry<u64, u64>>(4);
    let store = MemStorage::new(page_size);
    let mut tree: Btree<u64, u64, _> = Btree::create(store).unwrap();
    for k in 1..=64u64 {
        tree.insert(k, k * 5).unwrap();
    }

    tree.storage().save_to(&path).unwrap();

    let mut restored = MemStorage::new(page_size);
    restored.load_from(&path).unwrap();

    assert_eq!(restored.page_count(), tree.storage().page_count());
    for raw in 0..restored.page_count() {
        let id = stratum::PageId::new(raw);
        assert_eq!(
            restored.page(id).unwrap(),
            tree.storage().page(id).unwrap(),
            "page {raw} differs after round-trip"
        );
    }
}

#[test]
fn save_load_save_is_stable() {
    let dir = tempdir().unwrap();
    let first = dir.path().join("first.dat");
    let second = dir.path().join("second.dat");

    let mut store = MemStorage::new(32);
    for i in 0..5u8 {
        let id = store.create_page().unwrap();
        store.page_mut(id).unwrap().fill(i);
    }
    store.save_to(&first).unwrap();

    let mut restored = MemStorage::new(32);
    restored.load_from(&first).unwrap();
    restored.save_to(&second).unwrap();

    assert_eq!(
        std::fs::read(&first).unwrap(),
        std::fs::read(&second).unwrap()
    );
}
