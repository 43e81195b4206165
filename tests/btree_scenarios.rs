//! B-tree structure scenarios: split waves, merge cascades, ordered
//! bidirectional traversal.

use stratum::btree::BtreeHeader;
use stratum::page::page_size_for;
use stratum::{Btree, Entry, MemStorage, Storage};

fn tree_with_capacity(capacity: usize) -> Btree<u64, u64, MemStorage> {
    let store = MemStorage::new(page_size_for::<BtreeHeader, Entry<u64, u64>>(capacity));
    Btree::create(store).unwrap()
}

#[test]
fn capacity_four_split_wave() {
    let mut tree = tree_with_capacity(4);

    for k in 1..=9u64 {
        tree.insert(k, k).unwrap();
    }

    // the root went interior and the tree still reads back 1..9 in order
    assert!(tree.storage().page_count() > 1);
    assert!(tree.verify().unwrap());
    let keys: Vec<u64> = tree.iter().unwrap().map(|r| r.unwrap().key).collect();
    assert_eq!(keys, (1..=9).collect::<Vec<_>>());
    for k in 1..=9u64 {
        assert!(tree.find(&k).unwrap().is_some(), "key {k}");
    }
}

#[test]
fn ordered_iteration_is_strictly_increasing() {
    let mut tree = tree_with_capacity(4);
    for k in [8u64, 3, 11, 1, 9, 40, 2, 25, 17, 5, 33, 12, 7] {
        tree.insert(k, k).unwrap();
    }

    let keys: Vec<u64> = tree.iter().unwrap().map(|r| r.unwrap().key).collect();
    for pair in keys.windows(2) {
        assert!(pair[0] < pair[1], "{} !< {}", pair[0], pair[1]);
    }
    assert_eq!(keys.len(), 13);
}

#[test]
fn deep_tree_survives_full_drain() {
    let mut tree = tree_with_capacity(4);
    let count = 200u64;

    for k in 0..count {
        // a scrambled but deterministic order
        tree.insert((k * 67) % count, k).unwrap();
    }
    assert_eq!(tree.len(), count);
    assert!(tree.verify().unwrap());

    for k in 0..count {
        assert!(tree.erase(&k).unwrap(), "key {k}");
    }
    assert!(tree.is_empty());
    assert!(tree.verify().unwrap());
    assert!(tree.begin().unwrap() == tree.end());
}

#[test]
fn backward_iteration_mirrors_forward() {
    let mut tree = tree_with_capacity(4);
    for k in 1..=50u64 {
        tree.insert(k, k).unwrap();
    }

    let forward: Vec<u64> = tree.iter().unwrap().map(|r| r.unwrap().key).collect();

    let mut backward = Vec::new();
    let mut cursor = tree.end();
    loop {
        cursor.retreat().unwrap();
        match cursor.entry().unwrap() {
            Some(entry) => backward.push(entry.key),
            None => break,
        }
    }
    backward.reverse();

    assert_eq!(forward, backward);
}

#[test]
fn wider_pages_shrink_the_tree() {
    let mut narrow = tree_with_capacity(4);
    let mut wide = tree_with_capacity(64);

    for k in 0..500u64 {
        narrow.insert(k, k).unwrap();
        wide.insert(k, k).unwrap();
    }

    assert!(narrow.verify().unwrap());
    assert!(wide.verify().unwrap());
    assert!(
        wide.storage().page_count() < narrow.storage().page_count(),
        "wide pages should need fewer nodes ({} vs {})",
        wide.storage().page_count(),
        narrow.storage().page_count()
    );
}
