//! # Larson-Kalja Multi-Signature Hash
//!
//! A fixed-length directory of `(bucket, separator)` pairs and a growable
//! family of hash-function pairs `(dir_hash_i, sig_hash_i)`. Every stored
//! entry remembers which pair placed it (`hash_ix`); its *signature* under
//! that pair is strictly below its bucket's separator.
//!
//! ## Probe
//!
//! A lookup tries the pairs in order: pair `i` names a directory slot via
//! `dir_hash_i(key) mod |directory|` and a signature via `sig_hash_i(key)`.
//! The first slot whose separator admits the signature is the only bucket
//! that may hold the key. Separators start at the maximum signature (every
//! key admitted) and only ever decrease, which keeps placed entries
//! reachable: a pair that rejected a key at insert time rejects it forever.
//!
//! ## Overflow
//!
//! Inserting into a full bucket ejects the maximal trailing run of
//! equal-signature entries (buckets are sorted by signature), tightens the
//! separator to the ejected signature, and feeds the ejecta into a work
//! queue. Each queued entry advances its `hash_ix` until some pair admits
//! it, growing the hash family geometrically on demand. The family is
//! bounded; a workload that outruns it fails closed rather than looping.

use std::collections::VecDeque;
use std::marker::PhantomData;

use eyre::{ensure, Result};
use log::debug;
use rand::rngs::SmallRng;
use rand::SeedableRng;

use crate::cursor::{Cursor, Iter, PageWalk};
use crate::hash::{UniversalHash, DEFAULT_HASH_SEED};
use crate::page::{HeaderBase, IndexKey, PageMut, PageRef, PageValue};
use crate::storage::{PageId, Storage};
use crate::table::Table;

/// Hard bound on the hash family; growing past it aborts the operation.
pub const MAX_HASH_PAIRS: usize = 0x10000;

/// Directory slot: a bucket page and the exclusive upper bound on the
/// signatures stored in it.
#[derive(Debug, Clone, Copy)]
struct DirEntry {
    page: PageId,
    separator: u64,
}

/// A bucket entry: the record plus the index of the hash pair that placed
/// it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LkEntry<K, D> {
    pub key: K,
    pub data: D,
    pub hash_ix: u32,
}

impl<K: PageValue, D: PageValue> PageValue for LkEntry<K, D> {
    const SIZE: usize = K::SIZE + D::SIZE + u32::SIZE;

    #[inline]
    fn load(bytes: &[u8]) -> Self {
        LkEntry {
            key: K::load(&bytes[..K::SIZE]),
            data: D::load(&bytes[K::SIZE..K::SIZE + D::SIZE]),
            hash_ix: u32::load(&bytes[K::SIZE + D::SIZE..K::SIZE + D::SIZE + u32::SIZE]),
        }
    }

    #[inline]
    fn store(&self, bytes: &mut [u8]) {
        self.key.store(&mut bytes[..K::SIZE]);
        self.data.store(&mut bytes[K::SIZE..K::SIZE + D::SIZE]);
        self.hash_ix
            .store(&mut bytes[K::SIZE + D::SIZE..K::SIZE + D::SIZE + u32::SIZE]);
    }
}

/// One member of the hash family: a directory hash and a signature hash.
struct HashPair<K> {
    dir: UniversalHash<K>,
    sig: UniversalHash<K>,
}

impl<K: IndexKey> HashPair<K> {
    fn new(rng: &mut SmallRng) -> Self {
        Self {
            dir: UniversalHash::new(rng),
            sig: UniversalHash::new(rng),
        }
    }
}

/// The growable sequence of hash pairs a [`LarsonKalja`] table owns.
struct LkHash<K> {
    pairs: Vec<HashPair<K>>,
    dir_len: usize,
    rng: SmallRng,
}

impl<K: IndexKey> LkHash<K> {
    fn new(dir_len: usize, seed: u64) -> Self {
        let mut rng = SmallRng::seed_from_u64(seed);
        let pairs = vec![HashPair::new(&mut rng)];
        Self {
            pairs,
            dir_len,
            rng,
        }
    }

    /// Signature of an entry under its current hash pair.
    fn signature<D>(&self, entry: &LkEntry<K, D>) -> u64 {
        self.pairs[entry.hash_ix as usize].sig.digest(&entry.key)
    }

    /// Directory slot of an entry under its current hash pair.
    fn dir_index<D>(&self, entry: &LkEntry<K, D>) -> usize {
        self.pairs[entry.hash_ix as usize].dir.digest(&entry.key) as usize % self.dir_len
    }

    /// Probes the pairs in order; the first admitting directory slot, if
    /// any.
    fn search(&self, key: &K, directory: &[DirEntry]) -> Option<usize> {
        for pair in &self.pairs {
            let dir_ix = pair.dir.digest(key) as usize % self.dir_len;
            if pair.sig.digest(key) < directory[dir_ix].separator {
                return Some(dir_ix);
            }
        }
        None
    }

    /// Advances the entry's hash index until some pair admits it, growing
    /// the family on demand. Returns the admitting directory slot.
    fn advance<D>(&mut self, entry: &mut LkEntry<K, D>, directory: &[DirEntry]) -> Result<usize> {
        loop {
            if entry.hash_ix as usize == self.pairs.len() {
                self.grow()?;
            }
            let dir_ix = self.dir_index(entry);
            if self.signature(entry) < directory[dir_ix].separator {
                return Ok(dir_ix);
            }
            entry.hash_ix += 1;
        }
    }

    fn grow(&mut self) -> Result<()> {
        ensure!(
            self.pairs.len() < MAX_HASH_PAIRS,
            "hash family exhausted at {} pairs without placing an entry",
            self.pairs.len()
        );
        let target = (self.pairs.len() * 2).min(MAX_HASH_PAIRS);
        while self.pairs.len() < target {
            let pair = HashPair::new(&mut self.rng);
            self.pairs.push(pair);
        }
        debug!("larson-kalja hash family grows to {} pairs", target);
        Ok(())
    }
}

/// Larson-Kalja multi-signature hash table.
pub struct LarsonKalja<K, D, S> {
    store: S,
    hash: LkHash<K>,
    directory: Vec<DirEntry>,
    size: u64,
    capacity: u64,
    _marker: PhantomData<fn(K, D)>,
}

impl<K, D, S> LarsonKalja<K, D, S>
where
    K: IndexKey,
    D: PageValue,
    S: Storage,
{
    /// Creates a table over `num_pages` pre-allocated buckets. The
    /// directory length is fixed for the table's lifetime.
    pub fn create(store: S, num_pages: usize) -> Result<Self> {
        Self::with_seed(store, num_pages, DEFAULT_HASH_SEED)
    }

    pub fn with_seed(mut store: S, num_pages: usize, seed: u64) -> Result<Self> {
        ensure!(num_pages > 0, "directory needs at least one bucket");

        let page_size = store.page_size();
        let mut directory = Vec::with_capacity(num_pages);
        let mut capacity = 0;
        for _ in 0..num_pages {
            let page = store.create_page()?;
            {
                let bytes = store.page_mut(page)?;
                let bucket = PageMut::<HeaderBase, LkEntry<K, D>>::init(bytes, page_size, page)?;
                capacity += bucket.as_ref().max_len() as u64;
            }
            store.release_page(page)?;
            directory.push(DirEntry {
                page,
                separator: u64::MAX,
            });
        }

        Ok(Self {
            store,
            hash: LkHash::new(num_pages, seed),
            directory,
            size: 0,
            capacity,
            _marker: PhantomData,
        })
    }

    pub fn len(&self) -> u64 {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Total live-entry slots across all buckets.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn load_factor(&self) -> f64 {
        self.size as f64 / self.capacity as f64
    }

    pub fn directory_len(&self) -> usize {
        self.directory.len()
    }

    pub fn storage(&self) -> &S {
        &self.store
    }

    fn bucket_view(&self, page: PageId) -> Result<PageRef<'_, HeaderBase, LkEntry<K, D>>> {
        PageRef::new(self.store.page(page)?)
    }

    /// Cursor on the entry holding `key`, or `None` on a miss.
    pub fn find(&self, key: &K) -> Result<Option<Cursor<'_, Self>>> {
        let Some(dir_ix) = self.hash.search(key, &self.directory) else {
            return Ok(None);
        };
        let page = self.directory[dir_ix].page;
        let view = self.bucket_view(page)?;
        match view.position(|e| e.key == *key) {
            Some(slot) => Ok(Some(Cursor::new(self, Some((page, slot))))),
            None => Ok(None),
        }
    }

    pub fn get(&self, key: &K) -> Result<Option<D>> {
        let Some(dir_ix) = self.hash.search(key, &self.directory) else {
            return Ok(None);
        };
        let view = self.bucket_view(self.directory[dir_ix].page)?;
        Ok(view.position(|e| e.key == *key).map(|i| view.entry(i).data))
    }

    /// Inserts `key -> data` through the overflow work queue; an existing
    /// key has its data replaced in place without size growth.
    pub fn insert(&mut self, key: K, data: D) -> Result<()> {
        let mut queue: VecDeque<LkEntry<K, D>> = VecDeque::new();
        queue.push_back(LkEntry {
            key,
            data,
            hash_ix: 0,
        });
        let mut first = true;

        while let Some(mut entry) = queue.pop_front() {
            let dir_ix = self.hash.advance(&mut entry, &self.directory)?;
            let page = self.directory[dir_ix].page;

            if first {
                // only the original entry can collide with a stored key;
                // ejected entries are keys the table already owns
                first = false;
                let existing = self.bucket_view(page)?.position(|e| e.key == entry.key);
                if let Some(slot) = existing {
                    let bytes = self.store.page_mut(page)?;
                    let mut bucket = PageMut::<HeaderBase, LkEntry<K, D>>::new(bytes)?;
                    let mut stored = bucket.as_ref().entry(slot);
                    stored.data = entry.data;
                    bucket.set_entry(slot, stored);
                    self.store.update_page(page)?;
                    return Ok(());
                }
                self.size += 1;
            }

            if self.bucket_view(page)?.is_full() {
                let ejected = self.overflow(page, dir_ix, entry)?;
                queue.extend(ejected);
            } else {
                self.place_in_bucket(page, entry)?;
            }
        }
        Ok(())
    }

    pub fn erase(&mut self, key: &K) -> Result<bool> {
        let Some(dir_ix) = self.hash.search(key, &self.directory) else {
            return Ok(false);
        };
        let page = self.directory[dir_ix].page;
        let bytes = self.store.page_mut(page)?;
        let mut bucket = PageMut::<HeaderBase, LkEntry<K, D>>::new(bytes)?;
        match bucket.as_ref().position(|e| e.key == *key) {
            Some(slot) => {
                bucket.erase(slot);
                self.size -= 1;
                self.store.update_page(page)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn begin(&self) -> Result<Cursor<'_, Self>> {
        Cursor::at_first(self)
    }

    pub fn end(&self) -> Cursor<'_, Self> {
        Cursor::end(self)
    }

    pub fn iter(&self) -> Result<Iter<'_, Self>> {
        Iter::new(self)
    }

    /// Inserts into a non-full bucket, keeping it sorted by signature.
    fn place_in_bucket(&mut self, page: PageId, entry: LkEntry<K, D>) -> Result<()> {
        let hash = &self.hash;
        let signature = hash.signature(&entry);
        let bytes = self.store.page_mut(page)?;
        let mut bucket = PageMut::<HeaderBase, LkEntry<K, D>>::new(bytes)?;

        let slot = bucket
            .as_ref()
            .partition_point(|e| hash.signature(e) < signature);
        bucket.insert(slot, entry);
        Ok(())
    }

    /// Handles an insert into the full bucket at `page`: ejects the maximal
    /// trailing run of equal-signature entries (the new entry joins the run
    /// when its own signature lands there), tightens the slot's separator
    /// to the ejected signature, and returns the ejecta for re-queueing.
    fn overflow(
        &mut self,
        page: PageId,
        dir_ix: usize,
        entry: LkEntry<K, D>,
    ) -> Result<Vec<LkEntry<K, D>>> {
        let hash = &self.hash;
        let entry_sig = hash.signature(&entry);

        let (cut, insert_slot, mut ejected) = {
            let view = self.bucket_view(page)?;
            let len = view.len();
            let end_sig = hash.signature(&view.entry(len - 1));
            let cut = view
                .rposition(|e| hash.signature(e) != end_sig)
                .map_or(0, |i| i + 1);
            let insert_slot = view.partition_point(|e| hash.signature(e) < entry_sig);
            let ejected: Vec<LkEntry<K, D>> = (cut..len).map(|i| view.entry(i)).collect();
            (cut, insert_slot, ejected)
        };
        let entry_overflows = insert_slot >= cut;

        {
            let bytes = self.store.page_mut(page)?;
            let mut bucket = PageMut::<HeaderBase, LkEntry<K, D>>::new(bytes)?;
            bucket.truncate(cut);
            if !entry_overflows {
                bucket.insert(insert_slot, entry);
            }
        }
        if entry_overflows {
            ejected.push(entry);
        }

        let new_separator = self.hash.signature(&ejected[0]);
        self.directory[dir_ix].separator = new_separator;
        self.store.update_page(page)?;
        debug!(
            "larson-kalja bucket {} overflows: separator -> {}, {} entries re-queued",
            page,
            new_separator,
            ejected.len()
        );
        Ok(ejected)
    }

    /// Checks the placement invariants; `true` iff they all hold.
    pub fn verify(&self) -> Result<bool> {
        for (dir_ix, slot) in self.directory.iter().enumerate() {
            let view = self.bucket_view(slot.page)?;
            let mut prev_sig = 0u64;
            for entry in view.entries() {
                // the entry lives in the slot its current pair names, with
                // an admitted signature
                if self.hash.dir_index(&entry) != dir_ix {
                    return Ok(false);
                }
                let sig = self.hash.signature(&entry);
                if sig >= slot.separator {
                    return Ok(false);
                }
                // earlier pairs must keep rejecting it, or lookups would
                // stop short
                for pair in &self.hash.pairs[..entry.hash_ix as usize] {
                    let ix = pair.dir.digest(&entry.key) as usize % self.directory.len();
                    if pair.sig.digest(&entry.key) < self.directory[ix].separator {
                        return Ok(false);
                    }
                }
                // buckets stay sorted by signature
                if sig < prev_sig {
                    return Ok(false);
                }
                prev_sig = sig;
            }
        }
        Ok(true)
    }
}

impl<K, D, S> PageWalk for LarsonKalja<K, D, S>
where
    K: IndexKey,
    D: PageValue,
    S: Storage,
{
    type Item = LkEntry<K, D>;

    fn first_page(&self) -> Result<Option<PageId>> {
        Ok(self.directory.first().map(|d| d.page))
    }

    fn last_page(&self) -> Result<Option<PageId>> {
        Ok(self.directory.last().map(|d| d.page))
    }

    fn next_page(&self, page: PageId) -> Result<Option<PageId>> {
        let ix = self.directory.iter().position(|d| d.page == page);
        Ok(ix.and_then(|i| self.directory.get(i + 1)).map(|d| d.page))
    }

    fn prev_page(&self, page: PageId) -> Result<Option<PageId>> {
        let ix = self.directory.iter().position(|d| d.page == page);
        match ix {
            Some(i) if i > 0 => Ok(Some(self.directory[i - 1].page)),
            _ => Ok(None),
        }
    }

    fn page_len(&self, page: PageId) -> Result<usize> {
        Ok(self.bucket_view(page)?.len())
    }

    fn page_entry(&self, page: PageId, slot: usize) -> Result<Self::Item> {
        Ok(self.bucket_view(page)?.entry(slot))
    }
}

impl<K, D, S> Table<K, D> for LarsonKalja<K, D, S>
where
    K: IndexKey,
    D: PageValue,
    S: Storage,
{
    fn insert(&mut self, key: K, data: D) -> Result<()> {
        LarsonKalja::insert(self, key, data)
    }

    fn erase(&mut self, key: &K) -> Result<bool> {
        LarsonKalja::erase(self, key)
    }

    fn get(&self, key: &K) -> Result<Option<D>> {
        LarsonKalja::get(self, key)
    }

    fn len(&self) -> u64 {
        LarsonKalja::len(self)
    }

    fn verify(&self) -> Result<bool> {
        LarsonKalja::verify(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::page_size_for;
    use crate::storage::MemStorage;

    fn small_table(capacity: usize, num_pages: usize) -> LarsonKalja<u64, u64, MemStorage> {
        let store = MemStorage::new(page_size_for::<HeaderBase, LkEntry<u64, u64>>(capacity));
        LarsonKalja::create(store, num_pages).unwrap()
    }

    fn collected_keys(table: &LarsonKalja<u64, u64, MemStorage>) -> Vec<u64> {
        let mut keys: Vec<u64> = table
            .iter()
            .unwrap()
            .map(|r| r.unwrap().key)
            .collect();
        keys.sort_unstable();
        keys
    }

    #[test]
    fn lk_entry_round_trips_through_bytes() {
        let entry = LkEntry {
            key: 0xDEAD_BEEFu64,
            data: 42u64,
            hash_ix: 3,
        };
        let mut bytes = [0u8; LkEntry::<u64, u64>::SIZE];

        entry.store(&mut bytes);

        assert_eq!(LkEntry::<u64, u64>::load(&bytes), entry);
    }

    #[test]
    fn empty_table_misses() {
        let table = small_table(4, 4);

        assert!(table.find(&42).unwrap().is_none());
        assert!(table.begin().unwrap() == table.end());
        assert!(table.verify().unwrap());
        assert_eq!(table.capacity(), 16);
    }

    #[test]
    fn insert_find_erase_round_trip() {
        let mut table = small_table(4, 8);

        for k in 1..=24u64 {
            table.insert(k, k * 3).unwrap();
            assert!(table.verify().unwrap(), "after inserting {k}");
        }
        assert_eq!(table.len(), 24);

        for k in 1..=24u64 {
            assert_eq!(table.get(&k).unwrap(), Some(k * 3), "key {k}");
        }

        for k in 1..=24u64 {
            assert!(table.erase(&k).unwrap(), "key {k}");
        }
        assert!(table.is_empty());
        assert!(!table.erase(&1).unwrap());
    }

    #[test]
    fn overflow_tightens_separators_and_keeps_entries_reachable() {
        // tiny buckets force overflow propagation; the draw repeats keys the
        // way a small universe does, so the live set fits the fixed
        // directory
        let mut table = small_table(2, 4);

        let draws = [3u64, 7, 1, 7, 4, 3, 2, 6, 5, 1];
        for (i, &k) in draws.iter().enumerate() {
            table.insert(k, k * 10).unwrap();
            assert!(table.verify().unwrap(), "after draw #{i} (key {k})");
        }

        assert_eq!(collected_keys(&table), vec![1, 2, 3, 4, 5, 6, 7]);
        assert_eq!(table.len(), 7);
        for k in 1..=7u64 {
            assert_eq!(table.get(&k).unwrap(), Some(k * 10), "key {k}");
        }
    }

    #[test]
    fn update_replaces_in_place_without_growth() {
        let mut table = small_table(2, 4);
        for k in 1..=6u64 {
            table.insert(k, k).unwrap();
        }
        let before = table.len();

        table.insert(3, 300).unwrap();

        assert_eq!(table.len(), before);
        assert_eq!(table.get(&3).unwrap(), Some(300));
        assert!(table.verify().unwrap());
    }

    #[test]
    fn load_factor_tracks_fill() {
        let mut table = small_table(4, 4);
        assert_eq!(table.load_factor(), 0.0);

        for k in 1..=8u64 {
            table.insert(k, k).unwrap();
        }

        assert!((table.load_factor() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn cursor_walks_the_directory_in_both_directions() {
        let mut table = small_table(4, 4);
        for k in 1..=12u64 {
            table.insert(k, k).unwrap();
        }

        let forward: Vec<u64> = table.iter().unwrap().map(|r| r.unwrap().key).collect();
        assert_eq!(forward.len(), 12);

        let mut cursor = table.end();
        let mut backward = Vec::new();
        loop {
            cursor.retreat().unwrap();
            match cursor.entry().unwrap() {
                Some(entry) => backward.push(entry.key),
                None => break,
            }
        }
        backward.reverse();
        assert_eq!(backward, forward);
    }

    #[test]
    fn single_bucket_table_still_works() {
        let mut table = small_table(8, 1);

        for k in 1..=6u64 {
            table.insert(k, k).unwrap();
        }

        assert_eq!(collected_keys(&table), (1..=6).collect::<Vec<_>>());
        assert!(table.verify().unwrap());
    }

    #[test]
    fn hash_family_growth_is_bounded() {
        let mut hash = LkHash::<u64>::new(4, 1);
        let mut grown = 1;
        while hash.pairs.len() < MAX_HASH_PAIRS {
            hash.grow().unwrap();
            grown += 1;
        }

        assert!(hash.grow().is_err());
        assert!(grown > 1);
    }
}
