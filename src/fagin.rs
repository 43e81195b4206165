//! # Fagin Extendible Hash
//!
//! A directory of `2^global_depth` slots maps the low bits of a key's digest
//! to a bucket page. Each bucket records its *local depth*: the number of
//! low digest bits every key in it shares. A bucket of local depth `d` is
//! aliased by every directory slot whose index matches its bit pattern
//! modulo `2^d`, so `directory.len() / 2^d` slots point at it.
//!
//! ## Split
//!
//! When an insert lands on a full bucket:
//!
//! ```text
//! 1. If the bucket's local depth equals the global depth, double the
//!    directory by copying its first half into the new second half
//! 2. Raise the bucket's local depth, allocate a sibling bucket, and
//!    repoint every slot aliased to the old bucket whose new depth bit is
//!    set at the sibling
//! 3. Re-place every entry of the old bucket; the freed-up bit now
//!    distributes them between the bucket and its sibling
//! ```
//!
//! Splits repeat until the destination bucket has room. A pathological key
//! set could in principle demand unbounded doubling, so directory growth
//! fails closed at a hard cap instead.
//!
//! ## Iteration
//!
//! The cursor walks the directory skipping page ids it has already visited:
//! each bucket is yielded once, in order of its first directory slot.

use std::marker::PhantomData;

use eyre::{ensure, Result};
use hashbrown::HashSet;
use log::debug;
use rand::rngs::SmallRng;
use rand::SeedableRng;
use zerocopy::little_endian::U64;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::cursor::{Cursor, Iter, PageWalk};
use crate::hash::{UniversalHash, DEFAULT_HASH_SEED};
use crate::page::{Entry, Header, HeaderBase, IndexKey, PageMut, PageRef, PageValue};
use crate::storage::{PageId, Storage};
use crate::table::Table;

/// Hard cap on directory growth; reaching it fails the insert instead of
/// doubling forever on degenerate digests.
pub const MAX_DIRECTORY_SLOTS: usize = 1 << 32;

/// Bucket page header: the common fields plus the bucket's local depth.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct FaginHeader {
    base: HeaderBase,
    local_depth: U64,
}

impl FaginHeader {
    le_u64_accessors! { local_depth }
}

impl Header for FaginHeader {
    #[inline]
    fn base(&self) -> &HeaderBase {
        &self.base
    }

    #[inline]
    fn base_mut(&mut self) -> &mut HeaderBase {
        &mut self.base
    }
}

/// Extendible hash table.
pub struct Fagin<K, D, S> {
    store: S,
    directory: Vec<PageId>,
    hash: UniversalHash<K>,
    size: u64,
    _marker: PhantomData<fn(K, D)>,
}

impl<K, D, S> Fagin<K, D, S>
where
    K: IndexKey,
    D: PageValue,
    S: Storage,
{
    /// Creates a table whose directory starts at `directory_len` slots
    /// (rounded up to a power of two, minimum one), all sharing a single
    /// depth-zero bucket.
    pub fn create(store: S, directory_len: usize) -> Result<Self> {
        Self::with_seed(store, directory_len, DEFAULT_HASH_SEED)
    }

    pub fn with_seed(mut store: S, directory_len: usize, seed: u64) -> Result<Self> {
        let mut rng = SmallRng::seed_from_u64(seed);
        let hash = UniversalHash::new(&mut rng);

        let page_size = store.page_size();
        let bucket = store.create_page()?;
        {
            let bytes = store.page_mut(bucket)?;
            PageMut::<FaginHeader, Entry<K, D>>::init(bytes, page_size, bucket)?;
        }
        store.release_page(bucket)?;

        let slots = directory_len.max(1).next_power_of_two();
        Ok(Self {
            store,
            directory: vec![bucket; slots],
            hash,
            size: 0,
            _marker: PhantomData,
        })
    }

    pub fn len(&self) -> u64 {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn directory_len(&self) -> usize {
        self.directory.len()
    }

    pub fn global_depth(&self) -> u64 {
        self.directory.len().trailing_zeros() as u64
    }

    pub fn storage(&self) -> &S {
        &self.store
    }

    fn dir_index(&self, key: &K) -> usize {
        self.hash.digest(key) as usize & (self.directory.len() - 1)
    }

    fn bucket_view(&self, page: PageId) -> Result<PageRef<'_, FaginHeader, Entry<K, D>>> {
        PageRef::new(self.store.page(page)?)
    }

    /// Cursor on the entry holding `key`, or `None` on a miss.
    pub fn find(&self, key: &K) -> Result<Option<Cursor<'_, Self>>> {
        let bucket = self.directory[self.dir_index(key)];
        let view = self.bucket_view(bucket)?;
        match view.position(|e| e.key == *key) {
            Some(slot) => Ok(Some(Cursor::new(self, Some((bucket, slot))))),
            None => Ok(None),
        }
    }

    pub fn get(&self, key: &K) -> Result<Option<D>> {
        let bucket = self.directory[self.dir_index(key)];
        let view = self.bucket_view(bucket)?;
        Ok(view.position(|e| e.key == *key).map(|i| view.entry(i).data))
    }

    /// Inserts `key -> data`, splitting buckets (and doubling the
    /// directory) until the destination has room. An existing key has its
    /// data replaced in place.
    pub fn insert(&mut self, key: K, data: D) -> Result<()> {
        let bucket = self.directory[self.dir_index(&key)];
        {
            let bytes = self.store.page_mut(bucket)?;
            let mut page = PageMut::<FaginHeader, Entry<K, D>>::new(bytes)?;
            if let Some(slot) = page.as_ref().position(|e| e.key == key) {
                page.set_entry(slot, Entry { key, data });
                return Ok(());
            }
        }

        self.place(key, data)?;
        self.size += 1;
        Ok(())
    }

    pub fn erase(&mut self, key: &K) -> Result<bool> {
        let bucket = self.directory[self.dir_index(key)];
        let bytes = self.store.page_mut(bucket)?;
        let mut page = PageMut::<FaginHeader, Entry<K, D>>::new(bytes)?;
        match page.as_ref().position(|e| e.key == *key) {
            Some(slot) => {
                page.erase(slot);
                self.size -= 1;
                self.store.update_page(bucket)?;
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

    /// Places an entry without size accounting; shared by `insert` and the
    /// redistribution after a split.
    fn place(&mut self, key: K, data: D) -> Result<()> {
        loop {
            let bucket = self.directory[self.dir_index(&key)];
            if !self.bucket_view(bucket)?.is_full() {
                break;
            }
            self.split_bucket(bucket)?;
        }

        let bucket = self.directory[self.dir_index(&key)];
        let bytes = self.store.page_mut(bucket)?;
        let mut page = PageMut::<FaginHeader, Entry<K, D>>::new(bytes)?;
        let slot = page.as_ref().partition_point(|e| e.key < key);
        if slot < page.len() && page.as_ref().entry(slot).key == key {
            page.set_entry(slot, Entry { key, data });
        } else {
            page.insert(slot, Entry { key, data });
        }
        Ok(())
    }

    /// Splits `bucket`: raises its local depth (doubling the directory
    /// first when it is already at global depth), hands the slots whose new
    /// depth bit is set to a fresh sibling, and re-places the bucket's
    /// entries.
    fn split_bucket(&mut self, bucket: PageId) -> Result<()> {
        let local_depth = self.bucket_view(bucket)?.header().local_depth();

        if local_depth == self.global_depth() {
            ensure!(
                self.directory.len() < MAX_DIRECTORY_SLOTS,
                "extendible hash directory exhausted at {} slots",
                self.directory.len()
            );
            let old_len = self.directory.len();
            self.directory.extend_from_within(..);
            debug!(
                "fagin directory doubles: {} -> {} slots",
                old_len,
                self.directory.len()
            );
        }

        let page_size = self.store.page_size();
        let sibling = self.store.create_page()?;
        {
            let bytes = self.store.page_mut(sibling)?;
            let mut page = PageMut::<FaginHeader, Entry<K, D>>::init(bytes, page_size, sibling)?;
            page.header_mut().set_local_depth(local_depth + 1);
        }
        {
            let bytes = self.store.page_mut(bucket)?;
            let mut page = PageMut::<FaginHeader, Entry<K, D>>::new(bytes)?;
            page.header_mut().set_local_depth(local_depth + 1);
        }

        // slots aliased to the bucket split on the newly significant bit
        let depth_bit = 1usize << local_depth;
        for (index, slot) in self.directory.iter_mut().enumerate() {
            if *slot == bucket && index & depth_bit != 0 {
                *slot = sibling;
            }
        }
        debug!(
            "fagin bucket {} splits into {} at local depth {}",
            bucket,
            sibling,
            local_depth + 1
        );

        let entries: Vec<Entry<K, D>> = {
            let view = self.bucket_view(bucket)?;
            view.entries().collect()
        };
        {
            let bytes = self.store.page_mut(bucket)?;
            let mut page = PageMut::<FaginHeader, Entry<K, D>>::new(bytes)?;
            page.truncate(0);
        }
        for entry in entries {
            self.place(entry.key, entry.data)?;
        }
        Ok(())
    }

    /// Checks the directory and bucket invariants; `true` iff they all
    /// hold.
    pub fn verify(&self) -> Result<bool> {
        if !self.directory.len().is_power_of_two() {
            return Ok(false);
        }
        let global = self.global_depth();

        let mut seen = HashSet::new();
        for (index, &bucket) in self.directory.iter().enumerate() {
            if !seen.insert(bucket) {
                continue;
            }
            let view = self.bucket_view(bucket)?;
            let local = view.header().local_depth();
            if local > global {
                return Ok(false);
            }

            // aliasing: the slots pointing here are exactly one residue
            // class modulo 2^local
            let mask = (1usize << local) - 1;
            let pattern = index & mask;
            for (i, &slot) in self.directory.iter().enumerate() {
                let matches = i & mask == pattern;
                if matches != (slot == bucket) {
                    return Ok(false);
                }
            }

            // every entry hashes back to this bucket, in key order
            let mut prev: Option<K> = None;
            for entry in view.entries() {
                if self.directory[self.dir_index(&entry.key)] != bucket {
                    return Ok(false);
                }
                if let Some(p) = &prev {
                    if *p >= entry.key {
                        return Ok(false);
                    }
                }
                prev = Some(entry.key);
            }
        }
        Ok(true)
    }
}

/// First page id in `iter` that does not occur in the prefix ending at the
/// first occurrence of `current`.
fn next_unique(iter: impl Iterator<Item = PageId>, current: PageId) -> Option<PageId> {
    let mut consumed = HashSet::new();
    let mut found = false;
    for id in iter {
        if found {
            if !consumed.contains(&id) {
                return Some(id);
            }
        } else {
            consumed.insert(id);
            found = id == current;
        }
    }
    None
}

impl<K, D, S> PageWalk for Fagin<K, D, S>
where
    K: IndexKey,
    D: PageValue,
    S: Storage,
{
    type Item = Entry<K, D>;

    fn first_page(&self) -> Result<Option<PageId>> {
        Ok(self.directory.first().copied())
    }

    fn last_page(&self) -> Result<Option<PageId>> {
        Ok(self.directory.last().copied())
    }

    fn next_page(&self, page: PageId) -> Result<Option<PageId>> {
        Ok(next_unique(self.directory.iter().copied(), page))
    }

    fn prev_page(&self, page: PageId) -> Result<Option<PageId>> {
        Ok(next_unique(self.directory.iter().rev().copied(), page))
    }

    fn page_len(&self, page: PageId) -> Result<usize> {
        Ok(self.bucket_view(page)?.len())
    }

    fn page_entry(&self, page: PageId, slot: usize) -> Result<Self::Item> {
        Ok(self.bucket_view(page)?.entry(slot))
    }
}

impl<K, D, S> Table<K, D> for Fagin<K, D, S>
where
    K: IndexKey,
    D: PageValue,
    S: Storage,
{
    fn insert(&mut self, key: K, data: D) -> Result<()> {
        Fagin::insert(self, key, data)
    }

    fn erase(&mut self, key: &K) -> Result<bool> {
        Fagin::erase(self, key)
    }

    fn get(&self, key: &K) -> Result<Option<D>> {
        Fagin::get(self, key)
    }

    fn len(&self) -> u64 {
        Fagin::len(self)
    }

    fn verify(&self) -> Result<bool> {
        Fagin::verify(self)
    }
}
