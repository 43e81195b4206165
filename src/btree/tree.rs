//! # B-Tree Operations
//!
//! Descent, proactive split and merge, point operations and the page walk
//! backing the shared cursor.
//!
//! ## Insert
//!
//! ```text
//! 1. Descend to the leaf, recording (page, child slot) per interior node
//! 2. Leaf insertable (not full, or key already present)? Place the entry
//! 3. Otherwise walk the path leaf-to-root for the deepest non-full node
//!    and split its (full) child; with no such node, grow a new root above
//!    the old one and split the old root under it
//! 4. Re-descend and repeat until the leaf takes the entry
//! ```
//!
//! A split moves the upper half of the child into a fresh sibling and
//! duplicates the child's parent entry, so the left copy keeps the child
//! with its new last key and the right copy hands the old bound to the
//! sibling.
//!
//! ## Erase
//!
//! The mirror image: while the leaf sits at the fill floor and holds the
//! key, the deepest ancestor with spare entries merges the deficient child
//! with an adjacent sibling (rebalancing instead when both halves together
//! overflow one page), and a root reduced to a single child is collapsed.
//!
//! ## Multi-Page Moves
//!
//! The backend hands out one page borrow at a time, so every structural
//! operation runs in phases: copy what it needs out of one page, then
//! rewrite the others. Entries are small `Copy` records; the copies are
//! geometry-bounded.

use std::marker::PhantomData;

use eyre::{ensure, Result};
use log::debug;
use smallvec::SmallVec;

use super::node::{BtreeHeader, InteriorEntry, KeyedEntry, LeafEntry};
use crate::cursor::{Cursor, Iter, PageWalk};
use crate::page::{Entry, Header, IndexKey, PageMut, PageRef, PageValue};
use crate::storage::{PageId, Storage};
use crate::table::Table;

/// One interior step of a descent: the node and the child slot taken.
#[derive(Debug, Clone, Copy)]
struct PathStep {
    page: PageId,
    slot: usize,
}

/// A materialized root-to-leaf path. `steps` covers the interior nodes in
/// root-first order; the leaf terminates the path without a child slot.
struct SearchPath {
    steps: SmallVec<[PathStep; 8]>,
    leaf: PageId,
}

/// Clustered B-tree index over a page storage backend.
pub struct Btree<K, D, S> {
    store: S,
    root: PageId,
    size: u64,
    _marker: PhantomData<fn(K, D)>,
}

impl<K, D, S> Btree<K, D, S>
where
    K: IndexKey,
    D: PageValue,
    S: Storage,
{
    /// Creates an empty tree: a single leaf root.
    pub fn create(mut store: S) -> Result<Self> {
        let page_size = store.page_size();
        let root = store.create_page()?;
        {
            let bytes = store.page_mut(root)?;
            PageMut::<BtreeHeader, LeafEntry<K, D>>::init(bytes, page_size, root)?;
        }
        store.release_page(root)?;
        Ok(Self {
            store,
            root,
            size: 0,
            _marker: PhantomData,
        })
    }

    pub fn root_page(&self) -> PageId {
        self.root
    }

    pub fn len(&self) -> u64 {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn storage(&self) -> &S {
        &self.store
    }

    pub fn storage_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// Cursor on the entry holding `key`, or `None` on a miss.
    pub fn find(&self, key: &K) -> Result<Option<Cursor<'_, Self>>> {
        let path = self.search_path(key)?;
        let view = self.leaf_view(path.leaf)?;
        let slot = view.partition_point(|e| e.key < *key);
        if slot < view.len() && view.entry(slot).key == *key {
            Ok(Some(Cursor::new(self, Some((path.leaf, slot)))))
        } else {
            Ok(None)
        }
    }

    /// Copies out the data stored under `key`.
    pub fn get(&self, key: &K) -> Result<Option<D>> {
        let path = self.search_path(key)?;
        let view = self.leaf_view(path.leaf)?;
        let slot = view.partition_point(|e| e.key < *key);
        if slot < view.len() {
            let entry = view.entry(slot);
            if entry.key == *key {
                return Ok(Some(entry.data));
            }
        }
        Ok(None)
    }

    /// Inserts `key -> data`; an existing key has its data replaced in
    /// place with no structural change.
    pub fn insert(&mut self, key: K, data: D) -> Result<()> {
        let leaf = self.prepare_insert(&key)?;

        let bytes = self.store.page_mut(leaf)?;
        let mut page = PageMut::<BtreeHeader, LeafEntry<K, D>>::new(bytes)?;
        let slot = page.as_ref().partition_point(|e| e.key < key);
        if slot < page.len() && page.as_ref().entry(slot).key == key {
            page.set_entry(slot, Entry { key, data });
        } else {
            page.insert(slot, Entry { key, data });
            self.size += 1;
        }
        self.store.update_page(leaf)?;
        Ok(())
    }

    /// Removes `key`; `true` iff it was present.
    pub fn erase(&mut self, key: &K) -> Result<bool> {
        let leaf = self.prepare_erase(key)?;

        let bytes = self.store.page_mut(leaf)?;
        let mut page = PageMut::<BtreeHeader, LeafEntry<K, D>>::new(bytes)?;
        let slot = page.as_ref().partition_point(|e| e.key < *key);
        if slot < page.len() && page.as_ref().entry(slot).key == *key {
            page.erase(slot);
            self.size -= 1;
            self.store.update_page(leaf)?;
            Ok(true)
        } else {
            Ok(false)
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

    /// Checks the structural invariants level by level: uniform node height
    /// per level, key order across each level, fill bounds on every
    /// non-root node.
    pub fn verify(&self) -> Result<bool> {
        let mut expected_height = self.header(self.root)?.node_height();
        let mut level: Vec<PageId> = vec![self.root];
        let mut ok = true;

        loop {
            for &page in &level {
                let header = self.header(page)?;
                if header.node_height() != expected_height {
                    ok = false;
                }
                let base = header.base();
                if base.size() > base.max_size() {
                    ok = false;
                }
                if page != self.root && base.size() < header.min_size() {
                    ok = false;
                }
                if !header.is_leaf() && base.size() == 0 {
                    ok = false;
                }
            }

            if expected_height == 0 {
                ok &= self.level_ordered::<LeafEntry<K, D>>(&level)?;
                break;
            }
            ok &= self.level_ordered::<InteriorEntry<K>>(&level)?;

            let mut next = Vec::new();
            for &page in &level {
                let view = self.interior_view(page)?;
                next.extend(view.entries().map(|e| e.data));
            }
            level = next;
            expected_height -= 1;
        }

        Ok(ok)
    }

    /// Keys strictly increase across the concatenated entries of a level.
    fn level_ordered<T: KeyedEntry<K>>(&self, level: &[PageId]) -> Result<bool> {
        let mut prev: Option<K> = None;
        for &page in level {
            let view = PageRef::<BtreeHeader, T>::new(self.store.page(page)?)?;
            for i in 0..view.len() {
                let key = view.entry(i).key();
                if let Some(p) = &prev {
                    if *p >= key {
                        return Ok(false);
                    }
                }
                prev = Some(key);
            }
        }
        Ok(true)
    }

    fn header(&self, page: PageId) -> Result<BtreeHeader> {
        let view = PageRef::<BtreeHeader, u8>::new(self.store.page(page)?)?;
        Ok(*view.header())
    }

    fn leaf_view(&self, page: PageId) -> Result<PageRef<'_, BtreeHeader, LeafEntry<K, D>>> {
        PageRef::new(self.store.page(page)?)
    }

    fn interior_view(&self, page: PageId) -> Result<PageRef<'_, BtreeHeader, InteriorEntry<K>>> {
        PageRef::new(self.store.page(page)?)
    }

    /// Descends from the root, taking at each interior node the first child
    /// whose separator is at least `key`.
    fn search_path(&self, key: &K) -> Result<SearchPath> {
        let mut steps = SmallVec::new();
        let mut page = self.root;

        loop {
            if self.header(page)?.is_leaf() {
                return Ok(SearchPath { steps, leaf: page });
            }
            let view = self.interior_view(page)?;
            ensure!(!view.is_empty(), "interior page {} has no children", page);
            // the rightmost separator is the subtree supremum; clamping
            // keeps a key above every real separator in the tree
            let slot = view
                .partition_point(|e| e.key < *key)
                .min(view.len() - 1);
            let child = view.entry(slot).data;
            steps.push(PathStep { page, slot });
            page = child;
        }
    }

    /// True when an insert of `key` lands in `leaf` without restructuring.
    fn leaf_insertable(&self, leaf: PageId, key: &K) -> Result<bool> {
        let view = self.leaf_view(leaf)?;
        if !view.is_full() {
            return Ok(true);
        }
        let slot = view.partition_point(|e| e.key < *key);
        Ok(slot < view.len() && view.entry(slot).key == *key)
    }

    /// True when an erase of `key` leaves `leaf` within its fill floor.
    fn leaf_erasable(&self, path: &SearchPath, key: &K) -> Result<bool> {
        if path.steps.is_empty() {
            // a leaf root may drain completely
            return Ok(true);
        }
        let view = self.leaf_view(path.leaf)?;
        if view.len() as u64 > view.header().min_size() {
            return Ok(true);
        }
        let slot = view.partition_point(|e| e.key < *key);
        Ok(!(slot < view.len() && view.entry(slot).key == *key))
    }

    /// Splits along the path until the target leaf can absorb an insert.
    fn prepare_insert(&mut self, key: &K) -> Result<PageId> {
        loop {
            let path = self.search_path(key)?;
            if self.leaf_insertable(path.leaf, key)? {
                return Ok(path.leaf);
            }

            let mut split_at = None;
            for i in (0..path.steps.len()).rev() {
                if !self.header(path.steps[i].page)?.base().is_full() {
                    split_at = Some(i);
                    break;
                }
            }

            match split_at {
                Some(i) => {
                    let parent = path.steps[i];
                    let child = if i + 1 < path.steps.len() {
                        path.steps[i + 1].page
                    } else {
                        path.leaf
                    };
                    self.split_child(parent.page, parent.slot, child)?;
                }
                None => self.split_root()?,
            }
        }
    }

    /// Merges along the path until the target leaf can absorb an erase.
    fn prepare_erase(&mut self, key: &K) -> Result<PageId> {
        loop {
            let path = self.search_path(key)?;
            if self.leaf_erasable(&path, key)? {
                return Ok(path.leaf);
            }

            let mut merge_at = None;
            for i in (0..path.steps.len()).rev() {
                let header = self.header(path.steps[i].page)?;
                let has_room = if path.steps[i].page == self.root {
                    header.base().size() >= 2
                } else {
                    header.base().size() > header.min_size()
                };
                if has_room {
                    merge_at = Some(i);
                    break;
                }
            }

            match merge_at {
                Some(i) => {
                    let step = path.steps[i];
                    self.merge_children(step.page, step.slot)?;
                }
                None => self.collapse_root()?,
            }
        }
    }

    /// Grows a new root one level above the old one, whose only child is the
    /// old root, then splits the old root under it.
    fn split_root(&mut self) -> Result<()> {
        let old_root = self.root;
        let height = self.header(old_root)?.node_height();
        let page_size = self.store.page_size();

        let new_root = self.store.create_page()?;
        {
            let bytes = self.store.page_mut(new_root)?;
            let mut page = PageMut::<BtreeHeader, InteriorEntry<K>>::init(bytes, page_size, new_root)?;
            page.header_mut().set_node_height(height + 1);
            page.push_back(Entry {
                key: K::SUPREMUM,
                data: old_root,
            });
        }
        self.root = new_root;
        debug!(
            "btree root grows: page {} above page {} (height {})",
            new_root,
            old_root,
            height + 1
        );

        self.split_child(new_root, 0, old_root)
    }

    /// Promotes a single-child root's child to root.
    fn collapse_root(&mut self) -> Result<()> {
        let view = self.interior_view(self.root)?;
        ensure!(
            !view.header().is_leaf() && view.len() == 1,
            "root page {} cannot collapse with {} entries",
            self.root,
            view.len()
        );
        let child = view.entry(0).data;
        debug!("btree root collapses: page {} replaced by page {}", self.root, child);
        self.root = child;
        Ok(())
    }

    fn split_child(&mut self, parent: PageId, slot: usize, child: PageId) -> Result<()> {
        if self.header(child)?.is_leaf() {
            self.split_typed::<LeafEntry<K, D>>(parent, slot, child)
        } else {
            self.split_typed::<InteriorEntry<K>>(parent, slot, child)
        }
    }

    /// Moves the upper half of `child` into a fresh sibling and duplicates
    /// the parent entry so both halves are bounded: the left copy keeps
    /// `child` under its new last key, the right copy hands the old bound
    /// to the sibling.
    fn split_typed<T: KeyedEntry<K>>(&mut self, parent: PageId, slot: usize, child: PageId) -> Result<()> {
        let page_size = self.store.page_size();
        let sibling = self.store.create_page()?;

        let (height, keep, moved, child_key) = {
            let view = PageRef::<BtreeHeader, T>::new(self.store.page(child)?)?;
            let len = view.len();
            ensure!(len >= 2, "page {} too small to split ({} entries)", child, len);
            let keep = len - len.div_ceil(2);
            let moved: SmallVec<[T; 16]> = (keep..len).map(|i| view.entry(i)).collect();
            (
                view.header().node_height(),
                keep,
                moved,
                view.entry(keep - 1).key(),
            )
        };
        let moved_count = moved.len();

        {
            let bytes = self.store.page_mut(sibling)?;
            let mut page = PageMut::<BtreeHeader, T>::init(bytes, page_size, sibling)?;
            page.header_mut().set_node_height(height);
            page.extend(moved);
        }
        {
            let bytes = self.store.page_mut(child)?;
            let mut page = PageMut::<BtreeHeader, T>::new(bytes)?;
            page.truncate(keep);
        }
        {
            let bytes = self.store.page_mut(parent)?;
            let mut page = PageMut::<BtreeHeader, InteriorEntry<K>>::new(bytes)?;
            let old = page.as_ref().entry(slot);
            debug_assert_eq!(old.data, child);
            page.insert(slot, old);
            page.set_entry(
                slot,
                Entry {
                    key: child_key,
                    data: child,
                },
            );
            page.set_entry(
                slot + 1,
                Entry {
                    key: old.key,
                    data: sibling,
                },
            );
        }
        self.store.update_page(parent)?;
        debug!(
            "btree split: page {} sheds {} entries to page {} under page {}",
            child, moved_count, sibling, parent
        );
        Ok(())
    }

    /// Merges (or rebalances) the child at `child_slot` of `parent` with an
    /// adjacent sibling.
    fn merge_children(&mut self, parent: PageId, child_slot: usize) -> Result<()> {
        let (left_slot, left, right) = {
            let view = self.interior_view(parent)?;
            let len = view.len();
            ensure!(
                len >= 2,
                "page {} has no sibling pair to merge ({} entries)",
                parent,
                len
            );
            let left_slot = if child_slot + 1 < len {
                child_slot
            } else {
                len - 2
            };
            (left_slot, view.entry(left_slot).data, view.entry(left_slot + 1).data)
        };
        let child_is_left = child_slot == left_slot;

        if self.header(left)?.is_leaf() {
            self.merge_typed::<LeafEntry<K, D>>(parent, left_slot, left, right, child_is_left)
        } else {
            self.merge_typed::<InteriorEntry<K>>(parent, left_slot, left, right, child_is_left)
        }
    }

    fn merge_typed<T: KeyedEntry<K>>(
        &mut self,
        parent: PageId,
        left_slot: usize,
        left: PageId,
        right: PageId,
        child_is_left: bool,
    ) -> Result<()> {
        let (left_len, max_len) = {
            let view = PageRef::<BtreeHeader, T>::new(self.store.page(left)?)?;
            (view.len(), view.max_len())
        };
        let right_entries: Vec<T> = {
            let view = PageRef::<BtreeHeader, T>::new(self.store.page(right)?)?;
            view.entries().collect()
        };

        if left_len + right_entries.len() <= max_len {
            // full merge; the right page is abandoned to the backend
            {
                let bytes = self.store.page_mut(left)?;
                let mut page = PageMut::<BtreeHeader, T>::new(bytes)?;
                page.extend(right_entries);
            }
            {
                let bytes = self.store.page_mut(parent)?;
                let mut page = PageMut::<BtreeHeader, InteriorEntry<K>>::new(bytes)?;
                let hi = page.as_ref().entry(left_slot + 1);
                page.set_entry(
                    left_slot,
                    Entry {
                        key: hi.key,
                        data: left,
                    },
                );
                page.erase(left_slot + 1);
            }
            self.store.update_page(parent)?;
            debug!(
                "btree merge: page {} absorbs page {} under page {}",
                left, right, parent
            );
        } else {
            // both halves together overflow one page: rebalance instead,
            // giving the deficient side the larger half
            let total = left_len + right_entries.len();
            let target = total.div_ceil(2);

            if child_is_left {
                let take = target - left_len;
                {
                    let bytes = self.store.page_mut(left)?;
                    let mut page = PageMut::<BtreeHeader, T>::new(bytes)?;
                    page.extend(right_entries[..take].iter().copied());
                }
                {
                    let bytes = self.store.page_mut(right)?;
                    let mut page = PageMut::<BtreeHeader, T>::new(bytes)?;
                    page.truncate(0);
                    page.extend(right_entries[take..].iter().copied());
                }
            } else {
                let take = target - right_entries.len();
                let moved: Vec<T> = {
                    let view = PageRef::<BtreeHeader, T>::new(self.store.page(left)?)?;
                    ((left_len - take)..left_len).map(|i| view.entry(i)).collect()
                };
                {
                    let bytes = self.store.page_mut(left)?;
                    let mut page = PageMut::<BtreeHeader, T>::new(bytes)?;
                    page.truncate(left_len - take);
                }
                {
                    let bytes = self.store.page_mut(right)?;
                    let mut page = PageMut::<BtreeHeader, T>::new(bytes)?;
                    page.truncate(0);
                    page.extend(moved.into_iter().chain(right_entries));
                }
            }

            let left_key = {
                let view = PageRef::<BtreeHeader, T>::new(self.store.page(left)?)?;
                view.entry(view.len() - 1).key()
            };
            {
                let bytes = self.store.page_mut(parent)?;
                let mut page = PageMut::<BtreeHeader, InteriorEntry<K>>::new(bytes)?;
                page.set_entry(
                    left_slot,
                    Entry {
                        key: left_key,
                        data: left,
                    },
                );
            }
            self.store.update_page(parent)?;
            debug!(
                "btree rebalance: pages {} and {} share {} entries under page {}",
                left, right, total, parent
            );
        }
        Ok(())
    }

    /// Leftmost leaf of the subtree under `page`.
    fn descend_min(&self, mut page: PageId) -> Result<PageId> {
        loop {
            if self.header(page)?.is_leaf() {
                return Ok(page);
            }
            let view = self.interior_view(page)?;
            ensure!(!view.is_empty(), "interior page {} has no children", page);
            page = view.entry(0).data;
        }
    }

    /// Rightmost leaf of the subtree under `page`.
    fn descend_max(&self, mut page: PageId) -> Result<PageId> {
        loop {
            if self.header(page)?.is_leaf() {
                return Ok(page);
            }
            let view = self.interior_view(page)?;
            ensure!(!view.is_empty(), "interior page {} has no children", page);
            page = view.entry(view.len() - 1).data;
        }
    }
}

impl<K, D, S> PageWalk for Btree<K, D, S>
where
    K: IndexKey,
    D: PageValue,
    S: Storage,
{
    type Item = LeafEntry<K, D>;

    fn first_page(&self) -> Result<Option<PageId>> {
        Ok(Some(self.descend_min(self.root)?))
    }

    fn last_page(&self) -> Result<Option<PageId>> {
        Ok(Some(self.descend_max(self.root)?))
    }

    /// Re-descends by the leaf's leading key and branches at the deepest
    /// ancestor whose child slot is not yet the last, then takes the minimum
    /// subtree from there.
    fn next_page(&self, page: PageId) -> Result<Option<PageId>> {
        let first_key = {
            let view = self.leaf_view(page)?;
            match view.first() {
                Some(entry) => entry.key,
                None => return Ok(None),
            }
        };
        let path = self.search_path(&first_key)?;
        for step in path.steps.iter().rev() {
            let view = self.interior_view(step.page)?;
            if step.slot + 1 < view.len() {
                let child = view.entry(step.slot + 1).data;
                return Ok(Some(self.descend_min(child)?));
            }
        }
        Ok(None)
    }

    fn prev_page(&self, page: PageId) -> Result<Option<PageId>> {
        let first_key = {
            let view = self.leaf_view(page)?;
            match view.first() {
                Some(entry) => entry.key,
                None => return Ok(None),
            }
        };
        let path = self.search_path(&first_key)?;
        for step in path.steps.iter().rev() {
            if step.slot > 0 {
                let view = self.interior_view(step.page)?;
                let child = view.entry(step.slot - 1).data;
                return Ok(Some(self.descend_max(child)?));
            }
        }
        Ok(None)
    }

    fn page_len(&self, page: PageId) -> Result<usize> {
        Ok(self.leaf_view(page)?.len())
    }

    fn page_entry(&self, page: PageId, slot: usize) -> Result<Self::Item> {
        Ok(self.leaf_view(page)?.entry(slot))
    }
}

impl<K, D, S> Table<K, D> for Btree<K, D, S>
where
    K: IndexKey,
    D: PageValue,
    S: Storage,
{
    fn insert(&mut self, key: K, data: D) -> Result<()> {
        Btree::insert(self, key, data)
    }

    fn erase(&mut self, key: &K) -> Result<bool> {
        Btree::erase(self, key)
    }

    fn get(&self, key: &K) -> Result<Option<D>> {
        Btree::get(self, key)
    }

    fn len(&self) -> u64 {
        Btree::len(self)
    }

    fn verify(&self) -> Result<bool> {
        Btree::verify(self)
    }
}
