//! B-tree node primitives: the page header and the entry aliases the tree
//! code works with.

use zerocopy::little_endian::U64;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::page::{Entry, Header, HeaderBase, PageValue};
use crate::storage::PageId;

/// Page header for B-tree nodes. `node_height` is 0 at leaves; a parent is
/// one above the tallest of its children, so equal-height siblings keep all
/// leaves at the same depth.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct BtreeHeader {
    base: HeaderBase,
    node_height: U64,
}

impl BtreeHeader {
    le_u64_accessors! { node_height }

    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.node_height() == 0
    }

    /// Fill floor for non-root nodes.
    #[inline]
    pub fn min_size(&self) -> u64 {
        self.base.max_size() / 2
    }
}

impl Header for BtreeHeader {
    #[inline]
    fn base(&self) -> &HeaderBase {
        &self.base
    }

    #[inline]
    fn base_mut(&mut self) -> &mut HeaderBase {
        &mut self.base
    }
}

/// Leaf entry: a key and its stored data.
pub type LeafEntry<K, D> = Entry<K, D>;

/// Interior entry: a separator key and the child page it bounds.
pub type InteriorEntry<K> = Entry<K, PageId>;

/// Entry types the split/merge machinery can move while tracking keys.
/// One impl covers both leaf entries (`D` = data) and interior entries
/// (`D` = [`PageId`]).
pub(crate) trait KeyedEntry<K>: PageValue {
    fn key(&self) -> K;
}

impl<K: Copy + PageValue, D: PageValue> KeyedEntry<K> for Entry<K, D> {
    #[inline]
    fn key(&self) -> K {
        self.key
    }
}
