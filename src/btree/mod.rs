//! # B-Tree Index
//!
//! A clustered, order-preserving B-tree over backend pages.
//!
//! ## Node Model
//!
//! Every node is one page: a [`BtreeHeader`](node::BtreeHeader) followed by a
//! sorted entry array.
//!
//! - **Leaves** (`node_height == 0`) hold `(key, data)` entries.
//! - **Interior nodes** hold `(separator, child page id)` entries; a node
//!   with `size` entries has `size` children. Every key in the child subtree
//!   under an entry is at most that entry's separator, and the rightmost
//!   entry carries the subtree's supremum so descent always has a separator
//!   at least as large as the search key.
//!
//! ## Descent Paths
//!
//! Every operation first materializes the root-to-leaf path as a sequence of
//! `(page id, child slot)` pairs. Restructuring never chases stale pointers:
//! after a split or merge the operation simply re-descends, because ids and
//! slots stay meaningful where borrowed page views would not.
//!
//! ## Proactive Restructuring
//!
//! Splits happen on the way *in*: before an insert touches a leaf, the
//! deepest ancestor with a free slot splits its full child (growing a new
//! root when everything is full), and the insert re-descends until the leaf
//! can take the entry. Merges mirror this on erase: the deepest ancestor
//! with spare entries merges (or rebalances) the deficient child with an
//! adjacent sibling, collapsing the root when it is down to a single child.
//! Structural invariants therefore hold at every public call boundary, never
//! just eventually.

pub mod node;
pub mod tree;

pub use node::{BtreeHeader, InteriorEntry, LeafEntry};
pub use tree::Btree;
