//! # Stratum - Paged Index Containers
//!
//! Stratum is a library of three disk-oriented indexed containers built on a
//! shared page-based storage abstraction:
//!
//! - [`Btree`]: a clustered, order-preserving B-tree. Interior nodes hold
//!   separators and child page ids, leaves hold key/value entries, and every
//!   mutation works through an explicitly materialized root-to-leaf path.
//! - [`Fagin`]: Fagin's extendible hash table. A power-of-two directory of
//!   bucket page ids, each bucket carrying a local depth; bucket overflow
//!   splits the bucket and doubles the directory as needed.
//! - [`LarsonKalja`]: the Larson-Kalja multi-signature hash table. A fixed
//!   directory of (bucket, separator) pairs and a growable family of hash
//!   functions; overflow tightens a bucket's separator and re-places the
//!   ejected entries with their hash index advanced.
//!
//! ## Architecture
//!
//! ```text
//! +--------------------------------------------------+
//! |        Index structures (btree / fagin / lk)     |
//! +--------------------------------------------------+
//! |  Shared cursor protocol    |   Universal hashing |
//! +--------------------------------------------------+
//! |    Page container (header + entry array view)    |
//! +--------------------------------------------------+
//! |      Storage backend (fixed-size byte pages)     |
//! +--------------------------------------------------+
//! ```
//!
//! The backend owns all page bytes and hands out borrows that never survive
//! the next backend call; the borrow checker enforces this at compile time.
//! Indexes hold only page ids plus small auxiliary containers (search paths,
//! work queues, directories) whose sizes follow tree or directory geometry,
//! never the dataset.
//!
//! ## Quick Start
//!
//! ```ignore
//! use stratum::{Btree, MemStorage, Table};
//!
//! let store = MemStorage::new(4096);
//! let mut tree: Btree<u64, u64, _> = Btree::create(store)?;
//!
//! tree.insert(1, 10)?;
//! tree.insert(2, 20)?;
//! assert_eq!(tree.get(&1)?, Some(10));
//!
//! for entry in tree.iter()? {
//!     let entry = entry?;
//!     println!("{} -> {}", entry.key, entry.data);
//! }
//! ```
//!
//! ## Module Overview
//!
//! - [`storage`]: the backend contract, the in-memory backend, snapshots
//! - [`page`]: the typed header-plus-entry-array view over a raw page
//! - [`hash`]: the refreshable universal hash family
//! - [`btree`]: the B-tree index
//! - [`fagin`]: the extendible hash index
//! - [`larson_kalja`]: the multi-signature hash index
//! - [`cursor`]: the bidirectional cross-page cursor shared by all three
//! - [`table`]: the capability trait the three indexes have in common

#[macro_use]
mod macros;

pub mod btree;
pub mod cursor;
pub mod fagin;
pub mod hash;
pub mod larson_kalja;
pub mod page;
pub mod storage;
pub mod table;

pub use btree::Btree;
pub use cursor::{Cursor, Iter, PageWalk};
pub use fagin::Fagin;
pub use hash::UniversalHash;
pub use larson_kalja::LarsonKalja;
pub use page::{Entry, IndexKey, PageValue};
pub use storage::{MemStorage, PageId, Storage};
pub use table::Table;
