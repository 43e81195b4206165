//! The capability set the three index structures share. Generic harnesses
//! (the geometry sweep binary, the integration suites) consume this trait;
//! the indexes themselves never dispatch through it.

use eyre::Result;

/// Point operations common to every index in this crate.
pub trait Table<K, D> {
    /// Inserts `key -> data`, replacing the data in place if the key is
    /// already present.
    fn insert(&mut self, key: K, data: D) -> Result<()>;

    /// Removes `key`; `true` iff it was present.
    fn erase(&mut self, key: &K) -> Result<bool>;

    /// Copies out the data stored under `key`, if any.
    fn get(&self, key: &K) -> Result<Option<D>>;

    /// Number of live entries.
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Checks the structure's invariants; `true` iff they all hold.
    fn verify(&self) -> Result<bool>;
}
