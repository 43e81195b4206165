//! # In-Memory Backend
//!
//! The reference [`Storage`] implementation: a map from page id to a
//! heap-allocated byte buffer. `save_page`, `update_page` and `release_page`
//! are no-ops because the buffers are the storage.
//!
//! ## Snapshot Format
//!
//! The whole backend can be written to a file and restored from it. The
//! format is a decimal `page_count` line followed by, for each page in
//! ascending id order:
//!
//! ```text
//! <page_id>\n
//! <exactly page_size raw bytes>\n
//! ```
//!
//! `save_to` followed by `load_from` round-trips bit for bit.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

use eyre::{ensure, Result, WrapErr};
use hashbrown::HashMap;

use super::{PageId, Storage};

/// In-memory page storage.
#[derive(Debug)]
pub struct MemStorage {
    page_size: usize,
    pages: HashMap<PageId, Box<[u8]>>,
    next_id: u64,
}

impl MemStorage {
    /// Creates an empty backend serving pages of `page_size` bytes.
    ///
    /// Panics if `page_size` is zero; a zero-byte page cannot hold a header.
    pub fn new(page_size: usize) -> Self {
        assert!(page_size > 0, "page size must be positive");
        Self {
            page_size,
            pages: HashMap::new(),
            next_id: 0,
        }
    }

    /// Writes every page to `path` in the snapshot format.
    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let file = File::create(path)
            .wrap_err_with(|| format!("creating snapshot {}", path.display()))?;
        let mut out = BufWriter::new(file);

        let mut ids: Vec<PageId> = self.pages.keys().copied().collect();
        ids.sort_unstable();

        writeln!(out, "{}", ids.len())?;
        for id in ids {
            writeln!(out, "{}", id.get())?;
            out.write_all(&self.pages[&id])?;
            out.write_all(b"\n")?;
        }
        out.flush()?;
        Ok(())
    }

    /// Replaces the backend's contents with the snapshot at `path`.
    ///
    /// The snapshot must have been written by a backend with the same page
    /// size; the format does not record it.
    pub fn load_from(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let file = File::open(path)
            .wrap_err_with(|| format!("opening snapshot {}", path.display()))?;
        let mut input = BufReader::new(file);

        let page_count: usize = read_decimal_line(&mut input)
            .wrap_err("reading snapshot page count")?;

        let mut pages = HashMap::with_capacity(page_count);
        let mut max_id = None;

        for _ in 0..page_count {
            let raw_id: u64 = read_decimal_line(&mut input)
                .wrap_err("reading snapshot page id")?;
            let id = PageId::new(raw_id);

            let mut bytes = vec![0u8; self.page_size].into_boxed_slice();
            input
                .read_exact(&mut bytes)
                .wrap_err_with(|| format!("reading {} bytes of page {}", self.page_size, id))?;

            let mut newline = [0u8; 1];
            input
                .read_exact(&mut newline)
                .wrap_err_with(|| format!("reading terminator of page {}", id))?;
            ensure!(
                newline[0] == b'\n',
                "malformed snapshot: page {} not newline-terminated",
                id
            );

            ensure!(
                pages.insert(id, bytes).is_none(),
                "malformed snapshot: duplicate page id {}",
                id
            );
            max_id = Some(max_id.map_or(raw_id, |m: u64| m.max(raw_id)));
        }

        self.pages = pages;
        self.next_id = max_id.map_or(0, |m| m + 1);
        Ok(())
    }

    /// Drops every page and resets the id counter.
    pub fn clear(&mut self) {
        self.pages.clear();
        self.next_id = 0;
    }
}

fn read_decimal_line<N: std::str::FromStr>(input: &mut impl BufRead) -> Result<N>
where
    N::Err: std::error::Error + Send + Sync + 'static,
{
    let mut line = String::new();
    let read = input.read_line(&mut line)?;
    ensure!(read > 0, "malformed snapshot: unexpected end of file");
    Ok(line.trim_end_matches('\n').parse::<N>()?)
}

impl Storage for MemStorage {
    fn page_size(&self) -> usize {
        self.page_size
    }

    fn create_page(&mut self) -> Result<PageId> {
        let id = PageId::new(self.next_id);
        self.next_id += 1;
        self.pages
            .insert(id, vec![0u8; self.page_size].into_boxed_slice());
        Ok(id)
    }

    fn page(&self, id: PageId) -> Result<&[u8]> {
        self.pages
            .get(&id)
            .map(|b| &b[..])
            .ok_or_else(|| eyre::eyre!("unknown page {}", id))
    }

    fn page_mut(&mut self, id: PageId) -> Result<&mut [u8]> {
        self.pages
            .get_mut(&id)
            .map(|b| &mut b[..])
            .ok_or_else(|| eyre::eyre!("unknown page {}", id))
    }

    fn save_page(&mut self, _id: PageId) -> Result<()> {
        Ok(())
    }

    fn update_page(&mut self, _id: PageId) -> Result<()> {
        Ok(())
    }

    fn release_page(&mut self, _id: PageId) -> Result<()> {
        Ok(())
    }

    fn page_count(&self) -> u64 {
        self.pages.len() as u64
    }
}
