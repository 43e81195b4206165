//! # Cross-Page Cursor
//!
//! The bidirectional iteration protocol shared by all three index
//! structures. A [`Cursor`] is an entry position (page id plus slot) layered
//! over an index-specific page sequence; the index only has to say how to
//! walk its pages ([`PageWalk`]) and the cursor handles the entry-level
//! movement, page boundaries and empty pages.
//!
//! The end state is no position at all. Advancing an end cursor wraps to the
//! first entry; retreating an end cursor lands on the last entry, so
//! `end - 1` names the final entry the way it does for the in-page arrays.
//!
//! Cursors copy entries out rather than handing out references: page bytes
//! belong to the backend and a borrow must not survive the next backend
//! call. Entries are small `Copy` records, so this is a register-sized copy.

use eyre::Result;

use crate::storage::PageId;

/// Index-specific page sequence: how to find the first and last page and how
/// to step between neighbors, plus entry access within a page.
pub trait PageWalk {
    /// Entry type the pages hold.
    type Item: Copy;

    fn first_page(&self) -> Result<Option<PageId>>;
    fn last_page(&self) -> Result<Option<PageId>>;
    fn next_page(&self, page: PageId) -> Result<Option<PageId>>;
    fn prev_page(&self, page: PageId) -> Result<Option<PageId>>;

    /// Live entries on `page`.
    fn page_len(&self, page: PageId) -> Result<usize>;

    /// Copies out the entry at `slot` on `page`.
    fn page_entry(&self, page: PageId, slot: usize) -> Result<Self::Item>;
}

/// Bidirectional cursor over an index's entries.
pub struct Cursor<'t, W: PageWalk> {
    table: &'t W,
    pos: Option<(PageId, usize)>,
}

impl<'t, W: PageWalk> Clone for Cursor<'t, W> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<'t, W: PageWalk> Copy for Cursor<'t, W> {}

impl<'t, W: PageWalk> PartialEq for Cursor<'t, W> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.table, other.table) && self.pos == other.pos
    }
}

impl<'t, W: PageWalk> Cursor<'t, W> {
    pub(crate) fn new(table: &'t W, pos: Option<(PageId, usize)>) -> Self {
        Self { table, pos }
    }

    /// The end cursor: one past the last entry, one before the first.
    pub fn end(table: &'t W) -> Self {
        Self { table, pos: None }
    }

    /// Cursor on the first entry, or end if the index is empty.
    pub fn at_first(table: &'t W) -> Result<Self> {
        let mut page = table.first_page()?;
        while let Some(p) = page {
            if table.page_len(p)? > 0 {
                return Ok(Self::new(table, Some((p, 0))));
            }
            page = table.next_page(p)?;
        }
        Ok(Self::end(table))
    }

    /// Cursor on the last entry, or end if the index is empty.
    pub fn at_last(table: &'t W) -> Result<Self> {
        let mut page = table.last_page()?;
        while let Some(p) = page {
            let len = table.page_len(p)?;
            if len > 0 {
                return Ok(Self::new(table, Some((p, len - 1))));
            }
            page = table.prev_page(p)?;
        }
        Ok(Self::end(table))
    }

    #[inline]
    pub fn is_end(&self) -> bool {
        self.pos.is_none()
    }

    /// Current (page, slot) position, if not at end.
    #[inline]
    pub fn position(&self) -> Option<(PageId, usize)> {
        self.pos
    }

    /// Copies out the current entry; `None` at end.
    pub fn entry(&self) -> Result<Option<W::Item>> {
        match self.pos {
            Some((page, slot)) => Ok(Some(self.table.page_entry(page, slot)?)),
            None => Ok(None),
        }
    }

    /// Moves to the next entry; from the last entry moves to end, from end
    /// wraps to the first entry.
    pub fn advance(&mut self) -> Result<()> {
        match self.pos {
            None => {
                *self = Self::at_first(self.table)?;
            }
            Some((page, slot)) => {
                if slot + 1 < self.table.page_len(page)? {
                    self.pos = Some((page, slot + 1));
                } else {
                    let mut next = self.table.next_page(page)?;
                    self.pos = None;
                    while let Some(p) = next {
                        if self.table.page_len(p)? > 0 {
                            self.pos = Some((p, 0));
                            break;
                        }
                        next = self.table.next_page(p)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Moves to the previous entry; from the first entry moves to end, from
    /// end moves to the last entry.
    pub fn retreat(&mut self) -> Result<()> {
        match self.pos {
            None => {
                *self = Self::at_last(self.table)?;
            }
            Some((page, slot)) => {
                if slot > 0 {
                    self.pos = Some((page, slot - 1));
                } else {
                    let mut prev = self.table.prev_page(page)?;
                    self.pos = None;
                    while let Some(p) = prev {
                        let len = self.table.page_len(p)?;
                        if len > 0 {
                            self.pos = Some((p, len - 1));
                            break;
                        }
                        prev = self.table.prev_page(p)?;
                    }
                }
            }
        }
        Ok(())
    }
}

/// Forward iterator over an index's entries, built on [`Cursor`].
///
/// Unlike a bare cursor it stops at end instead of wrapping.
pub struct Iter<'t, W: PageWalk> {
    cursor: Cursor<'t, W>,
    failed: bool,
}

impl<'t, W: PageWalk> Iter<'t, W> {
    pub(crate) fn new(table: &'t W) -> Result<Self> {
        Ok(Self {
            cursor: Cursor::at_first(table)?,
            failed: false,
        })
    }
}

impl<'t, W: PageWalk> Iterator for Iter<'t, W> {
    type Item = Result<W::Item>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.cursor.is_end() {
            return None;
        }
        let item = match self.cursor.entry() {
            Ok(Some(item)) => item,
            Ok(None) => return None,
            Err(err) => {
                self.failed = true;
                return Some(Err(err));
            }
        };
        if let Err(err) = self.cursor.advance() {
            self.failed = true;
            return Some(Err(err));
        }
        Some(Ok(item))
    }
}
