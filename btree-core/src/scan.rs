//! Range scan cursor with in-place delete.
//!
//! Grounded in the teacher's cursor-state patterns and
//! `original_source/src/btfilescan.cpp`'s `GetNext`/`DeleteCurrent`
//! pair, redesigned around a tagged `ScanState` (per the design note
//! recorded for this module in `DESIGN.md`) instead of a bundle of
//! loose booleans tracking "have we started" and "was the current slot
//! just deleted".

use crate::error::BTreeError;
use crate::leaf::LeafNode;
use crate::tree::BTreeFile;
use common::api::INVALID_PAGE_ID;
use common::api::PageId;
use common::rid::RowId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    /// Cursor is positioned on a leaf but hasn't returned a record from
    /// it yet; `GetNext` should look at slot 0.
    Start,
    /// `GetNext` last returned the entry at `current_slot`; the next
    /// call should look at `current_slot + 1`.
    Processing,
    /// `DeleteCurrent` removed the entry at `current_slot`; the next
    /// call should look at `current_slot` again, since left-compaction
    /// shifted the following entry into that slot.
    Delete,
    /// The range is exhausted; every further call returns `Done`.
    Done,
}

/// A cursor over `[low, hi]` (either bound optional) produced by
/// [`BTreeFile::open_scan`].
pub struct ScanCursor<'a> {
    tree: &'a mut BTreeFile,
    state: ScanState,
    current_leaf: PageId,
    current_slot: usize,
    hi: Option<i32>,
    last_returned: Option<(i32, RowId)>,
}

impl<'a> ScanCursor<'a> {
    pub(crate) fn new(tree: &'a mut BTreeFile, start_leaf: PageId, hi: Option<i32>, exhausted: bool) -> Self {
        ScanCursor {
            tree,
            state: if exhausted { ScanState::Done } else { ScanState::Start },
            current_leaf: start_leaf,
            current_slot: 0,
            hi,
            last_returned: None,
        }
    }

    pub(crate) fn exhausted(tree: &'a mut BTreeFile) -> Self {
        ScanCursor {
            tree,
            state: ScanState::Done,
            current_leaf: INVALID_PAGE_ID,
            current_slot: 0,
            hi: None,
            last_returned: None,
        }
    }

    /// Returns the next `(key, rid)` in range, or `Err(BTreeError::Done)`
    /// once the upper bound or the end of the leaf chain is reached.
    pub fn get_next(&mut self) -> Result<(i32, RowId), BTreeError> {
        loop {
            if self.state == ScanState::Done || self.current_leaf == INVALID_PAGE_ID {
                self.state = ScanState::Done;
                return Err(BTreeError::Done);
            }

            let (count, next_pid) = {
                let mut guard = self.tree.bpm.fetch_page(self.current_leaf)?;
                let leaf = LeafNode::from_existing(&mut guard[..]);
                (leaf.key_count(), leaf.next_page())
            };

            let idx = match self.state {
                ScanState::Start => 0,
                ScanState::Delete => self.current_slot,
                ScanState::Processing => self.current_slot + 1,
                ScanState::Done => unreachable!("handled above"),
            };

            if idx >= count {
                if next_pid == INVALID_PAGE_ID {
                    self.state = ScanState::Done;
                    return Err(BTreeError::Done);
                }
                self.current_leaf = next_pid;
                self.current_slot = 0;
                self.state = ScanState::Start;
                continue;
            }

            let (key, rid) = {
                let mut guard = self.tree.bpm.fetch_page(self.current_leaf)?;
                LeafNode::from_existing(&mut guard[..]).get(idx)
            };
            if let Some(hi) = self.hi {
                if key > hi {
                    self.state = ScanState::Done;
                    return Err(BTreeError::Done);
                }
            }

            self.current_slot = idx;
            self.state = ScanState::Processing;
            self.last_returned = Some((key, rid));
            return Ok((key, rid));
        }
    }

    /// Deletes the entry last returned by `get_next`. The following
    /// `get_next` call will not skip the entry that left-compaction
    /// slides into the vacated slot.
    ///
    /// Does not attempt to keep the cursor valid across a leaf merge
    /// triggered by the resulting underflow (the page the cursor is
    /// parked on could be freed into a sibling); see `DESIGN.md`.
    pub fn delete_current(&mut self) -> Result<(), BTreeError> {
        let (key, rid) = self.last_returned.take().ok_or(BTreeError::NotFound)?;
        self.tree.delete(key, rid)?;
        self.state = ScanState::Delete;
        Ok(())
    }
}
