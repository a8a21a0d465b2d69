//! A fixed-size, sorted, fixed-stride record page.
//!
//! Out of scope as an external collaborator per the CORE's contract,
//! but CORE needs a concrete implementation to compile and be tested
//! against. Unlike the teacher's append-only `SlottedPage` (no
//! deletion, hand-rolled byte offsets per node kind in `node.rs`), this
//! version supports `delete_record` with left-compaction and reports
//! `available_space()` precisely, since the half-full threshold
//! depends on exact free-space accounting.
//!
//! Layout: a small header (node type tag, entry width, record count,
//! `prev`/`next` neighbor page numbers) followed by a compact region of
//! fixed-width records kept in caller-maintained sorted order. Records
//! are fixed width per node type, so "slot directory" here is just the
//! record's position in the array — no separate indirection table is
//! needed.

use crate::error::BTreeError;
use common::api::{PageId, PAGE_SIZE};

const NODE_TYPE_OFFSET: usize = 0;
const ENTRY_SIZE_OFFSET: usize = 1;
const COUNT_OFFSET: usize = 2;
const PREV_OFFSET: usize = 4;
const NEXT_OFFSET: usize = 12;
/// Where the fixed-width record region begins. The header proper only
/// needs 20 bytes (tag, entry width, count, 8B prev, 8B next); the rest
/// is reserved padding chosen so `PAGE_PAYLOAD` divides evenly by both
/// `LEAF_ENTRY_SIZE` and `INDEX_ENTRY_SIZE` into an even entry count,
/// which is what lets the canonical half/half split leave each side at
/// exactly `PAGE_PAYLOAD / 2` used bytes.
pub const DATA_OFFSET: usize = 64;

/// Usable bytes per page for records, after the header.
pub const PAGE_PAYLOAD: usize = PAGE_SIZE - DATA_OFFSET;

/// `used bytes >= PAGE_PAYLOAD / 2`, i.e. `available_space <= PAGE_PAYLOAD / 2`.
/// The canonical underflow threshold used throughout the tree driver.
pub fn is_at_least_half_full(available_space: usize) -> bool {
    available_space <= PAGE_PAYLOAD / 2
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    Leaf,
    Index,
}

/// A view over a page buffer as a sorted, fixed-stride record store.
pub struct SortedPage<'a> {
    data: &'a mut [u8],
}

impl<'a> SortedPage<'a> {
    /// Initializes a freshly allocated page buffer as empty, of the
    /// given node type and entry width.
    pub fn init(data: &'a mut [u8], node_type: NodeType, entry_size: usize) -> Self {
        data.fill(0);
        data[NODE_TYPE_OFFSET] = match node_type {
            NodeType::Leaf => 0,
            NodeType::Index => 1,
        };
        data[ENTRY_SIZE_OFFSET] = entry_size as u8;
        SortedPage { data }
    }

    /// Wraps a page buffer previously initialized by [`SortedPage::init`].
    pub fn from_existing(data: &'a mut [u8]) -> Self {
        SortedPage { data }
    }

    pub fn node_type(&self) -> NodeType {
        match self.data[NODE_TYPE_OFFSET] {
            0 => NodeType::Leaf,
            _ => NodeType::Index,
        }
    }

    pub fn entry_size(&self) -> usize {
        self.data[ENTRY_SIZE_OFFSET] as usize
    }

    pub fn num_records(&self) -> usize {
        u16::from_le_bytes(self.data[COUNT_OFFSET..COUNT_OFFSET + 2].try_into().unwrap()) as usize
    }

    fn set_num_records(&mut self, n: usize) {
        self.data[COUNT_OFFSET..COUNT_OFFSET + 2].copy_from_slice(&(n as u16).to_le_bytes());
    }

    pub fn prev(&self) -> PageId {
        u64::from_le_bytes(self.data[PREV_OFFSET..PREV_OFFSET + 8].try_into().unwrap()) as PageId
    }

    pub fn set_prev(&mut self, pid: PageId) {
        self.data[PREV_OFFSET..PREV_OFFSET + 8].copy_from_slice(&(pid as u64).to_le_bytes());
    }

    pub fn next(&self) -> PageId {
        u64::from_le_bytes(self.data[NEXT_OFFSET..NEXT_OFFSET + 8].try_into().unwrap()) as PageId
    }

    pub fn set_next(&mut self, pid: PageId) {
        self.data[NEXT_OFFSET..NEXT_OFFSET + 8].copy_from_slice(&(pid as u64).to_le_bytes());
    }

    /// Bytes free for additional whole records.
    pub fn available_space(&self) -> usize {
        let capacity = self.data.len() - DATA_OFFSET;
        capacity - self.num_records() * self.entry_size()
    }

    pub fn record(&self, idx: usize) -> &[u8] {
        let es = self.entry_size();
        let off = DATA_OFFSET + idx * es;
        &self.data[off..off + es]
    }

    pub fn record_mut(&mut self, idx: usize) -> &mut [u8] {
        let es = self.entry_size();
        let off = DATA_OFFSET + idx * es;
        &mut self.data[off..off + es]
    }

    /// Inserts `bytes` at position `idx`, shifting later records up by
    /// one slot. `bytes.len()` must equal this page's entry size.
    pub fn insert_record(&mut self, idx: usize, bytes: &[u8]) -> Result<(), BTreeError> {
        let es = self.entry_size();
        debug_assert_eq!(bytes.len(), es);
        if self.available_space() < es {
            return Err(BTreeError::NoSpace);
        }
        let n = self.num_records();
        for i in (idx..n).rev() {
            let src = DATA_OFFSET + i * es;
            let dst = DATA_OFFSET + (i + 1) * es;
            self.data.copy_within(src..src + es, dst);
        }
        let off = DATA_OFFSET + idx * es;
        self.data[off..off + es].copy_from_slice(bytes);
        self.set_num_records(n + 1);
        Ok(())
    }

    /// Removes the record at position `idx`, left-compacting the
    /// records that followed it.
    pub fn delete_record(&mut self, idx: usize) {
        let es = self.entry_size();
        let n = self.num_records();
        for i in idx..n - 1 {
            let src = DATA_OFFSET + (i + 1) * es;
            let dst = DATA_OFFSET + i * es;
            self.data.copy_within(src..src + es, dst);
        }
        self.set_num_records(n - 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_read_back_fixed_width_records() {
        let mut buf = [0u8; PAGE_SIZE];
        let mut page = SortedPage::init(&mut buf, NodeType::Leaf, 4);
        page.insert_record(0, &10i32.to_le_bytes()).unwrap();
        page.insert_record(1, &20i32.to_le_bytes()).unwrap();
        page.insert_record(0, &5i32.to_le_bytes()).unwrap();

        assert_eq!(page.num_records(), 3);
        let values: Vec<i32> = (0..3)
            .map(|i| i32::from_le_bytes(page.record(i).try_into().unwrap()))
            .collect();
        assert_eq!(values, vec![5, 10, 20]);
    }

    #[test]
    fn delete_record_compacts_left() {
        let mut buf = [0u8; PAGE_SIZE];
        let mut page = SortedPage::init(&mut buf, NodeType::Leaf, 4);
        for v in [1, 2, 3, 4] {
            page.insert_record(page.num_records(), &(v as i32).to_le_bytes()).unwrap();
        }
        page.delete_record(1);
        let values: Vec<i32> = (0..page.num_records())
            .map(|i| i32::from_le_bytes(page.record(i).try_into().unwrap()))
            .collect();
        assert_eq!(values, vec![1, 3, 4]);
    }

    #[test]
    fn available_space_tracks_inserts_and_deletes() {
        let mut buf = [0u8; PAGE_SIZE];
        let mut page = SortedPage::init(&mut buf, NodeType::Leaf, 16);
        let full = page.available_space();
        page.insert_record(0, &[0u8; 16]).unwrap();
        assert_eq!(page.available_space(), full - 16);
        page.delete_record(0);
        assert_eq!(page.available_space(), full);
    }

    #[test]
    fn insert_fails_with_no_space_when_page_is_full() {
        let mut buf = [0u8; PAGE_SIZE];
        let mut page = SortedPage::init(&mut buf, NodeType::Leaf, PAGE_PAYLOAD);
        page.insert_record(0, &vec![0u8; PAGE_PAYLOAD]).unwrap();
        let err = page.insert_record(1, &vec![0u8; PAGE_PAYLOAD]).unwrap_err();
        assert!(matches!(err, BTreeError::NoSpace));
    }
}
