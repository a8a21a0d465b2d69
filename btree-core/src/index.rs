//! Index node: `(key, child)` separators plus a distinguished
//! leftmost-child `left_link` (stored in the page's `prev` field).
//!
//! Grounded in the teacher's `node.rs` internal-node accessors and
//! `btindex.h`'s `BTIndexPage` operation set (`Insert`/`Delete`/
//! `GetFirst`/`GetNext`/`GetLast`/`Search`/`leftSearch`/`changeKey`/
//! `GetLeftLink`), generalized the same way as the leaf node.

use crate::entry_cursor::EntryCursor;
use crate::error::BTreeError;
use crate::page::{self, NodeType, SortedPage, PAGE_PAYLOAD};
use common::api::PageId;

/// `i32` key (4B) + child page id (8B).
pub const INDEX_ENTRY_SIZE: usize = 12;
pub const INDEX_MAX_ENTRIES: usize = PAGE_PAYLOAD / INDEX_ENTRY_SIZE;
/// Entry count at exactly `PAGE_PAYLOAD / 2` used bytes (see
/// `LEAF_HALF_FULL` for why `PAGE_PAYLOAD` was chosen to make this
/// coincide with the byte-based threshold, and why it's still kept as
/// its own entry-count constant).
pub const INDEX_HALF_FULL: usize = INDEX_MAX_ENTRIES / 2;

pub struct IndexNode<'a> {
    page: SortedPage<'a>,
}

impl<'a> IndexNode<'a> {
    pub fn init(data: &'a mut [u8]) -> Self {
        IndexNode { page: SortedPage::init(data, NodeType::Index, INDEX_ENTRY_SIZE) }
    }

    pub fn from_existing(data: &'a mut [u8]) -> Self {
        let page = SortedPage::from_existing(data);
        debug_assert_eq!(page.node_type(), NodeType::Index);
        IndexNode { page }
    }

    pub fn entry_count(&self) -> usize {
        self.page.num_records()
    }

    pub fn available_space(&self) -> usize {
        self.page.available_space()
    }

    pub fn is_at_least_half_full(&self) -> bool {
        page::is_at_least_half_full(self.available_space())
    }

    pub fn left_link(&self) -> PageId {
        self.page.prev()
    }

    pub fn set_left_link(&mut self, pid: PageId) {
        self.page.set_prev(pid)
    }

    fn decode(bytes: &[u8]) -> (i32, PageId) {
        let key = i32::from_le_bytes(bytes[0..4].try_into().unwrap());
        let child = u64::from_le_bytes(bytes[4..12].try_into().unwrap()) as PageId;
        (key, child)
    }

    fn encode(key: i32, child: PageId) -> [u8; INDEX_ENTRY_SIZE] {
        let mut buf = [0u8; INDEX_ENTRY_SIZE];
        buf[0..4].copy_from_slice(&key.to_le_bytes());
        buf[4..12].copy_from_slice(&(child as u64).to_le_bytes());
        buf
    }

    pub fn get(&self, idx: usize) -> (i32, PageId) {
        Self::decode(self.page.record(idx))
    }

    fn insert_pos(&self, key: i32) -> usize {
        let mut lo = 0;
        let mut hi = self.entry_count();
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let (k, _) = self.get(mid);
            if k <= key {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        lo
    }

    /// Inserts `(key, child)` keeping ascending order.
    pub fn insert(&mut self, key: i32, child: PageId) -> Result<(), BTreeError> {
        let pos = self.insert_pos(key);
        let bytes = Self::encode(key, child);
        self.page.insert_record(pos, &bytes)
    }

    /// Inserts directly at `idx`, used when the caller has already
    /// determined the position (e.g. promoting a separator to slot 0).
    pub fn insert_at(&mut self, idx: usize, key: i32, child: PageId) -> Result<(), BTreeError> {
        let bytes = Self::encode(key, child);
        self.page.insert_record(idx, &bytes)
    }

    /// Removes the last entry with this key (scan high-to-low).
    pub fn delete(&mut self, key: i32) -> Result<(), BTreeError> {
        for i in (0..self.entry_count()).rev() {
            let (k, _) = self.get(i);
            if k == key {
                self.page.delete_record(i);
                return Ok(());
            }
        }
        Err(BTreeError::NotFound)
    }

    pub fn remove_at(&mut self, idx: usize) {
        self.page.delete_record(idx);
    }

    /// Scanning slots from highest to lowest, the first entry whose
    /// key is `<= key`. `None` means the caller should descend via
    /// `left_link`.
    pub fn search(&self, key: i32) -> Option<(PageId, i32)> {
        for i in (0..self.entry_count()).rev() {
            let (k, c) = self.get(i);
            if k <= key {
                return Some((c, k));
            }
        }
        None
    }

    /// Scanning low-to-high, the first entry with key `> key`. Used to
    /// locate the separator to update during left-sibling
    /// redistribution.
    pub fn left_search(&self, key: i32) -> Option<(PageId, i32)> {
        for i in 0..self.entry_count() {
            let (k, c) = self.get(i);
            if k > key {
                return Some((c, k));
            }
        }
        None
    }

    /// In-place replaces the key of the entry whose key equals
    /// `target_key`, keeping its child pointer.
    pub fn change_key(&mut self, new_key: i32, target_key: i32) -> Result<(), BTreeError> {
        for i in 0..self.entry_count() {
            let (k, c) = self.get(i);
            if k == target_key {
                let bytes = Self::encode(new_key, c);
                self.page.record_mut(i).copy_from_slice(&bytes);
                return Ok(());
            }
        }
        Err(BTreeError::NotFound)
    }
}

impl<'a> EntryCursor<(i32, PageId)> for IndexNode<'a> {
    fn entry_count(&self) -> usize {
        self.entry_count()
    }

    fn entry_at(&self, idx: usize) -> (i32, PageId) {
        self.get(idx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::api::PAGE_SIZE;

    #[test]
    fn search_returns_highest_separator_leq_key() {
        let mut buf = [0u8; PAGE_SIZE];
        let mut idx = IndexNode::init(&mut buf);
        idx.set_left_link(1);
        idx.insert(10, 2).unwrap();
        idx.insert(20, 3).unwrap();

        assert_eq!(idx.search(5), None);
        assert_eq!(idx.search(10), Some((2, 10)));
        assert_eq!(idx.search(15), Some((2, 10)));
        assert_eq!(idx.search(25), Some((3, 20)));
    }

    #[test]
    fn left_search_returns_first_separator_greater_than_key() {
        let mut buf = [0u8; PAGE_SIZE];
        let mut idx = IndexNode::init(&mut buf);
        idx.insert(10, 2).unwrap();
        idx.insert(20, 3).unwrap();

        assert_eq!(idx.left_search(5), Some((2, 10)));
        assert_eq!(idx.left_search(10), Some((3, 20)));
        assert_eq!(idx.left_search(20), None);
    }

    #[test]
    fn change_key_preserves_child_pointer() {
        let mut buf = [0u8; PAGE_SIZE];
        let mut idx = IndexNode::init(&mut buf);
        idx.insert(10, 2).unwrap();
        idx.change_key(15, 10).unwrap();
        assert_eq!(idx.get(0), (15, 2));
    }

    #[test]
    fn delete_removes_last_matching_key() {
        let mut buf = [0u8; PAGE_SIZE];
        let mut idx = IndexNode::init(&mut buf);
        idx.insert(10, 2).unwrap();
        idx.delete(10).unwrap();
        assert_eq!(idx.entry_count(), 0);
        assert!(matches!(idx.delete(10).unwrap_err(), BTreeError::NotFound));
    }
}
