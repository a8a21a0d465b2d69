//! Persists the tree's root page id across `open`/reopen.
//!
//! Not named as its own module in the distilled spec, but required so
//! `BTreeFile::open` doesn't need to re-derive the root (spec: "Tree.
//! Persistent state is (filename, root_page_no)"). The directory maps
//! a name to this metadata page rather than directly to the root,
//! since the root page id changes across splits/merges while the
//! directory entry must stay fixed for the index's lifetime.
//!
//! Grounded in the teacher's `metadata.rs` (root page id + fanout
//! persisted in a dedicated page), trimmed to drop the `KeyType`/
//! fanout-by-key-size computation: keys are always `i32`, so
//! `LEAF_MAX_ENTRIES`/`INDEX_MAX_ENTRIES` are plain constants derived
//! from `PAGE_PAYLOAD` in `leaf.rs`/`index.rs` instead of being stored.

use common::api::{PageId, INVALID_PAGE_ID};

const ROOT_PAGE_ID_OFFSET: usize = 0;

#[derive(Debug, Clone, Copy)]
pub struct IndexMetadata {
    pub root_page_id: PageId,
}

impl IndexMetadata {
    pub fn empty() -> Self {
        IndexMetadata { root_page_id: INVALID_PAGE_ID }
    }

    pub fn deserialize(data: &[u8]) -> Self {
        let root_page_id = u64::from_le_bytes(
            data[ROOT_PAGE_ID_OFFSET..ROOT_PAGE_ID_OFFSET + 8].try_into().unwrap(),
        ) as PageId;
        IndexMetadata { root_page_id }
    }

    pub fn serialize(&self, data: &mut [u8]) {
        data[ROOT_PAGE_ID_OFFSET..ROOT_PAGE_ID_OFFSET + 8]
            .copy_from_slice(&(self.root_page_id as u64).to_le_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_a_byte_buffer() {
        let mut buf = [0u8; 64];
        let metadata = IndexMetadata { root_page_id: 7 };
        metadata.serialize(&mut buf);
        let read_back = IndexMetadata::deserialize(&buf);
        assert_eq!(read_back.root_page_id, 7);
    }
}
