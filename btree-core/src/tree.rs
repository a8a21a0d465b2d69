//! The tree driver: descent, insert with split propagation, delete with
//! underflow handling, and root lifecycle.
//!
//! Grounded in the teacher's `bptree.rs` (search, insert without split
//! propagation, and a `remove` stubbed with `unimplemented!()`),
//! generalized to route node access through [`SortedPage`] instead of
//! raw fixed offsets, to complete the parent-split recursion the
//! teacher left as a `TODO`, and to implement deletion with
//! redistribution/merge. The redistribution/merge algorithms and the
//! sibling-selection rule follow `original_source/src/btfile.cpp`, with
//! the dangling-successor split bug and the fragile sibling iterator
//! fixed per the design notes recorded in `DESIGN.md`.

use crate::entry_cursor::EntryCursor;
use crate::error::BTreeError;
use crate::index::{IndexNode, INDEX_HALF_FULL};
use crate::leaf::{LeafNode, LEAF_HALF_FULL};
use crate::metadata::IndexMetadata;
use crate::page::{NodeType, SortedPage, PAGE_PAYLOAD};
use crate::scan::ScanCursor;
use common::api::{BufferPoolManager, PageId, INVALID_PAGE_ID};
use common::directory::Directory;
use common::rid::RowId;
use std::sync::Arc;

/// Configuration for opening a tree. Page size and entry widths are
/// fixed by the collaborator contract; this exists so callers don't
/// hardcode the index's name at every call site and so future tunables
/// (e.g. a preferred split ratio) have somewhere to live.
#[derive(Debug, Clone)]
pub struct BTreeConfig {
    pub name: String,
}

impl BTreeConfig {
    pub fn new(name: impl Into<String>) -> Self {
        BTreeConfig { name: name.into() }
    }
}

/// Per-level fill statistics returned by [`BTreeFile::dump_statistics`].
#[derive(Debug, Clone, Copy, Default)]
pub struct LevelStats {
    pub node_count: usize,
    pub entry_count: usize,
    pub min_fill: f64,
    pub mean_fill: f64,
    pub max_fill: f64,
}

/// Tree-wide statistics: height plus per-level node/entry counts and
/// fill factor. Not printed itself -- printing is the caller's job.
#[derive(Debug, Clone, Default)]
pub struct TreeStatistics {
    pub height: usize,
    pub levels: Vec<LevelStats>,
}

enum SiblingChoice {
    Left { sibling_pid: PageId, separator_key: i32 },
    Right { sibling_pid: PageId, separator_key: i32 },
}

/// Chooses the sibling to redistribute with or merge into, given the
/// parent and the underflowed child.
///
/// Reimplemented by explicit search rather than the original's reused
/// iterator state (which could advance twice per loop iteration and
/// made "is this the last child" detection fragile): if `child` is the
/// parent's `left_link`, there is no left sibling and the right
/// sibling is entry 0's child; otherwise scan for the entry whose
/// child equals `child` and choose its neighbor.
fn choose_sibling(parent: &IndexNode, child_pid: PageId) -> Result<SiblingChoice, BTreeError> {
    if parent.left_link() == child_pid {
        return match parent.first() {
            Some((k, c)) => Ok(SiblingChoice::Right { sibling_pid: c, separator_key: k }),
            None => Err(BTreeError::Corrupt("index node has no entries to select a sibling".into())),
        };
    }
    for i in 0..parent.entry_count() {
        let (k, c) = parent.get(i);
        if c == child_pid {
            return if i == parent.entry_count() - 1 {
                let sibling_pid = if i == 0 { parent.left_link() } else { parent.get(i - 1).1 };
                Ok(SiblingChoice::Left { sibling_pid, separator_key: k })
            } else {
                let (nk, nc) = parent.get(i + 1);
                Ok(SiblingChoice::Right { sibling_pid: nc, separator_key: nk })
            };
        }
    }
    Err(BTreeError::Corrupt(format!("child page {child_pid} not found under its parent")))
}

/// A disk-resident B+ tree index keyed by `i32`, mapping to [`RowId`].
pub struct BTreeFile {
    pub(crate) bpm: Arc<dyn BufferPoolManager>,
    directory: Arc<dyn Directory>,
    name: String,
    metadata_page_id: PageId,
    root_page_id: PageId,
}

impl BTreeFile {
    /// Opens the named index, creating it if the directory has no
    /// entry for it. The first physical page of a new index is a leaf
    /// root, allocated lazily on the first insert.
    pub fn open(
        bpm: Arc<dyn BufferPoolManager>,
        directory: Arc<dyn Directory>,
        config: BTreeConfig,
    ) -> Result<Self, BTreeError> {
        match directory.get_file_entry(&config.name)? {
            Some(metadata_page_id) => {
                let mut guard = bpm.fetch_page(metadata_page_id)?;
                let metadata = IndexMetadata::deserialize(&guard);
                Ok(BTreeFile {
                    bpm,
                    directory,
                    name: config.name,
                    metadata_page_id,
                    root_page_id: metadata.root_page_id,
                })
            }
            None => {
                let mut guard = bpm.new_page()?;
                let metadata_page_id = guard.page_id();
                IndexMetadata::empty().serialize(&mut guard);
                guard.mark_dirty();
                drop(guard);
                directory.add_file_entry(&config.name, metadata_page_id)?;
                tracing::debug!(name = %config.name, metadata_page_id, "created new index");
                Ok(BTreeFile {
                    bpm,
                    directory,
                    name: config.name,
                    metadata_page_id,
                    root_page_id: INVALID_PAGE_ID,
                })
            }
        }
    }

    fn persist_root(&self) -> Result<(), BTreeError> {
        let mut guard = self.bpm.fetch_page(self.metadata_page_id)?;
        IndexMetadata { root_page_id: self.root_page_id }.serialize(&mut guard);
        guard.mark_dirty();
        Ok(())
    }

    /// Recursively frees every descendant page, then the root, the
    /// metadata page, and the directory entry.
    pub fn destroy(self) -> Result<(), BTreeError> {
        if self.root_page_id != INVALID_PAGE_ID {
            self.free_subtree(self.root_page_id)?;
        }
        self.bpm.free_page(self.metadata_page_id)?;
        self.directory.delete_file_entry(&self.name)?;
        tracing::debug!(name = %self.name, "destroyed index");
        Ok(())
    }

    fn free_subtree(&self, pid: PageId) -> Result<(), BTreeError> {
        let mut children = Vec::new();
        {
            let mut guard = self.bpm.fetch_page(pid)?;
            if SortedPage::from_existing(&mut guard[..]).node_type() == NodeType::Index {
                let node = IndexNode::from_existing(&mut guard[..]);
                children.push(node.left_link());
                for i in 0..node.entry_count() {
                    children.push(node.get(i).1);
                }
            }
        }
        for child in children {
            self.free_subtree(child)?;
        }
        self.bpm.free_page(pid)?;
        Ok(())
    }

    fn descend_to_leaf(&self, start: PageId, key: i32, path: &mut Vec<PageId>) -> Result<PageId, BTreeError> {
        let mut current = start;
        loop {
            let mut guard = self.bpm.fetch_page(current)?;
            match SortedPage::from_existing(&mut guard[..]).node_type() {
                NodeType::Leaf => return Ok(current),
                NodeType::Index => {
                    let child = {
                        let node = IndexNode::from_existing(&mut guard[..]);
                        match node.search(key) {
                            Some((c, _)) => c,
                            None => node.left_link(),
                        }
                    };
                    path.push(current);
                    drop(guard);
                    current = child;
                }
            }
        }
    }

    pub(crate) fn find_leftmost_leaf(&self, start: PageId) -> Result<PageId, BTreeError> {
        let mut current = start;
        loop {
            let mut guard = self.bpm.fetch_page(current)?;
            match SortedPage::from_existing(&mut guard[..]).node_type() {
                NodeType::Leaf => return Ok(current),
                NodeType::Index => {
                    let left_link = IndexNode::from_existing(&mut guard[..]).left_link();
                    drop(guard);
                    current = left_link;
                }
            }
        }
    }

    pub fn root_page_id(&self) -> PageId {
        self.root_page_id
    }

    /// Inserts `(key, rid)`. If the root is `INVALID`, creates a new
    /// leaf root; if the reached leaf lacks room, splits it, promoting
    /// a new separator (and, if the leaf was the root, a new index
    /// root) up the path.
    pub fn insert(&mut self, key: i32, rid: RowId) -> Result<(), BTreeError> {
        if self.root_page_id == INVALID_PAGE_ID {
            let mut guard = self.bpm.new_page()?;
            let root_pid = guard.page_id();
            {
                let mut leaf = LeafNode::init(&mut guard[..]);
                leaf.insert(key, rid)?;
            }
            guard.mark_dirty();
            drop(guard);
            self.root_page_id = root_pid;
            self.persist_root()?;
            tracing::debug!(root_pid, key, "created new leaf root");
            return Ok(());
        }

        let mut path = Vec::new();
        let leaf_pid = self.descend_to_leaf(self.root_page_id, key, &mut path)?;
        let needs_split = {
            let mut guard = self.bpm.fetch_page(leaf_pid)?;
            let result = {
                let mut leaf = LeafNode::from_existing(&mut guard[..]);
                leaf.insert(key, rid)
            };
            match result {
                Ok(()) => {
                    guard.mark_dirty();
                    false
                }
                Err(BTreeError::NoSpace) => true,
                Err(e) => return Err(e),
            }
        };
        if needs_split {
            self.split_leaf_and_insert(leaf_pid, &mut path, key, rid)?;
        }
        Ok(())
    }

    fn split_leaf_and_insert(
        &mut self,
        leaf_pid: PageId,
        path: &mut Vec<PageId>,
        key: i32,
        rid: RowId,
    ) -> Result<(), BTreeError> {
        let mut new_guard = self.bpm.new_page()?;
        let new_leaf_pid = new_guard.page_id();
        LeafNode::init(&mut new_guard[..]);

        let sep = {
            let mut old_guard = self.bpm.fetch_page(leaf_pid)?;
            let move_count = LeafNode::from_existing(&mut old_guard[..]).key_count() / 2;

            for _ in 0..move_count {
                let (k, r) = {
                    let old_leaf = LeafNode::from_existing(&mut old_guard[..]);
                    old_leaf.get(old_leaf.key_count() - 1)
                };
                {
                    let mut old_leaf = LeafNode::from_existing(&mut old_guard[..]);
                    let idx = old_leaf.key_count() - 1;
                    old_leaf.remove_at(idx);
                }
                let mut new_leaf = LeafNode::from_existing(&mut new_guard[..]);
                new_leaf.insert(k, r)?;
            }

            let new_first = LeafNode::from_existing(&mut new_guard[..]).first().map(|(k, _)| k);
            match new_first {
                Some(f) if key > f => {
                    let mut new_leaf = LeafNode::from_existing(&mut new_guard[..]);
                    new_leaf.insert(key, rid)?;
                }
                _ => {
                    let mut old_leaf = LeafNode::from_existing(&mut old_guard[..]);
                    old_leaf.insert(key, rid)?;
                }
            }

            let sep = LeafNode::from_existing(&mut new_guard[..]).first().unwrap().0;

            // Sibling-chain fix-up, including the old successor's prev
            // pointer: the source leaves this dangling (see DESIGN.md).
            let old_next = LeafNode::from_existing(&mut old_guard[..]).next_page();
            {
                let mut old_leaf = LeafNode::from_existing(&mut old_guard[..]);
                old_leaf.set_next_page(new_leaf_pid);
            }
            {
                let mut new_leaf = LeafNode::from_existing(&mut new_guard[..]);
                new_leaf.set_prev_page(leaf_pid);
                new_leaf.set_next_page(old_next);
            }
            if old_next != INVALID_PAGE_ID {
                let mut next_guard = self.bpm.fetch_page(old_next)?;
                LeafNode::from_existing(&mut next_guard[..]).set_prev_page(new_leaf_pid);
                next_guard.mark_dirty();
            }

            old_guard.mark_dirty();
            sep
        };
        new_guard.mark_dirty();
        drop(new_guard);

        tracing::debug!(leaf_pid, new_leaf_pid, sep, "split leaf");
        self.insert_separator_into_parent(path, sep, new_leaf_pid, leaf_pid)
    }

    /// Inserts `(sep_key, new_child_pid)` into the parent named by the
    /// top of `path`, or promotes a new index root if `path` is empty
    /// (the node that just split was the root, with `left_child_pid`
    /// becoming the new root's `left_link`). Recurses into an index
    /// split if the parent overflows.
    fn insert_separator_into_parent(
        &mut self,
        path: &mut Vec<PageId>,
        sep_key: i32,
        new_child_pid: PageId,
        left_child_pid: PageId,
    ) -> Result<(), BTreeError> {
        match path.pop() {
            None => {
                let mut guard = self.bpm.new_page()?;
                let new_root_pid = guard.page_id();
                {
                    let mut idx = IndexNode::init(&mut guard[..]);
                    idx.set_left_link(left_child_pid);
                    idx.insert(sep_key, new_child_pid)?;
                }
                guard.mark_dirty();
                drop(guard);
                self.root_page_id = new_root_pid;
                self.persist_root()?;
                tracing::debug!(new_root_pid, sep_key, "promoted new index root");
                Ok(())
            }
            Some(parent_pid) => {
                let needs_split = {
                    let mut guard = self.bpm.fetch_page(parent_pid)?;
                    let result = {
                        let mut idx = IndexNode::from_existing(&mut guard[..]);
                        idx.insert(sep_key, new_child_pid)
                    };
                    match result {
                        Ok(()) => {
                            guard.mark_dirty();
                            false
                        }
                        Err(BTreeError::NoSpace) => true,
                        Err(e) => return Err(e),
                    }
                };
                if needs_split {
                    self.split_index_and_promote(parent_pid, path, sep_key, new_child_pid)?;
                }
                Ok(())
            }
        }
    }

    fn split_index_and_promote(
        &mut self,
        x_pid: PageId,
        path: &mut Vec<PageId>,
        key: i32,
        child: PageId,
    ) -> Result<(), BTreeError> {
        let mut new_guard = self.bpm.new_page()?;
        let new_x_pid = new_guard.page_id();
        IndexNode::init(&mut new_guard[..]);

        let promoted_key = {
            let mut old_guard = self.bpm.fetch_page(x_pid)?;
            let move_count = IndexNode::from_existing(&mut old_guard[..]).entry_count() / 2;

            for _ in 0..move_count {
                let (k, c) = {
                    let old = IndexNode::from_existing(&mut old_guard[..]);
                    old.get(old.entry_count() - 1)
                };
                {
                    let mut old = IndexNode::from_existing(&mut old_guard[..]);
                    let idx = old.entry_count() - 1;
                    old.remove_at(idx);
                }
                let mut new_x = IndexNode::from_existing(&mut new_guard[..]);
                new_x.insert(k, c)?;
            }

            let x_prime_first = IndexNode::from_existing(&mut new_guard[..]).first().map(|(k, _)| k);
            match x_prime_first {
                Some(fk) if key > fk => {
                    let mut new_x = IndexNode::from_existing(&mut new_guard[..]);
                    new_x.insert(key, child)?;
                }
                _ => {
                    let mut old = IndexNode::from_existing(&mut old_guard[..]);
                    old.insert(key, child)?;
                }
            }

            let (pk, pp) = IndexNode::from_existing(&mut new_guard[..]).first().unwrap();
            {
                let mut new_x = IndexNode::from_existing(&mut new_guard[..]);
                new_x.remove_at(0);
                new_x.set_left_link(pp);
            }

            old_guard.mark_dirty();
            pk
        };
        new_guard.mark_dirty();
        drop(new_guard);

        tracing::debug!(x_pid, new_x_pid, promoted_key, "split index node");
        self.insert_separator_into_parent(path, promoted_key, new_x_pid, x_pid)
    }

    /// Deletes the exact `(key, rid)` pair. If the containing leaf (not
    /// the root) falls below half full, redistributes or merges with a
    /// sibling, cascading the resulting index-level underflow upward
    /// and collapsing the root if it becomes an empty index.
    pub fn delete(&mut self, key: i32, rid: RowId) -> Result<(), BTreeError> {
        if self.root_page_id == INVALID_PAGE_ID {
            return Err(BTreeError::NotFound);
        }
        let mut path = Vec::new();
        let leaf_pid = self.descend_to_leaf(self.root_page_id, key, &mut path)?;

        {
            let mut guard = self.bpm.fetch_page(leaf_pid)?;
            {
                let mut leaf = LeafNode::from_existing(&mut guard[..]);
                leaf.delete(key, rid)?;
            }
            guard.mark_dirty();
        }

        if leaf_pid == self.root_page_id {
            return Ok(());
        }

        let underflowed = {
            let mut guard = self.bpm.fetch_page(leaf_pid)?;
            !LeafNode::from_existing(&mut guard[..]).is_at_least_half_full()
        };
        if underflowed {
            self.handle_leaf_underflow(leaf_pid, &mut path)?;
        }
        Ok(())
    }

    fn handle_leaf_underflow(&mut self, leaf_pid: PageId, path: &mut Vec<PageId>) -> Result<(), BTreeError> {
        let parent_pid = *path.last().expect("non-root leaf underflow must have a parent");
        let merged = {
            let mut parent_guard = self.bpm.fetch_page(parent_pid)?;
            let choice = {
                let parent = IndexNode::from_existing(&mut parent_guard[..]);
                choose_sibling(&parent, leaf_pid)?
            };
            match choice {
                SiblingChoice::Right { sibling_pid, separator_key } => {
                    if self.try_redistribute_leaf_right(leaf_pid, sibling_pid, &mut parent_guard, separator_key)? {
                        false
                    } else {
                        self.merge_leaf_right(leaf_pid, sibling_pid, &mut parent_guard, separator_key)?;
                        true
                    }
                }
                SiblingChoice::Left { sibling_pid, separator_key } => {
                    if self.try_redistribute_leaf_left(leaf_pid, sibling_pid, &mut parent_guard, separator_key)? {
                        false
                    } else {
                        self.merge_leaf_left(leaf_pid, sibling_pid, &mut parent_guard, separator_key)?;
                        true
                    }
                }
            }
        };
        if merged {
            path.pop();
            self.check_index_underflow_after_pop(parent_pid, path)?;
        }
        Ok(())
    }

    fn check_index_underflow_after_pop(&mut self, node_pid: PageId, path: &mut Vec<PageId>) -> Result<(), BTreeError> {
        if path.is_empty() {
            return self.maybe_collapse_root(node_pid);
        }
        let underflowed = {
            let mut guard = self.bpm.fetch_page(node_pid)?;
            !IndexNode::from_existing(&mut guard[..]).is_at_least_half_full()
        };
        if underflowed {
            self.handle_index_underflow(node_pid, path)?;
        }
        Ok(())
    }

    fn handle_index_underflow(&mut self, node_pid: PageId, path: &mut Vec<PageId>) -> Result<(), BTreeError> {
        let parent_pid = *path.last().expect("non-root index underflow must have a parent");
        let merged = {
            let mut parent_guard = self.bpm.fetch_page(parent_pid)?;
            let choice = {
                let parent = IndexNode::from_existing(&mut parent_guard[..]);
                choose_sibling(&parent, node_pid)?
            };
            match choice {
                SiblingChoice::Right { sibling_pid, separator_key } => {
                    if self.try_redistribute_index_right(node_pid, sibling_pid, &mut parent_guard, separator_key)? {
                        false
                    } else {
                        self.merge_index_right(node_pid, sibling_pid, &mut parent_guard, separator_key)?;
                        true
                    }
                }
                SiblingChoice::Left { sibling_pid, separator_key } => {
                    if self.try_redistribute_index_left(node_pid, sibling_pid, &mut parent_guard, separator_key)? {
                        false
                    } else {
                        self.merge_index_left(node_pid, sibling_pid, &mut parent_guard, separator_key)?;
                        true
                    }
                }
            }
        };
        if merged {
            path.pop();
            self.check_index_underflow_after_pop(parent_pid, path)?;
        }
        Ok(())
    }

    fn maybe_collapse_root(&mut self, root_pid: PageId) -> Result<(), BTreeError> {
        let (is_empty_index, left_link) = {
            let mut guard = self.bpm.fetch_page(root_pid)?;
            if SortedPage::from_existing(&mut guard[..]).node_type() == NodeType::Index {
                let idx = IndexNode::from_existing(&mut guard[..]);
                (idx.entry_count() == 0, idx.left_link())
            } else {
                (false, INVALID_PAGE_ID)
            }
        };
        if is_empty_index {
            self.bpm.free_page(root_pid)?;
            self.root_page_id = left_link;
            self.persist_root()?;
            tracing::debug!(old_root = root_pid, new_root = left_link, "collapsed root");
        }
        Ok(())
    }

    fn try_redistribute_leaf_right(
        &self,
        c_pid: PageId,
        s_pid: PageId,
        parent_guard: &mut Box<dyn common::api::PageGuard + '_>,
        old_separator_key: i32,
    ) -> Result<bool, BTreeError> {
        let mut c_guard = self.bpm.fetch_page(c_pid)?;
        let mut s_guard = self.bpm.fetch_page(s_pid)?;
        let c_count = LeafNode::from_existing(&mut c_guard[..]).key_count();
        if c_count >= LEAF_HALF_FULL {
            return Ok(true);
        }
        let s_count = LeafNode::from_existing(&mut s_guard[..]).key_count();
        let n_needed = LEAF_HALF_FULL - c_count;
        let n_max_give = s_count.saturating_sub(LEAF_HALF_FULL);
        if n_max_give < n_needed {
            return Ok(false);
        }

        for _ in 0..n_needed {
            let (k, r) = LeafNode::from_existing(&mut s_guard[..]).first().unwrap();
            LeafNode::from_existing(&mut s_guard[..]).remove_at(0);
            LeafNode::from_existing(&mut c_guard[..]).insert(k, r)?;
        }
        let new_sep = LeafNode::from_existing(&mut s_guard[..]).first().map(|(k, _)| k);
        if let Some(nk) = new_sep {
            IndexNode::from_existing(&mut parent_guard[..]).change_key(nk, old_separator_key)?;
        }
        parent_guard.mark_dirty();
        c_guard.mark_dirty();
        s_guard.mark_dirty();
        Ok(true)
    }

    fn try_redistribute_leaf_left(
        &self,
        c_pid: PageId,
        s_pid: PageId,
        parent_guard: &mut Box<dyn common::api::PageGuard + '_>,
        old_separator_key: i32,
    ) -> Result<bool, BTreeError> {
        let mut c_guard = self.bpm.fetch_page(c_pid)?;
        let mut s_guard = self.bpm.fetch_page(s_pid)?;
        let c_count = LeafNode::from_existing(&mut c_guard[..]).key_count();
        if c_count >= LEAF_HALF_FULL {
            return Ok(true);
        }
        let s_count = LeafNode::from_existing(&mut s_guard[..]).key_count();
        let n_needed = LEAF_HALF_FULL - c_count;
        let n_max_give = s_count.saturating_sub(LEAF_HALF_FULL);
        if n_max_give < n_needed {
            return Ok(false);
        }

        for _ in 0..n_needed {
            let (k, r) = {
                let s = LeafNode::from_existing(&mut s_guard[..]);
                s.get(s.key_count() - 1)
            };
            {
                let mut s = LeafNode::from_existing(&mut s_guard[..]);
                let idx = s.key_count() - 1;
                s.remove_at(idx);
            }
            LeafNode::from_existing(&mut c_guard[..]).insert(k, r)?;
        }
        let new_sep = LeafNode::from_existing(&mut c_guard[..]).first().map(|(k, _)| k);
        if let Some(nk) = new_sep {
            IndexNode::from_existing(&mut parent_guard[..]).change_key(nk, old_separator_key)?;
        }
        parent_guard.mark_dirty();
        c_guard.mark_dirty();
        s_guard.mark_dirty();
        Ok(true)
    }

    fn merge_leaf_right(
        &self,
        c_pid: PageId,
        s_pid: PageId,
        parent_guard: &mut Box<dyn common::api::PageGuard + '_>,
        separator_key: i32,
    ) -> Result<(), BTreeError> {
        let mut c_guard = self.bpm.fetch_page(c_pid)?;
        let mut s_guard = self.bpm.fetch_page(s_pid)?;
        let s_next = LeafNode::from_existing(&mut s_guard[..]).next_page();
        let s_count = LeafNode::from_existing(&mut s_guard[..]).key_count();
        for i in 0..s_count {
            let (k, r) = LeafNode::from_existing(&mut s_guard[..]).get(i);
            LeafNode::from_existing(&mut c_guard[..]).append_raw(k, r)?;
        }
        LeafNode::from_existing(&mut c_guard[..]).set_next_page(s_next);
        if s_next != INVALID_PAGE_ID {
            let mut next_guard = self.bpm.fetch_page(s_next)?;
            LeafNode::from_existing(&mut next_guard[..]).set_prev_page(c_pid);
            next_guard.mark_dirty();
        }
        c_guard.mark_dirty();
        drop(c_guard);
        drop(s_guard);
        self.bpm.free_page(s_pid)?;
        IndexNode::from_existing(&mut parent_guard[..]).delete(separator_key)?;
        parent_guard.mark_dirty();
        tracing::debug!(c_pid, s_pid, "merged leaf (right) into left");
        Ok(())
    }

    fn merge_leaf_left(
        &self,
        c_pid: PageId,
        s_pid: PageId,
        parent_guard: &mut Box<dyn common::api::PageGuard + '_>,
        separator_key: i32,
    ) -> Result<(), BTreeError> {
        let mut c_guard = self.bpm.fetch_page(c_pid)?;
        let mut s_guard = self.bpm.fetch_page(s_pid)?;
        let c_next = LeafNode::from_existing(&mut c_guard[..]).next_page();
        let c_count = LeafNode::from_existing(&mut c_guard[..]).key_count();
        for i in 0..c_count {
            let (k, r) = LeafNode::from_existing(&mut c_guard[..]).get(i);
            LeafNode::from_existing(&mut s_guard[..]).append_raw(k, r)?;
        }
        LeafNode::from_existing(&mut s_guard[..]).set_next_page(c_next);
        if c_next != INVALID_PAGE_ID {
            let mut next_guard = self.bpm.fetch_page(c_next)?;
            LeafNode::from_existing(&mut next_guard[..]).set_prev_page(s_pid);
            next_guard.mark_dirty();
        }
        s_guard.mark_dirty();
        drop(c_guard);
        drop(s_guard);
        self.bpm.free_page(c_pid)?;
        IndexNode::from_existing(&mut parent_guard[..]).delete(separator_key)?;
        parent_guard.mark_dirty();
        tracing::debug!(c_pid, s_pid, "merged leaf (left) into sibling");
        Ok(())
    }

    fn try_redistribute_index_right(
        &self,
        c_pid: PageId,
        s_pid: PageId,
        parent_guard: &mut Box<dyn common::api::PageGuard + '_>,
        separator_key: i32,
    ) -> Result<bool, BTreeError> {
        let mut c_guard = self.bpm.fetch_page(c_pid)?;
        let mut s_guard = self.bpm.fetch_page(s_pid)?;
        let c_count = IndexNode::from_existing(&mut c_guard[..]).entry_count();
        if c_count >= INDEX_HALF_FULL {
            return Ok(true);
        }
        let s_count = IndexNode::from_existing(&mut s_guard[..]).entry_count();
        let n_needed = INDEX_HALF_FULL - c_count;
        let n_max_give = s_count.saturating_sub(INDEX_HALF_FULL);
        if n_max_give < n_needed {
            return Ok(false);
        }

        let mut sp_k = separator_key;
        for _ in 0..n_needed {
            let s_left_link = IndexNode::from_existing(&mut s_guard[..]).left_link();
            IndexNode::from_existing(&mut c_guard[..]).insert(sp_k, s_left_link)?;
            let (fk, fp) = IndexNode::from_existing(&mut s_guard[..]).first().unwrap();
            {
                let mut s = IndexNode::from_existing(&mut s_guard[..]);
                s.set_left_link(fp);
                s.remove_at(0);
            }
            sp_k = fk;
        }
        IndexNode::from_existing(&mut parent_guard[..]).change_key(sp_k, separator_key)?;
        parent_guard.mark_dirty();
        c_guard.mark_dirty();
        s_guard.mark_dirty();
        Ok(true)
    }

    fn try_redistribute_index_left(
        &self,
        c_pid: PageId,
        s_pid: PageId,
        parent_guard: &mut Box<dyn common::api::PageGuard + '_>,
        separator_key: i32,
    ) -> Result<bool, BTreeError> {
        let mut c_guard = self.bpm.fetch_page(c_pid)?;
        let mut s_guard = self.bpm.fetch_page(s_pid)?;
        let c_count = IndexNode::from_existing(&mut c_guard[..]).entry_count();
        if c_count >= INDEX_HALF_FULL {
            return Ok(true);
        }
        let s_count = IndexNode::from_existing(&mut s_guard[..]).entry_count();
        let n_needed = INDEX_HALF_FULL - c_count;
        let n_max_give = s_count.saturating_sub(INDEX_HALF_FULL);
        if n_max_give < n_needed {
            return Ok(false);
        }

        let mut current_sep = separator_key;
        for _ in 0..n_needed {
            let (lk, lp) = {
                let s = IndexNode::from_existing(&mut s_guard[..]);
                s.get(s.entry_count() - 1)
            };
            let c_left_link = IndexNode::from_existing(&mut c_guard[..]).left_link();
            {
                let mut c = IndexNode::from_existing(&mut c_guard[..]);
                c.insert_at(0, current_sep, c_left_link)?;
                c.set_left_link(lp);
            }
            {
                let mut s = IndexNode::from_existing(&mut s_guard[..]);
                let idx = s.entry_count() - 1;
                s.remove_at(idx);
            }
            current_sep = lk;
        }
        IndexNode::from_existing(&mut parent_guard[..]).change_key(current_sep, separator_key)?;
        parent_guard.mark_dirty();
        c_guard.mark_dirty();
        s_guard.mark_dirty();
        Ok(true)
    }

    fn merge_index_right(
        &self,
        c_pid: PageId,
        s_pid: PageId,
        parent_guard: &mut Box<dyn common::api::PageGuard + '_>,
        separator_key: i32,
    ) -> Result<(), BTreeError> {
        let mut c_guard = self.bpm.fetch_page(c_pid)?;
        let mut s_guard = self.bpm.fetch_page(s_pid)?;
        let s_left_link = IndexNode::from_existing(&mut s_guard[..]).left_link();
        IndexNode::from_existing(&mut c_guard[..]).insert(separator_key, s_left_link)?;
        let s_count = IndexNode::from_existing(&mut s_guard[..]).entry_count();
        for i in 0..s_count {
            let (k, ch) = IndexNode::from_existing(&mut s_guard[..]).get(i);
            IndexNode::from_existing(&mut c_guard[..]).insert(k, ch)?;
        }
        c_guard.mark_dirty();
        drop(c_guard);
        drop(s_guard);
        self.bpm.free_page(s_pid)?;
        IndexNode::from_existing(&mut parent_guard[..]).delete(separator_key)?;
        parent_guard.mark_dirty();
        tracing::debug!(c_pid, s_pid, "merged index (right) into left");
        Ok(())
    }

    fn merge_index_left(
        &self,
        c_pid: PageId,
        s_pid: PageId,
        parent_guard: &mut Box<dyn common::api::PageGuard + '_>,
        separator_key: i32,
    ) -> Result<(), BTreeError> {
        let mut c_guard = self.bpm.fetch_page(c_pid)?;
        let mut s_guard = self.bpm.fetch_page(s_pid)?;
        let c_left_link = IndexNode::from_existing(&mut c_guard[..]).left_link();
        IndexNode::from_existing(&mut s_guard[..]).insert(separator_key, c_left_link)?;
        let c_count = IndexNode::from_existing(&mut c_guard[..]).entry_count();
        for i in 0..c_count {
            let (k, ch) = IndexNode::from_existing(&mut c_guard[..]).get(i);
            IndexNode::from_existing(&mut s_guard[..]).insert(k, ch)?;
        }
        s_guard.mark_dirty();
        drop(c_guard);
        drop(s_guard);
        self.bpm.free_page(c_pid)?;
        IndexNode::from_existing(&mut parent_guard[..]).delete(separator_key)?;
        parent_guard.mark_dirty();
        tracing::debug!(c_pid, s_pid, "merged index (left) into sibling");
        Ok(())
    }

    /// Opens a scan cursor over `[low, hi]` (either bound optional).
    pub fn open_scan(&mut self, low: Option<i32>, hi: Option<i32>) -> Result<ScanCursor<'_>, BTreeError> {
        if self.root_page_id == INVALID_PAGE_ID {
            return Ok(ScanCursor::exhausted(self));
        }
        let root = self.root_page_id;
        let start_leaf = match low {
            Some(k) => {
                let mut path = Vec::new();
                self.descend_to_leaf(root, k, &mut path)?
            }
            None => self.find_leftmost_leaf(root)?,
        };
        let exhausted = if let Some(lo) = low {
            let mut guard = self.bpm.fetch_page(start_leaf)?;
            match LeafNode::from_existing(&mut guard[..]).last() {
                Some((k, _)) => k < lo,
                None => true,
            }
        } else {
            false
        };
        Ok(ScanCursor::new(self, start_leaf, hi, exhausted))
    }

    /// Logs a human-readable dump of the tree through `tracing`
    /// (structured logging, not ad hoc `println!`).
    pub fn print(&self) -> Result<(), BTreeError> {
        if self.root_page_id == INVALID_PAGE_ID {
            tracing::info!("<empty tree>");
            return Ok(());
        }
        self.print_subtree(self.root_page_id, 0)
    }

    fn print_subtree(&self, pid: PageId, depth: usize) -> Result<(), BTreeError> {
        let mut guard = self.bpm.fetch_page(pid)?;
        match SortedPage::from_existing(&mut guard[..]).node_type() {
            NodeType::Leaf => {
                let leaf = LeafNode::from_existing(&mut guard[..]);
                let keys: Vec<i32> = (0..leaf.key_count()).map(|i| leaf.get(i).0).collect();
                tracing::info!(depth, pid, ?keys, "leaf");
            }
            NodeType::Index => {
                let (left_link, children) = {
                    let idx = IndexNode::from_existing(&mut guard[..]);
                    let children: Vec<(i32, PageId)> = (0..idx.entry_count()).map(|i| idx.get(i)).collect();
                    (idx.left_link(), children)
                };
                tracing::info!(depth, pid, left_link, ?children, "index");
                drop(guard);
                self.print_subtree(left_link, depth + 1)?;
                for (_, child) in children {
                    self.print_subtree(child, depth + 1)?;
                }
            }
        }
        Ok(())
    }

    /// Height, per-level node/entry counts, and min/mean/max fill
    /// factor. Unimplemented in the source this was distilled from;
    /// specified here since a production index needs it for capacity
    /// planning.
    pub fn dump_statistics(&self) -> Result<TreeStatistics, BTreeError> {
        if self.root_page_id == INVALID_PAGE_ID {
            return Ok(TreeStatistics::default());
        }
        let mut levels = Vec::new();
        let mut frontier = vec![self.root_page_id];
        loop {
            let mut fills = Vec::with_capacity(frontier.len());
            let mut entry_count = 0usize;
            let mut next_frontier = Vec::new();
            let mut reached_leaves = false;
            for pid in &frontier {
                let mut guard = self.bpm.fetch_page(*pid)?;
                match SortedPage::from_existing(&mut guard[..]).node_type() {
                    NodeType::Leaf => {
                        reached_leaves = true;
                        let leaf = LeafNode::from_existing(&mut guard[..]);
                        entry_count += leaf.key_count();
                        let used = PAGE_PAYLOAD - leaf.available_space();
                        fills.push(used as f64 / PAGE_PAYLOAD as f64);
                    }
                    NodeType::Index => {
                        let idx = IndexNode::from_existing(&mut guard[..]);
                        entry_count += idx.entry_count();
                        let used = PAGE_PAYLOAD - idx.available_space();
                        fills.push(used as f64 / PAGE_PAYLOAD as f64);
                        next_frontier.push(idx.left_link());
                        for i in 0..idx.entry_count() {
                            next_frontier.push(idx.get(i).1);
                        }
                    }
                }
            }
            let min_fill = fills.iter().cloned().fold(f64::INFINITY, f64::min);
            let max_fill = fills.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            let mean_fill = fills.iter().sum::<f64>() / fills.len() as f64;
            levels.push(LevelStats { node_count: frontier.len(), entry_count, min_fill, mean_fill, max_fill });
            if reached_leaves {
                break;
            }
            frontier = next_frontier;
        }
        Ok(TreeStatistics { height: levels.len(), levels })
    }

    #[cfg(test)]
    fn min_max_key(&self, pid: PageId) -> Result<(i32, i32), BTreeError> {
        let mut guard = self.bpm.fetch_page(pid)?;
        match SortedPage::from_existing(&mut guard[..]).node_type() {
            NodeType::Leaf => {
                let leaf = LeafNode::from_existing(&mut guard[..]);
                Ok((leaf.first().unwrap().0, leaf.last().unwrap().0))
            }
            NodeType::Index => {
                let idx = IndexNode::from_existing(&mut guard[..]);
                let left_link = idx.left_link();
                let last_child = idx.get(idx.entry_count() - 1).1;
                drop(guard);
                let (min, _) = self.min_max_key(left_link)?;
                let (_, max) = self.min_max_key(last_child)?;
                Ok((min, max))
            }
        }
    }

    /// Checks invariants (a)-(d) from the testable-properties list by
    /// walking every page, for use from property tests only.
    #[cfg(test)]
    fn check_invariants(&self) -> Result<(), BTreeError> {
        if self.root_page_id == INVALID_PAGE_ID {
            return Ok(());
        }
        let mut leaf_depths = Vec::new();
        self.check_subtree(self.root_page_id, 0, true, &mut leaf_depths)?;
        let first_depth = leaf_depths[0];
        assert!(leaf_depths.iter().all(|d| *d == first_depth), "leaves at uneven depth: {leaf_depths:?}");
        Ok(())
    }

    #[cfg(test)]
    fn check_subtree(
        &self,
        pid: PageId,
        depth: usize,
        is_root: bool,
        leaf_depths: &mut Vec<usize>,
    ) -> Result<(), BTreeError> {
        let mut guard = self.bpm.fetch_page(pid)?;
        match SortedPage::from_existing(&mut guard[..]).node_type() {
            NodeType::Leaf => {
                let leaf = LeafNode::from_existing(&mut guard[..]);
                if !is_root {
                    assert!(leaf.is_at_least_half_full(), "non-root leaf {pid} below half full");
                }
                let mut prev = None;
                for i in 0..leaf.key_count() {
                    let (k, _) = leaf.get(i);
                    if let Some(p) = prev {
                        assert!(k >= p, "leaf {pid} out of order at {i}");
                    }
                    prev = Some(k);
                }
                leaf_depths.push(depth);
            }
            NodeType::Index => {
                let idx = IndexNode::from_existing(&mut guard[..]);
                if !is_root {
                    assert!(idx.is_at_least_half_full(), "non-root index {pid} below half full");
                }
                let left_link = idx.left_link();
                let entries: Vec<(i32, PageId)> = (0..idx.entry_count()).map(|i| idx.get(i)).collect();
                drop(guard);

                let (_, left_max) = self.min_max_key(left_link)?;
                if let Some((k0, _)) = entries.first() {
                    assert!(left_max < *k0, "left_link max {left_max} >= first separator {k0}");
                }
                for &(k, child) in &entries {
                    let (child_min, _) = self.min_max_key(child)?;
                    assert!(child_min >= k, "subtree at {child} has key {child_min} < separator {k}");
                }

                self.check_subtree(left_link, depth + 1, false, leaf_depths)?;
                for (_, child) in entries {
                    self.check_subtree(child, depth + 1, false, leaf_depths)?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use buffer_pool_manager::concurrent::ConcurrentBufferPoolManager;
    use buffer_pool_manager::directory::PageDirectory;
    use common::disk_manager::DiskManager;
    use proptest::prelude::*;
    use tempfile::NamedTempFile;

    struct TestHarness {
        _file: NamedTempFile,
        tree: BTreeFile,
    }

    fn new_harness() -> TestHarness {
        let file = NamedTempFile::new().unwrap();
        let disk_manager = Arc::new(DiskManager::new(file.path().to_str().unwrap(), false).unwrap());
        let bpm: Arc<dyn BufferPoolManager> = Arc::new(ConcurrentBufferPoolManager::new(64, disk_manager));
        let directory: Arc<dyn Directory> = Arc::new(PageDirectory::create(bpm.clone()).unwrap());
        let tree = BTreeFile::open(bpm, directory, BTreeConfig::new("prop_index")).unwrap();
        TestHarness { _file: file, tree }
    }

    fn rid(slot: u16) -> RowId {
        RowId { page_id: 1, slot_index: slot }
    }

    fn scan_all(tree: &mut BTreeFile) -> Vec<(i32, RowId)> {
        let mut scan = tree.open_scan(None, None).unwrap();
        let mut out = Vec::new();
        loop {
            match scan.get_next() {
                Ok(pair) => out.push(pair),
                Err(BTreeError::Done) => break,
                Err(e) => panic!("unexpected scan error: {e}"),
            }
        }
        out
    }

    #[derive(Debug, Clone, Copy)]
    enum Op {
        Insert(i32),
        Delete(i32),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0..64i32).prop_map(Op::Insert),
            (0..64i32).prop_map(Op::Delete),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(40))]

        #[test]
        fn invariants_hold_after_every_operation(ops in proptest::collection::vec(op_strategy(), 1..120)) {
            let mut h = new_harness();
            let mut present: std::collections::HashMap<i32, u16> = std::collections::HashMap::new();
            let mut next_slot = 0u16;
            for op in ops {
                match op {
                    Op::Insert(k) => {
                        let slot = next_slot;
                        next_slot = next_slot.wrapping_add(1);
                        h.tree.insert(k, rid(slot)).unwrap();
                        present.insert(k, slot);
                    }
                    Op::Delete(k) => {
                        if let Some(slot) = present.remove(&k) {
                            h.tree.delete(k, rid(slot)).unwrap();
                        }
                    }
                }
                h.tree.check_invariants().unwrap();
            }

            let mut expected: Vec<(i32, RowId)> = present.into_iter().map(|(k, s)| (k, rid(s))).collect();
            expected.sort_by_key(|(k, _)| *k);
            let scanned = scan_all(&mut h.tree);
            prop_assert_eq!(scanned, expected);
        }
    }

    #[test]
    fn idempotent_destroy_leaves_a_fresh_index_behind() {
        let file = NamedTempFile::new().unwrap();
        let disk_manager = Arc::new(DiskManager::new(file.path().to_str().unwrap(), false).unwrap());
        let bpm: Arc<dyn BufferPoolManager> = Arc::new(ConcurrentBufferPoolManager::new(64, disk_manager));
        let directory: Arc<dyn Directory> = Arc::new(PageDirectory::create(bpm.clone()).unwrap());

        let mut tree = BTreeFile::open(bpm.clone(), directory.clone(), BTreeConfig::new("to_destroy")).unwrap();
        for k in 1..=200 {
            tree.insert(k, rid(0)).unwrap();
        }
        tree.destroy().unwrap();

        assert!(directory.get_file_entry("to_destroy").unwrap().is_none());

        let mut reopened = BTreeFile::open(bpm, directory, BTreeConfig::new("to_destroy")).unwrap();
        assert_eq!(reopened.root_page_id(), INVALID_PAGE_ID);
        assert!(matches!(reopened.open_scan(None, None).unwrap().get_next().unwrap_err(), BTreeError::Done));
    }
}
