//! Defines the common API for all buffer pool manager implementations.
use std::ops::{Deref, DerefMut};

/// A unique identifier for a page in the database.
pub type PageId = usize;

/// A constant to represent an invalid page ID.
pub const INVALID_PAGE_ID: PageId = 0;

/// The size of a single page's payload in bytes.
///
/// Kept small (1KiB) relative to a typical OS page so that tests can
/// force splits, merges and multi-level trees without inserting huge
/// numbers of keys.
pub const PAGE_SIZE: usize = 1024;

/// A specialized error type for buffer pool manager operations.
#[derive(Debug)]
pub enum BpmError {
    /// Returned when the pool is full and no pages can be evicted.
    NoFreeFrames,
    /// Returned when an operation references a page the pool has never pinned.
    PageNotFound(PageId),
    /// Represents an I/O error from the disk manager.
    IoError(std::io::Error),
}

impl std::fmt::Display for BpmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BpmError::NoFreeFrames => write!(f, "buffer pool has no free frames to evict"),
            BpmError::PageNotFound(id) => {
                write!(f, "page {id} is not resident in the buffer pool")
            }
            BpmError::IoError(e) => write!(f, "buffer pool I/O error: {e}"),
        }
    }
}

impl std::error::Error for BpmError {}

/// A smart pointer representing a pinned page.
///
/// This guard provides mutable access to the page's byte data. When the
/// guard is dropped, it informs the buffer pool manager to unpin the
/// page, allowing it to be considered for eviction again. Dirtiness is
/// tracked explicitly via [`PageGuard::mark_dirty`] rather than implied
/// by `DerefMut`, so a caller that only reads through the guard doesn't
/// force an unnecessary write-back.
pub trait PageGuard: Deref<Target = [u8]> + DerefMut {
    /// Returns the ID of the page being held.
    fn page_id(&self) -> PageId;

    /// Marks the page dirty so it is written back on eviction or flush.
    fn mark_dirty(&mut self);
}

/// The main trait defining the behavior of a Buffer Pool Manager.
///
/// This trait is designed to be object-safe, so it can be used with
/// trait objects (`Arc<dyn BufferPoolManager>`).
pub trait BufferPoolManager: Send + Sync {
    /// Fetches a page from the buffer pool, reading from disk if necessary.
    ///
    /// This method pins the page and returns a `PageGuard`. The page remains
    /// pinned until the `PageGuard` is dropped.
    fn fetch_page(&self, page_id: PageId) -> Result<Box<dyn PageGuard + '_>, BpmError>;

    /// Creates a new page in the buffer pool.
    ///
    /// Finds an available frame, allocates a new page ID, and returns the
    /// pinned page as a `PageGuard`.
    fn new_page(&self) -> Result<Box<dyn PageGuard + '_>, BpmError>;

    /// Unpins a page from the buffer pool.
    ///
    /// Normally called by a `PageGuard`'s drop implementation; exposed
    /// here for callers that release a pin without holding the guard.
    fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> Result<(), BpmError>;

    /// Returns a page to the free list so its ID may be reused.
    ///
    /// The page must be unpinned; implementations reject freeing a
    /// pinned page.
    fn free_page(&self, page_id: PageId) -> Result<(), BpmError>;

    /// Flushes a specific page to disk if it is dirty.
    fn flush_page(&self, page_id: PageId) -> Result<(), BpmError>;

    /// Flushes all dirty pages in the buffer pool to disk.
    fn flush_all_pages(&self) -> Result<(), BpmError>;
}
