//! The database-wide name -> root-page directory.
//!
//! Out of scope for the B+ tree core per spec, but named here as a
//! trait so the core can register/deregister its root page without
//! depending on a concrete catalog implementation.
use super::api::{BpmError, PageId};

pub trait Directory: Send + Sync {
    /// Looks up the root page ID registered under `name`, if any.
    fn get_file_entry(&self, name: &str) -> Result<Option<PageId>, BpmError>;

    /// Registers `name` as rooted at `page_id`. Overwrites any prior entry.
    fn add_file_entry(&self, name: &str, page_id: PageId) -> Result<(), BpmError>;

    /// Removes the entry for `name`, if present.
    fn delete_file_entry(&self, name: &str) -> Result<(), BpmError>;
}
