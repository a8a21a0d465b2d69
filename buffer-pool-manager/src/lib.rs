//! Two buffer pool manager implementations over the `common` traits:
//! an actor/channel-based pool and a lock-based pool with CLOCK
//! replacement, plus a page-backed file directory.

pub mod actor;
pub mod concurrent;
pub mod directory;

/// Re-exported so downstream crates can write
/// `buffer_pool_manager::api::{BufferPoolManager, PageId, ...}` without
/// also depending on `common` directly.
pub mod api {
    pub use common::api::*;
}

/// Re-exported so downstream crates can write
/// `buffer_pool_manager::disk_manager::DiskManager`.
pub mod disk_manager {
    pub use common::disk_manager::DiskManager;
}
