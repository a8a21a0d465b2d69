//! The error type surfaced by CORE operations.

use common::api::BpmError;

/// Errors produced by tree operations.
///
/// `NoSpace` is always caught internally and converted into a split or
/// merge decision; it should never reach a caller of [`crate::BTreeFile`].
#[derive(Debug, thiserror::Error)]
pub enum BTreeError {
    /// A page had insufficient free bytes for an entry.
    #[error("page has insufficient free space for the entry")]
    NoSpace,
    /// A deletion or search did not match.
    #[error("key/rid not found")]
    NotFound,
    /// A scan cursor has been exhausted.
    #[error("scan exhausted")]
    Done,
    /// The buffer pool or directory returned failure.
    #[error("buffer pool or directory failure: {0}")]
    IoFailure(#[from] BpmError),
    /// An invariant was violated (e.g. descent reached an invalid page
    /// before finding a leaf).
    #[error("tree invariant violated: {0}")]
    Corrupt(String),
}
