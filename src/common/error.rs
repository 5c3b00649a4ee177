use thiserror::Error;

use super::config::PageId;

/// Errors surfaced across the disk manager, buffer pool, and tree.
///
/// Exhaustion conditions (no evictable frame, no space left in the free
/// list) are deliberately *not* variants here: they are ordinary outcomes
/// reported as `Ok(None)` / `Ok(false)`, not bugs. See the `Contract`
/// variant and the crate's error-handling notes for what counts as fatal.
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("path is not usable as a database file: {0}")]
    Path(String),

    #[error("page {0} not found in buffer pool")]
    PageNotFound(PageId),

    #[error("page {0} is corrupt: {1}")]
    Corrupt(PageId, String),

    #[error("contract violation: {0}")]
    Contract(String),
}

pub type Result<T> = std::result::Result<T, Error>;
