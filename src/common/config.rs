//! Crate-wide constants and the id type aliases pages and frames are
//! addressed by.

/// Size in bytes of a single page. Fixed: changing this breaks on-disk
/// compatibility with existing data files.
pub const PAGE_SIZE: usize = 1024;

/// Page identifier. Signed so that [`INVALID_PAGE_ID`] can be negative
/// rather than stealing a value out of the valid id space.
pub type PageId = i64;

/// Sentinel meaning "no page".
pub const INVALID_PAGE_ID: PageId = -1;

/// Index of a frame within the buffer pool's frame vector.
pub type FrameId = usize;

/// Page 0: buffer-pool bookkeeping (page_count, free list).
pub const META_PAGE_ID: PageId = 0;

/// Page 1: durable record of the tree's current root id.
pub const ROOT_PAGE_ID: PageId = 1;

/// Bytes preceding the data area of every page: an 8-byte [`PageId`]
/// followed by a 4-byte page-type tag.
pub const PAGE_HEADER_SIZE: usize = 8 + 4;

/// Default buffer pool size (frame count) when a caller doesn't specify one.
pub const DEFAULT_BUFFER_POOL_SIZE: usize = 64;

/// Bytes available to a node codec within a page's data area.
pub const NODE_DATA_CAPACITY: usize = PAGE_SIZE - PAGE_HEADER_SIZE;

/// Minimum-fill threshold below which a non-root node must be rebalanced.
pub const COALESCE_SIZE: usize = NODE_DATA_CAPACITY / 2;

/// Tag written into a page's header identifying what it holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum PageType {
    Unset = 0,
    Internal = 1,
    Leaf = 2,
}

impl PageType {
    pub fn from_i32(v: i32) -> Self {
        match v {
            1 => PageType::Internal,
            2 => PageType::Leaf,
            _ => PageType::Unset,
        }
    }
}
