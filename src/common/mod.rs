pub mod config;
pub mod error;

pub use config::{
    FrameId, PageId, PageType, COALESCE_SIZE, DEFAULT_BUFFER_POOL_SIZE, INVALID_PAGE_ID,
    META_PAGE_ID, NODE_DATA_CAPACITY, PAGE_HEADER_SIZE, PAGE_SIZE, ROOT_PAGE_ID,
};
pub use error::{Error, Result};
