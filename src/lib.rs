//! An embedded, single-process, on-disk ordered key-value store backed by a
//! B+ tree whose pages are cached by a fixed-size, replacement-policy-driven
//! buffer pool.
//!
//! ```no_run
//! use bptreedb::BPlusTree;
//!
//! let mut tree = BPlusTree::open("/tmp/example.db", 64)?;
//! tree.insert(b"hello", b"world")?;
//! assert_eq!(tree.search(b"hello")?, Some(b"world".to_vec()));
//! tree.close()?;
//! # Ok::<(), bptreedb::Error>(())
//! ```

pub mod buffer;
pub mod common;
pub mod node;
pub mod storage;
pub mod tree;

pub use buffer::{BufferPoolManager, ReplacerPolicy};
pub use common::{Error, PageId, Result};
pub use tree::BPlusTree;
