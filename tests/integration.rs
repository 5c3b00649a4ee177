//! End-to-end scenarios exercising the public crate API against a real file
//! on disk, mirroring the store's documented testable properties: survival
//! across reopen, many-split correctness, pin accounting, and the pluggable
//! replacer policies.

use bptreedb::buffer::BufferPoolManager;
use bptreedb::common::PageType;
use bptreedb::{BPlusTree, ReplacerPolicy};
use tempdir::TempDir;

#[test]
fn empty_then_one_then_many_survives_reopen() {
    let dir = TempDir::new("bptreedb-it").unwrap();
    let path = dir.path().join("store.db");

    {
        let mut tree = BPlusTree::open(&path, 4).unwrap();
        assert_eq!(tree.search(b"a").unwrap(), None);
        assert!(tree.insert(b"a", b"1").unwrap());
        assert_eq!(tree.search(b"a").unwrap(), Some(b"1".to_vec()));
        assert!(tree.insert(b"b", b"2").unwrap());
        assert_eq!(tree.search(b"b").unwrap(), Some(b"2".to_vec()));
        tree.close().unwrap();
    }

    let mut tree = BPlusTree::open(&path, 4).unwrap();
    assert_eq!(tree.search(b"a").unwrap(), Some(b"1".to_vec()));
    assert_eq!(tree.search(b"b").unwrap(), Some(b"2".to_vec()));
}

#[test]
fn leaf_splits_keep_every_key_searchable() {
    let dir = TempDir::new("bptreedb-it").unwrap();
    let mut tree = BPlusTree::open(dir.path().join("store.db"), 4).unwrap();

    for i in 0..200 {
        let key = format!("hello{i}");
        let val = format!("world{i}");
        assert!(tree.insert(key.as_bytes(), val.as_bytes()).unwrap());
    }
    for i in 0..200 {
        let key = format!("hello{i}");
        let val = format!("world{i}");
        assert_eq!(tree.search(key.as_bytes()).unwrap(), Some(val.into_bytes()));
    }
}

#[test]
fn many_splits_at_scale() {
    let dir = TempDir::new("bptreedb-it").unwrap();
    let mut tree = BPlusTree::open(dir.path().join("store.db"), 32).unwrap();

    for i in 0..10_000 {
        let s = i.to_string();
        assert!(tree.insert(s.as_bytes(), s.as_bytes()).unwrap());
    }
    for i in 0..10_000 {
        let s = i.to_string();
        assert_eq!(tree.search(s.as_bytes()).unwrap(), Some(s.into_bytes()));
    }
}

#[test]
fn buffer_pool_persists_raw_pages_across_reopen() {
    let dir = TempDir::new("bptreedb-it").unwrap();
    let path = dir.path().join("store.db");

    let mut ids = Vec::new();
    {
        let bpm = BufferPoolManager::open(&path, 4).unwrap();
        for i in 0..20 {
            let frame = bpm.new_page(PageType::Leaf).unwrap().unwrap();
            let id = frame.page_id();
            let text = format!("hello world{i}");
            frame.data_mut()[..text.len()].copy_from_slice(text.as_bytes());
            bpm.unpin(id, true);
            ids.push((id, text));
        }
        bpm.close().unwrap();
    }

    // page 0 (meta) + page 1 (root register) + 20 allocated node pages
    assert_eq!(std::fs::metadata(&path).unwrap().len(), 22 * 1024);

    let bpm = BufferPoolManager::open(&path, 1).unwrap();
    for (id, text) in ids {
        let frame = bpm.fetch_page(id).unwrap().unwrap();
        assert_eq!(&frame.data()[..text.len()], text.as_bytes());
        bpm.unpin(id, false);
    }
}

#[test]
fn fifo_policy_also_round_trips_values() {
    let dir = TempDir::new("bptreedb-it").unwrap();
    let mut tree = BPlusTree::open_with_replacer(dir.path().join("store.db"), 4, ReplacerPolicy::Fifo).unwrap();
    for i in 0..500 {
        let s = i.to_string();
        tree.insert(s.as_bytes(), s.as_bytes()).unwrap();
    }
    for i in 0..500 {
        let s = i.to_string();
        assert_eq!(tree.search(s.as_bytes()).unwrap(), Some(s.into_bytes()));
    }
}

#[test]
fn insert_then_remove_then_reinsert_round_trips() {
    let dir = TempDir::new("bptreedb-it").unwrap();
    let mut tree = BPlusTree::open(dir.path().join("store.db"), 8).unwrap();

    for i in 0..1000 {
        let s = i.to_string();
        tree.insert(s.as_bytes(), s.as_bytes()).unwrap();
    }
    for i in (0..1000).step_by(3) {
        let s = i.to_string();
        assert!(tree.remove(s.as_bytes()).unwrap());
    }
    for i in (0..1000).step_by(3) {
        let s = i.to_string();
        assert!(tree.insert(s.as_bytes(), s.as_bytes()).unwrap());
    }
    for i in 0..1000 {
        let s = i.to_string();
        assert_eq!(tree.search(s.as_bytes()).unwrap(), Some(s.into_bytes()));
    }
}
