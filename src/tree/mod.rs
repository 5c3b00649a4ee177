//! The B+ tree itself: descent, insert-with-split, point search, and
//! delete-with-rebalance, all mediated through a [`BufferPoolManager`].

use std::path::Path;

use log::debug;

use crate::buffer::{BufferPoolManager, ReplacerPolicy};
use crate::common::config::{PageId, PageType, COALESCE_SIZE, INVALID_PAGE_ID, NODE_DATA_CAPACITY};
use crate::common::error::{Error, Result};
use crate::node::{InternalNode, LeafNode};
use crate::storage::page::Frame;

/// An embedded, single-process, on-disk ordered key-value store backed by a
/// B+ tree. Not `Sync`: operations are not safe to call concurrently from
/// multiple threads without external synchronization.
pub struct BPlusTree {
    bpm: BufferPoolManager,
    root: PageId,
}

impl BPlusTree {
    pub fn open<P: AsRef<Path>>(path: P, pool_size: usize) -> Result<Self> {
        Self::open_with_replacer(path, pool_size, ReplacerPolicy::Lru)
    }

    pub fn open_with_replacer<P: AsRef<Path>>(
        path: P,
        pool_size: usize,
        policy: ReplacerPolicy,
    ) -> Result<Self> {
        let bpm = BufferPoolManager::open_with_replacer(path, pool_size, policy)?;
        let root = bpm.read_root()?;
        Ok(BPlusTree { bpm, root })
    }

    pub fn close(&mut self) -> Result<()> {
        self.bpm.close()
    }

    fn fetch(&self, id: PageId) -> Result<Frame> {
        self.bpm
            .fetch_page(id)?
            .ok_or_else(|| Error::Contract(format!("page {id} missing from a live tree")))
    }

    /// Descends from the root to the leaf that would hold `key`, returning
    /// it pinned along with its decoded form. Caller must `unpin` the id.
    fn find_leaf(&self, key: &[u8]) -> Result<(PageId, LeafNode)> {
        assert_ne!(self.root, INVALID_PAGE_ID, "find_leaf on an empty tree");
        let mut id = self.root;
        loop {
            let frame = self.fetch(id)?;
            let (_, ty) = frame.read_header();
            match ty {
                PageType::Leaf => {
                    let node = LeafNode::read(&frame.data());
                    return Ok((id, node));
                }
                PageType::Internal => {
                    let node = InternalNode::read(&frame.data());
                    let child = node.child(key);
                    self.bpm.unpin(id, false);
                    id = child;
                }
                PageType::Unset => {
                    return Err(Error::Corrupt(id, "page has no type tag".into()));
                }
            }
        }
    }

    pub fn search(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        if self.root == INVALID_PAGE_ID {
            return Ok(None);
        }
        let (id, node) = self.find_leaf(key)?;
        let value = node.get(key).map(|v| v.to_vec());
        self.bpm.unpin(id, false);
        Ok(value)
    }

    /// Inserts or updates `(key, val)`. `Ok(false)` means the buffer pool
    /// was exhausted and the insert did not happen; the tree is left as it
    /// was before the call.
    pub fn insert(&mut self, key: &[u8], val: &[u8]) -> Result<bool> {
        if self.root == INVALID_PAGE_ID {
            return self.make_tree(key, val);
        }

        let (leaf_id, mut leaf) = self.find_leaf(key)?;
        leaf.insert(key, val);

        if leaf.less_than(NODE_DATA_CAPACITY) {
            let frame = self.fetch(leaf_id)?;
            leaf.write(&mut frame.data_mut());
            self.bpm.unpin(leaf_id, true);
            self.bpm.unpin(leaf_id, false); // release the pin held by fetch() above
            return Ok(true);
        }

        let new_leaf_frame = match self.bpm.new_page(PageType::Leaf)? {
            Some(f) => f,
            None => {
                self.bpm.unpin(leaf_id, false);
                return Ok(false);
            }
        };
        let new_leaf_id = new_leaf_frame.page_id();
        let parent = leaf.parent;

        let mut new_leaf = LeafNode::new(parent);
        leaf.move_half_to(&mut new_leaf);
        new_leaf.next = leaf.next;
        leaf.next = new_leaf_id;
        let separator = new_leaf.key(0).to_vec();

        let leaf_frame = self.fetch(leaf_id)?;
        leaf.write(&mut leaf_frame.data_mut());
        self.bpm.unpin(leaf_id, true);
        self.bpm.unpin(leaf_id, false);

        new_leaf.write(&mut new_leaf_frame.data_mut());
        self.bpm.unpin(new_leaf_id, true);

        debug!("insert: split leaf {} into {} and {}", leaf_id, leaf_id, new_leaf_id);
        self.insert_parent(parent, leaf_id, new_leaf_id, &separator)
    }

    fn make_tree(&mut self, key: &[u8], val: &[u8]) -> Result<bool> {
        let frame = match self.bpm.new_page(PageType::Leaf)? {
            Some(f) => f,
            None => return Ok(false),
        };
        let id = frame.page_id();
        let mut node = LeafNode::new(INVALID_PAGE_ID);
        node.insert(key, val);
        node.write(&mut frame.data_mut());
        self.bpm.unpin(id, true);

        self.root = id;
        self.bpm.write_root(id)?;
        Ok(true)
    }

    /// Propagates a split into `parent_id`. `Ok(false)` means the buffer
    /// pool was exhausted partway through and no further allocation could
    /// be made; any page already fetched at this level is unpinned clean
    /// before returning.
    fn insert_parent(&mut self, parent_id: PageId, left: PageId, right: PageId, key: &[u8]) -> Result<bool> {
        if parent_id == INVALID_PAGE_ID {
            return self.make_root(left, right, key);
        }

        let parent_frame = self.fetch(parent_id)?;
        let mut parent = InternalNode::read(&parent_frame.data());
        parent.insert(key, right);

        if parent.less_than(NODE_DATA_CAPACITY) {
            parent.write(&mut parent_frame.data_mut());
            self.bpm.unpin(parent_id, true);
            return Ok(true);
        }

        let new_parent_frame = match self.bpm.new_page(PageType::Internal)? {
            Some(f) => f,
            None => {
                self.bpm.unpin(parent_id, false);
                return Ok(false);
            }
        };
        let new_parent_id = new_parent_frame.page_id();
        let grandparent = parent.parent;

        let mut new_parent = InternalNode::new(grandparent);
        let up_key = parent.move_half_to(&mut new_parent);

        for i in 0..new_parent.len() {
            let child_id = new_parent.child_at(i);
            self.set_parent(child_id, new_parent_id)?;
        }

        parent.write(&mut parent_frame.data_mut());
        self.bpm.unpin(parent_id, true);
        new_parent.write(&mut new_parent_frame.data_mut());
        self.bpm.unpin(new_parent_id, true);

        debug!("insert: split internal {} into {} and {}", parent_id, parent_id, new_parent_id);
        self.insert_parent(grandparent, parent_id, new_parent_id, &up_key)
    }

    /// Materializes a brand-new root over `left`/`right`. `Ok(false)` means
    /// the buffer pool had no frame free to allocate it.
    fn make_root(&mut self, left: PageId, right: PageId, key: &[u8]) -> Result<bool> {
        let frame = match self.bpm.new_page(PageType::Internal)? {
            Some(f) => f,
            None => return Ok(false),
        };
        let id = frame.page_id();
        let mut node = InternalNode::new(INVALID_PAGE_ID);
        node.insert_leftmost(left);
        node.insert(key, right);
        node.write(&mut frame.data_mut());
        self.bpm.unpin(id, true);

        self.set_parent(left, id)?;
        self.set_parent(right, id)?;

        self.root = id;
        self.bpm.write_root(id)?;
        Ok(true)
    }

    fn set_parent(&self, id: PageId, new_parent: PageId) -> Result<()> {
        let frame = self.fetch(id)?;
        let (_, ty) = frame.read_header();
        match ty {
            PageType::Leaf => {
                let mut node = LeafNode::read(&frame.data());
                node.parent = new_parent;
                node.write(&mut frame.data_mut());
            }
            PageType::Internal => {
                let mut node = InternalNode::read(&frame.data());
                node.parent = new_parent;
                node.write(&mut frame.data_mut());
            }
            PageType::Unset => return Err(Error::Corrupt(id, "page has no type tag".into())),
        }
        self.bpm.unpin(id, true);
        Ok(())
    }

    /// Removes `key`. `Ok(false)` if it wasn't present.
    pub fn remove(&mut self, key: &[u8]) -> Result<bool> {
        if self.root == INVALID_PAGE_ID {
            return Ok(false);
        }
        let (leaf_id, mut leaf) = self.find_leaf(key)?;
        if !leaf.remove(key) {
            self.bpm.unpin(leaf_id, false);
            return Ok(false);
        }

        let is_root = leaf.parent == INVALID_PAGE_ID;
        let frame = self.fetch(leaf_id)?;
        leaf.write(&mut frame.data_mut());
        self.bpm.unpin(leaf_id, true);
        self.bpm.unpin(leaf_id, false);

        if is_root || !leaf.less_than(COALESCE_SIZE) {
            return Ok(true);
        }

        self.rebalance_leaf(leaf_id)?;
        Ok(true)
    }

    fn rebalance_leaf(&mut self, id: PageId) -> Result<()> {
        let parent_id = {
            let frame = self.fetch(id)?;
            let node = LeafNode::read(&frame.data());
            self.bpm.unpin(id, false);
            node.parent
        };
        if parent_id == INVALID_PAGE_ID {
            return Ok(());
        }

        let (parent, my_idx) = {
            let frame = self.fetch(parent_id)?;
            let parent = InternalNode::read(&frame.data());
            self.bpm.unpin(parent_id, false);
            let my_idx = (0..parent.len())
                .find(|&i| parent.child_at(i) == id)
                .expect("leaf not linked from its own parent");
            (parent, my_idx)
        };

        if my_idx + 1 < parent.len() {
            let right_id = parent.child_at(my_idx + 1);
            if self.borrow_from_right_leaf(id, right_id, parent_id, my_idx + 1)? {
                return Ok(());
            }
            if !self.merge_leaves(id, right_id, parent_id, my_idx + 1)? {
                return Ok(());
            }
            return self.rebalance_internal(parent_id);
        }

        let left_id = parent.child_at(my_idx - 1);
        if self.borrow_from_left_leaf(left_id, id, parent_id, my_idx)? {
            return Ok(());
        }
        if !self.merge_leaves(left_id, id, parent_id, my_idx)? {
            return Ok(());
        }
        self.rebalance_internal(parent_id)
    }

    fn borrow_from_right_leaf(&self, id: PageId, right_id: PageId, parent_id: PageId, right_idx: usize) -> Result<bool> {
        let right_frame = self.fetch(right_id)?;
        let rnode = LeafNode::read(&right_frame.data());
        if rnode.len() <= 1 {
            self.bpm.unpin(right_id, false);
            return Ok(false);
        }
        let mut trial = rnode.clone();
        trial.remove_at(0);
        if trial.less_than(COALESCE_SIZE) {
            self.bpm.unpin(right_id, false);
            return Ok(false);
        }
        let borrowed_key = rnode.key(0).to_vec();
        let borrowed_val = rnode.val(0).to_vec();
        trial.write(&mut right_frame.data_mut());
        self.bpm.unpin(right_id, true);

        let frame = self.fetch(id)?;
        let mut node = LeafNode::read(&frame.data());
        node.insert(&borrowed_key, &borrowed_val);
        node.write(&mut frame.data_mut());
        self.bpm.unpin(id, true);

        self.update_separator(parent_id, right_idx, trial.key(0))?;
        Ok(true)
    }

    fn borrow_from_left_leaf(&self, left_id: PageId, id: PageId, parent_id: PageId, my_idx: usize) -> Result<bool> {
        let left_frame = self.fetch(left_id)?;
        let lnode = LeafNode::read(&left_frame.data());
        if lnode.len() <= 1 {
            self.bpm.unpin(left_id, false);
            return Ok(false);
        }
        let last = lnode.len() - 1;
        let mut trial = lnode.clone();
        trial.remove_at(last);
        if trial.less_than(COALESCE_SIZE) {
            self.bpm.unpin(left_id, false);
            return Ok(false);
        }
        let borrowed_key = lnode.key(last).to_vec();
        let borrowed_val = lnode.val(last).to_vec();
        trial.write(&mut left_frame.data_mut());
        self.bpm.unpin(left_id, true);

        let frame = self.fetch(id)?;
        let mut node = LeafNode::read(&frame.data());
        node.insert(&borrowed_key, &borrowed_val);
        node.write(&mut frame.data_mut());
        self.bpm.unpin(id, true);

        self.update_separator(parent_id, my_idx, &borrowed_key)?;
        Ok(true)
    }

    /// Merges `right_id` into `left_id` and drops the separator from
    /// `parent_id`. `Ok(false)` means the combined node would overflow
    /// `PAGE_SIZE` (possible with large variable-length keys even though
    /// both siblings are under `COALESCE_SIZE`) — the merge is skipped and
    /// both siblings are left resident, under-full but intact.
    fn merge_leaves(&self, left_id: PageId, right_id: PageId, parent_id: PageId, right_idx: usize) -> Result<bool> {
        let right_frame = self.fetch(right_id)?;
        let rnode = LeafNode::read(&right_frame.data());

        let left_frame = self.fetch(left_id)?;
        let lnode = LeafNode::read(&left_frame.data());

        let mut merged = lnode.clone();
        for i in 0..rnode.len() {
            merged.insert(rnode.key(i), rnode.val(i));
        }
        if !merged.less_than(NODE_DATA_CAPACITY) {
            self.bpm.unpin(right_id, false);
            self.bpm.unpin(left_id, false);
            return Ok(false);
        }
        merged.next = rnode.next;
        merged.write(&mut left_frame.data_mut());
        self.bpm.unpin(left_id, true);
        self.bpm.unpin(right_id, false);

        let parent_frame = self.fetch(parent_id)?;
        let mut parent = InternalNode::read(&parent_frame.data());
        parent.remove_at(right_idx);
        parent.write(&mut parent_frame.data_mut());
        self.bpm.unpin(parent_id, true);

        self.bpm.push_free_page(right_id);
        debug!("remove: merged leaf {} into {}, freed {}", right_id, left_id, right_id);
        Ok(true)
    }

    fn update_separator(&self, parent_id: PageId, idx: usize, key: &[u8]) -> Result<()> {
        let frame = self.fetch(parent_id)?;
        let mut parent = InternalNode::read(&frame.data());
        parent.set_key(idx, key);
        parent.write(&mut frame.data_mut());
        self.bpm.unpin(parent_id, true);
        Ok(())
    }

    fn rebalance_internal(&mut self, id: PageId) -> Result<()> {
        let (parent_id, len) = {
            let frame = self.fetch(id)?;
            let node = InternalNode::read(&frame.data());
            self.bpm.unpin(id, false);
            (node.parent, node.len())
        };

        if parent_id == INVALID_PAGE_ID {
            if len == 1 {
                let frame = self.fetch(id)?;
                let node = InternalNode::read(&frame.data());
                self.bpm.unpin(id, false);
                let only_child = node.child_at(0);
                self.set_parent(only_child, INVALID_PAGE_ID)?;
                self.bpm.push_free_page(id);
                self.root = only_child;
                self.bpm.write_root(only_child)?;
                debug!("remove: collapsed root {} into {}", id, only_child);
            }
            return Ok(());
        }

        let fits = {
            let frame = self.fetch(id)?;
            let node = InternalNode::read(&frame.data());
            self.bpm.unpin(id, false);
            !node.less_than(COALESCE_SIZE)
        };
        if fits {
            return Ok(());
        }

        let (parent, my_idx) = {
            let frame = self.fetch(parent_id)?;
            let parent = InternalNode::read(&frame.data());
            self.bpm.unpin(parent_id, false);
            let my_idx = (0..parent.len())
                .find(|&i| parent.child_at(i) == id)
                .expect("internal node not linked from its own parent");
            (parent, my_idx)
        };

        if my_idx + 1 < parent.len() {
            let right_id = parent.child_at(my_idx + 1);
            if self.borrow_from_right_internal(id, right_id, parent_id, my_idx + 1)? {
                return Ok(());
            }
            if !self.merge_internals(id, right_id, parent_id, my_idx + 1)? {
                return Ok(());
            }
            return self.rebalance_internal(parent_id);
        }

        let left_id = parent.child_at(my_idx - 1);
        if self.borrow_from_left_internal(left_id, id, parent_id, my_idx)? {
            return Ok(());
        }
        if !self.merge_internals(left_id, id, parent_id, my_idx)? {
            return Ok(());
        }
        self.rebalance_internal(parent_id)
    }

    fn borrow_from_right_internal(&self, id: PageId, right_id: PageId, parent_id: PageId, right_idx: usize) -> Result<bool> {
        let separator = {
            let frame = self.fetch(parent_id)?;
            let parent = InternalNode::read(&frame.data());
            self.bpm.unpin(parent_id, false);
            parent.key(right_idx).to_vec()
        };

        let right_frame = self.fetch(right_id)?;
        let rnode = InternalNode::read(&right_frame.data());
        if rnode.len() <= 1 {
            self.bpm.unpin(right_id, false);
            return Ok(false);
        }
        let mut trial = rnode.clone();
        trial.remove_at(0);
        trial.set_key(0, &[]);
        if trial.less_than(COALESCE_SIZE) {
            self.bpm.unpin(right_id, false);
            return Ok(false);
        }
        let moving_child = rnode.child_at(0);
        let new_separator = rnode.key(1).to_vec();
        trial.write(&mut right_frame.data_mut());
        self.bpm.unpin(right_id, true);

        let frame = self.fetch(id)?;
        let mut node = InternalNode::read(&frame.data());
        node.insert(&separator, moving_child);
        node.write(&mut frame.data_mut());
        self.bpm.unpin(id, true);

        self.set_parent(moving_child, id)?;
        self.update_separator(parent_id, right_idx, &new_separator)?;
        Ok(true)
    }

    fn borrow_from_left_internal(&self, left_id: PageId, id: PageId, parent_id: PageId, my_idx: usize) -> Result<bool> {
        let separator = {
            let frame = self.fetch(parent_id)?;
            let parent = InternalNode::read(&frame.data());
            self.bpm.unpin(parent_id, false);
            parent.key(my_idx).to_vec()
        };

        let left_frame = self.fetch(left_id)?;
        let lnode = InternalNode::read(&left_frame.data());
        if lnode.len() <= 1 {
            self.bpm.unpin(left_id, false);
            return Ok(false);
        }
        let last = lnode.len() - 1;
        let mut trial = lnode.clone();
        trial.remove_at(last);
        if trial.less_than(COALESCE_SIZE) {
            self.bpm.unpin(left_id, false);
            return Ok(false);
        }
        let moving_child = lnode.child_at(last);
        let new_separator = lnode.key(last).to_vec();
        trial.write(&mut left_frame.data_mut());
        self.bpm.unpin(left_id, true);

        let frame = self.fetch(id)?;
        let mut node = InternalNode::read(&frame.data());
        node.prepend_leftmost(moving_child, &separator);
        node.write(&mut frame.data_mut());
        self.bpm.unpin(id, true);

        self.set_parent(moving_child, id)?;
        self.update_separator(parent_id, my_idx, &new_separator)?;
        Ok(true)
    }

    /// Merges `right_id` into `left_id` pulling the separator down from
    /// `parent_id`. `Ok(false)` means the combined node would overflow
    /// `PAGE_SIZE` (possible with large variable-length keys even though
    /// both siblings are under `COALESCE_SIZE`) — the merge is skipped and
    /// both siblings are left resident, under-full but intact.
    fn merge_internals(&self, left_id: PageId, right_id: PageId, parent_id: PageId, right_idx: usize) -> Result<bool> {
        let separator = {
            let frame = self.fetch(parent_id)?;
            let parent = InternalNode::read(&frame.data());
            self.bpm.unpin(parent_id, false);
            parent.key(right_idx).to_vec()
        };

        let right_frame = self.fetch(right_id)?;
        let rnode = InternalNode::read(&right_frame.data());

        let left_frame = self.fetch(left_id)?;
        let lnode = InternalNode::read(&left_frame.data());

        let mut merged = lnode.clone();
        merged.insert(&separator, rnode.child_at(0));
        for i in 1..rnode.len() {
            merged.insert(rnode.key(i), rnode.child_at(i));
        }
        if !merged.less_than(NODE_DATA_CAPACITY) {
            self.bpm.unpin(right_id, false);
            self.bpm.unpin(left_id, false);
            return Ok(false);
        }
        merged.write(&mut left_frame.data_mut());
        self.bpm.unpin(left_id, true);
        self.bpm.unpin(right_id, false);

        for i in 0..rnode.len() {
            self.set_parent(rnode.child_at(i), left_id)?;
        }

        let parent_frame = self.fetch(parent_id)?;
        let mut parent = InternalNode::read(&parent_frame.data());
        parent.remove_at(right_idx);
        parent.write(&mut parent_frame.data_mut());
        self.bpm.unpin(parent_id, true);

        self.bpm.push_free_page(right_id);
        debug!("remove: merged internal {} into {}, freed {}", right_id, left_id, right_id);
        Ok(true)
    }

    /// Walks every leaf in ascending key order. Intended for tests and
    /// debugging, not a hot path.
    pub fn scan(&mut self) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut out = Vec::new();
        if self.root == INVALID_PAGE_ID {
            return Ok(out);
        }

        let mut id = self.root;
        loop {
            let frame = self.fetch(id)?;
            let (_, ty) = frame.read_header();
            match ty {
                PageType::Internal => {
                    let node = InternalNode::read(&frame.data());
                    let child = node.child_at(0);
                    self.bpm.unpin(id, false);
                    id = child;
                }
                PageType::Leaf => {
                    self.bpm.unpin(id, false);
                    break;
                }
                PageType::Unset => return Err(Error::Corrupt(id, "page has no type tag".into())),
            }
        }

        let mut cur = id;
        while cur != INVALID_PAGE_ID {
            let frame = self.fetch(cur)?;
            let node = LeafNode::read(&frame.data());
            for i in 0..node.len() {
                out.push((node.key(i).to_vec(), node.val(i).to_vec()));
            }
            let next = node.next;
            self.bpm.unpin(cur, false);
            cur = next;
        }
        Ok(out)
    }
}
