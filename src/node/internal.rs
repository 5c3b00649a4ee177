//! Internal (non-leaf) B+ tree node: a transient view decoded from, and
//! re-encoded into, a page's data bytes.
//!
//! Layout (after the page header): `i32 num_keys`, `PageId parent`, then
//! `num_keys` records of `{i32 key_size, PageId child}`, then the
//! concatenated key bytes in order. The left-most record always carries an
//! empty sentinel key: `items[0].child` is the subtree holding everything
//! smaller than `items[1].key`.

use crate::common::config::PageId;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Item {
    key: Vec<u8>,
    child: PageId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InternalNode {
    pub parent: PageId,
    items: Vec<Item>,
}

impl InternalNode {
    pub fn new(parent: PageId) -> Self {
        InternalNode {
            parent,
            items: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn key(&self, idx: usize) -> &[u8] {
        &self.items[idx].key
    }

    pub fn child_at(&self, idx: usize) -> PageId {
        self.items[idx].child
    }

    /// Smallest index `r` such that `key(r) >= key`, or `len()` if none.
    pub fn find_idx(&self, key: &[u8]) -> usize {
        self.items.partition_point(|it| it.key.as_slice() < key)
    }

    pub fn find(&self, key: &[u8]) -> (bool, usize) {
        let r = self.find_idx(key);
        (r < self.items.len() && self.items[r].key == key, r)
    }

    /// The child to descend into while searching for `key`. Requires at
    /// least one item (the left-most sentinel).
    pub fn child(&self, key: &[u8]) -> PageId {
        assert!(!self.items.is_empty(), "child() on an empty internal node");
        let mut r = self.find_idx(key);
        if r == self.items.len() || self.items[r].key != key {
            r -= 1;
        }
        self.items[r].child
    }

    /// Inserts the left-most sentinel item. Only valid on an empty node,
    /// used when materializing a fresh root.
    pub fn insert_leftmost(&mut self, child: PageId) {
        assert!(self.items.is_empty());
        self.items.push(Item {
            key: Vec::new(),
            child,
        });
    }

    pub fn insert(&mut self, key: &[u8], child: PageId) {
        let r = self.find_idx(key);
        self.items.insert(
            r,
            Item {
                key: key.to_vec(),
                child,
            },
        );
    }

    /// Removes the item at `key`, returning whether it was present.
    pub fn remove(&mut self, key: &[u8]) -> bool {
        let (exists, r) = self.find(key);
        if exists {
            self.items.remove(r);
        }
        exists
    }

    pub fn remove_at(&mut self, idx: usize) {
        self.items.remove(idx);
    }

    /// Overwrites the key stored at `idx` without touching its child
    /// pointer. Used to rewrite a parent's separator after a borrow, and to
    /// re-blank a node's left-most sentinel after that item shifts.
    pub fn set_key(&mut self, idx: usize, key: &[u8]) {
        self.items[idx].key = key.to_vec();
    }

    /// Prepends a new left-most sentinel item with `new_child`, demoting
    /// the current left-most item to `items[1]` under `old_leftmost_separator`
    /// (the key that now separates it from the new left-most child). Used
    /// when borrowing a child from a left sibling.
    pub fn prepend_leftmost(&mut self, new_child: PageId, old_leftmost_separator: &[u8]) {
        assert!(!self.items.is_empty());
        self.items[0].key = old_leftmost_separator.to_vec();
        self.items.insert(
            0,
            Item {
                key: Vec::new(),
                child: new_child,
            },
        );
    }

    /// Splits at the midpoint, moving the upper half into `new_node` (which
    /// must be empty). Returns the separator key to promote into the
    /// parent; `new_node`'s own left-most item is re-blanked to the empty
    /// sentinel to preserve the left-most-is-sentinel invariant.
    pub fn move_half_to(&mut self, new_node: &mut InternalNode) -> Vec<u8> {
        assert!(new_node.is_empty());
        let mid = self.items.len() / 2;
        let separator = self.items[mid].key.clone();
        let mut moved: Vec<Item> = self.items.split_off(mid);
        moved[0].key.clear();
        new_node.items = moved;
        separator
    }

    pub fn encoded_size(&self) -> usize {
        4 + 8 + self.items.len() * (4 + 8) + self.items.iter().map(|i| i.key.len()).sum::<usize>()
    }

    pub fn less_than(&self, limit: usize) -> bool {
        self.encoded_size() < limit
    }

    pub fn read(data: &[u8]) -> Self {
        let num_keys = i32::from_le_bytes(data[0..4].try_into().unwrap()) as usize;
        let parent = PageId::from_le_bytes(data[4..12].try_into().unwrap());

        let mut items = Vec::with_capacity(num_keys);
        let mut record_off = 12;
        let mut key_sizes = Vec::with_capacity(num_keys);
        for _ in 0..num_keys {
            let key_size = i32::from_le_bytes(data[record_off..record_off + 4].try_into().unwrap()) as usize;
            let child = PageId::from_le_bytes(data[record_off + 4..record_off + 12].try_into().unwrap());
            key_sizes.push(key_size);
            items.push(Item {
                key: Vec::new(),
                child,
            });
            record_off += 12;
        }

        let mut key_off = record_off;
        for (item, key_size) in items.iter_mut().zip(key_sizes) {
            item.key = data[key_off..key_off + key_size].to_vec();
            key_off += key_size;
        }

        InternalNode { parent, items }
    }

    pub fn write(&self, data: &mut [u8]) {
        assert!(self.encoded_size() <= data.len(), "internal node write overflow");
        data[0..4].copy_from_slice(&(self.items.len() as i32).to_le_bytes());
        data[4..12].copy_from_slice(&self.parent.to_le_bytes());

        let mut record_off = 12;
        for item in &self.items {
            data[record_off..record_off + 4].copy_from_slice(&(item.key.len() as i32).to_le_bytes());
            data[record_off + 4..record_off + 12].copy_from_slice(&item.child.to_le_bytes());
            record_off += 12;
        }

        let mut key_off = record_off;
        for item in &self.items {
            data[key_off..key_off + item.key.len()].copy_from_slice(&item.key);
            key_off += item.key.len();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::config::{PAGE_HEADER_SIZE, PAGE_SIZE};

    #[test]
    fn write_then_read_round_trips() {
        let mut node = InternalNode::new(-1);
        node.insert_leftmost(10);
        node.insert(b"m", 20);
        node.insert(b"z", 30);

        let mut buf = vec![0u8; PAGE_SIZE - PAGE_HEADER_SIZE];
        node.write(&mut buf);
        let decoded = InternalNode::read(&buf);
        assert_eq!(decoded, node);
    }

    #[test]
    fn child_descends_correctly_around_sentinel() {
        let mut node = InternalNode::new(-1);
        node.insert_leftmost(1);
        node.insert(b"m", 2);
        node.insert(b"t", 3);

        assert_eq!(node.child(b"a"), 1);
        assert_eq!(node.child(b"m"), 2);
        assert_eq!(node.child(b"n"), 2);
        assert_eq!(node.child(b"t"), 3);
        assert_eq!(node.child(b"zzz"), 3);
    }

    #[test]
    fn insert_maintains_sorted_order() {
        use rand::Rng;
        let mut node = InternalNode::new(-1);
        node.insert_leftmost(0);
        let mut rng = rand::thread_rng();
        let mut expected = Vec::new();
        for i in 0..2000i64 {
            let k = rng.gen::<u8>();
            node.insert(&[k], i);
            expected.push(k);
        }
        expected.sort();
        for (i, k) in expected.iter().enumerate() {
            assert_eq!(node.key(i + 1), &[*k]);
        }
    }

    #[test]
    fn remove_by_key_preserves_order() {
        let mut node = InternalNode::new(-1);
        node.insert_leftmost(0);
        node.insert(b"a", 1);
        node.insert(b"b", 2);
        node.insert(b"c", 3);
        assert!(node.remove(b"b"));
        assert!(!node.remove(b"b"));
        assert_eq!(node.key(1), b"a");
        assert_eq!(node.key(2), b"c");
        assert_eq!(node.len(), 3);
    }

    #[test]
    fn move_half_to_blanks_new_sentinel() {
        let mut node = InternalNode::new(-1);
        node.insert_leftmost(0);
        for (i, k) in [b"a", b"b", b"c", b"d", b"e"].into_iter().enumerate() {
            node.insert(k, (i + 1) as i64);
        }
        let before_mid_key = node.key(node.len() / 2).to_vec();
        let mut new_node = InternalNode::new(-1);
        let separator = node.move_half_to(&mut new_node);
        assert!(new_node.key(0).is_empty());
        assert_eq!(separator, before_mid_key);
        assert_eq!(node.len() + new_node.len(), 6);
    }
}
