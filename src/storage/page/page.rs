use std::sync::Arc;

use parking_lot::{MappedRwLockReadGuard, MappedRwLockWriteGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::common::config::{PageId, PageType, INVALID_PAGE_ID, PAGE_HEADER_SIZE, PAGE_SIZE};

/// A frame is the basic unit of buffer-pool caching: a fixed `PAGE_SIZE`
/// byte buffer plus the book-keeping the buffer pool needs (pin count,
/// dirty flag, which page id currently lives here).
#[derive(Debug, Clone)]
pub struct Frame(Arc<RwLock<FrameInner>>);

#[derive(Debug)]
struct FrameInner {
    data: [u8; PAGE_SIZE],
    page_id: PageId,
    pin_count: usize,
    is_dirty: bool,
}

impl Frame {
    /// Constructs a frame with zeroed data and no backing page id.
    pub fn new() -> Frame {
        let inner = FrameInner {
            data: [0; PAGE_SIZE],
            page_id: INVALID_PAGE_ID,
            pin_count: 0,
            is_dirty: false,
        };
        Frame(Arc::new(RwLock::new(inner)))
    }

    /// Zeroes the frame and clears its bookkeeping, ready to be repurposed
    /// for a different page id.
    pub fn reset(&self) {
        let mut inner = self.0.write();
        inner.data.fill(0);
        inner.page_id = INVALID_PAGE_ID;
        inner.pin_count = 0;
        inner.is_dirty = false;
    }

    /// The full `PAGE_SIZE` byte buffer, header included.
    pub fn raw(&self) -> MappedRwLockReadGuard<'_, [u8; PAGE_SIZE]> {
        RwLockReadGuard::map(self.0.read(), |i| &i.data)
    }

    pub fn raw_mut(&self) -> MappedRwLockWriteGuard<'_, [u8; PAGE_SIZE]> {
        RwLockWriteGuard::map(self.0.write(), |i| &mut i.data)
    }

    /// Bytes past the 12-byte header: where node codecs read and write.
    pub fn data(&self) -> MappedRwLockReadGuard<'_, [u8]> {
        RwLockReadGuard::map(self.0.read(), |i| &i.data[PAGE_HEADER_SIZE..])
    }

    pub fn data_mut(&self) -> MappedRwLockWriteGuard<'_, [u8]> {
        RwLockWriteGuard::map(self.0.write(), |i| &mut i.data[PAGE_HEADER_SIZE..])
    }

    pub fn page_id(&self) -> PageId {
        self.0.read().page_id
    }

    pub fn set_page_id(&self, page_id: PageId) {
        self.0.write().page_id = page_id;
    }

    pub fn pin_count(&self) -> usize {
        self.0.read().pin_count
    }

    pub fn pin(&self) {
        self.0.write().pin_count += 1;
    }

    /// Decrements the pin count and returns whether it reached zero.
    /// A no-op (returns `false`) if already at zero.
    pub fn unpin(&self) -> bool {
        let mut inner = self.0.write();
        if inner.pin_count == 0 {
            return false;
        }
        inner.pin_count -= 1;
        inner.pin_count == 0
    }

    pub fn is_dirty(&self) -> bool {
        self.0.read().is_dirty
    }

    pub fn set_dirty(&self, dirty: bool) {
        self.0.write().is_dirty = dirty;
    }

    /// Reads the 12-byte page header: stored id and page type.
    pub fn read_header(&self) -> (PageId, PageType) {
        let inner = self.0.read();
        let id = PageId::from_le_bytes(inner.data[0..8].try_into().unwrap());
        let ty = i32::from_le_bytes(inner.data[8..12].try_into().unwrap());
        (id, PageType::from_i32(ty))
    }

    /// Writes the 12-byte page header.
    pub fn write_header(&self, id: PageId, page_type: PageType) {
        let mut inner = self.0.write();
        inner.data[0..8].copy_from_slice(&id.to_le_bytes());
        inner.data[8..12].copy_from_slice(&(page_type as i32).to_le_bytes());
    }
}

impl Default for Frame {
    fn default() -> Self {
        Self::new()
    }
}
