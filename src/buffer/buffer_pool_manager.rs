use std::collections::HashMap;
use std::path::Path;

use log::debug;
use parking_lot::Mutex;

use crate::buffer::replacer::{new_replacer, Replacer, ReplacerPolicy};
use crate::common::config::{FrameId, PageId, PageType, INVALID_PAGE_ID, META_PAGE_ID, PAGE_SIZE, ROOT_PAGE_ID};
use crate::common::error::Result;
use crate::storage::disk::DiskManager;
use crate::storage::page::{Frame, MetaPage, RootPage};

/// Caches a bounded number of pages from a single on-disk file, pinning
/// pages on behalf of callers and selecting eviction victims through a
/// pluggable [`Replacer`].
///
/// Pages 0 (the meta page) and 1 (the root register) are reserved and
/// always resident as of `open`; ordinary node pages start at id 2.
pub struct BufferPoolManager {
    frames: Vec<Frame>,
    page_table: Mutex<HashMap<PageId, FrameId>>,
    replacer: Mutex<Box<dyn Replacer + Send>>,
    disk_manager: DiskManager,
    meta: Mutex<MetaPage>,
    meta_dirty: Mutex<bool>,
}

impl BufferPoolManager {
    pub fn open<P: AsRef<Path>>(path: P, pool_size: usize) -> Result<Self> {
        Self::open_with_replacer(path, pool_size, ReplacerPolicy::Lru)
    }

    pub fn open_with_replacer<P: AsRef<Path>>(
        path: P,
        pool_size: usize,
        policy: ReplacerPolicy,
    ) -> Result<Self> {
        let path = path.as_ref();
        let existed = path.exists() && path.metadata().map(|m| m.len() > 0).unwrap_or(false);
        let disk_manager = DiskManager::open(path)?;

        let frames: Vec<Frame> = (0..pool_size).map(|_| Frame::new()).collect();
        let mut replacer = new_replacer(policy, pool_size);
        for i in 0..pool_size {
            replacer.put(i);
        }

        let bpm = BufferPoolManager {
            frames,
            page_table: Mutex::new(HashMap::new()),
            replacer: Mutex::new(replacer),
            disk_manager,
            meta: Mutex::new(MetaPage::fresh()),
            meta_dirty: Mutex::new(false),
        };

        if existed {
            let scratch = bpm.fetch_internal(META_PAGE_ID, false)?.expect("pool sized zero");
            let meta = MetaPage::read(&scratch);
            bpm.disk_manager.set_next_page_id(meta.page_count as PageId);
            *bpm.meta.lock() = meta;
            bpm.unpin(META_PAGE_ID, false);
        } else {
            let mut meta = MetaPage::fresh();
            meta.page_count = 2; // ids 0 (meta) and 1 (root register) both reserved up front
            bpm.disk_manager.set_next_page_id(2);
            *bpm.meta.lock() = meta.clone();

            let meta_frame = bpm.fetch_internal(META_PAGE_ID, true)?.expect("pool sized zero");
            meta.write(&meta_frame);
            bpm.disk_manager.write_page(META_PAGE_ID, &meta_frame.raw()[..])?;
            meta_frame.set_dirty(false);
            bpm.unpin(META_PAGE_ID, false);

            let root_frame = bpm.fetch_internal(ROOT_PAGE_ID, true)?.expect("pool sized zero");
            RootPage::fresh().write(&root_frame);
            bpm.disk_manager.write_page(ROOT_PAGE_ID, &root_frame.raw()[..])?;
            root_frame.set_dirty(false);
            bpm.unpin(ROOT_PAGE_ID, false);
        }

        Ok(bpm)
    }

    pub fn pool_size(&self) -> usize {
        self.frames.len()
    }

    /// Allocates a fresh page (reusing a freed id if one is available),
    /// pins it, and returns its frame. `Ok(None)` means every frame is
    /// currently pinned and no page could be materialized.
    pub fn new_page(&self, page_type: PageType) -> Result<Option<Frame>> {
        let id = {
            let mut meta = self.meta.lock();
            match meta.pop_free_page() {
                Some(freed) => freed,
                None => {
                    let id = self.disk_manager.alloc_page();
                    meta.page_count += 1;
                    id
                }
            }
        };
        *self.meta_dirty.lock() = true;

        let frame = match self.fetch_internal(id, true)? {
            Some(f) => f,
            None => return Ok(None),
        };
        frame.write_header(id, page_type);
        frame.set_dirty(true);
        debug!("new_page: allocated page {} as {:?}", id, page_type);
        Ok(Some(frame))
    }

    /// Fetches an existing page, pinning it.
    pub fn fetch_page(&self, id: PageId) -> Result<Option<Frame>> {
        self.fetch_internal(id, false)
    }

    fn fetch_internal(&self, id: PageId, is_new: bool) -> Result<Option<Frame>> {
        if let Some(&frame_id) = self.page_table.lock().get(&id) {
            let frame = self.frames[frame_id].clone();
            frame.pin();
            self.replacer.lock().remove(frame_id);
            return Ok(Some(frame));
        }

        let frame_id = match self.replacer.lock().victim() {
            Some(f) => f,
            None => return Ok(None),
        };
        let frame = self.frames[frame_id].clone();
        let old_id = frame.page_id();

        if frame.is_dirty() {
            self.flush_frame(old_id, &frame)?;
        }

        {
            let mut table = self.page_table.lock();
            if old_id != INVALID_PAGE_ID {
                table.remove(&old_id);
            }
            table.insert(id, frame_id);
        }

        frame.reset();
        frame.set_page_id(id);
        if !is_new {
            let mut raw = frame.raw_mut();
            self.disk_manager.read_page(id, &mut raw[..])?;
        }
        frame.pin();
        Ok(Some(frame))
    }

    /// Increments the pin count of an already-resident page, removing it
    /// from eviction candidacy.
    pub fn pin(&self, id: PageId) {
        if let Some(&frame_id) = self.page_table.lock().get(&id) {
            self.frames[frame_id].pin();
            self.replacer.lock().remove(frame_id);
        }
    }

    /// Releases one pin on `id`. Returns `false` if `id` isn't resident or
    /// has no outstanding pins. When the pin count reaches zero the frame
    /// becomes an eviction candidate again.
    pub fn unpin(&self, id: PageId, is_dirty: bool) -> bool {
        let frame_id = match self.page_table.lock().get(&id) {
            Some(&f) => f,
            None => return false,
        };
        let frame = &self.frames[frame_id];
        if frame.pin_count() == 0 {
            return false;
        }
        if is_dirty {
            frame.set_dirty(true);
        }
        let reached_zero = frame.unpin();
        if reached_zero {
            self.replacer.lock().put(frame_id);
        }
        true
    }

    fn flush_frame(&self, id: PageId, frame: &Frame) -> Result<()> {
        {
            let raw = frame.raw();
            self.disk_manager.write_page(id, &raw[..])?;
        }
        frame.set_dirty(false);
        Ok(())
    }

    pub fn flush_page(&self, id: PageId) -> Result<bool> {
        let frame_id = match self.page_table.lock().get(&id) {
            Some(&f) => f,
            None => return Ok(false),
        };
        self.flush_frame(id, &self.frames[frame_id])?;
        Ok(true)
    }

    pub fn flush_all(&self) -> Result<()> {
        let table = self.page_table.lock().clone();
        for (id, frame_id) in table {
            let frame = &self.frames[frame_id];
            if frame.is_dirty() {
                self.flush_frame(id, frame)?;
            }
        }
        if *self.meta_dirty.lock() {
            self.write_meta()?;
        }
        Ok(())
    }

    fn write_meta(&self) -> Result<()> {
        let meta = self.meta.lock().clone();
        let frame_opt = self.page_table.lock().get(&META_PAGE_ID).map(|&f| self.frames[f].clone());
        if let Some(frame) = frame_opt {
            meta.write(&frame);
            self.disk_manager.write_page(META_PAGE_ID, &frame.raw()[..])?;
        } else {
            let scratch = Frame::new();
            meta.write(&scratch);
            self.disk_manager.write_page(META_PAGE_ID, &scratch.raw()[..])?;
        }
        *self.meta_dirty.lock() = false;
        Ok(())
    }

    pub fn write_root(&self, root: PageId) -> Result<()> {
        if let Some(&frame_id) = self.page_table.lock().get(&ROOT_PAGE_ID) {
            let frame = &self.frames[frame_id];
            RootPage { root }.write(frame);
            frame.set_dirty(true);
            return self.flush_frame(ROOT_PAGE_ID, frame);
        }
        let scratch = Frame::new();
        RootPage { root }.write(&scratch);
        self.disk_manager.write_page(ROOT_PAGE_ID, &scratch.raw()[..])
    }

    pub fn read_root(&self) -> Result<PageId> {
        if let Some(&frame_id) = self.page_table.lock().get(&ROOT_PAGE_ID) {
            return Ok(RootPage::read(&self.frames[frame_id]).root);
        }
        let scratch = Frame::new();
        {
            let mut raw = scratch.raw_mut();
            self.disk_manager.read_page(ROOT_PAGE_ID, &mut raw[..])?;
        }
        Ok(RootPage::read(&scratch).root)
    }

    pub fn push_free_page(&self, id: PageId) {
        let mut meta = self.meta.lock();
        meta.push_free_page(id);
        *self.meta_dirty.lock() = true;
    }

    pub fn close(&self) -> Result<()> {
        self.flush_all()?;
        self.disk_manager.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::distributions::{Distribution, Uniform};
    use tempdir::TempDir;

    #[test]
    fn new_page_then_fetch_round_trips() {
        let dir = TempDir::new("bpm").unwrap();
        let bpm = BufferPoolManager::open(dir.path().join("test.db"), 4).unwrap();

        let frame = bpm.new_page(PageType::Leaf).unwrap().unwrap();
        let id = frame.page_id();
        frame.data_mut()[..5].copy_from_slice(b"hello");
        bpm.unpin(id, true);

        let fetched = bpm.fetch_page(id).unwrap().unwrap();
        assert_eq!(&fetched.data()[..5], b"hello");
        bpm.unpin(id, false);
    }

    #[test]
    fn pins_block_eviction_until_released() {
        let dir = TempDir::new("bpm").unwrap();
        let bpm = BufferPoolManager::open(dir.path().join("test.db"), 1).unwrap();
        let frame = bpm.new_page(PageType::Leaf).unwrap().unwrap();
        let id = frame.page_id();
        // still pinned: a second allocation must find no evictable frame
        assert!(bpm.new_page(PageType::Leaf).unwrap().is_none());
        bpm.unpin(id, false);
        assert!(bpm.new_page(PageType::Leaf).unwrap().is_some());
    }

    #[test]
    fn persists_across_reopen() {
        let dir = TempDir::new("bpm").unwrap();
        let path = dir.path().join("test.db");
        let mut ids = Vec::new();
        {
            let bpm = BufferPoolManager::open(&path, 32).unwrap();
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
        assert_eq!(std::fs::metadata(&path).unwrap().len(), (22 * PAGE_SIZE) as u64);

        let bpm = BufferPoolManager::open(&path, 1).unwrap();
        for (id, text) in ids {
            let frame = bpm.fetch_page(id).unwrap().unwrap();
            assert_eq!(&frame.data()[..text.len()], text.as_bytes());
            bpm.unpin(id, false);
        }
    }

    #[test]
    fn binary_data_round_trips_through_eviction() {
        let dir = TempDir::new("bpm").unwrap();
        let bpm = BufferPoolManager::open(dir.path().join("test.db"), 2).unwrap();
        let dist = Uniform::from(0..=255u8);
        let mut rng = rand::thread_rng();

        let mut expected = Vec::new();
        for _ in 0..10 {
            let frame = bpm.new_page(PageType::Leaf).unwrap().unwrap();
            let id = frame.page_id();
            let bytes: Vec<u8> = (0..64).map(|_| dist.sample(&mut rng)).collect();
            frame.data_mut()[..bytes.len()].copy_from_slice(&bytes);
            bpm.unpin(id, true);
            expected.push((id, bytes));
        }

        for (id, bytes) in expected {
            let frame = bpm.fetch_page(id).unwrap().unwrap();
            assert_eq!(&frame.data()[..bytes.len()], &bytes[..]);
            bpm.unpin(id, false);
        }
    }
}
