use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};

use log::{debug, error, warn};
use parking_lot::Mutex;

use crate::common::config::{PageId, PAGE_SIZE};
use crate::common::error::{Error, Result};

/// Maps page ids to fixed-size byte ranges in a single on-disk file and
/// hands out fresh page ids. All I/O is serialized behind a mutex so the
/// buffer pool can call this from one logical caller at a time without
/// worrying about interleaved reads and writes.
pub struct DiskManager {
    db_io: Mutex<File>,
    next_page_id: AtomicI64,
}

impl DiskManager {
    /// Opens `path`, creating it if absent. Fails if `path` names an
    /// existing directory.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if path.is_dir() {
            return Err(Error::Path(format!(
                "{} is a directory, not a database file",
                path.display()
            )));
        }

        let db_io = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .or_else(|_| {
                OpenOptions::new()
                    .create(true)
                    .read(true)
                    .write(true)
                    .open(path)
            })?;

        Ok(DiskManager {
            db_io: Mutex::new(db_io),
            next_page_id: AtomicI64::new(1),
        })
    }

    /// Sets the next id `alloc_page` will hand out. Called by the buffer
    /// pool after reading an existing file's meta page, so allocation picks
    /// up where the last session left off.
    pub fn set_next_page_id(&self, next: PageId) {
        self.next_page_id.store(next, Ordering::SeqCst);
    }

    /// Returns the next free page id and advances the counter. Does not
    /// itself touch the file; the caller is responsible for writing
    /// something at that id.
    pub fn alloc_page(&self) -> PageId {
        self.next_page_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Reads page `id` into `dst`, which must be exactly `PAGE_SIZE` bytes.
    /// Fails if `id`'s offset is at or past the current end of the file
    /// (nothing has ever been written there).
    pub fn read_page(&self, id: PageId, dst: &mut [u8]) -> Result<()> {
        assert_eq!(dst.len(), PAGE_SIZE, "read_page buffer must be PAGE_SIZE");
        let offset = id as u64 * PAGE_SIZE as u64;

        let mut db_io = self.db_io.lock();
        let file_len = db_io.metadata()?.len();
        if offset >= file_len {
            warn!("read_page({}): offset {} past end of file ({})", id, offset, file_len);
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("page {id} has never been written"),
            )));
        }

        db_io.seek(SeekFrom::Start(offset))?;
        let read_count = db_io.read(dst)?;
        if read_count < PAGE_SIZE {
            debug!("read_page({}): short read ({} of {} bytes), zero-filling", id, read_count, PAGE_SIZE);
            dst[read_count..].fill(0);
        }
        Ok(())
    }

    /// Writes `src` (exactly `PAGE_SIZE` bytes) at `id`'s offset, extending
    /// the file if needed, and flushes.
    pub fn write_page(&self, id: PageId, src: &[u8]) -> Result<()> {
        assert_eq!(src.len(), PAGE_SIZE, "write_page buffer must be PAGE_SIZE");
        let offset = id as u64 * PAGE_SIZE as u64;

        let mut db_io = self.db_io.lock();
        db_io.seek(SeekFrom::Start(offset))?;
        if let Err(e) = db_io.write_all(src) {
            error!("write_page({}) failed: {}", id, e);
            return Err(Error::Io(e));
        }
        db_io.flush()?;
        Ok(())
    }

    /// Idempotent: flushes any pending OS buffers. Subsequent calls are
    /// cheap no-ops beyond the flush.
    pub fn close(&self) -> Result<()> {
        self.db_io.lock().sync_all()?;
        Ok(())
    }
}
