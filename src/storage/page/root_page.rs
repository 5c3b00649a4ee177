//! Page 1: the tree's durable root pointer. The original design this crate
//! grew out of never persisted `root` across restarts; this page closes
//! that gap.

use crate::common::config::{PageId, PageType, INVALID_PAGE_ID, PAGE_HEADER_SIZE};
use crate::storage::page::Frame;

const ROOT_OFFSET: usize = PAGE_HEADER_SIZE; // 12

#[derive(Debug, Clone, Copy)]
pub struct RootPage {
    pub root: PageId,
}

impl RootPage {
    pub fn fresh() -> Self {
        RootPage {
            root: INVALID_PAGE_ID,
        }
    }

    pub fn read(frame: &Frame) -> Self {
        let raw = frame.raw();
        let root = PageId::from_le_bytes(raw[ROOT_OFFSET..ROOT_OFFSET + 8].try_into().unwrap());
        RootPage { root }
    }

    pub fn write(&self, frame: &Frame) {
        frame.write_header(1, PageType::Unset);
        let mut raw = frame.raw_mut();
        raw[ROOT_OFFSET..ROOT_OFFSET + 8].copy_from_slice(&self.root.to_le_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let frame = Frame::new();
        RootPage { root: 42 }.write(&frame);
        assert_eq!(RootPage::read(&frame).root, 42);
    }

    #[test]
    fn fresh_is_invalid() {
        assert_eq!(RootPage::fresh().root, INVALID_PAGE_ID);
    }
}
