//! Frame descriptors: per-frame metadata tracked by the buffer manager.

use std::cell::RefCell;
use std::rc::Rc;

use crate::pager::{PageFile, PageId};

/// A reference-counted handle to an open page file. The buffer manager
/// never takes ownership of a page file outright -- several indexes could,
/// in principle, share one buffer pool -- so frames key on a handle rather
/// than embedding the file itself.
pub type FileHandle = Rc<RefCell<PageFile>>;

/// Per-frame descriptor. If `valid` is `false`, every other field is
/// meaningless and must not be read.
#[derive(Clone)]
pub struct FrameDescriptor {
    pub owner: Option<FileHandle>,
    pub page_no: PageId,
    pub valid: bool,
    pub dirty: bool,
    pub refbit: bool,
    pub pin_count: u32,
}

impl FrameDescriptor {
    pub fn empty() -> Self {
        FrameDescriptor {
            owner: None,
            page_no: 0,
            valid: false,
            dirty: false,
            refbit: false,
            pin_count: 0,
        }
    }

    /// Clear the descriptor back to its invalid state. Called once a
    /// frame's previous occupant has been evicted or disposed.
    pub fn clear(&mut self) {
        *self = FrameDescriptor::empty();
    }

    /// Install a new occupant into a just-cleared descriptor.
    pub fn set(&mut self, owner: FileHandle, page_no: PageId) {
        self.owner = Some(owner);
        self.page_no = page_no;
        self.valid = true;
        self.dirty = false;
        self.refbit = true;
        self.pin_count = 1;
    }

    /// Identity comparison for the owning file: two handles are the same
    /// file iff they point at the same `PageFile`.
    pub fn owned_by(&self, file: &FileHandle) -> bool {
        match &self.owner {
            Some(owner) => Rc::ptr_eq(owner, file),
            None => false,
        }
    }
}
