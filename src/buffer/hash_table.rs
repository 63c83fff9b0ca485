//! The buffer pool's page hash table.
//!
//! Maps `(file, page number) -> frame index` for every valid frame. This is
//! a plain separate-chaining hash table rather than `std::collections::
//! HashMap` so that the bucket count follows the spec's sizing rule
//! (`~1.2 * pool_size`, rounded up to an odd number) instead of whatever
//! growth policy the standard map happens to use.

use crate::buffer::frame::FileHandle;
use crate::pager::PageId;
use std::rc::Rc;

/// Key used to look a page up in the hash table. Two files are the same
/// key iff they are the same `Rc` allocation (pointer identity), matching
/// the "file handle" semantics of the design.
#[derive(Clone)]
struct Key {
    file_ptr: usize,
    page_no: PageId,
    file: FileHandle,
}

impl Key {
    fn new(file: &FileHandle, page_no: PageId) -> Self {
        Key {
            file_ptr: Rc::as_ptr(file) as usize,
            page_no,
            file: Rc::clone(file),
        }
    }

    fn matches(&self, file: &FileHandle, page_no: PageId) -> bool {
        self.page_no == page_no && self.file_ptr == Rc::as_ptr(file) as usize
    }
}

struct Entry {
    key: Key,
    frame_idx: usize,
}

/// A chained-bucket hash table mapping `(file, pageNo)` to a frame index.
pub struct PageHashTable {
    buckets: Vec<Vec<Entry>>,
}

impl PageHashTable {
    /// Create a table sized for roughly `pool_size` resident pages.
    pub fn new(pool_size: usize) -> Self {
        let raw = ((pool_size as f64 * 1.2) as usize) * 2 / 2 + 1;
        let bucket_count = raw.max(1);
        PageHashTable {
            buckets: (0..bucket_count).map(|_| Vec::new()).collect(),
        }
    }

    fn bucket_for(&self, file_ptr: usize, page_no: PageId) -> usize {
        let mut hash = file_ptr as u64;
        hash = hash.wrapping_mul(1_000_003).wrapping_add(page_no as u64);
        (hash as usize) % self.buckets.len()
    }

    /// Look up the frame index holding `(file, pageNo)`, if any.
    pub fn lookup(&self, file: &FileHandle, page_no: PageId) -> Option<usize> {
        let bucket = self.bucket_for(Rc::as_ptr(file) as usize, page_no);
        self.buckets[bucket]
            .iter()
            .find(|e| e.key.matches(file, page_no))
            .map(|e| e.frame_idx)
    }

    /// Insert a new `(file, pageNo) -> frame_idx` mapping. Replaces any
    /// existing entry for the same key.
    pub fn insert(&mut self, file: &FileHandle, page_no: PageId, frame_idx: usize) {
        let bucket = self.bucket_for(Rc::as_ptr(file) as usize, page_no);
        let chain = &mut self.buckets[bucket];
        if let Some(existing) = chain.iter_mut().find(|e| e.key.matches(file, page_no)) {
            existing.frame_idx = frame_idx;
            return;
        }
        chain.push(Entry {
            key: Key::new(file, page_no),
            frame_idx,
        });
    }

    /// Remove the mapping for `(file, pageNo)`, if present.
    pub fn remove(&mut self, file: &FileHandle, page_no: PageId) {
        let bucket = self.bucket_for(Rc::as_ptr(file) as usize, page_no);
        self.buckets[bucket].retain(|e| !e.key.matches(file, page_no));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pager::PageFile;
    use std::cell::RefCell;
    use tempfile::NamedTempFile;

    fn handle() -> (FileHandle, NamedTempFile) {
        let tmp = NamedTempFile::new().unwrap();
        let pf = PageFile::open(tmp.path(), true).unwrap();
        (Rc::new(RefCell::new(pf)), tmp)
    }

    #[test]
    fn insert_then_lookup() {
        let mut table = PageHashTable::new(8);
        let (f, _tmp) = handle();
        table.insert(&f, 3, 5);
        assert_eq!(table.lookup(&f, 3), Some(5));
        assert_eq!(table.lookup(&f, 4), None);
    }

    #[test]
    fn remove_clears_entry() {
        let mut table = PageHashTable::new(8);
        let (f, _tmp) = handle();
        table.insert(&f, 1, 0);
        table.remove(&f, 1);
        assert_eq!(table.lookup(&f, 1), None);
    }

    #[test]
    fn distinct_files_do_not_collide() {
        let mut table = PageHashTable::new(8);
        let (f1, _tmp1) = handle();
        let (f2, _tmp2) = handle();
        table.insert(&f1, 1, 10);
        table.insert(&f2, 1, 20);
        assert_eq!(table.lookup(&f1, 1), Some(10));
        assert_eq!(table.lookup(&f2, 1), Some(20));
    }

    #[test]
    fn insert_overwrites_existing_mapping() {
        let mut table = PageHashTable::new(8);
        let (f, _tmp) = handle();
        table.insert(&f, 1, 10);
        table.insert(&f, 1, 99);
        assert_eq!(table.lookup(&f, 1), Some(99));
    }
}
