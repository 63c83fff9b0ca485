//! The page file: the lowest-level storage abstraction.
//!
//! A [`PageFile`] views a file on disk as a flat array of fixed-size
//! [`PAGE_SIZE`]-byte pages, numbered from `1` (page `0` is the reserved
//! null/sentinel page number used throughout the engine -- see the
//! B+-tree's `rightSibPageNo` and page-pointer fields). It knows nothing
//! about the *contents* of a page; the buffer manager and the B+-tree build
//! their own structure on top of the raw bytes it hands back.
//!
//! This is the "Page File" external collaborator of the design: allocate,
//! read, write, delete, existence check. Everything above this module
//! reaches the file only through the buffer manager.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::{HorizonError, Result};

/// Every page is exactly this many bytes.
pub const PAGE_SIZE: usize = 4096;

/// The file header occupies the first bytes of page `1`... no: of a
/// reserved region at the start of the file, *before* page `1`. Using a
/// dedicated on-disk header (rather than stealing space from page 1) keeps
/// the B+-tree free to treat page 1 as an ordinary page-sized metadata
/// record, per spec.
const HEADER_SIZE: usize = 32;

/// Magic bytes written at the start of every valid page file.
const MAGIC: &[u8; 8] = b"HZNPGF01";

/// A page number. `0` is the reserved null sentinel; real pages start at
/// `1`.
pub type PageId = u32;

/// A byte-addressable, page-granular file.
///
/// Pages are allocated and freed through a singly linked free list stored
/// inline in freed pages (the first four bytes of a freed page hold the
/// previous free-list head, big-endian) so that space is reused before the
/// file is extended.
#[derive(Debug)]
pub struct PageFile {
    file: File,
    path: PathBuf,
    /// One past the highest page number ever handed out.
    next_page_no: PageId,
    /// Head of the free-page list (`0` means empty).
    free_list_head: PageId,
}

impl PageFile {
    /// Return `true` if a page file exists at `path`.
    pub fn exists(path: &Path) -> bool {
        path.exists()
    }

    /// Open an existing page file, or create a new one if `create_new` is
    /// `true` and the file does not exist.
    pub fn open(path: &Path, create_new: bool) -> Result<Self> {
        if create_new {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(true)
                .open(path)?;
            let mut pf = PageFile {
                file,
                path: path.to_path_buf(),
                next_page_no: 1,
                free_list_head: 0,
            };
            pf.flush_header()?;
            Ok(pf)
        } else {
            let file = OpenOptions::new().read(true).write(true).open(path)?;
            let mut pf = PageFile {
                file,
                path: path.to_path_buf(),
                next_page_no: 1,
                free_list_head: 0,
            };
            pf.read_header()?;
            Ok(pf)
        }
    }

    /// The path this page file was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Allocate a fresh page (from the free list if non-empty, else by
    /// extending the file) and return its number. The returned page's
    /// bytes are zeroed.
    pub fn allocate_page(&mut self) -> Result<(PageId, [u8; PAGE_SIZE])> {
        let page_no = if self.free_list_head != 0 {
            let page_no = self.free_list_head;
            let page = self.read_page(page_no)?;
            let next = u32::from_be_bytes([page[0], page[1], page[2], page[3]]);
            self.free_list_head = next;
            self.flush_header()?;
            page_no
        } else {
            let page_no = self.next_page_no;
            self.next_page_no += 1;
            self.flush_header()?;
            page_no
        };

        let blank = [0u8; PAGE_SIZE];
        self.write_page(page_no, &blank)?;
        Ok((page_no, blank))
    }

    /// Read the page numbered `page_no`.
    pub fn read_page(&self, page_no: PageId) -> Result<[u8; PAGE_SIZE]> {
        if page_no == 0 || page_no >= self.next_page_no {
            return Err(HorizonError::PageNotFound(page_no));
        }
        let mut buf = [0u8; PAGE_SIZE];
        let file = &self.file;
        (&*file).seek(SeekFrom::Start(self.offset_of(page_no)))?;
        (&*file).read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Write `data` to the page numbered `page_no`.
    pub fn write_page(&mut self, page_no: PageId, data: &[u8; PAGE_SIZE]) -> Result<()> {
        if page_no == 0 || page_no >= self.next_page_no {
            return Err(HorizonError::PageNotFound(page_no));
        }
        self.file.seek(SeekFrom::Start(self.offset_of(page_no)))?;
        self.file.write_all(data)?;
        Ok(())
    }

    /// Return `page_no` to the free list. Per spec, the reference page
    /// file tolerates being asked to delete a page more than once or a
    /// page it never truly reclaims disk space for; callers (the buffer
    /// manager's `disposePage`, the B+-tree's deferred dispose list) treat
    /// any error here as non-fatal.
    pub fn delete_page(&mut self, page_no: PageId) -> Result<()> {
        if page_no == 0 || page_no >= self.next_page_no {
            return Err(HorizonError::PageNotFound(page_no));
        }
        let mut page = [0u8; PAGE_SIZE];
        page[0..4].copy_from_slice(&self.free_list_head.to_be_bytes());
        self.write_page(page_no, &page)?;
        self.free_list_head = page_no;
        self.flush_header()
    }

    /// Flush the file header and sync to disk.
    pub fn close(mut self) -> Result<()> {
        self.flush_header()?;
        self.file.sync_all()?;
        Ok(())
    }

    fn offset_of(&self, page_no: PageId) -> u64 {
        HEADER_SIZE as u64 + (page_no - 1) as u64 * PAGE_SIZE as u64
    }

    fn flush_header(&mut self) -> Result<()> {
        let mut header = [0u8; HEADER_SIZE];
        header[0..8].copy_from_slice(MAGIC);
        header[8..12].copy_from_slice(&self.next_page_no.to_be_bytes());
        header[12..16].copy_from_slice(&self.free_list_head.to_be_bytes());
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&header)?;
        Ok(())
    }

    fn read_header(&mut self) -> Result<()> {
        let mut header = [0u8; HEADER_SIZE];
        self.file.seek(SeekFrom::Start(0))?;
        self.file.read_exact(&mut header)?;

        if &header[0..8] != MAGIC {
            return Err(HorizonError::CorruptIndexFile(
                "invalid page file magic bytes".into(),
            ));
        }
        self.next_page_no = u32::from_be_bytes([header[8], header[9], header[10], header[11]]);
        self.free_list_head = u32::from_be_bytes([header[12], header[13], header[14], header[15]]);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn new_file() -> (PageFile, NamedTempFile) {
        let tmp = NamedTempFile::new().unwrap();
        let pf = PageFile::open(tmp.path(), true).unwrap();
        (pf, tmp)
    }

    #[test]
    fn allocate_starts_at_one() {
        let (mut pf, _tmp) = new_file();
        let (page_no, data) = pf.allocate_page().unwrap();
        assert_eq!(page_no, 1);
        assert!(data.iter().all(|&b| b == 0));
    }

    #[test]
    fn write_then_read_round_trips() {
        let (mut pf, _tmp) = new_file();
        let (page_no, _) = pf.allocate_page().unwrap();
        let mut data = [0u8; PAGE_SIZE];
        data[0] = 0xAB;
        data[PAGE_SIZE - 1] = 0xCD;
        pf.write_page(page_no, &data).unwrap();
        let back = pf.read_page(page_no).unwrap();
        assert_eq!(back[0], 0xAB);
        assert_eq!(back[PAGE_SIZE - 1], 0xCD);
    }

    #[test]
    fn read_out_of_range_is_page_not_found() {
        let (pf, _tmp) = new_file();
        let err = pf.read_page(99).unwrap_err();
        assert!(matches!(err, HorizonError::PageNotFound(99)));
    }

    #[test]
    fn page_zero_is_never_allocated_or_addressable() {
        let (pf, _tmp) = new_file();
        let err = pf.read_page(0).unwrap_err();
        assert!(matches!(err, HorizonError::PageNotFound(0)));
    }

    #[test]
    fn free_list_recycles_lifo() {
        let (mut pf, _tmp) = new_file();
        let (p1, _) = pf.allocate_page().unwrap();
        let (p2, _) = pf.allocate_page().unwrap();
        let (p3, _) = pf.allocate_page().unwrap();

        pf.delete_page(p1).unwrap();
        pf.delete_page(p2).unwrap();
        pf.delete_page(p3).unwrap();

        assert_eq!(pf.allocate_page().unwrap().0, p3);
        assert_eq!(pf.allocate_page().unwrap().0, p2);
        assert_eq!(pf.allocate_page().unwrap().0, p1);
    }

    #[test]
    fn reopen_preserves_allocation_state() {
        let tmp = NamedTempFile::new().unwrap();
        {
            let mut pf = PageFile::open(tmp.path(), true).unwrap();
            pf.allocate_page().unwrap();
            pf.allocate_page().unwrap();
            pf.close().unwrap();
        }
        let mut pf = PageFile::open(tmp.path(), false).unwrap();
        let (page_no, _) = pf.allocate_page().unwrap();
        assert_eq!(page_no, 3);
    }

    #[test]
    fn exists_reflects_filesystem_state() {
        let tmp = NamedTempFile::new().unwrap();
        std::fs::remove_file(tmp.path()).ok();
        assert!(!PageFile::exists(tmp.path()));
        let pf = PageFile::open(tmp.path(), true).unwrap();
        pf.close().unwrap();
        assert!(PageFile::exists(tmp.path()));
    }
}
