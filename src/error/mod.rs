//! Unified error handling for the storage core.
//!
//! [`HorizonError`] is the single error type propagated by the page file,
//! the buffer manager, and the B+-tree index. A [`Result`] alias is
//! re-exported so callers can write `Result<T>` instead of spelling out
//! `std::result::Result<T, HorizonError>`.
//!
//! Two spec-level failure kinds are deliberately absent from this enum:
//! a key not found during deletion and a failed structural validation are
//! both locally recoverable (unwind pins, return `false`) rather than
//! propagated, so `delete_entry` and `validate` return `Result<bool>` /
//! `bool` instead of raising an error variant for them.

use std::fmt;
use std::io;

use crate::pager::PageId;

/// The canonical error type for all storage-core operations.
#[derive(Debug)]
pub enum HorizonError {
    /// An I/O error originating from the page file's filesystem access.
    Io(io::Error),

    /// The index file's metadata page is missing, truncated, or has an
    /// unrecognised key-type tag.
    CorruptIndexFile(String),

    /// Every frame in the buffer pool is pinned; `allocBuf` found no
    /// victim during a full sweep.
    BufferExceeded,

    /// `unPinPage` was called on a page whose pin count is already zero.
    PageNotPinned { page_no: PageId },

    /// `flushFile` was attempted while a page of the file was still
    /// pinned.
    PagePinned { page_no: PageId },

    /// `flushFile` found a frame claimed by the file that is not valid.
    BadBuffer { frame: usize },

    /// The requested page number does not exist in the page file.
    PageNotFound(PageId),

    /// `startScan` was called with an opcode combination other than
    /// `{GT,GTE} x {LT,LTE}`.
    BadOpcodes,

    /// `startScan` was called with `highVal < lowVal`.
    BadScanrange,

    /// `scanNext` or `endScan` was called without an active scan.
    ScanNotInitialized,

    /// `scanNext` has passed the high bound or the last leaf.
    IndexScanCompleted,

    /// A B+-tree structural invariant was violated during validation.
    ValidationFailed(String),

    /// An internal invariant was violated; indicates a bug in the engine.
    Internal(String),
}

impl fmt::Display for HorizonError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HorizonError::Io(err) => write!(f, "I/O error: {err}"),
            HorizonError::CorruptIndexFile(msg) => write!(f, "corrupt index file: {msg}"),
            HorizonError::BufferExceeded => {
                write!(f, "buffer pool exceeded: every frame is pinned")
            }
            HorizonError::PageNotPinned { page_no } => {
                write!(f, "page {page_no} is not pinned")
            }
            HorizonError::PagePinned { page_no } => {
                write!(f, "cannot flush: page {page_no} is still pinned")
            }
            HorizonError::BadBuffer { frame } => {
                write!(f, "frame {frame} claimed by file is not valid")
            }
            HorizonError::PageNotFound(id) => write!(f, "page not found: {id}"),
            HorizonError::BadOpcodes => write!(
                f,
                "bad scan opcodes: low must be GT/GTE, high must be LT/LTE"
            ),
            HorizonError::BadScanrange => write!(f, "bad scan range: highVal < lowVal"),
            HorizonError::ScanNotInitialized => write!(f, "no scan is currently in progress"),
            HorizonError::IndexScanCompleted => write!(f, "scan has no more entries"),
            HorizonError::ValidationFailed(msg) => write!(f, "validation failed: {msg}"),
            HorizonError::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for HorizonError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            HorizonError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for HorizonError {
    fn from(err: io::Error) -> Self {
        HorizonError::Io(err)
    }
}

/// A specialised [`Result`] type for storage-core operations.
pub type Result<T> = std::result::Result<T, HorizonError>;
