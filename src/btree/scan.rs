//! Range-scan state machine.
//!
//! A [`BTreeIndex`](crate::btree::index::BTreeIndex) supports one scan at a
//! time. `start_scan` moves Idle -> Scanning; `scan_next` only operates
//! while Scanning; `end_scan` moves Scanning -> Idle. Starting a new scan
//! while one is already in progress replaces it, releasing the previous
//! scan's pinned page first.

use crate::btree::key::Key;
use crate::pager::PageId;

/// Comparison operator for a scan bound. Only `Gt`/`Gte` are valid as the
/// low bound and only `Lt`/`Lte` as the high bound; any other assignment
/// is rejected by `start_scan` with `BadOpcodes`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Lt,
    Lte,
    Gte,
    Gt,
}

/// In-progress scan state. `current_page == 0` is the sentinel for "no
/// more leaves" (the scan found nothing, or has run off the end of the
/// sibling chain); `current_frame` is only meaningful while
/// `current_page != 0`, and names the buffer frame the page is pinned in
/// so repeated `scan_next` calls don't re-pin it on every call.
pub struct ScanState<K: Key> {
    pub current_page: PageId,
    pub current_frame: usize,
    pub next_entry: usize,
    pub high_val: K,
    pub high_op: Operator,
}
