//! Record identifiers shared by the B+-tree and the (external) file-scan
//! helper that seeds an index from a relation's records.

/// Opaque identifier of a tuple in a relation file: a page number and a
/// slot number within that page. The storage core never interprets these
/// fields -- it only stores and returns them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordId {
    pub page_no: u32,
    pub slot_no: u32,
}

impl RecordId {
    pub fn new(page_no: u32, slot_no: u32) -> Self {
        RecordId { page_no, slot_no }
    }
}
