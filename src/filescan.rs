//! File-scan: the external collaborator used to bulk-load a fresh index
//! from a relation's records.
//!
//! The real file-scan subsystem -- iterating a relation's own page-based
//! storage -- is out of scope here and specified only at its interface: it
//! yields `(RecordId, record bytes)` pairs in some order. [`VecRecordSource`]
//! is a minimal in-memory stand-in implementing that interface, used both
//! by tests and by [`crate::btree::BTreeIndex::create`] when seeding an
//! index from scratch.

use crate::record::RecordId;

/// A source of a relation's records, used to seed a fresh index.
pub trait RecordSource {
    /// Return the next `(record id, raw record bytes)` pair, or `None`
    /// once every record has been produced.
    fn next_record(&mut self) -> Option<(RecordId, Vec<u8>)>;
}

/// A [`RecordSource`] backed by an in-memory vector of records.
pub struct VecRecordSource {
    records: std::vec::IntoIter<(RecordId, Vec<u8>)>,
}

impl VecRecordSource {
    pub fn new(records: Vec<(RecordId, Vec<u8>)>) -> Self {
        VecRecordSource {
            records: records.into_iter(),
        }
    }
}

impl RecordSource for VecRecordSource {
    fn next_record(&mut self) -> Option<(RecordId, Vec<u8>)> {
        self.records.next()
    }
}

/// A [`RecordSource`] that yields no records, used when opening an
/// existing index (which must not be reseeded).
pub struct EmptyRecordSource;

impl RecordSource for EmptyRecordSource {
    fn next_record(&mut self) -> Option<(RecordId, Vec<u8>)> {
        None
    }
}
