//! # Horizon Storage
//!
//! A disk-resident storage core: a clock-replacement buffer manager over
//! fixed-size pages, and a generic B+-tree index built on top of it.
//!
//! - [`pager`] -- the page file, the lowest-level flat-file page store.
//! - [`buffer`] -- the clock-replacement buffer manager sitting between
//!   the B+-tree and the page file.
//! - [`btree`] -- the B+-tree index itself: [`btree::BTreeIndex`], its
//!   [`btree::Key`] trait, and the range-scan [`btree::Operator`].
//! - [`record`] / [`filescan`] -- the record-id type and the external
//!   record-source interface used to seed a fresh index.

pub mod btree;
pub mod buffer;
pub mod error;
pub mod filescan;
pub mod pager;
pub mod record;

pub use btree::{BTreeIndex, Key, KeyTypeTag, Operator, StringKey};
pub use buffer::BufferManager;
pub use error::{HorizonError, Result};
pub use pager::PageId;
pub use record::RecordId;
