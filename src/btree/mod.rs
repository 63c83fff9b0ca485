//! # B+-Tree Index
//!
//! A disk-resident B+-tree keyed by a single generic [`key::Key`]
//! implementation (`i32`, `f64`, or the fixed-width [`key::StringKey`]).
//! Every page access is mediated by a [`crate::buffer::BufferManager`];
//! the tree itself never touches the page file directly.
//!
//! - [`node`] -- on-page layout for leaf and internal nodes.
//! - [`key`] -- the generic key trait and its concrete implementations.
//! - [`scan`] -- the range-scan state machine.
//! - [`index`] -- [`index::BTreeIndex`], tying the above into insert,
//!   delete, scan, and validation.

pub mod index;
pub mod key;
pub mod node;
pub mod scan;

pub use index::BTreeIndex;
pub use key::{Key, KeyTypeTag, StringKey};
pub use scan::Operator;
