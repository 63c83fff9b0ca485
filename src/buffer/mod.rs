//! # Buffer Pool
//!
//! The buffer pool is the in-memory page cache that sits between the
//! B+-tree and the page file. Every page access in the index goes through
//! here; the tree never touches the page file directly. See
//! [`manager::BufferManager`] for the clock-replacement policy and the
//! pin/unpin/alloc/dispose/flush operations it implements.

pub mod frame;
pub mod hash_table;
pub mod manager;

pub use frame::FileHandle;
pub use manager::BufferManager;
