//! On-page layouts for B+-tree leaf and internal nodes.
//!
//! Rather than reinterpreting a page's raw bytes as a node struct (the
//! reference design's raw-memory cast), nodes are decoded into an owned,
//! typed in-memory representation, mutated there, and re-encoded back into
//! the page buffer. This keeps every byte-offset computation in one place
//! and rules out the undefined-behavior reinterpretation the original
//! relied on.

use crate::btree::key::Key;
use crate::pager::PAGE_SIZE;
use crate::record::RecordId;

/// Bytes of leaf-page header: `usage: u32` + `right_sib: u32`.
const LEAF_HEADER_SIZE: usize = 8;
/// Bytes of internal-page header: `usage: u32`.
const NODE_HEADER_SIZE: usize = 4;
/// Bytes of an encoded `RecordId`.
const RID_SIZE: usize = 8;
/// Bytes of an encoded `PageId`.
const PAGE_ID_SIZE: usize = 4;

/// Maximum number of `(RecordId, Key)` entries a leaf page can hold.
pub fn leaf_occupancy<K: Key>() -> usize {
    (PAGE_SIZE - LEAF_HEADER_SIZE) / (RID_SIZE + K::ENCODED_SIZE)
}

/// Maximum number of keys an internal page can hold (it carries
/// `usage + 1` page pointers for `usage` keys).
pub fn node_occupancy<K: Key>() -> usize {
    (PAGE_SIZE - NODE_HEADER_SIZE) / (PAGE_ID_SIZE + K::ENCODED_SIZE) - 1
}

fn encode_rid(buf: &mut [u8], rid: RecordId) {
    buf[0..4].copy_from_slice(&rid.page_no.to_be_bytes());
    buf[4..8].copy_from_slice(&rid.slot_no.to_be_bytes());
}

fn decode_rid(buf: &[u8]) -> RecordId {
    RecordId::new(
        u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]),
        u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
    )
}

/// A leaf node: `usage` `(RecordId, Key)` pairs sorted ascending by key,
/// plus the page number of the next leaf in key order (`0` if none).
#[derive(Debug, Clone)]
pub struct LeafNode<K: Key> {
    pub entries: Vec<(RecordId, K)>,
    pub right_sib: u32,
}

impl<K: Key> LeafNode<K> {
    pub fn new_empty() -> Self {
        LeafNode {
            entries: Vec::new(),
            right_sib: 0,
        }
    }

    pub fn usage(&self) -> usize {
        self.entries.len()
    }

    pub fn decode(buf: &[u8; PAGE_SIZE]) -> Self {
        let usage = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        let right_sib = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);

        let entry_size = RID_SIZE + K::ENCODED_SIZE;
        let mut entries = Vec::with_capacity(usage);
        for i in 0..usage {
            let off = LEAF_HEADER_SIZE + i * entry_size;
            let rid = decode_rid(&buf[off..off + RID_SIZE]);
            let key = K::decode(&buf[off + RID_SIZE..off + entry_size]);
            entries.push((rid, key));
        }
        LeafNode { entries, right_sib }
    }

    pub fn encode(&self, buf: &mut [u8; PAGE_SIZE]) {
        buf.fill(0);
        buf[0..4].copy_from_slice(&(self.entries.len() as u32).to_be_bytes());
        buf[4..8].copy_from_slice(&self.right_sib.to_be_bytes());

        let entry_size = RID_SIZE + K::ENCODED_SIZE;
        for (i, (rid, key)) in self.entries.iter().enumerate() {
            let off = LEAF_HEADER_SIZE + i * entry_size;
            encode_rid(&mut buf[off..off + RID_SIZE], *rid);
            key.encode(&mut buf[off + RID_SIZE..off + entry_size]);
        }
    }

    /// Find the sorted insertion position for `key`: the first index
    /// whose current key is strictly greater than `key`, or
    /// `entries.len()` if none. New entries with a key equal to an
    /// existing one are appended after the existing run, matching the
    /// reference design's stable-insert behavior.
    pub fn insert_position(&self, key: &K) -> usize {
        self.entries
            .iter()
            .position(|(_, k)| key.lt(k))
            .unwrap_or(self.entries.len())
    }
}

/// An internal node interpreted as `usage` keys between `usage + 1` page
/// pointers: `pointers[i]` is the subtree to the left of `keys[i]` for
/// `i < usage`, and `pointers[usage]` is the rightmost subtree.
#[derive(Debug, Clone)]
pub struct InternalNode<K: Key> {
    pub pointers: Vec<u32>,
    pub keys: Vec<K>,
}

impl<K: Key> InternalNode<K> {
    /// A freshly split-off root with a single separator key between two
    /// children.
    pub fn new_root(left: u32, key: K, right: u32) -> Self {
        InternalNode {
            pointers: vec![left, right],
            keys: vec![key],
        }
    }

    pub fn usage(&self) -> usize {
        self.keys.len()
    }

    pub fn decode(buf: &[u8; PAGE_SIZE]) -> Self {
        let usage = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        let entry_size = PAGE_ID_SIZE + K::ENCODED_SIZE;

        let mut pointers = Vec::with_capacity(usage + 1);
        let mut keys = Vec::with_capacity(usage);
        for i in 0..=usage {
            let off = NODE_HEADER_SIZE + i * entry_size;
            let ptr = u32::from_be_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]]);
            pointers.push(ptr);
            if i < usage {
                let key = K::decode(&buf[off + PAGE_ID_SIZE..off + entry_size]);
                keys.push(key);
            }
        }
        InternalNode { pointers, keys }
    }

    pub fn encode(&self, buf: &mut [u8; PAGE_SIZE]) {
        buf.fill(0);
        let usage = self.usage();
        buf[0..4].copy_from_slice(&(usage as u32).to_be_bytes());

        let entry_size = PAGE_ID_SIZE + K::ENCODED_SIZE;
        for i in 0..=usage {
            let off = NODE_HEADER_SIZE + i * entry_size;
            buf[off..off + PAGE_ID_SIZE].copy_from_slice(&self.pointers[i].to_be_bytes());
            if i < usage {
                self.keys[i].encode(&mut buf[off + PAGE_ID_SIZE..off + entry_size]);
            }
        }
    }

    /// Child pointer index to descend into for `key` during a point
    /// lookup or insert: the first `i` with `key < keys[i]`, else
    /// `usage`.
    pub fn child_index_for(&self, key: &K) -> usize {
        self.keys.iter().position(|k| key.lt(k)).unwrap_or(self.usage())
    }

    /// Pointer index to descend into during a range-scan low-bound
    /// search: scanning from the right, the largest `i` with
    /// `keys[i] <= low`, descending via `pointers[i + 1]`; if no key
    /// qualifies, descend via `pointers[0]`.
    pub fn scan_child_index_for(&self, low: &K) -> usize {
        for i in (0..self.usage()).rev() {
            if self.keys[i].le(low) {
                return i + 1;
            }
        }
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaf_round_trips() {
        let mut leaf = LeafNode::<i32>::new_empty();
        leaf.entries.push((RecordId::new(1, 0), 10));
        leaf.entries.push((RecordId::new(1, 1), 20));
        leaf.right_sib = 7;

        let mut buf = [0u8; PAGE_SIZE];
        leaf.encode(&mut buf);
        let back = LeafNode::<i32>::decode(&buf);
        assert_eq!(back.entries, leaf.entries);
        assert_eq!(back.right_sib, 7);
    }

    #[test]
    fn internal_round_trips() {
        let node = InternalNode::<i32>::new_root(2, 50, 3);
        let mut buf = [0u8; PAGE_SIZE];
        node.encode(&mut buf);
        let back = InternalNode::<i32>::decode(&buf);
        assert_eq!(back.pointers, vec![2, 3]);
        assert_eq!(back.keys, vec![50]);
    }

    #[test]
    fn occupancy_is_positive_for_all_key_types() {
        assert!(leaf_occupancy::<i32>() > 2);
        assert!(leaf_occupancy::<f64>() > 2);
        assert!(node_occupancy::<i32>() > 2);
        assert!(node_occupancy::<f64>() > 2);
    }

    #[test]
    fn child_index_for_picks_first_greater_key() {
        let node = InternalNode {
            pointers: vec![1, 2, 3],
            keys: vec![10, 20],
        };
        assert_eq!(node.child_index_for(&5), 0);
        assert_eq!(node.child_index_for(&15), 1);
        assert_eq!(node.child_index_for(&25), 2);
    }

    #[test]
    fn scan_child_index_scans_from_the_right() {
        let node = InternalNode {
            pointers: vec![1, 2, 3],
            keys: vec![10, 20],
        };
        assert_eq!(node.scan_child_index_for(&25), 2);
        assert_eq!(node.scan_child_index_for(&20), 2);
        assert_eq!(node.scan_child_index_for(&15), 1);
        assert_eq!(node.scan_child_index_for(&5), 0);
    }
}
