//! The B+-tree index: disk-resident, keyed by a single generic [`Key`]
//! type, built on top of a [`BufferManager`].
//!
//! Every page access goes through the buffer manager's pin/unpin
//! discipline; `BTreeIndex` never touches a `PageFile` directly except
//! during construction (to create or open the underlying file). Nodes are
//! decoded into an owned [`LeafNode`]/[`InternalNode`] value, mutated, and
//! re-encoded -- see `btree::node` for why.

use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;

use crate::btree::key::{Key, KeyTypeTag};
use crate::btree::node::{leaf_occupancy, node_occupancy, InternalNode, LeafNode};
use crate::btree::scan::{Operator, ScanState};
use crate::buffer::{BufferManager, FileHandle};
use crate::error::{HorizonError, Result};
use crate::filescan::RecordSource;
use crate::pager::{PageFile, PageId, PAGE_SIZE};
use crate::record::RecordId;

/// Bytes of the relation name stored in the metadata page.
const META_RELNAME_LEN: usize = 20;
/// The metadata page is always the first page allocated in a fresh index
/// file.
const META_PAGE_NO: PageId = 1;

fn encode_meta(
    buf: &mut [u8; PAGE_SIZE],
    relation_name: &str,
    attr_byte_offset: i32,
    key_tag: KeyTypeTag,
    root_page_no: PageId,
    height: i32,
) {
    buf.fill(0);
    let name_bytes = relation_name.as_bytes();
    let n = name_bytes.len().min(META_RELNAME_LEN);
    buf[0..n].copy_from_slice(&name_bytes[..n]);
    buf[20..24].copy_from_slice(&attr_byte_offset.to_be_bytes());
    buf[24..28].copy_from_slice(&(key_tag as i32).to_be_bytes());
    buf[28..32].copy_from_slice(&root_page_no.to_be_bytes());
    buf[32..36].copy_from_slice(&height.to_be_bytes());
}

fn decode_meta(buf: &[u8; PAGE_SIZE]) -> Result<(String, i32, KeyTypeTag, PageId, i32)> {
    let end = buf[0..META_RELNAME_LEN]
        .iter()
        .position(|&b| b == 0)
        .unwrap_or(META_RELNAME_LEN);
    let relation_name = String::from_utf8_lossy(&buf[0..end]).into_owned();
    let attr_byte_offset = i32::from_be_bytes([buf[20], buf[21], buf[22], buf[23]]);
    let tag_raw = i32::from_be_bytes([buf[24], buf[25], buf[26], buf[27]]);
    let key_tag = KeyTypeTag::from_i32(tag_raw)
        .ok_or_else(|| HorizonError::CorruptIndexFile(format!("unknown key type tag {tag_raw}")))?;
    let root_page_no = u32::from_be_bytes([buf[28], buf[29], buf[30], buf[31]]);
    let height = i32::from_be_bytes([buf[32], buf[33], buf[34], buf[35]]);
    Ok((relation_name, attr_byte_offset, key_tag, root_page_no, height))
}

fn leaf_min(leaf_occupancy: usize) -> usize {
    (leaf_occupancy + 1) / 2
}

fn node_min(node_occupancy: usize) -> usize {
    (node_occupancy + 1) / 2 - 1
}

/// A disk-resident B+-tree index over a single attribute of a relation,
/// generic over the attribute's key type.
pub struct BTreeIndex<K: Key> {
    file: FileHandle,
    buffer: Rc<RefCell<BufferManager>>,
    relation_name: String,
    attr_byte_offset: i32,
    root_page_no: PageId,
    height: i32,
    leaf_occupancy: usize,
    node_occupancy: usize,
    scan: Option<ScanState<K>>,
}

impl<K: Key> BTreeIndex<K> {
    /// Open the index file for `relation_name` at attribute offset
    /// `attr_byte_offset` under `dir`, creating and seeding it from
    /// `records` if it does not already exist. Opening an existing index
    /// does not re-seed it -- pass [`crate::filescan::EmptyRecordSource`].
    pub fn create(
        relation_name: &str,
        dir: &Path,
        buffer: Rc<RefCell<BufferManager>>,
        attr_byte_offset: i32,
        records: &mut dyn RecordSource,
    ) -> Result<Self> {
        let path = dir.join(format!("{relation_name}.{attr_byte_offset}"));

        if PageFile::exists(&path) {
            return Self::open_existing(&path, buffer);
        }

        let file: FileHandle = Rc::new(RefCell::new(PageFile::open(&path, true)?));

        let (meta_no, meta_frame) = buffer.borrow_mut().alloc_page(&file)?;
        debug_assert_eq!(meta_no, META_PAGE_NO);
        let (root_no, root_frame) = buffer.borrow_mut().alloc_page(&file)?;
        {
            let mut bm = buffer.borrow_mut();
            LeafNode::<K>::new_empty().encode(bm.frame_data_mut(root_frame));
        }
        buffer.borrow_mut().unpin_page(&file, root_no, true)?;

        {
            let mut bm = buffer.borrow_mut();
            encode_meta(
                bm.frame_data_mut(meta_frame),
                relation_name,
                attr_byte_offset,
                K::TYPE_TAG,
                root_no,
                0,
            );
        }
        buffer.borrow_mut().unpin_page(&file, meta_no, true)?;

        let mut index = BTreeIndex {
            file,
            buffer,
            relation_name: relation_name.to_string(),
            attr_byte_offset,
            root_page_no: root_no,
            height: 0,
            leaf_occupancy: leaf_occupancy::<K>(),
            node_occupancy: node_occupancy::<K>(),
            scan: None,
        };

        while let Some((rid, record)) = records.next_record() {
            let key = K::extract_from_record(&record, attr_byte_offset as usize);
            index.insert_entry(key, rid)?;
        }

        Ok(index)
    }

    fn open_existing(path: &Path, buffer: Rc<RefCell<BufferManager>>) -> Result<Self> {
        let file: FileHandle = Rc::new(RefCell::new(PageFile::open(path, false)?));
        let frame = buffer.borrow_mut().read_page(&file, META_PAGE_NO)?;
        let meta_bytes = *buffer.borrow().frame_data(frame);
        buffer.borrow_mut().unpin_page(&file, META_PAGE_NO, false)?;

        let (relation_name, attr_byte_offset, key_tag, root_page_no, height) = decode_meta(&meta_bytes)?;
        if key_tag != K::TYPE_TAG {
            return Err(HorizonError::CorruptIndexFile(format!(
                "index was built over a {key_tag:?} key, not {:?}",
                K::TYPE_TAG
            )));
        }

        Ok(BTreeIndex {
            file,
            buffer,
            relation_name,
            attr_byte_offset,
            root_page_no,
            height,
            leaf_occupancy: leaf_occupancy::<K>(),
            node_occupancy: node_occupancy::<K>(),
            scan: None,
        })
    }

    pub fn relation_name(&self) -> &str {
        &self.relation_name
    }

    pub fn attr_byte_offset(&self) -> i32 {
        self.attr_byte_offset
    }

    pub fn height(&self) -> i32 {
        self.height
    }

    fn write_metadata(&mut self) -> Result<()> {
        let frame = self.buffer.borrow_mut().read_page(&self.file, META_PAGE_NO)?;
        {
            let mut bm = self.buffer.borrow_mut();
            encode_meta(
                bm.frame_data_mut(frame),
                &self.relation_name,
                self.attr_byte_offset,
                K::TYPE_TAG,
                self.root_page_no,
                self.height,
            );
        }
        self.buffer.borrow_mut().unpin_page(&self.file, META_PAGE_NO, true)
    }

    // ---- insertion ----------------------------------------------------

    /// Insert `(key, rid)` into the tree, splitting nodes bottom-up as
    /// needed and growing the tree's height if the root splits.
    pub fn insert_entry(&mut self, key: K, rid: RecordId) -> Result<()> {
        if let Some((split_key, new_page)) = self.insert_recursive(self.root_page_no, 0, key, rid)? {
            let (new_root_no, frame) = self.buffer.borrow_mut().alloc_page(&self.file)?;
            {
                let mut bm = self.buffer.borrow_mut();
                InternalNode::new_root(self.root_page_no, split_key, new_page).encode(bm.frame_data_mut(frame));
            }
            self.buffer.borrow_mut().unpin_page(&self.file, new_root_no, true)?;
            self.root_page_no = new_root_no;
            self.height += 1;
        }
        self.write_metadata()
    }

    /// Returns `Some((separator key, new right sibling page))` if `page_no`
    /// split while inserting, for the caller to push into its own node.
    fn insert_recursive(
        &mut self,
        page_no: PageId,
        level: i32,
        key: K,
        rid: RecordId,
    ) -> Result<Option<(K, PageId)>> {
        let frame = self.buffer.borrow_mut().read_page(&self.file, page_no)?;

        if level == self.height {
            let mut leaf = {
                let bm = self.buffer.borrow();
                LeafNode::<K>::decode(bm.frame_data(frame))
            };
            let pos = leaf.insert_position(&key);
            leaf.entries.insert(pos, (rid, key));

            let mut push_up = None;
            if leaf.entries.len() == self.leaf_occupancy {
                let split_from = self.leaf_occupancy / 2;
                let new_entries = leaf.entries.split_off(split_from);
                let sep_key = new_entries[0].1;

                let (new_page_no, new_frame) = self.buffer.borrow_mut().alloc_page(&self.file)?;
                let new_leaf = LeafNode {
                    entries: new_entries,
                    right_sib: leaf.right_sib,
                };
                leaf.right_sib = new_page_no;
                {
                    let mut bm = self.buffer.borrow_mut();
                    new_leaf.encode(bm.frame_data_mut(new_frame));
                }
                self.buffer.borrow_mut().unpin_page(&self.file, new_page_no, true)?;

                push_up = Some((sep_key, new_page_no));
            }

            {
                let mut bm = self.buffer.borrow_mut();
                leaf.encode(bm.frame_data_mut(frame));
            }
            self.buffer.borrow_mut().unpin_page(&self.file, page_no, true)?;
            Ok(push_up)
        } else {
            let mut node = {
                let bm = self.buffer.borrow();
                InternalNode::<K>::decode(bm.frame_data(frame))
            };
            let child_idx = node.child_index_for(&key);
            let child_page = node.pointers[child_idx];

            let child_split = self.insert_recursive(child_page, level + 1, key, rid)?;

            let mut push_up = None;
            if let Some((split_key, new_page)) = child_split {
                node.keys.insert(child_idx, split_key);
                node.pointers.insert(child_idx + 1, new_page);

                if node.keys.len() == self.node_occupancy {
                    let mid = self.node_occupancy / 2;
                    let push_key = node.keys[mid];
                    let new_keys = node.keys.split_off(mid + 1);
                    node.keys.truncate(mid);
                    let new_pointers = node.pointers.split_off(mid + 1);

                    let new_node = InternalNode {
                        pointers: new_pointers,
                        keys: new_keys,
                    };
                    let (new_page_no, new_frame) = self.buffer.borrow_mut().alloc_page(&self.file)?;
                    {
                        let mut bm = self.buffer.borrow_mut();
                        new_node.encode(bm.frame_data_mut(new_frame));
                    }
                    self.buffer.borrow_mut().unpin_page(&self.file, new_page_no, true)?;
                    push_up = Some((push_key, new_page_no));
                }
            }

            {
                let mut bm = self.buffer.borrow_mut();
                node.encode(bm.frame_data_mut(frame));
            }
            self.buffer.borrow_mut().unpin_page(&self.file, page_no, true)?;
            Ok(push_up)
        }
    }

    // ---- deletion -------------------------------------------------------

    /// Remove one entry matching `key`. Returns `false` (without mutating
    /// the tree) if no such key exists; propagates only genuine I/O or
    /// buffer errors.
    pub fn delete_entry(&mut self, key: K) -> Result<bool> {
        let mut dispose_list = Vec::new();
        match self.delete_recursive(self.root_page_no, 0, key, &mut dispose_list)? {
            None => Ok(false),
            Some(_) => {
                for page in dispose_list {
                    self.buffer.borrow_mut().dispose_page(&self.file, page);
                }
                self.write_metadata()?;
                Ok(true)
            }
        }
    }

    /// Returns `None` if `key` was not found anywhere in this subtree
    /// (nothing was mutated, everything already unpinned). Returns
    /// `Some(())` once the key was removed; `self.root_page_no` /
    /// `self.height` are updated in place if the root collapses.
    fn delete_recursive(
        &mut self,
        page_no: PageId,
        level: i32,
        key: K,
        dispose_list: &mut Vec<PageId>,
    ) -> Result<Option<()>> {
        let frame = self.buffer.borrow_mut().read_page(&self.file, page_no)?;

        if level == self.height {
            let mut leaf = {
                let bm = self.buffer.borrow();
                LeafNode::<K>::decode(bm.frame_data(frame))
            };
            let pos = leaf.entries.iter().position(|(_, k)| k.compare(&key) == std::cmp::Ordering::Equal);
            let pos = match pos {
                Some(p) => p,
                None => {
                    self.buffer.borrow_mut().unpin_page(&self.file, page_no, false)?;
                    return Ok(None);
                }
            };
            leaf.entries.remove(pos);
            {
                let mut bm = self.buffer.borrow_mut();
                leaf.encode(bm.frame_data_mut(frame));
            }
            self.buffer.borrow_mut().unpin_page(&self.file, page_no, true)?;
            Ok(Some(()))
        } else {
            let mut node = {
                let bm = self.buffer.borrow();
                InternalNode::<K>::decode(bm.frame_data(frame))
            };
            let child_idx = node.child_index_for(&key);
            let child_page = node.pointers[child_idx];
            let child_level = level + 1;

            let found = self.delete_recursive(child_page, child_level, key, dispose_list)?;
            if found.is_none() {
                self.buffer.borrow_mut().unpin_page(&self.file, page_no, false)?;
                return Ok(None);
            }

            let child_underflows = self.child_underflows(child_page, child_level)?;
            if child_underflows {
                if child_level == self.height {
                    self.fix_leaf_underflow(&mut node, child_idx, dispose_list)?;
                } else {
                    self.fix_internal_underflow(&mut node, child_idx, dispose_list)?;
                }
            }

            if level == 0 && self.height > 0 && node.usage() == 0 {
                dispose_list.push(page_no);
                self.root_page_no = node.pointers[0];
                self.height -= 1;
                self.buffer.borrow_mut().unpin_page(&self.file, page_no, false)?;
                return Ok(Some(()));
            }

            {
                let mut bm = self.buffer.borrow_mut();
                node.encode(bm.frame_data_mut(frame));
            }
            self.buffer.borrow_mut().unpin_page(&self.file, page_no, true)?;
            Ok(Some(()))
        }
    }

    fn child_underflows(&mut self, page_no: PageId, level: i32) -> Result<bool> {
        let frame = self.buffer.borrow_mut().read_page(&self.file, page_no)?;
        let underflows = if level == self.height {
            let leaf = {
                let bm = self.buffer.borrow();
                LeafNode::<K>::decode(bm.frame_data(frame))
            };
            leaf.usage() < leaf_min(self.leaf_occupancy)
        } else {
            let node = {
                let bm = self.buffer.borrow();
                InternalNode::<K>::decode(bm.frame_data(frame))
            };
            node.usage() < node_min(self.node_occupancy)
        };
        self.buffer.borrow_mut().unpin_page(&self.file, page_no, false)?;
        Ok(underflows)
    }

    fn fix_leaf_underflow(
        &mut self,
        parent: &mut InternalNode<K>,
        child_idx: usize,
        dispose_list: &mut Vec<PageId>,
    ) -> Result<()> {
        let child_page = parent.pointers[child_idx];

        if child_idx > 0 {
            let sib_page = parent.pointers[child_idx - 1];
            let sib_frame = self.buffer.borrow_mut().read_page(&self.file, sib_page)?;
            let mut sib = {
                let bm = self.buffer.borrow();
                LeafNode::<K>::decode(bm.frame_data(sib_frame))
            };
            let child_frame = self.buffer.borrow_mut().read_page(&self.file, child_page)?;
            let mut child = {
                let bm = self.buffer.borrow();
                LeafNode::<K>::decode(bm.frame_data(child_frame))
            };

            if sib.entries.len() > leaf_min(self.leaf_occupancy) {
                let moved = sib.entries.pop().unwrap();
                child.entries.insert(0, moved);
                parent.keys[child_idx - 1] = child.entries[0].1;
            } else {
                sib.entries.extend(child.entries.drain(..));
                sib.right_sib = child.right_sib;
                parent.keys.remove(child_idx - 1);
                parent.pointers.remove(child_idx);
                dispose_list.push(child_page);
            }

            {
                let mut bm = self.buffer.borrow_mut();
                sib.encode(bm.frame_data_mut(sib_frame));
                child.encode(bm.frame_data_mut(child_frame));
            }
            self.buffer.borrow_mut().unpin_page(&self.file, sib_page, true)?;
            self.buffer.borrow_mut().unpin_page(&self.file, child_page, true)?;
        } else {
            let sib_page = parent.pointers[child_idx + 1];
            let child_frame = self.buffer.borrow_mut().read_page(&self.file, child_page)?;
            let mut child = {
                let bm = self.buffer.borrow();
                LeafNode::<K>::decode(bm.frame_data(child_frame))
            };
            let sib_frame = self.buffer.borrow_mut().read_page(&self.file, sib_page)?;
            let mut sib = {
                let bm = self.buffer.borrow();
                LeafNode::<K>::decode(bm.frame_data(sib_frame))
            };

            if sib.entries.len() > leaf_min(self.leaf_occupancy) {
                let moved = sib.entries.remove(0);
                child.entries.push(moved);
                parent.keys[child_idx] = sib.entries[0].1;
            } else {
                child.entries.extend(sib.entries.drain(..));
                child.right_sib = sib.right_sib;
                parent.keys.remove(child_idx);
                parent.pointers.remove(child_idx + 1);
                dispose_list.push(sib_page);
            }

            {
                let mut bm = self.buffer.borrow_mut();
                child.encode(bm.frame_data_mut(child_frame));
                sib.encode(bm.frame_data_mut(sib_frame));
            }
            self.buffer.borrow_mut().unpin_page(&self.file, child_page, true)?;
            self.buffer.borrow_mut().unpin_page(&self.file, sib_page, true)?;
        }
        Ok(())
    }

    fn fix_internal_underflow(
        &mut self,
        parent: &mut InternalNode<K>,
        child_idx: usize,
        dispose_list: &mut Vec<PageId>,
    ) -> Result<()> {
        let child_page = parent.pointers[child_idx];

        if child_idx > 0 {
            let sib_page = parent.pointers[child_idx - 1];
            let sib_frame = self.buffer.borrow_mut().read_page(&self.file, sib_page)?;
            let mut sib = {
                let bm = self.buffer.borrow();
                InternalNode::<K>::decode(bm.frame_data(sib_frame))
            };
            let child_frame = self.buffer.borrow_mut().read_page(&self.file, child_page)?;
            let mut child = {
                let bm = self.buffer.borrow();
                InternalNode::<K>::decode(bm.frame_data(child_frame))
            };

            if sib.keys.len() > node_min(self.node_occupancy) {
                let moved_ptr = sib.pointers.pop().unwrap();
                let promoted_key = sib.keys.pop().unwrap();
                let old_separator = parent.keys[child_idx - 1];
                child.keys.insert(0, old_separator);
                child.pointers.insert(0, moved_ptr);
                parent.keys[child_idx - 1] = promoted_key;
            } else {
                let separator = parent.keys.remove(child_idx - 1);
                parent.pointers.remove(child_idx);
                sib.keys.push(separator);
                sib.keys.extend(child.keys.drain(..));
                sib.pointers.extend(child.pointers.drain(..));
                dispose_list.push(child_page);
            }

            {
                let mut bm = self.buffer.borrow_mut();
                sib.encode(bm.frame_data_mut(sib_frame));
                child.encode(bm.frame_data_mut(child_frame));
            }
            self.buffer.borrow_mut().unpin_page(&self.file, sib_page, true)?;
            self.buffer.borrow_mut().unpin_page(&self.file, child_page, true)?;
        } else {
            let sib_page = parent.pointers[child_idx + 1];
            let child_frame = self.buffer.borrow_mut().read_page(&self.file, child_page)?;
            let mut child = {
                let bm = self.buffer.borrow();
                InternalNode::<K>::decode(bm.frame_data(child_frame))
            };
            let sib_frame = self.buffer.borrow_mut().read_page(&self.file, sib_page)?;
            let mut sib = {
                let bm = self.buffer.borrow();
                InternalNode::<K>::decode(bm.frame_data(sib_frame))
            };

            if sib.keys.len() > node_min(self.node_occupancy) {
                let moved_ptr = sib.pointers.remove(0);
                let moved_key = sib.keys.remove(0);
                let old_separator = parent.keys[child_idx];
                child.keys.push(old_separator);
                child.pointers.push(moved_ptr);
                parent.keys[child_idx] = moved_key;
            } else {
                let separator = parent.keys.remove(child_idx);
                parent.pointers.remove(child_idx + 1);
                child.keys.push(separator);
                child.keys.extend(sib.keys.drain(..));
                child.pointers.extend(sib.pointers.drain(..));
                dispose_list.push(sib_page);
            }

            {
                let mut bm = self.buffer.borrow_mut();
                child.encode(bm.frame_data_mut(child_frame));
                sib.encode(bm.frame_data_mut(sib_frame));
            }
            self.buffer.borrow_mut().unpin_page(&self.file, child_page, true)?;
            self.buffer.borrow_mut().unpin_page(&self.file, sib_page, true)?;
        }
        Ok(())
    }

    // ---- range scan -----------------------------------------------------

    /// Begin a scan over keys `k` satisfying `k low_op low_val` and
    /// `k high_op high_val`. Replaces any scan already in progress.
    pub fn start_scan(&mut self, low_val: K, low_op: Operator, high_val: K, high_op: Operator) -> Result<()> {
        if !matches!(low_op, Operator::Gt | Operator::Gte) || !matches!(high_op, Operator::Lt | Operator::Lte) {
            return Err(HorizonError::BadOpcodes);
        }
        if high_val.lt(&low_val) {
            return Err(HorizonError::BadScanrange);
        }

        if let Some(state) = self.scan.take() {
            if state.current_page != 0 {
                self.buffer.borrow_mut().unpin_page(&self.file, state.current_page, false)?;
            }
        }

        let mut level = 0;
        let mut cur_page = self.root_page_no;
        while level < self.height {
            let frame = self.buffer.borrow_mut().read_page(&self.file, cur_page)?;
            let node = {
                let bm = self.buffer.borrow();
                InternalNode::<K>::decode(bm.frame_data(frame))
            };
            self.buffer.borrow_mut().unpin_page(&self.file, cur_page, false)?;
            let idx = node.scan_child_index_for(&low_val);
            cur_page = node.pointers[idx];
            level += 1;
        }

        let frame = self.buffer.borrow_mut().read_page(&self.file, cur_page)?;
        let leaf = {
            let bm = self.buffer.borrow();
            LeafNode::<K>::decode(bm.frame_data(frame))
        };

        let found = leaf.entries.iter().position(|(_, k)| match low_op {
            Operator::Gt => low_val.lt(k),
            Operator::Gte => low_val.le(k),
            _ => unreachable!(),
        });

        match found {
            Some(idx) => {
                self.scan = Some(ScanState {
                    current_page: cur_page,
                    current_frame: frame,
                    next_entry: idx,
                    high_val,
                    high_op,
                });
            }
            None => {
                let right_sib = leaf.right_sib;
                self.buffer.borrow_mut().unpin_page(&self.file, cur_page, false)?;
                if right_sib != 0 {
                    let new_frame = self.buffer.borrow_mut().read_page(&self.file, right_sib)?;
                    self.scan = Some(ScanState {
                        current_page: right_sib,
                        current_frame: new_frame,
                        next_entry: 0,
                        high_val,
                        high_op,
                    });
                } else {
                    self.scan = Some(ScanState {
                        current_page: 0,
                        current_frame: 0,
                        next_entry: 0,
                        high_val,
                        high_op,
                    });
                }
            }
        }

        Ok(())
    }

    /// Return the next matching record id, or [`HorizonError::IndexScanCompleted`]
    /// once the scan has passed the high bound or run off the last leaf.
    pub fn scan_next(&mut self) -> Result<RecordId> {
        let state = self.scan.as_ref().ok_or(HorizonError::ScanNotInitialized)?;
        if state.current_page == 0 {
            return Err(HorizonError::IndexScanCompleted);
        }
        let (current_page, current_frame, mut next_entry, high_val, high_op) =
            (state.current_page, state.current_frame, state.next_entry, state.high_val, state.high_op);

        let leaf = {
            let bm = self.buffer.borrow();
            LeafNode::<K>::decode(bm.frame_data(current_frame))
        };

        if next_entry >= leaf.entries.len() {
            return Err(HorizonError::IndexScanCompleted);
        }
        let (rid, key) = leaf.entries[next_entry];

        let violates_high = match high_op {
            Operator::Lt => !key.lt(&high_val),
            Operator::Lte => !key.le(&high_val),
            _ => return Err(HorizonError::Internal("bad high operator in scan state".into())),
        };
        if violates_high {
            return Err(HorizonError::IndexScanCompleted);
        }

        next_entry += 1;
        if next_entry == leaf.entries.len() {
            let right_sib = leaf.right_sib;
            self.buffer.borrow_mut().unpin_page(&self.file, current_page, false)?;
            if right_sib != 0 {
                let new_frame = self.buffer.borrow_mut().read_page(&self.file, right_sib)?;
                self.scan = Some(ScanState {
                    current_page: right_sib,
                    current_frame: new_frame,
                    next_entry: 0,
                    high_val,
                    high_op,
                });
            } else {
                self.scan = Some(ScanState {
                    current_page: 0,
                    current_frame: 0,
                    next_entry: 0,
                    high_val,
                    high_op,
                });
            }
        } else {
            self.scan = Some(ScanState {
                current_page,
                current_frame,
                next_entry,
                high_val,
                high_op,
            });
        }

        Ok(rid)
    }

    /// End the current scan, releasing its pinned page.
    pub fn end_scan(&mut self) -> Result<()> {
        let state = self.scan.take().ok_or(HorizonError::ScanNotInitialized)?;
        if state.current_page != 0 {
            self.buffer.borrow_mut().unpin_page(&self.file, state.current_page, false)?;
        }
        Ok(())
    }

    // ---- validation -----------------------------------------------------

    /// Walk the whole tree checking occupancy bounds, key ordering, and
    /// bound containment. Returns `false` (rather than propagating an
    /// error) on any violation, after unpinning every page the walk
    /// touched.
    pub fn validate(&mut self) -> bool {
        let mut pinned = Vec::new();
        let result = self.validate_recursive(self.root_page_no, 0, None, None, &mut pinned);
        if result.is_err() {
            for page in pinned.drain(..) {
                let _ = self.buffer.borrow_mut().unpin_page(&self.file, page, false);
            }
        }
        result.is_ok()
    }

    fn validate_recursive(
        &mut self,
        page_no: PageId,
        level: i32,
        lower: Option<K>,
        upper: Option<K>,
        pinned: &mut Vec<PageId>,
    ) -> Result<()> {
        let frame = self.buffer.borrow_mut().read_page(&self.file, page_no)?;
        pinned.push(page_no);

        if level == self.height {
            let leaf = {
                let bm = self.buffer.borrow();
                LeafNode::<K>::decode(bm.frame_data(frame))
            };
            if level != 0 {
                let min = leaf_min(self.leaf_occupancy);
                if leaf.entries.len() < min || leaf.entries.len() > self.leaf_occupancy {
                    return Err(HorizonError::ValidationFailed(format!(
                        "leaf {page_no} usage {} outside [{min}, {}]",
                        leaf.entries.len(),
                        self.leaf_occupancy
                    )));
                }
            }
            for w in leaf.entries.windows(2) {
                if w[1].1.lt(&w[0].1) {
                    return Err(HorizonError::ValidationFailed(format!("leaf {page_no} keys out of order")));
                }
            }
            if let (Some(lo), Some((_, first))) = (lower, leaf.entries.first()) {
                if first.lt(&lo) {
                    return Err(HorizonError::ValidationFailed(format!(
                        "leaf {page_no} first key below its lower bound"
                    )));
                }
            }
            if let (Some(hi), Some((_, last))) = (upper, leaf.entries.last()) {
                if !last.lt(&hi) {
                    return Err(HorizonError::ValidationFailed(format!(
                        "leaf {page_no} last key at or above its upper bound"
                    )));
                }
            }
            self.buffer.borrow_mut().unpin_page(&self.file, page_no, false)?;
            pinned.pop();
            Ok(())
        } else {
            let node = {
                let bm = self.buffer.borrow();
                InternalNode::<K>::decode(bm.frame_data(frame))
            };
            if level != 0 {
                let min = node_min(self.node_occupancy);
                if node.usage() < min || node.usage() > self.node_occupancy.saturating_sub(1) {
                    return Err(HorizonError::ValidationFailed(format!(
                        "internal node {page_no} usage {} outside [{min}, {}]",
                        node.usage(),
                        self.node_occupancy.saturating_sub(1)
                    )));
                }
            }
            for w in node.keys.windows(2) {
                if !w[0].lt(&w[1]) {
                    return Err(HorizonError::ValidationFailed(format!(
                        "internal node {page_no} keys not strictly increasing"
                    )));
                }
            }
            for i in 0..=node.usage() {
                let child_lower = if i == 0 { lower } else { Some(node.keys[i - 1]) };
                let child_upper = if i == node.usage() { upper } else { Some(node.keys[i]) };
                self.validate_recursive(node.pointers[i], level + 1, child_lower, child_upper, pinned)?;
            }
            self.buffer.borrow_mut().unpin_page(&self.file, page_no, false)?;
            pinned.pop();
            Ok(())
        }
    }
}

impl<K: Key> Drop for BTreeIndex<K> {
    fn drop(&mut self) {
        if let Some(state) = self.scan.take() {
            if state.current_page != 0 {
                let _ = self.buffer.borrow_mut().unpin_page(&self.file, state.current_page, false);
            }
        }
        let _ = self.write_metadata();
        let _ = self.buffer.borrow_mut().flush_file(&self.file);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filescan::{EmptyRecordSource, VecRecordSource};
    use tempfile::TempDir;

    fn new_index(dir: &TempDir, pool_size: usize) -> BTreeIndex<i32> {
        let buffer = Rc::new(RefCell::new(BufferManager::new(pool_size)));
        let mut seed = EmptyRecordSource;
        BTreeIndex::<i32>::create("rel", dir.path(), buffer, 0, &mut seed).unwrap()
    }

    fn rid(n: u32) -> RecordId {
        RecordId::new(n, 0)
    }

    #[test]
    fn insert_then_scan_forward_returns_sorted_order() {
        let dir = TempDir::new().unwrap();
        let mut idx = new_index(&dir, 20);
        for i in 0..50 {
            idx.insert_entry(i, rid(i as u32)).unwrap();
        }
        idx.start_scan(3, Operator::Gt, 7, Operator::Lt).unwrap();
        let mut got = Vec::new();
        loop {
            match idx.scan_next() {
                Ok(r) => got.push(r.page_no),
                Err(HorizonError::IndexScanCompleted) => break,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        idx.end_scan().unwrap();
        assert_eq!(got, vec![4, 5, 6]);
    }

    #[test]
    fn insert_in_reverse_still_scans_sorted() {
        let dir = TempDir::new().unwrap();
        let mut idx = new_index(&dir, 20);
        for i in (0..50).rev() {
            idx.insert_entry(i, rid(i as u32)).unwrap();
        }
        idx.start_scan(3, Operator::Gte, 7, Operator::Lte).unwrap();
        let mut got = Vec::new();
        loop {
            match idx.scan_next() {
                Ok(r) => got.push(r.page_no),
                Err(HorizonError::IndexScanCompleted) => break,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        idx.end_scan().unwrap();
        assert_eq!(got, vec![3, 4, 5, 6, 7]);
    }

    #[test]
    fn bad_scan_range_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut idx = new_index(&dir, 10);
        idx.insert_entry(1, rid(1)).unwrap();
        let err = idx.start_scan(10, Operator::Gt, 1, Operator::Lt).unwrap_err();
        assert!(matches!(err, HorizonError::BadScanrange));
    }

    #[test]
    fn bad_opcodes_are_rejected() {
        let dir = TempDir::new().unwrap();
        let mut idx = new_index(&dir, 10);
        let err = idx.start_scan(1, Operator::Lt, 10, Operator::Lt).unwrap_err();
        assert!(matches!(err, HorizonError::BadOpcodes));
    }

    #[test]
    fn delete_missing_key_returns_false() {
        let dir = TempDir::new().unwrap();
        let mut idx = new_index(&dir, 10);
        idx.insert_entry(1, rid(1)).unwrap();
        assert!(!idx.delete_entry(999).unwrap());
        assert!(idx.validate());
    }

    #[test]
    fn insert_then_delete_all_collapses_to_height_zero() {
        let dir = TempDir::new().unwrap();
        let mut idx = new_index(&dir, 20);
        let mut keys: Vec<i32> = (0..80).collect();
        for &k in &keys {
            idx.insert_entry(k, rid(k as u32)).unwrap();
        }
        assert!(idx.height() > 0);
        assert!(idx.validate());

        keys.reverse();
        for k in keys {
            assert!(idx.delete_entry(k).unwrap());
        }
        assert_eq!(idx.height(), 0);
        assert!(idx.validate());
    }

    #[test]
    fn reopening_an_existing_index_preserves_its_entries() {
        let dir = TempDir::new().unwrap();
        let buffer = Rc::new(RefCell::new(BufferManager::new(20)));
        {
            let mut seed = VecRecordSource::new(vec![]);
            let mut idx = BTreeIndex::<i32>::create("rel", dir.path(), Rc::clone(&buffer), 0, &mut seed).unwrap();
            for i in 0..30 {
                idx.insert_entry(i, rid(i as u32)).unwrap();
            }
        }

        let mut seed = EmptyRecordSource;
        let mut idx = BTreeIndex::<i32>::create("rel", dir.path(), buffer, 0, &mut seed).unwrap();
        idx.start_scan(0, Operator::Gte, 29, Operator::Lte).unwrap();
        let mut count = 0;
        while idx.scan_next().is_ok() {
            count += 1;
        }
        assert_eq!(count, 30);
    }

    #[test]
    fn seeding_from_a_record_source_extracts_keys_by_offset() {
        let dir = TempDir::new().unwrap();
        let buffer = Rc::new(RefCell::new(BufferManager::new(20)));
        let records = vec![
            (rid(1), 10i32.to_ne_bytes().to_vec()),
            (rid(2), 20i32.to_ne_bytes().to_vec()),
        ];
        let mut seed = VecRecordSource::new(records);
        let mut idx = BTreeIndex::<i32>::create("rel", dir.path(), buffer, 0, &mut seed).unwrap();
        idx.start_scan(0, Operator::Gte, 100, Operator::Lt).unwrap();
        assert_eq!(idx.scan_next().unwrap(), rid(1));
        assert_eq!(idx.scan_next().unwrap(), rid(2));
    }
}
