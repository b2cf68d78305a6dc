//! Disk-resident B+ tree over a single integer attribute of a heap
//! relation.
//!
//! The tree maps key values to the [`RecordId`]s of the source tuples and
//! supports build-from-relation, single-entry insertion, point lookup, and
//! bounded range scans. Every page access goes through the shared
//! [`BufferPoolManager`]; each pin taken here is released before the
//! operation returns, except the scan cursor's pin on its current leaf,
//! which is released when the scan moves on or ends.

use std::sync::Arc;

use log::{debug, info, warn};

use crate::buffer::{BufferPoolManager, FileId, PageId, INVALID_PAGE_ID};
use crate::config::BTreeConfig;
use crate::error::{ArborError, ArborResult};
use crate::storage::codec::{CommonCodec, IndexPageCodec, InternalNodeCodec, LeafNodeCodec};
use crate::storage::page::{
    decode_index_meta, encode_index_meta, AttrType, IndexMetaPage, IndexPage, InternalNode,
    LeafNode, RecordId, INDEX_META_PAGE_ID, INTERNAL_NODE_MAX_SIZE, LEAF_NODE_MAX_SIZE,
    LEAF_PARENT_LEVEL,
};
use crate::storage::table_heap::TableHeap;

/// Range comparators accepted by [`BTreeIndex::start_scan`]. The low bound
/// takes `GT`/`GTE`, the high bound `LT`/`LTE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeOp {
    LT,
    LTE,
    GTE,
    GT,
}

#[derive(Debug)]
struct ScanState {
    low_val: i32,
    low_op: RangeOp,
    high_val: i32,
    high_op: RangeOp,
    /// The one page the cursor keeps pinned between calls.
    leaf_page_id: PageId,
    leaf: LeafNode,
    next_entry: usize,
}

#[derive(Debug)]
pub struct BTreeIndex {
    buffer_pool: Arc<BufferPoolManager>,
    file: FileId,
    index_name: String,
    attr_byte_offset: u32,
    attr_type: AttrType,
    root_page_id: PageId,
    leaf_max_size: u32,
    internal_max_size: u32,
    scan: Option<ScanState>,
}

impl BTreeIndex {
    /// Open the index for `heap`'s attribute at `attr_byte_offset`, creating
    /// and bulk-building it from the relation when the index file
    /// (`"<relation>.<attr_byte_offset>"`) does not exist yet. An existing
    /// file must carry matching metadata, otherwise `BadIndexInfo`.
    pub fn new(
        heap: &TableHeap,
        buffer_pool: Arc<BufferPoolManager>,
        attr_byte_offset: u32,
        attr_type: AttrType,
    ) -> ArborResult<Self> {
        Self::with_config(heap, buffer_pool, attr_byte_offset, attr_type, BTreeConfig::default())
    }

    /// As [`BTreeIndex::new`] with explicit node capacities for nodes this
    /// index creates. Capacities of persisted nodes travel in their page
    /// headers and take precedence when splitting them.
    pub fn with_config(
        heap: &TableHeap,
        buffer_pool: Arc<BufferPoolManager>,
        attr_byte_offset: u32,
        attr_type: AttrType,
        config: BTreeConfig,
    ) -> ArborResult<Self> {
        if attr_type != AttrType::Int {
            return Err(ArborError::NotSupport(format!(
                "index over attribute type {:?}",
                attr_type
            )));
        }
        if !(2..=LEAF_NODE_MAX_SIZE as u32).contains(&config.leaf_max_size)
            || !(2..=INTERNAL_NODE_MAX_SIZE as u32).contains(&config.internal_max_size)
        {
            return Err(ArborError::NotSupport(format!(
                "node capacities {}/{} outside the page-derived bounds",
                config.leaf_max_size, config.internal_max_size
            )));
        }

        let relation = heap.path().display().to_string();
        let index_name = format!("{}.{}", relation, attr_byte_offset);
        match buffer_pool.create_file(&index_name) {
            Ok(file) => Self::create(
                heap,
                buffer_pool,
                file,
                index_name,
                relation,
                attr_byte_offset,
                config,
            ),
            Err(ArborError::FileExists(_)) => Self::open(
                buffer_pool,
                index_name,
                relation,
                attr_byte_offset,
                config,
            ),
            Err(e) => Err(e),
        }
    }

    fn create(
        heap: &TableHeap,
        buffer_pool: Arc<BufferPoolManager>,
        file: FileId,
        index_name: String,
        relation: String,
        attr_byte_offset: u32,
        config: BTreeConfig,
    ) -> ArborResult<Self> {
        let meta_page_id = buffer_pool.alloc_page(file)?;
        debug_assert_eq!(meta_page_id, INDEX_META_PAGE_ID);

        let mut index = Self {
            buffer_pool,
            file,
            index_name,
            attr_byte_offset,
            attr_type: AttrType::Int,
            root_page_id: INVALID_PAGE_ID,
            leaf_max_size: config.leaf_max_size,
            internal_max_size: config.internal_max_size,
            scan: None,
        };

        // Meta is pinned until the freshly initialized tree is in place; on
        // any failure below the pin still has to go.
        let setup = index.init_empty_tree(&relation, meta_page_id);
        if let Err(e) = setup {
            index.unpin_quietly(meta_page_id, false);
            return Err(e);
        }

        info!(
            "created index {} over relation {}",
            index.index_name, relation
        );
        index.build_from_relation(heap)?;
        Ok(index)
    }

    /// Allocate root and first leaf, then persist the meta page describing
    /// them. The meta page is already pinned by the caller.
    fn init_empty_tree(&mut self, relation: &str, meta_page_id: PageId) -> ArborResult<()> {
        let root_page_id = self.buffer_pool.alloc_page(self.file)?;
        let leaf_page_id = match self.buffer_pool.alloc_page(self.file) {
            Ok(id) => id,
            Err(e) => {
                self.unpin_quietly(root_page_id, false);
                return Err(e);
            }
        };

        let leaf = LeafNode::new(self.leaf_max_size);
        if let Err(e) = self.write_and_unpin(leaf_page_id, &LeafNodeCodec::encode(&leaf)) {
            self.unpin_quietly(root_page_id, false);
            return Err(e);
        }

        let mut root = InternalNode::new(self.internal_max_size, LEAF_PARENT_LEVEL);
        root.children.push(leaf_page_id);
        self.write_and_unpin(root_page_id, &InternalNodeCodec::encode(&root))?;

        let meta = IndexMetaPage {
            relation: relation.to_string(),
            attr_byte_offset: self.attr_byte_offset,
            attr_type: self.attr_type,
            root_page_id,
        };
        self.write_and_unpin(meta_page_id, &encode_index_meta(&meta))?;
        self.root_page_id = root_page_id;
        Ok(())
    }

    fn open(
        buffer_pool: Arc<BufferPoolManager>,
        index_name: String,
        relation: String,
        attr_byte_offset: u32,
        config: BTreeConfig,
    ) -> ArborResult<Self> {
        let file = buffer_pool.open_file(&index_name)?;
        let bytes = buffer_pool.read_page(file, INDEX_META_PAGE_ID)?;
        let decoded = decode_index_meta(&bytes);
        // Unpin before the metadata verdict, matching the cleanup order on
        // both outcomes.
        if let Err(e) = buffer_pool.unpin_page(file, INDEX_META_PAGE_ID, false) {
            if !matches!(e, ArborError::PageNotPinned(_)) {
                let _ = buffer_pool.close_file(file);
                return Err(e);
            }
        }
        let meta = match decoded {
            Ok((meta, _)) => meta,
            Err(e) => {
                let _ = buffer_pool.close_file(file);
                return Err(e);
            }
        };

        if meta.relation != relation
            || meta.attr_byte_offset != attr_byte_offset
            || meta.attr_type != AttrType::Int
        {
            let _ = buffer_pool.close_file(file);
            return Err(ArborError::BadIndexInfo(format!(
                "index {} was built over ({}, offset {}, {:?})",
                index_name, meta.relation, meta.attr_byte_offset, meta.attr_type
            )));
        }

        info!("opened existing index {}", index_name);
        Ok(Self {
            buffer_pool,
            file,
            index_name,
            attr_byte_offset,
            attr_type: AttrType::Int,
            root_page_id: meta.root_page_id,
            leaf_max_size: config.leaf_max_size,
            internal_max_size: config.internal_max_size,
            scan: None,
        })
    }

    /// File name the index is persisted under.
    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    /// Scan the relation and insert an entry per record.
    fn build_from_relation(&mut self, heap: &TableHeap) -> ArborResult<()> {
        let mut iter = heap.iter();
        let mut count = 0u64;
        while let Some((rid, record)) = iter.next()? {
            let key = Self::key_from_record(&record, self.attr_byte_offset)?;
            self.insert_entry(key, rid)?;
            count += 1;
        }
        debug!("bulk-built {} with {} entries", self.index_name, count);
        Ok(())
    }

    fn key_from_record(record: &[u8], attr_byte_offset: u32) -> ArborResult<i32> {
        let offset = attr_byte_offset as usize;
        if record.len() < offset + 4 {
            return Err(ArborError::Storage(format!(
                "record of {} bytes has no i32 attribute at offset {}",
                record.len(),
                offset
            )));
        }
        CommonCodec::decode_i32(&record[offset..]).map(|(key, _)| key)
    }

    /// Insert one `(key, rid)` pair, splitting bottom-up as needed.
    pub fn insert_entry(&mut self, key: i32, rid: RecordId) -> ArborResult<()> {
        let (leaf_page_id, mut path) = self.descend_for_insert(key)?;

        let mut leaf = self.read_leaf(leaf_page_id)?;
        if leaf.insert(key, rid) {
            return self.write_and_unpin(leaf_page_id, &LeafNodeCodec::encode(&leaf));
        }

        // Leaf full: split it, then push separators up along the recorded
        // path. Ancestors were unpinned during descent and are re-read
        // here, so at most the splitting node and its new sibling are
        // pinned at any moment.
        let (mut separator, mut new_child) = self.split_leaf(leaf_page_id, leaf, key, rid)?;
        while let Some(parent_page_id) = path.pop() {
            let mut parent = self.read_internal(parent_page_id)?;
            if parent.insert(separator, new_child) {
                return self.write_and_unpin(parent_page_id, &InternalNodeCodec::encode(&parent));
            }
            let (up_separator, up_child) =
                self.split_internal(parent_page_id, parent, separator, new_child)?;
            separator = up_separator;
            new_child = up_child;
            if path.is_empty() {
                return self.grow_root(parent_page_id, separator, new_child);
            }
        }
        Err(ArborError::Internal(
            "insert cascade escaped the root".to_string(),
        ))
    }

    /// Look up any record stored under `key`.
    pub fn lookup(&self, key: i32) -> ArborResult<RecordId> {
        let mut current = self.root_page_id;
        loop {
            let node = self.read_internal(current)?;
            let child = node.route(key);
            let at_leaf_parent = node.level == LEAF_PARENT_LEVEL;
            self.buffer_pool.unpin_page(self.file, current, false)?;
            if at_leaf_parent {
                let leaf = self.read_leaf(child)?;
                let found = leaf.lookup(key);
                self.buffer_pool.unpin_page(self.file, child, false)?;
                return found.ok_or(ArborError::NoSuchKeyFound);
            }
            current = child;
        }
    }

    /// Position a scan cursor at the first entry satisfying the bounds.
    /// `low_op` must be `GT`/`GTE` and `high_op` `LT`/`LTE`.
    pub fn start_scan(
        &mut self,
        low_val: i32,
        low_op: RangeOp,
        high_val: i32,
        high_op: RangeOp,
    ) -> ArborResult<()> {
        if !matches!(low_op, RangeOp::GT | RangeOp::GTE)
            || !matches!(high_op, RangeOp::LT | RangeOp::LTE)
        {
            return Err(ArborError::BadOpcodes);
        }
        if low_val > high_val {
            return Err(ArborError::BadScanrange);
        }
        if self.scan.is_some() {
            self.end_scan()?;
        }

        let included = low_op == RangeOp::GTE;
        let leaf_page_id = self.descend_for_scan(low_val, included)?;
        // The cursor's pin; held until the scan crosses to a sibling or
        // ends.
        let leaf = self.read_leaf(leaf_page_id)?;
        let next_entry = leaf.lower_bound(low_val, included);
        self.scan = Some(ScanState {
            low_val,
            low_op,
            high_val,
            high_op,
            leaf_page_id,
            leaf,
            next_entry,
        });
        Ok(())
    }

    /// Produce the next record id in the range, or `IndexScanCompleted`
    /// once the upper bound is passed or the sibling chain ends.
    pub fn scan_next(&mut self) -> ArborResult<RecordId> {
        let buffer_pool = self.buffer_pool.clone();
        let file = self.file;
        let Some(scan) = self.scan.as_mut() else {
            return Err(ArborError::ScanNotInitialized);
        };

        loop {
            if scan.next_entry >= scan.leaf.len() {
                // Leaf exhausted: drop its pin and move right. A repeat
                // call after completion lands here again with the pin
                // already gone, hence the swallowed PageNotPinned.
                let next_page_id = scan.leaf.next_page_id;
                match buffer_pool.unpin_page(file, scan.leaf_page_id, false) {
                    Ok(()) | Err(ArborError::PageNotPinned(_)) => {}
                    Err(e) => return Err(e),
                }
                if next_page_id == INVALID_PAGE_ID {
                    return Err(ArborError::IndexScanCompleted);
                }
                let bytes = buffer_pool.read_page(file, next_page_id)?;
                scan.leaf = match LeafNodeCodec::decode(&bytes) {
                    Ok((leaf, _)) => leaf,
                    Err(e) => {
                        let _ = buffer_pool.unpin_page(file, next_page_id, false);
                        return Err(e);
                    }
                };
                scan.leaf_page_id = next_page_id;
                scan.next_entry = 0;
                continue;
            }

            let (key, rid) = scan.leaf.entries[scan.next_entry];
            let below_low = match scan.low_op {
                RangeOp::GT => key <= scan.low_val,
                RangeOp::GTE => key < scan.low_val,
                _ => false,
            };
            if below_low {
                scan.next_entry += 1;
                continue;
            }
            let above_high = match scan.high_op {
                RangeOp::LT => key >= scan.high_val,
                RangeOp::LTE => key > scan.high_val,
                _ => false,
            };
            if above_high {
                return Err(ArborError::IndexScanCompleted);
            }
            scan.next_entry += 1;
            return Ok(rid);
        }
    }

    /// Terminate the active scan and release its leaf pin.
    pub fn end_scan(&mut self) -> ArborResult<()> {
        let scan = self.scan.take().ok_or(ArborError::ScanNotInitialized)?;
        self.unpin_quietly(scan.leaf_page_id, false);
        Ok(())
    }

    /// Edges from the root to the leaves, checking on the way down that
    /// every leaf sits at the same depth. Diagnostic walk; pins one page
    /// at a time.
    pub fn depth(&self) -> ArborResult<usize> {
        self.subtree_depth(self.root_page_id)
    }

    fn subtree_depth(&self, page_id: PageId) -> ArborResult<usize> {
        let bytes = self.buffer_pool.read_page(self.file, page_id)?;
        let decoded = IndexPageCodec::decode(&bytes);
        self.buffer_pool.unpin_page(self.file, page_id, false)?;
        match decoded?.0 {
            IndexPage::Leaf(_) => Ok(0),
            IndexPage::Internal(node) => {
                let mut child_depth = None;
                for child in node.children {
                    let depth = self.subtree_depth(child)?;
                    if *child_depth.get_or_insert(depth) != depth {
                        return Err(ArborError::Internal(format!(
                            "leaves under page {} sit at unequal depths",
                            page_id
                        )));
                    }
                }
                Ok(child_depth.unwrap_or(0) + 1)
            }
        }
    }

    /// Walk internal nodes toward the leaf covering `key`, recording the
    /// page ids of the internals visited (root first). Every node is
    /// unpinned as soon as its child pointer is extracted.
    fn descend_for_insert(&self, key: i32) -> ArborResult<(PageId, Vec<PageId>)> {
        let mut path = Vec::new();
        let mut current = self.root_page_id;
        loop {
            let node = self.read_internal(current)?;
            path.push(current);
            let child = node.route(key);
            let at_leaf_parent = node.level == LEAF_PARENT_LEVEL;
            self.buffer_pool.unpin_page(self.file, current, false)?;
            if at_leaf_parent {
                return Ok((child, path));
            }
            current = child;
        }
    }

    /// Routing-only descent for scans; no path is recorded.
    fn descend_for_scan(&self, low_val: i32, included: bool) -> ArborResult<PageId> {
        let mut current = self.root_page_id;
        loop {
            let node = self.read_internal(current)?;
            let child = node.route_for_scan(low_val, included);
            let at_leaf_parent = node.level == LEAF_PARENT_LEVEL;
            self.buffer_pool.unpin_page(self.file, current, false)?;
            if at_leaf_parent {
                return Ok(child);
            }
            current = child;
        }
    }

    /// Split a full leaf around the overflow pair. Both halves are written
    /// and unpinned; returns the new page and the copied-up separator.
    fn split_leaf(
        &mut self,
        leaf_page_id: PageId,
        mut leaf: LeafNode,
        key: i32,
        rid: RecordId,
    ) -> ArborResult<(i32, PageId)> {
        let new_page_id = match self.buffer_pool.alloc_page(self.file) {
            Ok(id) => id,
            Err(e) => {
                self.unpin_quietly(leaf_page_id, false);
                return Err(e);
            }
        };
        let right = leaf.split_with(key, rid);
        leaf.next_page_id = new_page_id;
        let separator = right.separator();

        debug!(
            "split leaf {} of {} at separator {}, new leaf {}",
            leaf_page_id, self.index_name, separator, new_page_id
        );
        self.write_and_unpin(new_page_id, &LeafNodeCodec::encode(&right))?;
        self.write_and_unpin(leaf_page_id, &LeafNodeCodec::encode(&leaf))?;
        Ok((separator, new_page_id))
    }

    /// Split a full internal node around the pending separator; the middle
    /// key moves up. Both halves are written and unpinned.
    fn split_internal(
        &mut self,
        page_id: PageId,
        mut node: InternalNode,
        key: i32,
        right_child: PageId,
    ) -> ArborResult<(i32, PageId)> {
        let new_page_id = match self.buffer_pool.alloc_page(self.file) {
            Ok(id) => id,
            Err(e) => {
                self.unpin_quietly(page_id, false);
                return Err(e);
            }
        };
        let (separator, right) = node.split_with(key, right_child);

        debug!(
            "split internal {} of {} at separator {}, new node {}",
            page_id, self.index_name, separator, new_page_id
        );
        self.write_and_unpin(new_page_id, &InternalNodeCodec::encode(&right))?;
        self.write_and_unpin(page_id, &InternalNodeCodec::encode(&node))?;
        Ok((separator, new_page_id))
    }

    /// Install a new root above a split old root and record it in the meta
    /// page.
    fn grow_root(
        &mut self,
        old_root_id: PageId,
        separator: i32,
        right_child: PageId,
    ) -> ArborResult<()> {
        let new_root_id = self.buffer_pool.alloc_page(self.file)?;
        // The old root just split, so its children are internal nodes now.
        let mut root = InternalNode::new(self.internal_max_size, 0);
        root.keys.push(separator);
        root.children.push(old_root_id);
        root.children.push(right_child);
        self.write_and_unpin(new_root_id, &InternalNodeCodec::encode(&root))?;

        debug!(
            "root of {} grew: {} -> {}",
            self.index_name, old_root_id, new_root_id
        );
        self.set_root_page_id(new_root_id)
    }

    fn set_root_page_id(&mut self, root_page_id: PageId) -> ArborResult<()> {
        self.root_page_id = root_page_id;
        let bytes = self.buffer_pool.read_page(self.file, INDEX_META_PAGE_ID)?;
        let mut meta = match decode_index_meta(&bytes) {
            Ok((meta, _)) => meta,
            Err(e) => {
                self.unpin_quietly(INDEX_META_PAGE_ID, false);
                return Err(e);
            }
        };
        meta.root_page_id = root_page_id;
        self.write_and_unpin(INDEX_META_PAGE_ID, &encode_index_meta(&meta))
    }

    fn read_leaf(&self, page_id: PageId) -> ArborResult<LeafNode> {
        let bytes = self.buffer_pool.read_page(self.file, page_id)?;
        match LeafNodeCodec::decode(&bytes) {
            Ok((leaf, _)) => Ok(leaf),
            Err(e) => {
                self.unpin_quietly(page_id, false);
                Err(e)
            }
        }
    }

    fn read_internal(&self, page_id: PageId) -> ArborResult<InternalNode> {
        let bytes = self.buffer_pool.read_page(self.file, page_id)?;
        match InternalNodeCodec::decode(&bytes) {
            Ok((node, _)) => Ok(node),
            Err(e) => {
                self.unpin_quietly(page_id, false);
                Err(e)
            }
        }
    }

    /// Write a pinned page back and release the pin, dirty on success. The
    /// pin is dropped even when the write fails.
    fn write_and_unpin(&self, page_id: PageId, bytes: &[u8]) -> ArborResult<()> {
        let write = self.buffer_pool.write_page(self.file, page_id, bytes);
        let unpin = self
            .buffer_pool
            .unpin_page(self.file, page_id, write.is_ok());
        write.and(unpin)
    }

    /// Best-effort unpin for cleanup paths. A missing pin is expected
    /// there; anything else is logged and dropped.
    fn unpin_quietly(&self, page_id: PageId, dirty: bool) {
        match self.buffer_pool.unpin_page(self.file, page_id, dirty) {
            Ok(()) | Err(ArborError::PageNotPinned(_)) => {}
            Err(e) => warn!(
                "failed to unpin page {} of {}: {}",
                page_id, self.index_name, e
            ),
        }
    }
}

impl Drop for BTreeIndex {
    fn drop(&mut self) {
        if let Some(scan) = self.scan.take() {
            self.unpin_quietly(scan.leaf_page_id, false);
        }
        if let Err(e) = self.buffer_pool.close_file(self.file) {
            warn!("failed to close index file {}: {}", self.index_name, e);
        }
    }
}
