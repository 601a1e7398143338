//! The disk-resident data tree.

use std::collections::HashSet;
use std::path::Path;

use super::cache::PageCache;
use super::constants::FIRST_NODE_PAGE;
use super::node::{NodeCapacity, NodeEntries, RRDiskNode};
use super::node_contract::DiskNode;
use super::storage::Storage;
use super::types::{ChildEntry, DiskTreeStats, FileHeader, FreePage, PageId};
use crate::bounding_box::BoundingBox;
use crate::errors::{RRTreeError, RRTreeResult};
use crate::operation::DataObject;

/// Outcome of visiting a subtree during a query
enum SubtreeChange {
    Unchanged,
    Resized(BoundingBox),
    Emptied,
}

/// Internal I/O statistics tracking
#[derive(Debug, Default)]
struct IoStatistics {
    cache_hits: u64,
    cache_misses: u64,
    disk_reads: u64,
    disk_writes: u64,
}

/// A paged R-tree holding the data objects.
///
/// Nodes are read lazily through an LRU page cache; changed nodes are
/// written back on eviction or [`RRDiskDataTree::flush`]. The tree itself
/// does not decide where buffered operations go. It offers node access,
/// splitting and linking primitives to the buffer emptying pass and a lazy
/// range query that lets a modifier touch every visited leaf.
pub struct RRDiskDataTree {
    storage: Storage,
    cache: PageCache,
    header: FileHeader,
    stats: IoStatistics,
}

impl RRDiskDataTree {
    /// Create a new tree file holding one empty root leaf.
    pub fn create(
        path: impl AsRef<Path>,
        min_capacity: usize,
        max_capacity: usize,
        cache_pages: usize,
    ) -> RRTreeResult<Self> {
        let storage = Storage::create(path.as_ref())?;
        let header = FileHeader::new(min_capacity, max_capacity);
        storage.write_page(header.root_page, &RRDiskNode::new_leaf(Vec::new()))?;
        storage.write_header(&header)?;
        storage.sync()?;

        log::debug!(
            "Created data tree at {:?} (capacity {}..={})",
            path.as_ref(),
            min_capacity,
            max_capacity
        );

        Ok(Self {
            storage,
            cache: PageCache::new(cache_pages),
            header,
            stats: IoStatistics::default(),
        })
    }

    /// Open an existing tree. Only the header is read.
    pub fn open(
        path: impl AsRef<Path>,
        min_capacity: usize,
        max_capacity: usize,
        cache_pages: usize,
    ) -> RRTreeResult<Self> {
        let storage = Storage::open(path.as_ref())?;
        let header = storage.read_header()?;
        header.validate()?;

        if header.min_node_capacity as usize != min_capacity
            || header.max_node_capacity as usize != max_capacity
        {
            return Err(RRTreeError::InvalidConfig(format!(
                "tree file was created with node capacity {}..={}, not {}..={}",
                header.min_node_capacity, header.max_node_capacity, min_capacity, max_capacity
            )));
        }

        log::debug!(
            "Opened data tree at {:?} ({} entries, height {})",
            path.as_ref(),
            header.entry_count,
            header.height
        );

        Ok(Self {
            storage,
            cache: PageCache::new(cache_pages),
            header,
            stats: IoStatistics::default(),
        })
    }

    pub fn min_capacity(&self) -> usize {
        self.header.min_node_capacity as usize
    }

    pub fn max_capacity(&self) -> usize {
        self.header.max_node_capacity as usize
    }

    pub fn root_page(&self) -> PageId {
        self.header.root_page
    }

    /// Level of the root node; 0 while the root is a leaf.
    pub fn height(&self) -> u32 {
        self.header.height
    }

    pub fn set_root(&mut self, page_id: PageId, level: u32) {
        self.header.root_page = page_id;
        self.header.height = level;
    }

    /// Number of data objects stored on disk
    pub fn entry_count(&self) -> u64 {
        self.header.entry_count
    }

    pub fn adjust_entry_count(&mut self, delta: i64) {
        self.header.entry_count = self.header.entry_count.saturating_add_signed(delta);
    }

    pub fn stats(&self) -> DiskTreeStats {
        DiskTreeStats {
            total_entries: self.header.entry_count,
            cached_pages: self.cache.len() as u64,
            cache_hits: self.stats.cache_hits,
            cache_misses: self.stats.cache_misses,
            disk_reads: self.stats.disk_reads,
            disk_writes: self.stats.disk_writes,
            tree_height: self.header.height,
            free_pages: self.header.free_page_count,
        }
    }

    // ========================================================================
    // Page Access
    // ========================================================================

    /// Read a node - first checks cache, then loads from disk.
    /// The returned copy carries the occupancy bounds of its position.
    pub fn read_node(&mut self, page_id: PageId) -> RRTreeResult<RRDiskNode> {
        if page_id < FIRST_NODE_PAGE || page_id >= self.header.next_page_id {
            return Err(RRTreeError::InvalidOperation(format!(
                "page {} is not a node page",
                page_id
            )));
        }
        let capacity = self.capacity_for(page_id);

        if let Some(node) = self.cache.get(page_id) {
            self.stats.cache_hits += 1;
            return Ok(node.clone().with_capacity(capacity));
        }

        self.stats.cache_misses += 1;
        self.stats.disk_reads += 1;
        let node = self.storage.read_page(page_id)?;
        self.cache_node(page_id, node.clone(), false)?;
        Ok(node.with_capacity(capacity))
    }

    /// Write a node to cache (marked dirty for later flush)
    pub fn write_node(&mut self, page_id: PageId, mut node: RRDiskNode) -> RRTreeResult<()> {
        node.clear_transient_state();
        self.cache_node(page_id, node, true)
    }

    /// Allocate a page, reusing the head of the free list when there is one.
    pub fn allocate_page(&mut self) -> RRTreeResult<PageId> {
        if self.header.free_list_head != 0 {
            let page_id = self.header.free_list_head;
            let free = self.storage.read_free_page(page_id)?;
            self.header.free_list_head = free.next_free;
            self.header.free_page_count = self.header.free_page_count.saturating_sub(1);
            return Ok(page_id);
        }

        let page_id = self.header.next_page_id;
        self.header.next_page_id += 1;
        Ok(page_id)
    }

    /// Return a page to the free list. Cached contents are discarded.
    pub fn free_page(&mut self, page_id: PageId) -> RRTreeResult<()> {
        self.cache.remove(page_id);
        self.storage.write_free_page(
            page_id,
            &FreePage {
                next_free: self.header.free_list_head,
            },
        )?;
        self.header.free_list_head = page_id;
        self.header.free_page_count += 1;
        Ok(())
    }

    fn capacity_for(&self, page_id: PageId) -> NodeCapacity {
        NodeCapacity {
            min: self.min_capacity(),
            max: self.max_capacity(),
            is_root: page_id == self.header.root_page,
        }
    }

    /// Add a node to cache, handling eviction if necessary.
    /// Evicted dirty pages are written to disk.
    fn cache_node(&mut self, page_id: PageId, node: RRDiskNode, dirty: bool) -> RRTreeResult<()> {
        if !self.cache.contains(page_id) {
            while self.cache.needs_eviction() {
                let Some((evict_id, evict_node, evict_dirty)) = self.cache.evict_oldest() else {
                    break;
                };
                if evict_dirty {
                    self.storage.write_page(evict_id, &evict_node)?;
                    self.stats.disk_writes += 1;
                }
            }
        }

        self.cache.insert(page_id, node, dirty);
        Ok(())
    }

    /// Flush all dirty pages and the header to disk
    pub fn flush(&mut self) -> RRTreeResult<()> {
        for page_id in self.cache.dirty_pages() {
            if let Some(cached) = self.cache.peek(page_id) {
                self.storage.write_page(page_id, &cached.node)?;
                self.stats.disk_writes += 1;
            }
            self.cache.mark_clean(page_id);
        }

        self.storage.write_header(&self.header)?;
        self.storage.sync()?;
        Ok(())
    }

    // ========================================================================
    // Splitting and Linking
    // ========================================================================

    /// Splits an overflowing node into `ceil(n / max)` nodes of balanced
    /// size, ordered by the x-centre of their entries. Nodes within bounds
    /// are returned unchanged.
    pub fn split_node(&self, node: RRDiskNode) -> Vec<RRDiskNode> {
        let max = self.max_capacity();
        if node.len() <= max {
            return vec![node];
        }

        let level = node.level();
        match node.into_entries() {
            NodeEntries::Leaf(mut objects) => {
                objects.sort_by(|a, b| a.bbox.center().0.total_cmp(&b.bbox.center().0));
                balanced_chunks(objects, max)
                    .into_iter()
                    .map(RRDiskNode::new_leaf)
                    .collect()
            }
            NodeEntries::Internal(mut children) => {
                children.sort_by(|a, b| a.bbox.center().0.total_cmp(&b.bbox.center().0));
                balanced_chunks(children, max)
                    .into_iter()
                    .map(|chunk| RRDiskNode::new_internal(level, chunk))
                    .collect()
            }
        }
    }

    /// Stores the nodes of a split: the first one in `page_id`, the rest in
    /// newly allocated pages. Returns the index entries pointing at them.
    pub fn store_split(
        &mut self,
        page_id: PageId,
        nodes: Vec<RRDiskNode>,
    ) -> RRTreeResult<Vec<ChildEntry>> {
        let mut entries = Vec::with_capacity(nodes.len());
        for (i, node) in nodes.into_iter().enumerate() {
            let bbox = node.compute_descriptor().ok_or_else(|| {
                RRTreeError::InvalidOperation("cannot link an empty node".into())
            })?;
            let target = if i == 0 { page_id } else { self.allocate_page()? };
            self.write_node(target, node)?;
            entries.push(ChildEntry::new(bbox, target));
        }
        Ok(entries)
    }

    /// Installs the result of updating the root. While there is more than
    /// one node, they are linked under a new root one level up, which is
    /// split again if it overflows. Returns the number of root splits.
    pub fn replace_root(&mut self, mut nodes: Vec<RRDiskNode>) -> RRTreeResult<u64> {
        let mut page_id = self.root_page();
        let mut splits = 0;
        loop {
            if nodes.len() <= 1 {
                let node = nodes.pop().unwrap_or_else(|| RRDiskNode::new_leaf(Vec::new()));
                let level = node.level();
                self.set_root(page_id, level);
                self.write_node(page_id, node)?;
                return Ok(splits);
            }

            let level = nodes[0].level() + 1;
            let entries = self.store_split(page_id, nodes)?;
            page_id = self.allocate_page()?;
            self.set_root(page_id, level);
            splits += 1;
            log::debug!("Root split, new root page {} at level {}", page_id, level);
            nodes = self.split_node(RRDiskNode::new_internal(level, entries));
        }
    }

    /// Shrinks the tree while the root is an internal node with a single
    /// child; an internal root without children becomes an empty leaf.
    /// Returns the number of levels removed.
    pub fn normalize_root(&mut self) -> RRTreeResult<u64> {
        let mut collapsed = 0;
        loop {
            let root_page = self.root_page();
            let root = self.read_node(root_page)?;
            if root.is_leaf() {
                return Ok(collapsed);
            }
            match root.children() {
                [only] => {
                    let child = only.page_id;
                    self.free_page(root_page)?;
                    self.set_root(child, root.level() - 1);
                    collapsed += 1;
                }
                [] => {
                    self.set_root(root_page, 0);
                    self.write_node(root_page, RRDiskNode::new_leaf(Vec::new()))?;
                    return Ok(collapsed);
                }
                _ => return Ok(collapsed),
            }
        }
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Range query with a leaf modifier.
    ///
    /// Every visited leaf is handed to `modifier` before its entries are
    /// read; if the modifier reports a change the leaf is written back, the
    /// entry count adjusted, and the bounding boxes on the path tightened.
    /// Children left empty are unlinked and their pages freed.
    pub fn query(
        &mut self,
        region: &BoundingBox,
        modifier: &mut dyn FnMut(&mut RRDiskNode) -> bool,
    ) -> RRTreeResult<Vec<DataObject>> {
        let mut results = Vec::new();
        let root = self.root_page();
        self.query_recursive(root, region, modifier, &mut results)?;
        self.normalize_root()?;
        Ok(results)
    }

    fn query_recursive(
        &mut self,
        page_id: PageId,
        region: &BoundingBox,
        modifier: &mut dyn FnMut(&mut RRDiskNode) -> bool,
        results: &mut Vec<DataObject>,
    ) -> RRTreeResult<SubtreeChange> {
        let mut node = self.read_node(page_id)?;

        if node.is_leaf() {
            let before = node.len();
            let changed = modifier(&mut node);
            results.extend(node.objects().iter().filter(|o| o.bbox.intersects(region)));
            if !changed {
                return Ok(SubtreeChange::Unchanged);
            }
            self.adjust_entry_count(node.len() as i64 - before as i64);
            let descriptor = node.compute_descriptor();
            self.write_node(page_id, node)?;
            return Ok(match descriptor {
                Some(bbox) => SubtreeChange::Resized(bbox),
                None => SubtreeChange::Emptied,
            });
        }

        let mut changed = false;
        for child in node.query(region) {
            match self.query_recursive(child.page_id, region, modifier, results)? {
                SubtreeChange::Unchanged => {}
                SubtreeChange::Resized(bbox) => {
                    changed |= bbox != child.bbox;
                    node.update_child_bbox(child.page_id, bbox);
                }
                SubtreeChange::Emptied => {
                    node.remove_child(child.page_id);
                    self.free_page(child.page_id)?;
                    changed = true;
                }
            }
        }

        if !changed {
            return Ok(SubtreeChange::Unchanged);
        }
        let descriptor = node.compute_descriptor();
        self.write_node(page_id, node)?;
        Ok(match descriptor {
            Some(bbox) => SubtreeChange::Resized(bbox),
            None => SubtreeChange::Emptied,
        })
    }

    /// Every data object on disk, in traversal order.
    pub fn all_objects(&mut self) -> RRTreeResult<Vec<DataObject>> {
        let mut pending = vec![self.root_page()];
        let mut objects = Vec::new();
        while let Some(page_id) = pending.pop() {
            let node = self.read_node(page_id)?;
            match node.entries() {
                NodeEntries::Leaf(leaf) => objects.extend_from_slice(leaf),
                NodeEntries::Internal(children) => {
                    pending.extend(children.iter().map(|c| c.page_id))
                }
            }
        }
        Ok(objects)
    }

    // ========================================================================
    // Integrity
    // ========================================================================

    /// Verifies the structure: every page is reached once, levels descend
    /// by one, each child entry's box equals its node's descriptor, no node
    /// overflows, no non-root node underflows, an internal root has at least
    /// two children, and the entry count matches the leaves.
    ///
    /// Object ids are unique among the stored objects that are not in
    /// `superseded`, the objects with a buffered deletion. No object value
    /// is stored twice.
    pub fn check_invariants(&mut self, superseded: &HashSet<DataObject>) -> RRTreeResult<()> {
        let mut seen = HashSet::new();
        let mut objects = Vec::new();
        let root = self.root_page();
        let height = self.height();
        self.check_node(root, height, true, &mut seen, &mut objects)?;

        if objects.len() as u64 != self.header.entry_count {
            return Err(RRTreeError::Corrupted(format!(
                "entry count {} does not match {} objects in leaves",
                self.header.entry_count,
                objects.len()
            )));
        }

        let mut values = HashSet::with_capacity(objects.len());
        let mut live_ids = HashSet::with_capacity(objects.len());
        for object in &objects {
            if !values.insert(*object) {
                return Err(RRTreeError::Corrupted(format!(
                    "object {} stored twice at {}",
                    object.id, object.bbox
                )));
            }
            if !superseded.contains(object) && !live_ids.insert(object.id) {
                return Err(RRTreeError::Corrupted(format!(
                    "object id {} stored at more than one extent",
                    object.id
                )));
            }
        }
        Ok(())
    }

    fn check_node(
        &mut self,
        page_id: PageId,
        expected_level: u32,
        is_root: bool,
        seen: &mut HashSet<PageId>,
        objects: &mut Vec<DataObject>,
    ) -> RRTreeResult<Option<BoundingBox>> {
        if !seen.insert(page_id) {
            return Err(RRTreeError::Corrupted(format!("page {} reached twice", page_id)));
        }
        let node = self.read_node(page_id)?;
        if node.level() != expected_level {
            return Err(RRTreeError::Corrupted(format!(
                "page {} at level {}, expected {}",
                page_id,
                node.level(),
                expected_level
            )));
        }
        if node.overflows() {
            return Err(RRTreeError::Corrupted(format!(
                "page {} overflows with {} entries",
                page_id,
                node.len()
            )));
        }
        if !is_root && node.underflows() {
            return Err(RRTreeError::Corrupted(format!(
                "page {} underflows with {} entries",
                page_id,
                node.len()
            )));
        }
        if is_root && !node.is_leaf() && node.len() < 2 {
            return Err(RRTreeError::Corrupted(format!(
                "internal root {} has {} children",
                page_id,
                node.len()
            )));
        }

        match node.entries() {
            NodeEntries::Leaf(leaf) => objects.extend_from_slice(leaf),
            NodeEntries::Internal(children) => {
                let child_level = expected_level.checked_sub(1).ok_or_else(|| {
                    RRTreeError::Corrupted(format!("page {} has children at level 0", page_id))
                })?;
                for child in children {
                    let descriptor =
                        self.check_node(child.page_id, child_level, false, seen, objects)?;
                    if descriptor != Some(child.bbox) {
                        return Err(RRTreeError::Corrupted(format!(
                            "entry for page {} has box {}, node covers {:?}",
                            child.page_id, child.bbox, descriptor
                        )));
                    }
                }
            }
        }
        Ok(node.compute_descriptor())
    }
}

/// Cuts `items` into `ceil(n / max)` consecutive chunks whose sizes differ
/// by at most one.
fn balanced_chunks<T>(items: Vec<T>, max: usize) -> Vec<Vec<T>> {
    let n = items.len();
    let parts = n.div_ceil(max.max(1)).max(1);
    let base = n / parts;
    let extra = n % parts;

    let mut chunks = Vec::with_capacity(parts);
    let mut iter = items.into_iter();
    for i in 0..parts {
        let size = base + usize::from(i < extra);
        chunks.push(iter.by_ref().take(size).collect());
    }
    chunks
}
