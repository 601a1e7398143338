//! The buffered R-tree.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use indexmap::IndexSet;

use crate::bounding_box::BoundingBox;
use crate::buffer::{OperationBuffer, RRTreeBuffer};
use crate::config::RRTreeConfig;
use crate::disk_tree::{DiskTreeStats, RRDiskDataTree, RRDiskNode};
use crate::errors::{RRTreeError, RRTreeResult};
use crate::flush::BufferEmptier;
use crate::group_makers::OperationGroupMaker;
use crate::leaf_modifiers::{
    DiskNodeOnQueryModifier, LeafNodePiggybacker, NullModifier, OperationCompletion,
};
use crate::operation::{DataObject, ObjectId, Operation, OperationType};
use crate::piggybacking_info::LeafPiggybackingInfo;
use crate::stats::{OpLifetimeStats, RRTreeStats};
use crate::tracer::{NullObjectTracer, ObjectTracer, TracePhase};

// ============================================================================
// Operation Completion
// ============================================================================

/// Settles an operation that became durable on disk.
pub(crate) struct OperationCompleter<'a, T: ObjectTracer> {
    tracer: &'a T,
    lifetimes: &'a mut OpLifetimeStats,
    /// Set while a buffer emptying runs
    completed_deletions: Option<&'a mut HashSet<Operation>>,
}

impl<'a, T: ObjectTracer> OperationCompleter<'a, T> {
    pub(crate) fn new(
        tracer: &'a T,
        lifetimes: &'a mut OpLifetimeStats,
        completed_deletions: Option<&'a mut HashSet<Operation>>,
    ) -> Self {
        Self {
            tracer,
            lifetimes,
            completed_deletions,
        }
    }
}

impl<T: ObjectTracer> OperationCompletion for OperationCompleter<'_, T> {
    fn complete_operation(&mut self, op: &Operation) {
        self.tracer
            .trace_update_tree_entry(op, TracePhase::CompleteOperation, None);
        self.lifetimes.complete(op);
        if op.is_deletion() {
            if let Some(completed) = self.completed_deletions.as_deref_mut() {
                completed.insert(*op);
            }
        }
    }
}

// ============================================================================
// RR-Tree
// ============================================================================

/// A disk-resident R-tree whose updates go through an in-memory buffer.
///
/// Insertions and deletions are buffered, cancelling each other out where
/// they meet, and pushed down the tree in batches when the buffer fills up.
/// Queries see the union of the disk and the buffer. Leaves a query visits
/// anyway pick up the buffered operations that fit them, so part of the
/// buffer drains at no extra I/O.
///
/// Objects are identified by id. The tree remembers the current extent of
/// every id, so inserting a known id moves the object and removing it needs
/// only the id.
///
/// The tree is single-threaded: every mutator takes `&mut self`.
///
/// # Examples
///
/// ```no_run
/// use rr_tree::{BoundingBox, DataObject, RRTree, RRTreeConfig};
///
/// let mut tree = RRTree::create("points.rrt", RRTreeConfig::default())?;
/// tree.insert(DataObject::new(1, BoundingBox::point(3.0, 4.0)))?;
/// let hits = tree.query(&BoundingBox::new(0.0, 0.0, 5.0, 5.0))?;
/// assert_eq!(hits.len(), 1);
/// tree.close()?;
/// # Ok::<(), rr_tree::RRTreeError>(())
/// ```
pub struct RRTree<T: ObjectTracer = NullObjectTracer> {
    disk: RRDiskDataTree,
    buffer: RRTreeBuffer,
    stats: RRTreeStats,
    tracer: T,
    config: RRTreeConfig,
    group_maker: Box<dyn OperationGroupMaker>,
    /// Current extent of every stored object, buffered updates included
    extents: HashMap<ObjectId, BoundingBox>,
    /// The next emptying pushes down the whole buffer
    force_full_emptying: bool,
    /// Set when the last update had to empty the buffer
    buffer_emptied: bool,
    closed: bool,
}

impl RRTree<NullObjectTracer> {
    /// Creates a new tree file at `path`, replacing any existing one.
    pub fn create(path: impl AsRef<Path>, config: RRTreeConfig) -> RRTreeResult<Self> {
        Self::with_tracer(path, config, NullObjectTracer)
    }

    /// Opens an existing tree file. The node capacities in `config` must
    /// match the ones the file was created with.
    pub fn open(path: impl AsRef<Path>, config: RRTreeConfig) -> RRTreeResult<Self> {
        Self::open_with_tracer(path, config, NullObjectTracer)
    }
}

impl<T: ObjectTracer> RRTree<T> {
    /// Creates a new tree file at `path` that reports to `tracer`.
    pub fn with_tracer(path: impl AsRef<Path>, config: RRTreeConfig, tracer: T) -> RRTreeResult<Self> {
        config.validate()?;
        let disk = RRDiskDataTree::create(
            path,
            config.min_node_capacity,
            config.max_node_capacity,
            config.cache_pages,
        )?;
        Self::assemble(disk, config, tracer)
    }

    pub fn open_with_tracer(path: impl AsRef<Path>, config: RRTreeConfig, tracer: T) -> RRTreeResult<Self> {
        config.validate()?;
        let disk = RRDiskDataTree::open(
            path,
            config.min_node_capacity,
            config.max_node_capacity,
            config.cache_pages,
        )?;
        Self::assemble(disk, config, tracer)
    }

    fn assemble(mut disk: RRDiskDataTree, config: RRTreeConfig, tracer: T) -> RRTreeResult<Self> {
        let mut extents = HashMap::with_capacity(disk.entry_count() as usize);
        for object in disk.all_objects()? {
            if let Some(previous) = extents.insert(object.id, object.bbox) {
                log::warn!(
                    "Object {} is stored at {} and {}, keeping the latter",
                    object.id,
                    previous,
                    object.bbox
                );
            }
        }

        log::debug!(
            "RR-tree ready with {} objects: buffer of {}, {:?} routing, {:?} push-down",
            extents.len(),
            config.max_buffer_size,
            config.group_maker,
            config.push_down
        );
        Ok(Self {
            disk,
            buffer: RRTreeBuffer::new(config.max_buffer_size),
            stats: RRTreeStats::new(),
            tracer,
            group_maker: config.group_maker.create(),
            config,
            extents,
            force_full_emptying: false,
            buffer_emptied: false,
            closed: false,
        })
    }

    fn ensure_open(&self) -> RRTreeResult<()> {
        if self.closed {
            return Err(RRTreeError::Closed);
        }
        Ok(())
    }

    // ========================================================================
    // Updates
    // ========================================================================

    /// Buffers an insertion of `object`. If the id is already stored at
    /// another extent, a deletion of that extent is buffered first, so the
    /// object moves. Inserting the stored value again changes nothing.
    pub fn insert(&mut self, object: DataObject) -> RRTreeResult<()> {
        self.ensure_open()?;
        self.buffer_emptied = false;
        match self.extents.get(&object.id).copied() {
            Some(stored) if stored == object.bbox => {
                log::trace!("Object {} is already stored at {}", object.id, stored);
                return Ok(());
            }
            Some(stored) => {
                log::trace!("Moving object {} from {} to {}", object.id, stored, object.bbox);
                self.buffer_update(Operation::deletion(DataObject::new(object.id, stored)))?;
            }
            None => {}
        }
        self.buffer_update(Operation::insertion(object))?;
        self.extents.insert(object.id, object.bbox);
        Ok(())
    }

    /// Buffers a deletion of the object stored under `object.id`, at its
    /// stored extent. Deleting an id that is not stored is not an error; it
    /// is counted as an unmatched deletion.
    pub fn remove(&mut self, object: DataObject) -> RRTreeResult<()> {
        self.ensure_open()?;
        self.buffer_emptied = false;
        let Some(stored) = self.extents.get(&object.id).copied() else {
            log::warn!("Ignoring deletion of object {}: it is not in the tree", object.id);
            self.stats.unmatched_deletions += 1;
            return Ok(());
        };
        self.buffer_update(Operation::deletion(DataObject::new(object.id, stored)))?;
        self.extents.remove(&object.id);
        Ok(())
    }

    fn buffer_update(&mut self, op: Operation) -> RRTreeResult<()> {
        if self.buffer.is_full() {
            self.empty_buffer()?;
            self.buffer_emptied = true;
        }

        self.tracer
            .trace_update_tree_entry(&op, TracePhase::InsertToBuffer, None);
        let annihilated = match op.kind() {
            OperationType::Insertion => self.buffer.insert_with_annihilation(*op.object())?,
            OperationType::Deletion => self.buffer.remove_with_annihilation(*op.object())?,
        };

        match annihilated {
            Some(earlier) => {
                self.tracer
                    .trace_update_tree_entry(&earlier, TracePhase::RemoveFromBuffer, None);
                self.stats.op_lifetimes.annihilate(&op, &earlier);
                match op.kind() {
                    OperationType::Insertion => self.stats.id_annihilations += 1,
                    OperationType::Deletion => self.stats.di_annihilations += 1,
                }
            }
            None => self.stats.op_lifetimes.start(&op),
        }
        match op.kind() {
            OperationType::Insertion => self.stats.insertions += 1,
            OperationType::Deletion => self.stats.deletions += 1,
        }
        self.stats.register_update();
        Ok(())
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Every object whose extent intersects `region`, buffered updates
    /// included.
    ///
    /// With query piggybacking on, buffered operations that fit a visited
    /// leaf are applied to it and leave the buffer.
    pub fn query(&mut self, region: &BoundingBox) -> RRTreeResult<Vec<DataObject>> {
        self.ensure_open()?;
        self.stats.queries += 1;

        let mut modifier: Box<dyn DiskNodeOnQueryModifier + '_> = if self.config.query_piggybacking {
            Box::new(LeafNodePiggybacker::new(&self.tracer))
        } else {
            Box::new(NullModifier)
        };

        let disk_results = {
            let buffer = &self.buffer;
            let stats = &mut self.stats;
            let mut visit = |node: &mut RRDiskNode| {
                modifier.modify(
                    node,
                    buffer,
                    stats,
                    false,
                    0.0,
                    &mut LeafPiggybackingInfo::new(),
                )
            };
            self.disk.query(region, &mut visit)?
        };

        let mut completer = OperationCompleter::new(&self.tracer, &mut self.stats.op_lifetimes, None);
        modifier.finalize_modifications(
            &mut self.buffer,
            &mut completer,
            &mut self.stats.query_piggybackings,
        );
        drop(modifier);

        // a moved object may still sit on disk at its old extent until its
        // buffered deletion lands, so results are keyed by value
        let mut results: IndexSet<DataObject> = IndexSet::with_capacity(disk_results.len());
        for object in disk_results {
            self.tracer
                .trace_object(&object, TracePhase::DataTreeQueryFirstLoop);
            results.insert(object);
        }

        for op in self.buffer.query_entry_of_any_type(region) {
            self.tracer
                .trace_update_tree_entry(&op, TracePhase::DataTreeQueryBufferLoop, None);
            match op.kind() {
                OperationType::Insertion => {
                    results.insert(*op.object());
                }
                OperationType::Deletion => {
                    results.shift_remove(op.object());
                }
            }
        }

        let results: Vec<DataObject> = results.into_iter().collect();
        for object in &results {
            self.tracer
                .trace_object(object, TracePhase::DataTreeQueryFinalLoop);
        }
        Ok(results)
    }

    // ========================================================================
    // Buffer Emptying
    // ========================================================================

    /// Pushes buffered operations down the tree to make room in the buffer.
    pub fn empty_buffer(&mut self) -> RRTreeResult<()> {
        self.ensure_open()?;
        let force = std::mem::take(&mut self.force_full_emptying);
        let emptier = BufferEmptier::new(
            &mut self.disk,
            &mut self.buffer,
            &mut self.stats,
            &self.tracer,
            &self.config,
            self.group_maker.as_mut(),
        );
        if force {
            emptier.empty_exhaustively()
        } else {
            emptier.empty()
        }
    }

    /// Pushes every buffered operation down the tree.
    pub fn forced_empty_buffer(&mut self) -> RRTreeResult<()> {
        self.force_full_emptying = true;
        self.empty_buffer()
    }

    /// Makes the next emptying, whatever triggers it, exhaustive.
    pub fn on_next_eb_force_full_emptying(&mut self) {
        self.force_full_emptying = true;
    }

    /// `true` if the last insert or remove had to empty the buffer first.
    pub fn was_buffer_emptied(&self) -> bool {
        self.buffer_emptied
    }

    /// Records the lifetimes of the operations still buffered. Meant for the
    /// end of a run, before the statistics are dumped.
    pub fn register_buffer_lifetimes(&mut self) {
        self.stats.op_lifetimes.register_buffer_lifetimes();
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn buffer(&self) -> &RRTreeBuffer {
        &self.buffer
    }

    pub fn stats(&self) -> &RRTreeStats {
        &self.stats
    }

    /// Clears the tree and routing statistics.
    pub fn reset_statistics(&mut self) {
        self.stats.reset();
        self.group_maker.reset_statistics();
    }

    pub fn disk_stats(&self) -> DiskTreeStats {
        self.disk.stats()
    }

    pub fn config(&self) -> &RRTreeConfig {
        &self.config
    }

    /// The routing policy, for its deletion-split histogram.
    pub fn group_maker(&self) -> &dyn OperationGroupMaker {
        self.group_maker.as_ref()
    }

    pub fn tracer(&self) -> &T {
        &self.tracer
    }

    pub fn tracer_mut(&mut self) -> &mut T {
        &mut self.tracer
    }

    pub fn set_query_piggybacking(&mut self, enabled: bool) {
        self.config.query_piggybacking = enabled;
    }

    /// Number of stored objects, buffered updates included.
    pub fn size(&self) -> u64 {
        self.extents.len() as u64
    }

    /// Current extent of the object stored under `id`.
    pub fn extent_of(&self, id: ObjectId) -> Option<BoundingBox> {
        self.extents.get(&id).copied()
    }

    /// Every object stored on disk, ignoring the buffer.
    pub fn disk_objects(&mut self) -> RRTreeResult<Vec<DataObject>> {
        self.ensure_open()?;
        self.disk.all_objects()
    }

    /// Verifies the structure of the disk tree, and that the disk with the
    /// buffer applied holds exactly one copy of every stored object.
    pub fn check_invariants(&mut self) -> RRTreeResult<()> {
        self.ensure_open()?;
        let pending = self.buffer.flatten();
        let superseded: HashSet<DataObject> = pending
            .iter()
            .filter(|op| op.is_deletion())
            .map(|op| *op.object())
            .collect();
        self.disk.check_invariants(&superseded)?;

        let mut contents: HashSet<DataObject> = self.disk.all_objects()?.into_iter().collect();
        for op in &pending {
            let applied = match op.kind() {
                OperationType::Insertion => contents.insert(*op.object()),
                OperationType::Deletion => contents.remove(op.object()),
            };
            if !applied {
                return Err(RRTreeError::Corrupted(format!(
                    "buffered {} of object {} at {} does not apply to the disk",
                    match op.kind() {
                        OperationType::Insertion => "insertion",
                        OperationType::Deletion => "deletion",
                    },
                    op.id(),
                    op.bbox()
                )));
            }
        }

        if contents.len() != self.extents.len()
            || contents
                .iter()
                .any(|object| self.extents.get(&object.id) != Some(&object.bbox))
        {
            return Err(RRTreeError::Corrupted(format!(
                "{} objects on disk and in the buffer, {} known extents",
                contents.len(),
                self.extents.len()
            )));
        }
        Ok(())
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Writes dirty pages and the header. Buffered operations stay buffered.
    pub fn flush(&mut self) -> RRTreeResult<()> {
        self.ensure_open()?;
        self.disk.flush()
    }

    /// Empties the whole buffer into the tree and flushes it. Every later
    /// call fails with [`RRTreeError::Closed`].
    pub fn close(&mut self) -> RRTreeResult<()> {
        self.ensure_open()?;
        self.forced_empty_buffer()?;
        self.disk.flush()?;
        self.closed = true;
        log::debug!(
            "Closed RR-tree with {} entries after {} emptyings",
            self.disk.entry_count(),
            self.stats.empty_buffers
        );
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl<T: ObjectTracer> Drop for RRTree<T> {
    fn drop(&mut self) {
        // Best effort flush on drop; the buffer itself is not persisted
        if !self.closed {
            if let Err(e) = self.disk.flush() {
                log::warn!("Failed to flush RR-tree on drop: {}", e);
            }
        }
    }
}

impl<T: ObjectTracer> std::fmt::Debug for RRTree<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RRTree")
            .field("buffer", &self.buffer)
            .field("entries", &self.disk.entry_count())
            .field("height", &self.disk.height())
            .field("closed", &self.closed)
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
