//! The contract a disk node exposes to the buffer subsystem.
//!
//! Piggybacking and operation grouping never see the concrete node type.
//! They work through [`DiskNode`], which is object safe so strategies can be
//! boxed and swapped at construction time.

use std::ops::{Deref, DerefMut};

use super::types::ChildEntry;
use crate::bounding_box::BoundingBox;
use crate::operation::{DataObject, Operation};
use crate::piggybacking_info::LeafPiggybackingInfo;

pub trait DiskNode {
    /// Tree level of this node; leaves are at level 0.
    fn level(&self) -> u32;

    fn is_leaf(&self) -> bool {
        self.level() == 0
    }

    /// Number of entries (data objects or children).
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn min_capacity(&self) -> usize;

    fn max_capacity(&self) -> usize;

    fn underflows(&self) -> bool {
        self.len() < self.min_capacity()
    }

    fn overflows(&self) -> bool {
        self.len() > self.max_capacity()
    }

    /// Minimum bounding box of the current entries, `None` when empty.
    fn compute_descriptor(&self) -> Option<BoundingBox>;

    /// Subset of `candidates` that may legally be applied to this node,
    /// ignoring occupancy bounds. Deletions must match a present entry, id
    /// and extent. Insertions must lie inside the node descriptor, or merely
    /// overlap it when `allow_overlap_only` is set, and must not already be
    /// present.
    fn select_fitting_operations(
        &self,
        candidates: &[Operation],
        allow_overlap_only: bool,
    ) -> Vec<Operation>;

    /// Builds the fast-lookup index over the current entries.
    ///
    /// # Panics
    ///
    /// If the index is already held.
    fn index_entries(&mut self);

    /// Drops the index built by [`DiskNode::index_entries`].
    ///
    /// # Panics
    ///
    /// If no index is held.
    fn delete_entry_index(&mut self);

    fn has_entry_index(&self) -> bool;

    /// `true` iff applying `op` adds an entry rather than removing one.
    fn operation_will_increase_node_size(&self, op: &Operation) -> bool;

    /// Caps the candidate counts in `info` to what the node can admit
    /// without leaving its occupancy bounds, and remembers the admitted
    /// quotas for the following execution. Releasing the entry index drops
    /// them.
    fn limit_number_of_operations(&mut self, info: &mut LeafPiggybackingInfo);

    /// Admits unbounded quotas for the following execution. For callers that
    /// split or merge the node afterwards.
    fn allow_reorganization(&mut self);

    /// Applies at most `max_increase` size-increasing and `max_decrease`
    /// size-decreasing operations from `candidates`, in order, and returns
    /// exactly the operations applied.
    ///
    /// # Panics
    ///
    /// If neither [`DiskNode::limit_number_of_operations`] nor
    /// [`DiskNode::allow_reorganization`] admitted quotas since the last
    /// execution, or if the quotas exceed the admitted ones.
    fn execute_constrained_subset_of_ops(
        &mut self,
        candidates: &[Operation],
        max_increase: usize,
        max_decrease: usize,
    ) -> Vec<Operation>;

    /// Applies every operation that can be applied, without quotas.
    /// Deletions remove the entry with the same id and extent and are
    /// skipped when there is none. Insertions of a value already present
    /// change nothing.
    fn execute_ops(&mut self, ops: &[Operation]) -> Vec<Operation>;

    /// Child needing the least area enlargement to cover `object`, ties
    /// broken by the smaller area. `None` for leaves and empty nodes.
    fn choose_subtree_by_object(&self, object: &DataObject) -> Option<ChildEntry>;

    /// Children whose region intersects `region`.
    fn query(&self, region: &BoundingBox) -> Vec<ChildEntry>;
}

/// Scoped hold on a node's entry index.
///
/// Acquiring builds the index, dropping the guard releases it, so every
/// early return in a modification pass leaves the node without an index.
pub struct EntryIndexGuard<'a> {
    node: &'a mut dyn DiskNode,
}

impl<'a> EntryIndexGuard<'a> {
    pub fn acquire(node: &'a mut dyn DiskNode) -> Self {
        node.index_entries();
        Self { node }
    }
}

impl<'a> Deref for EntryIndexGuard<'a> {
    type Target = dyn DiskNode + 'a;

    fn deref(&self) -> &Self::Target {
        &*self.node
    }
}

impl<'a> DerefMut for EntryIndexGuard<'a> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut *self.node
    }
}

impl Drop for EntryIndexGuard<'_> {
    fn drop(&mut self) {
        self.node.delete_entry_index();
    }
}
