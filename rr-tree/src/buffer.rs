//! In-memory operation buffer.
//!
//! Pending operations live in an `rstar` R-tree keyed by the extent of their
//! object, plus a hash index over the operation values for exact removal.
//! Lookups return owned copies; no caller ever holds a reference into the
//! buffer while it is being mutated.

use std::collections::HashSet;

use rstar::{RTree, RTreeObject, AABB};

use crate::bounding_box::BoundingBox;
use crate::errors::{RRTreeError, RRTreeResult};
use crate::operation::{DataObject, Operation, OperationType};

impl RTreeObject for Operation {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.bbox().to_envelope()
    }
}

/// The narrow buffer interface used by piggybacking.
pub trait OperationBuffer {
    /// All buffered operations, of either kind, whose extent intersects
    /// `region`.
    fn query_entry_of_any_type(&self, region: &BoundingBox) -> Vec<Operation>;

    /// Removes exactly `op` (same kind and object value) and returns the
    /// stored record.
    fn remove_exact_entry(&mut self, op: &Operation) -> Option<Operation>;
}

/// Bounded set of outstanding operations.
///
/// Each operation value is stored at most once. An object whose extent
/// changed has a deletion of the old extent next to an insertion of the new
/// one.
pub struct RRTreeBuffer {
    tree: RTree<Operation>,
    members: HashSet<Operation>,
    max_size: usize,
    id_annihilations: u64,
    di_annihilations: u64,
}

impl RRTreeBuffer {
    pub fn new(max_size: usize) -> Self {
        Self {
            tree: RTree::new(),
            members: HashSet::new(),
            max_size,
            id_annihilations: 0,
            di_annihilations: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.members.len() >= self.max_size
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Number of insertions that annihilated a buffered deletion.
    pub fn id_annihilations(&self) -> u64 {
        self.id_annihilations
    }

    /// Number of deletions that annihilated a buffered insertion.
    pub fn di_annihilations(&self) -> u64 {
        self.di_annihilations
    }

    /// `(insert-deletes, delete-inserts)` annihilation counts.
    pub fn annihilations(&self) -> (u64, u64) {
        (self.id_annihilations, self.di_annihilations)
    }

    pub fn contains(&self, op: &Operation) -> bool {
        self.members.contains(op)
    }

    /// Buffers an insertion of `object`, cancelling a pending deletion of the
    /// same object value if there is one. Returns the annihilated deletion.
    pub fn insert_with_annihilation(&mut self, object: DataObject) -> RRTreeResult<Option<Operation>> {
        self.add_with_annihilation(Operation::insertion(object))
    }

    /// Buffers a deletion of `object`, cancelling a pending insertion of the
    /// same object value if there is one. Returns the annihilated insertion.
    pub fn remove_with_annihilation(&mut self, object: DataObject) -> RRTreeResult<Option<Operation>> {
        self.add_with_annihilation(Operation::deletion(object))
    }

    fn add_with_annihilation(&mut self, op: Operation) -> RRTreeResult<Option<Operation>> {
        if self.is_full() {
            return Err(RRTreeError::BufferOverflow {
                capacity: self.max_size,
            });
        }

        if let Some(earlier) = self.remove_exact_entry(&op.opposite()) {
            match op.kind() {
                OperationType::Insertion => self.id_annihilations += 1,
                OperationType::Deletion => self.di_annihilations += 1,
            }
            return Ok(Some(earlier));
        }

        if !self.members.contains(&op) {
            self.insert_entry(op);
        }
        Ok(None)
    }

    /// Stores `op` without annihilation or capacity checks. Used when putting
    /// operations back after a flush could not apply them.
    pub fn insert_entry(&mut self, op: Operation) {
        debug_assert!(!self.members.contains(&op), "duplicate buffer entry {}", op);
        self.members.insert(op);
        self.tree.insert(op);
    }

    /// Stores `op` unless an identical operation is already buffered.
    pub fn add_entry_if_not_exists(&mut self, op: Operation) -> bool {
        if self.members.contains(&op) {
            return false;
        }
        self.insert_entry(op);
        true
    }

    /// Buffered insertions intersecting `region`.
    pub fn query_insertions(&self, region: &BoundingBox) -> Vec<Operation> {
        self.tree
            .locate_in_envelope_intersecting(&region.to_envelope())
            .filter(|op| op.is_insertion())
            .copied()
            .collect()
    }

    /// Every buffered operation, in no particular order.
    pub fn flatten(&self) -> Vec<Operation> {
        self.tree.iter().copied().collect()
    }

    /// Removes and returns every buffered operation.
    pub fn drain(&mut self) -> Vec<Operation> {
        let all = self.flatten();
        self.clear();
        all
    }

    /// Removes every operation of `group` that is still buffered.
    pub fn remove_group<'a, I>(&mut self, group: I)
    where
        I: IntoIterator<Item = &'a Operation>,
    {
        for op in group {
            self.remove_exact_entry(op);
        }
    }

    /// Removes and returns all buffered deletions.
    pub fn remove_all_deletions(&mut self) -> Vec<Operation> {
        let deletions: Vec<Operation> = self
            .members
            .iter()
            .filter(|op| op.is_deletion())
            .copied()
            .collect();
        for op in &deletions {
            self.remove_exact_entry(op);
        }
        deletions
    }

    pub fn clear(&mut self) {
        self.tree = RTree::new();
        self.members.clear();
    }
}

impl OperationBuffer for RRTreeBuffer {
    fn query_entry_of_any_type(&self, region: &BoundingBox) -> Vec<Operation> {
        self.tree
            .locate_in_envelope_intersecting(&region.to_envelope())
            .copied()
            .collect()
    }

    fn remove_exact_entry(&mut self, op: &Operation) -> Option<Operation> {
        let stored = self.members.take(op)?;
        let removed = self.tree.remove(&stored);
        debug_assert!(removed.is_some(), "buffer index out of sync for {}", stored);
        Some(stored)
    }
}

impl std::fmt::Debug for RRTreeBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RRTreeBuffer")
            .field("len", &self.len())
            .field("max_size", &self.max_size)
            .field("id_annihilations", &self.id_annihilations)
            .field("di_annihilations", &self.di_annihilations)
            .finish()
    }
}
