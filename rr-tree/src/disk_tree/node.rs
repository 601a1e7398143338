//! The concrete node stored in each page.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::node_contract::DiskNode;
use super::types::{ChildEntry, PageId};
use crate::bounding_box::BoundingBox;
use crate::operation::{DataObject, Operation};
use crate::piggybacking_info::LeafPiggybackingInfo;

/// Entries of a node: data objects in leaves, child references above.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeEntries {
    Leaf(Vec<DataObject>),
    Internal(Vec<ChildEntry>),
}

/// Occupancy bounds attached to a node when it is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NodeCapacity {
    pub min: usize,
    pub max: usize,
    /// The root has no lower bound.
    pub is_root: bool,
}

impl NodeCapacity {
    pub fn new(min: usize, max: usize) -> Self {
        Self {
            min,
            max,
            is_root: false,
        }
    }

    fn lower_bound(&self) -> usize {
        if self.is_root {
            0
        } else {
            self.min
        }
    }
}

/// A leaf or internal node of the data tree.
///
/// Only the level and the entries are persisted. Capacity, the entry index
/// and the admitted quotas are transient state of one in-memory copy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RRDiskNode {
    level: u32,
    entries: NodeEntries,
    #[serde(skip)]
    capacity: NodeCapacity,
    #[serde(skip)]
    entry_index: Option<HashSet<DataObject>>,
    /// (size-increasing, size-decreasing) quotas admitted for the next
    /// constrained execution, unbounded in reorganization mode
    #[serde(skip)]
    admitted_quota: Option<(usize, usize)>,
}

impl PartialEq for RRDiskNode {
    fn eq(&self, other: &Self) -> bool {
        self.level == other.level && self.entries == other.entries
    }
}

impl RRDiskNode {
    pub fn new_leaf(objects: Vec<DataObject>) -> Self {
        Self {
            level: 0,
            entries: NodeEntries::Leaf(objects),
            capacity: NodeCapacity::default(),
            entry_index: None,
            admitted_quota: None,
        }
    }

    pub fn new_internal(level: u32, children: Vec<ChildEntry>) -> Self {
        debug_assert!(level > 0, "internal nodes live above the leaves");
        Self {
            level,
            entries: NodeEntries::Internal(children),
            capacity: NodeCapacity::default(),
            entry_index: None,
            admitted_quota: None,
        }
    }

    pub fn with_capacity(mut self, capacity: NodeCapacity) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn set_capacity(&mut self, capacity: NodeCapacity) {
        self.capacity = capacity;
    }

    pub fn capacity(&self) -> NodeCapacity {
        self.capacity
    }

    pub fn entries(&self) -> &NodeEntries {
        &self.entries
    }

    pub fn into_entries(self) -> NodeEntries {
        self.entries
    }

    /// Data objects of a leaf; empty for internal nodes.
    pub fn objects(&self) -> &[DataObject] {
        match &self.entries {
            NodeEntries::Leaf(objects) => objects,
            NodeEntries::Internal(_) => &[],
        }
    }

    /// Children of an internal node; empty for leaves.
    pub fn children(&self) -> &[ChildEntry] {
        match &self.entries {
            NodeEntries::Leaf(_) => &[],
            NodeEntries::Internal(children) => children,
        }
    }

    pub fn child(&self, page_id: PageId) -> Option<&ChildEntry> {
        self.children().iter().find(|c| c.page_id == page_id)
    }

    pub fn remove_child(&mut self, page_id: PageId) -> Option<ChildEntry> {
        if let NodeEntries::Internal(children) = &mut self.entries {
            let pos = children.iter().position(|c| c.page_id == page_id)?;
            return Some(children.remove(pos));
        }
        None
    }

    /// Replaces the entry pointing at `page_id` with `replacement`.
    /// Returns `false` if there is no such child.
    pub fn replace_child(&mut self, page_id: PageId, replacement: Vec<ChildEntry>) -> bool {
        if let NodeEntries::Internal(children) = &mut self.entries {
            if let Some(pos) = children.iter().position(|c| c.page_id == page_id) {
                children.splice(pos..=pos, replacement);
                return true;
            }
        }
        false
    }

    pub fn update_child_bbox(&mut self, page_id: PageId, bbox: BoundingBox) -> bool {
        if let NodeEntries::Internal(children) = &mut self.entries {
            if let Some(child) = children.iter_mut().find(|c| c.page_id == page_id) {
                child.bbox = bbox;
                return true;
            }
        }
        false
    }

    /// Moves all entries of `other` into this node. Both nodes must be at
    /// the same level.
    pub fn absorb(&mut self, other: RRDiskNode) {
        debug_assert_eq!(self.level, other.level);
        match (&mut self.entries, other.entries) {
            (NodeEntries::Leaf(mine), NodeEntries::Leaf(theirs)) => mine.extend(theirs),
            (NodeEntries::Internal(mine), NodeEntries::Internal(theirs)) => mine.extend(theirs),
            _ => debug_assert!(false, "cannot merge a leaf with an internal node"),
        }
        if self.entry_index.is_some() {
            let objects = self.objects().to_vec();
            if let Some(index) = &mut self.entry_index {
                index.extend(objects);
            }
        }
    }

    /// Drops transient state before the node goes back to the page cache.
    pub(crate) fn clear_transient_state(&mut self) {
        debug_assert!(self.entry_index.is_none(), "entry index still held");
        self.entry_index = None;
        self.admitted_quota = None;
    }

    /// `true` if the leaf stores exactly `object`, id and extent.
    fn contains_object(&self, object: &DataObject) -> bool {
        match &self.entry_index {
            Some(index) => index.contains(object),
            None => self.objects().contains(object),
        }
    }

    fn remove_object(&mut self, object: &DataObject) -> bool {
        let NodeEntries::Leaf(objects) = &mut self.entries else {
            return false;
        };
        match objects.iter().position(|o| o == object) {
            Some(pos) => {
                objects.swap_remove(pos);
                if let Some(index) = &mut self.entry_index {
                    index.remove(object);
                }
                true
            }
            None => false,
        }
    }

    /// Stores `object` unless the exact same value is already there. Another
    /// extent of the same id is left alone; its pending deletion removes it.
    fn add_object(&mut self, object: DataObject) {
        if self.contains_object(&object) {
            return;
        }
        if let NodeEntries::Leaf(objects) = &mut self.entries {
            objects.push(object);
            if let Some(index) = &mut self.entry_index {
                index.insert(object);
            }
        }
    }

    fn does_operation_fit(
        &self,
        descriptor: Option<&BoundingBox>,
        op: &Operation,
        allow_overlap_only: bool,
    ) -> bool {
        if op.is_deletion() {
            return self.contains_object(op.object());
        }
        let Some(descriptor) = descriptor else {
            return false;
        };
        let spatially_fits = descriptor.contains(op.bbox())
            || (allow_overlap_only && descriptor.intersects(op.bbox()));
        spatially_fits && !self.contains_object(op.object())
    }
}

impl DiskNode for RRDiskNode {
    fn level(&self) -> u32 {
        self.level
    }

    fn len(&self) -> usize {
        match &self.entries {
            NodeEntries::Leaf(objects) => objects.len(),
            NodeEntries::Internal(children) => children.len(),
        }
    }

    fn min_capacity(&self) -> usize {
        self.capacity.lower_bound()
    }

    fn max_capacity(&self) -> usize {
        self.capacity.max
    }

    fn compute_descriptor(&self) -> Option<BoundingBox> {
        match &self.entries {
            NodeEntries::Leaf(objects) => BoundingBox::union_all(objects.iter().map(|o| &o.bbox)),
            NodeEntries::Internal(children) => {
                BoundingBox::union_all(children.iter().map(|c| &c.bbox))
            }
        }
    }

    fn select_fitting_operations(
        &self,
        candidates: &[Operation],
        allow_overlap_only: bool,
    ) -> Vec<Operation> {
        if !self.is_leaf() {
            return Vec::new();
        }
        let descriptor = self.compute_descriptor();
        candidates
            .iter()
            .filter(|op| self.does_operation_fit(descriptor.as_ref(), op, allow_overlap_only))
            .copied()
            .collect()
    }

    fn index_entries(&mut self) {
        assert!(
            self.entry_index.is_none(),
            "entry index acquired twice on a level {} node",
            self.level
        );
        self.entry_index = Some(self.objects().iter().copied().collect());
    }

    fn delete_entry_index(&mut self) {
        assert!(
            self.entry_index.take().is_some(),
            "entry index released without being acquired"
        );
        // quotas are admitted for one modification pass
        self.admitted_quota = None;
    }

    fn has_entry_index(&self) -> bool {
        self.entry_index.is_some()
    }

    fn operation_will_increase_node_size(&self, op: &Operation) -> bool {
        op.is_insertion() || !self.contains_object(op.object())
    }

    fn limit_number_of_operations(&mut self, info: &mut LeafPiggybackingInfo) {
        let len = self.len();
        let increase_room = self.max_capacity().saturating_sub(len);
        let decrease_room = len.saturating_sub(self.min_capacity());

        let excess_increasing = info.num_of_size_increasing_ops().saturating_sub(increase_room);
        let excess_decreasing = info.num_of_size_decreasing_ops().saturating_sub(decrease_room);
        info.limit_size_increasing_ops(excess_increasing);
        info.limit_size_decreasing_ops(excess_decreasing);

        self.admitted_quota = Some((
            info.num_of_size_increasing_ops(),
            info.num_of_size_decreasing_ops(),
        ));
    }

    fn allow_reorganization(&mut self) {
        self.admitted_quota = Some((usize::MAX, usize::MAX));
    }

    fn execute_constrained_subset_of_ops(
        &mut self,
        candidates: &[Operation],
        max_increase: usize,
        max_decrease: usize,
    ) -> Vec<Operation> {
        let Some((admitted_increase, admitted_decrease)) = self.admitted_quota.take() else {
            panic!(
                "constrained execution on a level {} node without admitted quotas",
                self.level
            );
        };
        assert!(
            max_increase <= admitted_increase && max_decrease <= admitted_decrease,
            "quotas (+{}, -{}) exceed the admitted (+{}, -{})",
            max_increase,
            max_decrease,
            admitted_increase,
            admitted_decrease
        );

        let mut remaining_increase = max_increase;
        let mut remaining_decrease = max_decrease;
        let mut executed = Vec::new();
        for op in candidates {
            if remaining_increase == 0 && remaining_decrease == 0 {
                break;
            }
            if op.is_deletion() {
                if remaining_decrease > 0 && self.remove_object(op.object()) {
                    remaining_decrease -= 1;
                    executed.push(*op);
                }
            } else if remaining_increase > 0 && !self.contains_object(op.object()) {
                self.add_object(*op.object());
                remaining_increase -= 1;
                executed.push(*op);
            }
        }
        executed
    }

    fn execute_ops(&mut self, ops: &[Operation]) -> Vec<Operation> {
        if !self.is_leaf() {
            return Vec::new();
        }
        let mut executed = Vec::with_capacity(ops.len());
        for op in ops {
            if op.is_deletion() {
                if self.remove_object(op.object()) {
                    executed.push(*op);
                }
            } else {
                self.add_object(*op.object());
                executed.push(*op);
            }
        }
        executed
    }

    fn choose_subtree_by_object(&self, object: &DataObject) -> Option<ChildEntry> {
        let mut best: Option<(&ChildEntry, f64, f64)> = None;
        for child in self.children() {
            let enlargement = child.bbox.enlargement(&object.bbox);
            let area = child.bbox.area();
            let better = match best {
                None => true,
                Some((_, best_enlargement, best_area)) => {
                    enlargement < best_enlargement
                        || (enlargement == best_enlargement && area < best_area)
                }
            };
            if better {
                best = Some((child, enlargement, area));
            }
        }
        best.map(|(child, _, _)| *child)
    }

    fn query(&self, region: &BoundingBox) -> Vec<ChildEntry> {
        self.children()
            .iter()
            .filter(|c| c.bbox.intersects(region))
            .copied()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk_tree::node_contract::EntryIndexGuard;

    fn object(id: u64, x: f64, y: f64) -> DataObject {
        DataObject::new(id, BoundingBox::new(x, y, x + 1.0, y + 1.0))
    }

    fn leaf(ids: &[u64], min: usize, max: usize) -> RRDiskNode {
        let objects = ids.iter().map(|&id| object(id, id as f64, id as f64)).collect();
        RRDiskNode::new_leaf(objects).with_capacity(NodeCapacity::new(min, max))
    }

    #[test]
    fn test_descriptor() {
        let node = leaf(&[1, 3], 1, 4);
        assert_eq!(node.compute_descriptor(), Some(BoundingBox::new(1.0, 1.0, 4.0, 4.0)));
        assert_eq!(RRDiskNode::new_leaf(vec![]).compute_descriptor(), None);
    }

    #[test]
    fn test_select_fitting_operations() {
        let node = leaf(&[1, 5], 1, 4);
        let candidates = vec![
            Operation::deletion(object(1, 1.0, 1.0)),
            Operation::deletion(object(2, 2.0, 2.0)),
            Operation::insertion(object(3, 3.0, 3.0)),
            Operation::insertion(object(4, 5.5, 5.5)),
            Operation::insertion(object(5, 5.0, 5.0)),
        ];

        let fitting = node.select_fitting_operations(&candidates, false);
        let ids: Vec<_> = fitting.iter().map(|op| op.to_string()).collect();
        assert_eq!(ids, vec!["-1", "+3"]);

        let fitting = node.select_fitting_operations(&candidates, true);
        let ids: Vec<_> = fitting.iter().map(|op| op.to_string()).collect();
        assert_eq!(ids, vec!["-1", "+3", "+4"]);
    }

    #[test]
    fn test_internal_node_fits_nothing() {
        let node = RRDiskNode::new_internal(1, vec![ChildEntry::new(BoundingBox::new(0.0, 0.0, 9.0, 9.0), 2)]);
        let candidates = vec![Operation::insertion(object(3, 3.0, 3.0))];
        assert!(node.select_fitting_operations(&candidates, true).is_empty());
    }

    #[test]
    fn test_operation_will_increase_node_size() {
        let node = leaf(&[1], 1, 4);
        assert!(node.operation_will_increase_node_size(&Operation::insertion(object(9, 0.0, 0.0))));
        assert!(!node.operation_will_increase_node_size(&Operation::deletion(object(1, 1.0, 1.0))));
        assert!(node.operation_will_increase_node_size(&Operation::deletion(object(2, 1.0, 1.0))));
    }

    #[test]
    fn test_limit_at_max_capacity_defers_insertions() {
        let mut node = leaf(&[1, 2, 3, 4], 2, 4);
        let mut info = LeafPiggybackingInfo::new();
        info.add_potential_size_increasing_op();
        info.add_potential_size_decreasing_op();

        node.limit_number_of_operations(&mut info);
        assert_eq!(info.num_of_size_increasing_ops(), 0);
        assert_eq!(info.num_of_size_decreasing_ops(), 1);
        assert_eq!(info.unpiggybackable_size_increasing_ops(), 1);
        assert_eq!(info.unpiggybackable_size_decreasing_ops(), 0);
    }

    #[test]
    fn test_limit_at_min_capacity_defers_deletions() {
        let mut node = leaf(&[1, 2], 2, 4);
        let mut info = LeafPiggybackingInfo::new();
        info.add_potential_size_decreasing_op();
        info.add_potential_size_decreasing_op();
        info.add_potential_size_increasing_op();

        node.limit_number_of_operations(&mut info);
        assert_eq!(info.num_of_size_decreasing_ops(), 0);
        assert_eq!(info.unpiggybackable_size_decreasing_ops(), 2);
        assert_eq!(info.num_of_size_increasing_ops(), 1);
    }

    #[test]
    fn test_root_has_no_lower_bound() {
        let mut node = leaf(&[1], 2, 4);
        node.set_capacity(NodeCapacity {
            min: 2,
            max: 4,
            is_root: true,
        });
        assert!(!node.underflows());

        let mut info = LeafPiggybackingInfo::new();
        info.add_potential_size_decreasing_op();
        node.limit_number_of_operations(&mut info);
        assert_eq!(info.num_of_size_decreasing_ops(), 1);
    }

    #[test]
    fn test_constrained_execution_respects_quotas() {
        let mut node = leaf(&[1, 2, 3], 1, 4);
        node.allow_reorganization();
        let candidates = vec![
            Operation::insertion(object(10, 1.0, 1.0)),
            Operation::insertion(object(11, 1.0, 1.0)),
            Operation::deletion(object(1, 1.0, 1.0)),
            Operation::deletion(object(2, 2.0, 2.0)),
        ];
        let executed = node.execute_constrained_subset_of_ops(&candidates, 1, 1);
        let names: Vec<_> = executed.iter().map(|op| op.to_string()).collect();
        assert_eq!(names, vec!["+10", "-1"]);
        assert_eq!(node.len(), 3);
    }

    #[test]
    #[should_panic(expected = "exceed the admitted")]
    fn test_constrained_execution_beyond_admission_panics() {
        let mut node = leaf(&[1, 2, 3, 4], 2, 4);
        let mut info = LeafPiggybackingInfo::new();
        info.add_potential_size_increasing_op();
        node.limit_number_of_operations(&mut info);

        node.execute_constrained_subset_of_ops(&[Operation::insertion(object(9, 1.0, 1.0))], 1, 0);
    }

    #[test]
    #[should_panic(expected = "without admitted quotas")]
    fn test_constrained_execution_without_admission_panics() {
        let mut node = leaf(&[1, 2], 1, 2);
        let candidates = [
            Operation::insertion(object(7, 1.0, 1.0)),
            Operation::insertion(object(8, 1.0, 1.0)),
            Operation::insertion(object(9, 1.0, 1.0)),
        ];
        node.execute_constrained_subset_of_ops(&candidates, 10, 10);
    }

    #[test]
    #[should_panic(expected = "without admitted quotas")]
    fn test_admitted_quotas_end_with_the_pass() {
        let mut node = leaf(&[1, 2], 1, 4);
        {
            let mut guard = EntryIndexGuard::acquire(&mut node);
            let mut info = LeafPiggybackingInfo::new();
            info.add_potential_size_increasing_op();
            guard.limit_number_of_operations(&mut info);
        }
        node.execute_constrained_subset_of_ops(&[Operation::insertion(object(9, 1.0, 1.0))], 1, 0);
    }

    #[test]
    fn test_reorganization_lifts_quotas_once() {
        let mut node = leaf(&[1, 2], 1, 2);
        node.allow_reorganization();
        let executed = node.execute_constrained_subset_of_ops(
            &[Operation::insertion(object(7, 1.0, 1.0))],
            usize::MAX,
            usize::MAX,
        );
        assert_eq!(executed.len(), 1);
        assert!(node.overflows());
        assert_eq!(node.admitted_quota, None);
    }

    #[test]
    fn test_execute_ops_matches_exact_objects() {
        let mut node = leaf(&[1, 2], 1, 4);
        let moved = DataObject::new(1, BoundingBox::new(7.0, 7.0, 8.0, 8.0));
        let executed = node.execute_ops(&[
            Operation::insertion(moved),
            Operation::deletion(object(42, 0.0, 0.0)),
            // id 2 is stored at another extent
            Operation::deletion(object(2, 9.0, 9.0)),
            Operation::deletion(object(1, 1.0, 1.0)),
        ]);

        assert_eq!(executed.len(), 2);
        assert_eq!(node.len(), 2);
        assert!(node.objects().contains(&moved));
        assert!(node.objects().contains(&object(2, 2.0, 2.0)));
    }

    #[test]
    fn test_insertion_keeps_other_extent_of_same_id() {
        let mut node = leaf(&[1], 1, 4);
        let moved = DataObject::new(1, BoundingBox::new(1.5, 1.5, 2.0, 2.0));
        assert_eq!(node.execute_ops(&[Operation::insertion(moved)]).len(), 1);
        assert_eq!(node.len(), 2);

        // the same value again is a no-op
        node.execute_ops(&[Operation::insertion(moved)]);
        assert_eq!(node.len(), 2);
    }

    #[test]
    fn test_entry_index_guard_releases_on_drop() {
        let mut node = leaf(&[1, 2], 1, 4);
        {
            let guard = EntryIndexGuard::acquire(&mut node);
            assert!(guard.has_entry_index());
            assert!(!guard.operation_will_increase_node_size(&Operation::deletion(object(2, 2.0, 2.0))));
            assert!(guard.operation_will_increase_node_size(&Operation::deletion(object(2, 0.0, 0.0))));
        }
        assert!(!node.has_entry_index());
    }

    #[test]
    #[should_panic(expected = "acquired twice")]
    fn test_double_acquire_panics() {
        let mut node = leaf(&[1], 1, 4);
        node.index_entries();
        node.index_entries();
    }

    #[test]
    #[should_panic(expected = "without being acquired")]
    fn test_release_without_acquire_panics() {
        let mut node = leaf(&[1], 1, 4);
        node.delete_entry_index();
    }

    #[test]
    fn test_index_tracks_mutations() {
        let mut node = leaf(&[1], 1, 4);
        node.index_entries();
        node.execute_ops(&[Operation::insertion(object(5, 1.0, 1.0)), Operation::deletion(object(1, 1.0, 1.0))]);
        assert!(node.contains_object(&object(5, 1.0, 1.0)));
        assert!(!node.contains_object(&object(1, 1.0, 1.0)));
        node.delete_entry_index();
    }

    #[test]
    fn test_choose_subtree_by_object() {
        let node = RRDiskNode::new_internal(
            1,
            vec![
                ChildEntry::new(BoundingBox::new(0.0, 0.0, 10.0, 10.0), 2),
                ChildEntry::new(BoundingBox::new(20.0, 20.0, 30.0, 30.0), 3),
                ChildEntry::new(BoundingBox::new(0.0, 0.0, 5.0, 5.0), 4),
            ],
        );
        let near_second = DataObject::new(1, BoundingBox::point(31.0, 31.0));
        assert_eq!(node.choose_subtree_by_object(&near_second).unwrap().page_id, 3);

        // both 2 and 4 contain it; 4 has the smaller area
        let inside_both = DataObject::new(2, BoundingBox::point(1.0, 1.0));
        assert_eq!(node.choose_subtree_by_object(&inside_both).unwrap().page_id, 4);

        assert!(leaf(&[1], 1, 4).choose_subtree_by_object(&inside_both).is_none());
    }

    #[test]
    fn test_child_editing() {
        let mut node = RRDiskNode::new_internal(
            1,
            vec![
                ChildEntry::new(BoundingBox::new(0.0, 0.0, 1.0, 1.0), 2),
                ChildEntry::new(BoundingBox::new(5.0, 5.0, 6.0, 6.0), 3),
            ],
        );
        assert_eq!(node.query(&BoundingBox::new(4.0, 4.0, 5.0, 5.0)).len(), 1);

        assert!(node.replace_child(
            2,
            vec![
                ChildEntry::new(BoundingBox::new(0.0, 0.0, 0.5, 0.5), 2),
                ChildEntry::new(BoundingBox::new(0.5, 0.5, 1.0, 1.0), 7),
            ]
        ));
        assert_eq!(node.len(), 3);
        assert!(node.update_child_bbox(7, BoundingBox::new(0.6, 0.6, 1.0, 1.0)));
        assert_eq!(node.remove_child(3).unwrap().page_id, 3);
        assert!(node.child(3).is_none());
        assert_eq!(node.len(), 2);
    }

    #[test]
    fn test_absorb() {
        let mut a = leaf(&[1, 2], 1, 4);
        let b = leaf(&[3], 1, 4);
        a.absorb(b);
        assert_eq!(a.len(), 3);
    }
}
