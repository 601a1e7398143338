//! Routing of buffered operations to the children of an index node.
//!
//! Insertions always go to the best-fit child. The policies differ only in
//! how deletions are routed:
//!
//! | policy                    | deletions go to                              |
//! |---------------------------|----------------------------------------------|
//! | [`TrivialGroupMaker`]     | every child overlapping and containing them  |
//! | [`DeletionsAsInsertions`] | the best-fit child                           |
//! | [`InsertionsOnly`]        | the orphan bucket                            |

mod deletions_as_insertions;
mod insertions_only;
mod trivial;

use indexmap::map::IndexMap;

use crate::config::GroupMakerKind;
use crate::disk_tree::{ChildEntry, DiskNode, PageId};
use crate::errors::{RRTreeError, RRTreeResult};
use crate::operation::Operation;
use crate::stats::StatisticalData;

pub use deletions_as_insertions::DeletionsAsInsertions;
pub use insertions_only::InsertionsOnly;
pub use trivial::TrivialGroupMaker;

/// Destination of a routed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GroupKey {
    Child(PageId),
    /// Operations that match no child
    Orphan,
}

/// Operations grouped by destination, in first-routed order.
#[derive(Debug, Clone, Default)]
pub struct IndexEntryOpGroupMap {
    groups: IndexMap<GroupKey, Vec<Operation>>,
}

impl IndexEntryOpGroupMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, key: GroupKey, op: Operation) {
        self.groups.entry(key).or_default().push(op);
    }

    pub fn get(&self, key: GroupKey) -> Option<&[Operation]> {
        self.groups.get(&key).map(Vec::as_slice)
    }

    pub fn orphans(&self) -> &[Operation] {
        self.get(GroupKey::Orphan).unwrap_or_default()
    }

    /// Removes and returns the orphan bucket.
    pub fn take_orphans(&mut self) -> Vec<Operation> {
        self.groups.shift_remove(&GroupKey::Orphan).unwrap_or_default()
    }

    /// Child groups in routing order, orphans excluded.
    pub fn child_groups(&self) -> impl Iterator<Item = (PageId, &[Operation])> {
        self.groups.iter().filter_map(|(key, ops)| match key {
            GroupKey::Child(page_id) => Some((*page_id, ops.as_slice())),
            GroupKey::Orphan => None,
        })
    }

    /// Consumes the map into its child groups, orphans excluded.
    pub fn into_child_groups(self) -> impl Iterator<Item = (PageId, Vec<Operation>)> {
        self.groups.into_iter().filter_map(|(key, ops)| match key {
            GroupKey::Child(page_id) => Some((page_id, ops)),
            GroupKey::Orphan => None,
        })
    }

    /// Keeps only the child groups with the most operations, ties included.
    /// The orphan bucket is left alone. Returns the removed groups.
    pub fn retain_largest_groups(&mut self) -> Vec<(PageId, Vec<Operation>)> {
        let largest = self.child_groups().map(|(_, ops)| ops.len()).max().unwrap_or(0);
        let mut removed = Vec::new();
        self.groups.retain(|key, ops| match key {
            GroupKey::Child(page_id) if ops.len() < largest => {
                removed.push((*page_id, std::mem::take(ops)));
                false
            }
            _ => true,
        });
        removed
    }

    /// Number of buckets, the orphan bucket included.
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Number of operation placements over all buckets. A deletion fanned
    /// out to several children counts once per child.
    pub fn total_operations(&self) -> usize {
        self.groups.values().map(Vec::len).sum()
    }
}

/// A deletion routing policy.
pub trait OperationGroupMaker {
    /// Children a deletion is sent to. An empty result orphans it.
    /// Implementations record the fan-out in the deletion-split histogram.
    fn route_deletion(&mut self, node: &dyn DiskNode, op: &Operation) -> Vec<ChildEntry>;

    /// Histogram of deletion fan-out to number of deletions.
    fn deletion_splits(&self) -> &StatisticalData;

    fn reset_statistics(&mut self);

    /// Routes `ops` to the children of `node`. Insertions go to the best-fit
    /// child, deletions as the policy decides. Operations matching no child
    /// end up in the orphan bucket.
    fn group_operations(
        &mut self,
        node: &dyn DiskNode,
        ops: Vec<Operation>,
    ) -> RRTreeResult<IndexEntryOpGroupMap> {
        if node.is_leaf() {
            return Err(RRTreeError::InvalidOperation(
                "cannot group operations at a leaf".into(),
            ));
        }

        let mut groups = IndexEntryOpGroupMap::new();
        for op in ops {
            if op.is_insertion() {
                match node.choose_subtree_by_object(op.object()) {
                    Some(child) => groups.add(GroupKey::Child(child.page_id), op),
                    None => groups.add(GroupKey::Orphan, op),
                }
            } else {
                let targets = self.route_deletion(node, &op);
                if targets.is_empty() {
                    groups.add(GroupKey::Orphan, op);
                }
                for child in targets {
                    groups.add(GroupKey::Child(child.page_id), op);
                }
            }
        }
        Ok(groups)
    }
}

impl GroupMakerKind {
    /// Instantiates the routing policy.
    pub fn create(self) -> Box<dyn OperationGroupMaker> {
        match self {
            GroupMakerKind::Trivial => Box::new(TrivialGroupMaker::new()),
            GroupMakerKind::DeletionsAsInsertions => Box::new(DeletionsAsInsertions::new()),
            GroupMakerKind::InsertionsOnly => Box::new(InsertionsOnly::new()),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::bounding_box::BoundingBox;
    use crate::disk_tree::RRDiskNode;

    fn mixed_batch() -> Vec<Operation> {
        vec![
            Operation::insertion(object(1, 0.0, 0.0, 1.0, 1.0)),
            Operation::insertion(object(2, 1.5, 1.5, 2.0, 2.0)),
            Operation::deletion(object(3, 0.0, 10.0, 1.0, 11.0)),
            Operation::deletion(object(4, 2.0, 2.0, 3.0, 3.0)),
            Operation::deletion(object(5, 5.0, 5.0, 6.0, 6.0)),
        ]
    }

    fn mixed_node() -> RRDiskNode {
        index_node(&[
            BoundingBox::new(0.0, 0.0, 1.1, 1.1),
            BoundingBox::new(2.0, 2.0, 6.0, 6.0),
            BoundingBox::new(5.0, 5.0, 7.0, 7.0),
            BoundingBox::new(4.0, 5.0, 6.0, 7.0),
        ])
    }

    #[test]
    fn test_group_operations_rejects_leaf() {
        for kind in [
            GroupMakerKind::Trivial,
            GroupMakerKind::DeletionsAsInsertions,
            GroupMakerKind::InsertionsOnly,
        ] {
            let mut maker = kind.create();
            let leaf = RRDiskNode::new_leaf(vec![]);
            let result = maker.group_operations(&leaf, mixed_batch());
            assert!(matches!(result, Err(RRTreeError::InvalidOperation(_))));
        }
    }

    #[test]
    fn test_every_operation_is_placed() {
        for kind in [
            GroupMakerKind::Trivial,
            GroupMakerKind::DeletionsAsInsertions,
            GroupMakerKind::InsertionsOnly,
        ] {
            let mut maker = kind.create();
            let batch = mixed_batch();
            let groups = maker.group_operations(&mixed_node(), batch.clone()).unwrap();

            for op in &batch {
                let placements = groups
                    .child_groups()
                    .flat_map(|(_, ops)| ops.iter())
                    .chain(groups.orphans())
                    .filter(|placed| *placed == op)
                    .count();
                assert!(placements >= 1, "{:?} lost {}", kind, op);
                if op.is_insertion() || kind != GroupMakerKind::Trivial {
                    assert_eq!(placements, 1, "{:?} duplicated {}", kind, op);
                }
            }
        }
    }

    #[test]
    fn test_deletion_split_accounting() {
        for kind in [
            GroupMakerKind::Trivial,
            GroupMakerKind::DeletionsAsInsertions,
            GroupMakerKind::InsertionsOnly,
        ] {
            let mut maker = kind.create();
            let batch = mixed_batch();
            let deletions = batch.iter().filter(|op| op.is_deletion()).count() as i64;
            let groups = maker.group_operations(&mixed_node(), batch).unwrap();

            let routed_deletions = groups
                .child_groups()
                .flat_map(|(_, ops)| ops.iter())
                .filter(|op| op.is_deletion())
                .count() as i64;
            let orphaned = groups.orphans().iter().filter(|op| op.is_deletion()).count() as i64;

            let splits = maker.deletion_splits();
            assert_eq!(splits.weighted_sum(), routed_deletions, "{:?}", kind);
            assert_eq!(splits.total(), deletions, "{:?}", kind);
            assert_eq!(splits.get(0).unwrap_or(0), orphaned, "{:?}", kind);
        }
    }

    #[test]
    fn test_reset_statistics() {
        let mut maker = GroupMakerKind::Trivial.create();
        maker.group_operations(&mixed_node(), mixed_batch()).unwrap();
        assert!(!maker.deletion_splits().is_empty());
        maker.reset_statistics();
        assert!(maker.deletion_splits().is_empty());
    }

    #[test]
    fn test_group_map_helpers() {
        let mut groups = IndexEntryOpGroupMap::new();
        let a = Operation::insertion(object(1, 0.0, 0.0, 1.0, 1.0));
        let b = Operation::deletion(object(2, 0.0, 0.0, 1.0, 1.0));
        groups.add(GroupKey::Child(7), a);
        groups.add(GroupKey::Orphan, b);
        groups.add(GroupKey::Child(3), b);

        assert_eq!(groups.len(), 3);
        assert_eq!(groups.total_operations(), 3);
        assert_eq!(groups.orphans(), &[b]);
        assert_eq!(groups.take_orphans(), vec![b]);
        assert!(groups.orphans().is_empty());

        let pages: Vec<_> = groups.into_child_groups().map(|(page, _)| page).collect();
        assert_eq!(pages, vec![7, 3]);
    }

    #[test]
    fn test_retain_largest_groups() {
        let op = |id| Operation::insertion(object(id, 0.0, 0.0, 1.0, 1.0));
        let mut groups = IndexEntryOpGroupMap::new();
        groups.add(GroupKey::Child(2), op(1));
        groups.add(GroupKey::Child(3), op(2));
        groups.add(GroupKey::Child(3), op(3));
        groups.add(GroupKey::Child(4), op(4));
        groups.add(GroupKey::Child(4), op(5));
        groups.add(GroupKey::Orphan, op(6));

        let removed = groups.retain_largest_groups();
        assert_eq!(removed, vec![(2, vec![op(1)])]);
        let kept: Vec<_> = groups.child_groups().map(|(page, _)| page).collect();
        assert_eq!(kept, vec![3, 4]);
        assert_eq!(groups.orphans(), &[op(6)]);
    }
}
