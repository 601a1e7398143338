use super::OperationGroupMaker;
use crate::disk_tree::{ChildEntry, DiskNode};
use crate::operation::Operation;
use crate::stats::StatisticalData;

/// Sends a deletion to every child that overlaps it and spatially contains
/// the deleted object, the way a range query would reach it.
#[derive(Debug, Default)]
pub struct TrivialGroupMaker {
    deletion_splits: StatisticalData,
}

impl TrivialGroupMaker {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OperationGroupMaker for TrivialGroupMaker {
    fn route_deletion(&mut self, node: &dyn DiskNode, op: &Operation) -> Vec<ChildEntry> {
        let targets: Vec<ChildEntry> = node
            .query(op.bbox())
            .into_iter()
            .filter(|child| child.spatially_contains(op.object()))
            .collect();
        self.deletion_splits.update(targets.len() as i64, 1);
        targets
    }

    fn deletion_splits(&self) -> &StatisticalData {
        &self.deletion_splits
    }

    fn reset_statistics(&mut self) {
        self.deletion_splits.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bounding_box::BoundingBox;
    use crate::group_makers::test_support::{index_node, object};
    use crate::group_makers::GroupKey;

    #[test]
    fn test_insertion_to_best_fit_and_deletion_to_containing_child() {
        // A fits child 1; B overlaps both children but only child 2 contains it
        let node = index_node(&[
            BoundingBox::new(0.0, 0.0, 4.0, 4.0),
            BoundingBox::new(3.0, 3.0, 10.0, 10.0),
        ]);
        let insert_a = Operation::insertion(object(1, 1.0, 1.0, 2.0, 2.0));
        let delete_b = Operation::deletion(object(2, 3.5, 3.5, 5.0, 5.0));

        let mut maker = TrivialGroupMaker::new();
        let groups = maker.group_operations(&node, vec![insert_a, delete_b]).unwrap();

        assert_eq!(groups.get(GroupKey::Child(2)), Some(&[insert_a][..]));
        assert_eq!(groups.get(GroupKey::Child(3)), Some(&[delete_b][..]));
        assert!(groups.orphans().is_empty());
        assert_eq!(maker.deletion_splits().len(), 1);
        assert_eq!(maker.deletion_splits().get(1), Some(1));
    }

    #[test]
    fn test_deletion_split_over_two_children() {
        let node = index_node(&[
            BoundingBox::new(0.0, 0.0, 4.0, 4.0),
            BoundingBox::new(3.0, 3.0, 5.0, 5.0),
        ]);
        let delete = Operation::deletion(object(1, 3.0, 3.0, 4.0, 4.0));

        let mut maker = TrivialGroupMaker::new();
        maker.group_operations(&node, vec![delete]).unwrap();
        maker.group_operations(&node, vec![delete]).unwrap();

        assert_eq!(maker.deletion_splits().len(), 1);
        assert_eq!(maker.deletion_splits().get(2), Some(2));
    }

    #[test]
    fn test_overlapping_but_uncontained_deletion_is_orphaned() {
        let node = index_node(&[
            BoundingBox::new(0.0, 0.0, 2.0, 2.0),
            BoundingBox::new(2.0, 2.0, 4.0, 4.0),
        ]);
        let delete = Operation::deletion(object(1, 1.0, 1.0, 3.0, 3.0));

        let mut maker = TrivialGroupMaker::new();
        let groups = maker.group_operations(&node, vec![delete]).unwrap();

        assert_eq!(groups.orphans(), &[delete]);
        assert_eq!(groups.child_groups().count(), 0);
        assert_eq!(maker.deletion_splits().get(0), Some(1));
    }

    #[test]
    fn test_insertion_outside_all_children_goes_to_closest() {
        let node = index_node(&[
            BoundingBox::new(2.0, 2.0, 3.0, 3.0),
            BoundingBox::new(40.0, 40.0, 41.0, 41.0),
        ]);
        let insert = Operation::insertion(object(1, 0.0, 0.0, 1.0, 1.0));

        let mut maker = TrivialGroupMaker::new();
        let groups = maker.group_operations(&node, vec![insert]).unwrap();
        assert_eq!(groups.get(GroupKey::Child(2)), Some(&[insert][..]));
        assert!(maker.deletion_splits().is_empty());
    }
}
