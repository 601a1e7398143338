use super::OperationGroupMaker;
use crate::disk_tree::{ChildEntry, DiskNode};
use crate::operation::Operation;
use crate::stats::StatisticalData;

/// Routes deletions by the same best-fit rule as insertions. A deletion
/// reaches exactly one child, which may not be the one holding the object.
#[derive(Debug, Default)]
pub struct DeletionsAsInsertions {
    deletion_splits: StatisticalData,
}

impl DeletionsAsInsertions {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OperationGroupMaker for DeletionsAsInsertions {
    fn route_deletion(&mut self, node: &dyn DiskNode, op: &Operation) -> Vec<ChildEntry> {
        let target: Vec<ChildEntry> = node.choose_subtree_by_object(op.object()).into_iter().collect();
        self.deletion_splits.update(target.len() as i64, 1);
        target
    }

    fn deletion_splits(&self) -> &StatisticalData {
        &self.deletion_splits
    }

    fn reset_statistics(&mut self) {
        self.deletion_splits.reset();
    }
}
