use super::OperationGroupMaker;
use crate::disk_tree::{ChildEntry, DiskNode};
use crate::operation::Operation;
use crate::stats::StatisticalData;

/// Never routes deletions: they all land in the orphan bucket and are left
/// for a separate pass.
#[derive(Debug, Default)]
pub struct InsertionsOnly {
    deletion_splits: StatisticalData,
}

impl InsertionsOnly {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OperationGroupMaker for InsertionsOnly {
    fn route_deletion(&mut self, _node: &dyn DiskNode, _op: &Operation) -> Vec<ChildEntry> {
        self.deletion_splits.update(0, 1);
        Vec::new()
    }

    fn deletion_splits(&self) -> &StatisticalData {
        &self.deletion_splits
    }

    fn reset_statistics(&mut self) {
        self.deletion_splits.reset();
    }
}
