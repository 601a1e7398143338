use super::{DiskNodeOnQueryModifier, OperationCompletion};
use crate::buffer::OperationBuffer;
use crate::disk_tree::DiskNode;
use crate::piggybacking_info::LeafPiggybackingInfo;
use crate::stats::{OperationTypeStat, RRTreeStats};

/// Leaves every node untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullModifier;

impl DiskNodeOnQueryModifier for NullModifier {
    fn modify(
        &mut self,
        _node: &mut dyn DiskNode,
        _buffer: &dyn OperationBuffer,
        _tree_stats: &mut RRTreeStats,
        _allow_reorganization: bool,
        _epsilon: f64,
        _info: &mut LeafPiggybackingInfo,
    ) -> bool {
        false
    }

    fn finalize_modifications(
        &mut self,
        _buffer: &mut dyn OperationBuffer,
        _tree: &mut dyn OperationCompletion,
        _stats: &mut OperationTypeStat,
    ) {
    }
}
