//! Query-time modification of visited leaves.
//!
//! A modifier is handed every leaf a traversal visits. It may apply buffered
//! operations to the leaf on the spot; afterwards
//! [`DiskNodeOnQueryModifier::finalize_modifications`] settles the
//! bookkeeping for everything it applied, once per traversal, so the buffer
//! is never changed while the traversal runs.

mod leaf_node_piggybacker;
mod null_modifier;

use crate::buffer::OperationBuffer;
use crate::disk_tree::DiskNode;
use crate::operation::Operation;
use crate::piggybacking_info::LeafPiggybackingInfo;
use crate::stats::{OperationTypeStat, RRTreeStats};

pub use leaf_node_piggybacker::LeafNodePiggybacker;
pub use null_modifier::NullModifier;

/// Receives every buffered operation that became durable on disk.
pub trait OperationCompletion {
    fn complete_operation(&mut self, op: &Operation);
}

pub trait DiskNodeOnQueryModifier {
    /// Possibly applies buffered operations to `node`. Returns `true` if the
    /// node was changed and must be written back.
    ///
    /// Unless `allow_reorganization` is set the node stays within its
    /// occupancy bounds, and candidates that do not fit are counted in
    /// `tree_stats`. With reorganization allowed and a positive `epsilon`
    /// the trigger region grows by `epsilon` relative to the node's extent.
    fn modify(
        &mut self,
        node: &mut dyn DiskNode,
        buffer: &dyn OperationBuffer,
        tree_stats: &mut RRTreeStats,
        allow_reorganization: bool,
        epsilon: f64,
        info: &mut LeafPiggybackingInfo,
    ) -> bool;

    /// Registers every operation applied since the last call in `stats`,
    /// reports it to `tree` and removes it from `buffer`.
    fn finalize_modifications(
        &mut self,
        buffer: &mut dyn OperationBuffer,
        tree: &mut dyn OperationCompletion,
        stats: &mut OperationTypeStat,
    );
}
