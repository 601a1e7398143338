use indexmap::IndexSet;

use super::{DiskNodeOnQueryModifier, OperationCompletion};
use crate::buffer::OperationBuffer;
use crate::disk_tree::{DiskNode, EntryIndexGuard};
use crate::operation::Operation;
use crate::piggybacking_info::LeafPiggybackingInfo;
use crate::stats::{OperationTypeStat, RRTreeStats};
use crate::tracer::{ObjectTracer, TracePhase};

/// Applies buffered operations to the leaves a traversal visits.
///
/// Every operation is applied at most once per instance: operations
/// executed on one leaf are remembered until
/// [`DiskNodeOnQueryModifier::finalize_modifications`] and skipped on every
/// later leaf, even if they still fit there.
pub struct LeafNodePiggybacker<'a, T: ObjectTracer> {
    tracer: &'a T,
    piggybacked_ops: IndexSet<Operation>,
}

impl<'a, T: ObjectTracer> LeafNodePiggybacker<'a, T> {
    pub fn new(tracer: &'a T) -> Self {
        Self {
            tracer,
            piggybacked_ops: IndexSet::new(),
        }
    }

    /// Operations applied since the last finalization, in execution order.
    pub fn piggybacked_ops(&self) -> &IndexSet<Operation> {
        &self.piggybacked_ops
    }
}

impl<T: ObjectTracer> DiskNodeOnQueryModifier for LeafNodePiggybacker<'_, T> {
    fn modify(
        &mut self,
        node: &mut dyn DiskNode,
        buffer: &dyn OperationBuffer,
        tree_stats: &mut RRTreeStats,
        allow_reorganization: bool,
        epsilon: f64,
        info: &mut LeafPiggybackingInfo,
    ) -> bool {
        let Some(descriptor) = node.compute_descriptor() else {
            return false;
        };

        let expand = allow_reorganization && epsilon > 0.0;
        let region = if expand {
            descriptor.expand_relative(epsilon)
        } else {
            descriptor
        };

        let candidates = buffer.query_entry_of_any_type(&region);
        if candidates.is_empty() {
            return false;
        }
        let fitting: Vec<Operation> = node
            .select_fitting_operations(&candidates, expand)
            .into_iter()
            .filter(|op| !self.piggybacked_ops.contains(op))
            .collect();

        let mut node = EntryIndexGuard::acquire(node);

        for op in &fitting {
            self.tracer
                .trace_update_tree_entry(op, TracePhase::LeafNodePiggybacking, None);
            if node.operation_will_increase_node_size(op) {
                info.add_potential_size_increasing_op();
            } else {
                info.add_potential_size_decreasing_op();
            }
        }

        if !allow_reorganization {
            node.limit_number_of_operations(info);
            tree_stats.register_non_piggybacked_ops(
                info.unpiggybackable_size_decreasing_ops(),
                info.unpiggybackable_size_increasing_ops(),
            );
        }

        if !info.is_node_changed() {
            return false;
        }

        let executed = if allow_reorganization {
            node.allow_reorganization();
            node.execute_constrained_subset_of_ops(&fitting, usize::MAX, usize::MAX)
        } else {
            node.execute_constrained_subset_of_ops(
                &fitting,
                info.num_of_size_increasing_ops(),
                info.num_of_size_decreasing_ops(),
            )
        };
        drop(node);

        log::trace!(
            "Piggybacked {} of {} candidates on a leaf ({} deferred)",
            executed.len(),
            candidates.len(),
            info.unpiggybackable_size_increasing_ops() + info.unpiggybackable_size_decreasing_ops()
        );

        let changed = !executed.is_empty();
        self.piggybacked_ops.extend(executed);
        changed
    }

    fn finalize_modifications(
        &mut self,
        buffer: &mut dyn OperationBuffer,
        tree: &mut dyn OperationCompletion,
        stats: &mut OperationTypeStat,
    ) {
        for op in self.piggybacked_ops.drain(..) {
            stats.register(&op);
            tree.complete_operation(&op);
            buffer.remove_exact_entry(&op);
        }
    }
}
