//! Buffer emptying: pushing buffered operations down the data tree.
//!
//! A normal emptying groups the buffer at the root with the configured
//! routing policy and pushes the chosen groups down. Each index node on the
//! way regroups what it receives; each leaf executes its operations. If that
//! does not free any room, the whole buffer is pushed down exhaustively with
//! the trivial policy.

use std::collections::HashSet;

use indexmap::IndexSet;

use crate::buffer::{OperationBuffer, RRTreeBuffer};
use crate::config::{PushDownStrategy, RRTreeConfig};
use crate::disk_tree::{DiskNode, PageId, RRDiskDataTree, RRDiskNode};
use crate::errors::RRTreeResult;
use crate::group_makers::{IndexEntryOpGroupMap, OperationGroupMaker, TrivialGroupMaker};
use crate::leaf_modifiers::{DiskNodeOnQueryModifier, LeafNodePiggybacker, OperationCompletion};
use crate::operation::{compute_mbr, is_insertion_only, Operation};
use crate::piggybacking_info::LeafPiggybackingInfo;
use crate::rr_tree::OperationCompleter;
use crate::stats::RRTreeStats;
use crate::tracer::{ObjectTracer, TracePhase};

/// One buffer emptying over borrowed tree state.
pub(crate) struct BufferEmptier<'t, T: ObjectTracer> {
    disk: &'t mut RRDiskDataTree,
    buffer: &'t mut RRTreeBuffer,
    stats: &'t mut RRTreeStats,
    tracer: &'t T,
    config: &'t RRTreeConfig,
    maker: &'t mut dyn OperationGroupMaker,
    /// Replaces `maker` while emptying exhaustively
    exhaustive_maker: Option<TrivialGroupMaker>,
    completed_deletions: HashSet<Operation>,
    /// Deletions held back during an exhaustive emptying
    unmatched_deletions: IndexSet<Operation>,
}

impl<'t, T: ObjectTracer> BufferEmptier<'t, T> {
    pub(crate) fn new(
        disk: &'t mut RRDiskDataTree,
        buffer: &'t mut RRTreeBuffer,
        stats: &'t mut RRTreeStats,
        tracer: &'t T,
        config: &'t RRTreeConfig,
        maker: &'t mut dyn OperationGroupMaker,
    ) -> Self {
        Self {
            disk,
            buffer,
            stats,
            tracer,
            config,
            maker,
            exhaustive_maker: None,
            completed_deletions: HashSet::new(),
            unmatched_deletions: IndexSet::new(),
        }
    }

    /// Empties the buffer with the configured policy, falling back to an
    /// exhaustive emptying if no room was made.
    pub(crate) fn empty(mut self) -> RRTreeResult<()> {
        self.stats.register_empty_buffer();
        let result = self.empty_partially();
        self.stats.register_end_of_empty_buffer();
        result
    }

    /// Pushes every buffered operation down the tree.
    pub(crate) fn empty_exhaustively(mut self) -> RRTreeResult<()> {
        self.stats.register_empty_buffer();
        let result = self.push_down_everything();
        self.stats.register_end_of_empty_buffer();
        result
    }

    fn empty_partially(&mut self) -> RRTreeResult<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let root_page = self.disk.root_page();
        let root = self.disk.read_node(root_page)?;
        if root.is_leaf() {
            return self.push_down_everything();
        }

        let initial_size = self.buffer.len();
        log::debug!("Emptying buffer of {} operations", initial_size);

        let mut groups = self.maker.group_operations(&root, self.buffer.flatten())?;
        // root orphans simply stay buffered
        groups.take_orphans();
        if groups.is_empty() {
            self.stats.failed_emptyings += 1;
            log::warn!(
                "All {} buffered operations are orphans at the root, emptying exhaustively",
                initial_size
            );
            return self.push_down_everything();
        }

        if self.config.push_down == PushDownStrategy::LargestGroup {
            let kept = groups.retain_largest_groups();
            log::trace!("Keeping {} smaller groups in the buffer", kept.len());
        }
        let pushed: Vec<Operation> = groups
            .child_groups()
            .flat_map(|(_, ops)| ops.iter().copied())
            .collect();
        self.buffer.remove_group(&pushed);

        let replacement = self.update_children(root, groups)?;
        self.install_root(replacement)?;

        if self.buffer.len() >= initial_size || self.buffer.is_full() {
            self.stats.failed_emptyings += 1;
            log::warn!(
                "Buffer emptying left {} of {} operations, emptying exhaustively",
                self.buffer.len(),
                initial_size
            );
            return self.push_down_everything();
        }

        log::debug!(
            "Buffer emptied down to {} operations, {} entries on disk",
            self.buffer.len(),
            self.disk.entry_count()
        );
        Ok(())
    }

    fn push_down_everything(&mut self) -> RRTreeResult<()> {
        self.exhaustive_maker = Some(TrivialGroupMaker::new());
        let ops = self.buffer.drain();
        log::debug!("Emptying all {} buffered operations", ops.len());

        if !ops.is_empty() {
            let root = self.disk.read_node(self.disk.root_page())?;
            let replacement = self.group_update(root, ops, false)?;
            self.install_root(replacement)?;
        }

        let unmatched: Vec<Operation> = self.unmatched_deletions.drain(..).collect();
        for op in unmatched {
            if !self.completed_deletions.contains(&op) {
                self.discard_unmatched_deletion(&op);
            }
        }
        self.exhaustive_maker = None;

        log::debug!(
            "Exhaustive emptying done, {} operations buffered, {} entries on disk",
            self.buffer.len(),
            self.disk.entry_count()
        );
        Ok(())
    }

    fn is_exhaustive(&self) -> bool {
        self.exhaustive_maker.is_some()
    }

    fn maker(&mut self) -> &mut dyn OperationGroupMaker {
        match &mut self.exhaustive_maker {
            Some(trivial) => trivial,
            None => &mut *self.maker,
        }
    }

    fn install_root(&mut self, replacement: Vec<RRDiskNode>) -> RRTreeResult<()> {
        self.stats.root_splits += self.disk.replace_root(replacement)?;
        self.stats.children_replacing_parent += self.disk.normalize_root()?;
        Ok(())
    }

    // ========================================================================
    // Group Update
    // ========================================================================

    /// Applies `ops` to the subtree rooted at `node` and returns the nodes
    /// replacing it: none left empty, one, or several after a split.
    fn group_update(
        &mut self,
        node: RRDiskNode,
        mut ops: Vec<Operation>,
        record_group_stats: bool,
    ) -> RRTreeResult<Vec<RRDiskNode>> {
        self.stats.group_updates += 1;
        let level = node.level();
        let group_size = ops.len();
        let insertion_only = is_insertion_only(&ops);

        for op in &ops {
            self.tracer
                .trace_update_tree_entry(op, TracePhase::GroupUpdateStart, None);
        }
        ops.retain(|op| op.is_insertion() || !self.completed_deletions.contains(op));

        let replacement = if node.is_leaf() {
            self.update_leaf(node, ops)?
        } else {
            let mut groups = self.maker().group_operations(&node, ops)?;
            let orphans = groups.take_orphans();
            if !orphans.is_empty() {
                self.stats.register_back_to_buffer_group(level, orphans.len());
                for op in orphans {
                    self.put_back(level, op);
                }
            }
            self.update_children(node, groups)?
        };

        if record_group_stats {
            self.stats
                .update_group_update_statistics(level, group_size, insertion_only);
        }
        Ok(replacement)
    }

    fn update_leaf(
        &mut self,
        mut node: RRDiskNode,
        ops: Vec<Operation>,
    ) -> RRTreeResult<Vec<RRDiskNode>> {
        self.stats.leaf_node_updates += 1;
        let size_before = node.len();

        for op in &ops {
            self.tracer
                .trace_update_tree_entry(op, TracePhase::UpdateLeafNode, None);
        }

        let executed: HashSet<Operation> = node.execute_ops(&ops).into_iter().collect();
        for op in &ops {
            if executed.contains(op) {
                self.complete(op);
                if op.is_deletion() {
                    self.buffer.remove_exact_entry(op);
                }
            } else {
                self.put_back(0, *op);
            }
        }

        if self.config.update_leaf_piggybacking && !node.is_empty() {
            let mut piggybacker = LeafNodePiggybacker::new(self.tracer);
            piggybacker.modify(
                &mut node,
                &*self.buffer,
                self.stats,
                true,
                self.config.piggybacking_epsilon,
                &mut LeafPiggybackingInfo::new(),
            );
            let mut completer = OperationCompleter::new(
                self.tracer,
                &mut self.stats.op_lifetimes,
                Some(&mut self.completed_deletions),
            );
            piggybacker.finalize_modifications(
                &mut *self.buffer,
                &mut completer,
                &mut self.stats.leaf_update_piggybackings,
            );
        }

        self.disk
            .adjust_entry_count(node.len() as i64 - size_before as i64);
        Ok(self.disk.split_node(node))
    }

    /// Pushes each child group down, then links the results into `node`.
    fn update_children(
        &mut self,
        mut node: RRDiskNode,
        groups: IndexEntryOpGroupMap,
    ) -> RRTreeResult<Vec<RRDiskNode>> {
        self.stats.nonleaf_node_updates += 1;
        let min = self.disk.min_capacity();
        let mut underflowing = Vec::new();

        for (child_page, mut group) in groups.into_child_groups() {
            if node.child(child_page).is_none() {
                continue;
            }
            for op in &group {
                self.tracer.trace_update_tree_entry(
                    op,
                    TracePhase::GroupUpdateBeforeIndexPiggybacking,
                    None,
                );
            }
            if self.config.update_index_piggybacking {
                self.piggyback_on_group(&mut group);
            }
            for op in &group {
                self.tracer.trace_update_tree_entry(
                    op,
                    TracePhase::GroupUpdateAfterIndexPiggybacking,
                    None,
                );
            }

            let child = self.disk.read_node(child_page)?;
            let replacement = self.group_update(child, group, true)?;

            self.stats.integrate_child_invocations += 1;
            match replacement.as_slice() {
                [only] if only.is_empty() => {
                    node.remove_child(child_page);
                    self.disk.free_page(child_page)?;
                    self.stats.empty_children += 1;
                }
                [only] if only.len() < min => underflowing.push(child_page),
                _ => {}
            }
            if node.child(child_page).is_some() {
                let entries = self.disk.store_split(child_page, replacement)?;
                node.replace_child(child_page, entries);
            }
        }

        for child_page in underflowing {
            self.merge_underflowing_child(&mut node, child_page)?;
        }

        Ok(self.disk.split_node(node))
    }

    /// Moves buffered insertions near the group into it.
    fn piggyback_on_group(&mut self, group: &mut Vec<Operation>) {
        let Some(mbr) = compute_mbr(group.iter()) else {
            return;
        };
        let region = if self.config.piggybacking_epsilon > 0.0 {
            mbr.expand_relative(self.config.piggybacking_epsilon)
        } else {
            mbr
        };

        for op in self.buffer.query_insertions(&region) {
            if group.contains(&op) {
                continue;
            }
            self.tracer
                .trace_update_tree_entry(&op, TracePhase::IndexNodePiggybacking, None);
            self.buffer.remove_exact_entry(&op);
            self.stats.nonleaf_update_piggybackings.register(&op);
            group.push(op);
        }
    }

    /// Merges an underflowing child of `parent` into the sibling needing the
    /// least enlargement. Grandchildren that came along underflowing are
    /// merged in turn inside the sibling.
    fn merge_underflowing_child(
        &mut self,
        parent: &mut RRDiskNode,
        child_page: PageId,
    ) -> RRTreeResult<()> {
        let Some(entry) = parent.child(child_page).copied() else {
            return Ok(());
        };
        let Some(sibling) = parent
            .children()
            .iter()
            .filter(|c| c.page_id != child_page)
            .min_by(|a, b| {
                a.bbox
                    .enlargement(&entry.bbox)
                    .total_cmp(&b.bbox.enlargement(&entry.bbox))
                    .then(a.bbox.area().total_cmp(&b.bbox.area()))
            })
            .copied()
        else {
            return Ok(());
        };

        let child = self.disk.read_node(child_page)?;
        if child.len() >= self.disk.min_capacity() {
            return Ok(());
        }
        let grandchildren: Vec<PageId> = child.children().iter().map(|c| c.page_id).collect();

        let mut target = self.disk.read_node(sibling.page_id)?;
        target.absorb(child);
        parent.remove_child(child_page);
        self.disk.free_page(child_page)?;
        self.stats.merged_children += 1;

        for grandchild in grandchildren {
            self.merge_underflowing_child(&mut target, grandchild)?;
        }

        let parts = self.disk.split_node(target);
        let entries = self.disk.store_split(sibling.page_id, parts)?;
        parent.replace_child(sibling.page_id, entries);
        Ok(())
    }

    // ========================================================================
    // Bookkeeping
    // ========================================================================

    fn complete(&mut self, op: &Operation) {
        OperationCompleter::new(
            self.tracer,
            &mut self.stats.op_lifetimes,
            Some(&mut self.completed_deletions),
        )
        .complete_operation(op);
    }

    /// Returns an operation that could not proceed to the buffer. During an
    /// exhaustive emptying deletions are held back instead, and discarded at
    /// the end unless another branch completed them.
    fn put_back(&mut self, level: u32, op: Operation) {
        if op.is_deletion() && self.is_exhaustive() {
            log::trace!("Holding back deletion {} at level {}", op, level);
            self.unmatched_deletions.insert(op);
            return;
        }

        self.tracer
            .trace_update_tree_entry(&op, TracePhase::PutOpBackToBuffer, None);
        self.stats.register_back_to_buffer_operation(&op);
        self.buffer.add_entry_if_not_exists(op);
    }

    fn discard_unmatched_deletion(&mut self, op: &Operation) {
        log::warn!(
            "Discarding deletion of object {}: it is not in the tree",
            op.id()
        );
        self.stats.unmatched_deletions += 1;
        self.stats.op_lifetimes.complete(op);
        self.tracer
            .trace_update_tree_entry(op, TracePhase::RemoveFromBuffer, None);
    }
}
