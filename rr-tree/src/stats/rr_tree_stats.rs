use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::operation_type_stat::OperationTypeStat;
use super::statistical_data::StatisticalData;
use crate::operation::Operation;

// ============================================================================
// Operation Lifetimes
// ============================================================================

#[derive(Debug, Clone, Copy)]
struct RunningLifetime {
    started_at_emptying: u64,
    returns_to_buffer: i64,
}

/// Tracks how many buffer emptyings each operation survives before it is
/// durably applied or annihilated.
///
/// Operations still in the buffer when [`OpLifetimeStats::register_buffer_lifetimes`]
/// is called and that have not yet seen an emptying are recorded under the
/// special bucket `-1`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OpLifetimeStats {
    completed_emptyings: u64,
    /// Emptyings survived → number of operations
    pub lifetimes: StatisticalData,
    /// Times put back to the buffer → number of operations
    pub returns_to_buffer: StatisticalData,
    #[serde(skip)]
    running: HashMap<Operation, RunningLifetime>,
}

impl OpLifetimeStats {
    /// Opens lifetime tracking for an operation that just entered the buffer.
    pub fn start(&mut self, op: &Operation) {
        self.running.insert(
            *op,
            RunningLifetime {
                started_at_emptying: self.completed_emptyings,
                returns_to_buffer: 0,
            },
        );
    }

    /// Records an annihilation: the incoming operation lives for zero
    /// emptyings and the annihilated one is closed.
    pub fn annihilate(&mut self, incoming: &Operation, annihilated: &Operation) {
        debug_assert!(incoming.annihilates(annihilated));
        self.lifetimes.update(0, 1);
        self.returns_to_buffer.update(0, 1);
        self.complete(annihilated);
    }

    /// Closes lifetime tracking for an operation that left the buffer.
    /// Operations that were never opened are ignored.
    pub fn complete(&mut self, op: &Operation) {
        if let Some(running) = self.running.remove(op) {
            let survived = self.completed_emptyings - running.started_at_emptying;
            self.lifetimes.update(survived as i64, 1);
            self.returns_to_buffer.update(running.returns_to_buffer, 1);
        }
    }

    pub fn return_to_buffer(&mut self, op: &Operation) {
        if let Some(running) = self.running.get_mut(op) {
            running.returns_to_buffer += 1;
        }
    }

    pub fn is_running(&self, op: &Operation) -> bool {
        self.running.contains_key(op)
    }

    pub fn end_of_emptying(&mut self) {
        self.completed_emptyings += 1;
    }

    pub fn completed_emptyings(&self) -> u64 {
        self.completed_emptyings
    }

    /// Records the current lifetime of every operation still in the buffer
    /// and stops tracking them. Meant for the end of a run.
    pub fn register_buffer_lifetimes(&mut self) {
        for (_, running) in self.running.drain() {
            let survived = self.completed_emptyings - running.started_at_emptying;
            let bucket = if survived == 0 { -1 } else { survived as i64 };
            self.lifetimes.update(bucket, 1);
            self.returns_to_buffer.update(running.returns_to_buffer, 1);
        }
    }
}

// ============================================================================
// Tree Statistics
// ============================================================================

/// Counters describing buffer behaviour, flushes and piggybacking.
///
/// Fields are public so that the tree can hand disjoint parts of the
/// statistics to collaborators during a single traversal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RRTreeStats {
    pub insertions: u64,
    pub deletions: u64,
    pub id_annihilations: u64,
    pub di_annihilations: u64,
    pub queries: u64,

    pub updates_since_last_emptying: u64,
    /// Updates between consecutive emptyings → occurrences
    pub emptying_frequency: StatisticalData,
    pub empty_buffers: u64,
    pub failed_emptyings: u64,

    pub group_updates: u64,
    pub leaf_node_updates: u64,
    pub nonleaf_node_updates: u64,
    /// Per level: group size → occurrences
    pub group_sizes: Vec<StatisticalData>,
    /// Per level: insertion-only group size → occurrences
    pub insertion_only_group_sizes: Vec<StatisticalData>,
    /// Per level: size of groups put back to the buffer → occurrences
    pub back_to_buffer_group_sizes: Vec<StatisticalData>,
    pub back_to_buffer_ops: u64,

    pub non_piggybacked_size_increasing: u64,
    pub non_piggybacked_size_decreasing: u64,
    pub query_piggybackings: OperationTypeStat,
    pub leaf_update_piggybackings: OperationTypeStat,
    pub nonleaf_update_piggybackings: OperationTypeStat,

    pub integrate_child_invocations: u64,
    pub empty_children: u64,
    pub merged_children: u64,
    pub children_replacing_parent: u64,
    pub root_splits: u64,
    pub unmatched_deletions: u64,

    pub op_lifetimes: OpLifetimeStats,
}

impl Default for RRTreeStats {
    fn default() -> Self {
        Self {
            insertions: 0,
            deletions: 0,
            id_annihilations: 0,
            di_annihilations: 0,
            queries: 0,
            updates_since_last_emptying: 0,
            emptying_frequency: StatisticalData::new(),
            empty_buffers: 0,
            failed_emptyings: 0,
            group_updates: 0,
            leaf_node_updates: 0,
            nonleaf_node_updates: 0,
            group_sizes: Vec::new(),
            insertion_only_group_sizes: Vec::new(),
            back_to_buffer_group_sizes: Vec::new(),
            back_to_buffer_ops: 0,
            non_piggybacked_size_increasing: 0,
            non_piggybacked_size_decreasing: 0,
            query_piggybackings: OperationTypeStat::new("query piggybackings"),
            leaf_update_piggybackings: OperationTypeStat::new("leaf update piggybackings"),
            nonleaf_update_piggybackings: OperationTypeStat::new("non-leaf update piggybackings"),
            integrate_child_invocations: 0,
            empty_children: 0,
            merged_children: 0,
            children_replacing_parent: 0,
            root_splits: 0,
            unmatched_deletions: 0,
            op_lifetimes: OpLifetimeStats::default(),
        }
    }
}

impl RRTreeStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_update(&mut self) {
        self.updates_since_last_emptying += 1;
    }

    pub fn register_empty_buffer(&mut self) {
        self.emptying_frequency
            .update(self.updates_since_last_emptying as i64, 1);
        self.updates_since_last_emptying = 0;
        self.empty_buffers += 1;
    }

    pub fn register_end_of_empty_buffer(&mut self) {
        self.op_lifetimes.end_of_emptying();
    }

    pub fn register_non_piggybacked_ops(&mut self, size_decreasing: usize, size_increasing: usize) {
        self.non_piggybacked_size_decreasing += size_decreasing as u64;
        self.non_piggybacked_size_increasing += size_increasing as u64;
    }

    pub fn register_back_to_buffer_group(&mut self, tree_level: u32, group_size: usize) {
        inc_histogram_in_list(&mut self.back_to_buffer_group_sizes, tree_level, group_size);
    }

    pub fn register_back_to_buffer_operation(&mut self, op: &Operation) {
        self.back_to_buffer_ops += 1;
        self.op_lifetimes.return_to_buffer(op);
    }

    pub fn update_group_update_statistics(
        &mut self,
        node_level: u32,
        group_size: usize,
        insertion_only: bool,
    ) {
        inc_histogram_in_list(&mut self.group_sizes, node_level, group_size);
        if insertion_only {
            inc_histogram_in_list(&mut self.insertion_only_group_sizes, node_level, group_size);
        }
    }

    /// Group-size histogram summed over all levels.
    pub fn global_group_size_statistics(&self) -> StatisticalData {
        let mut global = StatisticalData::new();
        for level in &self.group_sizes {
            global.add(level);
        }
        global
    }

    /// Clears every counter. Lifetimes of operations still in the buffer
    /// keep running.
    pub fn reset(&mut self) {
        let running_lifetimes = std::mem::take(&mut self.op_lifetimes);
        *self = RRTreeStats::default();
        self.op_lifetimes = running_lifetimes;
        self.op_lifetimes.lifetimes.reset();
        self.op_lifetimes.returns_to_buffer.reset();
    }
}

fn inc_histogram_in_list(statistics: &mut Vec<StatisticalData>, index: u32, key: usize) {
    let index = index as usize;
    if statistics.len() < index + 1 {
        statistics.resize_with(index + 1, StatisticalData::new);
    }
    statistics[index].update(key as i64, 1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bounding_box::BoundingBox;
    use crate::operation::DataObject;

    fn insertion(id: u64) -> Operation {
        Operation::insertion(DataObject::new(id, BoundingBox::point(0.0, 0.0)))
    }

    #[test]
    fn test_emptying_frequency() {
        let mut stats = RRTreeStats::new();
        for _ in 0..3 {
            stats.register_update();
        }
        stats.register_empty_buffer();
        stats.register_update();
        stats.register_empty_buffer();

        assert_eq!(stats.emptying_frequency.get(3), Some(1));
        assert_eq!(stats.emptying_frequency.get(1), Some(1));
        assert_eq!(stats.empty_buffers, 2);
        assert_eq!(stats.updates_since_last_emptying, 0);
    }

    #[test]
    fn test_group_size_histograms_grow_per_level() {
        let mut stats = RRTreeStats::new();
        stats.update_group_update_statistics(2, 5, true);
        stats.update_group_update_statistics(0, 5, false);
        stats.update_group_update_statistics(0, 3, false);

        assert_eq!(stats.group_sizes.len(), 3);
        assert!(stats.group_sizes[1].is_empty());
        assert_eq!(stats.group_sizes[0].get(5), Some(1));
        assert_eq!(stats.insertion_only_group_sizes.len(), 3);
        assert_eq!(stats.insertion_only_group_sizes[2].get(5), Some(1));

        let global = stats.global_group_size_statistics();
        assert_eq!(global.get(5), Some(2));
        assert_eq!(global.get(3), Some(1));
    }

    #[test]
    fn test_op_lifetime_survives_emptyings() {
        let mut stats = RRTreeStats::new();
        let op = insertion(1);
        stats.op_lifetimes.start(&op);
        stats.register_end_of_empty_buffer();
        stats.register_end_of_empty_buffer();
        stats.register_back_to_buffer_operation(&op);
        stats.op_lifetimes.complete(&op);

        assert_eq!(stats.op_lifetimes.lifetimes.get(2), Some(1));
        assert_eq!(stats.op_lifetimes.returns_to_buffer.get(1), Some(1));
        assert!(!stats.op_lifetimes.is_running(&op));
        assert_eq!(stats.back_to_buffer_ops, 1);
    }

    #[test]
    fn test_op_lifetime_annihilation() {
        let mut lifetimes = OpLifetimeStats::default();
        let ins = insertion(4);
        lifetimes.start(&ins);
        lifetimes.end_of_emptying();
        lifetimes.annihilate(&ins.opposite(), &ins);

        assert_eq!(lifetimes.lifetimes.get(0), Some(1));
        assert_eq!(lifetimes.lifetimes.get(1), Some(1));
    }

    #[test]
    fn test_register_buffer_lifetimes() {
        let mut lifetimes = OpLifetimeStats::default();
        lifetimes.start(&insertion(1));
        lifetimes.end_of_emptying();
        lifetimes.start(&insertion(2));
        lifetimes.register_buffer_lifetimes();

        assert_eq!(lifetimes.lifetimes.get(1), Some(1));
        assert_eq!(lifetimes.lifetimes.get(-1), Some(1));
        assert!(!lifetimes.is_running(&insertion(1)));
    }

    #[test]
    fn test_complete_unknown_operation_is_ignored() {
        let mut lifetimes = OpLifetimeStats::default();
        lifetimes.complete(&insertion(99));
        assert!(lifetimes.lifetimes.is_empty());
    }

    #[test]
    fn test_reset_keeps_running_lifetimes() {
        let mut stats = RRTreeStats::new();
        let op = insertion(1);
        stats.op_lifetimes.start(&op);
        stats.insertions = 10;
        stats.query_piggybackings.register(&op);
        stats.reset();

        assert_eq!(stats.insertions, 0);
        assert_eq!(stats.query_piggybackings.total(), 0);
        assert!(stats.op_lifetimes.is_running(&op));
    }

    #[test]
    fn test_serializes_to_json() {
        let mut stats = RRTreeStats::new();
        stats.register_non_piggybacked_ops(2, 3);
        let json = serde_json::to_string(&stats).unwrap();
        assert!(json.contains("\"non_piggybacked_size_increasing\":3"));
        assert!(json.contains("\"non_piggybacked_size_decreasing\":2"));
    }
}
