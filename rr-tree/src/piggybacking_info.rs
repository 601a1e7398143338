//! Per-visit piggybacking accounting.

/// Counts the candidate operations of one leaf visit, split into those that
/// would grow the node and those that would shrink it.
///
/// Once the node has computed its admission quotas the excess is moved from
/// the potential counts into the unpiggybackable counts, so the potential
/// counts become the quotas handed to
/// [`DiskNode::execute_constrained_subset_of_ops`](crate::disk_tree::DiskNode::execute_constrained_subset_of_ops).
/// A fresh value is created for every visit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LeafPiggybackingInfo {
    size_decreasing_ops: usize,
    size_increasing_ops: usize,
    unpiggybackable_size_decreasing_ops: usize,
    unpiggybackable_size_increasing_ops: usize,
}

impl LeafPiggybackingInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_potential_size_decreasing_op(&mut self) {
        self.size_decreasing_ops += 1;
    }

    pub fn add_potential_size_increasing_op(&mut self) {
        self.size_increasing_ops += 1;
    }

    pub fn num_of_size_decreasing_ops(&self) -> usize {
        self.size_decreasing_ops
    }

    pub fn num_of_size_increasing_ops(&self) -> usize {
        self.size_increasing_ops
    }

    /// Marks `excess` size-decreasing candidates as not admissible.
    ///
    /// # Panics
    ///
    /// If `excess` is larger than the number of potential candidates.
    pub fn limit_size_decreasing_ops(&mut self, excess: usize) {
        assert!(
            excess <= self.size_decreasing_ops,
            "cannot limit {} size-decreasing ops out of {}",
            excess,
            self.size_decreasing_ops
        );
        self.unpiggybackable_size_decreasing_ops += excess;
        self.size_decreasing_ops -= excess;
    }

    /// Marks `excess` size-increasing candidates as not admissible.
    ///
    /// # Panics
    ///
    /// If `excess` is larger than the number of potential candidates.
    pub fn limit_size_increasing_ops(&mut self, excess: usize) {
        assert!(
            excess <= self.size_increasing_ops,
            "cannot limit {} size-increasing ops out of {}",
            excess,
            self.size_increasing_ops
        );
        self.unpiggybackable_size_increasing_ops += excess;
        self.size_increasing_ops -= excess;
    }

    pub fn unpiggybackable_size_decreasing_ops(&self) -> usize {
        self.unpiggybackable_size_decreasing_ops
    }

    pub fn unpiggybackable_size_increasing_ops(&self) -> usize {
        self.unpiggybackable_size_increasing_ops
    }

    /// Net change in node occupancy if every admitted candidate is applied.
    pub fn node_size_change(&self) -> isize {
        self.size_increasing_ops as isize - self.size_decreasing_ops as isize
    }

    pub fn is_node_changed(&self) -> bool {
        self.size_increasing_ops != 0 || self.size_decreasing_ops != 0
    }
}
