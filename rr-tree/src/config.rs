//! Tree configuration.

use serde::{Deserialize, Serialize};

use crate::errors::{RRTreeError, RRTreeResult};

/// Default minimum occupancy of a node
pub const DEFAULT_MIN_NODE_CAPACITY: usize = 25;

/// Default maximum occupancy of a node
pub const DEFAULT_MAX_NODE_CAPACITY: usize = 64;

/// Largest maximum occupancy that still fits a node into one page
pub const MAX_NODE_CAPACITY_LIMIT: usize = 255;

/// Default number of buffered operations before an emptying is forced
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 1024;

/// Default cache size in number of pages (16MB with 16KB pages)
pub const DEFAULT_CACHE_PAGES: usize = 1024;

/// How deletions are routed while the buffer is emptied down the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum GroupMakerKind {
    /// Deletions go to every child that overlaps and contains them
    #[default]
    Trivial,
    /// Deletions follow the same best-fit rule as insertions
    DeletionsAsInsertions,
    /// Deletions are never routed down
    InsertionsOnly,
}

/// Which root-level groups a normal buffer emptying pushes down the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PushDownStrategy {
    /// Every group
    #[default]
    AllGroups,
    /// Only the largest group, or all groups tied for largest
    LargestGroup,
}

/// Configuration of an [`RRTree`](crate::RRTree).
///
/// # Examples
///
/// ```
/// use rr_tree::{GroupMakerKind, RRTreeConfig};
///
/// let config = RRTreeConfig::default()
///     .with_node_capacity(4, 10)
///     .with_max_buffer_size(32)
///     .with_group_maker(GroupMakerKind::DeletionsAsInsertions);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RRTreeConfig {
    pub min_node_capacity: usize,
    pub max_node_capacity: usize,
    pub max_buffer_size: usize,
    pub group_maker: GroupMakerKind,
    pub push_down: PushDownStrategy,
    /// Piggyback buffered operations on leaves visited by queries
    pub query_piggybacking: bool,
    /// Piggyback buffered operations on leaves updated by an emptying
    pub update_leaf_piggybacking: bool,
    /// Pull buffered insertions into groups routed through index nodes
    pub update_index_piggybacking: bool,
    /// Relative expansion of the trigger region during emptying
    pub piggybacking_epsilon: f64,
    pub cache_pages: usize,
}

impl Default for RRTreeConfig {
    fn default() -> Self {
        Self {
            min_node_capacity: DEFAULT_MIN_NODE_CAPACITY,
            max_node_capacity: DEFAULT_MAX_NODE_CAPACITY,
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
            group_maker: GroupMakerKind::default(),
            push_down: PushDownStrategy::default(),
            query_piggybacking: true,
            update_leaf_piggybacking: true,
            update_index_piggybacking: true,
            piggybacking_epsilon: 0.0,
            cache_pages: DEFAULT_CACHE_PAGES,
        }
    }
}

impl RRTreeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_node_capacity(mut self, min: usize, max: usize) -> Self {
        self.min_node_capacity = min;
        self.max_node_capacity = max;
        self
    }

    pub fn with_max_buffer_size(mut self, max_buffer_size: usize) -> Self {
        self.max_buffer_size = max_buffer_size;
        self
    }

    pub fn with_group_maker(mut self, group_maker: GroupMakerKind) -> Self {
        self.group_maker = group_maker;
        self
    }

    pub fn with_push_down(mut self, push_down: PushDownStrategy) -> Self {
        self.push_down = push_down;
        self
    }

    pub fn with_query_piggybacking(mut self, enabled: bool) -> Self {
        self.query_piggybacking = enabled;
        self
    }

    pub fn with_update_leaf_piggybacking(mut self, enabled: bool) -> Self {
        self.update_leaf_piggybacking = enabled;
        self
    }

    pub fn with_update_index_piggybacking(mut self, enabled: bool) -> Self {
        self.update_index_piggybacking = enabled;
        self
    }

    pub fn with_piggybacking_epsilon(mut self, epsilon: f64) -> Self {
        self.piggybacking_epsilon = epsilon;
        self
    }

    pub fn with_cache_pages(mut self, cache_pages: usize) -> Self {
        self.cache_pages = cache_pages;
        self
    }

    /// Checks the capacity bounds and sizes.
    pub fn validate(&self) -> RRTreeResult<()> {
        let (min, max) = (self.min_node_capacity, self.max_node_capacity);
        if max > MAX_NODE_CAPACITY_LIMIT {
            return Err(RRTreeError::InvalidConfig(format!(
                "max node capacity {} exceeds {}",
                max, MAX_NODE_CAPACITY_LIMIT
            )));
        }
        if min < 1 || min > max / 2 {
            return Err(RRTreeError::InvalidConfig(format!(
                "node capacity bounds must satisfy 1 <= min <= max / 2 (min {}, max {})",
                min, max
            )));
        }
        if self.max_buffer_size == 0 {
            return Err(RRTreeError::InvalidConfig(
                "max buffer size must be positive".into(),
            ));
        }
        if !self.piggybacking_epsilon.is_finite() || self.piggybacking_epsilon < 0.0 {
            return Err(RRTreeError::InvalidConfig(format!(
                "piggybacking epsilon must be a finite non-negative number, got {}",
                self.piggybacking_epsilon
            )));
        }
        if self.cache_pages == 0 {
            return Err(RRTreeError::InvalidConfig(
                "cache must hold at least one page".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = RRTreeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.group_maker, GroupMakerKind::Trivial);
        assert_eq!(config.push_down, PushDownStrategy::AllGroups);
        assert!(config.query_piggybacking);
        assert_eq!(config.piggybacking_epsilon, 0.0);
    }

    #[test]
    fn test_capacity_bounds() {
        assert!(RRTreeConfig::new().with_node_capacity(0, 10).validate().is_err());
        assert!(RRTreeConfig::new().with_node_capacity(6, 10).validate().is_err());
        assert!(RRTreeConfig::new().with_node_capacity(5, 10).validate().is_ok());
        assert!(RRTreeConfig::new().with_node_capacity(2, 300).validate().is_err());
        assert!(RRTreeConfig::new().with_node_capacity(1, 2).validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_sizes() {
        assert!(RRTreeConfig::new().with_max_buffer_size(0).validate().is_err());
        assert!(RRTreeConfig::new().with_cache_pages(0).validate().is_err());
        assert!(RRTreeConfig::new().with_piggybacking_epsilon(-0.1).validate().is_err());
        assert!(RRTreeConfig::new().with_piggybacking_epsilon(f64::NAN).validate().is_err());
        let err = RRTreeConfig::new().with_max_buffer_size(0).validate().unwrap_err();
        assert!(matches!(err, RRTreeError::InvalidConfig(_)));
    }

    #[test]
    fn test_serde_roundtrip() {
        let config = RRTreeConfig::new()
            .with_group_maker(GroupMakerKind::InsertionsOnly)
            .with_push_down(PushDownStrategy::LargestGroup)
            .with_piggybacking_epsilon(0.25)
            .with_query_piggybacking(false);
        let json = serde_json::to_string(&config).unwrap();
        let back: RRTreeConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, back);
    }
}
