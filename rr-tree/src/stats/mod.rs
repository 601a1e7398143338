//! Observational counters and histograms.
//!
//! Nothing here influences tree structure; every type supports an explicit
//! reset and is serializable so a run can be dumped for analysis.

pub mod operation_type_stat;
pub mod rr_tree_stats;
pub mod statistical_data;

pub use operation_type_stat::OperationTypeStat;
pub use rr_tree_stats::{OpLifetimeStats, RRTreeStats};
pub use statistical_data::StatisticalData;
