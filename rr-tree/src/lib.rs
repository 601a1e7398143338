//! # RR-Tree - A Buffered Disk R-Tree with Piggybacking
//!
//! This crate provides a disk-resident R-tree whose updates are collected in
//! an in-memory operation buffer and applied to the tree in batches.
//!
//! ## Features
//!
//! - **Update Buffer**: Insertions and deletions are buffered; opposite
//!   operations on the same object cancel out before reaching the disk
//! - **Query Piggybacking**: Leaves visited by a query pick up the buffered
//!   operations that fit them, without leaving their occupancy bounds
//! - **Batched Emptying**: A full buffer is grouped per subtree and pushed
//!   down, with pluggable routing of deletions
//! - **Update Piggybacking**: Leaves and index nodes touched by an emptying
//!   absorb nearby buffered operations as well
//! - **Disk-Based Storage**: Checksummed pages behind an LRU cache
//! - **Statistics and Tracing**: Counters, histograms and per-object traces
//!   of every operation lifecycle
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rr_tree::{BoundingBox, DataObject, GroupMakerKind, RRTree, RRTreeConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RRTreeConfig::default()
//!     .with_max_buffer_size(256)
//!     .with_group_maker(GroupMakerKind::Trivial);
//! let mut tree = RRTree::create("places.rrt", config)?;
//!
//! tree.insert(DataObject::new(1, BoundingBox::new(0.0, 0.0, 10.0, 10.0)))?;
//! tree.insert(DataObject::new(2, BoundingBox::point(20.0, 20.0)))?;
//! tree.remove(DataObject::new(2, BoundingBox::point(20.0, 20.0)))?;
//!
//! let hits = tree.query(&BoundingBox::new(5.0, 5.0, 15.0, 15.0))?;
//! assert_eq!(hits.len(), 1);
//!
//! println!("{} buffered, {} emptyings", tree.buffer().len(), tree.stats().empty_buffers);
//! tree.close()?;
//! # Ok(())
//! # }
//! ```

// Core types
pub mod bounding_box;
pub mod config;
pub mod errors;
pub mod operation;

// Buffer and tree
pub mod buffer;
pub mod disk_tree;
mod flush;
pub mod rr_tree;
pub mod spatial_index;

// Piggybacking and routing
pub mod group_makers;
pub mod leaf_modifiers;
pub mod piggybacking_info;

// Diagnostics
pub mod stats;
pub mod tracer;

pub use bounding_box::BoundingBox;
pub use buffer::{OperationBuffer, RRTreeBuffer};
pub use config::{GroupMakerKind, PushDownStrategy, RRTreeConfig};
pub use errors::{RRTreeError, RRTreeResult};
pub use operation::{DataObject, ObjectId, Operation, OperationType};
pub use rr_tree::RRTree;
pub use spatial_index::SpatialIndex;
pub use stats::{OperationTypeStat, RRTreeStats, StatisticalData};
pub use tracer::{LoggingObjectTracer, NullObjectTracer, ObjectTracer, TracePhase};
