//! Paged storage of the data tree.
//!
//! ```text
//! page 0        file header
//! page 1..n     nodes (bincode, CRC32 checked) or free-list links
//! ```
//!
//! Nodes are loaded on demand through an LRU cache and written back when
//! evicted or flushed.

mod cache;
mod constants;
mod data_tree;
mod node;
mod node_contract;
mod storage;
mod types;

pub use constants::PAGE_SIZE;
pub use data_tree::RRDiskDataTree;
pub use node::{NodeCapacity, NodeEntries, RRDiskNode};
pub use node_contract::{DiskNode, EntryIndexGuard};
pub use types::{ChildEntry, DiskTreeStats, FileHeader, PageId};
