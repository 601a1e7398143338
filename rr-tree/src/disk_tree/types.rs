//! On-disk record types: child references, the file header, checksummed
//! pages and free-list links.

use serde::{Deserialize, Serialize};

use super::constants::{FIRST_NODE_PAGE, MAGIC, PAGE_SIZE, VERSION};
use super::node::RRDiskNode;
use crate::bounding_box::BoundingBox;
use crate::errors::{RRTreeError, RRTreeResult};
use crate::operation::DataObject;

/// Page ID - unique identifier for a node/page on disk
pub type PageId = u64;

// ============================================================================
// Index Entries
// ============================================================================

/// A child reference in an internal node
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChildEntry {
    pub bbox: BoundingBox,
    pub page_id: PageId,
}

impl ChildEntry {
    pub fn new(bbox: BoundingBox, page_id: PageId) -> Self {
        Self { bbox, page_id }
    }

    /// `true` if the object's extent lies inside this child's region.
    pub fn spatially_contains(&self, object: &DataObject) -> bool {
        self.bbox.contains(&object.bbox)
    }
}

// ============================================================================
// Statistics
// ============================================================================

/// I/O and shape statistics of the disk tree
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiskTreeStats {
    pub total_entries: u64,
    pub cached_pages: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub disk_reads: u64,
    pub disk_writes: u64,
    pub tree_height: u32,
    pub free_pages: u64,
}

// ============================================================================
// Free List Page
// ============================================================================

/// A free page in the free list chain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FreePage {
    /// Next free page in the chain (0 = end of chain)
    pub next_free: PageId,
}

// ============================================================================
// Page with Checksum
// ============================================================================

/// A page wrapped with CRC32 checksum for corruption detection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageWithChecksum {
    pub checksum: u32,
    pub node: RRDiskNode,
}

impl PageWithChecksum {
    pub fn new(node: RRDiskNode) -> RRTreeResult<Self> {
        let checksum = Self::calculate_checksum(&node)?;
        Ok(Self { checksum, node })
    }

    /// Calculate CRC32 checksum of node data
    pub fn calculate_checksum(node: &RRDiskNode) -> RRTreeResult<u32> {
        let serialized = bincode::serde::encode_to_vec(node, bincode::config::legacy())
            .map_err(|e| RRTreeError::Serialization(e.to_string()))?;
        Ok(Self::crc32(&serialized))
    }

    /// CRC32-MPEG2
    fn crc32(data: &[u8]) -> u32 {
        let mut crc: u32 = 0xFFFF_FFFF;
        const POLY: u32 = 0x04C1_1DB7;

        for &byte in data {
            crc ^= (byte as u32) << 24;
            for _ in 0..8 {
                crc = if crc & 0x8000_0000 != 0 {
                    (crc << 1) ^ POLY
                } else {
                    crc << 1
                };
            }
        }

        crc ^ 0xFFFF_FFFF
    }

    /// Verify checksum and consume self to return node
    pub fn into_node(self) -> RRTreeResult<RRDiskNode> {
        let expected = Self::calculate_checksum(&self.node)?;
        if self.checksum != expected {
            return Err(RRTreeError::Corrupted(format!(
                "page checksum mismatch (expected: {:x}, got: {:x})",
                expected, self.checksum
            )));
        }
        Ok(self.node)
    }
}

// ============================================================================
// File Header
// ============================================================================

/// File header stored in page 0
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileHeader {
    pub magic: u32,
    pub version: u32,
    pub page_size: u32,
    pub root_page: PageId,
    pub next_page_id: PageId,
    pub entry_count: u64,
    /// Level of the root node; 0 while the root is a leaf
    pub height: u32,
    pub min_node_capacity: u32,
    pub max_node_capacity: u32,
    pub free_list_head: PageId,
    pub free_page_count: u64,
}

impl FileHeader {
    pub fn new(min_node_capacity: usize, max_node_capacity: usize) -> Self {
        Self {
            magic: MAGIC,
            version: VERSION,
            page_size: PAGE_SIZE as u32,
            root_page: FIRST_NODE_PAGE,
            next_page_id: FIRST_NODE_PAGE + 1,
            entry_count: 0,
            height: 0,
            min_node_capacity: min_node_capacity as u32,
            max_node_capacity: max_node_capacity as u32,
            free_list_head: 0,
            free_page_count: 0,
        }
    }

    pub fn validate(&self) -> RRTreeResult<()> {
        if self.magic != MAGIC {
            return Err(RRTreeError::Corrupted("invalid file format (bad magic)".into()));
        }
        if self.version != VERSION {
            return Err(RRTreeError::Corrupted(format!(
                "unsupported file format version {}",
                self.version
            )));
        }
        if self.page_size as usize != PAGE_SIZE {
            return Err(RRTreeError::Corrupted(format!(
                "unsupported page size {}",
                self.page_size
            )));
        }
        if self.root_page < FIRST_NODE_PAGE || self.root_page >= self.next_page_id {
            return Err(RRTreeError::Corrupted(format!(
                "root page {} out of range",
                self.root_page
            )));
        }
        Ok(())
    }
}
