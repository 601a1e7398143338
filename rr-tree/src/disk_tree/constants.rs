//! Constants for the disk-resident data tree.

/// Default page size (16KB), one node per page
pub const PAGE_SIZE: usize = 16384;

/// Magic number for file format identification
pub const MAGIC: u32 = 0x5252_5452; // "RRTR"

/// File format version
pub const VERSION: u32 = 1;

/// Page 0 holds the header; node pages start here
pub const FIRST_NODE_PAGE: u64 = 1;
