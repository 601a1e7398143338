//! Error types for the buffered R-tree.
//!
//! Recoverable failures (I/O, codec problems, misuse of the public API) are
//! reported through [`RRTreeError`]. Violations of the node contract that would
//! corrupt occupancy invariants are not errors: they panic at the call site.

use std::io;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur in buffered R-tree operations
#[derive(Debug, Error)]
pub enum RRTreeError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Operation buffer is full (capacity {capacity})")]
    BufferOverflow { capacity: usize },

    #[error("Corrupted tree file: {0}")]
    Corrupted(String),

    #[error("Tree is closed")]
    Closed,
}

/// Result type for buffered R-tree operations
pub type RRTreeResult<T> = Result<T, RRTreeError>;

impl RRTreeError {
    /// Returns `true` if the error leaves the on-disk structure untouched.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            RRTreeError::InvalidOperation(_)
                | RRTreeError::InvalidConfig(_)
                | RRTreeError::BufferOverflow { .. }
                | RRTreeError::Closed
        )
    }
}
