//! Error types shared across Colloquy crates.
//!
//! Only identifier-integrity breaches (`AllocationViolation`) are treated as
//! unrecoverable by every consumer. Malformed log structure is fatal for full
//! reconstruction but recovered by the viewer, and unparsable lines never
//! surface here at all: readers skip them and report a count.

use thiserror::Error;

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the session store and the reconstruction layers.
#[derive(Debug, Error)]
pub enum Error {
    /// An identifier was used outside the allocator's contract: a record was
    /// emitted for an agent id the allocator never issued, an agent was
    /// created twice, or a duplicate message id was found while restoring
    /// counters. Indicates a store bug or a corrupted log; never retried.
    #[error("allocation violation: {0}")]
    AllocationViolation(String),

    /// The log cannot describe a well-formed agent tree: an unresolvable
    /// `cause` or parent link, a parent cycle, or a record that would create
    /// one if appended.
    #[error("malformed log: {0}")]
    MalformedLog(String),

    /// I/O failure on the log file.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Serialization failure while building a record for append.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
