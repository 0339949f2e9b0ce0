//! Error types for VM operations
//!
//! Only conditions that halt the engine live here. Stream failures are
//! recoverable and are described by [`crate::stream::StreamError`].

use thiserror::Error;

/// Fatal conditions that stop the fetch-execute loop
#[derive(Debug, Error, Clone, PartialEq)]
pub enum VMError {
    /// A loop bracket has no partner at the same nesting depth
    #[error("Unmatched '{symbol}' at offset {offset}")]
    UnmatchedBracket { offset: usize, symbol: char },

    /// The program source could not be read
    #[error("Cannot read program source {path}: {reason}")]
    SourceUnreadable { path: String, reason: String },

    /// The tape could not be allocated
    #[error("Failed to allocate a tape of {cells} cells")]
    TapeAllocation { cells: usize },
}
