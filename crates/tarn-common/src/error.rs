//! Error types for TarnDB.

use thiserror::Error;

/// Result type alias using TarnError.
pub type Result<T> = std::result::Result<T, TarnError>;

/// Errors that can occur in TarnDB operations.
#[derive(Debug, Error)]
pub enum TarnError {
    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Argument errors
    #[error("Key must not be empty")]
    EmptyKey,

    #[error("Value must not be empty")]
    EmptyValue,

    #[error("Key too large: {size} units (max {max})")]
    KeyTooLarge { size: usize, max: usize },

    // Corruption errors
    #[error("Page corrupted: {page_no}, reason: {reason}")]
    PageCorrupted { page_no: u32, reason: String },

    #[error("Entry corrupted at offset {offset}: {reason}")]
    EntryCorrupted { offset: u64, reason: String },

    // Buffer errors
    #[error("Buffer is at max capacity but no entries can be evicted")]
    BufferFull,
}
