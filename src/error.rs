//! Error types for channel setup and teardown.
//!
//! Only the constructor-like paths (`create`, `connect`, `remove`) surface
//! these. Steady-state operations report failure through their return value
//! (`0` bytes, `false`, `None`) and never allocate.

use std::io;
use thiserror::Error;

/// Result type for channel operations.
pub type Result<T> = std::result::Result<T, ChannelError>;

/// Errors that can occur while establishing or tearing down a channel.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// Channel name exceeds what the OS accepts for a shm object.
    #[error("channel name too long: max {max} chars, got {got}")]
    NameTooLong { max: usize, got: usize },

    /// An object of this name already exists and could not be replaced.
    #[error("channel '{name}' already exists")]
    NameExists { name: String },

    /// No channel of this name exists.
    #[error("channel '{name}' not found")]
    NotFound { name: String },

    /// The OS refused to create, size, or map the backing object.
    #[error("failed to {op} shared memory '{name}': {source}")]
    MappingFailed {
        op: &'static str,
        name: String,
        #[source]
        source: io::Error,
    },

    /// The mapped object does not carry the expected layout.
    #[error("invalid channel layout: {reason}")]
    InvalidLayout { reason: &'static str },

    /// Magic tag mismatch at attach time.
    #[error("invalid channel magic: expected 0x{expected:08X}, got 0x{got:08X}")]
    InvalidMagic { expected: u32, got: u32 },

    /// Version mismatch at attach time.
    #[error("unsupported channel version: expected {expected}, got {got}")]
    VersionMismatch { expected: u32, got: u32 },
}
