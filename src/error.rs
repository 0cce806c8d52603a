//! Error types for the gateway wire codec
//!
//! "Incomplete" is not an error: it is reported through
//! [`DecodeStatus::Incomplete`](crate::protocol::DecodeStatus). Everything here
//! is either a caller-input error on encode or a malformed frame on decode.

use thiserror::Error;

/// Central error type for codec and stream operations
#[derive(Error, Debug)]
pub enum CodecError {
    // === Decode ===
    #[error("Malformed frame: {0}")]
    Malformed(String),

    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge { size: usize, max: usize },

    // === Encode (caller input) ===
    #[error("Group ID too long: {len} bytes (max: {max})")]
    GroupIdTooLong { len: usize, max: usize },

    #[error("Node ID too long: {len} bytes (max: {max})")]
    NodeIdTooLong { len: usize, max: usize },

    #[error("Too many destination node IDs: {count} (max: {max})")]
    TooManyDestinations { count: usize, max: usize },

    // === Transport ===
    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Peer not reading: {pending} bytes pending (max: {max})")]
    WriteBacklog { pending: usize, max: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CodecError {
    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        CodecError::Malformed(msg.into())
    }

    /// True when the byte stream can no longer be trusted to be frame-aligned.
    ///
    /// The stream driver drops the connection on these.
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            CodecError::Malformed(_) | CodecError::FrameTooLarge { .. }
        )
    }
}

/// Result type alias using CodecError
pub type Result<T> = std::result::Result<T, CodecError>;
