//! Decode outcomes
//!
//! A decode call either consumed a known number of bytes, needs more bytes,
//! or failed with a malformed-frame error. Peers built on the signed
//! convention (negative = error, zero = incomplete, positive = consumed) can
//! map results with [`status_code`].

use crate::error::Result;

/// Signed status for a malformed frame.
pub const MESSAGE_ERROR: isize = -1;
/// Signed status for "wait for more bytes".
pub const MESSAGE_INCOMPLETE: isize = 0;

/// Non-error outcome of a decode step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStatus {
    /// Not enough bytes buffered yet. Keep them and retry later.
    Incomplete,
    /// Step succeeded after consuming this many bytes.
    Complete(usize),
}

impl DecodeStatus {
    #[inline(always)]
    pub fn is_complete(&self) -> bool {
        matches!(self, DecodeStatus::Complete(_))
    }

    /// Bytes consumed, if the step completed.
    #[inline(always)]
    pub fn consumed(&self) -> Option<usize> {
        match *self {
            DecodeStatus::Complete(n) => Some(n),
            DecodeStatus::Incomplete => None,
        }
    }
}

/// Collapse a decode result into the signed status convention.
pub fn status_code(result: &Result<DecodeStatus>) -> isize {
    match result {
        Ok(DecodeStatus::Complete(n)) => *n as isize,
        Ok(DecodeStatus::Incomplete) => MESSAGE_INCOMPLETE,
        Err(_) => MESSAGE_ERROR,
    }
}
