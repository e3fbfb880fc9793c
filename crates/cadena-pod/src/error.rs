//! Error type for POD building and parsing.

use thiserror::Error;

use crate::types::PodType;

/// Errors produced while walking or constructing PODs.
///
/// The variants map onto the engine-wide error kinds: [`PodError::Truncated`]
/// is a pipe error (the buffer ended inside a value), [`PodError::WrongType`]
/// an invalid-argument error, [`PodError::Malformed`] a protocol violation,
/// and [`PodError::NoEntry`] a missing key or exhausted container.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PodError {
    /// The buffer ended before the value it claims to contain.
    #[error("truncated pod: need {needed} bytes, {available} available")]
    Truncated {
        /// Bytes the current value requires.
        needed: usize,
        /// Bytes actually remaining.
        available: usize,
    },

    /// The next value has a different type than the caller asked for.
    #[error("type mismatch: expected {expected:?}, found tag {found}")]
    WrongType {
        /// Requested type.
        expected: PodType,
        /// Type tag actually present.
        found: u32,
    },

    /// Structurally invalid data (bad tag, misaligned size, nested overflow).
    #[error("malformed pod: {0}")]
    Malformed(&'static str),

    /// A requested property key or struct field does not exist.
    #[error("no such entry")]
    NoEntry,

    /// Frame stack misuse (pop without push, scalar inside the wrong frame).
    #[error("invalid frame operation: {0}")]
    BadFrame(&'static str),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, PodError>;
