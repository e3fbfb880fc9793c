//! Error type for DSP construction.
//!
//! Kernels themselves never fail; everything that can go wrong is caught
//! when a filter or convolver is built.

use thiserror::Error;

/// Errors from constructing DSP state.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DspError {
    /// A semantic configuration error (zero block size, empty window, ...).
    #[error("bad config: {0}")]
    BadConfig(&'static str),
}
