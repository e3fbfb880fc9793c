//! Error type for plugin loading and instantiation.

use thiserror::Error;

/// Errors from descriptor lookup and node instantiation.
#[derive(Debug, Error)]
pub enum PluginError {
    /// The config blob is missing or semantically wrong for this node.
    #[error("bad config: {0}")]
    BadConfig(String),

    /// A node that requires a config section got none.
    #[error("{0} requires a config section")]
    MissingConfig(&'static str),

    /// The plugin does not export this label.
    #[error("unknown label: {0}")]
    UnknownLabel(String),

    /// The loader exists but is not available in this build.
    #[error("not supported: {0}")]
    NotSupported(&'static str),

    /// File access failed (IR files, preset files, HRIR datasets).
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// DSP state could not be constructed.
    #[error(transparent)]
    Dsp(#[from] cadena_dsp::DspError),
}

impl PluginError {
    pub(crate) fn bad_config(msg: impl Into<String>) -> Self {
        Self::BadConfig(msg.into())
    }
}
