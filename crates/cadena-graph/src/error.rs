//! Error type for graph loading, setup and activation.
//!
//! Run itself is infallible; everything that can go wrong is rejected
//! before the graph reaches the real-time thread, and a failed activation
//! leaves the graph deactivated.

use thiserror::Error;

use cadena_plugin::PluginError;

/// Errors from building and activating a filter graph.
#[derive(Debug, Error)]
pub enum GraphError {
    /// Channel counts and node port counts do not divide up.
    #[error("invalid ports: {0}")]
    BadPorts(String),

    /// A named node or port does not exist.
    #[error("unknown port: {0}")]
    BadLink(String),

    /// A port is already claimed by a link or an external slot.
    #[error("port busy: {0}")]
    Busy(String),

    /// The links form a cycle; no topological order exists.
    #[error("graph contains a cycle")]
    Cycle,

    /// Too many handles, volumes or links for the fixed tables.
    #[error("no space: {0}")]
    NoSpace(String),

    /// A config value is structurally valid but semantically wrong.
    #[error("bad config: {0}")]
    BadConfig(String),

    /// The graph definition failed to parse.
    #[error("config parse error: {0}")]
    Parse(String),

    /// Descriptor lookup or instantiation failed.
    #[error(transparent)]
    Plugin(#[from] PluginError),
}
