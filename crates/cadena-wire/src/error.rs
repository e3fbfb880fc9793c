//! Wire-level error type.

use thiserror::Error;

use cadena_pod::PodError;

use crate::marshal::Permissions;

/// Errors from the connection and marshaling layers.
#[derive(Debug, Error)]
pub enum WireError {
    /// The socket would block; retry when the event loop signals.
    #[error("operation would block")]
    TryAgain,

    /// The peer disconnected; the connection is unusable.
    #[error("connection closed by peer")]
    Closed,

    /// The byte stream violates the framing rules.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// A message body failed to demarshal.
    #[error("invalid message for object {id} opcode {opcode}: {source}")]
    Demarshal {
        /// Target object of the offending message.
        id: u32,
        /// Opcode of the offending message.
        opcode: u8,
        /// Underlying POD parse failure.
        #[source]
        source: PodError,
    },

    /// The caller lacks the permissions the method requires.
    #[error("permission denied on object {id}: requested {requested:?}, held {held:?}")]
    Access {
        /// Target object.
        id: u32,
        /// Permissions the method requires.
        requested: Permissions,
        /// Permissions actually held.
        held: Permissions,
    },

    /// No object is registered under this id.
    #[error("no such object {0}")]
    NoEntry(u32),

    /// No method is registered for this opcode.
    #[error("object {id} has no method {opcode}")]
    NoMethod {
        /// Target object.
        id: u32,
        /// Unknown opcode.
        opcode: u8,
    },

    /// The outbound fd table is full.
    #[error("too many file descriptors in flight")]
    NoSpace,

    /// Socket-level failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
