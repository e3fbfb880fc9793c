//! Cadena wire - framed POD messages over local stream sockets.
//!
//! A [`Connection`] owns an `AF_UNIX`/`SOCK_STREAM` socket and frames
//! length-prefixed messages over it: a 16-byte little-endian header
//! (object id, 24-bit size packed with the 8-bit opcode, sequence number,
//! fd count) followed by an 8-byte-padded POD body and an optional
//! trailing footer. File descriptors ride `SCM_RIGHTS` ancillary data and
//! are addressed from message bodies by index.
//!
//! All socket I/O is non-blocking; the embedder integrates the fd into
//! its own event loop, calling [`Connection::refill`] when readable and
//! [`Connection::flush`] when writable. Incoming messages are peeled off
//! with [`Connection::get_next`], which borrows into the receive buffer
//! (zero copy; the borrow ends at the next call).
//!
//! The [`marshal`] module layers per-method demarshaling with permission
//! checks on top, and [`footer`] carries lightweight out-of-band state
//! (the registry generation counter) in message footers.

pub mod connection;
pub mod error;
pub mod footer;
pub mod marshal;
pub mod proto;
pub mod socket;

pub use connection::{Connection, FdClaims, Message, MessageBuilder, HEADER_SIZE, MAX_FDS};
pub use error::WireError;
pub use footer::{FooterReader, Generation};
pub use marshal::{Dispatched, Dispatcher, Method, Permissions};
pub use socket::{client_connect, runtime_dir, ServerSocket, DEFAULT_SOCKET_NAME};
