//! POD: the self-describing binary value format used by cadena.
//!
//! A POD is an 8-byte-aligned tagged value: a `{ size: u32, type: u32 }`
//! header followed by `size` body bytes, with the total rounded up to 8
//! bytes. PODs nest: structs, objects, arrays, sequences and choices all
//! contain further PODs (or packed child bodies), and every nested value is
//! self-contained, so a message body can be walked without a schema.
//!
//! The same encoding serves two purposes: in-memory introspection of
//! parameter blobs, and the payload of framed messages on the wire
//! (see the `cadena-wire` crate).
//!
//! # Building
//!
//! [`Builder`] appends PODs to a growable byte buffer, padding each value
//! to 8 bytes and patching container sizes when a frame is popped:
//!
//! ```
//! use cadena_pod::Builder;
//!
//! let mut b = Builder::new();
//! let f = b.push_struct();
//! b.int(42);
//! b.string("hello");
//! b.pop(f);
//! let bytes = b.into_inner();
//! assert_eq!(bytes.len() % 8, 0);
//! ```
//!
//! # Parsing
//!
//! [`Parser`] walks a byte range without copying. Scalar getters flatten a
//! `Choice` of kind `None` to its first alternative, so a plain value and a
//! degenerate choice read identically:
//!
//! ```
//! use cadena_pod::{Builder, Parser};
//!
//! let mut b = Builder::new();
//! let f = b.push_struct();
//! b.int(42);
//! b.string("hello");
//! b.pop(f);
//! let bytes = b.into_inner();
//!
//! let mut p = Parser::new(&bytes);
//! let f = p.push_struct().unwrap();
//! assert_eq!(p.get_int().unwrap(), 42);
//! assert_eq!(p.get_string().unwrap(), "hello");
//! p.pop(f).unwrap();
//! ```
//!
//! [`Value`] is the owned tree form, used where a POD must outlive the
//! buffer it was parsed from (and by the round-trip test-suite).

pub mod builder;
pub mod debug;
pub mod error;
pub mod parser;
pub mod types;
pub mod value;

pub use builder::Builder;
pub use error::PodError;
pub use parser::{ObjectProps, Parser, PodRef, StructFrame};
pub use types::{ChoiceKind, PodType, PropFlags};
pub use value::{Prop, Value};

/// Round `size` up to the POD alignment (8 bytes).
#[inline]
#[must_use]
pub fn round_up(size: usize) -> usize {
    (size + 7) & !7
}

/// Size of a POD header in bytes.
pub const HEADER_SIZE: usize = 8;
