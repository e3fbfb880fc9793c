//! POD type and choice identifiers.
//!
//! The numeric values are part of the wire format and stable across
//! versions; new types may only be appended.

/// Type tag carried in every POD header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum PodType {
    /// The empty value; `size == 0`.
    None = 1,
    /// 32-bit boolean (non-zero is true).
    Bool = 2,
    /// 32-bit enumeration id.
    Id = 3,
    /// Signed 32-bit integer.
    Int = 4,
    /// Signed 64-bit integer.
    Long = 5,
    /// IEEE-754 single precision float.
    Float = 6,
    /// IEEE-754 double precision float.
    Double = 7,
    /// NUL-terminated UTF-8 string; `size` includes the terminator.
    String = 8,
    /// Raw byte blob.
    Bytes = 9,
    /// `{ width: u32, height: u32 }`.
    Rectangle = 10,
    /// `{ num: u32, denom: u32 }`.
    Fraction = 11,
    /// Bit array.
    Bitmap = 12,
    /// Packed homogeneous children: one child header, then raw bodies.
    Array = 13,
    /// Ordered sequence of PODs.
    Struct = 14,
    /// `{ type: u32, id: u32 }` then `Prop { key, flags, value }` entries.
    Object = 15,
    /// Timed controls: `{ unit: u32, pad: u32 }` then offset/type/value triples.
    Sequence = 16,
    /// `{ type: u32, pad: u32, value: u64 }`; never valid on the wire.
    Pointer = 17,
    /// File descriptor, stored as a 64-bit index into the message FD array.
    Fd = 18,
    /// Alternatives of one child type, prefixed by the choice kind.
    Choice = 19,
}

impl PodType {
    /// Map a wire tag back to a type, or `None` for unknown tags.
    #[must_use]
    pub fn from_raw(raw: u32) -> Option<Self> {
        Some(match raw {
            1 => Self::None,
            2 => Self::Bool,
            3 => Self::Id,
            4 => Self::Int,
            5 => Self::Long,
            6 => Self::Float,
            7 => Self::Double,
            8 => Self::String,
            9 => Self::Bytes,
            10 => Self::Rectangle,
            11 => Self::Fraction,
            12 => Self::Bitmap,
            13 => Self::Array,
            14 => Self::Struct,
            15 => Self::Object,
            16 => Self::Sequence,
            17 => Self::Pointer,
            18 => Self::Fd,
            19 => Self::Choice,
            _ => return None,
        })
    }
}

/// Kind of a [`PodType::Choice`] value.
///
/// A choice of kind [`ChoiceKind::None`] with a single alternative is
/// equivalent to its child for collection purposes; the parser flattens it
/// transparently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ChoiceKind {
    /// A single fixed value.
    None = 0,
    /// `default, min, max`.
    Range = 1,
    /// `default, min, max, step`.
    Step = 2,
    /// `default, alternative...`.
    Enum = 3,
    /// `default, possible flags...`.
    Flags = 4,
}

impl ChoiceKind {
    /// Map a wire tag back to a kind, or `None` for unknown tags.
    #[must_use]
    pub fn from_raw(raw: u32) -> Option<Self> {
        Some(match raw {
            0 => Self::None,
            1 => Self::Range,
            2 => Self::Step,
            3 => Self::Enum,
            4 => Self::Flags,
            _ => return None,
        })
    }
}

bitflags::bitflags! {
    /// Flags on an object property.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PropFlags: u32 {
        /// Property is read-only.
        const READONLY = 1 << 0;
        /// Property value is hardware-controlled.
        const HARDWARE = 1 << 1;
        /// Property contains sensitive data that must not be logged.
        const HIDDEN = 1 << 2;
    }
}
