//! Owned POD value tree.
//!
//! [`Value`] is the detached form of a POD: it owns its contents and can
//! outlive the buffer it was parsed from. Building a value and parsing it
//! back yields the same tree (the round-trip identity the test-suite
//! leans on).

use crate::builder::Builder;
use crate::error::{PodError, Result};
use crate::parser::{ArrayIter, PodRef};
use crate::types::{ChoiceKind, PodType, PropFlags};

/// One property of an [`Value::Object`].
#[derive(Debug, Clone, PartialEq)]
pub struct Prop {
    /// Property key.
    pub key: u32,
    /// Property flags.
    pub flags: PropFlags,
    /// Property value.
    pub value: Value,
}

/// One control of a [`Value::Sequence`].
#[derive(Debug, Clone, PartialEq)]
pub struct Control {
    /// Time offset in sequence units.
    pub offset: u32,
    /// Control kind.
    pub kind: u32,
    /// Control payload.
    pub value: Value,
}

/// An owned POD value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// The empty value.
    None,
    /// Boolean.
    Bool(bool),
    /// Enumeration id.
    Id(u32),
    /// 32-bit integer.
    Int(i32),
    /// 64-bit integer.
    Long(i64),
    /// Single-precision float.
    Float(f32),
    /// Double-precision float.
    Double(f64),
    /// UTF-8 string.
    String(String),
    /// Byte blob.
    Bytes(Vec<u8>),
    /// `(width, height)`.
    Rectangle(u32, u32),
    /// `(num, denom)`.
    Fraction(u32, u32),
    /// Bit array.
    Bitmap(Vec<u8>),
    /// Homogeneous packed array.
    Array(Vec<Value>),
    /// Ordered fields.
    Struct(Vec<Value>),
    /// Keyed properties with object type and id.
    Object {
        /// Object type.
        object_type: u32,
        /// Object id.
        object_id: u32,
        /// Properties in order.
        props: Vec<Prop>,
    },
    /// Timed controls.
    Sequence {
        /// Time unit of the control offsets.
        unit: u32,
        /// Controls in order.
        controls: Vec<Control>,
    },
    /// File descriptor index.
    Fd(i64),
    /// Alternatives of one scalar type.
    Choice {
        /// Choice kind.
        kind: ChoiceKind,
        /// Kind-specific flags.
        flags: u32,
        /// Alternatives; all of the same scalar type.
        values: Vec<Value>,
    },
}

impl Value {
    /// Append this value to a builder.
    pub fn build(&self, b: &mut Builder) {
        match self {
            Value::None => b.none(),
            Value::Bool(v) => b.boolean(*v),
            Value::Id(v) => b.id(*v),
            Value::Int(v) => b.int(*v),
            Value::Long(v) => b.long(*v),
            Value::Float(v) => b.float(*v),
            Value::Double(v) => b.double(*v),
            Value::String(v) => b.string(v),
            Value::Bytes(v) => b.bytes(v),
            Value::Rectangle(w, h) => b.rectangle(*w, *h),
            Value::Fraction(n, d) => b.fraction(*n, *d),
            Value::Bitmap(v) => b.bitmap(v),
            Value::Array(values) => {
                let f = b.push_array();
                for v in values {
                    v.build(b);
                }
                b.pop(f);
            }
            Value::Struct(fields) => {
                let f = b.push_struct();
                for v in fields {
                    v.build(b);
                }
                b.pop(f);
            }
            Value::Object {
                object_type,
                object_id,
                props,
            } => {
                let f = b.push_object(*object_type, *object_id);
                for p in props {
                    b.prop(p.key, p.flags);
                    p.value.build(b);
                }
                b.pop(f);
            }
            Value::Sequence { unit, controls } => {
                let f = b.push_sequence(*unit);
                for c in controls {
                    b.control(c.offset, c.kind);
                    c.value.build(b);
                }
                b.pop(f);
            }
            Value::Fd(v) => b.fd(*v),
            Value::Choice {
                kind,
                flags,
                values,
            } => {
                let f = b.push_choice(*kind, *flags);
                for v in values {
                    v.build(b);
                }
                b.pop(f);
            }
        }
    }

    /// Encode this value on its own.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut b = Builder::new();
        self.build(&mut b);
        b.into_inner()
    }

    /// Decode a value from the given POD view.
    pub fn from_pod(pod: &PodRef<'_>) -> Result<Self> {
        let ty = pod
            .pod_type()
            .ok_or(PodError::Malformed("unknown type tag"))?;
        Ok(match ty {
            PodType::None => Value::None,
            PodType::Bool => Value::Bool(pod.as_bool()?),
            PodType::Id => Value::Id(pod.as_id()?),
            PodType::Int => Value::Int(pod.as_int()?),
            PodType::Long => Value::Long(pod.as_long()?),
            PodType::Float => Value::Float(pod.as_float()?),
            PodType::Double => Value::Double(pod.as_double()?),
            PodType::String => Value::String(pod.as_str()?.to_owned()),
            PodType::Bytes => Value::Bytes(pod.as_bytes()?.to_vec()),
            PodType::Rectangle => {
                let (w, h) = pod.as_rectangle()?;
                Value::Rectangle(w, h)
            }
            PodType::Fraction => {
                let (n, d) = pod.as_fraction()?;
                Value::Fraction(n, d)
            }
            PodType::Bitmap => Value::Bitmap(body_of(pod, PodType::Bitmap)?.to_vec()),
            PodType::Array => {
                let mut values = Vec::new();
                for child in pod.as_array()? {
                    values.push(Value::from_pod(&child)?);
                }
                Value::Array(values)
            }
            PodType::Struct => {
                let mut fields = Vec::new();
                let mut rest = pod.body();
                while rest.len() >= crate::HEADER_SIZE {
                    let (child, total) = PodRef::parse(rest)?;
                    fields.push(Value::from_pod(&child)?);
                    rest = if total >= rest.len() {
                        &[]
                    } else {
                        &rest[total..]
                    };
                }
                Value::Struct(fields)
            }
            PodType::Object => {
                let obj = crate::parser::ObjectProps::new(pod)?;
                let mut props = Vec::new();
                for (key, flags, value) in obj.iter() {
                    props.push(Prop {
                        key,
                        flags,
                        value: Value::from_pod(&value)?,
                    });
                }
                Value::Object {
                    object_type: obj.object_type,
                    object_id: obj.object_id,
                    props,
                }
            }
            PodType::Sequence => {
                let body = body_of(pod, PodType::Sequence)?;
                if body.len() < 8 {
                    return Err(PodError::Malformed("sequence body too short"));
                }
                let unit = u32::from_le_bytes([body[0], body[1], body[2], body[3]]);
                let mut controls = Vec::new();
                let mut rest = &body[8..];
                while rest.len() >= 8 + crate::HEADER_SIZE {
                    let offset = u32::from_le_bytes([rest[0], rest[1], rest[2], rest[3]]);
                    let kind = u32::from_le_bytes([rest[4], rest[5], rest[6], rest[7]]);
                    let (child, total) = PodRef::parse(&rest[8..])?;
                    controls.push(Control {
                        offset,
                        kind,
                        value: Value::from_pod(&child)?,
                    });
                    let consumed = 8 + total;
                    rest = if consumed >= rest.len() {
                        &[]
                    } else {
                        &rest[consumed..]
                    };
                }
                Value::Sequence { unit, controls }
            }
            PodType::Pointer => {
                return Err(PodError::Malformed("pointer pods are not transferable"))
            }
            PodType::Fd => Value::Fd(pod.as_fd()?),
            PodType::Choice => {
                let body = pod.body();
                if body.len() < 16 {
                    return Err(PodError::Malformed("choice body too short"));
                }
                let kind_raw = u32::from_le_bytes([body[0], body[1], body[2], body[3]]);
                let kind = ChoiceKind::from_raw(kind_raw)
                    .ok_or(PodError::Malformed("unknown choice kind"))?;
                let flags = u32::from_le_bytes([body[4], body[5], body[6], body[7]]);
                let child_size =
                    u32::from_le_bytes([body[8], body[9], body[10], body[11]]) as usize;
                let child_type = u32::from_le_bytes([body[12], body[13], body[14], body[15]]);
                let iter = ArrayIter::raw(child_size, child_type, &body[16..]);
                let mut values = Vec::new();
                for child in iter {
                    values.push(Value::from_pod(&child)?);
                }
                Value::Choice {
                    kind,
                    flags,
                    values,
                }
            }
        })
    }

    /// Decode the first value in a byte buffer.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let (pod, _) = PodRef::parse(data)?;
        Self::from_pod(&pod)
    }
}

fn body_of<'a>(pod: &PodRef<'a>, expected: PodType) -> Result<&'a [u8]> {
    if pod.raw_type() == expected as u32 {
        Ok(pod.body())
    } else {
        Err(PodError::WrongType {
            expected,
            found: pod.raw_type(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(v: &Value) {
        let bytes = v.to_bytes();
        let back = Value::from_bytes(&bytes).unwrap();
        assert_eq!(&back, v);
    }

    #[test]
    fn scalars_round_trip() {
        round_trip(&Value::None);
        round_trip(&Value::Bool(true));
        round_trip(&Value::Id(3));
        round_trip(&Value::Int(-5));
        round_trip(&Value::Long(1 << 40));
        round_trip(&Value::Float(0.25));
        round_trip(&Value::Double(-1.5));
        round_trip(&Value::String("párametro".into()));
        round_trip(&Value::Bytes(vec![1, 2, 3]));
        round_trip(&Value::Rectangle(1920, 1080));
        round_trip(&Value::Fraction(48000, 1));
        round_trip(&Value::Fd(2));
    }

    #[test]
    fn nested_round_trip() {
        round_trip(&Value::Struct(vec![
            Value::Int(1),
            Value::Array(vec![Value::Float(0.1), Value::Float(0.2)]),
            Value::Object {
                object_type: 10,
                object_id: 4,
                props: vec![Prop {
                    key: 1,
                    flags: PropFlags::READONLY,
                    value: Value::Choice {
                        kind: ChoiceKind::Range,
                        flags: 0,
                        values: vec![Value::Int(5), Value::Int(0), Value::Int(10)],
                    },
                }],
            },
        ]));
    }

    #[test]
    fn sequence_round_trip() {
        round_trip(&Value::Sequence {
            unit: 0,
            controls: vec![
                Control {
                    offset: 0,
                    kind: 1,
                    value: Value::Float(0.5),
                },
                Control {
                    offset: 64,
                    kind: 1,
                    value: Value::Float(0.75),
                },
            ],
        });
    }
}
