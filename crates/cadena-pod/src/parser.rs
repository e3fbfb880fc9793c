//! Zero-copy POD reader.
//!
//! [`PodRef`] is a borrowed view of one value (type tag plus body bytes);
//! [`Parser`] is a cursor over a POD sequence with a frame stack for
//! struct/object nesting.
//!
//! Reads out of the underlying buffer are bracketed with compiler fences:
//! on a shared-memory transport the peer may update the buffer
//! concurrently, and the fences keep the compiler from hoisting the size
//! checks across the copy.

use std::sync::atomic::{compiler_fence, Ordering};

use crate::error::{PodError, Result};
use crate::round_up;
use crate::types::{ChoiceKind, PodType, PropFlags};
use crate::HEADER_SIZE;

#[inline]
fn fetch(data: &[u8], offset: usize, len: usize) -> Result<&[u8]> {
    if offset + len > data.len() {
        return Err(PodError::Truncated {
            needed: offset + len,
            available: data.len(),
        });
    }
    compiler_fence(Ordering::Acquire);
    let out = &data[offset..offset + len];
    compiler_fence(Ordering::Acquire);
    Ok(out)
}

#[inline]
fn read_u32(data: &[u8], offset: usize) -> Result<u32> {
    let b = fetch(data, offset, 4)?;
    let mut a = [0u8; 4];
    a.copy_from_slice(b);
    Ok(u32::from_le_bytes(a))
}

#[inline]
fn read_u64(data: &[u8], offset: usize) -> Result<u64> {
    let b = fetch(data, offset, 8)?;
    let mut a = [0u8; 8];
    a.copy_from_slice(b);
    Ok(u64::from_le_bytes(a))
}

/// A borrowed view of a single POD: its raw type tag and body bytes.
///
/// The view is valid for the lifetime of the buffer it was parsed from.
#[derive(Debug, Clone, Copy)]
pub struct PodRef<'a> {
    ty: u32,
    body: &'a [u8],
}

impl<'a> PodRef<'a> {
    /// Parse the POD starting at the beginning of `data`.
    ///
    /// Returns the view and the padded total size it occupies.
    pub fn parse(data: &'a [u8]) -> Result<(Self, usize)> {
        let size = read_u32(data, 0)? as usize;
        let ty = read_u32(data, 4)?;
        let body = fetch(data, HEADER_SIZE, size)?;
        Ok((Self { ty, body }, HEADER_SIZE + round_up(size)))
    }

    /// Raw type tag.
    #[must_use]
    pub fn raw_type(&self) -> u32 {
        self.ty
    }

    /// Decoded type, or `None` for unknown tags.
    #[must_use]
    pub fn pod_type(&self) -> Option<PodType> {
        PodType::from_raw(self.ty)
    }

    /// Body bytes (unpadded).
    #[must_use]
    pub fn body(&self) -> &'a [u8] {
        self.body
    }

    /// Collapse a `Choice` of kind `None` to its first alternative.
    ///
    /// Any other value (including other choice kinds) is returned
    /// unchanged; callers that want the enclosing choice ask for the pod
    /// itself instead of a scalar.
    #[must_use]
    pub fn collapse(self) -> Self {
        if self.ty != PodType::Choice as u32 {
            return self;
        }
        let Ok(kind) = read_u32(self.body, 0) else {
            return self;
        };
        if kind != ChoiceKind::None as u32 {
            return self;
        }
        let (Ok(child_size), Ok(child_type)) = (read_u32(self.body, 8), read_u32(self.body, 12))
        else {
            return self;
        };
        let child_size = child_size as usize;
        match fetch(self.body, 16, child_size) {
            Ok(body) if child_size > 0 => Self {
                ty: child_type,
                body,
            },
            _ => self,
        }
    }

    fn expect_body(&self, expected: PodType, len: usize) -> Result<&'a [u8]> {
        let c = self.collapse();
        if c.ty != expected as u32 {
            return Err(PodError::WrongType {
                expected,
                found: c.ty,
            });
        }
        if c.body.len() < len {
            return Err(PodError::Truncated {
                needed: len,
                available: c.body.len(),
            });
        }
        Ok(c.body)
    }

    /// Read as boolean.
    pub fn as_bool(&self) -> Result<bool> {
        Ok(read_u32(self.expect_body(PodType::Bool, 4)?, 0)? != 0)
    }

    /// Read as id.
    pub fn as_id(&self) -> Result<u32> {
        read_u32(self.expect_body(PodType::Id, 4)?, 0)
    }

    /// Read as 32-bit integer.
    pub fn as_int(&self) -> Result<i32> {
        Ok(read_u32(self.expect_body(PodType::Int, 4)?, 0)? as i32)
    }

    /// Read as 64-bit integer.
    pub fn as_long(&self) -> Result<i64> {
        Ok(read_u64(self.expect_body(PodType::Long, 8)?, 0)? as i64)
    }

    /// Read as single-precision float.
    pub fn as_float(&self) -> Result<f32> {
        Ok(f32::from_bits(read_u32(
            self.expect_body(PodType::Float, 4)?,
            0,
        )?))
    }

    /// Read as double-precision float.
    pub fn as_double(&self) -> Result<f64> {
        Ok(f64::from_bits(read_u64(
            self.expect_body(PodType::Double, 8)?,
            0,
        )?))
    }

    /// Read as string, stripping the NUL terminator.
    pub fn as_str(&self) -> Result<&'a str> {
        let body = self.expect_body(PodType::String, 1)?;
        let end = body
            .iter()
            .position(|&b| b == 0)
            .ok_or(PodError::Malformed("string without NUL terminator"))?;
        std::str::from_utf8(&body[..end]).map_err(|_| PodError::Malformed("string is not UTF-8"))
    }

    /// Read as byte blob.
    pub fn as_bytes(&self) -> Result<&'a [u8]> {
        self.expect_body(PodType::Bytes, 0)
    }

    /// Read as rectangle `(width, height)`.
    pub fn as_rectangle(&self) -> Result<(u32, u32)> {
        let b = self.expect_body(PodType::Rectangle, 8)?;
        Ok((read_u32(b, 0)?, read_u32(b, 4)?))
    }

    /// Read as fraction `(num, denom)`.
    pub fn as_fraction(&self) -> Result<(u32, u32)> {
        let b = self.expect_body(PodType::Fraction, 8)?;
        Ok((read_u32(b, 0)?, read_u32(b, 4)?))
    }

    /// Read as a file descriptor index.
    pub fn as_fd(&self) -> Result<i64> {
        Ok(read_u64(self.expect_body(PodType::Fd, 8)?, 0)? as i64)
    }

    /// Iterate the packed children of an `Array`.
    pub fn as_array(&self) -> Result<ArrayIter<'a>> {
        let body = self.expect_body(PodType::Array, 8)?;
        let child_size = read_u32(body, 0)? as usize;
        let child_type = read_u32(body, 4)?;
        if child_size == 0 && body.len() > 8 {
            return Err(PodError::Malformed("array with zero child size"));
        }
        Ok(ArrayIter {
            child_size,
            child_type,
            rest: &body[8..],
        })
    }
}

/// Iterator over the packed children of an array (or choice alternatives).
#[derive(Debug, Clone)]
pub struct ArrayIter<'a> {
    child_size: usize,
    child_type: u32,
    rest: &'a [u8],
}

impl<'a> ArrayIter<'a> {
    /// Type tag of the children.
    #[must_use]
    pub fn child_type(&self) -> u32 {
        self.child_type
    }

    pub(crate) fn raw(child_size: usize, child_type: u32, rest: &'a [u8]) -> Self {
        Self {
            child_size,
            child_type,
            rest,
        }
    }
}

impl<'a> Iterator for ArrayIter<'a> {
    type Item = PodRef<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.child_size == 0 || self.rest.len() < self.child_size {
            return None;
        }
        let (body, rest) = self.rest.split_at(self.child_size);
        self.rest = rest;
        Some(PodRef {
            ty: self.child_type,
            body,
        })
    }
}

#[derive(Debug)]
struct ParseFrame {
    /// End of this frame's body in the buffer.
    end: usize,
    /// Outer frame's end, restored on pop.
    outer_end: usize,
}

/// Token for an open parser frame; consumed by [`Parser::pop`].
#[derive(Debug)]
#[must_use = "an unpopped frame leaves the cursor inside the container"]
pub struct StructFrame {
    index: usize,
}

/// Cursor over a POD sequence.
#[derive(Debug)]
pub struct Parser<'a> {
    data: &'a [u8],
    offset: usize,
    end: usize,
    frames: Vec<ParseFrame>,
}

impl<'a> Parser<'a> {
    /// Parse the given byte range as a POD sequence.
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            offset: 0,
            end: data.len(),
            frames: Vec::new(),
        }
    }

    /// Current cursor offset into the buffer.
    #[must_use]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Whether the current frame has no values left.
    #[must_use]
    pub fn at_end(&self) -> bool {
        self.offset + HEADER_SIZE > self.end
    }

    /// Peek the POD under the cursor without advancing.
    pub fn peek(&self) -> Result<PodRef<'a>> {
        if self.at_end() {
            return Err(PodError::NoEntry);
        }
        let (pod, total) = PodRef::parse(&self.data[self.offset..])?;
        if self.offset + total > round_up(self.end) {
            return Err(PodError::Truncated {
                needed: self.offset + total,
                available: self.end,
            });
        }
        Ok(pod)
    }

    /// Move past the POD under the cursor.
    pub fn advance(&mut self) -> Result<()> {
        if self.at_end() {
            return Err(PodError::NoEntry);
        }
        let (_, total) = PodRef::parse(&self.data[self.offset..])?;
        self.offset += total;
        Ok(())
    }

    /// Take the POD under the cursor and advance past it.
    pub fn get_pod(&mut self) -> Result<PodRef<'a>> {
        let pod = self.peek()?;
        self.advance()?;
        Ok(pod)
    }

    fn get_with<T>(&mut self, f: impl FnOnce(&PodRef<'a>) -> Result<T>) -> Result<T> {
        let pod = self.peek()?;
        let v = f(&pod)?;
        self.advance()?;
        Ok(v)
    }

    /// Read a boolean and advance.
    pub fn get_bool(&mut self) -> Result<bool> {
        self.get_with(PodRef::as_bool)
    }

    /// Read an id and advance.
    pub fn get_id(&mut self) -> Result<u32> {
        self.get_with(PodRef::as_id)
    }

    /// Read an int and advance.
    pub fn get_int(&mut self) -> Result<i32> {
        self.get_with(PodRef::as_int)
    }

    /// Read a long and advance.
    pub fn get_long(&mut self) -> Result<i64> {
        self.get_with(PodRef::as_long)
    }

    /// Read a float and advance.
    pub fn get_float(&mut self) -> Result<f32> {
        self.get_with(PodRef::as_float)
    }

    /// Read a double and advance.
    pub fn get_double(&mut self) -> Result<f64> {
        self.get_with(PodRef::as_double)
    }

    /// Read a string and advance.
    pub fn get_string(&mut self) -> Result<&'a str> {
        self.get_with(PodRef::as_str)
    }

    /// Read a byte blob and advance.
    pub fn get_bytes(&mut self) -> Result<&'a [u8]> {
        self.get_with(PodRef::as_bytes)
    }

    /// Read a file descriptor index and advance.
    pub fn get_fd(&mut self) -> Result<i64> {
        self.get_with(PodRef::as_fd)
    }

    /// Optional-field variant: `Ok(None)` when the frame is exhausted or
    /// the value is `None`, instead of failing the surrounding aggregate.
    pub fn get_opt<T>(
        &mut self,
        f: impl FnOnce(&PodRef<'a>) -> Result<T>,
    ) -> Result<Option<T>> {
        match self.peek() {
            Err(PodError::NoEntry) => Ok(None),
            Err(e) => Err(e),
            Ok(pod) => {
                if pod.raw_type() == PodType::None as u32 {
                    self.advance()?;
                    return Ok(None);
                }
                let v = f(&pod)?;
                self.advance()?;
                Ok(Some(v))
            }
        }
    }

    fn push_container(&mut self, expected: PodType, skip: usize) -> Result<(StructFrame, PodRef<'a>)> {
        let pod = self.peek()?;
        if pod.raw_type() != expected as u32 {
            return Err(PodError::WrongType {
                expected,
                found: pod.raw_type(),
            });
        }
        let body_start = self.offset + HEADER_SIZE;
        let body_end = body_start + pod.body().len();
        self.frames.push(ParseFrame {
            end: body_end,
            outer_end: self.end,
        });
        self.end = body_end;
        self.offset = body_start + skip;
        Ok((
            StructFrame {
                index: self.frames.len() - 1,
            },
            pod,
        ))
    }

    /// Enter a struct; subsequent reads walk its fields.
    pub fn push_struct(&mut self) -> Result<StructFrame> {
        Ok(self.push_container(PodType::Struct, 0)?.0)
    }

    /// Enter an object; returns the frame and the `(type, id)` pair.
    pub fn push_object(&mut self) -> Result<(StructFrame, u32, u32)> {
        let offset = self.offset;
        let (frame, _) = self.push_container(PodType::Object, 8)?;
        let otype = read_u32(self.data, offset + HEADER_SIZE)?;
        let oid = read_u32(self.data, offset + HEADER_SIZE + 4)?;
        Ok((frame, otype, oid))
    }

    /// Read the next property in an object frame.
    ///
    /// Returns `Ok(None)` when the object is exhausted.
    pub fn next_prop(&mut self) -> Result<Option<(u32, PropFlags, PodRef<'a>)>> {
        if self.offset + 8 > self.end {
            return Ok(None);
        }
        let key = read_u32(self.data, self.offset)?;
        let flags = PropFlags::from_bits_truncate(read_u32(self.data, self.offset + 4)?);
        self.offset += 8;
        let value = self.get_pod()?;
        Ok(Some((key, flags, value)))
    }

    /// Leave a container, restoring the cursor past it.
    pub fn pop(&mut self, frame: StructFrame) -> Result<()> {
        if frame.index + 1 != self.frames.len() {
            return Err(PodError::BadFrame("pop out of order"));
        }
        let f = self
            .frames
            .pop()
            .ok_or(PodError::BadFrame("pop without push"))?;
        self.offset = round_up(f.end);
        self.end = f.outer_end;
        Ok(())
    }
}

/// Property access over an object body, independent of a parser cursor.
#[derive(Debug, Clone, Copy)]
pub struct ObjectProps<'a> {
    body: &'a [u8],
    /// Object type from the body header.
    pub object_type: u32,
    /// Object id from the body header.
    pub object_id: u32,
}

impl<'a> ObjectProps<'a> {
    /// Wrap an object POD for keyed property lookup.
    pub fn new(pod: &PodRef<'a>) -> Result<Self> {
        if pod.raw_type() != PodType::Object as u32 {
            return Err(PodError::WrongType {
                expected: PodType::Object,
                found: pod.raw_type(),
            });
        }
        let body = pod.body();
        Ok(Self {
            body,
            object_type: read_u32(body, 0)?,
            object_id: read_u32(body, 4)?,
        })
    }

    /// Iterate all properties.
    pub fn iter(&self) -> PropIter<'a> {
        PropIter {
            rest: &self.body[8..],
        }
    }

    /// Find a property by key.
    pub fn find(&self, key: u32) -> Result<PodRef<'a>> {
        self.iter()
            .find(|&(k, _, _)| k == key)
            .map(|(_, _, v)| v)
            .ok_or(PodError::NoEntry)
    }
}

/// Iterator over `(key, flags, value)` properties of an object.
#[derive(Debug, Clone)]
pub struct PropIter<'a> {
    rest: &'a [u8],
}

impl<'a> Iterator for PropIter<'a> {
    type Item = (u32, PropFlags, PodRef<'a>);

    fn next(&mut self) -> Option<Self::Item> {
        if self.rest.len() < 8 {
            return None;
        }
        let key = read_u32(self.rest, 0).ok()?;
        let flags = PropFlags::from_bits_truncate(read_u32(self.rest, 4).ok()?);
        let (pod, total) = PodRef::parse(&self.rest[8..]).ok()?;
        let consumed = 8 + total;
        self.rest = if consumed >= self.rest.len() {
            &[]
        } else {
            &self.rest[consumed..]
        };
        Some((key, flags, pod))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::Builder;
    use crate::types::ChoiceKind;

    #[test]
    fn walk_struct() {
        let mut b = Builder::new();
        let f = b.push_struct();
        b.int(1);
        b.string("x");
        b.double(0.5);
        b.pop(f);
        let bytes = b.into_inner();

        let mut p = Parser::new(&bytes);
        let f = p.push_struct().unwrap();
        assert_eq!(p.get_int().unwrap(), 1);
        assert_eq!(p.get_string().unwrap(), "x");
        assert!((p.get_double().unwrap() - 0.5).abs() < f64::EPSILON);
        assert!(p.at_end());
        p.pop(f).unwrap();
    }

    #[test]
    fn choice_none_collapses_to_child() {
        let mut b = Builder::new();
        let f = b.push_choice(ChoiceKind::None, 0);
        b.int(9);
        b.pop(f);
        let bytes = b.into_inner();

        let mut p = Parser::new(&bytes);
        assert_eq!(p.get_int().unwrap(), 9);
    }

    #[test]
    fn choice_range_does_not_collapse() {
        let mut b = Builder::new();
        let f = b.push_choice(ChoiceKind::Range, 0);
        b.int(5);
        b.int(0);
        b.int(10);
        b.pop(f);
        let bytes = b.into_inner();

        let mut p = Parser::new(&bytes);
        assert!(matches!(
            p.get_int(),
            Err(PodError::WrongType { .. })
        ));
    }

    #[test]
    fn object_prop_lookup() {
        let mut b = Builder::new();
        let f = b.push_object(100, 7);
        b.prop(1, PropFlags::empty());
        b.int(11);
        b.prop(2, PropFlags::READONLY);
        b.string("v");
        b.pop(f);
        let bytes = b.into_inner();

        let mut p = Parser::new(&bytes);
        let pod = p.get_pod().unwrap();
        let obj = ObjectProps::new(&pod).unwrap();
        assert_eq!(obj.object_type, 100);
        assert_eq!(obj.object_id, 7);
        assert_eq!(obj.find(1).unwrap().as_int().unwrap(), 11);
        assert_eq!(obj.find(2).unwrap().as_str().unwrap(), "v");
        assert!(matches!(obj.find(3), Err(PodError::NoEntry)));
    }

    #[test]
    fn optional_fields_do_not_abort() {
        let mut b = Builder::new();
        let f = b.push_struct();
        b.int(1);
        b.none();
        b.pop(f);
        let bytes = b.into_inner();

        let mut p = Parser::new(&bytes);
        let f = p.push_struct().unwrap();
        assert_eq!(p.get_int().unwrap(), 1);
        assert_eq!(p.get_opt(PodRef::as_int).unwrap(), None);
        assert_eq!(p.get_opt(PodRef::as_int).unwrap(), None); // exhausted
        p.pop(f).unwrap();
    }

    #[test]
    fn truncated_is_pipe_error() {
        let mut b = Builder::new();
        b.long(1);
        let bytes = b.into_inner();
        let mut p = Parser::new(&bytes[..12]);
        assert!(matches!(p.get_long(), Err(PodError::Truncated { .. })));
    }
}
