//! Human-readable POD dumps for diagnostics.
//!
//! Renders a POD tree as indented text, one value per line. Used by the
//! connection layer when tracing malformed or interesting messages; the
//! output is for humans and makes no stability promises.

use std::fmt::Write;

use crate::parser::{ArrayIter, PodRef};
use crate::types::{ChoiceKind, PodType};
use crate::HEADER_SIZE;

/// Render one POD (and everything nested in it) as indented text.
#[must_use]
pub fn dump(pod: &PodRef<'_>) -> String {
    let mut out = String::new();
    dump_into(&mut out, pod, 0);
    out
}

/// Render a POD sequence (e.g. a whole message body).
#[must_use]
pub fn dump_sequence(mut data: &[u8]) -> String {
    let mut out = String::new();
    while data.len() >= HEADER_SIZE {
        match PodRef::parse(data) {
            Ok((pod, total)) => {
                dump_into(&mut out, &pod, 0);
                data = if total >= data.len() {
                    &[]
                } else {
                    &data[total..]
                };
            }
            Err(e) => {
                let _ = writeln!(out, "<{e}>");
                break;
            }
        }
    }
    out
}

fn indent(out: &mut String, depth: usize) {
    for _ in 0..depth {
        out.push_str("  ");
    }
}

#[allow(clippy::too_many_lines)]
fn dump_into(out: &mut String, pod: &PodRef<'_>, depth: usize) {
    indent(out, depth);
    let Some(ty) = pod.pod_type() else {
        let _ = writeln!(out, "Unknown(tag {})", pod.raw_type());
        return;
    };
    match ty {
        PodType::None => {
            let _ = writeln!(out, "None");
        }
        PodType::Bool => {
            let _ = writeln!(out, "Bool {:?}", pod.as_bool());
        }
        PodType::Id => {
            let _ = writeln!(out, "Id {:?}", pod.as_id());
        }
        PodType::Int => {
            let _ = writeln!(out, "Int {:?}", pod.as_int());
        }
        PodType::Long => {
            let _ = writeln!(out, "Long {:?}", pod.as_long());
        }
        PodType::Float => {
            let _ = writeln!(out, "Float {:?}", pod.as_float());
        }
        PodType::Double => {
            let _ = writeln!(out, "Double {:?}", pod.as_double());
        }
        PodType::String => {
            let _ = writeln!(out, "String {:?}", pod.as_str().unwrap_or("<bad>"));
        }
        PodType::Bytes => {
            let len = pod.as_bytes().map_or(0, <[u8]>::len);
            let _ = writeln!(out, "Bytes [{len}]");
        }
        PodType::Rectangle => {
            let _ = writeln!(out, "Rectangle {:?}", pod.as_rectangle());
        }
        PodType::Fraction => {
            let _ = writeln!(out, "Fraction {:?}", pod.as_fraction());
        }
        PodType::Bitmap => {
            let _ = writeln!(out, "Bitmap [{}]", pod.body().len());
        }
        PodType::Array => match pod.as_array() {
            Ok(iter) => {
                let _ = writeln!(out, "Array (child tag {})", iter.child_type());
                dump_children(out, iter, depth + 1);
            }
            Err(e) => {
                let _ = writeln!(out, "Array <{e}>");
            }
        },
        PodType::Struct => {
            let _ = writeln!(out, "Struct");
            let mut rest = pod.body();
            while rest.len() >= HEADER_SIZE {
                match PodRef::parse(rest) {
                    Ok((child, total)) => {
                        dump_into(out, &child, depth + 1);
                        rest = if total >= rest.len() {
                            &[]
                        } else {
                            &rest[total..]
                        };
                    }
                    Err(_) => break,
                }
            }
        }
        PodType::Object => match crate::parser::ObjectProps::new(pod) {
            Ok(obj) => {
                let _ = writeln!(
                    out,
                    "Object type:{} id:{}",
                    obj.object_type, obj.object_id
                );
                for (key, flags, value) in obj.iter() {
                    indent(out, depth + 1);
                    let _ = writeln!(out, "Prop key:{key} flags:{:#x}", flags.bits());
                    dump_into(out, &value, depth + 2);
                }
            }
            Err(e) => {
                let _ = writeln!(out, "Object <{e}>");
            }
        },
        PodType::Sequence => {
            let _ = writeln!(out, "Sequence [{}]", pod.body().len());
        }
        PodType::Pointer => {
            let _ = writeln!(out, "Pointer");
        }
        PodType::Fd => {
            let _ = writeln!(out, "Fd {:?}", pod.as_fd());
        }
        PodType::Choice => {
            let body = pod.body();
            let kind = if body.len() >= 4 {
                ChoiceKind::from_raw(u32::from_le_bytes([body[0], body[1], body[2], body[3]]))
            } else {
                None
            };
            let _ = writeln!(out, "Choice {kind:?}");
            // alternatives render through the collapsed child when trivial
            let collapsed = pod.collapse();
            if collapsed.raw_type() != pod.raw_type() {
                dump_into(out, &collapsed, depth + 1);
            }
        }
    }
}

fn dump_children(out: &mut String, iter: ArrayIter<'_>, depth: usize) {
    for child in iter.take(16) {
        dump_into(out, &child, depth);
    }
}
