//! Property tests for the build/parse round-trip identity.
//!
//! For any value tree the builder can produce, parsing the encoded bytes
//! yields an equal tree, and the encoding is always 8-byte aligned.

use proptest::collection::vec;
use proptest::prelude::*;

use cadena_pod::{ChoiceKind, Prop, PropFlags, Value};

/// Scalars that are legal as packed array/choice children.
fn packed_scalar() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<i32>().prop_map(Value::Int),
        any::<u32>().prop_map(Value::Id),
        // Use bit-exact floats that are not NaN so PartialEq holds.
        any::<i32>().prop_map(|b| Value::Float(b as f32)),
    ]
}

/// Same-typed vector of packed children (arrays are homogeneous).
fn packed_children() -> impl Strategy<Value = Vec<Value>> {
    prop_oneof![
        vec(any::<i32>(), 1..8).prop_map(|v| v.into_iter().map(Value::Int).collect()),
        vec(any::<u32>(), 1..8).prop_map(|v| v.into_iter().map(Value::Id).collect()),
        vec(any::<i32>(), 1..8)
            .prop_map(|v| v.into_iter().map(|b| Value::Float(b as f32)).collect()),
    ]
}

fn leaf() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::None),
        any::<bool>().prop_map(Value::Bool),
        any::<i32>().prop_map(Value::Int),
        any::<i64>().prop_map(Value::Long),
        any::<i64>().prop_map(|b| Value::Double(b as f64)),
        "[a-zA-Z0-9 _:/.-]{0,24}".prop_map(Value::String),
        vec(any::<u8>(), 0..32).prop_map(Value::Bytes),
        (any::<u32>(), any::<u32>()).prop_map(|(w, h)| Value::Rectangle(w, h)),
        (any::<u32>(), 1u32..).prop_map(|(n, d)| Value::Fraction(n, d)),
        (0i64..64).prop_map(Value::Fd),
        packed_scalar(),
        packed_children().prop_map(Value::Array),
        (
            prop_oneof![
                Just(ChoiceKind::None),
                Just(ChoiceKind::Range),
                Just(ChoiceKind::Enum)
            ],
            packed_children()
        )
            .prop_map(|(kind, values)| Value::Choice {
                kind,
                flags: 0,
                values
            }),
    ]
}

fn tree() -> impl Strategy<Value = Value> {
    leaf().prop_recursive(3, 24, 6, |inner| {
        prop_oneof![
            vec(inner.clone(), 0..6).prop_map(Value::Struct),
            (
                any::<u32>(),
                any::<u32>(),
                vec((any::<u32>(), inner), 0..5)
            )
                .prop_map(|(object_type, object_id, entries)| Value::Object {
                    object_type,
                    object_id,
                    props: entries
                        .into_iter()
                        .map(|(key, value)| Prop {
                            key,
                            flags: PropFlags::empty(),
                            value,
                        })
                        .collect(),
                }),
        ]
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// parse(build(v)) == v for every buildable value.
    #[test]
    fn build_parse_identity(v in tree()) {
        let bytes = v.to_bytes();
        prop_assert_eq!(bytes.len() % 8, 0, "encoding must stay 8-byte aligned");
        let back = Value::from_bytes(&bytes).unwrap();
        prop_assert_eq!(back, v);
    }

    /// A value nested in a struct is self-contained: re-parsing the nested
    /// bytes alone yields the same value.
    #[test]
    fn nested_values_are_self_contained(v in leaf()) {
        let outer = Value::Struct(vec![Value::Int(1), v.clone()]);
        let bytes = outer.to_bytes();
        let Value::Struct(fields) = Value::from_bytes(&bytes).unwrap() else {
            panic!("expected struct");
        };
        prop_assert_eq!(&fields[1], &v);

        // the nested encoding alone decodes identically
        let nested = v.to_bytes();
        prop_assert_eq!(Value::from_bytes(&nested).unwrap(), v);
    }

    /// Choice of kind None with one alternative reads as its child.
    #[test]
    fn choice_none_is_transparent(n in any::<i32>()) {
        let c = Value::Choice {
            kind: ChoiceKind::None,
            flags: 0,
            values: vec![Value::Int(n)],
        };
        let bytes = c.to_bytes();
        let mut p = cadena_pod::Parser::new(&bytes);
        prop_assert_eq!(p.get_int().unwrap(), n);
    }
}
