//! Property-based tests for record round-trips and ordering.

use std::cmp::Ordering;

use proptest::prelude::*;

use crate::record::{compare_records, decode, decode_expecting, encode, RecordKind};
use crate::text::{decode_text, encode_text};
use crate::value::Value;

fn arb_value() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Int),
        any::<u64>().prop_map(Value::UInt),
        // NaN cannot be encoded
        any::<f64>()
            .prop_filter("not NaN", |f| !f.is_nan())
            .prop_map(Value::Float),
        ".*".prop_map(Value::Text),
        prop::collection::vec(any::<u8>(), 0..64).prop_map(Value::Bytes),
    ];

    leaf.prop_recursive(3, 64, 8, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..8).prop_map(Value::List),
            prop::collection::btree_map(inner.clone(), inner, 0..8).prop_map(Value::Map),
        ]
    })
}

proptest! {
    #[test]
    fn value_roundtrip(value in arb_value()) {
        let bytes = encode(RecordKind::Data, &value).expect("encode");
        let back: Value = decode(&bytes).expect("decode");
        prop_assert_eq!(value, back);
    }

    #[test]
    fn text_roundtrip(value in arb_value(), compressed in any::<bool>()) {
        let text = encode_text(RecordKind::Data, &value, compressed).expect("encode");
        let back: Value = decode_text(&text, compressed).expect("decode");
        prop_assert_eq!(value, back);
    }

    #[test]
    fn meta_never_decodes_as_data(value in arb_value()) {
        let meta = encode(RecordKind::Meta, &value).expect("encode");
        prop_assert!(decode_expecting::<Value>(RecordKind::Data, &meta).is_err());
    }

    #[test]
    fn comparator_agrees_with_value_order(a in arb_value(), b in arb_value()) {
        let ea = encode(RecordKind::Data, &a).expect("encode");
        let eb = encode(RecordKind::Data, &b).expect("encode");
        prop_assert_eq!(compare_records(&ea, &eb), a.cmp(&b));
    }

    #[test]
    fn integer_keys_sort_numerically(a in any::<i64>(), b in any::<i64>()) {
        let ea = encode(RecordKind::Data, &a).expect("encode");
        let eb = encode(RecordKind::Data, &b).expect("encode");
        prop_assert_eq!(compare_records(&ea, &eb), a.cmp(&b));
        prop_assert_eq!(compare_records(&ea, &ea), Ordering::Equal);
    }
}
