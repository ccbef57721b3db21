//! Fuzz target for field value coercion.
//!
//! Source payloads carry strings, numbers and placeholders in any field;
//! coercion to a declared kind must handle all of them without panicking.
//!
//! Run with:
//! cargo +nightly fuzz run fuzz_value_coerce -- -max_total_time=600

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use leadsync_sync::mapping::values::{coerce, parse_datetime, parse_number};
use leadsync_sync::mapping::FieldKind;
use serde_json::Value;

const KINDS: [FieldKind; 9] = [
    FieldKind::Text,
    FieldKind::Email,
    FieldKind::Phone,
    FieldKind::Date,
    FieldKind::DateTime,
    FieldKind::Number,
    FieldKind::Integer,
    FieldKind::Boolean,
    FieldKind::Json,
];

#[derive(Arbitrary, Debug)]
enum RawValue {
    Text(String),
    Float(f64),
    Int(i64),
    Bool(bool),
    Null,
}

impl RawValue {
    fn into_json(self) -> Value {
        match self {
            RawValue::Text(s) => Value::String(s),
            RawValue::Float(f) => serde_json::Number::from_f64(f).map_or(Value::Null, Value::Number),
            RawValue::Int(i) => Value::from(i),
            RawValue::Bool(b) => Value::Bool(b),
            RawValue::Null => Value::Null,
        }
    }
}

#[derive(Arbitrary, Debug)]
struct CoerceInput {
    kind: u8,
    value: RawValue,
}

fuzz_target!(|input: CoerceInput| {
    let kind = KINDS[usize::from(input.kind) % KINDS.len()];
    let value = input.value.into_json();

    let coerced = coerce(kind, &value);
    match kind {
        FieldKind::Number | FieldKind::Integer => assert!(coerced.is_number()),
        FieldKind::Json => assert_eq!(coerced, value),
        _ => {}
    }

    if parse_datetime(&value).is_some() {
        assert!(coerce(FieldKind::DateTime, &value).is_string());
    }

    if let Some(n) = parse_number(&value) {
        assert!(n.is_finite());
    }
});
