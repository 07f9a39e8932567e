//! Typed-envelope marshaling between host JSON and script values.
//!
//! Values crossing the host boundary travel inside a tagged envelope
//! (`{"type": "...", "value": ...}`) so that a JSON-encoded object can be
//! told apart from a string that happens to contain braces. Numbers carry
//! the hex image of their little-endian IEEE-754 bytes and round-trip
//! bit-exactly; a `valuePlain` field holds the same value as a plain number
//! for human consumption (or `null` when the value is not finite, which
//! plain JSON cannot carry).
//!
//! The engine-free tag/untag helpers live here so the round-trip invariants
//! are unit-testable without an isolate; the script-side decoder is part of
//! the bootstrap shim in [`super::callbacks`].

use deno_core::v8;
use serde_json::{json, Value as JsonValue};

use crate::ContractError;

pub const TYPE_JSOBJECT: &str = "jsobject";
pub const TYPE_NUMBER: &str = "number";
pub const TYPE_STRING: &str = "string";
pub const TYPE_BOOL: &str = "bool";

/// Wrap a double in the tagged envelope, preserving its exact bit pattern.
pub fn tag_number(value: f64) -> JsonValue {
    let plain = serde_json::Number::from_f64(value)
        .map(JsonValue::Number)
        .unwrap_or(JsonValue::Null);
    json!({
        "type": TYPE_NUMBER,
        "value": hex::encode(value.to_le_bytes()),
        "valuePlain": plain,
    })
}

pub fn tag_string(value: impl Into<String>) -> JsonValue {
    json!({ "type": TYPE_STRING, "value": value.into() })
}

pub fn tag_bool(value: bool) -> JsonValue {
    json!({ "type": TYPE_BOOL, "value": value })
}

/// Wrap an already-serialized JSON subtree.
pub fn tag_object_text(serialized: impl Into<String>) -> JsonValue {
    json!({ "type": TYPE_JSOBJECT, "value": serialized.into() })
}

/// Recover the exact double from a `number` envelope.
pub fn number_from_tag(tagged: &JsonValue) -> Option<f64> {
    if tagged.get("type")?.as_str()? != TYPE_NUMBER {
        return None;
    }
    let raw = hex::decode(tagged.get("value")?.as_str()?).ok()?;
    let bytes: [u8; 8] = raw.try_into().ok()?;
    Some(f64::from_le_bytes(bytes))
}

/// Unwrap any envelope back into a plain JSON value.
///
/// `jsobject` payloads are re-parsed; numbers that JSON cannot represent
/// (NaN, infinities) come back as `null`.
pub fn value_from_tag(tagged: &JsonValue) -> Option<JsonValue> {
    match tagged.get("type")?.as_str()? {
        TYPE_JSOBJECT => serde_json::from_str(tagged.get("value")?.as_str()?).ok(),
        TYPE_NUMBER => number_from_tag(tagged).map(|value| {
            serde_json::Number::from_f64(value)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null)
        }),
        TYPE_STRING => Some(JsonValue::String(
            tagged.get("value")?.as_str()?.to_string(),
        )),
        TYPE_BOOL => Some(JsonValue::Bool(tagged.get("value")?.as_bool()?)),
        _ => None,
    }
}

/// Convert a script value into its tagged host representation.
///
/// Total over every value kind: anything that is neither object, number,
/// boolean nor string (undefined, functions, symbols) collapses to
/// `{"type":"bool","value":false}`. The only failure mode is the engine
/// raising while stringifying an object.
pub(crate) fn from_v8(
    scope: &mut v8::HandleScope,
    value: v8::Local<v8::Value>,
) -> Result<JsonValue, ContractError> {
    if value.is_function() {
        return Ok(tag_bool(false));
    }
    if value.is_object() {
        let Some(text) = v8::json::stringify(scope, value) else {
            return Err(ContractError::Marshal(
                "engine raised while stringifying object".to_string(),
            ));
        };
        return Ok(tag_object_text(text.to_rust_string_lossy(scope)));
    }
    if value.is_number() {
        let plain = value.number_value(scope).unwrap_or(f64::NAN);
        return Ok(tag_number(plain));
    }
    if value.is_boolean() {
        return Ok(tag_bool(value.boolean_value(scope)));
    }
    if value.is_string() {
        return Ok(tag_string(value.to_rust_string_lossy(scope)));
    }
    Ok(tag_bool(false))
}

// ── tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_round_trip_bit_exactly() {
        for value in [
            0.0_f64,
            -0.0,
            1.5,
            -123.456789,
            f64::MIN_POSITIVE,
            f64::MAX,
            f64::INFINITY,
            f64::NEG_INFINITY,
        ] {
            let tagged = tag_number(value);
            let back = number_from_tag(&tagged).expect("number envelope");
            assert_eq!(back.to_bits(), value.to_bits(), "value {value}");
        }
    }

    #[test]
    fn nan_payload_bits_survive() {
        let weird = f64::from_bits(0x7ff8_dead_beef_0001);
        let tagged = tag_number(weird);
        assert_eq!(tagged["valuePlain"], JsonValue::Null);
        let back = number_from_tag(&tagged).expect("number envelope");
        assert_eq!(back.to_bits(), weird.to_bits());
    }

    #[test]
    fn object_envelope_reparses() {
        let tagged = tag_object_text(r#"{"b":2,"a":1}"#);
        let value = value_from_tag(&tagged).expect("object envelope");
        assert_eq!(value, json!({"a": 1, "b": 2}));
    }

    #[test]
    fn string_and_bool_envelopes_unwrap() {
        assert_eq!(
            value_from_tag(&tag_string("{looks like json}")),
            Some(JsonValue::String("{looks like json}".to_string()))
        );
        assert_eq!(value_from_tag(&tag_bool(true)), Some(JsonValue::Bool(true)));
    }

    #[test]
    fn malformed_envelopes_are_rejected() {
        assert_eq!(number_from_tag(&json!({"type": "number", "value": "zz"})), None);
        assert_eq!(number_from_tag(&json!({"type": "number", "value": "00"})), None);
        assert_eq!(value_from_tag(&json!({"type": "mystery", "value": 1})), None);
        assert_eq!(value_from_tag(&json!("bare")), None);
    }
}
