//! Fixed-point extraction from loosely shaped ledger structs.
//!
//! The ledger's `Decimal` is an integer scaled by 10^9, but how it reaches us
//! depends on the view and the node version:
//!
//! ```text
//! "1100000000"                      bare string
//! 1100000000                        bare number
//! {"value": "1100000000"}           struct with a scaled field
//! {"inner": {"v": "1100000000"}}    nested struct
//! [{"raw": "1100000000"}]           any of the above, wrapped
//! ```
//!
//! Rather than a pile of `if let`s, [`decimal_raw`] runs a fixed chain of
//! decoders. Each one either recognises the shape and returns
//! [`Step::Found`], rejects a recognised-but-invalid value with an error, or
//! passes with [`Step::TryNext`]. Falling off the end is
//! [`DecimalError::UnknownShape`].

use serde_json::Value;

use crate::numeric::coerce::to_u128;
use crate::numeric::{json_kind, DecimalError};

/// Field names that may carry the scaled integer, highest priority first.
pub const DECIMAL_FIELDS: [&str; 5] = ["value", "raw", "scaled", "v", "inner"];

/// Deepest struct/array nesting we follow before giving up.
const MAX_DEPTH: usize = 4;

/// Outcome of one decoder in the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step<T> {
    /// The decoder recognised the shape and extracted a value.
    Found(T),
    /// Not this decoder's shape; try the next one.
    TryNext,
}

type Decoder = fn(&Value, usize) -> Result<Step<u128>, DecimalError>;

const CHAIN: [Decoder; 3] = [bare_integer, scaled_field, single_wrapper];

/// Extracts the scaled integer from a fixed-point value of unknown shape.
pub fn decimal_raw(raw: &Value) -> Result<u128, DecimalError> {
    decode_at(raw, 0)
}

fn decode_at(raw: &Value, depth: usize) -> Result<u128, DecimalError> {
    if depth <= MAX_DEPTH {
        for decoder in CHAIN {
            if let Step::Found(value) = decoder(raw, depth)? {
                return Ok(value);
            }
        }
    }
    Err(DecimalError::UnknownShape(describe(raw)))
}

fn bare_integer(raw: &Value, _depth: usize) -> Result<Step<u128>, DecimalError> {
    match raw {
        Value::Number(_) | Value::String(_) => Ok(Step::Found(to_u128(raw)?)),
        _ => Ok(Step::TryNext),
    }
}

fn scaled_field(raw: &Value, depth: usize) -> Result<Step<u128>, DecimalError> {
    let Value::Object(fields) = raw else {
        return Ok(Step::TryNext);
    };
    match DECIMAL_FIELDS.iter().find_map(|name| fields.get(*name)) {
        Some(inner) => decode_at(inner, depth + 1).map(Step::Found),
        None => Ok(Step::TryNext),
    }
}

fn single_wrapper(raw: &Value, depth: usize) -> Result<Step<u128>, DecimalError> {
    match raw {
        Value::Array(items) if items.len() == 1 => decode_at(&items[0], depth + 1).map(Step::Found),
        _ => Ok(Step::TryNext),
    }
}

fn describe(raw: &Value) -> String {
    match raw {
        Value::Object(fields) => {
            let keys: Vec<&str> = fields.keys().map(String::as_str).collect();
            format!("object with fields {:?}", keys)
        }
        Value::Array(items) => format!("array of {}", items.len()),
        other => json_kind(other).to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::numeric::CoercionError;
    use serde_json::json;

    #[test]
    fn bare_values() {
        assert_eq!(decimal_raw(&json!("1100000000")).unwrap(), 1_100_000_000);
        assert_eq!(decimal_raw(&json!(1_100_000_000u64)).unwrap(), 1_100_000_000);
    }

    #[test]
    fn struct_field_names() {
        for name in DECIMAL_FIELDS {
            let mut fields = serde_json::Map::new();
            fields.insert(name.to_string(), json!("42"));
            let value = Value::Object(fields);
            assert_eq!(decimal_raw(&value).unwrap(), 42, "field {}", name);
        }
    }

    #[test]
    fn field_priority_is_fixed() {
        let value = json!({"inner": "3", "v": "2", "value": "1"});
        assert_eq!(decimal_raw(&value).unwrap(), 1);

        let value = json!({"inner": "3", "v": "2"});
        assert_eq!(decimal_raw(&value).unwrap(), 2);
    }

    #[test]
    fn nested_and_wrapped() {
        assert_eq!(decimal_raw(&json!({"inner": {"v": "7"}})).unwrap(), 7);
        assert_eq!(decimal_raw(&json!([[{"raw": 9}]])).unwrap(), 9);
    }

    #[test]
    fn unknown_shapes() {
        assert!(matches!(
            decimal_raw(&json!({"amount": "1"})),
            Err(DecimalError::UnknownShape(msg)) if msg.contains("amount")
        ));
        assert!(matches!(
            decimal_raw(&json!([1, 2])),
            Err(DecimalError::UnknownShape(_))
        ));
        assert!(matches!(
            decimal_raw(&json!(true)),
            Err(DecimalError::UnknownShape(_))
        ));
        assert!(matches!(
            decimal_raw(&json!(null)),
            Err(DecimalError::UnknownShape(_))
        ));
    }

    #[test]
    fn recognised_shape_with_bad_value_is_coercion_error() {
        assert!(matches!(
            decimal_raw(&json!({"value": "abc"})),
            Err(DecimalError::Coercion(CoercionError::InvalidString(_)))
        ));
        assert!(matches!(
            decimal_raw(&json!("-5")),
            Err(DecimalError::Coercion(CoercionError::Negative(_)))
        ));
    }

    #[test]
    fn runaway_nesting_is_rejected() {
        let deep = json!({"value": {"value": {"value": {"value": {"value": {"value": "1"}}}}}});
        assert!(matches!(
            decimal_raw(&deep),
            Err(DecimalError::UnknownShape(_))
        ));
    }
}
