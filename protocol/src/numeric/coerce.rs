//! Lossless integer coercion for ledger-returned values.

use serde_json::Value;

use crate::config::MAX_CREDIT_SCORE;
use crate::numeric::{json_kind, CoercionError};

/// Strips one-element array wrappers, repeatedly.
///
/// `[[7]]` becomes `7`; `[1, 2]` and `[]` come back untouched.
pub fn unwrap_singleton(raw: &Value) -> &Value {
    let mut current = raw;
    while let Value::Array(items) = current {
        if items.len() != 1 {
            break;
        }
        current = &items[0];
    }
    current
}

/// Reads a signed integer from a JSON number or a base-10 string.
///
/// Floats are truncated toward zero. Anything else is an error; in
/// particular booleans are not 0/1 and arrays are not unwrapped here.
pub fn to_big_int(raw: &Value) -> Result<i128, CoercionError> {
    match raw {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(i as i128)
            } else if let Some(u) = n.as_u64() {
                Ok(u as i128)
            } else {
                let f = n.as_f64().ok_or(CoercionError::NonFinite)?;
                truncate_f64(f)
            }
        }
        Value::String(s) => {
            let trimmed = s.trim();
            trimmed
                .parse::<i128>()
                .map_err(|_| invalid_or_out_of_range(trimmed))
        }
        other => Err(CoercionError::Unsupported {
            found: json_kind(other),
        }),
    }
}

/// Reads an unsigned 128-bit ledger quantity.
///
/// Accepts the full `u128` range when given as a string, which `to_big_int`
/// cannot since `i128` tops out at half of it.
pub fn to_u128(raw: &Value) -> Result<u128, CoercionError> {
    if let Value::String(s) = raw {
        let trimmed = s.trim();
        if let Ok(v) = trimmed.parse::<u128>() {
            return Ok(v);
        }
    }

    let signed = to_big_int(raw)?;
    u128::try_from(signed).map_err(|_| CoercionError::Negative(signed.to_string()))
}

/// Reads a credit score, which the ledger stores as a `u8`.
pub fn to_score(raw: &Value) -> Result<u8, CoercionError> {
    let value = to_u128(raw)?;
    if value > MAX_CREDIT_SCORE as u128 {
        return Err(CoercionError::OutOfRange(format!("credit score {}", value)));
    }
    Ok(value as u8)
}

fn truncate_f64(f: f64) -> Result<i128, CoercionError> {
    if !f.is_finite() {
        return Err(CoercionError::NonFinite);
    }
    let truncated = f.trunc();
    // i128::MAX is not exactly representable; compare against 2^127.
    if truncated >= 170_141_183_460_469_231_731_687_303_715_884_105_728.0
        || truncated < -170_141_183_460_469_231_731_687_303_715_884_105_728.0
    {
        return Err(CoercionError::OutOfRange(f.to_string()));
    }
    Ok(truncated as i128)
}

fn invalid_or_out_of_range(s: &str) -> CoercionError {
    let digits = s.strip_prefix(['-', '+']).unwrap_or(s);
    if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
        CoercionError::OutOfRange(s.to_string())
    } else {
        CoercionError::InvalidString(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unwrap_nested_singletons() {
        assert_eq!(unwrap_singleton(&json!([[[7]]])), &json!(7));
        assert_eq!(unwrap_singleton(&json!(["9"])), &json!("9"));
    }

    #[test]
    fn unwrap_leaves_multi_and_empty_alone() {
        assert_eq!(unwrap_singleton(&json!([1, 2])), &json!([1, 2]));
        assert_eq!(unwrap_singleton(&json!([])), &json!([]));
        assert_eq!(unwrap_singleton(&json!([[1, 2]])), &json!([1, 2]));
        assert_eq!(unwrap_singleton(&json!({"a": 1})), &json!({"a": 1}));
    }

    #[test]
    fn big_int_from_numbers() {
        assert_eq!(to_big_int(&json!(42)).unwrap(), 42);
        assert_eq!(to_big_int(&json!(-3)).unwrap(), -3);
        assert_eq!(to_big_int(&json!(u64::MAX)).unwrap(), u64::MAX as i128);
    }

    #[test]
    fn big_int_truncates_floats_toward_zero() {
        assert_eq!(to_big_int(&json!(12.9)).unwrap(), 12);
        assert_eq!(to_big_int(&json!(-12.9)).unwrap(), -12);
    }

    #[test]
    fn big_int_from_strings() {
        assert_eq!(
            to_big_int(&json!("170141183460469231731687303715884105727")).unwrap(),
            i128::MAX
        );
        assert_eq!(to_big_int(&json!(" 15 ")).unwrap(), 15);
        assert_eq!(to_big_int(&json!("-15")).unwrap(), -15);
    }

    #[test]
    fn big_int_rejects_garbage() {
        assert!(matches!(
            to_big_int(&json!(true)),
            Err(CoercionError::Unsupported { found: "bool" })
        ));
        assert!(matches!(
            to_big_int(&json!(null)),
            Err(CoercionError::Unsupported { found: "null" })
        ));
        assert!(matches!(
            to_big_int(&json!({"value": 1})),
            Err(CoercionError::Unsupported { found: "object" })
        ));
        assert!(matches!(
            to_big_int(&json!("1.5")),
            Err(CoercionError::InvalidString(_))
        ));
        assert!(matches!(
            to_big_int(&json!("")),
            Err(CoercionError::InvalidString(_))
        ));
        assert!(matches!(
            to_big_int(&json!("NaN")),
            Err(CoercionError::InvalidString(_))
        ));
    }

    #[test]
    fn big_int_reports_overflow() {
        assert!(matches!(
            to_big_int(&json!("340282366920938463463374607431768211455")),
            Err(CoercionError::OutOfRange(_))
        ));
        assert!(matches!(
            to_big_int(&json!(1e300)),
            Err(CoercionError::OutOfRange(_))
        ));
    }

    #[test]
    fn truncate_rejects_non_finite() {
        assert_eq!(truncate_f64(f64::NAN), Err(CoercionError::NonFinite));
        assert_eq!(truncate_f64(f64::INFINITY), Err(CoercionError::NonFinite));
    }

    #[test]
    fn u128_accepts_full_range() {
        assert_eq!(
            to_u128(&json!("340282366920938463463374607431768211455")).unwrap(),
            u128::MAX
        );
        assert_eq!(to_u128(&json!(7)).unwrap(), 7);
        assert_eq!(to_u128(&json!(-0.5)).unwrap(), 0);
    }

    #[test]
    fn u128_rejects_negative() {
        assert!(matches!(to_u128(&json!(-1)), Err(CoercionError::Negative(_))));
        assert!(matches!(
            to_u128(&json!("-100")),
            Err(CoercionError::Negative(_))
        ));
    }

    #[test]
    fn score_bounds() {
        assert_eq!(to_score(&json!(0)).unwrap(), 0);
        assert_eq!(to_score(&json!("255")).unwrap(), 255);
        assert!(matches!(
            to_score(&json!(256)),
            Err(CoercionError::OutOfRange(_))
        ));
    }
}
