//! # Numeric Coercion
//!
//! Ledger views hand back numbers in whatever shape the node felt like that
//! day: JSON numbers for small integers, decimal strings for anything past
//! 2^53, one-element arrays around everything, and fixed-point structs under
//! a handful of field names. This module turns all of that into plain
//! `u128`/`i128` without ever going through a float on the way.
//!
//! ```text
//! coerce.rs   : to_big_int / to_u128 / to_score / unwrap_singleton
//! decimal.rs  : decimal_raw: fixed-point extraction via a decoder chain
//! ```

pub mod coerce;
pub mod decimal;

use thiserror::Error;

pub use coerce::{to_big_int, to_score, to_u128, unwrap_singleton};
pub use decimal::{decimal_raw, Step, DECIMAL_FIELDS};

/// A value could not be read as the integer we expected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoercionError {
    /// Booleans, nulls, objects and multi-element arrays are not numbers.
    #[error("cannot coerce {found} to an integer")]
    Unsupported {
        /// JSON kind that was found.
        found: &'static str,
    },

    /// NaN or an infinity.
    #[error("non-finite number cannot be coerced to an integer")]
    NonFinite,

    /// A string that is not a base-10 integer.
    #[error("not an integer string: {0:?}")]
    InvalidString(String),

    /// Parsed fine, but does not fit the target type.
    #[error("value out of range: {0}")]
    OutOfRange(String),

    /// Negative where the ledger type is unsigned.
    #[error("negative value where unsigned expected: {0}")]
    Negative(String),
}

/// Fixed-point extraction failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecimalError {
    /// No decoder in the chain recognised the shape.
    #[error("unknown decimal shape: {0}")]
    UnknownShape(String),

    /// The shape was recognised but the scaled value itself was bad.
    #[error(transparent)]
    Coercion(#[from] CoercionError),
}

/// Short description of a JSON value's kind, for error messages.
pub(crate) fn json_kind(value: &serde_json::Value) -> &'static str {
    use serde_json::Value;
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
