//! Decoding [`ReserveSnapshot`] from a reserve view response.
//!
//! Two shapes show up in the wild. Newer modules return a struct, older
//! ones return the five fields positionally:
//!
//! ```text
//! [{"total_shares": "100", "available_cash": "60", ...}]
//! ["100", "60", {"value": "1000000000"}, {"value": "0"}, {"value": "50000000000"}]
//!   shares  cash   initial_exchange_rate   reserve_amount   total_borrowed
//! ```
//!
//! Field names drifted between releases, hence the alias lists.

use serde_json::{Map, Value};

use crate::config::MarketConfig;
use crate::exchange::rate::ReserveSnapshot;
use crate::exchange::RateError;
use crate::numeric::{decimal_raw, unwrap_singleton, DecimalError};
use crate::view::ViewRequest;

type FieldSpec = (&'static str, &'static [&'static str]);

const TOTAL_SHARES: FieldSpec = ("total_shares", &["total_shares", "total_supply", "shares"]);
const AVAILABLE_CASH: FieldSpec = ("available_cash", &["available_cash", "total_cash", "cash"]);
const INITIAL_RATE: FieldSpec = ("initial_exchange_rate", &["initial_exchange_rate", "initial_rate"]);
const RESERVE_AMOUNT: FieldSpec = ("reserve_amount", &["reserve_amount", "total_reserves", "reserves"]);
const TOTAL_BORROWED: FieldSpec = ("total_borrowed", &["total_borrowed", "total_borrows", "borrowed"]);

/// Order of the positional tuple form.
const POSITIONAL: [FieldSpec; 5] = [
    TOTAL_SHARES,
    AVAILABLE_CASH,
    INITIAL_RATE,
    RESERVE_AMOUNT,
    TOTAL_BORROWED,
];

/// View calls that return reserve state, tried in order.
pub fn reserve_candidates(market: &MarketConfig) -> Vec<ViewRequest> {
    ["reserve_state", "get_reserve_state"]
        .into_iter()
        .map(|name| ViewRequest::new(market.function(name)).type_arg(&market.asset_type))
        .collect()
}

impl ReserveSnapshot {
    /// Decodes the values returned by a reserve view.
    pub fn from_view(values: &[Value]) -> Result<Self, RateError> {
        if values.len() == POSITIONAL.len() {
            return from_positional(values);
        }

        let root = match values {
            [single] => unwrap_singleton(single),
            _ => return Err(RateError::Shape(format!("{} return values", values.len()))),
        };

        match root {
            Value::Object(fields) => from_fields(fields),
            Value::Array(items) if items.len() == POSITIONAL.len() => from_positional(items),
            other => Err(RateError::Shape(format!("unexpected {}", other))),
        }
    }
}

fn from_positional(items: &[Value]) -> Result<ReserveSnapshot, RateError> {
    let mut raw = [0u128; 5];
    for (slot, ((field, _), value)) in raw.iter_mut().zip(POSITIONAL.iter().zip(items)) {
        *slot = decode(*field, value)?;
    }
    Ok(assemble(raw))
}

fn from_fields(fields: &Map<String, Value>) -> Result<ReserveSnapshot, RateError> {
    let mut raw = [0u128; 5];
    for (slot, (field, aliases)) in raw.iter_mut().zip(POSITIONAL.iter()) {
        let value = aliases
            .iter()
            .find_map(|alias| fields.get(*alias))
            .ok_or(RateError::MissingField(*field))?;
        *slot = decode(*field, value)?;
    }
    Ok(assemble(raw))
}

fn decode(field: &'static str, value: &Value) -> Result<u128, RateError> {
    decimal_raw(value).map_err(|reason: DecimalError| RateError::Field { field, reason })
}

fn assemble(raw: [u128; 5]) -> ReserveSnapshot {
    let [total_shares, available_cash, initial_exchange_rate, reserve_amount, total_borrowed] = raw;
    ReserveSnapshot {
        total_shares,
        available_cash,
        initial_exchange_rate,
        reserve_amount,
        total_borrowed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SCALE;
    use serde_json::json;

    fn expected() -> ReserveSnapshot {
        ReserveSnapshot {
            total_shares: 100,
            available_cash: 60,
            initial_exchange_rate: SCALE,
            reserve_amount: 0,
            total_borrowed: 50 * SCALE,
        }
    }

    #[test]
    fn struct_form() {
        let values = vec![json!({
            "total_shares": "100",
            "available_cash": "60",
            "initial_exchange_rate": {"value": "1000000000"},
            "reserve_amount": {"value": "0"},
            "total_borrowed": {"value": "50000000000"},
        })];
        assert_eq!(ReserveSnapshot::from_view(&values).unwrap(), expected());
    }

    #[test]
    fn struct_form_with_aliases_and_wrapping() {
        let values = vec![json!([{
            "total_supply": 100,
            "cash": "60",
            "initial_rate": "1000000000",
            "total_reserves": {"raw": 0},
            "total_borrows": {"inner": {"v": "50000000000"}},
        }])];
        assert_eq!(ReserveSnapshot::from_view(&values).unwrap(), expected());
    }

    #[test]
    fn positional_form() {
        let values = vec![
            json!("100"),
            json!("60"),
            json!({"value": "1000000000"}),
            json!({"value": "0"}),
            json!({"value": "50000000000"}),
        ];
        assert_eq!(ReserveSnapshot::from_view(&values).unwrap(), expected());
    }

    #[test]
    fn nested_positional_form() {
        let values = vec![json!(["100", "60", "1000000000", "0", "50000000000"])];
        assert_eq!(ReserveSnapshot::from_view(&values).unwrap(), expected());
    }

    #[test]
    fn missing_field_is_named() {
        let values = vec![json!({"total_shares": "1", "available_cash": "1"})];
        assert_eq!(
            ReserveSnapshot::from_view(&values),
            Err(RateError::MissingField("initial_exchange_rate"))
        );
    }

    #[test]
    fn bad_field_is_named() {
        let values = vec![json!(["x", "60", "1", "0", "0"])];
        assert!(matches!(
            ReserveSnapshot::from_view(&values),
            Err(RateError::Field { field: "total_shares", .. })
        ));
    }

    #[test]
    fn unexpected_shapes() {
        assert!(matches!(ReserveSnapshot::from_view(&[]), Err(RateError::Shape(_))));
        assert!(matches!(
            ReserveSnapshot::from_view(&[json!(true)]),
            Err(RateError::Shape(_))
        ));
    }

    #[test]
    fn candidates_carry_asset_type() {
        let market = MarketConfig::new("http://n", "0xcafe::pool", "0x1::usdc::USDC", 6);
        let candidates = reserve_candidates(&market);
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].function, "0xcafe::pool::reserve_state");
        assert_eq!(candidates[1].type_arguments, vec!["0x1::usdc::USDC".to_string()]);
    }
}
