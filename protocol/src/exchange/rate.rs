//! PPS and share/asset conversions.
//!
//! All integer math, all checked. Conversions floor; the protocol never
//! hands out a fraction of a unit it doesn't have.

use serde::{Deserialize, Serialize};

use crate::config::SCALE;
use crate::exchange::RateError;

/// Reserve state as read from the ledger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReserveSnapshot {
    /// Outstanding LP shares (raw integer).
    pub total_shares: u128,
    /// Idle asset held by the pool (raw integer).
    pub available_cash: u128,
    /// PPS quoted before the first deposit (Decimal).
    pub initial_exchange_rate: u128,
    /// Protocol-owned reserves carved out of the pool (Decimal).
    pub reserve_amount: u128,
    /// Outstanding borrows including accrued interest (Decimal).
    pub total_borrowed: u128,
}

/// Price of one share, scaled by [`SCALE`].
///
/// An empty pool quotes `initial_exchange_rate`. Reserves exceeding the
/// backing clamp the price to zero, which callers treat as "rate
/// unavailable".
pub fn compute_pps(snapshot: &ReserveSnapshot) -> Result<u128, RateError> {
    if snapshot.total_shares == 0 {
        return Ok(snapshot.initial_exchange_rate);
    }

    let cash = snapshot
        .available_cash
        .checked_mul(SCALE)
        .ok_or(RateError::Overflow("available_cash * SCALE"))?;
    let backing = snapshot
        .total_borrowed
        .checked_add(cash)
        .ok_or(RateError::Overflow("total_borrowed + cash"))?;

    if backing <= snapshot.reserve_amount {
        return Ok(0);
    }
    Ok((backing - snapshot.reserve_amount) / snapshot.total_shares)
}

/// `floor(shares * pps / scale)`.
///
/// Falls back to a split computation when the direct product overflows, so
/// large share balances at ordinary prices still convert exactly.
pub fn shares_to_assets(shares: u128, pps: u128, scale: u128) -> Result<u128, RateError> {
    if scale == 0 {
        return Err(RateError::Overflow("division by zero scale"));
    }
    if let Some(product) = shares.checked_mul(pps) {
        return Ok(product / scale);
    }

    // floor(s*p/k) == (s/k)*p + floor((s%k)*p/k)
    let whole = (shares / scale)
        .checked_mul(pps)
        .ok_or(RateError::Overflow("shares * pps"))?;
    let part = (shares % scale)
        .checked_mul(pps)
        .ok_or(RateError::Overflow("shares * pps"))?
        / scale;
    whole
        .checked_add(part)
        .ok_or(RateError::Overflow("shares * pps"))
}

/// `floor(assets * scale / pps)`. A zero price is an error.
pub fn assets_to_shares(assets: u128, pps: u128, scale: u128) -> Result<u128, RateError> {
    if pps == 0 {
        return Err(RateError::ZeroPrice);
    }
    if let Some(product) = assets.checked_mul(scale) {
        return Ok(product / pps);
    }

    let whole = (assets / pps)
        .checked_mul(scale)
        .ok_or(RateError::Overflow("assets * scale"))?;
    let part = (assets % pps)
        .checked_mul(scale)
        .ok_or(RateError::Overflow("assets * scale"))?
        / pps;
    whole
        .checked_add(part)
        .ok_or(RateError::Overflow("assets * scale"))
}

/// Assets a holder of `shares` could withdraw right now: their claim at the
/// current price, limited by idle cash in the pool.
pub fn withdrawable_assets(shares: u128, snapshot: &ReserveSnapshot) -> Result<u128, RateError> {
    let pps = compute_pps(snapshot)?;
    let claim = shares_to_assets(shares, pps, SCALE)?;
    Ok(claim.min(snapshot.available_cash))
}
