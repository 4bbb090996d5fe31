//! # Exchange Rate Engine
//!
//! Lenders deposit the asset and receive LP shares. The shares appreciate as
//! borrowers pay interest, so the interesting number is the price of one
//! share in asset units (PPS, scaled by 10^9):
//!
//! ```text
//!   pps = (total_borrowed + available_cash * SCALE - reserve_amount)
//!         / total_shares
//!
//!   total_borrowed, reserve_amount : Decimal (already x10^9)
//!   available_cash, total_shares   : raw integer amounts
//! ```
//!
//! ## Modules
//!
//! - [`rate`]: the PPS formula and share/asset conversions
//! - [`apy`]: annualized yield from two price samples
//! - [`reserve`]: decoding a reserve snapshot from a view response
//! - [`monitor`]: polls the reserve and publishes the current rate

pub mod apy;
pub mod monitor;
pub mod rate;
pub mod reserve;

pub use apy::{yield_from_samples, InsufficientReason, YieldEstimate, YieldSample};
pub use monitor::{RateView, ReserveMonitor};
pub use rate::{assets_to_shares, compute_pps, shares_to_assets, withdrawable_assets, ReserveSnapshot};
pub use reserve::reserve_candidates;

use thiserror::Error;

use crate::numeric::DecimalError;
use crate::view::CandidateError;

/// Errors from rate computation and reserve decoding.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RateError {
    /// An intermediate product did not fit in 128 bits.
    #[error("arithmetic overflow computing {0}")]
    Overflow(&'static str),

    /// Conversion into shares at a zero price.
    #[error("price per share is zero")]
    ZeroPrice,

    /// A required reserve field is absent from the view response.
    #[error("reserve field `{0}` missing from view response")]
    MissingField(&'static str),

    /// A reserve field is present but could not be decoded.
    #[error("reserve field `{field}`: {reason}")]
    Field {
        field: &'static str,
        reason: DecimalError,
    },

    /// The response is neither a reserve struct nor a positional tuple.
    #[error("unrecognised reserve shape: {0}")]
    Shape(String),

    /// No reserve view function answered.
    #[error(transparent)]
    View(#[from] CandidateError),
}
