//! Annualized yield from two PPS samples.
//!
//! Growth is computed in integers at 10^18 precision. Floats show up only
//! for the per-second rate and the compounding step:
//!
//! ```text
//!   ratio = (pps2 - pps1) * 1e18 / pps1          (i128)
//!   r     = ratio / 1e18 / elapsed_secs          (per second)
//!   apr   = r * SECONDS_PER_YEAR
//!   apy   = exp(apr) - 1                          (continuous compounding)
//! ```
//!
//! Continuous compounding always yields `apy > apr` for a positive rate.
//! Samples too close together, out of order, or starting from a zero price
//! produce [`YieldEstimate::Insufficient`] instead of a number.

use serde::{Deserialize, Serialize};

use crate::config::{SECONDS_PER_YEAR, YIELD_PRECISION};

/// One PPS observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct YieldSample {
    pub pps: u128,
    /// Monotonic seconds; only differences matter.
    pub timestamp_secs: u64,
}

impl YieldSample {
    pub fn new(pps: u128, timestamp_secs: u64) -> Self {
        Self {
            pps,
            timestamp_secs,
        }
    }
}

/// Why no yield could be quoted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InsufficientReason {
    /// Only one sample so far.
    SingleSample,
    /// The second sample is not later than the first.
    NonIncreasingTime,
    /// The samples are closer together than the configured minimum.
    WindowTooShort { elapsed_secs: u64, required_secs: u64 },
    /// The first sample has a zero price.
    ZeroBasePrice,
}

/// Result of a yield computation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum YieldEstimate {
    Insufficient { reason: InsufficientReason },
    /// Both samples carry the same price.
    NoChange,
    Rate { apr: f64, apy: f64 },
}

impl YieldEstimate {
    /// APR as a fraction (0.05 = 5%), if computable.
    pub fn apr(&self) -> Option<f64> {
        match self {
            Self::Rate { apr, .. } => Some(*apr),
            Self::NoChange => Some(0.0),
            Self::Insufficient { .. } => None,
        }
    }

    /// APY as a fraction, if computable.
    pub fn apy(&self) -> Option<f64> {
        match self {
            Self::Rate { apy, .. } => Some(*apy),
            Self::NoChange => Some(0.0),
            Self::Insufficient { .. } => None,
        }
    }

    fn insufficient(reason: InsufficientReason) -> Self {
        Self::Insufficient { reason }
    }
}

impl Default for YieldEstimate {
    fn default() -> Self {
        Self::insufficient(InsufficientReason::SingleSample)
    }
}

/// Yield implied by moving from `first` to `second`.
pub fn yield_from_samples(
    first: &YieldSample,
    second: &YieldSample,
    min_elapsed_secs: u64,
) -> YieldEstimate {
    if second.timestamp_secs <= first.timestamp_secs {
        return YieldEstimate::insufficient(InsufficientReason::NonIncreasingTime);
    }
    let elapsed = second.timestamp_secs - first.timestamp_secs;
    if elapsed < min_elapsed_secs {
        return YieldEstimate::insufficient(InsufficientReason::WindowTooShort {
            elapsed_secs: elapsed,
            required_secs: min_elapsed_secs,
        });
    }
    if first.pps == 0 {
        return YieldEstimate::insufficient(InsufficientReason::ZeroBasePrice);
    }
    if second.pps == first.pps {
        return YieldEstimate::NoChange;
    }

    let ratio = growth_ratio(first.pps, second.pps);
    let per_second = ratio / elapsed as f64;
    let apr = per_second * SECONDS_PER_YEAR as f64;
    YieldEstimate::Rate {
        apr,
        apy: apr.exp_m1(),
    }
}

/// `(to - from) / from`, exact to 18 places when the integers allow it.
fn growth_ratio(from: u128, to: u128) -> f64 {
    let exact = i128::try_from(from).ok().zip(i128::try_from(to).ok()).and_then(|(a, b)| {
        (b - a)
            .checked_mul(YIELD_PRECISION)
            .map(|scaled| (scaled / a) as f64 / YIELD_PRECISION as f64)
    });
    exact.unwrap_or_else(|| (to as f64 - from as f64) / from as f64)
}
