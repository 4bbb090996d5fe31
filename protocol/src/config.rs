//! # Market Configuration & Constants
//!
//! Every magic number the sync engine relies on lives here: the fixed-point
//! scale the ledger uses, the polling cadence, cache lifetimes, and the
//! backoff envelope. If you're hardcoding an interval somewhere else, move it
//! here.
//!
//! The structs at the bottom are what the hosting application hands us at
//! construction time. The library never reads the environment on its own.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::sync::backoff::BackoffPolicy;

// ---------------------------------------------------------------------------
// Fixed-Point Arithmetic
// ---------------------------------------------------------------------------

/// Scale of the ledger's `Decimal` encoding. A stored integer `x` means
/// `x / 10^9`. Exchange rates, accrued interest and reserve balances all
/// use it.
pub const SCALE: u128 = 1_000_000_000;

/// Number of fractional digits implied by [`SCALE`].
pub const SCALE_DECIMALS: u8 = 9;

/// Intermediate precision for yield ratios. Growth between two price samples
/// is computed as `(pps2 - pps1) * YIELD_PRECISION / pps1` in integers before
/// any float gets involved.
pub const YIELD_PRECISION: i128 = 1_000_000_000_000_000_000;

/// Seconds in a 365-day year. Leap years are the ledger's problem.
pub const SECONDS_PER_YEAR: u64 = 31_536_000;

/// Highest credit score the ledger can report (`u8` on-chain).
pub const MAX_CREDIT_SCORE: u8 = u8::MAX;

// ---------------------------------------------------------------------------
// Timing Constants
// ---------------------------------------------------------------------------

/// Steady re-poll interval for credit state.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(15);

/// How long a successful credit read stays fresh. Kept shorter than the poll
/// interval so a steady poll always goes to the network, while widgets
/// mounting in between share one response.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(10);

/// First retry delay after a failed fetch.
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_secs(2);

/// Backoff never waits longer than this. A minute is slow, not broken.
pub const DEFAULT_BACKOFF_CEILING: Duration = Duration::from_secs(60);

/// Consecutive-failure counter cap. Past this the delay is pinned at the
/// ceiling anyway.
pub const DEFAULT_BACKOFF_MAX_FAILURES: u32 = 8;

/// Idle store entries kept for last-known-good before the oldest are
/// evicted. An idle entry has no watchers, no fetch and no active backoff.
pub const DEFAULT_MAX_IDLE_KEYS: usize = 256;

/// Reserve (exchange rate) poll interval.
pub const DEFAULT_RATE_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Minimum distance between two price samples before we quote a yield.
/// Anything shorter annualizes noise.
pub const DEFAULT_MIN_YIELD_WINDOW_SECS: u64 = 300;

/// Price samples retained for yield estimation.
pub const DEFAULT_YIELD_SAMPLE_CAPACITY: usize = 256;

/// Per-request HTTP timeout handed to the transport.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// Construction-Time Configuration
// ---------------------------------------------------------------------------

/// Where the market lives and how its asset is denominated.
///
/// Supplied by the hosting application. Nothing in here is discovered at
/// runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketConfig {
    /// Base URL of the ledger node's REST API (e.g. `https://node/v1`).
    pub endpoint: String,

    /// Address-qualified module hosting the market's view functions,
    /// e.g. `0xcafe::lending_pool`.
    pub module: String,

    /// Fully-qualified asset type passed as a type argument to asset-scoped
    /// views. Also half of every cache key.
    pub asset_type: String,

    /// Decimal precision of the underlying asset, for display.
    pub decimals: u8,
}

impl MarketConfig {
    /// Builds a config, trimming trailing slashes off the endpoint.
    pub fn new(endpoint: &str, module: &str, asset_type: &str, decimals: u8) -> Self {
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            module: module.to_string(),
            asset_type: asset_type.to_string(),
            decimals,
        }
    }

    /// Fully-qualified function identifier (`module::function`).
    pub fn function(&self, name: &str) -> String {
        format!("{}::{}", self.module, name)
    }
}

/// Tuning knobs for the credit state store and its feeds.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Delay between steady polls after a successful read.
    pub poll_interval: Duration,

    /// Lifetime of a cache entry.
    pub cache_ttl: Duration,

    /// Retry envelope after failures.
    pub backoff: BackoffPolicy,

    /// Idle entries retained before eviction starts.
    pub max_idle_keys: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            cache_ttl: DEFAULT_CACHE_TTL,
            backoff: BackoffPolicy::default(),
            max_idle_keys: DEFAULT_MAX_IDLE_KEYS,
        }
    }
}

/// Tuning knobs for the reserve monitor.
#[derive(Debug, Clone)]
pub struct RateConfig {
    /// Delay between reserve polls.
    pub poll_interval: Duration,

    /// Minimum sample spacing for a yield quote, in seconds.
    pub min_yield_window_secs: u64,

    /// How many samples the yield window keeps.
    pub sample_capacity: usize,

    /// Retry envelope after failed polls.
    pub backoff: BackoffPolicy,
}

impl Default for RateConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_RATE_POLL_INTERVAL,
            min_yield_window_secs: DEFAULT_MIN_YIELD_WINDOW_SECS,
            sample_capacity: DEFAULT_YIELD_SAMPLE_CAPACITY,
            backoff: BackoffPolicy::default(),
        }
    }
}
