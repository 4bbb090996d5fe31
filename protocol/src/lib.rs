// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # NOVA Credit Sync
//!
//! Keeps a lending market's on-chain numbers on screen: a subject's credit
//! limit, usage and score, and the pool's exchange rate between shares and
//! the underlying asset.
//!
//! The ledger is only ever read through view functions. Everything here is
//! about reading it well: tolerating the half-dozen shapes a number can come
//! back in, never asking twice for the same thing at once, backing off when
//! the endpoint is unhappy, and never replacing a known value with a blank.
//!
//! ## Architecture
//!
//! ```text
//!   ledger ──HTTP──► view ──► numeric ──┬──► sync (store ◄── feed) ──► CreditView
//!                                       │         ▲
//!                                       │        bus (refresh signals)
//!                                       └──► exchange (pps, yield) ──► RateView
//!                                                        │
//!                                                     format
//! ```
//!
//! - **config**: constants and construction-time market/sync/rate config.
//! - **view**: ledger view calls and "first candidate that works".
//! - **numeric**: lossless coercion of ledger JSON into integers.
//! - **exchange**: price-per-share, conversions, yield, the reserve monitor.
//! - **sync**: the shared credit store and per-consumer feeds.
//! - **bus**: "something changed, go look" signals.
//! - **format**: human-readable strings for all of the above.
//!
//! ## Ground rules
//!
//! 1. Integer math end to end. Floats appear only in yield ratios.
//! 2. Arithmetic overflow is an error value, never a panic.
//! 3. Last-known-good is never regressed by a failed or partial read.

pub mod bus;
pub mod config;
pub mod exchange;
pub mod format;
pub mod numeric;
pub mod sync;
pub mod view;

pub use bus::{RefreshBus, RefreshEvent, Subscription};
pub use config::{MarketConfig, RateConfig, SyncConfig};
pub use exchange::{RateError, RateView, ReserveMonitor, ReserveSnapshot, YieldEstimate};
pub use sync::{
    CacheKey, CreditFeed, CreditSnapshot, CreditStateStore, CreditView, LedgerCreditSource, Subject,
    SyncError, TokioScheduler,
};
pub use view::{LedgerView, ViewClient, ViewError};
