//! # Credit State Synchronization
//!
//! Keeps a subject's on-chain credit state (limit, usage, score) in sync
//! with the ledger without hammering it, and without ever showing a user an
//! "unknown" where we already knew a number.
//!
//! ## Architecture
//!
//! ```text
//!   CreditFeed (one per consumer)        CreditStateStore (shared, Clone)
//!   ┌───────────────────────────┐        ┌──────────────────────────────────┐
//!   │ binding + generation      │ read   │ DashMap<CacheKey, Mutex<KeyState>>│
//!   │ TimerSlot (poll|backoff)  │──────► │   cache      (TTL)               │
//!   │ watch::Sender<CreditView> │        │   last_good  (never regresses)   │
//!   │ RefreshBus subscription   │ ◄───── │   backoff    (capped)            │
//!   └───────────────────────────┘ result │   in_flight  (at most one)       │
//!                                        └───────────────┬──────────────────┘
//!                                                        │ spawn
//!                                                        ▼
//!                                              CreditSource::fetch
//!                                              (LedgerCreditSource: 3 views)
//! ```
//!
//! The store owns everything shared between consumers of the same key. The
//! feed owns everything that is per-consumer: which subject it shows, its
//! timer, and its published view.
//!
//! ## Modules
//!
//! - [`snapshot`]: subjects, cache keys, snapshots and the published view
//! - [`backoff`]: retry envelope
//! - [`scheduler`]: injectable timers
//! - [`source`]: where snapshots come from
//! - [`store`]: the shared per-key state machine
//! - [`feed`]: the per-consumer reactive view

pub mod backoff;
pub mod feed;
pub mod scheduler;
pub mod snapshot;
pub mod source;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

pub use backoff::{BackoffPolicy, BackoffState};
pub use feed::CreditFeed;
pub use scheduler::{Scheduler, TimerHandle, TimerSlot, TokioScheduler};
pub use snapshot::{CacheKey, CreditSnapshot, CreditView, Subject};
pub use source::{CreditFunctions, CreditSource, LedgerCreditSource};
pub use store::{CreditStateStore, KeyStatus, KeyWatch, PendingFetch, ReadPlan, StatsSnapshot};

use std::time::Duration;

use thiserror::Error;

use crate::numeric::{CoercionError, DecimalError};
use crate::view::CandidateError;

/// Why a credit read produced no fresh data.
///
/// None of these reach a user as anything more than a flag on the view.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// Every candidate view for a field failed.
    #[error("{field}: {source}")]
    View {
        field: &'static str,
        source: CandidateError,
    },

    /// A field came back in a shape we could not read.
    #[error("{field}: {reason}")]
    Decimal {
        field: &'static str,
        reason: DecimalError,
    },

    /// A score outside the ledger's range.
    #[error("{field}: {reason}")]
    Coercion {
        field: &'static str,
        reason: CoercionError,
    },

    /// The view answered with an empty result list.
    #[error("{0} view returned no values")]
    NoData(&'static str),

    /// The key is backing off after failures.
    #[error("backing off, next attempt in {retry_in:?}")]
    BackingOff { retry_in: Duration },

    /// A refresh replaced this fetch before it finished.
    #[error("fetch superseded by a refresh")]
    Superseded,

    /// The fetch was aborted because nobody is watching the key anymore.
    #[error("fetch cancelled")]
    Cancelled,
}
