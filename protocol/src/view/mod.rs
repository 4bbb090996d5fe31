//! # View Module
//!
//! Read-only access to ledger state.
//!
//! ```text
//! client.rs      : HTTP view client and the LedgerView trait
//! candidates.rs  : "first success wins" across alternative view names
//! error.rs       : ViewError / CandidateError
//! ```

pub mod candidates;
pub mod client;
pub mod error;

pub use candidates::first_success;
pub use client::{parse_view_body, LedgerView, ViewClient, ViewRequest};
pub use error::{CandidateError, ViewError};
