//! Error types for ledger view calls.
//!
//! A view call either returns a JSON array or one of these. Transport
//! failures, non-2xx statuses and unparseable bodies are all ordinary,
//! expected outcomes on a flaky network, so none of them panic.

use thiserror::Error;

/// Failure of a single view call.
///
/// `Clone` because one failed fetch may be observed by several de-duplicated
/// awaiters at once.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ViewError {
    /// The request never produced an HTTP response (DNS, connect, timeout,
    /// reset mid-body).
    #[error("transport error: {0}")]
    Transport(String),

    /// The node answered with a non-2xx status.
    #[error("view call failed with HTTP {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, verbatim. Ledger nodes put the abort reason here.
        body: String,
    },

    /// A 2xx response whose body was not JSON.
    #[error("malformed view response: {0}")]
    Malformed(String),
}

impl ViewError {
    /// HTTP status, when the node got far enough to send one.
    pub fn status(&self) -> Option<u16> {
        match self {
            ViewError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Response body or error description.
    pub fn body(&self) -> &str {
        match self {
            ViewError::Transport(msg) | ViewError::Malformed(msg) => msg,
            ViewError::Status { body, .. } => body,
        }
    }

    /// `true` for 429 responses. Worth a longer pause, same handling.
    pub fn is_rate_limited(&self) -> bool {
        self.status() == Some(429)
    }
}

/// Every candidate in a [`first_success`](super::first_success) chain failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("all {} view candidates failed (last: {})", .attempts.len(), last_failure(.attempts))]
pub struct CandidateError {
    /// `(function, error)` for each attempt, in the order they were tried.
    pub attempts: Vec<(String, ViewError)>,
}

fn last_failure(attempts: &[(String, ViewError)]) -> String {
    attempts
        .last()
        .map(|(function, err)| format!("{}: {}", function, err))
        .unwrap_or_else(|| "no candidates".to_string())
}
