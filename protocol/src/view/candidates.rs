//! Ordered fallback across alternative view functions.
//!
//! Market modules get upgraded, and upgrades rename views
//! (`credit_limit` -> `get_credit_limit`). Rather than hardcoding one name,
//! callers hand us an ordered list; the first call that succeeds wins and
//! every failure along the way is kept for diagnostics.

use serde_json::Value;
use tracing::debug;

use crate::view::client::{LedgerView, ViewRequest};
use crate::view::error::CandidateError;

/// Tries each request in order and returns `(index, values)` for the first
/// one that succeeds.
///
/// An empty candidate list fails immediately with no attempts recorded.
pub async fn first_success(
    view: &dyn LedgerView,
    candidates: &[ViewRequest],
) -> Result<(usize, Vec<Value>), CandidateError> {
    let mut attempts = Vec::with_capacity(candidates.len());

    for (index, request) in candidates.iter().enumerate() {
        match view.view(request).await {
            Ok(values) => {
                if !attempts.is_empty() {
                    debug!(
                        function = %request.function,
                        skipped = attempts.len(),
                        "view candidate succeeded after fallbacks"
                    );
                }
                return Ok((index, values));
            }
            Err(err) => {
                debug!(function = %request.function, error = %err, "view candidate failed");
                attempts.push((request.function.clone(), err));
            }
        }
    }

    Err(CandidateError { attempts })
}
