//! # Ledger View Client
//!
//! Stateless adapter over the ledger node's read-only `view` endpoint. One
//! request in, one JSON array (or one [`ViewError`]) out. No caching and no
//! retries; both belong to whoever calls us.
//!
//! ## Wire Format
//!
//! ```text
//! POST {endpoint}/view
//! {
//!   "function": "0xcafe::lending_pool::credit_limit",
//!   "type_arguments": ["0x1::usdc::USDC"],
//!   "arguments": ["0xabc..."]
//! }
//!
//! 200 OK
//! ["1500000000"]
//! ```
//!
//! Response shapes vary by node version and by function: some wrap each
//! return value in its own array, some return a bare scalar. We accept any
//! JSON, wrap non-arrays into a one-element array, and leave shape
//! normalization to [`crate::numeric`].

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::config::DEFAULT_REQUEST_TIMEOUT;
use crate::view::error::ViewError;

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// Body of a single view call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewRequest {
    /// `address::module::function`.
    pub function: String,

    /// Generic type arguments, fully qualified.
    #[serde(default)]
    pub type_arguments: Vec<String>,

    /// Positional arguments, already JSON-encoded the way the ledger expects
    /// (addresses and u64+ integers as strings).
    #[serde(default)]
    pub arguments: Vec<Value>,
}

impl ViewRequest {
    /// A request with no type arguments and no arguments.
    pub fn new(function: impl Into<String>) -> Self {
        Self {
            function: function.into(),
            type_arguments: Vec::new(),
            arguments: Vec::new(),
        }
    }

    /// Appends a type argument.
    pub fn type_arg(mut self, ty: impl Into<String>) -> Self {
        self.type_arguments.push(ty.into());
        self
    }

    /// Appends a positional argument.
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.arguments.push(value.into());
        self
    }
}

// ---------------------------------------------------------------------------
// LedgerView trait
// ---------------------------------------------------------------------------

/// Anything that can answer a view call.
///
/// [`ViewClient`] is the HTTP implementation. The store and the reserve
/// monitor only ever see this trait, so tests can swap in an in-memory
/// ledger.
#[async_trait]
pub trait LedgerView: Send + Sync {
    /// Executes one view call.
    async fn view(&self, request: &ViewRequest) -> Result<Vec<Value>, ViewError>;
}

// ---------------------------------------------------------------------------
// ViewClient
// ---------------------------------------------------------------------------

/// HTTP client for a ledger node's view endpoint.
///
/// Cheap to clone: `reqwest::Client` is an `Arc` internally.
#[derive(Debug, Clone)]
pub struct ViewClient {
    client: reqwest::Client,
    view_url: String,
}

impl ViewClient {
    /// Builds a client for `endpoint` with the default request timeout.
    pub fn new(endpoint: &str) -> Result<Self, ViewError> {
        Self::with_timeout(endpoint, DEFAULT_REQUEST_TIMEOUT)
    }

    /// Builds a client with an explicit per-request timeout.
    pub fn with_timeout(endpoint: &str, timeout: Duration) -> Result<Self, ViewError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ViewError::Transport(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            view_url: format!("{}/view", endpoint.trim_end_matches('/')),
        })
    }

    /// The URL view requests are POSTed to.
    pub fn view_url(&self) -> &str {
        &self.view_url
    }

    /// Convenience wrapper: `call("m::f", &["T"], vec![json!("0x1")])`.
    pub async fn call(
        &self,
        function: &str,
        type_arguments: &[&str],
        arguments: Vec<Value>,
    ) -> Result<Vec<Value>, ViewError> {
        let request = ViewRequest {
            function: function.to_string(),
            type_arguments: type_arguments.iter().map(|t| t.to_string()).collect(),
            arguments,
        };
        self.execute(&request).await
    }

    async fn execute(&self, request: &ViewRequest) -> Result<Vec<Value>, ViewError> {
        debug!(function = %request.function, "view call");

        let response = self
            .client
            .post(&self.view_url)
            .json(request)
            .send()
            .await
            .map_err(|e| ViewError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ViewError::Transport(format!("failed to read body: {}", e)))?;

        if !status.is_success() {
            debug!(
                function = %request.function,
                status = status.as_u16(),
                "view call rejected"
            );
            return Err(ViewError::Status {
                status: status.as_u16(),
                body,
            });
        }

        parse_view_body(&body)
    }
}

#[async_trait]
impl LedgerView for ViewClient {
    async fn view(&self, request: &ViewRequest) -> Result<Vec<Value>, ViewError> {
        self.execute(request).await
    }
}

/// Parses a 2xx body. Arrays pass through, any other JSON value becomes a
/// one-element array, and non-JSON is [`ViewError::Malformed`].
pub fn parse_view_body(body: &str) -> Result<Vec<Value>, ViewError> {
    let value: Value = serde_json::from_str(body).map_err(|e| {
        let preview: String = body.chars().take(120).collect();
        ViewError::Malformed(format!("{} (body: {:?})", e, preview))
    })?;

    Ok(match value {
        Value::Array(items) => items,
        other => vec![other],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_serializes_to_ledger_shape() {
        let req = ViewRequest::new("0xcafe::pool::credit_limit")
            .type_arg("0x1::usdc::USDC")
            .arg("0xabc");

        let body = serde_json::to_value(&req).unwrap();
        assert_eq!(
            body,
            json!({
                "function": "0xcafe::pool::credit_limit",
                "type_arguments": ["0x1::usdc::USDC"],
                "arguments": ["0xabc"],
            })
        );
    }

    #[test]
    fn request_deserializes_without_optional_lists() {
        let req: ViewRequest = serde_json::from_str(r#"{"function":"m::f"}"#).unwrap();
        assert_eq!(req, ViewRequest::new("m::f"));
    }

    #[test]
    fn parse_array_body() {
        let values = parse_view_body(r#"["100", {"value": "5"}]"#).unwrap();
        assert_eq!(values, vec![json!("100"), json!({"value": "5"})]);
    }

    #[test]
    fn parse_scalar_body_is_wrapped() {
        assert_eq!(parse_view_body("42").unwrap(), vec![json!(42)]);
    }

    #[test]
    fn parse_non_json_is_malformed() {
        let err = parse_view_body("<html>502 Bad Gateway</html>").unwrap_err();
        assert!(matches!(err, ViewError::Malformed(_)));
        assert!(err.body().contains("Bad Gateway"));
    }

    #[test]
    fn view_url_is_normalized() {
        let client = ViewClient::new("http://127.0.0.1:8080/v1/").unwrap();
        assert_eq!(client.view_url(), "http://127.0.0.1:8080/v1/view");
    }
}
