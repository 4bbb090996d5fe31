//! Where credit snapshots come from.
//!
//! [`LedgerCreditSource`] reads limit, usage and score concurrently, each
//! through its own candidate list. A field that fails is left `None` and the
//! snapshot is marked partial; the store merges it with last-known-good.
//! Only when all three fail does the fetch as a whole fail.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::config::MarketConfig;
use crate::numeric::{decimal_raw, to_score, unwrap_singleton};
use crate::sync::snapshot::{CreditSnapshot, Subject};
use crate::sync::SyncError;
use crate::view::{first_success, LedgerView, ViewRequest};

/// Produces a credit snapshot for one subject.
#[async_trait]
pub trait CreditSource: Send + Sync {
    async fn fetch(&self, subject: &Subject, asset_type: &str) -> Result<CreditSnapshot, SyncError>;
}

/// View function names for each credit field, in preference order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreditFunctions {
    pub limit: Vec<String>,
    pub usage: Vec<String>,
    pub score: Vec<String>,
}

impl CreditFunctions {
    /// The names current and previous market module releases expose.
    pub fn standard(market: &MarketConfig) -> Self {
        let names = |current: &str, legacy: &str| vec![market.function(current), market.function(legacy)];
        Self {
            limit: names("credit_limit", "get_credit_limit"),
            usage: names("credit_usage", "get_credit_usage"),
            score: names("credit_score", "get_credit_score"),
        }
    }
}

/// [`CreditSource`] backed by ledger view calls.
pub struct LedgerCreditSource {
    view: Arc<dyn LedgerView>,
    functions: CreditFunctions,
}

impl LedgerCreditSource {
    pub fn new(view: Arc<dyn LedgerView>, market: &MarketConfig) -> Self {
        Self::with_functions(view, CreditFunctions::standard(market))
    }

    pub fn with_functions(view: Arc<dyn LedgerView>, functions: CreditFunctions) -> Self {
        Self { view, functions }
    }

    /// Limit and usage are asset-scoped and take the asset type; score is
    /// per-account.
    fn requests(names: &[String], subject: &Subject, asset_type: Option<&str>) -> Vec<ViewRequest> {
        names
            .iter()
            .map(|name| {
                let request = ViewRequest::new(name.as_str());
                let request = match asset_type {
                    Some(ty) => request.type_arg(ty),
                    None => request,
                };
                request.arg(subject.as_str())
            })
            .collect()
    }

    async fn read_first(&self, field: &'static str, requests: &[ViewRequest]) -> Result<Value, SyncError> {
        let (_, values) = first_success(self.view.as_ref(), requests)
            .await
            .map_err(|source| SyncError::View { field, source })?;
        values.into_iter().next().ok_or(SyncError::NoData(field))
    }

    async fn read_amount(
        &self,
        field: &'static str,
        names: &[String],
        subject: &Subject,
        asset_type: &str,
    ) -> Result<u128, SyncError> {
        let requests = Self::requests(names, subject, Some(asset_type));
        let value = self.read_first(field, &requests).await?;
        decimal_raw(&value).map_err(|reason| SyncError::Decimal { field, reason })
    }

    async fn read_score(&self, subject: &Subject) -> Result<u8, SyncError> {
        let requests = Self::requests(&self.functions.score, subject, None);
        let value = self.read_first("score", &requests).await?;
        to_score(unwrap_singleton(&value)).map_err(|reason| SyncError::Coercion {
            field: "score",
            reason,
        })
    }
}

#[async_trait]
impl CreditSource for LedgerCreditSource {
    async fn fetch(&self, subject: &Subject, asset_type: &str) -> Result<CreditSnapshot, SyncError> {
        let (limit, usage, score) = tokio::join!(
            self.read_amount("limit", &self.functions.limit, subject, asset_type),
            self.read_amount("usage", &self.functions.usage, subject, asset_type),
            self.read_score(subject),
        );

        if let (Err(limit_err), Err(_), Err(_)) = (&limit, &usage, &score) {
            return Err(limit_err.clone());
        }

        for (field, err) in [
            ("limit", limit.as_ref().err()),
            ("usage", usage.as_ref().err()),
            ("score", score.as_ref().err()),
        ] {
            if let Some(err) = err {
                debug!(subject = %subject, field, error = %err, "partial credit read");
            }
        }

        Ok(CreditSnapshot::new(limit.ok(), usage.ok(), score.ok()))
    }
}
