//! # Prometheus Metrics
//!
//! Mirrors the watcher's state into Prometheus. Scraped at `/metrics` on
//! the metrics port.
//!
//! The credit store keeps its own lock-free counters; [`NodeMetrics`]
//! copies them over whenever a view changes, so the store never has to know
//! Prometheus exists. Everything lives in a dedicated registry under the
//! `nova` namespace.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::core::Collector;
use prometheus::{Encoder, Gauge, IntCounter, IntGauge, Registry, TextEncoder};

use nova_credit_sync::config::SCALE;
use nova_credit_sync::sync::StatsSnapshot;
use nova_credit_sync::{CreditView, RateView};

/// All metric handles for the watcher. Prometheus handles are `Arc`s, so
/// clones share values.
#[derive(Clone)]
pub struct NodeMetrics {
    registry: Registry,

    /// Network fetches the credit store started.
    pub credit_fetches_total: IntCounter,
    /// Credit fetches that failed outright.
    pub credit_fetch_failures_total: IntCounter,
    /// Reads answered from the cache.
    pub credit_cache_hits_total: IntCounter,
    /// Reads that joined a fetch already in flight.
    pub credit_inflight_joins_total: IntCounter,
    /// Forced refreshes.
    pub credit_refreshes_total: IntCounter,
    /// Consecutive failures for the followed subject.
    pub credit_backoff_failures: IntGauge,

    /// Credit limit in whole asset units.
    pub credit_limit: Gauge,
    /// Outstanding usage in whole asset units.
    pub credit_usage: Gauge,
    /// Remaining credit in whole asset units.
    pub credit_available: Gauge,
    pub credit_score: IntGauge,
    /// 1 while the credit view shows last-known-good values.
    pub credit_stale: IntGauge,

    /// Price per share as a plain ratio.
    pub rate_price_per_share: Gauge,
    /// Annualized yield as a ratio (0.05 = 5%).
    pub rate_apy: Gauge,
    /// 1 while the displayed rate is older than the latest poll.
    pub rate_stale: IntGauge,

    /// Refresh events published through the API.
    pub refresh_events_total: IntCounter,
}

fn register<C: Collector + Clone + 'static>(registry: &Registry, collector: C) -> Result<C, prometheus::Error> {
    registry.register(Box::new(collector.clone()))?;
    Ok(collector)
}

fn counter(registry: &Registry, name: &str, help: &str) -> Result<IntCounter, prometheus::Error> {
    register(registry, IntCounter::new(name, help)?)
}

fn int_gauge(registry: &Registry, name: &str, help: &str) -> Result<IntGauge, prometheus::Error> {
    register(registry, IntGauge::new(name, help)?)
}

fn gauge(registry: &Registry, name: &str, help: &str) -> Result<Gauge, prometheus::Error> {
    register(registry, Gauge::new(name, help)?)
}

/// Brings a Prometheus counter up to an externally kept total.
fn catch_up(counter: &IntCounter, total: u64) {
    let seen = counter.get();
    if total > seen {
        counter.inc_by(total - seen);
    }
}

fn units(raw: u128, decimals: u8) -> f64 {
    raw as f64 / 10f64.powi(i32::from(decimals))
}

impl NodeMetrics {
    /// Creates and registers all metrics. Call once at startup.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("nova".into()), None)?;

        Ok(Self {
            credit_fetches_total: counter(&registry, "credit_fetches_total", "Credit fetches started")?,
            credit_fetch_failures_total: counter(
                &registry,
                "credit_fetch_failures_total",
                "Credit fetches that failed on every field",
            )?,
            credit_cache_hits_total: counter(&registry, "credit_cache_hits_total", "Credit reads served from cache")?,
            credit_inflight_joins_total: counter(
                &registry,
                "credit_inflight_joins_total",
                "Credit reads that joined an in-flight fetch",
            )?,
            credit_refreshes_total: counter(&registry, "credit_refreshes_total", "Forced credit refreshes")?,
            credit_backoff_failures: int_gauge(
                &registry,
                "credit_backoff_failures",
                "Consecutive credit fetch failures for the followed subject",
            )?,
            credit_limit: gauge(&registry, "credit_limit", "Credit limit in asset units")?,
            credit_usage: gauge(&registry, "credit_usage", "Credit usage in asset units")?,
            credit_available: gauge(&registry, "credit_available", "Available credit in asset units")?,
            credit_score: int_gauge(&registry, "credit_score", "Credit score")?,
            credit_stale: int_gauge(&registry, "credit_stale", "1 while credit values are last-known-good")?,
            rate_price_per_share: gauge(&registry, "rate_price_per_share", "Pool price per share")?,
            rate_apy: gauge(&registry, "rate_apy", "Annualized pool yield as a ratio")?,
            rate_stale: int_gauge(&registry, "rate_stale", "1 while the exchange rate is stale")?,
            refresh_events_total: counter(&registry, "refresh_events_total", "Refresh events published")?,
            registry,
        })
    }

    pub fn observe_store(&self, stats: StatsSnapshot, consecutive_failures: Option<u32>) {
        catch_up(&self.credit_fetches_total, stats.fetches_started);
        catch_up(&self.credit_fetch_failures_total, stats.fetch_failures);
        catch_up(&self.credit_cache_hits_total, stats.cache_hits);
        catch_up(&self.credit_inflight_joins_total, stats.in_flight_joins);
        catch_up(&self.credit_refreshes_total, stats.refreshes);
        self.credit_backoff_failures
            .set(i64::from(consecutive_failures.unwrap_or(0)));
    }

    /// Unknown fields leave their gauge untouched.
    pub fn observe_credit(&self, view: &CreditView, decimals: u8) {
        if let Some(limit) = view.limit {
            self.credit_limit.set(units(limit, decimals));
        }
        if let Some(usage) = view.usage {
            self.credit_usage.set(units(usage, decimals));
        }
        if let Some(available) = view.available {
            self.credit_available.set(units(available, decimals));
        }
        if let Some(score) = view.score {
            self.credit_score.set(i64::from(score));
        }
        self.credit_stale.set(i64::from(view.stale));
    }

    pub fn observe_rate(&self, view: &RateView) {
        if let Some(pps) = view.pps {
            self.rate_price_per_share.set(pps as f64 / SCALE as f64);
        }
        if let Some(apy) = view.yield_estimate.apy() {
            self.rate_apy.set(apy);
        }
        self.rate_stale.set(i64::from(view.stale));
    }

    /// Encodes all registered metrics in the Prometheus text format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

/// Shared metrics state passed to axum handlers.
pub type SharedMetrics = Arc<NodeMetrics>;

/// Renders `/metrics` in Prometheus text format.
pub async fn metrics_handler(State(metrics): State<SharedMetrics>) -> impl IntoResponse {
    match metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response()
        }
    }
}
