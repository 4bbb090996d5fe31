//! # Status API
//!
//! Builds the axum router that exposes what the watcher currently knows.
//! Reads come straight from the feed's and monitor's watch channels, so a
//! request never triggers a ledger call of its own.
//!
//! ## Endpoints
//!
//! | Method | Path       | Description                                   |
//! |--------|------------|-----------------------------------------------|
//! | GET    | `/health`  | Liveness probe                                |
//! | GET    | `/credit`  | Current credit view of the followed subject   |
//! | GET    | `/rate`    | Current exchange rate and yield               |
//! | POST   | `/refresh` | Publish a refresh event after a confirmed tx  |

use axum::{
    extract::State,
    http::{Method, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use nova_credit_sync::{CreditView, RateView, RefreshBus};

use crate::metrics::SharedMetrics;

// ---------------------------------------------------------------------------
// Application State
// ---------------------------------------------------------------------------

/// Shared application state available to all request handlers.
#[derive(Clone)]
pub struct AppState {
    pub version: String,
    /// Latest credit view, kept current by the feed.
    pub credit: watch::Receiver<CreditView>,
    /// Latest rate view, kept current by the reserve monitor.
    pub rate: watch::Receiver<RateView>,
    /// Where `POST /refresh` publishes.
    pub bus: RefreshBus,
    pub metrics: SharedMetrics,
}

// ---------------------------------------------------------------------------
// Router Construction
// ---------------------------------------------------------------------------

/// Builds the API [`Router`] with CORS and request tracing.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/credit", get(credit_handler))
        .route("/rate", get(rate_handler))
        .route("/refresh", post(refresh_handler))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Request / Response Types
// ---------------------------------------------------------------------------

/// Body of `POST /refresh`.
#[derive(Debug, Deserialize, Serialize)]
pub struct RefreshRequest {
    /// What happened, e.g. `"borrow"` or `"repay"`.
    pub reason: String,
    /// Account the change concerns. Omit to refresh everyone.
    #[serde(default)]
    pub owner: Option<String>,
}

/// Response to `POST /refresh`.
#[derive(Debug, Deserialize, Serialize)]
pub struct RefreshResponse {
    /// How many subscribers received the event.
    pub delivered: usize,
}

/// Response payload for `GET /health`.
#[derive(Debug, Deserialize, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    /// Subject the credit feed follows, if any.
    pub subject: Option<String>,
    pub timestamp: String,
}

/// Generic error body.
#[derive(Debug, Deserialize, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `GET /health`. Liveness only; a failing ledger shows up as flags on
/// `/credit` and `/rate`, not here.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let subject = state.credit.borrow().subject.clone();
    Json(HealthResponse {
        status: "ok".into(),
        version: state.version.clone(),
        subject,
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

/// `GET /credit`.
async fn credit_handler(State(state): State<AppState>) -> impl IntoResponse {
    let view = state.credit.borrow().clone();
    Json(view)
}

/// `GET /rate`.
async fn rate_handler(State(state): State<AppState>) -> impl IntoResponse {
    let view = state.rate.borrow().clone();
    Json(view)
}

/// `POST /refresh`. Called once a state-changing transaction is confirmed.
async fn refresh_handler(
    State(state): State<AppState>,
    Json(req): Json<RefreshRequest>,
) -> impl IntoResponse {
    let reason = req.reason.trim();
    if reason.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: "reason must not be empty".into(),
            }),
        )
            .into_response();
    }

    let owner = req.owner.as_deref().map(str::trim).filter(|o| !o.is_empty());
    let delivered = state.bus.publish(reason, owner);
    state.metrics.refresh_events_total.inc();
    tracing::info!(reason, owner = owner.unwrap_or("*"), delivered, "refresh published");

    (StatusCode::ACCEPTED, Json(RefreshResponse { delivered })).into_response()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use nova_credit_sync::sync::{CreditSnapshot, Subject};
    use std::sync::{Arc, Mutex};
    use tower::ServiceExt;

    struct Harness {
        router: Router,
        credit_tx: watch::Sender<CreditView>,
        rate_tx: watch::Sender<RateView>,
        bus: RefreshBus,
        metrics: SharedMetrics,
    }

    fn harness() -> Harness {
        let (credit_tx, credit) = watch::channel(CreditView::no_session());
        let (rate_tx, rate) = watch::channel(RateView::default());
        let bus = RefreshBus::new();
        let metrics = Arc::new(crate::metrics::NodeMetrics::new().unwrap());
        let router = create_router(AppState {
            version: "0.1.0-test".into(),
            credit,
            rate,
            bus: bus.clone(),
            metrics: metrics.clone(),
        });
        Harness {
            router,
            credit_tx,
            rate_tx,
            bus,
            metrics,
        }
    }

    async fn get(router: &Router, path: &str) -> (StatusCode, Vec<u8>) {
        let req = Request::builder().uri(path).body(Body::empty()).unwrap();
        let resp = router.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let body = resp.into_body().collect().await.unwrap().to_bytes().to_vec();
        (status, body)
    }

    async fn post_json(router: &Router, path: &str, body: serde_json::Value) -> (StatusCode, Vec<u8>) {
        let req = Request::builder()
            .method("POST")
            .uri(path)
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap();
        let resp = router.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let body = resp.into_body().collect().await.unwrap().to_bytes().to_vec();
        (status, body)
    }

    // -- 1. Health ------------------------------------------------------------

    #[tokio::test]
    async fn health_reports_followed_subject() {
        let h = harness();
        let (status, body) = get(&h.router, "/health").await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
        assert!(json["subject"].is_null());

        h.credit_tx
            .send_replace(CreditView::bound(&Subject::parse("0xABC").unwrap()));
        let (_, body) = get(&h.router, "/health").await;
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["subject"], "0xabc");
    }

    // -- 2. Credit ------------------------------------------------------------

    #[tokio::test]
    async fn credit_shows_no_session_sentinel() {
        let h = harness();
        let (status, body) = get(&h.router, "/credit").await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert!(json["subject"].is_null());
        assert_eq!(json["limit_display"], "-");
        assert_eq!(json["available_display"], "-");
    }

    #[tokio::test]
    async fn credit_reflects_latest_view() {
        let h = harness();
        let mut view = CreditView::bound(&Subject::parse("0xabc").unwrap());
        view.apply(&CreditSnapshot::new(Some(5_000_000), Some(1_250_000), Some(77)), 6);
        h.credit_tx.send_replace(view);

        let (_, body) = get(&h.router, "/credit").await;
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["limit"], 5_000_000);
        assert_eq!(json["available_display"], "3.75");
        assert_eq!(json["score"], 77);
        assert_eq!(json["stale"], false);
    }

    // -- 3. Rate --------------------------------------------------------------

    #[tokio::test]
    async fn rate_starts_unavailable() {
        let h = harness();
        let (status, body) = get(&h.router, "/rate").await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert!(json["pps"].is_null());
        assert_eq!(json["pps_display"], "-");
        assert_eq!(json["yield_estimate"]["status"], "insufficient");

        let view = RateView {
            stale: true,
            ..RateView::default()
        };
        h.rate_tx.send_replace(view);
        let (_, body) = get(&h.router, "/rate").await;
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["stale"], true);
    }

    // -- 4. Refresh -----------------------------------------------------------

    #[tokio::test]
    async fn refresh_publishes_on_bus() {
        let h = harness();
        let seen: Arc<Mutex<Vec<(String, Option<String>)>>> = Arc::default();
        let s = seen.clone();
        let _sub = h.bus.subscribe(move |event| {
            s.lock()
                .unwrap()
                .push((event.reason.clone(), event.owner.clone()));
        });

        let (status, body) = post_json(
            &h.router,
            "/refresh",
            serde_json::json!({ "reason": "borrow", "owner": "0xABC" }),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let resp: RefreshResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(resp.delivered, 1);

        let (status, _) = post_json(&h.router, "/refresh", serde_json::json!({ "reason": "market" })).await;
        assert_eq!(status, StatusCode::ACCEPTED);

        let events = seen.lock().unwrap().clone();
        assert_eq!(
            events,
            vec![
                ("borrow".to_string(), Some("0xABC".to_string())),
                ("market".to_string(), None),
            ]
        );
        assert_eq!(h.metrics.refresh_events_total.get(), 2);
        assert_eq!(h.bus.published(), 2);
    }

    #[tokio::test]
    async fn refresh_rejects_blank_reason() {
        let h = harness();
        let (status, body) = post_json(&h.router, "/refresh", serde_json::json!({ "reason": "  " })).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let err: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert!(err.error.contains("reason"));
        assert_eq!(h.bus.published(), 0);
    }

    #[tokio::test]
    async fn refresh_rejects_malformed_body() {
        let h = harness();
        let (status, _) = post_json(&h.router, "/refresh", serde_json::json!({ "owner": "0xabc" })).await;
        assert!(status.is_client_error());
        assert_eq!(h.bus.published(), 0);
    }
}
