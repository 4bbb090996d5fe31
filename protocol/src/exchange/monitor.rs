//! # Reserve Monitor
//!
//! Polls reserve state on a timer, turns it into a [`RateView`] and
//! publishes it on a `tokio::sync::watch` channel. Subscribers always see
//! the latest view; intermediate ones may be skipped, which is fine for a
//! number that only ever matters "now".
//!
//! ## Staleness
//!
//! ```text
//!   poll ok, pps > 0    -> fresh view, sample recorded, backoff reset
//!   poll ok, pps == 0   -> keep last rate (stale), or "unavailable" if none
//!   poll failed         -> keep last rate (stale, last_poll_failed), back off
//! ```
//!
//! A rate that was known is never replaced by "unknown".

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::{MarketConfig, RateConfig, SCALE};
use crate::exchange::apy::{yield_from_samples, YieldEstimate, YieldSample};
use crate::exchange::rate::{compute_pps, shares_to_assets, ReserveSnapshot};
use crate::exchange::reserve::reserve_candidates;
use crate::exchange::RateError;
use crate::format::{format_fixed9, format_ratio_percent, UNKNOWN};
use crate::sync::backoff::BackoffState;
use crate::sync::scheduler::{Scheduler, TimerSlot};
use crate::view::{first_success, LedgerView, ViewRequest};

/// What subscribers see.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateView {
    /// Price per share (x10^9). `None` until a non-zero price is observed.
    pub pps: Option<u128>,
    pub pps_display: String,
    pub yield_estimate: YieldEstimate,
    pub apr_display: String,
    pub apy_display: String,
    /// The displayed rate is older than the latest poll.
    pub stale: bool,
    pub last_poll_failed: bool,
    /// When `pps` was last refreshed.
    pub updated_at: Option<DateTime<Utc>>,
}

impl Default for RateView {
    fn default() -> Self {
        Self {
            pps: None,
            pps_display: UNKNOWN.to_string(),
            yield_estimate: YieldEstimate::default(),
            apr_display: UNKNOWN.to_string(),
            apy_display: UNKNOWN.to_string(),
            stale: false,
            last_poll_failed: false,
            updated_at: None,
        }
    }
}

impl RateView {
    fn fresh(pps: u128, estimate: YieldEstimate) -> Self {
        Self {
            pps: Some(pps),
            pps_display: format_fixed9(pps),
            yield_estimate: estimate,
            apr_display: estimate.apr().map_or_else(|| UNKNOWN.to_string(), format_ratio_percent),
            apy_display: estimate.apy().map_or_else(|| UNKNOWN.to_string(), format_ratio_percent),
            stale: false,
            last_poll_failed: false,
            updated_at: Some(Utc::now()),
        }
    }

    /// Asset value of `shares` at the published price.
    pub fn assets_for(&self, shares: u128) -> Option<u128> {
        self.pps
            .and_then(|pps| shares_to_assets(shares, pps, SCALE).ok())
    }
}

// ---------------------------------------------------------------------------
// Monitor
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct MonitorState {
    samples: VecDeque<YieldSample>,
    backoff: BackoffState,
    last_snapshot: Option<ReserveSnapshot>,
}

struct MonitorInner {
    view: Arc<dyn LedgerView>,
    candidates: Vec<ViewRequest>,
    config: RateConfig,
    scheduler: Arc<dyn Scheduler>,
    timer: TimerSlot,
    running: AtomicBool,
    state: Mutex<MonitorState>,
    tx: watch::Sender<RateView>,
    epoch: Instant,
}

/// Background poller for one market's reserve.
///
/// Dropping the monitor stops polling.
pub struct ReserveMonitor {
    inner: Arc<MonitorInner>,
}

impl ReserveMonitor {
    pub fn new(
        view: Arc<dyn LedgerView>,
        market: &MarketConfig,
        config: RateConfig,
        scheduler: Arc<dyn Scheduler>,
    ) -> Self {
        let (tx, _) = watch::channel(RateView::default());
        Self {
            inner: Arc::new(MonitorInner {
                view,
                candidates: reserve_candidates(market),
                config,
                scheduler,
                timer: TimerSlot::new(),
                running: AtomicBool::new(false),
                state: Mutex::new(MonitorState::default()),
                tx,
                epoch: Instant::now(),
            }),
        }
    }

    /// A receiver that always holds the latest [`RateView`].
    pub fn subscribe(&self) -> watch::Receiver<RateView> {
        self.inner.tx.subscribe()
    }

    /// The latest published view.
    pub fn current(&self) -> RateView {
        self.inner.tx.borrow().clone()
    }

    /// The last successfully decoded reserve state.
    pub fn last_snapshot(&self) -> Option<ReserveSnapshot> {
        self.inner.state.lock().last_snapshot
    }

    /// Polls once, publishes the outcome, and returns the fresh PPS.
    ///
    /// Does not touch the timer.
    pub async fn poll_once(&self) -> Result<u128, RateError> {
        MonitorInner::poll(&self.inner).await
    }

    /// Starts the poll loop. The first poll runs immediately.
    pub fn start(&self) {
        if !self.inner.running.swap(true, Ordering::SeqCst) {
            info!(
                interval_secs = self.inner.config.poll_interval.as_secs(),
                "reserve monitor started"
            );
            MonitorInner::arm(&self.inner, Duration::ZERO);
        }
    }

    /// Stops the poll loop. A poll already in flight completes but does not
    /// reschedule.
    pub fn stop(&self) {
        if self.inner.running.swap(false, Ordering::SeqCst) {
            debug!("reserve monitor stopped");
        }
        self.inner.timer.disarm();
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }
}

impl Drop for ReserveMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

impl MonitorInner {
    fn arm(inner: &Arc<Self>, delay: Duration) {
        if !inner.running.load(Ordering::SeqCst) {
            return;
        }
        let weak: Weak<Self> = Arc::downgrade(inner);
        inner.timer.arm(inner.scheduler.as_ref(), delay, move |id| {
            async move {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                if !inner.timer.fired(id) {
                    return;
                }
                let next = match Self::poll(&inner).await {
                    Ok(_) => inner.config.poll_interval,
                    Err(_) => inner.retry_delay(),
                };
                Self::arm(&inner, next);
            }
            .boxed()
        });
    }

    async fn poll(inner: &Arc<Self>) -> Result<u128, RateError> {
        let outcome = async {
            let (index, values) = first_success(inner.view.as_ref(), &inner.candidates).await?;
            let snapshot = ReserveSnapshot::from_view(&values)?;
            let pps = compute_pps(&snapshot)?;
            Ok::<_, RateError>((index, snapshot, pps))
        }
        .await;

        match outcome {
            Ok((index, snapshot, pps)) => {
                debug!(
                    function = %inner.candidates[index].function,
                    pps,
                    "reserve polled"
                );
                inner.record_success(snapshot, pps);
                Ok(pps)
            }
            Err(e) => {
                let delay = inner.record_failure();
                warn!(error = %e, retry_in_ms = delay.as_millis() as u64, "reserve poll failed");
                Err(e)
            }
        }
    }

    fn record_success(&self, snapshot: ReserveSnapshot, pps: u128) {
        let mut state = self.state.lock();
        state.backoff.reset();
        state.last_snapshot = Some(snapshot);

        if pps == 0 {
            drop(state);
            warn!("reserve reports zero price per share");
            self.tx.send_modify(|view| {
                view.last_poll_failed = false;
                if view.pps.is_some() {
                    view.stale = true;
                }
            });
            return;
        }

        let sample = YieldSample::new(pps, self.epoch.elapsed().as_secs());
        if state
            .samples
            .back()
            .is_some_and(|last| last.timestamp_secs == sample.timestamp_secs)
        {
            state.samples.pop_back();
        }
        state.samples.push_back(sample);
        while state.samples.len() > self.config.sample_capacity.max(2) {
            state.samples.pop_front();
        }

        let estimate = match (state.samples.front(), state.samples.back()) {
            (Some(first), Some(last)) if state.samples.len() >= 2 => {
                yield_from_samples(first, last, self.config.min_yield_window_secs)
            }
            _ => YieldEstimate::default(),
        };
        drop(state);

        self.tx.send_replace(RateView::fresh(pps, estimate));
    }

    fn record_failure(&self) -> Duration {
        let delay = self
            .state
            .lock()
            .backoff
            .record_failure(Instant::now(), &self.config.backoff);
        self.tx.send_modify(|view| {
            view.last_poll_failed = true;
            if view.pps.is_some() {
                view.stale = true;
            }
        });
        delay
    }

    fn retry_delay(&self) -> Duration {
        self.state.lock().backoff.current_delay(&self.config.backoff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::apy::InsufficientReason;
    use crate::sync::backoff::BackoffPolicy;
    use crate::sync::scheduler::TokioScheduler;
    use crate::view::ViewError;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::atomic::AtomicUsize;

    struct FakeReserve {
        response: Mutex<Result<Vec<Value>, ViewError>>,
        calls: AtomicUsize,
    }

    impl FakeReserve {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                response: Mutex::new(Err(ViewError::Transport("unset".into()))),
                calls: AtomicUsize::new(0),
            })
        }

        fn set_pool(&self, shares: u64, cash: u64, borrowed: u128) {
            *self.response.lock() = Ok(vec![json!({
                "total_shares": shares.to_string(),
                "available_cash": cash.to_string(),
                "initial_exchange_rate": {"value": "1000000000"},
                "reserve_amount": {"value": "0"},
                "total_borrowed": {"value": borrowed.to_string()},
            })]);
        }

        fn fail(&self) {
            *self.response.lock() = Err(ViewError::Status {
                status: 503,
                body: "down".into(),
            });
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LedgerView for FakeReserve {
        async fn view(&self, _request: &ViewRequest) -> Result<Vec<Value>, ViewError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.response.lock().clone()
        }
    }

    fn monitor(ledger: Arc<FakeReserve>) -> ReserveMonitor {
        let market = MarketConfig::new("http://ledger", "0xcafe::pool", "0x1::usdc::USDC", 6);
        let config = RateConfig {
            poll_interval: Duration::from_secs(30),
            min_yield_window_secs: 300,
            sample_capacity: 16,
            backoff: BackoffPolicy::new(Duration::from_secs(2), Duration::from_secs(8), 4),
        };
        ReserveMonitor::new(ledger, &market, config, Arc::new(TokioScheduler::current()))
    }

    #[tokio::test(start_paused = true)]
    async fn poll_publishes_rate() {
        let ledger = FakeReserve::new();
        ledger.set_pool(100, 60, 50 * SCALE);
        let monitor = monitor(ledger);
        let rx = monitor.subscribe();

        assert_eq!(monitor.poll_once().await.unwrap(), 1_100_000_000);

        let view = rx.borrow().clone();
        assert_eq!(view.pps, Some(1_100_000_000));
        assert_eq!(view.pps_display, "1.1000");
        assert!(!view.stale);
        assert!(view.updated_at.is_some());
        assert_eq!(view.assets_for(10), Some(11));
        assert_eq!(
            view.yield_estimate,
            YieldEstimate::Insufficient {
                reason: InsufficientReason::SingleSample
            }
        );
        assert_eq!(view.apr_display, UNKNOWN);
        assert_eq!(monitor.last_snapshot().map(|s| s.total_shares), Some(100));
    }

    #[tokio::test(start_paused = true)]
    async fn failure_keeps_last_rate_as_stale() {
        let ledger = FakeReserve::new();
        ledger.set_pool(100, 60, 50 * SCALE);
        let monitor = monitor(ledger.clone());
        monitor.poll_once().await.unwrap();

        ledger.fail();
        assert!(monitor.poll_once().await.is_err());
        let view = monitor.current();
        assert_eq!(view.pps, Some(1_100_000_000));
        assert!(view.stale);
        assert!(view.last_poll_failed);

        ledger.set_pool(100, 60, 50 * SCALE);
        monitor.poll_once().await.unwrap();
        let view = monitor.current();
        assert!(!view.stale);
        assert!(!view.last_poll_failed);
    }

    #[tokio::test(start_paused = true)]
    async fn failure_before_any_rate_stays_unknown() {
        let ledger = FakeReserve::new();
        ledger.fail();
        let monitor = monitor(ledger);

        assert!(matches!(monitor.poll_once().await, Err(RateError::View(_))));
        let view = monitor.current();
        assert_eq!(view.pps, None);
        assert!(!view.stale);
        assert!(view.last_poll_failed);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_price_never_regresses_known_rate() {
        let ledger = FakeReserve::new();
        // reserves swallow everything
        *ledger.response.lock() = Ok(vec![json!(["100", "0", "1000000000", "5000000000", "0"])]);
        let monitor = monitor(ledger.clone());

        assert_eq!(monitor.poll_once().await.unwrap(), 0);
        assert_eq!(monitor.current().pps, None);

        ledger.set_pool(100, 60, 50 * SCALE);
        monitor.poll_once().await.unwrap();

        *ledger.response.lock() = Ok(vec![json!(["100", "0", "1000000000", "5000000000", "0"])]);
        monitor.poll_once().await.unwrap();
        let view = monitor.current();
        assert_eq!(view.pps, Some(1_100_000_000));
        assert!(view.stale);
    }

    #[tokio::test(start_paused = true)]
    async fn yield_appears_once_window_is_wide_enough() {
        let ledger = FakeReserve::new();
        ledger.set_pool(1_000, 1_000, 0);
        let monitor = monitor(ledger.clone());
        monitor.poll_once().await.unwrap();

        tokio::time::advance(Duration::from_secs(60)).await;
        monitor.poll_once().await.unwrap();
        assert!(matches!(
            monitor.current().yield_estimate,
            YieldEstimate::Insufficient {
                reason: InsufficientReason::WindowTooShort { .. }
            }
        ));

        tokio::time::advance(Duration::from_secs(3_540)).await;
        // 1000 shares, 1000 cash + 0.114 borrowed interest
        ledger.set_pool(1_000, 1_000, 114_000_000);
        monitor.poll_once().await.unwrap();

        let view = monitor.current();
        let apr = view.yield_estimate.apr().unwrap();
        assert!((apr - 0.998_64).abs() < 1e-3, "apr = {}", apr);
        assert!(view.yield_estimate.apy().unwrap() > apr);
        assert!(view.apr_display.ends_with('%'));
    }

    #[tokio::test(start_paused = true)]
    async fn loop_polls_steadily_and_stops() {
        let ledger = FakeReserve::new();
        ledger.set_pool(100, 100, 0);
        let monitor = monitor(ledger.clone());

        monitor.start();
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(ledger.calls(), 1);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(ledger.calls(), 2);

        monitor.stop();
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(ledger.calls(), 2);
        assert!(!monitor.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn loop_backs_off_after_failures() {
        let ledger = FakeReserve::new();
        ledger.fail();
        let monitor = monitor(ledger.clone());

        monitor.start();
        tokio::time::sleep(Duration::from_millis(1)).await;
        // both candidate names tried
        assert_eq!(ledger.calls(), 2);

        // first retry after 2s, second after a further 4s
        tokio::time::sleep(Duration::from_millis(2_000)).await;
        assert_eq!(ledger.calls(), 4);
        tokio::time::sleep(Duration::from_millis(3_000)).await;
        assert_eq!(ledger.calls(), 4);
        tokio::time::sleep(Duration::from_millis(1_000)).await;
        assert_eq!(ledger.calls(), 6);
    }
}
