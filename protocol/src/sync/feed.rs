//! # Credit Feed
//!
//! The per-consumer half of credit synchronization: a reactive
//! [`CreditView`] for whichever subject the consumer is currently showing.
//!
//! ## Read cycle
//!
//! ```text
//!   read(None)      -> no-session view, timer cancelled. Only way to blank.
//!   read(Some(s))   -> bind s (new generation if it changed)
//!                      nothing shown yet: show last-known-good, stale
//!                      store.begin_read:
//!                        Backoff(r)   -> timer at r
//!                        Fresh(snap)  -> apply, timer at poll interval
//!                        Fetch(p)     -> loading, await p
//!                                          ok  -> apply, timer at poll interval
//!                                          partial -> apply, flag, timer at
//!                                                     backoff or poll interval
//!                                          err -> flag, timer at backoff delay
//! ```
//!
//! A feed holds exactly one [`TimerSlot`], so the steady poll and the
//! backoff retry can never both be pending.
//!
//! ## Relevance
//!
//! Every change of subject bumps a generation counter. A fetch result, a
//! timer, or a bus event carrying an older generation is dropped on the
//! floor. The store still records the result; only this feed ignores it.

use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::debug;

use crate::bus::{RefreshBus, RefreshEvent, Subscription};
use crate::config::MarketConfig;
use crate::sync::scheduler::{Scheduler, TimerSlot};
use crate::sync::snapshot::{CacheKey, CreditSnapshot, CreditView, Subject};
use crate::sync::store::{CreditStateStore, KeyWatch, PendingFetch, ReadPlan};
use crate::sync::SyncError;

#[derive(Default)]
struct Binding {
    generation: u64,
    key: Option<CacheKey>,
    watch: Option<KeyWatch>,
}

struct FeedInner {
    store: CreditStateStore,
    asset_type: String,
    decimals: u8,
    scheduler: Arc<dyn Scheduler>,
    timer: TimerSlot,
    binding: Mutex<Binding>,
    tx: watch::Sender<CreditView>,
}

/// Reactive credit view for one consumer.
///
/// Dropping the feed cancels its timer and releases its subject.
pub struct CreditFeed {
    inner: Arc<FeedInner>,
    bus: Mutex<Option<Subscription>>,
}

impl CreditFeed {
    pub fn new(store: CreditStateStore, market: &MarketConfig, scheduler: Arc<dyn Scheduler>) -> Self {
        let (tx, _) = watch::channel(CreditView::no_session());
        Self {
            inner: Arc::new(FeedInner {
                store,
                asset_type: market.asset_type.clone(),
                decimals: market.decimals,
                scheduler,
                timer: TimerSlot::new(),
                binding: Mutex::new(Binding::default()),
                tx,
            }),
            bus: Mutex::new(None),
        }
    }

    /// Refresh whenever `bus` publishes an event for our subject (or for
    /// everyone). Replaces any earlier bus attachment.
    pub fn attach_bus(&self, bus: &RefreshBus) {
        let weak = Arc::downgrade(&self.inner);
        let subscription = bus.subscribe(move |event| FeedInner::on_event(&weak, event));
        *self.bus.lock() = Some(subscription);
    }

    pub fn subscribe(&self) -> watch::Receiver<CreditView> {
        self.inner.tx.subscribe()
    }

    pub fn current(&self) -> CreditView {
        self.inner.tx.borrow().clone()
    }

    pub fn subject(&self) -> Option<Subject> {
        self.inner
            .binding
            .lock()
            .key
            .as_ref()
            .map(|key| key.subject.clone())
    }

    /// Shows `subject` (or nothing) and runs one read cycle for it. Returns
    /// once the cycle's outcome has been applied; later polls run on the
    /// feed's timer.
    pub async fn read(&self, subject: Option<&str>) {
        let Some(subject) = subject.and_then(Subject::parse) else {
            self.inner.clear();
            return;
        };
        let key = CacheKey::new(subject, &self.inner.asset_type);
        let generation = self.inner.bind(&key);
        FeedInner::cycle(&self.inner, key, generation).await;
    }

    /// Forces a re-read of the current subject, bypassing cache and
    /// backoff. No-op without a subject.
    pub async fn refresh(&self) {
        if let Some((key, generation)) = self.inner.current() {
            FeedInner::refresh_cycle(&self.inner, key, generation).await;
        }
    }

    /// Whether a poll or retry is scheduled.
    pub fn is_scheduled(&self) -> bool {
        self.inner.timer.is_armed()
    }
}

impl Drop for CreditFeed {
    fn drop(&mut self) {
        self.bus.lock().take();
        self.inner.timer.disarm();
        let released = std::mem::take(&mut *self.inner.binding.lock());
        drop(released);
    }
}

impl FeedInner {
    fn current(&self) -> Option<(CacheKey, u64)> {
        let binding = self.binding.lock();
        binding
            .key
            .clone()
            .map(|key| (key, binding.generation))
    }

    fn is_current(&self, generation: u64) -> bool {
        let binding = self.binding.lock();
        binding.key.is_some() && binding.generation == generation
    }

    /// Binds `key`, returning its generation. Rebinding the same key keeps
    /// the generation and the displayed values.
    fn bind(&self, key: &CacheKey) -> u64 {
        let mut binding = self.binding.lock();
        if binding.key.as_ref() == Some(key) {
            return binding.generation;
        }

        binding.generation += 1;
        binding.key = Some(key.clone());
        let previous = binding.watch.replace(self.store.watch(key));
        let generation = binding.generation;
        self.tx.send_replace(CreditView::bound(&key.subject));
        drop(binding);

        drop(previous);
        self.timer.disarm();
        debug!(subject = %key.subject, generation, "feed bound");
        generation
    }

    fn clear(&self) {
        let mut binding = self.binding.lock();
        binding.generation += 1;
        binding.key = None;
        let previous = binding.watch.take();
        self.tx.send_replace(CreditView::no_session());
        drop(binding);

        drop(previous);
        self.timer.disarm();
        debug!("feed cleared, no session");
    }

    /// Applies `f` to the published view if `generation` is still current.
    fn update(&self, generation: u64, f: impl FnOnce(&mut CreditView)) -> bool {
        let binding = self.binding.lock();
        if binding.key.is_none() || binding.generation != generation {
            return false;
        }
        self.tx.send_modify(f);
        true
    }

    /// Applies a fetch or cache result. A partial snapshot leaves the view
    /// flagged: some of what it shows was not confirmed this cycle.
    fn apply(&self, generation: u64, snapshot: &CreditSnapshot) {
        let decimals = self.decimals;
        self.update(generation, |view| {
            view.apply(snapshot, decimals);
            view.loading = false;
            view.stale = snapshot.partial;
            view.last_fetch_failed = snapshot.partial;
        });
    }

    /// Shows last-known-good for a freshly bound subject. A view that
    /// already holds values is left alone.
    fn show_last_good(&self, generation: u64, key: &CacheKey) {
        let Some(good) = self.store.last_good(key) else {
            return;
        };
        let decimals = self.decimals;
        self.update(generation, |view| {
            if !view.has_values() {
                view.apply(&good, decimals);
                view.stale = true;
            }
        });
    }

    async fn cycle(inner: &Arc<Self>, key: CacheKey, generation: u64) {
        inner.show_last_good(generation, &key);

        match inner.store.begin_read(&key) {
            ReadPlan::Backoff { remaining } => {
                Self::schedule(inner, generation, remaining);
            }
            ReadPlan::Fresh(snapshot) => {
                inner.apply(generation, &snapshot);
                Self::schedule(inner, generation, inner.store.config().poll_interval);
            }
            ReadPlan::Fetch(pending) => {
                if pending.joined_existing() {
                    debug!(subject = %key.subject, "feed joined in-flight fetch");
                }
                Self::finish(inner, key, generation, pending).await;
            }
        }
    }

    async fn refresh_cycle(inner: &Arc<Self>, key: CacheKey, generation: u64) {
        debug!(subject = %key.subject, generation, "feed refresh");
        let pending = inner.store.begin_refresh(&key);
        Self::finish(inner, key, generation, pending).await;
    }

    async fn finish(inner: &Arc<Self>, key: CacheKey, generation: u64, pending: PendingFetch) {
        inner.update(generation, |view| view.loading = true);
        let result = inner.store.settle(&key, pending).await;

        if !inner.is_current(generation) {
            debug!(subject = %key.subject, generation, "discarding result for a previous binding");
            return;
        }

        match result {
            Ok(snapshot) => {
                inner.apply(generation, &snapshot);
                let poll = inner.store.config().poll_interval;
                let delay = if snapshot.partial {
                    inner.store.backoff_remaining(&key).unwrap_or(poll)
                } else {
                    poll
                };
                Self::schedule(inner, generation, delay);
            }
            Err(SyncError::BackingOff { retry_in }) => {
                inner.update(generation, |view| view.loading = false);
                Self::schedule(inner, generation, retry_in);
            }
            Err(_) => {
                inner.update(generation, |view| {
                    view.loading = false;
                    view.last_fetch_failed = true;
                    view.stale = view.has_values();
                });
                Self::schedule(inner, generation, inner.store.retry_delay(&key));
            }
        }
    }

    fn schedule(inner: &Arc<Self>, generation: u64, delay: Duration) {
        if !inner.is_current(generation) {
            return;
        }
        let weak = Arc::downgrade(inner);
        inner.timer.arm(inner.scheduler.as_ref(), delay, move |id| {
            async move {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                if !inner.timer.fired(id) {
                    return;
                }
                if let Some((key, current)) = inner.current() {
                    if current == generation {
                        Self::cycle(&inner, key, generation).await;
                    }
                }
            }
            .boxed()
        });
    }

    fn on_event(weak: &Weak<Self>, event: &RefreshEvent) {
        let Some(inner) = weak.upgrade() else {
            return;
        };
        let Some((key, generation)) = inner.current() else {
            return;
        };
        if !event.concerns(&key.subject) {
            return;
        }
        debug!(event = %event.id, reason = %event.reason, subject = %key.subject, "refresh requested");

        let task_weak = Arc::downgrade(&inner);
        inner.timer.arm(inner.scheduler.as_ref(), Duration::ZERO, move |id| {
            async move {
                let Some(inner) = task_weak.upgrade() else {
                    return;
                };
                if !inner.timer.fired(id) {
                    return;
                }
                if let Some((key, current)) = inner.current() {
                    if current == generation {
                        Self::refresh_cycle(&inner, key, generation).await;
                    }
                }
            }
            .boxed()
        });
    }
}
