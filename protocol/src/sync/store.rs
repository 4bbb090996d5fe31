//! # Credit State Store
//!
//! The shared half of credit synchronization. One store serves every feed in
//! the process; two widgets showing the same subject share one cache entry,
//! one backoff counter, and at most one network fetch.
//!
//! ## Per-key state machine
//!
//! ```text
//!   Empty ──fetch──► Fetching ──ok──► Cached(fresh) ──ttl──► Cached(stale)
//!                       │                   ▲                    │
//!                       │ err               └────────ok──────────┤ fetch
//!                       ▼                                        ▼
//!                   Backoff(n) ◄──────────────err──────────── Fetching
//! ```
//!
//! ## Locking
//!
//! `DashMap<CacheKey, Arc<Mutex<KeyState>>>`: the map only hands out the
//! per-key mutex; all decisions about a key (backoff check, cache check,
//! in-flight join or start) happen under that mutex in one critical
//! section, so two readers can never both decide to start a fetch. The
//! mutex is never held across an `.await`.
//!
//! Fetches run as spawned tasks and are shared with
//! `futures::future::Shared`. The task records its own outcome in the store
//! whether or not anyone is still waiting for it.
//!
//! ## Partial fetches
//!
//! A fetch where some reads failed still updates last-known-good, but it is
//! never cached. If a field that was known before keeps failing, the fetch
//! counts as a failure for backoff.
//!
//! ## Eviction
//!
//! Entries outlive their watchers so a consumer switching back sees
//! last-known-good at once. Past `max_idle_keys` idle entries, the ones idle
//! longest are dropped.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::SyncConfig;
use crate::sync::backoff::BackoffState;
use crate::sync::snapshot::{CacheKey, CreditSnapshot};
use crate::sync::source::CreditSource;
use crate::sync::SyncError;

/// How many times a waiter follows a superseded fetch to its replacement.
const MAX_REJOINS: usize = 4;

type SharedFetch = Shared<BoxFuture<'static, Result<CreditSnapshot, SyncError>>>;

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct StoreStats {
    fetches_started: AtomicU64,
    fetch_failures: AtomicU64,
    cache_hits: AtomicU64,
    in_flight_joins: AtomicU64,
    refreshes: AtomicU64,
}

/// Point-in-time copy of the store's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub fetches_started: u64,
    pub fetch_failures: u64,
    pub cache_hits: u64,
    pub in_flight_joins: u64,
    pub refreshes: u64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

// ---------------------------------------------------------------------------
// Per-key state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct CacheEntry {
    value: CreditSnapshot,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_fresh(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

struct InFlight {
    id: u64,
    fetch: SharedFetch,
    abort: AbortHandle,
    superseded: Arc<AtomicBool>,
}

#[derive(Default)]
struct KeyState {
    cache: Option<CacheEntry>,
    last_good: Option<CreditSnapshot>,
    backoff: BackoffState,
    in_flight: Option<InFlight>,
    watchers: usize,
    idle_since: Option<Instant>,
}

impl KeyState {
    fn is_idle(&self) -> bool {
        self.watchers == 0 && self.in_flight.is_none() && self.backoff.consecutive_failures() == 0
    }
}

/// Diagnostic view of one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct KeyStatus {
    pub cached: bool,
    pub fresh: bool,
    pub in_flight: bool,
    pub consecutive_failures: u32,
    pub watchers: usize,
}

/// What a reader should do next, decided atomically for one key.
pub enum ReadPlan {
    /// The key is backing off; try again after `remaining`.
    Backoff { remaining: Duration },
    /// A live cache entry.
    Fresh(CreditSnapshot),
    /// A fetch to wait on, new or joined.
    Fetch(PendingFetch),
}

/// Handle on a fetch that is running for some key.
#[derive(Clone)]
pub struct PendingFetch {
    id: u64,
    fetch: SharedFetch,
    joined: bool,
}

impl PendingFetch {
    /// `true` when this handle joined a fetch somebody else started.
    pub fn joined_existing(&self) -> bool {
        self.joined
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

struct StoreInner {
    source: Arc<dyn CreditSource>,
    config: SyncConfig,
    keys: DashMap<CacheKey, Arc<Mutex<KeyState>>>,
    next_fetch_id: AtomicU64,
    stats: StoreStats,
}

/// Shared credit state, cheap to clone.
///
/// Must be used from within a Tokio runtime; fetches are spawned tasks.
#[derive(Clone)]
pub struct CreditStateStore {
    inner: Arc<StoreInner>,
}

impl CreditStateStore {
    pub fn new(source: Arc<dyn CreditSource>, config: SyncConfig) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                source,
                config,
                keys: DashMap::new(),
                next_fetch_id: AtomicU64::new(0),
                stats: StoreStats::default(),
            }),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    pub fn stats(&self) -> StatsSnapshot {
        let s = &self.inner.stats;
        StatsSnapshot {
            fetches_started: s.fetches_started.load(Ordering::Relaxed),
            fetch_failures: s.fetch_failures.load(Ordering::Relaxed),
            cache_hits: s.cache_hits.load(Ordering::Relaxed),
            in_flight_joins: s.in_flight_joins.load(Ordering::Relaxed),
            refreshes: s.refreshes.load(Ordering::Relaxed),
        }
    }

    fn slot(&self, key: &CacheKey) -> Arc<Mutex<KeyState>> {
        Arc::clone(&self.inner.keys.entry(key.clone()).or_default())
    }

    fn existing_slot(&self, key: &CacheKey) -> Option<Arc<Mutex<KeyState>>> {
        self.inner.keys.get(key).map(|entry| Arc::clone(entry.value()))
    }

    /// Last successfully observed snapshot for `key`, however old.
    pub fn last_good(&self, key: &CacheKey) -> Option<CreditSnapshot> {
        let slot = self.existing_slot(key)?;
        let state = slot.lock();
        state.last_good
    }

    pub fn status(&self, key: &CacheKey) -> Option<KeyStatus> {
        let slot = self.existing_slot(key)?;
        let state = slot.lock();
        let now = Instant::now();
        Some(KeyStatus {
            cached: state.cache.is_some(),
            fresh: state.cache.is_some_and(|c| c.is_fresh(now)),
            in_flight: state.in_flight.is_some(),
            consecutive_failures: state.backoff.consecutive_failures(),
            watchers: state.watchers,
        })
    }

    /// Time left in the current backoff window for `key`, if any.
    pub fn backoff_remaining(&self, key: &CacheKey) -> Option<Duration> {
        let slot = self.existing_slot(key)?;
        let state = slot.lock();
        state.backoff.remaining(Instant::now())
    }

    /// Number of entries the store currently holds.
    pub fn len(&self) -> usize {
        self.inner.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.keys.is_empty()
    }

    /// Delay before the next attempt for `key` is allowed, following the
    /// backoff policy.
    pub fn retry_delay(&self, key: &CacheKey) -> Duration {
        let policy = &self.inner.config.backoff;
        match self.existing_slot(key) {
            Some(slot) => {
                let state = slot.lock();
                let delay = state
                    .backoff
                    .remaining(Instant::now())
                    .unwrap_or_else(|| state.backoff.current_delay(policy));
                delay
            }
            None => policy.base,
        }
    }

    /// Expires the cache entry for `key` without touching anything else.
    pub fn invalidate(&self, key: &CacheKey) {
        if let Some(slot) = self.existing_slot(key) {
            if let Some(entry) = slot.lock().cache.as_mut() {
                entry.expires_at = Instant::now();
            }
        }
    }

    /// Registers interest in `key`. When the last [`KeyWatch`] for a key is
    /// dropped, its outstanding fetch is aborted.
    pub fn watch(&self, key: &CacheKey) -> KeyWatch {
        {
            let slot = self.slot(key);
            let mut state = slot.lock();
            state.watchers += 1;
            state.idle_since = None;
        }
        KeyWatch {
            store: self.clone(),
            key: key.clone(),
        }
    }

    fn release(&self, key: &CacheKey) {
        let Some(slot) = self.existing_slot(key) else {
            return;
        };
        let mut state = slot.lock();
        state.watchers = state.watchers.saturating_sub(1);
        if state.watchers > 0 {
            return;
        }
        if let Some(flight) = state.in_flight.take() {
            flight.abort.abort();
            debug!(key = %key, fetch = flight.id, "no watchers left, fetch aborted");
        }
        state.idle_since = Some(Instant::now());
        drop(state);
        self.evict_idle();
    }

    /// Drops the longest-idle entries beyond `max_idle_keys`.
    fn evict_idle(&self) {
        let limit = self.inner.config.max_idle_keys;
        if self.inner.keys.len() <= limit {
            return;
        }

        let now = Instant::now();
        let mut idle: Vec<(Instant, CacheKey)> = self
            .inner
            .keys
            .iter()
            .filter_map(|entry| {
                let state = entry.value().try_lock()?;
                state
                    .is_idle()
                    .then(|| (state.idle_since.unwrap_or(now), entry.key().clone()))
            })
            .collect();
        if idle.len() <= limit {
            return;
        }

        idle.sort_by_key(|(since, _)| *since);
        let excess = idle.len() - limit;
        for (_, key) in idle.into_iter().take(excess) {
            // Only the map holds the slot, so nobody is mid-operation on it.
            let removed = self.inner.keys.remove_if(&key, |_, slot| {
                Arc::strong_count(slot) == 1 && slot.try_lock().is_some_and(|state| state.is_idle())
            });
            if removed.is_some() {
                debug!(key = %key, "idle entry evicted");
            }
        }
    }

    /// Decides, under the key's lock, between backing off, serving the
    /// cache, joining the running fetch, or starting a new one.
    pub fn begin_read(&self, key: &CacheKey) -> ReadPlan {
        let slot = self.slot(key);
        let mut state = slot.lock();
        let now = Instant::now();

        if let Some(remaining) = state.backoff.remaining(now) {
            debug!(key = %key, remaining_ms = remaining.as_millis() as u64, "read skipped, backing off");
            return ReadPlan::Backoff { remaining };
        }

        if let Some(entry) = state.cache.filter(|c| c.is_fresh(now)) {
            bump(&self.inner.stats.cache_hits);
            debug!(key = %key, "cache hit");
            return ReadPlan::Fresh(entry.value);
        }

        if let Some(flight) = &state.in_flight {
            bump(&self.inner.stats.in_flight_joins);
            debug!(key = %key, fetch = flight.id, "joining in-flight fetch");
            return ReadPlan::Fetch(PendingFetch {
                id: flight.id,
                fetch: flight.fetch.clone(),
                joined: true,
            });
        }

        ReadPlan::Fetch(self.start_fetch(key, &mut state))
    }

    /// Expires the cache, supersedes any running fetch, and starts a new
    /// one regardless of backoff.
    pub fn begin_refresh(&self, key: &CacheKey) -> PendingFetch {
        let slot = self.slot(key);
        let mut state = slot.lock();
        bump(&self.inner.stats.refreshes);

        if let Some(entry) = state.cache.as_mut() {
            entry.expires_at = Instant::now();
        }
        if let Some(old) = state.in_flight.take() {
            old.superseded.store(true, Ordering::SeqCst);
            old.abort.abort();
            debug!(key = %key, fetch = old.id, "in-flight fetch superseded by refresh");
        }
        self.start_fetch(key, &mut state)
    }

    fn start_fetch(&self, key: &CacheKey, state: &mut KeyState) -> PendingFetch {
        let id = self.inner.next_fetch_id.fetch_add(1, Ordering::Relaxed) + 1;
        bump(&self.inner.stats.fetches_started);
        debug!(key = %key, fetch = id, "fetch started");

        let inner = Arc::clone(&self.inner);
        let task_key = key.clone();
        let task = tokio::spawn(async move {
            let result = inner
                .source
                .fetch(&task_key.subject, &task_key.asset_type)
                .await;
            complete(&inner, &task_key, id, result)
        });

        let abort = task.abort_handle();
        let superseded = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&superseded);
        let fetch = async move {
            match task.await {
                Ok(result) => result,
                Err(_) if flag.load(Ordering::SeqCst) => Err(SyncError::Superseded),
                Err(_) => Err(SyncError::Cancelled),
            }
        }
        .boxed()
        .shared();

        state.in_flight = Some(InFlight {
            id,
            fetch: fetch.clone(),
            abort,
            superseded,
        });
        PendingFetch {
            id,
            fetch,
            joined: false,
        }
    }

    /// Waits for `pending`. If a refresh superseded it, follows the key to
    /// whatever replaced it.
    pub async fn settle(&self, key: &CacheKey, pending: PendingFetch) -> Result<CreditSnapshot, SyncError> {
        let mut pending = pending;
        for _ in 0..MAX_REJOINS {
            let outcome = pending.fetch.clone().await;
            if outcome != Err(SyncError::Superseded) {
                return outcome;
            }
            debug!(key = %key, fetch = pending.id, "fetch superseded, re-reading");
            match self.begin_read(key) {
                ReadPlan::Fresh(snapshot) => return Ok(snapshot),
                ReadPlan::Backoff { remaining } => {
                    return Err(SyncError::BackingOff { retry_in: remaining })
                }
                ReadPlan::Fetch(next) => pending = next,
            }
        }
        Err(SyncError::Superseded)
    }

    /// One-shot read honoring cache, de-duplication and backoff.
    pub async fn read(&self, key: &CacheKey) -> Result<CreditSnapshot, SyncError> {
        let _watch = self.watch(key);
        match self.begin_read(key) {
            ReadPlan::Fresh(snapshot) => Ok(snapshot),
            ReadPlan::Backoff { remaining } => Err(SyncError::BackingOff { retry_in: remaining }),
            ReadPlan::Fetch(pending) => self.settle(key, pending).await,
        }
    }

    /// One-shot forced re-read.
    pub async fn refresh(&self, key: &CacheKey) -> Result<CreditSnapshot, SyncError> {
        let _watch = self.watch(key);
        let pending = self.begin_refresh(key);
        self.settle(key, pending).await
    }
}

/// Records a finished fetch. Runs inside the fetch task.
fn complete(
    inner: &StoreInner,
    key: &CacheKey,
    id: u64,
    result: Result<CreditSnapshot, SyncError>,
) -> Result<CreditSnapshot, SyncError> {
    let Some(slot) = inner.keys.get(key).map(|entry| Arc::clone(entry.value())) else {
        return result;
    };
    let mut state = slot.lock();

    if !state.in_flight.as_ref().is_some_and(|f| f.id == id) {
        // A refresh replaced us between the response and this lock.
        return Err(SyncError::Superseded);
    }
    state.in_flight = None;
    let now = Instant::now();

    match result {
        Ok(snapshot) => {
            let lost = state.last_good.is_some_and(|old| snapshot.lost_fields_of(&old));
            let merged = match &state.last_good {
                Some(old) => snapshot.merge_over(old),
                None => snapshot,
            };
            state.last_good = Some(merged);

            if !snapshot.partial {
                state.backoff.reset();
                state.cache = Some(CacheEntry {
                    value: merged,
                    expires_at: now + inner.config.cache_ttl,
                });
                debug!(key = %key, fetch = id, "fetch succeeded");
            } else if lost {
                bump(&inner.stats.fetch_failures);
                let delay = state.backoff.record_failure(now, &inner.config.backoff);
                warn!(
                    key = %key,
                    failures = state.backoff.consecutive_failures(),
                    retry_in_ms = delay.as_millis() as u64,
                    "known credit fields failed to read, backing off"
                );
            } else {
                debug!(key = %key, fetch = id, "fetch incomplete, not cached");
            }
            Ok(merged)
        }
        Err(err) => {
            bump(&inner.stats.fetch_failures);
            let delay = state.backoff.record_failure(now, &inner.config.backoff);
            warn!(
                key = %key,
                failures = state.backoff.consecutive_failures(),
                retry_in_ms = delay.as_millis() as u64,
                error = %err,
                "credit fetch failed, backing off"
            );
            Err(err)
        }
    }
}

/// Interest in one key. Dropping it releases the interest.
pub struct KeyWatch {
    store: CreditStateStore,
    key: CacheKey,
}

impl KeyWatch {
    pub fn key(&self) -> &CacheKey {
        &self.key
    }
}

impl Drop for KeyWatch {
    fn drop(&mut self) {
        self.store.release(&self.key);
    }
}
