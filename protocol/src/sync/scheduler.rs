//! Cancellable one-shot timers.
//!
//! Feeds and the reserve monitor never call `tokio::spawn` + `sleep`
//! directly. They go through [`Scheduler`], which keeps timing injectable,
//! and through [`TimerSlot`], which enforces "at most one pending timer per
//! owner".
//!
//! A timer that fires and reschedules itself from inside its own task is the
//! normal steady-poll pattern. The slot handles this with ids: the firing
//! task calls [`TimerSlot::fired`] first, which forgets the entry without
//! aborting it, so the subsequent `arm` does not kill the task that is
//! calling it.

use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;

/// Runs a task once after a delay.
pub trait Scheduler: Send + Sync {
    /// Schedules `task` to run after `delay` and returns a handle that can
    /// cancel it before (or while) it runs.
    fn schedule_after(&self, delay: Duration, task: BoxFuture<'static, ()>) -> TimerHandle;
}

/// Cancellation handle for a scheduled task.
///
/// Dropping the handle detaches the task; only [`TimerHandle::cancel`]
/// stops it.
pub struct TimerHandle {
    abort: Option<AbortHandle>,
}

impl TimerHandle {
    /// Wraps a Tokio abort handle.
    pub fn from_abort(abort: AbortHandle) -> Self {
        Self { abort: Some(abort) }
    }

    /// A handle that cancels nothing.
    pub fn detached() -> Self {
        Self { abort: None }
    }

    /// Cancels the task. No-op if it already finished.
    pub fn cancel(self) {
        if let Some(abort) = self.abort {
            abort.abort();
        }
    }
}

impl std::fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerHandle")
            .field("cancellable", &self.abort.is_some())
            .finish()
    }
}

/// [`Scheduler`] backed by a Tokio runtime. Honors paused test time.
#[derive(Debug, Clone)]
pub struct TokioScheduler {
    handle: Handle,
}

impl TokioScheduler {
    /// Binds to an explicit runtime.
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Binds to the runtime we are running inside of.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime, like
    /// [`Handle::current`].
    pub fn current() -> Self {
        Self::new(Handle::current())
    }
}

impl Scheduler for TokioScheduler {
    fn schedule_after(&self, delay: Duration, task: BoxFuture<'static, ()>) -> TimerHandle {
        let join = self.handle.spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            task.await;
        });
        TimerHandle::from_abort(join.abort_handle())
    }
}

// ---------------------------------------------------------------------------
// TimerSlot
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct SlotInner {
    next_id: u64,
    current: Option<(u64, TimerHandle)>,
}

/// Holds at most one pending timer.
#[derive(Debug, Default)]
pub struct TimerSlot {
    inner: Mutex<SlotInner>,
}

impl TimerSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels whatever is pending and schedules a new timer. `make_task`
    /// receives the new timer's id, which the task should hand to
    /// [`TimerSlot::fired`] when it starts running.
    pub fn arm<F>(&self, scheduler: &dyn Scheduler, delay: Duration, make_task: F) -> u64
    where
        F: FnOnce(u64) -> BoxFuture<'static, ()>,
    {
        let mut inner = self.inner.lock();
        if let Some((_, previous)) = inner.current.take() {
            previous.cancel();
        }
        inner.next_id += 1;
        let id = inner.next_id;
        let handle = scheduler.schedule_after(delay, make_task(id));
        inner.current = Some((id, handle));
        id
    }

    /// Marks timer `id` as fired. Returns `false` if the slot has since been
    /// re-armed or disarmed, in which case the caller should do nothing.
    pub fn fired(&self, id: u64) -> bool {
        let mut inner = self.inner.lock();
        match inner.current {
            Some((current, _)) if current == id => {
                inner.current = None;
                true
            }
            _ => false,
        }
    }

    /// Cancels the pending timer, if any.
    pub fn disarm(&self) {
        if let Some((_, handle)) = self.inner.lock().current.take() {
            handle.cancel();
        }
    }

    /// Whether a timer is pending.
    pub fn is_armed(&self) -> bool {
        self.inner.lock().current.is_some()
    }
}
