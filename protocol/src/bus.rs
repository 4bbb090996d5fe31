//! # Refresh Bus
//!
//! A process-wide "something changed on-chain, go look" signal. Whoever
//! submits a state-changing transaction publishes once it is confirmed;
//! every feed showing the affected subject refreshes.
//!
//! ```text
//!   borrow confirmed ──publish("borrow", Some(owner))──► RefreshBus
//!                                                         │ snapshot of handlers
//!                                    ┌────────────────────┼──────────────────┐
//!                                    ▼                    ▼                  ▼
//!                              feed(owner)          feed(other)        feed(owner)
//!                              refresh              ignore             refresh
//! ```
//!
//! Dispatch is synchronous, unqueued, and only reaches handlers registered
//! at publish time. Events carry a reason and an optional owner, never data.
//! Handlers run on a snapshot of the subscriber list, so a handler may
//! subscribe or unsubscribe without deadlocking the bus.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::sync::snapshot::Subject;

/// One published signal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RefreshEvent {
    /// Correlates the publish with the refreshes it causes in the logs.
    pub id: Uuid,
    pub reason: String,
    /// Subject hint. `None` addresses everyone.
    pub owner: Option<String>,
    pub published_at: DateTime<Utc>,
}

impl RefreshEvent {
    fn new(reason: &str, owner: Option<&str>) -> Self {
        Self {
            id: Uuid::new_v4(),
            reason: reason.to_string(),
            owner: owner.map(str::to_string),
            published_at: Utc::now(),
        }
    }

    /// Whether a feed bound to `subject` should react.
    pub fn concerns(&self, subject: &Subject) -> bool {
        match self.owner.as_deref() {
            None => true,
            Some(owner) => subject.matches(owner),
        }
    }
}

type Handler = Arc<dyn Fn(&RefreshEvent) + Send + Sync>;

#[derive(Default)]
struct BusInner {
    next_id: AtomicU64,
    handlers: RwLock<Vec<(u64, Handler)>>,
    published: AtomicU64,
}

/// Publish/subscribe hub. Clones share the same subscriber list.
#[derive(Clone, Default)]
pub struct RefreshBus {
    inner: Arc<BusInner>,
}

impl RefreshBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` until the returned [`Subscription`] is dropped.
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&RefreshEvent) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.handlers.write().push((id, Arc::new(handler)));
        Subscription {
            bus: Arc::downgrade(&self.inner),
            id,
        }
    }

    /// Delivers an event to every current subscriber and returns how many
    /// were invoked.
    pub fn publish(&self, reason: &str, owner: Option<&str>) -> usize {
        let event = RefreshEvent::new(reason, owner);
        let handlers: Vec<Handler> = self
            .inner
            .handlers
            .read()
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect();

        self.inner.published.fetch_add(1, Ordering::Relaxed);
        debug!(
            event = %event.id,
            reason = %event.reason,
            owner = event.owner.as_deref().unwrap_or("*"),
            handlers = handlers.len(),
            "refresh event published"
        );

        for handler in &handlers {
            handler(&event);
        }
        handlers.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.handlers.read().len()
    }

    /// Events published since construction.
    pub fn published(&self) -> u64 {
        self.inner.published.load(Ordering::Relaxed)
    }
}

/// Keeps a handler registered. Dropping it unsubscribes.
pub struct Subscription {
    bus: Weak<BusInner>,
    id: u64,
}

impl Subscription {
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.handlers.write().retain(|(id, _)| *id != self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn publish_reaches_current_subscribers() {
        let bus = RefreshBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let s = seen.clone();
        let _sub = bus.subscribe(move |event| s.lock().push(event.reason.clone()));

        assert_eq!(bus.publish("borrow", Some("0xabc")), 1);
        assert_eq!(bus.publish("repay", None), 1);
        assert_eq!(*seen.lock(), vec!["borrow".to_string(), "repay".to_string()]);
        assert_eq!(bus.published(), 2);
    }

    #[test]
    fn no_delivery_to_late_subscribers() {
        let bus = RefreshBus::new();
        assert_eq!(bus.publish("early", None), 0);

        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let _sub = bus.subscribe(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn dropping_subscription_unsubscribes() {
        let bus = RefreshBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let sub = bus.subscribe(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(bus.subscriber_count(), 1);

        sub.unsubscribe();
        assert_eq!(bus.subscriber_count(), 0);
        assert_eq!(bus.publish("x", None), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn handler_may_subscribe_reentrantly() {
        let bus = RefreshBus::new();
        let nested: Arc<Mutex<Vec<Subscription>>> = Arc::new(Mutex::new(Vec::new()));

        let b = bus.clone();
        let n = nested.clone();
        let _sub = bus.subscribe(move |_| {
            n.lock().push(b.subscribe(|_| {}));
        });

        assert_eq!(bus.publish("first", None), 1);
        assert_eq!(bus.subscriber_count(), 2);
        assert_eq!(bus.publish("second", None), 2);
    }

    #[test]
    fn event_addressing() {
        let subject = Subject::parse("0xAbC").unwrap();
        assert!(RefreshEvent::new("r", None).concerns(&subject));
        assert!(RefreshEvent::new("r", Some("0xabc")).concerns(&subject));
        assert!(!RefreshEvent::new("r", Some("0xdef")).concerns(&subject));
    }

    #[test]
    fn events_get_distinct_ids() {
        let bus = RefreshBus::new();
        let ids = Arc::new(Mutex::new(Vec::new()));
        let i = ids.clone();
        let _sub = bus.subscribe(move |event| i.lock().push(event.id));

        bus.publish("a", None);
        bus.publish("b", None);
        let ids = ids.lock();
        assert_ne!(ids[0], ids[1]);
    }
}
