//! In-memory [`CreditSource`] for store and feed tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Semaphore;

use crate::sync::snapshot::{CreditSnapshot, Subject};
use crate::sync::source::CreditSource;
use crate::sync::SyncError;
use crate::view::{CandidateError, ViewError};

/// Answers per subject, optionally holding every fetch until a permit is
/// released on the gate.
#[derive(Default)]
pub(crate) struct ScriptedSource {
    answers: Mutex<HashMap<String, Result<CreditSnapshot, SyncError>>>,
    calls: AtomicUsize,
    gate: Mutex<Option<Arc<Semaphore>>>,
}

impl ScriptedSource {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn answer(&self, subject: &str, limit: u128, usage: u128, score: u8) {
        self.set(subject, Ok(CreditSnapshot::new(Some(limit), Some(usage), Some(score))));
    }

    pub(crate) fn set(&self, subject: &str, answer: Result<CreditSnapshot, SyncError>) {
        self.answers.lock().insert(subject.to_lowercase(), answer);
    }

    pub(crate) fn fail(&self, subject: &str) {
        self.set(subject, Err(down()));
    }

    /// From now on every fetch waits for a permit.
    pub(crate) fn hold(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.gate.lock() = Some(gate.clone());
        gate
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

pub(crate) fn down() -> SyncError {
    SyncError::View {
        field: "limit",
        source: CandidateError {
            attempts: vec![(
                "0xcafe::pool::credit_limit".to_string(),
                ViewError::Transport("connection refused".to_string()),
            )],
        },
    }
}

#[async_trait]
impl CreditSource for ScriptedSource {
    async fn fetch(&self, subject: &Subject, _asset_type: &str) -> Result<CreditSnapshot, SyncError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.gate.lock().clone();
        if let Some(gate) = gate {
            gate.acquire().await.expect("gate closed").forget();
        }
        self.answers
            .lock()
            .get(subject.as_str())
            .cloned()
            .unwrap_or_else(|| Err(down()))
            .map(|snap| CreditSnapshot::new(snap.limit, snap.usage, snap.score))
    }
}

/// Lets spawned tasks run to their next suspension point.
pub(crate) async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}
