//! Counter store test double shared by the unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::{LimiterError, Result};
use crate::store::{ConsumeOutcome, CounterStore};

/// Replays queued outcomes, then repeats `fallback` if one is set.
#[derive(Default)]
pub(crate) struct ScriptedStore {
    outcomes: Mutex<VecDeque<ConsumeOutcome>>,
    fallback: Option<ConsumeOutcome>,
    failing: AtomicBool,
    delay: Option<Duration>,
    calls: AtomicUsize,
    completed: AtomicUsize,
}

impl ScriptedStore {
    pub(crate) fn new(outcomes: Vec<ConsumeOutcome>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into()),
            ..Default::default()
        }
    }

    pub(crate) fn repeating(outcome: ConsumeOutcome) -> Self {
        Self {
            fallback: Some(outcome),
            ..Default::default()
        }
    }

    pub(crate) fn failing() -> Self {
        let store = Self::default();
        store.failing.store(true, Ordering::SeqCst);
        store
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of `consume` calls started.
    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Number of `consume` calls that ran to completion.
    pub(crate) fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CounterStore for ScriptedStore {
    async fn consume(&self, _key: &str) -> Result<ConsumeOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.completed.fetch_add(1, Ordering::SeqCst);

        if self.failing.load(Ordering::SeqCst) {
            return Err(LimiterError::RemoteStore("connection refused".to_string()));
        }
        let next = self.outcomes.lock().pop_front();
        next.or(self.fallback)
            .ok_or_else(|| LimiterError::RemoteStore("no scripted outcome left".to_string()))
    }
}

pub(crate) fn allowed(remaining: u64, reset_at: u64) -> ConsumeOutcome {
    ConsumeOutcome {
        success: true,
        remaining,
        reset_at,
    }
}

pub(crate) fn denied(reset_at: u64) -> ConsumeOutcome {
    ConsumeOutcome {
        success: false,
        remaining: 0,
        reset_at,
    }
}
