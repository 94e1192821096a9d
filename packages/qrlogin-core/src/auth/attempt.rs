//! State of one login attempt, shared between the task driving it and
//! whoever holds its handle.

use super::credential::Credential;
use crate::error::FailureCause;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

static NEXT_ATTEMPT_ID: AtomicU64 = AtomicU64::new(1);

/// Where a login attempt currently stands.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptState {
    Idle,
    TokenIssued,
    Polling,
    Succeeded(Credential),
    Failed(FailureCause),
    Cancelled,
}

impl AttemptState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AttemptState::Succeeded(_) | AttemptState::Failed(_) | AttemptState::Cancelled
        )
    }

    /// Allowed transitions. Success is only reachable from `Polling`, so an
    /// attempt always goes through a token and at least one poll cycle.
    fn can_advance_to(&self, next: &AttemptState) -> bool {
        match (self, next) {
            (from, _) if from.is_terminal() => false,
            (AttemptState::Idle, AttemptState::TokenIssued) => true,
            (AttemptState::TokenIssued, AttemptState::Polling) => true,
            (AttemptState::Polling, AttemptState::Succeeded(_)) => true,
            (_, AttemptState::Failed(_) | AttemptState::Cancelled) => true,
            _ => false,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            AttemptState::Idle => "idle",
            AttemptState::TokenIssued => "token_issued",
            AttemptState::Polling => "polling",
            AttemptState::Succeeded(_) => "succeeded",
            AttemptState::Failed(_) => "failed",
            AttemptState::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug)]
struct AttemptInner {
    state: AttemptState,
    cancel_requested: bool,
    /// The terminal outcome has been handed to the observer
    reported: bool,
}

#[derive(Debug)]
struct Shared {
    id: u64,
    inner: Mutex<AttemptInner>,
    changed: Notify,
}

/// Handle to one login attempt.
///
/// Cloning is cheap; all clones observe the same attempt. The state and the
/// cancellation flag sit behind a single lock.
#[derive(Debug, Clone)]
pub struct AttemptHandle {
    shared: Arc<Shared>,
}

impl AttemptHandle {
    pub(crate) fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                id: NEXT_ATTEMPT_ID.fetch_add(1, Ordering::Relaxed),
                inner: Mutex::new(AttemptInner {
                    state: AttemptState::Idle,
                    cancel_requested: false,
                    reported: false,
                }),
                changed: Notify::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, AttemptInner> {
        self.shared
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn state(&self) -> AttemptState {
        self.lock().state.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.lock().cancel_requested
    }

    /// Request cooperative cancellation.
    ///
    /// Returns false when the attempt had already finished or its outcome
    /// was already reported.
    pub fn cancel(&self) -> bool {
        let live = {
            let mut inner = self.lock();
            if inner.state.is_terminal() || inner.reported {
                false
            } else {
                inner.cancel_requested = true;
                true
            }
        };
        if live {
            tracing::debug!("Cancellation requested for attempt {}", self.id());
            self.shared.changed.notify_waiters();
        }
        live
    }

    /// Resolves once cancellation has been requested.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.shared.changed.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }

    /// Wait for the attempt to reach a terminal state and return it.
    pub async fn finished(&self) -> AttemptState {
        loop {
            let notified = self.shared.changed.notified();
            let state = self.state();
            if state.is_terminal() {
                return state;
            }
            notified.await;
        }
    }

    /// Record that the outcome is about to be reported; later cancels are
    /// refused.
    pub(crate) fn mark_reported(&self) {
        self.lock().reported = true;
    }

    /// Move the attempt to `next`. Refuses transitions out of a terminal
    /// state and any shortcut to success.
    pub(crate) fn advance(&self, next: AttemptState) -> bool {
        let moved = {
            let mut inner = self.lock();
            if inner.state.can_advance_to(&next) {
                tracing::debug!(
                    "Attempt {}: {} -> {}",
                    self.shared.id,
                    inner.state.name(),
                    next.name()
                );
                inner.state = next;
                true
            } else {
                tracing::warn!(
                    "Attempt {}: refusing transition {} -> {}",
                    self.shared.id,
                    inner.state.name(),
                    next.name()
                );
                false
            }
        };
        if moved {
            self.shared.changed.notify_waiters();
        }
        moved
    }
}
