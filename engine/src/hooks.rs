//! Transition listeners.
//!
//! Listeners run inline on the task that committed the transition, after the
//! durable write. Each call is isolated: an error or a panic in one listener
//! is logged and counted, and the remaining listeners still run.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use momentum_core::{MomentumCycle, MomentumError, MomentumEvent, MomentumState};
use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

/// A committed transition, as seen by listeners.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateChange {
    pub user_id: Uuid,
    pub from: MomentumState,
    pub to: MomentumState,
    pub event: MomentumEvent,
    pub at: DateTime<Utc>,
    /// Cycle as persisted after this transition
    pub cycle: MomentumCycle,
}

pub trait StateListener: Send + Sync {
    fn name(&self) -> &str;

    fn on_transition(&self, change: &StateChange) -> Result<(), MomentumError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub fn value(self) -> u64 {
        self.0
    }
}

struct FnListener<F> {
    name: String,
    f: F,
}

impl<F> StateListener for FnListener<F>
where
    F: Fn(&StateChange) -> Result<(), MomentumError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn on_transition(&self, change: &StateChange) -> Result<(), MomentumError> {
        (self.f)(change)
    }
}

/// Forwards every change into a bounded channel without blocking.
/// A full or closed channel is reported as a hook failure.
pub struct ChannelListener {
    name: String,
    sender: mpsc::Sender<StateChange>,
}

impl ChannelListener {
    pub fn new(name: impl Into<String>, capacity: usize) -> (Self, mpsc::Receiver<StateChange>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (
            Self {
                name: name.into(),
                sender,
            },
            receiver,
        )
    }
}

impl StateListener for ChannelListener {
    fn name(&self) -> &str {
        &self.name
    }

    fn on_transition(&self, change: &StateChange) -> Result<(), MomentumError> {
        self.sender
            .try_send(change.clone())
            .map_err(|err| MomentumError::HookFailure {
                listener: self.name.clone(),
                message: err.to_string(),
            })
    }
}

#[derive(Default)]
struct Listeners {
    next_id: u64,
    entries: Vec<(SubscriptionId, Arc<dyn StateListener>)>,
}

#[derive(Default)]
pub struct HookRegistry {
    listeners: RwLock<Listeners>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, listener: Arc<dyn StateListener>) -> SubscriptionId {
        let mut listeners = self.listeners.write().unwrap_or_else(|e| e.into_inner());
        listeners.next_id += 1;
        let id = SubscriptionId(listeners.next_id);
        listeners.entries.push((id, listener));
        id
    }

    pub fn subscribe_fn<F>(&self, name: impl Into<String>, f: F) -> SubscriptionId
    where
        F: Fn(&StateChange) -> Result<(), MomentumError> + Send + Sync + 'static,
    {
        self.subscribe(Arc::new(FnListener {
            name: name.into(),
            f,
        }))
    }

    /// Returns false when the subscription was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners.write().unwrap_or_else(|e| e.into_inner());
        let before = listeners.entries.len();
        listeners.entries.retain(|(entry_id, _)| *entry_id != id);
        listeners.entries.len() != before
    }

    pub fn len(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .entries
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Call every listener in subscription order and return the failures.
    pub fn notify(&self, change: &StateChange) -> Vec<MomentumError> {
        // Snapshot the list so listeners may (un)subscribe from inside a callback.
        let entries: Vec<Arc<dyn StateListener>> = self
            .listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .entries
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();

        let mut failures = Vec::new();
        for listener in entries {
            let outcome = catch_unwind(AssertUnwindSafe(|| listener.on_transition(change)));
            let failure = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(err)) => err,
                Err(panic) => MomentumError::HookFailure {
                    listener: listener.name().to_string(),
                    message: panic_message(panic.as_ref()),
                },
            };
            tracing::warn!(
                error = %failure,
                listener = listener.name(),
                user_id = %change.user_id,
                from = change.from.as_str(),
                to = change.to.as_str(),
                "state listener failed"
            );
            failures.push(failure);
        }
        failures
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "listener panicked".to_string()
    }
}
