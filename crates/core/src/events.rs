//! Session events and their subscription interface.
//!
//! The session runtime publishes [`SessionEvent`]s through an [`EventBus`].
//! Handlers are synchronous so they cannot stall the audio path on I/O, and
//! every call is isolated: an error or a panic in one handler is logged and
//! swallowed, the remaining handlers still run and the publisher never sees
//! the failure.

use crate::metrics::AgentMetrics;
use parking_lot::RwLock;
use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

/// Why a session stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    ParticipantLeft,
    InputEnded,
    Error(String),
}

/// What the agent is currently doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentActivity {
    Listening,
    Thinking,
    Speaking,
}

#[derive(Debug, Clone)]
pub enum SessionEvent {
    MetricsCollected(AgentMetrics),
    UserInputTranscribed { transcript: String, is_final: bool },
    AgentStateChanged(AgentActivity),
    Close(CloseReason),
}

/// Discriminant used to subscribe to one kind of event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    MetricsCollected,
    UserInputTranscribed,
    AgentStateChanged,
    Close,
}

impl SessionEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            SessionEvent::MetricsCollected(_) => EventKind::MetricsCollected,
            SessionEvent::UserInputTranscribed { .. } => EventKind::UserInputTranscribed,
            SessionEvent::AgentStateChanged(_) => EventKind::AgentStateChanged,
            SessionEvent::Close(_) => EventKind::Close,
        }
    }
}

pub type EventHandler = Arc<dyn Fn(&SessionEvent) -> anyhow::Result<()> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Publish/subscribe hub owned by a session runtime.
#[derive(Default)]
pub struct EventBus {
    handlers: RwLock<Vec<(SubscriptionId, EventKind, EventHandler)>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&SessionEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers.write().push((id, kind, Arc::new(handler)));
        id
    }

    /// Returns `false` if the subscription was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.write();
        let before = handlers.len();
        handlers.retain(|(sub, _, _)| *sub != id);
        handlers.len() != before
    }

    /// Delivers `event` to every handler subscribed to its kind.
    ///
    /// Returns the number of handlers that completed successfully.
    pub fn emit(&self, event: &SessionEvent) -> usize {
        let kind = event.kind();
        // Handlers run outside the lock so they may subscribe or unsubscribe.
        let matching: Vec<EventHandler> = self
            .handlers
            .read()
            .iter()
            .filter(|(_, k, _)| *k == kind)
            .map(|(_, _, h)| h.clone())
            .collect();

        let mut delivered = 0;
        for handler in matching {
            match catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => warn!(?kind, error = ?e, "Event handler failed"),
                Err(panic) => {
                    warn!(?kind, message = %panic_message(&panic), "Event handler panicked")
                }
            }
        }
        debug!(?kind, delivered, "Event emitted");
        delivered
    }

    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.handlers
            .read()
            .iter()
            .filter(|(_, k, _)| *k == kind)
            .count()
    }
}

fn panic_message(panic: &Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
