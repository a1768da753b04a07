//! Per-action pub/sub of execution events.
//!
//! A process-wide table maps action id to bounded subscriber queues. Publish
//! is non-blocking fan-out: a full queue drops the event with a warning and
//! never stalls the executor. The bus is not persisted; observers take a
//! store snapshot first and then tail (see [`crate::observe`]).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::warn;

use crate::model::Task;
use crate::types::{ActionStatus, LogLevel, EVENT_QUEUE_CAPACITY};

// ============================================================================
// EVENTS
// ============================================================================

/// Every event the core publishes, on the wire as `{"event": ..., "data": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum Event {
    /// Initial state delivered to a fresh observer before any tailed event.
    #[serde(rename = "snapshot")]
    Snapshot {
        action_id: String,
        status: ActionStatus,
        tasks: Vec<Task>,
    },
    #[serde(rename = "action.started")]
    ActionStarted { action_id: String },
    #[serde(rename = "action.completed")]
    ActionCompleted { action_id: String },
    #[serde(rename = "action.failed")]
    ActionFailed { action_id: String, reason: String },
    #[serde(rename = "action.retrying")]
    ActionRetrying {
        action_id: String,
        attempt: u32,
        max_attempts: u32,
    },
    #[serde(rename = "task.started")]
    TaskStarted { task_id: String, action_id: String },
    #[serde(rename = "task.completed")]
    TaskCompleted {
        task_id: String,
        output_summary: String,
    },
    #[serde(rename = "task.failed")]
    TaskFailed { task_id: String, error: String },
    #[serde(rename = "task.recovered")]
    TaskRecovered {
        action_id: String,
        original_task_id: String,
        original_agent_type: String,
        replacement_agent_types: Vec<String>,
    },
    #[serde(rename = "log.append")]
    LogAppend {
        task_id: String,
        level: LogLevel,
        message: String,
    },
    /// Keepalive emitted by observer streams after prolonged silence.
    #[serde(rename = "ping")]
    Ping,
}

impl Event {
    /// Wire name of this event.
    pub fn name(&self) -> &'static str {
        match self {
            Event::Snapshot { .. } => "snapshot",
            Event::ActionStarted { .. } => "action.started",
            Event::ActionCompleted { .. } => "action.completed",
            Event::ActionFailed { .. } => "action.failed",
            Event::ActionRetrying { .. } => "action.retrying",
            Event::TaskStarted { .. } => "task.started",
            Event::TaskCompleted { .. } => "task.completed",
            Event::TaskFailed { .. } => "task.failed",
            Event::TaskRecovered { .. } => "task.recovered",
            Event::LogAppend { .. } => "log.append",
            Event::Ping => "ping",
        }
    }

    /// Extract the task id if this is a task-scoped event.
    pub fn task_id(&self) -> Option<&str> {
        match self {
            Event::TaskStarted { task_id, .. }
            | Event::TaskCompleted { task_id, .. }
            | Event::TaskFailed { task_id, .. }
            | Event::LogAppend { task_id, .. } => Some(task_id),
            Event::TaskRecovered {
                original_task_id, ..
            } => Some(original_task_id),
            _ => None,
        }
    }

    /// True for the events that end an action run.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Event::ActionCompleted { .. } | Event::ActionFailed { .. }
        )
    }
}

// ============================================================================
// BUS
// ============================================================================

type SubscriberTable = HashMap<String, Vec<(u64, mpsc::Sender<Event>)>>;

/// Process-wide event fan-out, cheap to clone.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

#[derive(Default)]
struct BusInner {
    subscribers: RwLock<SubscriberTable>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new bounded queue for `action_id`. Dropping the returned
    /// subscription unsubscribes it.
    pub fn subscribe(&self, action_id: &str) -> Subscription {
        let (tx, rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .subscribers
            .write()
            .entry(action_id.to_string())
            .or_default()
            .push((id, tx));
        Subscription {
            bus: self.clone(),
            action_id: action_id.to_string(),
            id,
            rx,
        }
    }

    /// Fan an event out to every queue registered for `action_id`.
    /// Never blocks and never fails: a full queue drops the event.
    pub fn publish(&self, action_id: &str, event: Event) {
        let table = self.inner.subscribers.read();
        let Some(queues) = table.get(action_id) else {
            return;
        };
        for (_, tx) in queues {
            match tx.try_send(event.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(dropped)) => {
                    warn!(
                        action_id,
                        event = dropped.name(),
                        "subscriber queue full, dropping event"
                    );
                }
                // Receiver gone; the Drop impl will clean the entry up.
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }
    }

    fn unsubscribe(&self, action_id: &str, id: u64) {
        let mut table = self.inner.subscribers.write();
        if let Some(queues) = table.get_mut(action_id) {
            queues.retain(|(qid, _)| *qid != id);
            if queues.is_empty() {
                table.remove(action_id);
            }
        }
    }

    /// Number of live subscribers for an action.
    pub fn subscriber_count(&self, action_id: &str) -> usize {
        self.inner
            .subscribers
            .read()
            .get(action_id)
            .map_or(0, Vec::len)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("actions", &self.inner.subscribers.read().len())
            .finish()
    }
}

/// Single-consumer handle to one subscriber queue.
pub struct Subscription {
    bus: EventBus,
    action_id: String,
    id: u64,
    rx: mpsc::Receiver<Event>,
}

impl Subscription {
    /// Await the next event.
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    /// Pop an already-queued event without waiting.
    pub fn try_recv(&mut self) -> Option<Event> {
        self.rx.try_recv().ok()
    }

    pub fn action_id(&self) -> &str {
        &self.action_id
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.bus.unsubscribe(&self.action_id, self.id);
    }
}
