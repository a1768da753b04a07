//! Observer streams: snapshot first, then the live event tail.
//!
//! The bus is never persisted, so a fresh observer subscribes before
//! reading the store snapshot — events raced during the read are queued
//! behind the snapshot, keeping the projection consistent. A ping is
//! emitted after prolonged silence so transports can keep connections
//! alive; dropping the observer unsubscribes.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, Stream};

use crate::event_bus::{Event, EventBus, Subscription};
use crate::store::{Store, StoreError};
use crate::types::OBSERVER_KEEPALIVE;

/// Per-action event consumer with snapshot-then-tail semantics.
pub struct Observer {
    subscription: Subscription,
    pending_snapshot: Option<Event>,
    keepalive: Duration,
}

impl Observer {
    pub(crate) async fn new(
        store: &Arc<dyn Store>,
        bus: &EventBus,
        action_id: &str,
    ) -> Result<Self, StoreError> {
        // Subscribe before snapshotting so nothing falls in the gap.
        let subscription = bus.subscribe(action_id);
        let action = store.action(action_id).await?;
        let tasks = store.tasks_for_action(action_id).await?;
        Ok(Self {
            subscription,
            pending_snapshot: Some(Event::Snapshot {
                action_id: action_id.to_string(),
                status: action.status,
                tasks,
            }),
            keepalive: OBSERVER_KEEPALIVE,
        })
    }

    /// Override the keepalive interval (tests use short ones).
    pub fn with_keepalive(mut self, keepalive: Duration) -> Self {
        self.keepalive = keepalive;
        self
    }

    /// Next event: the snapshot on first call, then tailed events, with a
    /// [`Event::Ping`] after `keepalive` of silence. `None` once the bus
    /// side is gone.
    pub async fn next(&mut self) -> Option<Event> {
        if let Some(snapshot) = self.pending_snapshot.take() {
            return Some(snapshot);
        }
        match tokio::time::timeout(self.keepalive, self.subscription.recv()).await {
            Ok(event) => event,
            Err(_) => Some(Event::Ping),
        }
    }

    /// Adapt to a `Stream` for transport layers.
    pub fn into_stream(self) -> impl Stream<Item = Event> + Send {
        stream::unfold(self, |mut observer| async move {
            observer.next().await.map(|event| (event, observer))
        })
    }
}
