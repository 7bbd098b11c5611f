//! Event bus for broadcasting events to subscribers.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, trace, warn};

use crate::event::NodeHostEvent;

/// Default channel capacity for the event bus.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Event bus for broadcasting events to all subscribers.
///
/// Clones share the same underlying channel, so a clone handed to a
/// registry publishes to the same receivers as the original.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Arc<NodeHostEvent>>,
    capacity: usize,
}

impl EventBus {
    /// Create a new event bus with default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a new event bus with specified capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender, capacity }
    }

    /// Publish an event to all subscribers.
    ///
    /// Returns the number of receivers that received the event.
    pub fn publish(&self, event: NodeHostEvent) -> usize {
        let event = Arc::new(event);

        trace!(event_type = %event.event_type(), "Publishing event");

        if let Ok(count) = self.sender.send(Arc::clone(&event)) {
            debug!(
                event_type = %event.event_type(),
                receiver_count = count,
                "Event published"
            );
            count
        } else {
            trace!(event_type = %event.event_type(), "No receivers for event");
            0
        }
    }

    /// Subscribe to all events.
    #[must_use]
    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver::new(self.sender.subscribe(), None)
    }

    /// Subscribe to events of a single type (e.g. `security_violation`).
    #[must_use]
    pub fn subscribe_type(&self, event_type: &'static str) -> EventReceiver {
        EventReceiver::new(self.sender.subscribe(), Some(event_type))
    }

    /// Number of active receivers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Get the channel capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiver for events from the event bus.
pub struct EventReceiver {
    receiver: broadcast::Receiver<Arc<NodeHostEvent>>,
    event_type: Option<&'static str>,
}

impl EventReceiver {
    fn new(
        receiver: broadcast::Receiver<Arc<NodeHostEvent>>,
        event_type: Option<&'static str>,
    ) -> Self {
        Self {
            receiver,
            event_type,
        }
    }

    fn matches(&self, event: &NodeHostEvent) -> bool {
        self.event_type.is_none_or(|t| t == event.event_type())
    }

    /// Receive the next event.
    ///
    /// Lagged events are skipped with a warning. Returns `None` once the
    /// bus and all its clones are dropped.
    pub async fn recv(&mut self) -> Option<Arc<NodeHostEvent>> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if self.matches(&event) {
                        return Some(event);
                    }
                },
                Err(broadcast::error::RecvError::Lagged(count)) => {
                    warn!(skipped = count, "Event receiver lagged, events dropped");
                },
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Try to receive the next event without blocking.
    pub fn try_recv(&mut self) -> Option<Arc<NodeHostEvent>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.matches(&event) {
                        return Some(event);
                    }
                },
                Err(broadcast::error::TryRecvError::Lagged(count)) => {
                    warn!(skipped = count, "Event receiver lagged, events dropped");
                },
                Err(
                    broadcast::error::TryRecvError::Empty | broadcast::error::TryRecvError::Closed,
                ) => return None,
            }
        }
    }

    /// Drain every event currently buffered.
    pub fn drain(&mut self) -> Vec<Arc<NodeHostEvent>> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}
