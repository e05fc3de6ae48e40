//! Event system for session lifecycle and state notifications.
//!
//! The connection manager and sessions publish events here; the hub bridge
//! (and tests) subscribe to republish availability and state.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::types::LightState;

/// Event kinds, used for filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connected,
    Disconnected,
    Failed,
    StateChanged,
}

/// Event types that can be dispatched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Session reached `Ready`.
    Connected { device_id: String },
    /// A ready session lost its link.
    Disconnected { device_id: String },
    /// Connection attempts for the device were exhausted.
    Failed { device_id: String, reason: String },
    /// The device's last known state changed.
    StateChanged {
        device_id: String,
        state: LightState,
    },
}

impl Event {
    /// Returns the kind of this event.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::Connected { .. } => EventKind::Connected,
            Self::Disconnected { .. } => EventKind::Disconnected,
            Self::Failed { .. } => EventKind::Failed,
            Self::StateChanged { .. } => EventKind::StateChanged,
        }
    }

    /// Returns the device this event concerns.
    #[must_use]
    pub fn device_id(&self) -> &str {
        match self {
            Self::Connected { device_id }
            | Self::Disconnected { device_id }
            | Self::Failed { device_id, .. }
            | Self::StateChanged { device_id, .. } => device_id,
        }
    }
}

/// A subscription to events.
pub struct Subscription {
    receiver: broadcast::Receiver<Event>,
}

impl Subscription {
    /// Receives the next event, skipping over any the subscriber lagged
    /// behind on. Returns `None` once the dispatcher is gone.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!("event subscriber lagged, skipped {skipped} events");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Subscription filter for specific events.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Filter by event kinds.
    pub kinds: Option<Vec<EventKind>>,
    /// Filter by device id.
    pub device_id: Option<String>,
}

impl EventFilter {
    /// Creates a filter for specific event kinds.
    #[must_use]
    pub const fn kinds(kinds: Vec<EventKind>) -> Self {
        Self {
            kinds: Some(kinds),
            device_id: None,
        }
    }

    /// Restricts the filter to one device.
    #[must_use]
    pub fn device(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }

    /// Checks if an event matches this filter.
    #[must_use]
    pub fn matches(&self, event: &Event) -> bool {
        if let Some(ref kinds) = self.kinds {
            if !kinds.contains(&event.kind()) {
                return false;
            }
        }

        if let Some(ref device_id) = self.device_id {
            if event.device_id() != device_id {
                return false;
            }
        }

        true
    }
}

struct EventDispatcherInner {
    sender: broadcast::Sender<Event>,
}

/// Dispatches events to subscribers.
#[derive(Clone)]
pub struct EventDispatcher {
    inner: Arc<EventDispatcherInner>,
}

impl EventDispatcher {
    /// Creates a new event dispatcher.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            inner: Arc::new(EventDispatcherInner { sender }),
        }
    }

    /// Dispatches an event to all subscribers.
    pub fn dispatch(&self, event: Event) {
        tracing::trace!(device = event.device_id(), kind = ?event.kind(), "dispatch");
        // No receivers is fine
        let _ = self.inner.sender.send(event);
    }

    /// Subscribes to all events.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        Subscription {
            receiver: self.inner.sender.subscribe(),
        }
    }

    /// Waits for an event matching the filter with timeout.
    ///
    /// Returns `None` if the timeout expires or the channel is closed.
    pub async fn wait_for(&self, filter: EventFilter, timeout: Duration) -> Option<Event> {
        let mut subscription = self.subscribe();

        tokio::select! {
            biased;
            result = async {
                while let Some(event) = subscription.recv().await {
                    if filter.matches(&event) {
                        return Some(event);
                    }
                }
                None
            } => result,
            () = tokio::time::sleep(timeout) => None,
        }
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connected(id: &str) -> Event {
        Event::Connected {
            device_id: id.into(),
        }
    }

    #[tokio::test]
    async fn test_event_dispatch() {
        let dispatcher = EventDispatcher::new(16);
        let mut sub = dispatcher.subscribe();

        dispatcher.dispatch(connected("desk"));

        let event = tokio::time::timeout(Duration::from_millis(100), sub.recv())
            .await
            .unwrap();

        assert_eq!(event, Some(connected("desk")));
    }

    #[test]
    fn test_event_filter_kinds() {
        let filter = EventFilter::kinds(vec![EventKind::Connected, EventKind::Failed]);

        assert!(filter.matches(&connected("desk")));
        assert!(filter.matches(&Event::Failed {
            device_id: "desk".into(),
            reason: "gone".into(),
        }));
        assert!(!filter.matches(&Event::Disconnected {
            device_id: "desk".into()
        }));
    }

    #[test]
    fn test_event_filter_device() {
        let filter = EventFilter::default().device("desk");

        assert!(filter.matches(&connected("desk")));
        assert!(!filter.matches(&connected("shelf")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_times_out() {
        let dispatcher = EventDispatcher::new(16);
        let waiter = dispatcher.wait_for(
            EventFilter::kinds(vec![EventKind::Failed]),
            Duration::from_secs(1),
        );

        dispatcher.dispatch(connected("desk"));
        assert_eq!(waiter.await, None);
    }
}
