//! Glue between device sessions and the hub's message bus.
//!
//! Commands arrive on `{prefix}/{device}/set`; state goes out retained on
//! `{prefix}/{device}/state` and availability on
//! `{prefix}/{device}/availability`.

pub mod line;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::event::Event;
use crate::hub::{HubCommand, HubState};
use crate::manager::ConnectionManager;
use crate::session::ConnectionState;
use crate::transport::Radio;

pub use line::LineBus;

/// Default topic prefix.
pub const DEFAULT_TOPIC_PREFIX: &str = "lightbridge";

/// Boxed future returned by bus operations.
pub type BusFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A message received from the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Delivery options for a publish.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishOptions {
    pub retain: bool,
    pub qos: u8,
}

impl PublishOptions {
    /// Retained, at-least-once.
    pub const RETAINED: Self = Self {
        retain: true,
        qos: 1,
    };
}

/// The hub's message bus.
pub trait Bus: Send + Sync + 'static {
    /// Subscribes to a topic pattern (`+` matches one level, `#` the rest).
    fn subscribe<'a>(&'a self, pattern: &'a str)
    -> BusFuture<'a, Result<mpsc::Receiver<BusMessage>>>;

    /// Publishes a payload.
    fn publish<'a>(
        &'a self,
        topic: &'a str,
        payload: &'a [u8],
        options: PublishOptions,
    ) -> BusFuture<'a, Result<()>>;
}

/// Returns true if `topic` matches the wildcard `pattern`.
#[must_use]
pub fn topic_matches(pattern: &str, topic: &str) -> bool {
    let mut pattern = pattern.split('/');
    let mut topic = topic.split('/');
    loop {
        match (pattern.next(), topic.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(p), Some(t)) if p == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// Topic layout under one prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    prefix: String,
}

impl Topics {
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Pattern matching every device's command topic.
    #[must_use]
    pub fn command_pattern(&self) -> String {
        format!("{}/+/set", self.prefix)
    }

    #[must_use]
    pub fn command(&self, device_id: &str) -> String {
        format!("{}/{device_id}/set", self.prefix)
    }

    #[must_use]
    pub fn state(&self, device_id: &str) -> String {
        format!("{}/{device_id}/state", self.prefix)
    }

    #[must_use]
    pub fn availability(&self, device_id: &str) -> String {
        format!("{}/{device_id}/availability", self.prefix)
    }

    /// Extracts the device id from a command topic.
    #[must_use]
    pub fn device_of_command<'a>(&self, topic: &'a str) -> Option<&'a str> {
        topic
            .strip_prefix(self.prefix.as_str())?
            .strip_prefix('/')?
            .strip_suffix("/set")
            .filter(|id| !id.is_empty() && !id.contains('/'))
    }
}

impl Default for Topics {
    fn default() -> Self {
        Self::new(DEFAULT_TOPIC_PREFIX)
    }
}

/// Routes hub commands to sessions and publishes device state.
pub struct HubBridge<R: Radio, B: Bus> {
    manager: Arc<ConnectionManager<R>>,
    bus: Arc<B>,
    topics: Topics,
    poll_interval: Duration,
}

impl<R: Radio, B: Bus> HubBridge<R, B> {
    #[must_use]
    pub const fn new(
        manager: Arc<ConnectionManager<R>>,
        bus: Arc<B>,
        topics: Topics,
        poll_interval: Duration,
    ) -> Self {
        Self {
            manager,
            bus,
            topics,
            poll_interval,
        }
    }

    /// Runs until `shutdown` is cancelled, then marks every device offline.
    ///
    /// # Errors
    ///
    /// Returns an error if the command subscription fails or the bus closes
    /// it.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let mut commands = self.bus.subscribe(&self.topics.command_pattern()).await?;
        let mut events = self.manager.dispatcher().subscribe();

        for (id, state) in self.manager.registry().states().await {
            self.publish_availability(&id, state == ConnectionState::Ready)
                .await;
            if state == ConnectionState::Ready {
                self.publish_current_state(&id).await;
            }
        }

        // `interval` panics on a zero period
        let mut poll = tokio::time::interval(self.poll_interval.max(Duration::from_millis(1)));
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        poll.tick().await;

        let result = loop {
            tokio::select! {
                () = shutdown.cancelled() => break Ok(()),
                message = commands.recv() => match message {
                    Some(message) => self.handle_command(&message).await,
                    None => break Err(Error::ChannelClosed),
                },
                event = events.recv() => match event {
                    Some(event) => self.handle_event(&event).await,
                    None => break Ok(()),
                },
                _ = poll.tick() => self.poll_status().await,
            }
        };

        for id in self.manager.registry().ids() {
            self.publish_availability(id, false).await;
        }
        result
    }

    async fn handle_command(&self, message: &BusMessage) {
        let Some(device_id) = self.topics.device_of_command(&message.topic) else {
            tracing::debug!(topic = %message.topic, "ignoring message");
            return;
        };
        let command = match HubCommand::from_json(&message.payload) {
            Ok(command) => command.to_light_command(),
            Err(e) => {
                tracing::warn!(device = %device_id, "dropping malformed command: {e}");
                return;
            }
        };
        if command.is_empty() {
            return;
        }
        let handle = match self.manager.registry().get(device_id) {
            Ok(handle) => handle,
            Err(e) => {
                tracing::warn!("{e}");
                return;
            }
        };

        // A locked session is mid-connect and could not take the command anyway
        let Ok(mut session) = handle.try_lock() else {
            tracing::warn!(device = %device_id, "command dropped: device is connecting");
            return;
        };
        if !session.send_command(&command).await {
            return;
        }
        let state = session.light_state();
        drop(session);

        self.manager.dispatcher().dispatch(Event::StateChanged {
            device_id: device_id.to_string(),
            state,
        });
    }

    async fn handle_event(&self, event: &Event) {
        match event {
            Event::Connected { device_id } => self.publish_availability(device_id, true).await,
            Event::Disconnected { device_id } | Event::Failed { device_id, .. } => {
                self.publish_availability(device_id, false).await;
            }
            Event::StateChanged { device_id, state } => {
                self.publish_state(device_id, &HubState::from(state)).await;
            }
        }
    }

    /// Reads status from every ready session and reports changes.
    async fn poll_status(&self) {
        for (id, handle) in self.manager.registry().iter() {
            let Ok(mut session) = handle.try_lock() else {
                continue;
            };
            if !session.is_connected() {
                continue;
            }
            let before = session.light_state();
            let Some(after) = session.read_status().await else {
                continue;
            };
            drop(session);
            if after != before {
                self.manager.dispatcher().dispatch(Event::StateChanged {
                    device_id: id.to_string(),
                    state: after,
                });
            }
        }
    }

    async fn publish_current_state(&self, device_id: &str) {
        let Ok(handle) = self.manager.registry().get(device_id) else {
            return;
        };
        let state = handle.lock().await.light_state();
        self.publish_state(device_id, &HubState::from(&state)).await;
    }

    async fn publish_state(&self, device_id: &str, state: &HubState) {
        let payload = match state.to_json() {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(device = %device_id, "state encoding failed: {e}");
                return;
            }
        };
        let topic = self.topics.state(device_id);
        if let Err(e) = self
            .bus
            .publish(&topic, &payload, PublishOptions::RETAINED)
            .await
        {
            tracing::warn!(device = %device_id, "state publish failed: {e}");
        }
    }

    async fn publish_availability(&self, device_id: &str, online: bool) {
        let topic = self.topics.availability(device_id);
        let payload: &[u8] = if online { b"online" } else { b"offline" };
        if let Err(e) = self
            .bus
            .publish(&topic, payload, PublishOptions::RETAINED)
            .await
        {
            tracing::warn!(device = %device_id, "availability publish failed: {e}");
        }
    }
}
