//! Per-device session: link ownership, cached capabilities and light state.

use std::fmt;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::protocol::{brightness_frame, color_frame, parse, power_frame, scale_brightness};
use crate::transport::Link;
use crate::types::{
    Capability, DeviceConfig, DiscoveredPeripheral, LightCommand, LightState, LightUpdate,
};

/// Connection state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Not connected, no attempt in progress.
    Idle,
    /// Locating the peripheral or opening a link.
    Connecting,
    /// Linked, discovering capabilities.
    Discovering,
    /// Linked with a usable command capability.
    Ready,
    /// A ready link dropped.
    Disconnected,
    /// Gave up until an external trigger reconnects.
    Failed,
}

impl ConnectionState {
    /// Returns the state's name for logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Discovering => "discovering",
            Self::Ready => "ready",
            Self::Disconnected => "disconnected",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capability handles resolved during discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Command sink; always present on a ready session.
    pub command: Capability,
    /// Status source; sessions without one are write-only.
    pub status: Option<Capability>,
}

/// One peripheral's session.
pub struct DeviceSession<L> {
    config: Arc<DeviceConfig>,
    state: ConnectionState,
    peripheral: Option<DiscoveredPeripheral>,
    link: Option<L>,
    generation: u64,
    watch: Option<CancellationToken>,
    capabilities: Option<Capabilities>,
    last_known: LightState,
    reconnect_attempts: u32,
}

impl<L: Link> DeviceSession<L> {
    /// Creates an idle session.
    #[must_use]
    pub fn new(config: Arc<DeviceConfig>) -> Self {
        Self {
            config,
            state: ConnectionState::Idle,
            peripheral: None,
            link: None,
            generation: 0,
            watch: None,
            capabilities: None,
            last_known: LightState::default(),
            reconnect_attempts: 0,
        }
    }

    /// Returns the device configuration.
    #[must_use]
    pub fn config(&self) -> &Arc<DeviceConfig> {
        &self.config
    }

    /// Returns the device id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.config.id
    }

    /// Returns the connection state.
    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    /// Returns a copy of the last known light state.
    #[must_use]
    pub const fn light_state(&self) -> LightState {
        self.last_known
    }

    /// Returns true iff the session is ready.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Ready
    }

    /// Returns the cached capabilities (ready sessions only).
    #[must_use]
    pub const fn capabilities(&self) -> Option<&Capabilities> {
        self.capabilities.as_ref()
    }

    /// Returns the number of supervisor reconnects since the last `Ready`.
    #[must_use]
    pub const fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    /// Returns the peripheral the device last resolved to.
    #[must_use]
    pub const fn peripheral(&self) -> Option<&DiscoveredPeripheral> {
        self.peripheral.as_ref()
    }

    pub(crate) fn set_peripheral(&mut self, peripheral: DiscoveredPeripheral) {
        self.peripheral = Some(peripheral);
    }

    pub(crate) const fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) const fn link(&self) -> Option<&L> {
        self.link.as_ref()
    }

    pub(crate) fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            tracing::debug!(device = %self.config.id, from = %self.state, to = %state, "state");
            self.state = state;
        }
    }

    pub(crate) fn bump_reconnect_attempts(&mut self) -> u32 {
        self.reconnect_attempts += 1;
        self.reconnect_attempts
    }

    /// Takes ownership of a fresh link. `watch` is cancelled when the link
    /// is torn down or lost. Returns the link's generation.
    pub(crate) fn attach_link(&mut self, link: L, watch: CancellationToken) -> u64 {
        self.generation += 1;
        self.link = Some(link);
        self.watch = Some(watch);
        self.capabilities = None;
        self.generation
    }

    pub(crate) fn mark_ready(&mut self, capabilities: Capabilities) {
        self.capabilities = Some(capabilities);
        self.reconnect_attempts = 0;
        self.set_state(ConnectionState::Ready);
    }

    /// Drops the link after it was lost. The handle is never reused.
    pub(crate) fn on_link_lost(&mut self) {
        if let Some(watch) = self.watch.take() {
            watch.cancel();
        }
        self.link = None;
        self.capabilities = None;
        self.set_state(ConnectionState::Disconnected);
    }

    /// Closes and discards the link, if any. State is left to the caller.
    pub(crate) async fn teardown(&mut self) {
        if let Some(watch) = self.watch.take() {
            watch.cancel();
        }
        self.capabilities = None;
        if let Some(link) = self.link.take() {
            if let Err(e) = link.disconnect().await {
                tracing::debug!(device = %self.config.id, "disconnect during teardown: {e}");
            }
        }
    }

    /// Sends a command, one frame per field set, in power, brightness,
    /// colour order.
    ///
    /// Each field is merged into the last known state once its frame is
    /// written; brightness or colour imply power on unless the command sets
    /// power explicitly. Returns false if the session has no command
    /// capability or a write fails. Failures are logged, not retried.
    pub async fn send_command(&mut self, command: &LightCommand) -> bool {
        let (Some(link), Some(capabilities)) = (self.link.as_ref(), self.capabilities) else {
            tracing::warn!(device = %self.config.id, "command dropped: no command capability");
            return false;
        };

        let implied_power = command
            .power
            .or_else(|| (command.brightness.is_some() || command.color.is_some()).then_some(true));

        let mut frames = Vec::with_capacity(3);
        if let Some(on) = command.power {
            frames.push((
                power_frame(on),
                LightUpdate {
                    power: Some(on),
                    ..LightUpdate::default()
                },
            ));
        }
        if let Some(brightness) = command.brightness {
            frames.push((
                brightness_frame(brightness),
                LightUpdate {
                    power: implied_power,
                    brightness: Some(scale_brightness(brightness)),
                    ..LightUpdate::default()
                },
            ));
        }
        if let Some(color) = command.color {
            frames.push((
                color_frame(color),
                LightUpdate {
                    power: implied_power,
                    color: Some(color),
                    ..LightUpdate::default()
                },
            ));
        }

        for (frame, update) in frames {
            tracing::trace!(device = %self.config.id, "write {}", hex::encode(&frame));
            if let Err(e) = link.write(&capabilities.command, &frame).await {
                tracing::warn!(device = %self.config.id, "command write failed: {e}");
                return false;
            }
            self.last_known.merge(&update);
        }

        true
    }

    /// Reads and parses the status capability.
    ///
    /// Returns `None` without touching state if the session is not ready,
    /// has no status capability, the read fails, or the frame carries no
    /// recognised fields. Otherwise merges the parsed fields and returns the
    /// merged state.
    pub async fn read_status(&mut self) -> Option<LightState> {
        if self.state != ConnectionState::Ready {
            return None;
        }
        let link = self.link.as_ref()?;
        let status = self.capabilities.and_then(|c| c.status)?;

        let data = match link.read(&status).await {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!(device = %self.config.id, "status read failed: {e}");
                return None;
            }
        };
        tracing::trace!(device = %self.config.id, "read {}", hex::encode(&data));

        let update = parse(&data);
        if update.is_empty() {
            return None;
        }
        self.last_known.merge(&update);
        Some(self.last_known)
    }
}

impl<L> fmt::Debug for DeviceSession<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceSession")
            .field("id", &self.config.id)
            .field("state", &self.state)
            .field("generation", &self.generation)
            .field("linked", &self.link.is_some())
            .field("capabilities", &self.capabilities)
            .field("last_known", &self.last_known)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::encode;
    use crate::transport::Radio;
    use crate::transport::testing::{FakeLink, FakeRadio, peripheral};
    use crate::types::{DEFAULT_COMMAND_CAPABILITY, DEFAULT_SERVICE, DEFAULT_STATUS_CAPABILITY, Rgb};

    const ID: &str = "AA:BB:CC:DD:EE:01";

    fn capabilities(with_status: bool) -> Capabilities {
        Capabilities {
            command: Capability {
                uuid: DEFAULT_COMMAND_CAPABILITY,
                service: DEFAULT_SERVICE,
            },
            status: with_status.then_some(Capability {
                uuid: DEFAULT_STATUS_CAPABILITY,
                service: DEFAULT_SERVICE,
            }),
        }
    }

    async fn ready_session(radio: &FakeRadio, with_status: bool) -> DeviceSession<FakeLink> {
        let link = radio.connect(&peripheral(ID, "Desk")).await.unwrap();
        let mut session = DeviceSession::new(Arc::new(DeviceConfig::new("desk", "Desk")));
        session.attach_link(link, CancellationToken::new());
        session.mark_ready(capabilities(with_status));
        session
    }

    #[tokio::test]
    async fn test_send_command_writes_frames_in_order() {
        let radio = FakeRadio::default();
        let mut session = ready_session(&radio, true).await;

        let sent = session
            .send_command(&LightCommand {
                power: Some(true),
                brightness: Some(255),
                color: Some(Rgb::new(0xff, 0, 0)),
            })
            .await;

        assert!(sent);
        let writes: Vec<String> = radio.writes(ID).iter().map(hex::encode).collect();
        assert_eq!(writes.len(), 3);
        assert_eq!(writes[0], "55aa01080501f1");
        assert!(writes[1].starts_with("55aa010801ff"));
        assert_eq!(writes[2], "55aa030802ff0000f4");

        let state = session.light_state();
        assert!(state.power);
        assert_eq!(state.brightness, 100);
        assert_eq!(state.color, Some(Rgb::new(0xff, 0, 0)));
    }

    #[tokio::test]
    async fn test_brightness_implies_power_on() {
        let radio = FakeRadio::default();
        let mut session = ready_session(&radio, true).await;

        assert!(
            session
                .send_command(&LightCommand {
                    brightness: Some(128),
                    ..LightCommand::default()
                })
                .await
        );

        assert!(session.light_state().power);
        assert_eq!(session.light_state().brightness, 50);
        assert_eq!(radio.writes(ID).len(), 1);
    }

    #[tokio::test]
    async fn test_explicit_power_off_wins() {
        let radio = FakeRadio::default();
        let mut session = ready_session(&radio, true).await;

        assert!(
            session
                .send_command(&LightCommand {
                    power: Some(false),
                    color: Some(Rgb::new(1, 2, 3)),
                    ..LightCommand::default()
                })
                .await
        );

        assert!(!session.light_state().power);
        assert_eq!(session.light_state().color, Some(Rgb::new(1, 2, 3)));
    }

    #[tokio::test]
    async fn test_send_command_without_capability_fails() {
        let mut session: DeviceSession<FakeLink> =
            DeviceSession::new(Arc::new(DeviceConfig::new("desk", "Desk")));

        let sent = session
            .send_command(&LightCommand {
                power: Some(true),
                ..LightCommand::default()
            })
            .await;

        assert!(!sent);
        assert_eq!(session.light_state(), LightState::default());
    }

    #[tokio::test]
    async fn test_failed_write_returns_false_and_keeps_state() {
        let radio = FakeRadio::default();
        let mut session = ready_session(&radio, true).await;
        radio.fail_writes(ID, true);

        let sent = session
            .send_command(&LightCommand {
                power: Some(true),
                ..LightCommand::default()
            })
            .await;

        assert!(!sent);
        assert!(!session.light_state().power);
    }

    #[tokio::test]
    async fn test_read_status_merges_fields() {
        let radio = FakeRadio::default();
        let mut session = ready_session(&radio, true).await;
        session
            .send_command(&LightCommand {
                color: Some(Rgb::new(9, 9, 9)),
                ..LightCommand::default()
            })
            .await;

        radio.set_status(ID, &encode(0x0801, &[0xff]));
        let state = session.read_status().await.unwrap();

        assert_eq!(state.brightness, 100);
        assert_eq!(state.color, Some(Rgb::new(9, 9, 9)));
        assert_eq!(session.light_state(), state);
    }

    #[tokio::test]
    async fn test_read_status_empty_parse_keeps_state() {
        let radio = FakeRadio::default();
        let mut session = ready_session(&radio, true).await;
        radio.set_status(ID, &hex::decode("1234567890abcdef").unwrap());

        assert_eq!(session.read_status().await, None);
        assert_eq!(session.light_state(), LightState::default());
    }

    #[tokio::test]
    async fn test_read_status_requires_status_capability() {
        let radio = FakeRadio::default();
        let mut session = ready_session(&radio, false).await;
        radio.set_status(ID, &encode(0x0805, &[0x01]));

        assert_eq!(session.read_status().await, None);
        assert!(radio.ops().iter().all(|op| !matches!(op, crate::transport::testing::Op::Read(_))));
    }

    #[tokio::test]
    async fn test_read_status_requires_ready() {
        let radio = FakeRadio::default();
        let mut session = ready_session(&radio, true).await;
        radio.set_status(ID, &encode(0x0805, &[0x01]));
        session.on_link_lost();

        assert!(!session.is_connected());
        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert_eq!(session.read_status().await, None);
    }

    #[tokio::test]
    async fn test_teardown_disconnects_link() {
        let radio = FakeRadio::default();
        let mut session = ready_session(&radio, true).await;
        session.teardown().await;

        assert!(session.link().is_none());
        assert!(session.capabilities().is_none());
        assert!(
            radio
                .ops()
                .contains(&crate::transport::testing::Op::Disconnect(ID.to_string()))
        );
    }
}
