//! # lightbridge
//!
//! Bridges Bluetooth LE lighting peripherals to a message-bus automation hub.
//!
//! The bridge keeps live links to a small fixed set of lights, translates hub
//! commands into the lights' checksummed binary frames, and republishes the
//! status the lights report.
//!
//! ## Features
//!
//! - Async/await based API using Tokio
//! - Per-device connection state machine with bounded retries
//! - Concurrent connect with a strictly sequential fallback for radios that
//!   hold only one reliable link
//! - Exponential-backoff reconnection after link loss
//! - Tolerant status parsing: malformed frames never fail a session
//!
//! ## Quick Start
//!
//! ```no_run
//! use lightbridge::{BleRadio, ConnectionManager, ConnectionSettings, DeviceConfig, EventDispatcher, LightCommand};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), lightbridge::Error> {
//!     let radio = BleRadio::new(None).await?;
//!     let devices = [DeviceConfig::new("desk", "Desk Lamp").address("AA:BB:CC:DD:EE:01")];
//!     let (manager, _losses) = ConnectionManager::new(
//!         radio,
//!         ConnectionSettings::default(),
//!         devices,
//!         EventDispatcher::default(),
//!     )?;
//!
//!     manager.connect_device("desk").await?;
//!
//!     let session = manager.registry().get("desk")?;
//!     let sent = session
//!         .lock()
//!         .await
//!         .send_command(&LightCommand { power: Some(true), ..LightCommand::default() })
//!         .await;
//!     println!("sent: {sent}");
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`protocol`] - Frame codec, command builders and the status parser
//! - [`types`] - Light state, device configuration and scan results
//! - [`transport`] - Radio traits and the `btleplug` implementation
//! - [`session`] - One device's link, capabilities and last known state
//! - [`manager`] - Connection state machine, retries and device matching
//! - [`supervisor`] - Backoff reconnection after link loss
//! - [`event`] - Lifecycle and state events
//! - [`hub`] / [`bridge`] - Hub JSON messages and the bus glue
//! - [`config`] - TOML configuration

pub mod bridge;
pub mod config;
pub mod error;
pub mod event;
pub mod hub;
pub mod manager;
pub mod protocol;
pub mod session;
pub mod supervisor;
pub mod transport;
pub mod types;

// Re-exports for convenience
pub use bridge::{Bus, BusMessage, HubBridge, LineBus, PublishOptions, Topics};
pub use config::Config;
pub use error::{Error, Result};
pub use event::{Event, EventDispatcher, EventFilter, EventKind, Subscription};
pub use hub::{HubCommand, HubState, PowerState};
pub use manager::{ConnectionManager, ConnectionSettings, LinkLoss, SessionRegistry};
pub use protocol::{CommandId, encode, parse, parse_hex};
pub use session::{ConnectionState, DeviceSession};
pub use supervisor::{ReconnectPolicy, ReconnectSupervisor};
pub use transport::{BleLink, BleRadio, Link, Radio};
pub use types::{DeviceConfig, DiscoveredPeripheral, LightCommand, LightState, LightUpdate, Rgb};
