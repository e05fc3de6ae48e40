//! TOML configuration.
//!
//! ```toml
//! adapter = "hci0"
//!
//! [[devices]]
//! id = "desk"
//! name = "Desk Lamp"
//! address = "AA:BB:CC:DD:EE:01"
//! command_capability = "ffd9"
//!
//! [connection]
//! attempts = 3
//!
//! [reconnect]
//! max_attempts = 5
//!
//! [hub]
//! topic_prefix = "lightbridge"
//! ```

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use uuid::Uuid;

use crate::bridge::DEFAULT_TOPIC_PREFIX;
use crate::error::{Error, Result};
use crate::manager::ConnectionSettings;
use crate::supervisor::ReconnectPolicy;
use crate::types::{
    DEFAULT_COMMAND_CAPABILITY, DEFAULT_SERVICE, DEFAULT_STATUS_CAPABILITY, DeviceConfig,
};

/// One `[[devices]]` entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeviceSection {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub service: Option<String>,
    #[serde(default)]
    pub command_capability: Option<String>,
    #[serde(default)]
    pub status_capability: Option<String>,
}

/// `[connection]`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConnectionSection {
    pub attempts: u32,
    pub locate_attempts: u32,
    pub connect_timeout_ms: u64,
    pub discovery_timeout_ms: u64,
    pub retry_delay_ms: u64,
    pub device_timeout_ms: u64,
    pub scan_duration_ms: u64,
}

impl Default for ConnectionSection {
    fn default() -> Self {
        Self {
            attempts: 3,
            locate_attempts: 5,
            connect_timeout_ms: 10_000,
            discovery_timeout_ms: 10_000,
            retry_delay_ms: 1_000,
            device_timeout_ms: 30_000,
            scan_duration_ms: 5_000,
        }
    }
}

/// `[reconnect]`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReconnectSection {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_attempts: u32,
}

impl Default for ReconnectSection {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            max_attempts: 5,
        }
    }
}

/// `[hub]`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HubSection {
    pub topic_prefix: String,
    pub poll_interval_ms: u64,
}

impl Default for HubSection {
    fn default() -> Self {
        Self {
            topic_prefix: DEFAULT_TOPIC_PREFIX.to_string(),
            poll_interval_ms: 30_000,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Adapter name; the first adapter if unset.
    #[serde(default)]
    pub adapter: Option<String>,
    pub devices: Vec<DeviceSection>,
    #[serde(default)]
    pub connection: ConnectionSection,
    #[serde(default)]
    pub reconnect: ReconnectSection,
    #[serde(default)]
    pub hub: HubSection,
}

impl Config {
    /// Loads and validates a config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        content.parse()
    }

    /// Checks the rules serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.devices.is_empty() {
            return Err(invalid("at least one [[devices]] entry is required"));
        }
        let mut seen = HashSet::new();
        for device in &self.devices {
            if device.id.trim().is_empty() {
                return Err(invalid("device id must not be empty"));
            }
            if !seen.insert(device.id.as_str()) {
                return Err(invalid(format!("duplicate device id {:?}", device.id)));
            }
        }
        if self.reconnect.max_delay_ms < self.reconnect.base_delay_ms {
            return Err(invalid("reconnect.max_delay_ms must be >= base_delay_ms"));
        }
        if self.connection.attempts == 0 {
            return Err(invalid("connection.attempts must be at least 1"));
        }
        let nonzero = [
            ("connection.connect_timeout_ms", self.connection.connect_timeout_ms),
            ("connection.discovery_timeout_ms", self.connection.discovery_timeout_ms),
            ("connection.device_timeout_ms", self.connection.device_timeout_ms),
            ("hub.poll_interval_ms", self.hub.poll_interval_ms),
        ];
        if let Some((name, _)) = nonzero.iter().find(|(_, value)| *value == 0) {
            return Err(invalid(format!("{name} must be greater than 0")));
        }
        self.device_configs().map(drop)
    }

    /// Resolves device entries, filling in default capability ids.
    pub fn device_configs(&self) -> Result<Vec<DeviceConfig>> {
        self.devices
            .iter()
            .map(|device| {
                let field = |name: &str, value: Option<&String>, default: Uuid| {
                    value.map_or(Ok(default), |value| {
                        parse_capability_id(value).map_err(|reason| {
                            invalid(format!("devices.{}.{name}: {reason}", device.id))
                        })
                    })
                };
                Ok(DeviceConfig {
                    id: device.id.clone(),
                    name: device.name.clone(),
                    address: device.address.clone(),
                    service: field("service", device.service.as_ref(), DEFAULT_SERVICE)?,
                    command_capability: field(
                        "command_capability",
                        device.command_capability.as_ref(),
                        DEFAULT_COMMAND_CAPABILITY,
                    )?,
                    status_capability: field(
                        "status_capability",
                        device.status_capability.as_ref(),
                        DEFAULT_STATUS_CAPABILITY,
                    )?,
                })
            })
            .collect()
    }

    #[must_use]
    pub const fn connection_settings(&self) -> ConnectionSettings {
        let c = &self.connection;
        ConnectionSettings {
            attempts: c.attempts,
            locate_attempts: c.locate_attempts,
            connect_timeout: Duration::from_millis(c.connect_timeout_ms),
            discovery_timeout: Duration::from_millis(c.discovery_timeout_ms),
            retry_delay: Duration::from_millis(c.retry_delay_ms),
            device_timeout: Duration::from_millis(c.device_timeout_ms),
            scan_duration: Duration::from_millis(c.scan_duration_ms),
        }
    }

    #[must_use]
    pub const fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            base_delay: Duration::from_millis(self.reconnect.base_delay_ms),
            max_delay: Duration::from_millis(self.reconnect.max_delay_ms),
            max_attempts: self.reconnect.max_attempts,
        }
    }

    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.hub.poll_interval_ms)
    }
}

impl std::str::FromStr for Config {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }
}

fn invalid(reason: impl Into<String>) -> Error {
    Error::Config {
        reason: reason.into(),
    }
}

/// Parses a capability or service id in 16-bit (`ffd9`), 32-bit
/// (`0000ffd9`) or full 128-bit form. Short forms expand onto the Bluetooth
/// base id.
pub fn parse_capability_id(value: &str) -> std::result::Result<Uuid, String> {
    let normalized = value.trim().trim_start_matches("0x");
    let is_hex = normalized.chars().all(|c| c.is_ascii_hexdigit());
    let full = match normalized.len() {
        4 if is_hex => format!("0000{normalized}-0000-1000-8000-00805f9b34fb"),
        8 if is_hex => format!("{normalized}-0000-1000-8000-00805f9b34fb"),
        _ => normalized.to_string(),
    };
    Uuid::parse_str(&full).map_err(|e| format!("invalid id {value:?}: {e}"))
}
