//! Device configuration and discovery types.

use uuid::Uuid;

/// GATT service under which the light exposes its capabilities.
pub const DEFAULT_SERVICE: Uuid = Uuid::from_u128(0x0000_ffd5_0000_1000_8000_0080_5f9b_34fb);

/// Write capability accepting command frames.
pub const DEFAULT_COMMAND_CAPABILITY: Uuid =
    Uuid::from_u128(0x0000_ffd9_0000_1000_8000_0080_5f9b_34fb);

/// Read capability returning status frames.
pub const DEFAULT_STATUS_CAPABILITY: Uuid =
    Uuid::from_u128(0x0000_ffd4_0000_1000_8000_0080_5f9b_34fb);

/// A configured peripheral. Loaded once at startup and never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfig {
    /// Unique id, used as the key for topics and logs.
    pub id: String,
    /// Display name; also the advertised local name used for matching.
    pub name: String,
    /// Radio address or platform peripheral identifier.
    pub address: Option<String>,
    /// Service the capabilities are discovered under.
    pub service: Uuid,
    /// Capability that accepts command frames.
    pub command_capability: Uuid,
    /// Capability that returns status frames.
    pub status_capability: Uuid,
}

impl DeviceConfig {
    /// Creates a device config using the protocol's default capability ids.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            address: None,
            service: DEFAULT_SERVICE,
            command_capability: DEFAULT_COMMAND_CAPABILITY,
            status_capability: DEFAULT_STATUS_CAPABILITY,
        }
    }

    /// Sets the radio address.
    #[must_use]
    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }
}

/// A peripheral seen while scanning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredPeripheral {
    /// Platform identifier used to open a link.
    pub id: String,
    /// Radio address as reported by the stack.
    pub address: String,
    /// Advertised local name.
    pub name: Option<String>,
    /// Advertised service ids.
    pub service_ids: Vec<Uuid>,
    /// Signal strength, if reported.
    pub rssi: Option<i16>,
}

/// A discovered read/write endpoint on a linked peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Capability {
    pub uuid: Uuid,
    pub service: Uuid,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_capability_ids() {
        assert_eq!(
            DEFAULT_SERVICE.to_string(),
            "0000ffd5-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(
            DEFAULT_COMMAND_CAPABILITY.to_string(),
            "0000ffd9-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(
            DEFAULT_STATUS_CAPABILITY.to_string(),
            "0000ffd4-0000-1000-8000-00805f9b34fb"
        );
    }

    #[test]
    fn test_device_config_builder() {
        let config = DeviceConfig::new("desk", "Desk Lamp").address("AA:BB:CC:DD:EE:FF");
        assert_eq!(config.id, "desk");
        assert_eq!(config.address.as_deref(), Some("AA:BB:CC:DD:EE:FF"));
        assert_eq!(config.command_capability, DEFAULT_COMMAND_CAPABILITY);
    }
}
