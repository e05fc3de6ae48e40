//! Data types shared across the bridge.
//!
//! This module contains the core data structures used throughout the library:
//! - Light state and partial status updates
//! - Device configuration and scan results

pub mod device;
pub mod light;

pub use device::{
    Capability, DEFAULT_COMMAND_CAPABILITY, DEFAULT_SERVICE, DEFAULT_STATUS_CAPABILITY,
    DeviceConfig, DiscoveredPeripheral,
};
pub use light::{LightCommand, LightState, LightUpdate, Rgb};
