//! Error types for the lightbridge library.

use thiserror::Error;

/// The main error type for lightbridge operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Bluetooth stack error.
    #[error("bluetooth error: {0}")]
    Ble(#[from] btleplug::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file could not be parsed.
    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Configuration is syntactically valid but unusable.
    #[error("invalid config: {reason}")]
    Config { reason: String },

    /// Hub message could not be encoded or decoded.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A radio operation did not settle in time.
    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout {
        operation: &'static str,
        timeout_ms: u64,
    },

    /// The session has no usable link.
    #[error("not connected")]
    NotConnected,

    /// The link dropped while an operation was in flight.
    #[error("link lost during {operation}")]
    LinkLost { operation: &'static str },

    /// A required capability was not found on the peripheral.
    #[error("capability {capability} not found on {device_id}")]
    CapabilityNotFound {
        device_id: String,
        capability: String,
    },

    /// The configured device was not seen during scanning.
    #[error("device {device_id} not found after {scans} scans")]
    DeviceNotFound { device_id: String, scans: u32 },

    /// More than one scanned peripheral matched the configured device.
    #[error("device {device_id} is ambiguous: {candidates} candidates matched by {matcher}")]
    AmbiguousDevice {
        device_id: String,
        matcher: &'static str,
        candidates: usize,
    },

    /// No usable radio adapter on the host.
    #[error("radio adapter unavailable: {reason}")]
    AdapterUnavailable { reason: String },

    /// Every connection attempt failed.
    #[error("device {device_id} failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        device_id: String,
        attempts: u32,
        last: Box<Error>,
    },

    /// The device id is not part of the configured set.
    #[error("unknown device: {0}")]
    UnknownDevice(String),

    /// Message bus collaborator failure.
    #[error("bus error: {message}")]
    Bus { message: String },

    /// Channel closed.
    #[error("channel closed")]
    ChannelClosed,
}

impl Error {
    /// Returns true for transient link errors worth another attempt.
    ///
    /// Configuration problems and a missing adapter are never retried; a
    /// missing command capability is, since discovery on constrained stacks
    /// can return a partial attribute table.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Ble(_)
            | Self::Io(_)
            | Self::Timeout { .. }
            | Self::NotConnected
            | Self::LinkLost { .. }
            | Self::CapabilityNotFound { .. }
            | Self::DeviceNotFound { .. } => true,
            Self::ConfigParse(_)
            | Self::Config { .. }
            | Self::Json(_)
            | Self::AmbiguousDevice { .. }
            | Self::AdapterUnavailable { .. }
            | Self::RetriesExhausted { .. }
            | Self::UnknownDevice(_)
            | Self::Bus { .. }
            | Self::ChannelClosed => false,
        }
    }

    pub(crate) fn timeout(operation: &'static str, timeout: std::time::Duration) -> Self {
        Self::Timeout {
            operation,
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

/// Result type alias for lightbridge operations.
pub type Result<T> = std::result::Result<T, Error>;
