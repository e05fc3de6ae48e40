//! Hub-facing JSON messages.
//!
//! The hub speaks 0-255 brightness and mireds; devices speak 0-100 for both.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{LightCommand, LightState, Rgb};

/// Coolest colour temperature the hub is told about, in mireds.
pub const MIN_MIREDS: u16 = 153;

/// Span from coolest to warmest, in mireds.
pub const MIREDS_SPAN: u16 = 347;

/// `"ON"` / `"OFF"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PowerState {
    On,
    Off,
}

impl From<bool> for PowerState {
    fn from(on: bool) -> Self {
        if on { Self::On } else { Self::Off }
    }
}

impl From<PowerState> for bool {
    fn from(state: PowerState) -> Self {
        state == PowerState::On
    }
}

/// Command received from the hub. Any subset of fields may be present.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct HubCommand {
    #[serde(default)]
    pub state: Option<PowerState>,
    #[serde(default)]
    pub brightness: Option<u8>,
    #[serde(default)]
    pub color: Option<Rgb>,
    /// Accepted but not forwarded; the devices have no temperature command.
    #[serde(default)]
    pub color_temp: Option<u16>,
}

impl HubCommand {
    /// Parses a command payload.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Json`] for malformed payloads.
    pub fn from_json(payload: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(payload)?)
    }

    /// Converts to a device command. Brightness stays on the hub scale; the
    /// frame carries it as-is.
    #[must_use]
    pub fn to_light_command(&self) -> LightCommand {
        if let Some(mireds) = self.color_temp {
            tracing::debug!(mireds, "color_temp has no device command, ignored");
        }
        LightCommand {
            power: self.state.map(bool::from),
            brightness: self.brightness,
            color: self.color,
        }
    }
}

/// State published to the hub. Always carries `state`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubState {
    pub state: PowerState,
    pub brightness: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<Rgb>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color_temp: Option<u16>,
}

impl HubState {
    /// Serializes the state.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Json`] if serialization fails.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

impl From<&LightState> for HubState {
    fn from(state: &LightState) -> Self {
        Self {
            state: state.power.into(),
            brightness: brightness_to_hub(state.brightness),
            color: state.color,
            color_temp: state.color_temperature.map(temperature_to_mireds),
        }
    }
}

/// Device 0-100 to hub 0-255, rounded.
#[must_use]
pub const fn brightness_to_hub(value: u8) -> u8 {
    let value = if value > 100 { 100 } else { value as u16 };
    ((value * 255 + 50) / 100) as u8
}

/// Device 0-100 (cold to warm) to mireds: `153 + value/100 * 347`.
#[must_use]
pub const fn temperature_to_mireds(value: u8) -> u16 {
    let value = if value > 100 { 100 } else { value as u16 };
    MIN_MIREDS + (value * MIREDS_SPAN + 50) / 100
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_partial_command() {
        let command = HubCommand::from_json(br#"{"state":"ON","brightness":128}"#).unwrap();

        assert_eq!(command.state, Some(PowerState::On));
        assert_eq!(command.brightness, Some(128));
        assert_eq!(command.color, None);
        assert_eq!(
            command.to_light_command(),
            LightCommand {
                power: Some(true),
                brightness: Some(128),
                color: None,
            }
        );
    }

    #[test]
    fn test_color_temp_is_ignored() {
        let command =
            HubCommand::from_json(br#"{"color":{"r":255,"g":0,"b":0},"color_temp":300}"#).unwrap();

        assert_eq!(command.color_temp, Some(300));
        let light = command.to_light_command();
        assert_eq!(light.color, Some(Rgb::new(255, 0, 0)));
        assert_eq!(light.power, None);
    }

    #[test]
    fn test_malformed_command() {
        assert!(HubCommand::from_json(b"not json").is_err());
        assert!(HubCommand::from_json(br#"{"state":"MAYBE"}"#).is_err());
        assert!(HubCommand::from_json(br#"{"brightness":300}"#).is_err());
    }

    #[test]
    fn test_state_always_has_state_field() {
        let json = HubState::from(&LightState::default()).to_json().unwrap();
        assert_eq!(
            String::from_utf8(json).unwrap(),
            r#"{"state":"OFF","brightness":0}"#
        );
    }

    #[test]
    fn test_state_conversion() {
        let state = LightState {
            power: true,
            brightness: 100,
            color: Some(Rgb::new(1, 2, 3)),
            color_temperature: Some(100),
        };

        let hub = HubState::from(&state);
        assert_eq!(hub.state, PowerState::On);
        assert_eq!(hub.brightness, 255);
        assert_eq!(hub.color, Some(Rgb::new(1, 2, 3)));
        assert_eq!(hub.color_temp, Some(500));
    }

    #[test]
    fn test_status_derived_state_has_no_color_temp() {
        use crate::protocol::{CommandId, encode, parse};

        let mut state = LightState::default();
        state.merge(&parse(&encode(CommandId::Combined.into(), &[10, 20, 30, 255])));

        assert_eq!(state.color_temperature, None);
        let json = String::from_utf8(HubState::from(&state).to_json().unwrap()).unwrap();
        assert!(!json.contains("color_temp"), "{json}");
    }

    #[test]
    fn test_scaling_bounds() {
        assert_eq!(brightness_to_hub(0), 0);
        assert_eq!(brightness_to_hub(50), 128);
        assert_eq!(brightness_to_hub(200), 255);
        assert_eq!(temperature_to_mireds(0), 153);
        assert_eq!(temperature_to_mireds(50), 327);
    }
}
