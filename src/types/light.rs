//! Light state types.

use serde::{Deserialize, Serialize};

/// An RGB colour, one byte per channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    /// Creates a colour from its channels.
    #[must_use]
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

/// Last known state of a light, in device units.
///
/// `brightness` and `color_temperature` use the device's 0-100 scale. The
/// type is `Copy`, so callers always receive a snapshot rather than a view
/// into session state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LightState {
    /// Whether the light is on.
    pub power: bool,
    /// Brightness, 0-100.
    pub brightness: u8,
    /// Current colour, if known.
    pub color: Option<Rgb>,
    /// Colour temperature, 0-100 (cold to warm), if known.
    ///
    /// No status frame the lights send carries a temperature and no command
    /// sets one, so this stays `None` on live sessions and the hub state
    /// omits `color_temp`.
    pub color_temperature: Option<u8>,
}

impl LightState {
    /// Merges a partial update: fields present in `update` overwrite, the
    /// rest persist.
    pub fn merge(&mut self, update: &LightUpdate) {
        if let Some(power) = update.power {
            self.power = power;
        }
        if let Some(brightness) = update.brightness {
            self.brightness = brightness;
        }
        if let Some(color) = update.color {
            self.color = Some(color);
        }
        if let Some(temperature) = update.color_temperature {
            self.color_temperature = Some(temperature);
        }
    }

    /// Returns a copy with `update` merged in.
    #[must_use]
    pub fn merged(mut self, update: &LightUpdate) -> Self {
        self.merge(update);
        self
    }
}

/// A partial light state, as decoded from a single status frame or implied
/// by a single command.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LightUpdate {
    pub power: Option<bool>,
    pub brightness: Option<u8>,
    pub color: Option<Rgb>,
    pub color_temperature: Option<u8>,
}

impl LightUpdate {
    /// Returns true if the update carries no information.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.power.is_none()
            && self.brightness.is_none()
            && self.color.is_none()
            && self.color_temperature.is_none()
    }
}

/// A command for a light. Brightness is on the hub's 0-255 scale.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LightCommand {
    pub power: Option<bool>,
    pub brightness: Option<u8>,
    pub color: Option<Rgb>,
}

impl LightCommand {
    /// Returns true if the command sets nothing.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.power.is_none() && self.brightness.is_none() && self.color.is_none()
    }
}
