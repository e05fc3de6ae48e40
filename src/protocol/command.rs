//! Command ids for the light protocol.
//!
//! The same ids are used for commands sent to the light and for status
//! frames it returns.

use bytes::Bytes;

use crate::protocol::frame::encode;
use crate::types::Rgb;

/// Command ids understood by the light.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum CommandId {
    /// Brightness, one byte 0-255.
    Brightness = 0x0801,
    /// RGB colour, three bytes.
    Color = 0x0802,
    /// RGB colour followed by brightness. Status only.
    Combined = 0x0803,
    /// Power, `0x01` on / `0x00` off.
    Power = 0x0805,
}

impl CommandId {
    /// Maps a wire command id to a known command.
    #[must_use]
    pub const fn from_u16(value: u16) -> Option<Self> {
        match value {
            0x0801 => Some(Self::Brightness),
            0x0802 => Some(Self::Color),
            0x0803 => Some(Self::Combined),
            0x0805 => Some(Self::Power),
            _ => None,
        }
    }
}

impl From<CommandId> for u16 {
    fn from(cmd: CommandId) -> Self {
        cmd as Self
    }
}

/// Builds a power command frame.
#[must_use]
pub fn power_frame(on: bool) -> Bytes {
    encode(CommandId::Power.into(), &[u8::from(on)])
}

/// Builds a brightness command frame from a hub brightness (0-255).
#[must_use]
pub fn brightness_frame(brightness: u8) -> Bytes {
    encode(CommandId::Brightness.into(), &[brightness])
}

/// Builds a colour command frame.
#[must_use]
pub fn color_frame(color: Rgb) -> Bytes {
    encode(CommandId::Color.into(), &[color.r, color.g, color.b])
}
