//! Status frame parsing.
//!
//! Parsing is tolerant: anything that is not a well-formed frame with a
//! known command id and a long enough payload yields an empty
//! [`LightUpdate`]. Callers treat that as "no new information".

use crate::protocol::command::CommandId;
use crate::protocol::frame::decode;
use crate::types::{LightUpdate, Rgb};

/// Scales a raw brightness byte (0-255) to the device's 0-100 range,
/// rounding down.
#[must_use]
pub const fn scale_brightness(raw: u8) -> u8 {
    (raw as u16 * 100 / 255) as u8
}

/// Parses a status frame into a partial light state.
#[must_use]
pub fn parse(data: &[u8]) -> LightUpdate {
    let Some(frame) = decode(data) else {
        return LightUpdate::default();
    };

    let payload = frame.payload;
    match CommandId::from_u16(frame.command_id) {
        Some(CommandId::Power) if !payload.is_empty() => LightUpdate {
            power: Some(payload[0] == 0x01),
            ..LightUpdate::default()
        },
        Some(CommandId::Brightness) if !payload.is_empty() => LightUpdate {
            brightness: Some(scale_brightness(payload[0])),
            ..LightUpdate::default()
        },
        Some(CommandId::Color) if payload.len() >= 3 => LightUpdate {
            color: Some(Rgb::new(payload[0], payload[1], payload[2])),
            ..LightUpdate::default()
        },
        Some(CommandId::Combined) if payload.len() >= 4 => LightUpdate {
            power: Some(true),
            brightness: Some(scale_brightness(payload[3])),
            color: Some(Rgb::new(payload[0], payload[1], payload[2])),
            color_temperature: None,
        },
        _ => {
            tracing::trace!(
                "ignoring status frame 0x{:04x} with {} byte payload",
                frame.command_id,
                payload.len()
            );
            LightUpdate::default()
        }
    }
}

/// Parses a hex-encoded status frame. Undecodable text yields an empty
/// update.
#[must_use]
pub fn parse_hex(text: &str) -> LightUpdate {
    hex::decode(text.trim()).map_or_else(|_| LightUpdate::default(), |data| parse(&data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::command::{brightness_frame, color_frame, power_frame};
    use crate::protocol::frame::encode;

    #[test]
    fn test_parse_power_on() {
        let update = parse_hex("55aa01080501f1");
        assert_eq!(
            update,
            LightUpdate {
                power: Some(true),
                ..LightUpdate::default()
            }
        );
    }

    #[test]
    fn test_parse_garbage_is_empty() {
        assert!(parse_hex("1234567890abcdef").is_empty());
        assert!(parse_hex("invalid").is_empty());
        assert!(parse(b"invalid").is_empty());
    }

    #[test]
    fn test_parse_short_frame_is_empty() {
        assert!(parse(&[0x55, 0xaa, 0x01]).is_empty());
    }

    #[test]
    fn test_parse_missing_header_is_empty() {
        let frame = power_frame(true);
        assert!(parse(&frame[2..]).is_empty());
    }

    #[test]
    fn test_parse_unknown_command_is_empty() {
        assert!(parse(&encode(0x1234, &[0x01])).is_empty());
        assert!(parse(&encode(0x0804, &[0x01])).is_empty());
    }

    #[test]
    fn test_parse_underlength_payload_is_empty() {
        assert!(parse(&encode(CommandId::Color.into(), &[1, 2])).is_empty());
        assert!(parse(&encode(CommandId::Combined.into(), &[1, 2, 3])).is_empty());
    }

    #[test]
    fn test_round_trip_power() {
        assert_eq!(parse(&power_frame(true)).power, Some(true));
        assert_eq!(parse(&power_frame(false)).power, Some(false));
    }

    #[test]
    fn test_round_trip_color() {
        let color = Rgb::new(12, 200, 7);
        let update = parse(&color_frame(color));
        assert_eq!(update.color, Some(color));
        assert_eq!(update.power, None);
    }

    #[test]
    fn test_round_trip_brightness_full_scale() {
        let update = parse(&brightness_frame(255));
        assert!(update.brightness.unwrap() >= 99);
    }

    #[test]
    fn test_combined_status_implies_power() {
        let update = parse(&encode(CommandId::Combined.into(), &[10, 20, 30, 128]));
        assert_eq!(update.power, Some(true));
        assert_eq!(update.color, Some(Rgb::new(10, 20, 30)));
        assert_eq!(update.brightness, Some(50));
    }

    #[test]
    fn test_scale_brightness() {
        assert_eq!(scale_brightness(0), 0);
        assert_eq!(scale_brightness(1), 0);
        assert_eq!(scale_brightness(3), 1);
        assert_eq!(scale_brightness(128), 50);
        assert_eq!(scale_brightness(254), 99);
        assert_eq!(scale_brightness(255), 100);
    }
}
