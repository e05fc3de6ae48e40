//! Protocol definitions for light communication.
//!
//! This module contains the low-level protocol types including:
//! - Frame encoding/decoding
//! - Command ids and command frame builders
//! - Status frame parsing

pub mod command;
pub mod frame;
pub mod parser;

pub use command::{CommandId, brightness_frame, color_frame, power_frame};
pub use frame::{FRAME_MAGIC, Frame, MAX_PAYLOAD_SIZE, MIN_FRAME_SIZE, checksum, decode, encode};
pub use parser::{parse, parse_hex, scale_brightness};
