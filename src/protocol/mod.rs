//! Protocol implementation module
//!
//! This module defines the PH803-W wire format: frame encoding/decoding,
//! typed requests and responses, the payload field reader and the session
//! state bookkeeping.

pub mod codec;
pub mod cursor;
pub mod message;
pub mod state;

pub use self::codec::{decode_frame, encode_frame, DeviceCodec, Frame};
pub use self::cursor::FieldReader;
pub use self::message::{MessageType, Request, Response, TelemetryReading};
pub use self::state::{SessionState, Timers};

// Constants
/// Prefix every frame starts with
pub const PREFIX: [u8; 4] = [0x00, 0x00, 0x00, 0x03];

/// Prefix, length byte, two reserved bytes and the message type
pub const HEADER_SIZE: usize = 8;

/// Bytes not counted by the declared length: the prefix and the length byte itself
pub const LENGTH_OVERHEAD: usize = 5;

/// Largest payload a one-byte declared length can describe
pub const MAX_PAYLOAD: usize = u8::MAX as usize - 3;
