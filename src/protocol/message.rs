use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::codec::Frame;
use super::cursor::FieldReader;
use crate::core::{Error, Result};
use crate::util::to_binary;

/// Message type byte of every frame the client sends or understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum MessageType {
    PasscodeRequest = 0x06,
    PasscodeResponse = 0x07,
    LoginRequest = 0x08,
    LoginResponse = 0x09,
    Ping = 0x15,
    Pong = 0x16,
    TelemetryRequest = 0x90,
    TelemetryResponse = 0x91,
    ExtendedTelemetryResponse = 0x94,
}

impl MessageType {
    /// Raw wire value
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for MessageType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        Ok(match value {
            0x06 => MessageType::PasscodeRequest,
            0x07 => MessageType::PasscodeResponse,
            0x08 => MessageType::LoginRequest,
            0x09 => MessageType::LoginResponse,
            0x15 => MessageType::Ping,
            0x16 => MessageType::Pong,
            0x90 => MessageType::TelemetryRequest,
            0x91 => MessageType::TelemetryResponse,
            0x94 => MessageType::ExtendedTelemetryResponse,
            other => return Err(Error::UnknownMessageType(other)),
        })
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({:#04x})", self, self.as_u8())
    }
}

/// Requests the client sends to the device
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Ask the device for its passcode
    Passcode,
    /// Log in with a passcode
    Login {
        /// Passcode bytes as sent on the wire
        passcode: Bytes,
    },
    /// Keepalive ping, answered by a pong
    Ping,
    /// Fetch telemetry and subscribe to periodic pushes
    Telemetry,
}

impl Request {
    /// Message type written on the wire
    pub fn message_type(&self) -> MessageType {
        match self {
            Request::Passcode => MessageType::PasscodeRequest,
            Request::Login { .. } => MessageType::LoginRequest,
            Request::Ping => MessageType::Ping,
            Request::Telemetry => MessageType::TelemetryRequest,
        }
    }

    /// Message type of the reply that completes this request
    pub fn response_type(&self) -> MessageType {
        match self {
            Request::Passcode => MessageType::PasscodeResponse,
            Request::Login { .. } => MessageType::LoginResponse,
            Request::Ping => MessageType::Pong,
            Request::Telemetry => MessageType::TelemetryResponse,
        }
    }

    /// Payload following the message type byte
    pub fn payload(&self) -> Bytes {
        match self {
            Request::Passcode | Request::Ping => Bytes::new(),
            Request::Login { passcode } => {
                let mut buf = BytesMut::with_capacity(2 + passcode.len());
                buf.put_u16(passcode.len() as u16);
                buf.put_slice(passcode);
                buf.freeze()
            }
            Request::Telemetry => Bytes::from_static(&[0x02]),
        }
    }
}

/// Decoded telemetry values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryReading {
    /// pH value
    pub ph: f64,
    /// Redox potential in millivolts
    pub redox: i32,
    /// pH control switch is on
    pub ph_switch: bool,
    /// Redox control switch is on
    pub redox_switch: bool,
    /// First raw flags byte, meaning unknown
    pub flags1: u8,
    /// Second raw flags byte, carries the switch states
    pub flags2: u8,
}

impl TelemetryReading {
    /// Parses the telemetry fields starting at the reader position
    ///
    /// Layout: `flags1 flags2 ph(u16 BE, hundredths) redox(u16 BE, +2000 mV)`.
    pub fn read_from(reader: &mut FieldReader) -> Result<Self> {
        let flags1 = reader.read_u8()?;
        let flags2 = reader.read_u8()?;
        let ph_raw = reader.read_u16()?;
        let redox_raw = reader.read_u16()?;

        Ok(TelemetryReading {
            ph: f64::from(ph_raw) / 100.0,
            redox: i32::from(redox_raw) - 2000,
            ph_switch: flags2 & 0b01 != 0,
            redox_switch: flags2 & 0b10 != 0,
            flags1,
            flags2,
        })
    }

    /// First flags byte as a binary string, for analysing unknown bits
    pub fn flags1_binary(&self) -> String {
        to_binary(self.flags1)
    }

    /// Second flags byte as a binary string, for analysing unknown bits
    pub fn flags2_binary(&self) -> String {
        to_binary(self.flags2)
    }
}

/// Extended telemetry carries four leading bytes of unknown meaning
const EXTENDED_TELEMETRY_OFFSET: usize = 4;

/// Responses the device sends
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    /// The device passcode
    Passcode(Bytes),
    /// Login result, zero means success
    Login { status: u8 },
    /// Keepalive answer
    Pong,
    /// Telemetry answer or periodic push
    Telemetry(TelemetryReading),
    /// Telemetry with a longer header
    ExtendedTelemetry(TelemetryReading),
}

impl Response {
    /// Message type this response arrives with
    pub fn message_type(&self) -> MessageType {
        match self {
            Response::Passcode(_) => MessageType::PasscodeResponse,
            Response::Login { .. } => MessageType::LoginResponse,
            Response::Pong => MessageType::Pong,
            Response::Telemetry(_) => MessageType::TelemetryResponse,
            Response::ExtendedTelemetry(_) => MessageType::ExtendedTelemetryResponse,
        }
    }

    /// Interprets a decoded frame
    ///
    /// Unknown or request-only message types yield [`Error::UnknownMessageType`].
    pub fn from_frame(frame: &Frame) -> Result<Self> {
        let message_type = MessageType::try_from(frame.message_type)?;
        let mut reader = FieldReader::new(frame.payload.clone());

        match message_type {
            MessageType::PasscodeResponse => Ok(Response::Passcode(reader.read_length_prefixed()?)),
            MessageType::LoginResponse => Ok(Response::Login {
                status: reader.read_u8()?,
            }),
            MessageType::Pong => Ok(Response::Pong),
            MessageType::TelemetryResponse => Ok(Response::Telemetry(
                TelemetryReading::read_from(&mut reader)?,
            )),
            MessageType::ExtendedTelemetryResponse => {
                reader.skip(EXTENDED_TELEMETRY_OFFSET)?;
                Ok(Response::ExtendedTelemetry(TelemetryReading::read_from(
                    &mut reader,
                )?))
            }
            _ => Err(Error::UnknownMessageType(frame.message_type)),
        }
    }

    /// Telemetry carried by this response, if any
    pub fn telemetry(&self) -> Option<&TelemetryReading> {
        match self {
            Response::Telemetry(reading) | Response::ExtendedTelemetry(reading) => Some(reading),
            _ => None,
        }
    }
}
