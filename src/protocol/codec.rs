use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::message::Request;
use super::{HEADER_SIZE, LENGTH_OVERHEAD, MAX_PAYLOAD, PREFIX};
use crate::core::{Error, FramingError, Result};

/// One protocol message: message type and the payload after it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Message type byte
    pub message_type: u8,
    /// Bytes following the message type
    pub payload: Bytes,
}

impl Frame {
    /// Creates a new frame
    pub fn new(message_type: u8, payload: impl Into<Bytes>) -> Self {
        Frame {
            message_type,
            payload: payload.into(),
        }
    }

    /// Total wire size of this frame
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }
}

/// Encodes a frame into the wire format
///
/// ```text
/// ┌───────────────┬────────┬──────────┬──────┬─────────┐
/// │ 00 00 00 03   │ length │ 00 00    │ type │ payload │
/// └───────────────┴────────┴──────────┴──────┴─────────┘
/// ```
/// `length` counts every byte after itself.
pub fn encode_frame(message_type: u8, payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    if payload.len() > MAX_PAYLOAD {
        return Err(FramingError::PayloadTooLarge {
            size: payload.len(),
            max: MAX_PAYLOAD,
        }
        .into());
    }
    dst.reserve(HEADER_SIZE + payload.len());
    dst.put_slice(&PREFIX);
    dst.put_u8((3 + payload.len()) as u8);
    dst.put_u16(0);
    dst.put_u8(message_type);
    dst.put_slice(payload);
    Ok(())
}

/// Decodes the first frame of a received chunk
///
/// Returns `Ok(None)` once the buffer is empty. A well formed frame is
/// consumed and returned, leaving any following bytes for the next call. A
/// chunk with a bad prefix or a declared length beyond the available bytes is
/// an error and the whole buffer is discarded; frames are never reassembled
/// across reads.
pub fn decode_frame(src: &mut BytesMut) -> Result<Option<Frame>> {
    if src.is_empty() {
        return Ok(None);
    }

    if src.len() < PREFIX.len() || src[..PREFIX.len()] != PREFIX {
        src.clear();
        return Err(FramingError::BadPrefix.into());
    }

    if src.len() < HEADER_SIZE {
        let available = src.len();
        src.clear();
        return Err(FramingError::ShortHeader {
            needed: HEADER_SIZE,
            available,
        }
        .into());
    }

    let declared = src[4] as usize;
    let total = declared + LENGTH_OVERHEAD;
    if total < HEADER_SIZE || src.len() < total {
        let actual = src.len().saturating_sub(LENGTH_OVERHEAD);
        src.clear();
        return Err(FramingError::LengthMismatch { declared, actual }.into());
    }

    let mut frame = src.split_to(total);
    let message_type = frame[7];
    frame.advance(HEADER_SIZE);

    Ok(Some(Frame {
        message_type,
        payload: frame.freeze(),
    }))
}

/// Codec for the device TCP stream
///
/// Encodes [`Request`]s and raw [`Frame`]s; decodes frames with the strict
/// per-read rules of [`decode_frame`].
#[derive(Debug, Clone, Default)]
pub struct DeviceCodec;

impl DeviceCodec {
    /// Creates a new device codec
    pub fn new() -> Self {
        DeviceCodec
    }
}

impl Decoder for DeviceCodec {
    type Item = Frame;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        decode_frame(src)
    }
}

impl Encoder<Frame> for DeviceCodec {
    type Error = Error;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<()> {
        encode_frame(item.message_type, &item.payload, dst)
    }
}

impl Encoder<Request> for DeviceCodec {
    type Error = Error;

    fn encode(&mut self, item: Request, dst: &mut BytesMut) -> Result<()> {
        encode_frame(item.message_type().as_u8(), &item.payload(), dst)
    }
}
