//! Frame codec for the device link
//!
//! Every message in either direction is framed as:
//! ```text
//! [ 1 byte: command id ][ 1 byte: payload length N ][ N bytes: payload ]
//! ```
//!
//! There is no start marker or checksum, so a frame boundary is known only
//! from the length header of the frame before it.

use std::str::Utf8Error;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::command::CommandId;
use crate::{FRAME_HEADER_LEN, MAX_PAYLOAD_LEN};

/// Errors that can occur during encoding/decoding
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CodecError {
    #[error("Malformed frame: need {needed} bytes, have {available}")]
    MalformedFrame { needed: usize, available: usize },

    #[error("Unknown command id: {0}")]
    UnknownCommandId(u8),

    #[error("Truncated payload: need {needed} bytes, have {available}")]
    TruncatedPayload { needed: usize, available: usize },

    #[error("Payload length mismatch: expected {expected} bytes, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("Invalid UTF-8 in log output: {0}")]
    InvalidEncoding(#[from] Utf8Error),

    #[error("Payload too large: {0} bytes (max: 255)")]
    PayloadTooLarge(usize),
}

/// One self-delimited unit of the wire protocol
///
/// The payload always fits the one-byte length header; every constructor
/// enforces it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    command_id: CommandId,
    payload: Bytes,
}

impl Frame {
    /// Create a frame, rejecting payloads the length header cannot describe
    pub fn new(command_id: CommandId, payload: impl Into<Bytes>) -> Result<Self, CodecError> {
        let payload = payload.into();
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(CodecError::PayloadTooLarge(payload.len()));
        }
        Ok(Self { command_id, payload })
    }

    /// Create a frame with no payload
    pub fn empty(command_id: CommandId) -> Self {
        Self {
            command_id,
            payload: Bytes::new(),
        }
    }

    /// Builders in this crate only produce fixed, short payloads
    pub(crate) fn from_parts(command_id: CommandId, payload: Bytes) -> Self {
        debug_assert!(payload.len() <= MAX_PAYLOAD_LEN);
        Self { command_id, payload }
    }

    pub fn command_id(&self) -> CommandId {
        self.command_id
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Number of bytes this frame occupies on the wire
    pub fn encoded_len(&self) -> usize {
        FRAME_HEADER_LEN + self.payload.len()
    }
}

/// Encode a frame into a fresh buffer
pub fn encode(frame: &Frame) -> Bytes {
    let mut buf = BytesMut::with_capacity(frame.encoded_len());
    encode_into(frame, &mut buf);
    buf.freeze()
}

/// Encode a frame directly into a provided buffer
pub fn encode_into(frame: &Frame, buf: &mut BytesMut) {
    buf.reserve(frame.encoded_len());
    buf.put_u8(frame.command_id.as_u8());
    // Guaranteed by Frame's constructors
    buf.put_u8(frame.payload.len() as u8);
    buf.put_slice(&frame.payload);
}

/// Decode exactly one frame from the start of `raw`
///
/// Bytes past `frame.encoded_len()` are left for the caller.
pub fn decode(raw: &[u8]) -> Result<Frame, CodecError> {
    if raw.len() < FRAME_HEADER_LEN {
        return Err(CodecError::MalformedFrame {
            needed: FRAME_HEADER_LEN,
            available: raw.len(),
        });
    }

    let payload_len = raw[1] as usize;
    let total_len = FRAME_HEADER_LEN + payload_len;
    if raw.len() < total_len {
        return Err(CodecError::MalformedFrame {
            needed: total_len,
            available: raw.len(),
        });
    }

    let command_id = CommandId::try_from(raw[0])?;
    let payload = Bytes::copy_from_slice(&raw[FRAME_HEADER_LEN..total_len]);

    Ok(Frame { command_id, payload })
}

/// Try to split one complete frame off the front of a stream buffer
///
/// Returns:
/// - `Ok(Some(frame))` if a complete frame was decoded
/// - `Ok(None)` if more data is needed
/// - `Err(UnknownCommandId)` if a complete frame carried an unknown id; the
///   frame's bytes are consumed so decoding can continue with the next one
pub fn decode_stream(buf: &mut BytesMut) -> Result<Option<Frame>, CodecError> {
    if buf.len() < FRAME_HEADER_LEN {
        return Ok(None);
    }

    let payload_len = buf[1] as usize;
    let total_len = FRAME_HEADER_LEN + payload_len;
    if buf.len() < total_len {
        return Ok(None);
    }

    let raw_id = buf[0];
    buf.advance(FRAME_HEADER_LEN);
    let payload = buf.split_to(payload_len).freeze();

    let command_id = CommandId::try_from(raw_id)?;
    Ok(Some(Frame { command_id, payload }))
}

/// Accumulates transport reads and yields whole frames
#[derive(Debug, Default)]
pub struct FrameDecoder {
    /// Partial frame data being accumulated
    buffer: BytesMut,
}

impl FrameDecoder {
    /// Create a new frame decoder
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(1024),
        }
    }

    /// Add data to the decoder buffer
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Try to decode the next frame from the buffer
    ///
    /// Call this repeatedly until it returns `Ok(None)` to drain all complete
    /// frames. An error affects only the frame it names.
    pub fn decode_next(&mut self) -> Result<Option<Frame>, CodecError> {
        decode_stream(&mut self.buffer)
    }

    /// Get the current buffer length (for debugging)
    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }
}

/// Batches frames into a single outbound buffer
#[derive(Debug, Default)]
pub struct FrameEncoder {
    buffer: BytesMut,
}

impl FrameEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a frame to the output buffer
    pub fn encode(&mut self, frame: &Frame) {
        encode_into(frame, &mut self.buffer)
    }

    /// Take the encoded bytes, leaving an empty buffer
    pub fn take(&mut self) -> Bytes {
        self.buffer.split().freeze()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}
