//! Binary chat frame codec
//!
//! Every frame starts with a fixed 16-byte big-endian header:
//!
//! ```text
//!  0               4       6       8               12              16
//!  +---------------+-------+-------+---------------+---------------+
//!  | total length  | hdr   | proto | operation     | sequence id   |
//!  | (u32)         | (u16) | (u16) | (u32)         | (u32)         |
//!  +---------------+-------+-------+---------------+---------------+
//!  | body (total length - header length bytes) ...
//! ```
//!
//! A single socket read may carry several frames back to back, so the
//! decoder always walks the buffer by `total length` instead of assuming
//! one frame per read.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

pub const HEADER_LEN: usize = 16;
pub const PROTOCOL_VERSION: u16 = 1;
pub const SEQUENCE_ID: u32 = 1;

/// Default upper bound for a single frame on a live socket
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Frame operation codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Client keepalive, empty body
    Heart,
    /// Server answer to a keepalive
    HeartReply,
    /// Server push with a JSON command body
    Message,
    /// Client join request with a JSON body
    Enter,
    /// Server acknowledgement of a join
    EnterReply,
    Other(u32),
}

impl Operation {
    pub fn code(self) -> u32 {
        match self {
            Operation::Heart => 2,
            Operation::HeartReply => 3,
            Operation::Message => 5,
            Operation::Enter => 7,
            Operation::EnterReply => 8,
            Operation::Other(code) => code,
        }
    }

    pub fn from_code(code: u32) -> Self {
        match code {
            2 => Operation::Heart,
            3 => Operation::HeartReply,
            5 => Operation::Message,
            7 => Operation::Enter,
            8 => Operation::EnterReply,
            other => Operation::Other(other),
        }
    }
}

/// One decoded frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub operation: Operation,
    pub version: u16,
    pub sequence: u32,
    pub body: Bytes,
}

impl Frame {
    pub fn new(operation: Operation, body: impl Into<Bytes>) -> Self {
        Self {
            operation,
            version: PROTOCOL_VERSION,
            sequence: SEQUENCE_ID,
            body: body.into(),
        }
    }

    pub fn heartbeat() -> Self {
        Self::new(Operation::Heart, Bytes::new())
    }

    /// Serialize into a standalone buffer
    pub fn to_bytes(&self) -> Result<Bytes, FrameError> {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + self.body.len());
        FrameCodec::default().encode(self.clone(), &mut buf)?;
        Ok(buf.freeze())
    }
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid header length {0}")]
    InvalidHeader(u16),

    #[error("Frame length {total} inconsistent with header length {header}")]
    InvalidLength { total: u32, header: u16 },

    #[error("Frame too large: {0} bytes")]
    TooLarge(usize),
}

/// `tokio_util` codec for the chat socket
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_frame_len: usize,
}

impl FrameCodec {
    /// Codec rejecting frames longer than `max_frame_len` bytes
    pub fn new(max_frame_len: usize) -> Self {
        Self { max_frame_len }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(MAX_FRAME_LEN)
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        let total = u32::from_be_bytes([src[0], src[1], src[2], src[3]]);
        let header = u16::from_be_bytes([src[4], src[5]]);

        if (header as usize) < HEADER_LEN {
            return Err(FrameError::InvalidHeader(header));
        }
        if total < header as u32 {
            return Err(FrameError::InvalidLength { total, header });
        }
        let total_len = total as usize;
        if total_len > self.max_frame_len {
            return Err(FrameError::TooLarge(total_len));
        }

        if src.len() < total_len {
            return Ok(None);
        }

        let mut raw = src.split_to(total_len);
        raw.advance(4 + 2);
        let version = raw.get_u16();
        let operation = Operation::from_code(raw.get_u32());
        let sequence = raw.get_u32();
        // Header may be longer than the 16 bytes we understand
        raw.advance(header as usize - HEADER_LEN);

        Ok(Some(Frame {
            operation,
            version,
            sequence,
            body: raw.freeze(),
        }))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), FrameError> {
        let total_len = HEADER_LEN + frame.body.len();
        if total_len > u32::MAX as usize {
            return Err(FrameError::TooLarge(total_len));
        }

        dst.reserve(total_len);
        dst.put_u32(total_len as u32);
        dst.put_u16(HEADER_LEN as u16);
        dst.put_u16(frame.version);
        dst.put_u32(frame.operation.code());
        dst.put_u32(frame.sequence);
        dst.put_slice(&frame.body);
        Ok(())
    }
}

/// Decode every complete frame in `buf`, in order.
///
/// Trailing bytes that do not form a whole frame are ignored.
pub fn decode_frames(buf: &[u8]) -> Result<Vec<Frame>, FrameError> {
    let mut src = BytesMut::from(buf);
    let mut codec = FrameCodec::new(usize::MAX);
    let mut frames = Vec::new();

    while let Some(frame) = codec.decode(&mut src)? {
        frames.push(frame);
    }

    Ok(frames)
}
