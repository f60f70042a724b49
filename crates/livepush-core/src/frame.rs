//! Binary frame codec for the push socket.
//!
//! Every socket message carries exactly one frame: a fixed 16-byte big-endian
//! header followed by the body.
//!
//! ```text
//!  0               4       6       8               12              16
//!  +---------------+-------+-------+---------------+---------------+------ ...
//!  | total length  | hdr   | ver   | opcode        | sequence      | body
//!  | u32           | u16   | u16   | i32           | i32           |
//!  +---------------+-------+-------+---------------+---------------+------ ...
//! ```
//!
//! The length bound enforced by [`FrameCodec::decode`] applies to the *total*
//! packet length, not the body length. This mirrors the platform SDK.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Size of the fixed frame header in bytes.
pub const HEADER_LENGTH: u16 = 16;

/// Protocol version written into outgoing frames.
pub const PROTOCOL_VERSION: u16 = 0;

/// Default upper bound on a frame's declared total length.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 2048;

// ─────────────────────────────────────────────────────────────────────────────
// Opcodes
// ─────────────────────────────────────────────────────────────────────────────

/// Frame purpose tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Opcode {
    /// Client → server keep-alive (2).
    Heartbeat,
    /// Server → client keep-alive acknowledgement (3).
    HeartbeatReply,
    /// Server → client event push (5).
    Message,
    /// Client → server authentication (7).
    Auth,
    /// Server → client authentication result (8).
    AuthReply,
    /// Anything the client does not interpret.
    Other(i32),
}

impl Opcode {
    /// Wire value of this opcode.
    pub const fn as_raw(self) -> i32 {
        match self {
            Self::Heartbeat => 2,
            Self::HeartbeatReply => 3,
            Self::Message => 5,
            Self::Auth => 7,
            Self::AuthReply => 8,
            Self::Other(raw) => raw,
        }
    }

    /// Interpret a wire value.
    pub const fn from_raw(raw: i32) -> Self {
        match raw {
            2 => Self::Heartbeat,
            3 => Self::HeartbeatReply,
            5 => Self::Message,
            7 => Self::Auth,
            8 => Self::AuthReply,
            other => Self::Other(other),
        }
    }
}

impl From<i32> for Opcode {
    fn from(raw: i32) -> Self {
        Self::from_raw(raw)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Frame
// ─────────────────────────────────────────────────────────────────────────────

/// One decoded frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    /// Declared total length (header + body).
    pub total_length: u32,
    /// Declared header length; always [`HEADER_LENGTH`] after a successful decode.
    pub header_length: u16,
    /// Protocol version.
    pub version: u16,
    /// Raw opcode.
    pub opcode: i32,
    /// Sequence number.
    pub sequence: i32,
    /// Body bytes.
    pub body: Bytes,
}

impl Frame {
    /// Typed view of the opcode.
    pub fn op(&self) -> Opcode {
        Opcode::from_raw(self.opcode)
    }

    /// Body interpreted as UTF-8, replacing invalid sequences.
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Reasons a buffer cannot be decoded into a [`Frame`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Fewer bytes than a full header.
    #[error("frame header too short: {len} bytes, need {HEADER_LENGTH}")]
    HeaderTooShort {
        /// Bytes supplied.
        len: usize,
    },
    /// Header length field does not match the fixed header size.
    #[error("frame header length mismatch: declared {declared}, expected {HEADER_LENGTH}")]
    HeaderLengthMismatch {
        /// Value found in the header.
        declared: u16,
    },
    /// Declared total length is outside `[HEADER_LENGTH, max]`.
    #[error("frame length {declared} out of range (max {max})")]
    LengthOutOfRange {
        /// Declared total length, read as signed.
        declared: i64,
        /// Configured upper bound.
        max: usize,
    },
    /// Buffer ends before the declared total length.
    #[error("frame body truncated: declared {declared} bytes, have {available}")]
    TruncatedBody {
        /// Declared total length.
        declared: usize,
        /// Bytes supplied.
        available: usize,
    },
}

// ─────────────────────────────────────────────────────────────────────────────
// Codec
// ─────────────────────────────────────────────────────────────────────────────

/// Frame encoder/decoder with a configurable length bound.
#[derive(Clone, Copy, Debug)]
pub struct FrameCodec {
    max_frame_size: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl FrameCodec {
    /// Codec with the default bound.
    pub fn new() -> Self {
        Self::default()
    }

    /// Codec that accepts frames up to `max_frame_size` total bytes.
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    /// Configured bound on total frame length.
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Encode a frame. See [`encode`].
    pub fn encode(&self, opcode: Opcode, body: &[u8]) -> Bytes {
        encode(opcode, body)
    }

    /// Decode exactly one frame from the front of `buf`.
    ///
    /// Bytes past the declared total length are ignored.
    pub fn decode(&self, buf: &[u8]) -> Result<Frame, DecodeError> {
        let header_len = usize::from(HEADER_LENGTH);
        if buf.len() < header_len {
            return Err(DecodeError::HeaderTooShort { len: buf.len() });
        }

        let mut header = &buf[..header_len];
        let declared_total = header.get_i32();
        let declared_header = header.get_u16();
        let version = header.get_u16();
        let opcode = header.get_i32();
        let sequence = header.get_i32();

        if declared_header != HEADER_LENGTH {
            return Err(DecodeError::HeaderLengthMismatch {
                declared: declared_header,
            });
        }

        let total = usize::try_from(declared_total)
            .ok()
            .filter(|total| (header_len..=self.max_frame_size).contains(total))
            .ok_or(DecodeError::LengthOutOfRange {
                declared: i64::from(declared_total),
                max: self.max_frame_size,
            })?;

        if buf.len() < total {
            return Err(DecodeError::TruncatedBody {
                declared: total,
                available: buf.len(),
            });
        }

        #[allow(clippy::cast_sign_loss)]
        let total_length = declared_total as u32;
        Ok(Frame {
            total_length,
            header_length: declared_header,
            version,
            opcode,
            sequence,
            body: Bytes::copy_from_slice(&buf[header_len..total]),
        })
    }
}

/// Encode `body` into a frame with version 0 and sequence 0.
#[allow(clippy::cast_possible_truncation)]
pub fn encode(opcode: Opcode, body: &[u8]) -> Bytes {
    let total = usize::from(HEADER_LENGTH) + body.len();
    let mut buf = BytesMut::with_capacity(total);
    buf.put_u32(total as u32);
    buf.put_u16(HEADER_LENGTH);
    buf.put_u16(PROTOCOL_VERSION);
    buf.put_i32(opcode.as_raw());
    buf.put_i32(0);
    buf.put_slice(body);
    buf.freeze()
}

/// Decode with the default length bound.
pub fn decode(buf: &[u8]) -> Result<Frame, DecodeError> {
    FrameCodec::default().decode(buf)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
