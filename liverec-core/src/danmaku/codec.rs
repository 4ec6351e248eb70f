//! Danmaku wire format.
//!
//! Every packet starts with a 16-byte big-endian header:
//!
//! ```text
//! [total_length u32][header_length u16][protocol_version u16][operation u32][sequence u32]
//! ```
//!
//! followed by `total_length - header_length` payload bytes. A single
//! WebSocket message may hold several packets back to back, and a message
//! packet (operation 5) compressed with zlib (version 2) or brotli
//! (version 3) inflates to yet another run of packets.

use std::io::Read;

use byteorder::{BigEndian, ByteOrder};
use bytes::{BufMut, Bytes, BytesMut};
use flate2::read::ZlibDecoder;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, trace, warn};

use super::event::DecodedEvent;

pub const HEADER_LEN: usize = 16;

/// Compression levels a message packet may be nested through
pub const MAX_NESTING_DEPTH: usize = 8;

/// Upper bound for one inflated payload (16 MB)
pub const MAX_DECOMPRESSED_SIZE: u64 = 16 * 1024 * 1024;

/// Operation codes
pub mod op {
    pub const HEARTBEAT: u32 = 2;
    pub const HEARTBEAT_REPLY: u32 = 3;
    pub const MESSAGE: u32 = 5;
    pub const AUTH: u32 = 7;
    pub const AUTH_REPLY: u32 = 8;
}

/// Payload encodings
pub mod protover {
    /// Plain JSON body
    pub const JSON: u16 = 0;
    /// Control packets (heartbeat, auth); a message body here is still JSON
    pub const CONTROL: u16 = 1;
    pub const ZLIB: u16 = 2;
    pub const BROTLI: u16 = 3;
}

#[derive(Debug, Error)]
enum FrameError {
    #[error("header length {header_length} outside 16..={total_length}")]
    BadHeaderLength { header_length: u16, total_length: u32 },
    #[error("decompression failed: {0}")]
    Decompress(#[from] std::io::Error),
    #[error("inflated payload exceeds {MAX_DECOMPRESSED_SIZE} bytes")]
    TooLarge,
    #[error("invalid JSON body: {0}")]
    Json(#[from] serde_json::Error),
    #[error("nesting deeper than {MAX_NESTING_DEPTH} levels")]
    DepthExceeded,
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u16),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub total_length: u32,
    pub header_length: u16,
    pub protocol_version: u16,
    pub operation: u32,
    pub sequence: u32,
}

impl FrameHeader {
    /// Header for a payload of `payload_len` bytes
    #[must_use]
    pub fn new(operation: u32, protocol_version: u16, sequence: u32, payload_len: usize) -> Self {
        Self {
            total_length: (HEADER_LEN + payload_len) as u32,
            header_length: HEADER_LEN as u16,
            protocol_version,
            operation,
            sequence,
        }
    }

    /// Read the fixed header fields; `None` if fewer than 16 bytes are available.
    #[must_use]
    pub fn parse(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_LEN {
            return None;
        }
        Some(Self {
            total_length: BigEndian::read_u32(&buf[0..4]),
            header_length: BigEndian::read_u16(&buf[4..6]),
            protocol_version: BigEndian::read_u16(&buf[6..8]),
            operation: BigEndian::read_u32(&buf[8..12]),
            sequence: BigEndian::read_u32(&buf[12..16]),
        })
    }

    pub fn write_to(&self, buf: &mut BytesMut) {
        buf.put_u32(self.total_length);
        buf.put_u16(self.header_length);
        buf.put_u16(self.protocol_version);
        buf.put_u32(self.operation);
        buf.put_u32(self.sequence);
    }
}

/// Encode one packet: header followed by `payload`.
#[must_use]
pub fn encode_frame(operation: u32, protocol_version: u16, sequence: u32, payload: &[u8]) -> Bytes {
    let header = FrameHeader::new(operation, protocol_version, sequence, payload.len());
    let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
    header.write_to(&mut buf);
    buf.put_slice(payload);
    buf.freeze()
}

/// Empty heartbeat packet
#[must_use]
pub fn heartbeat_frame() -> Bytes {
    encode_frame(op::HEARTBEAT, protover::CONTROL, 1, &[])
}

/// Body of the auth packet sent right after connecting
#[derive(Debug, Clone, Serialize)]
pub struct AuthBody<'a> {
    pub uid: u64,
    pub roomid: u64,
    pub protover: u16,
    pub platform: &'a str,
    #[serde(rename = "type")]
    pub kind: u8,
    pub key: &'a str,
}

impl<'a> AuthBody<'a> {
    /// Anonymous web-client auth requesting zlib-compressed message packets
    #[must_use]
    pub const fn web(room_id: u64, key: &'a str) -> Self {
        Self {
            uid: 0,
            roomid: room_id,
            protover: protover::ZLIB,
            platform: "web",
            kind: 2,
            key,
        }
    }
}

/// Auth packet carrying `body` as JSON
pub fn auth_frame(body: &AuthBody<'_>) -> Result<Bytes, serde_json::Error> {
    let json = serde_json::to_vec(body)?;
    Ok(encode_frame(op::AUTH, protover::CONTROL, 1, &json))
}

/// Decode every command event in one received buffer.
///
/// Never fails: a packet that cannot be decoded is skipped and decoding
/// resumes at the next packet boundary. A packet whose declared length runs
/// past the end of the buffer ends decoding of that buffer.
#[must_use]
pub fn decode_frames(blob: &[u8]) -> Vec<DecodedEvent> {
    let mut events = Vec::new();
    decode_into(blob, 0, &mut events);
    events
}

fn decode_into(blob: &[u8], depth: usize, out: &mut Vec<DecodedEvent>) {
    let mut offset = 0usize;

    while let Some(header) = FrameHeader::parse(&blob[offset..]) {
        let total = header.total_length as usize;
        if total < HEADER_LEN {
            // no way to find the next boundary
            debug!(offset, total, "Packet shorter than its header, dropping rest of buffer");
            return;
        }
        let Some(frame) = blob.get(offset..offset + total) else {
            debug!(
                offset,
                total,
                available = blob.len() - offset,
                "Truncated packet, dropping rest of buffer"
            );
            return;
        };

        if let Err(e) = decode_frame(&header, frame, depth, out) {
            if matches!(e, FrameError::DepthExceeded) {
                warn!(depth, "Packet nesting too deep, dropping nested payload");
            } else {
                debug!(
                    error = %e,
                    operation = header.operation,
                    protocol_version = header.protocol_version,
                    "Skipping undecodable packet"
                );
            }
        }

        offset += total;
    }

    if offset < blob.len() {
        trace!(trailing = blob.len() - offset, "Ignoring trailing bytes");
    }
}

fn decode_frame(
    header: &FrameHeader,
    frame: &[u8],
    depth: usize,
    out: &mut Vec<DecodedEvent>,
) -> Result<(), FrameError> {
    if header.operation != op::MESSAGE {
        trace!(operation = header.operation, "Control packet");
        return Ok(());
    }

    let header_length = header.header_length as usize;
    if header_length < HEADER_LEN || header_length > frame.len() {
        return Err(FrameError::BadHeaderLength {
            header_length: header.header_length,
            total_length: header.total_length,
        });
    }
    let payload = &frame[header_length..];

    match header.protocol_version {
        protover::JSON | protover::CONTROL => {
            let value: Value = serde_json::from_slice(payload)?;
            out.push(DecodedEvent::from_payload(value));
        }
        protover::ZLIB | protover::BROTLI => {
            if depth + 1 > MAX_NESTING_DEPTH {
                return Err(FrameError::DepthExceeded);
            }
            let inflated = if header.protocol_version == protover::ZLIB {
                inflate(ZlibDecoder::new(payload))?
            } else {
                inflate(brotli::Decompressor::new(payload, 4096))?
            };
            decode_into(&inflated, depth + 1, out);
        }
        other => return Err(FrameError::UnsupportedVersion(other)),
    }

    Ok(())
}

fn inflate(reader: impl Read) -> Result<Vec<u8>, FrameError> {
    let mut inflated = Vec::new();
    reader
        .take(MAX_DECOMPRESSED_SIZE + 1)
        .read_to_end(&mut inflated)?;
    if inflated.len() as u64 > MAX_DECOMPRESSED_SIZE {
        return Err(FrameError::TooLarge);
    }
    Ok(inflated)
}
