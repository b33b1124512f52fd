/// Framing for the RethinkDB JSON protocol
///
/// Every message after the handshake is `token (u64 LE) | length (u32 LE) |
/// JSON payload`, in both directions.
use super::{PROTOCOL_JSON, PROTOCOL_V0_4};
use crate::error::ProtocolError;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Size of the token + length header
pub const HEADER_LEN: usize = 12;

/// Upper bound on a single payload
pub const MAX_PAYLOAD_LEN: usize = 64 * 1024 * 1024;

/// One query or response message
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub token: u64,
    pub payload: Bytes,
}

/// Frame encoder and incremental decoder
pub struct FrameCodec;

impl FrameCodec {
    /// Decode one frame from the front of `buf`.
    /// Returns `Ok(None)` and leaves `buf` untouched when more bytes are needed.
    pub fn decode(buf: &mut BytesMut) -> Result<Option<Frame>, ProtocolError> {
        if buf.len() < HEADER_LEN {
            return Ok(None);
        }

        let mut header = &buf[..HEADER_LEN];
        let token = header.get_u64_le();
        let len = header.get_u32_le() as usize;

        if len > MAX_PAYLOAD_LEN {
            return Err(ProtocolError::Frame {
                message: format!("payload of {} bytes exceeds limit of {}", len, MAX_PAYLOAD_LEN),
            });
        }

        if buf.len() < HEADER_LEN + len {
            buf.reserve(HEADER_LEN + len - buf.len());
            return Ok(None);
        }

        buf.advance(HEADER_LEN);
        let payload = buf.split_to(len).freeze();
        Ok(Some(Frame { token, payload }))
    }

    /// Append an encoded frame to `buf`
    pub fn encode(token: u64, payload: &[u8], buf: &mut BytesMut) -> Result<(), ProtocolError> {
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(ProtocolError::Frame {
                message: format!("query of {} bytes exceeds limit of {}", payload.len(), MAX_PAYLOAD_LEN),
            });
        }
        buf.reserve(HEADER_LEN + payload.len());
        buf.put_u64_le(token);
        buf.put_u32_le(payload.len() as u32);
        buf.put_slice(payload);
        Ok(())
    }
}

/// V0_4 handshake
pub struct Handshake;

impl Handshake {
    /// Handshake bytes for the given auth key (empty for no authentication)
    pub fn request(auth_key: &str) -> BytesMut {
        let mut buf = BytesMut::with_capacity(12 + auth_key.len());
        buf.put_u32_le(PROTOCOL_V0_4);
        buf.put_u32_le(auth_key.len() as u32);
        buf.put_slice(auth_key.as_bytes());
        buf.put_u32_le(PROTOCOL_JSON);
        buf
    }

    /// Parse the server's NUL-terminated reply.
    /// Returns `Ok(None)` until the terminator arrives, then the reply text.
    pub fn reply(buf: &mut BytesMut) -> Result<Option<String>, ProtocolError> {
        let end = match buf.iter().position(|b| *b == 0) {
            Some(end) => end,
            None => return Ok(None),
        };

        let line = buf.split_to(end + 1);
        let text = std::str::from_utf8(&line[..end]).map_err(|e| ProtocolError::Frame {
            message: format!("handshake reply is not UTF-8: {}", e),
        })?;
        Ok(Some(text.to_string()))
    }
}
