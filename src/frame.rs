//! WebSocket frame codec.
//!
//! Hand-rolled per RFC 6455: decode unmasks client frames and extracts text
//! payloads, encode builds unmasked server frames. Only single frames are
//! handled; fragmented messages are not reassembled.

use crate::error::{WsError, WsResult};

/// WebSocket operation codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    /// Continuation frame.
    Continuation,
    /// Text frame.
    Text,
    /// Binary frame.
    Binary,
    /// Close frame.
    Close,
    /// Ping frame.
    Ping,
    /// Pong frame.
    Pong,
}

impl OpCode {
    /// Parse an opcode from the low nibble of a frame's first byte.
    ///
    /// Returns `None` for opcodes reserved by RFC 6455; callers skip such
    /// frames rather than failing the connection.
    pub fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0x0 => Some(Self::Continuation),
            0x1 => Some(Self::Text),
            0x2 => Some(Self::Binary),
            0x8 => Some(Self::Close),
            0x9 => Some(Self::Ping),
            0xA => Some(Self::Pong),
            _ => None,
        }
    }

    /// Check if this is a control frame.
    pub fn is_control(&self) -> bool {
        matches!(self, Self::Close | Self::Ping | Self::Pong)
    }
}

impl From<OpCode> for u8 {
    fn from(value: OpCode) -> Self {
        match value {
            OpCode::Continuation => 0x0,
            OpCode::Text => 0x1,
            OpCode::Binary => 0x2,
            OpCode::Close => 0x8,
            OpCode::Ping => 0x9,
            OpCode::Pong => 0xA,
        }
    }
}

/// Outcome of decoding one inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// A complete UTF-8 text message.
    Text(String),
    /// A well-formed frame that carries no actionable message: a non-text
    /// opcode, a reserved opcode, or a text payload that is not valid UTF-8.
    Skipped,
}

/// Decode a single client frame from `buf`.
///
/// The buffer must hold the frame header, the 4-byte masking key, and the
/// full declared payload; anything shorter is a [`WsError::FrameTooShort`].
/// Never reads past `buf`.
///
/// # Errors
///
/// Returns an error if the frame is truncated, unmasked, or declares a
/// payload longer than addressable memory.
pub fn decode(buf: &[u8]) -> WsResult<Decoded> {
    if buf.len() < 2 {
        return Err(WsError::FrameTooShort {
            needed: 2,
            available: buf.len(),
        });
    }

    let opcode_bits = buf[0] & 0x0F;
    let masked = buf[1] & 0x80 != 0;
    let base_len = (buf[1] & 0x7F) as usize;

    let (payload_len, mask_offset) = match base_len {
        126 => {
            if buf.len() < 4 {
                return Err(WsError::FrameTooShort {
                    needed: 4,
                    available: buf.len(),
                });
            }
            (u16::from_be_bytes([buf[2], buf[3]]) as usize, 4)
        },
        127 => {
            if buf.len() < 10 {
                return Err(WsError::FrameTooShort {
                    needed: 10,
                    available: buf.len(),
                });
            }
            let mut len_bytes = [0u8; 8];
            len_bytes.copy_from_slice(&buf[2..10]);
            let declared = u64::from_be_bytes(len_bytes);
            let len = usize::try_from(declared).map_err(|_| WsError::PayloadTooLarge(declared))?;
            (len, 10)
        },
        n => (n, 2),
    };

    if !masked {
        return Err(WsError::UnmaskedFrame);
    }

    let payload_offset: usize = mask_offset + 4;
    let needed = payload_offset
        .checked_add(payload_len)
        .ok_or(WsError::PayloadTooLarge(payload_len as u64))?;
    if buf.len() < needed {
        return Err(WsError::FrameTooShort {
            needed,
            available: buf.len(),
        });
    }

    let mut mask_key = [0u8; 4];
    mask_key.copy_from_slice(&buf[mask_offset..mask_offset + 4]);

    let mut payload = buf[payload_offset..payload_offset + payload_len].to_vec();
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= mask_key[i % 4];
    }

    match OpCode::from_bits(opcode_bits) {
        Some(OpCode::Text) => match String::from_utf8(payload) {
            Ok(text) => Ok(Decoded::Text(text)),
            Err(_) => Ok(Decoded::Skipped),
        },
        _ => Ok(Decoded::Skipped),
    }
}

/// Encode a text payload as a single unmasked server frame.
pub fn encode_text(text: &str) -> Vec<u8> {
    encode(OpCode::Text, text.as_bytes())
}

/// Encode a binary payload as a single unmasked server frame.
pub fn encode_binary(payload: &[u8]) -> Vec<u8> {
    encode(OpCode::Binary, payload)
}

/// Build an unmasked frame with FIN set.
fn encode(opcode: OpCode, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(payload.len() + 10);
    frame.push(0x80 | u8::from(opcode));

    let len = payload.len();
    if len < 126 {
        frame.push(len as u8);
    } else if len <= 65535 {
        frame.push(126);
        frame.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        frame.push(127);
        frame.extend_from_slice(&(len as u64).to_be_bytes());
    }

    frame.extend_from_slice(payload);
    frame
}
