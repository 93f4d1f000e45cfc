//! Frame encoding and decoding for the client side of RFC 6455.
//!
//! Outgoing frames are always masked. Incoming frames come from the server
//! and must never be masked.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};
use crate::protocol::OpCode;
use crate::protocol::mask::apply_mask;

/// Maximum payload size for control frames (RFC 6455).
pub const MAX_CONTROL_FRAME_PAYLOAD: usize = 125;

/// Decoded fixed part of a frame header.
#[derive(Debug, Clone, Copy)]
struct FrameHeader {
    fin: bool,
    rsv: u8,
    opcode: OpCode,
    masked: bool,
    payload_len: u64,
    header_len: usize,
}

/// Read the header at the start of `buf`.
///
/// # Errors
///
/// - `Error::IncompleteFrame` if the header is not fully buffered
/// - `Error::ReservedOpcode` for reserved opcodes
fn parse_header(buf: &[u8]) -> Result<FrameHeader> {
    if buf.len() < 2 {
        return Err(Error::IncompleteFrame {
            needed: 2 - buf.len(),
        });
    }

    let fin = buf[0] & 0x80 != 0;
    let rsv = buf[0] & 0x70;
    let opcode = OpCode::try_from(buf[0] & 0x0F)?;
    let masked = buf[1] & 0x80 != 0;

    let (payload_len, len_size) = match buf[1] & 0x7F {
        126 => {
            if buf.len() < 4 {
                return Err(Error::IncompleteFrame {
                    needed: 4 - buf.len(),
                });
            }
            (u64::from(u16::from_be_bytes([buf[2], buf[3]])), 2)
        }
        127 => {
            if buf.len() < 10 {
                return Err(Error::IncompleteFrame {
                    needed: 10 - buf.len(),
                });
            }
            let mut len = [0u8; 8];
            len.copy_from_slice(&buf[2..10]);
            (u64::from_be_bytes(len), 8)
        }
        short => (u64::from(short), 0),
    };

    let header_len = 2 + len_size + if masked { 4 } else { 0 };

    Ok(FrameHeader {
        fin,
        rsv,
        opcode,
        masked,
        payload_len,
        header_len,
    })
}

/// A single WebSocket frame.
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-------+-+-------------+-------------------------------+
/// |F|R|R|R| opcode |M| Payload len |    Extended payload length    |
/// |I|S|S|S|  (4)   |A|     (7)     |             (16/64)           |
/// |N|V|V|V|       |S|             |   (if payload len==126/127)   |
/// +-+-+-+-+-------+-+-------------+-------------------------------+
/// |                 Masking key (client frames only)              |
/// +---------------------------------------------------------------+
/// |                     Payload data                              |
/// +---------------------------------------------------------------+
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Final fragment flag.
    pub fin: bool,
    /// Frame opcode.
    pub opcode: OpCode,
    payload: Bytes,
}

impl Frame {
    /// Create a frame.
    #[must_use]
    pub fn new(fin: bool, opcode: OpCode, payload: impl Into<Bytes>) -> Self {
        Self {
            fin,
            opcode,
            payload: payload.into(),
        }
    }

    /// Create a final text frame.
    #[must_use]
    pub fn text(data: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Text, data)
    }

    /// Create a close frame. The reason is only sent together with a code.
    #[must_use]
    pub fn close(code: Option<u16>, reason: &str) -> Self {
        let mut payload = BytesMut::new();
        if let Some(code) = code {
            payload.put_u16(code);
            payload.extend_from_slice(reason.as_bytes());
        }
        Self::new(true, OpCode::Close, payload.freeze())
    }

    /// Create a pong frame.
    #[must_use]
    pub fn pong(data: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Pong, data)
    }

    /// Payload bytes.
    #[inline]
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Take ownership of the payload.
    #[must_use]
    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    /// Parse a server frame from the front of `buf`.
    ///
    /// Returns the frame and the number of bytes it occupied. Size limits are
    /// checked against the header before the payload has arrived, so an
    /// oversized frame is rejected without buffering it.
    ///
    /// # Errors
    ///
    /// - `Error::IncompleteFrame` if more bytes are needed
    /// - `Error::MaskedServerFrame` if the mask bit is set
    /// - `Error::ReservedBitsSet`, `Error::FragmentedControlFrame`,
    ///   `Error::ControlFrameTooLarge` for RFC violations
    /// - `Error::FrameTooLarge` if the payload exceeds `max_frame_size`
    pub fn parse(buf: &[u8], max_frame_size: usize) -> Result<(Self, usize)> {
        let header = parse_header(buf)?;

        if header.masked {
            return Err(Error::MaskedServerFrame);
        }
        if header.rsv != 0 {
            return Err(Error::ReservedBitsSet);
        }
        if header.opcode.is_control() {
            if !header.fin {
                return Err(Error::FragmentedControlFrame);
            }
            if header.payload_len > MAX_CONTROL_FRAME_PAYLOAD as u64 {
                return Err(Error::ControlFrameTooLarge(
                    usize::try_from(header.payload_len).unwrap_or(usize::MAX),
                ));
            }
        }
        if header.payload_len > max_frame_size as u64 {
            return Err(Error::FrameTooLarge {
                size: header.payload_len,
                max: max_frame_size,
            });
        }

        // Bounded by max_frame_size above, so this fits in usize.
        let payload_len = header.payload_len as usize;
        let total = header.header_len + payload_len;
        if buf.len() < total {
            return Err(Error::IncompleteFrame {
                needed: total - buf.len(),
            });
        }

        let payload = Bytes::copy_from_slice(&buf[header.header_len..total]);
        Ok((Self::new(header.fin, header.opcode, payload), total))
    }

    /// Check the outgoing frame against the RFC 6455 control frame rules.
    ///
    /// # Errors
    ///
    /// - `Error::FragmentedControlFrame` if a control frame has FIN=0
    /// - `Error::ControlFrameTooLarge` if a control payload exceeds 125 bytes
    pub fn validate(&self) -> Result<()> {
        if self.opcode.is_control() {
            if !self.fin {
                return Err(Error::FragmentedControlFrame);
            }
            if self.payload.len() > MAX_CONTROL_FRAME_PAYLOAD {
                return Err(Error::ControlFrameTooLarge(self.payload.len()));
            }
        }
        Ok(())
    }

    /// Size of this frame on the wire when sent by a client.
    #[must_use]
    pub fn wire_size(&self) -> usize {
        let len = self.payload.len();
        let len_size = if len <= 125 {
            0
        } else if len <= 0xFFFF {
            2
        } else {
            8
        };
        2 + len_size + 4 + len
    }

    /// Append the frame to `dst`, masked with `mask`.
    pub fn encode_masked(&self, dst: &mut BytesMut, mask: [u8; 4]) {
        dst.reserve(self.wire_size());

        let mut byte0 = u8::from(self.opcode);
        if self.fin {
            byte0 |= 0x80;
        }
        dst.put_u8(byte0);

        let len = self.payload.len();
        if len <= 125 {
            dst.put_u8(0x80 | len as u8);
        } else if len <= 0xFFFF {
            dst.put_u8(0x80 | 126);
            dst.put_u16(len as u16);
        } else {
            dst.put_u8(0x80 | 127);
            dst.put_u64(len as u64);
        }
        dst.put_slice(&mask);

        let start = dst.len();
        dst.extend_from_slice(&self.payload);
        apply_mask(&mut dst[start..], mask);
    }
}
