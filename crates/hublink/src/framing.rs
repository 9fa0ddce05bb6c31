//! Length-prefixed wire framing.
//!
//! Each message travels as one frame:
//!
//! ```text
//! +-----------+------+--------+-------+---------+----------+------------+---------+---------+
//! | len (u32) | kind | serial | token | cat_len | category | method_len | method  | payload |
//! |           | (u8) | (u64)  | (u32) | (u16)   | (bytes)  | (u16)      | (bytes) | (rest)  |
//! +-----------+------+--------+-------+---------+----------+------------+---------+---------+
//! ```
//!
//! All integers are big-endian. `len` counts every byte after the prefix
//! and is validated against [`MAX_FRAME_SIZE`] before any allocation.
//!
//! # Malformed Frames
//!
//! A frame whose body does not parse (unknown kind, truncated field,
//! non-UTF-8 name) is consumed whole — the length prefix delimits it — so
//! the error never corrupts later frames in the stream. A length prefix
//! above the size cap is different: the stream position can no longer be
//! trusted, the decoder poisons itself, and the channel must be closed.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{TransportError, TransportResult, MAX_FRAME_SIZE, MAX_NAME_LEN};
use crate::message::{Message, MessageKind};

/// Fixed bytes per body before the variable-length fields: kind, serial,
/// token, and the two name-length fields.
const FIXED_BODY_LEN: usize = 1 + 8 + 4 + 2 + 2;

/// Length-prefix bytes per frame.
const LEN_PREFIX: usize = 4;

/// Encode a message into a single frame, prefix included.
///
/// # Errors
///
/// Returns [`TransportError::ProtocolViolation`] if the category or method
/// exceeds [`MAX_NAME_LEN`] or the resulting body would exceed
/// [`MAX_FRAME_SIZE`].
pub fn encode_frame(message: &Message) -> TransportResult<BytesMut> {
    let category = message.category().as_bytes();
    let method = message.method().as_bytes();

    if category.len() > MAX_NAME_LEN {
        return Err(TransportError::protocol_violation(format!(
            "category path of {} bytes exceeds maximum {MAX_NAME_LEN} bytes",
            category.len()
        )));
    }
    if method.len() > MAX_NAME_LEN {
        return Err(TransportError::protocol_violation(format!(
            "method name of {} bytes exceeds maximum {MAX_NAME_LEN} bytes",
            method.len()
        )));
    }

    let body_len = FIXED_BODY_LEN + category.len() + method.len() + message.payload().len();
    if body_len > MAX_FRAME_SIZE {
        return Err(TransportError::frame_too_large(body_len));
    }

    let mut buf = BytesMut::with_capacity(LEN_PREFIX + body_len);
    buf.put_u32(body_len as u32);
    buf.put_u8(message.kind().wire_code());
    buf.put_u64(message.serial());
    buf.put_u32(message.token());
    buf.put_u16(category.len() as u16);
    buf.put_slice(category);
    buf.put_u16(method.len() as u16);
    buf.put_slice(method);
    buf.put_slice(message.payload());
    Ok(buf)
}

/// Incremental frame decoder over a byte stream.
///
/// Feed raw socket bytes with [`extend`](Self::extend) and pull complete
/// messages with [`decode_next`](Self::decode_next). Partial frames stay
/// buffered until more bytes arrive.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: BytesMut,
    poisoned: bool,
}

impl FrameDecoder {
    /// Create an empty decoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append raw bytes from the wire.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Bytes currently buffered but not yet decoded.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Returns `true` once an oversized length prefix has been seen.
    ///
    /// A poisoned decoder can no longer locate frame boundaries; the owning
    /// channel must be closed.
    #[must_use]
    pub const fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Decode the next complete frame, if one is buffered.
    ///
    /// Returns `Ok(None)` when more bytes are needed.
    ///
    /// # Errors
    ///
    /// - [`TransportError::ProtocolViolation`] for a malformed body; the
    ///   frame is consumed and subsequent frames decode normally.
    /// - [`TransportError::ProtocolViolation`] (unrecoverable) for an
    ///   oversized length prefix, and on every call thereafter.
    pub fn decode_next(&mut self) -> TransportResult<Option<Message>> {
        if self.poisoned {
            return Err(TransportError::protocol_violation(
                "frame stream poisoned by oversized length prefix",
            ));
        }

        if self.buf.len() < LEN_PREFIX {
            return Ok(None);
        }

        let body_len =
            u32::from_be_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]) as usize;
        if body_len > MAX_FRAME_SIZE {
            self.poisoned = true;
            return Err(TransportError::frame_too_large(body_len));
        }
        if self.buf.len() < LEN_PREFIX + body_len {
            return Ok(None);
        }

        self.buf.advance(LEN_PREFIX);
        let body = self.buf.split_to(body_len).freeze();
        parse_body(body).map(Some)
    }
}

/// Parse one frame body. The body is already severed from the stream, so
/// failure here cannot desynchronize later frames.
fn parse_body(mut body: Bytes) -> TransportResult<Message> {
    if body.remaining() < FIXED_BODY_LEN {
        return Err(TransportError::protocol_violation(format!(
            "frame body of {} bytes is shorter than the {FIXED_BODY_LEN}-byte minimum",
            body.remaining()
        )));
    }

    let kind_code = body.get_u8();
    let kind = MessageKind::from_wire(kind_code).ok_or_else(|| {
        TransportError::protocol_violation(format!("unknown message kind {kind_code}"))
    })?;
    let serial = body.get_u64();
    let token = body.get_u32();

    let category = take_name(&mut body, "category")?;
    let method = take_name(&mut body, "method")?;
    let payload = body;

    Ok(Message::from_wire_parts(
        kind, serial, token, category, method, payload,
    ))
}

/// Read one u16-prefixed UTF-8 string field from the body.
fn take_name(body: &mut Bytes, field: &str) -> TransportResult<String> {
    if body.remaining() < 2 {
        return Err(TransportError::protocol_violation(format!(
            "frame truncated before {field} length"
        )));
    }
    let len = body.get_u16() as usize;
    if body.remaining() < len {
        return Err(TransportError::protocol_violation(format!(
            "frame truncated inside {field}: need {len} bytes, have {}",
            body.remaining()
        )));
    }
    String::from_utf8(body.split_to(len).to_vec()).map_err(|_| {
        TransportError::protocol_violation(format!("{field} is not valid UTF-8"))
    })
}
