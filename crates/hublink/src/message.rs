//! Framed message model.
//!
//! A [`Message`] is the unit queued, framed, and dispatched by the
//! transport. Messages are immutable once constructed: there are no
//! mutators, so a message enqueued on a [`crate::queue::MessageQueue`]
//! cannot change under the drain path.
//!
//! Two identifiers travel with every message:
//!
//! - **serial** — transport-assigned, strictly increasing per sending
//!   transport instance ([`crate::transport::Transport::next_serial`]);
//!   orders messages from one endpoint.
//! - **token** — caller-assigned call-correlation id; replies echo the
//!   token of the call they answer.

use bytes::Bytes;

/// Kind of a framed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Method invocation; expects a reply correlated by token.
    Call,
    /// Successful reply to a call.
    Reply,
    /// Fire-and-forget broadcast event.
    Signal,
    /// Cancellation of an in-flight call.
    Cancel,
    /// Error reply to a call.
    Error,
}

impl MessageKind {
    /// Stable wire code for this kind.
    #[must_use]
    pub const fn wire_code(self) -> u8 {
        match self {
            Self::Call => 1,
            Self::Reply => 2,
            Self::Signal => 3,
            Self::Cancel => 4,
            Self::Error => 5,
        }
    }

    /// Decode a wire code, or `None` for an unknown code.
    #[must_use]
    pub const fn from_wire(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::Call),
            2 => Some(Self::Reply),
            3 => Some(Self::Signal),
            4 => Some(Self::Cancel),
            5 => Some(Self::Error),
            _ => None,
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Call => write!(f, "call"),
            Self::Reply => write!(f, "reply"),
            Self::Signal => write!(f, "signal"),
            Self::Cancel => write!(f, "cancel"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// One framed bus message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    kind: MessageKind,
    serial: u64,
    token: u32,
    category: String,
    method: String,
    payload: Bytes,
}

impl Message {
    /// Create a method call.
    pub fn call(
        serial: u64,
        token: u32,
        category: impl Into<String>,
        method: impl Into<String>,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            kind: MessageKind::Call,
            serial,
            token,
            category: category.into(),
            method: method.into(),
            payload: payload.into(),
        }
    }

    /// Create a reply to `call`, echoing its token, category, and method.
    pub fn reply_to(serial: u64, call: &Message, payload: impl Into<Bytes>) -> Self {
        Self {
            kind: MessageKind::Reply,
            serial,
            token: call.token,
            category: call.category.clone(),
            method: call.method.clone(),
            payload: payload.into(),
        }
    }

    /// Create an error reply to `call`, echoing its token, category, and
    /// method.
    pub fn error_reply_to(serial: u64, call: &Message, payload: impl Into<Bytes>) -> Self {
        Self {
            kind: MessageKind::Error,
            serial,
            token: call.token,
            category: call.category.clone(),
            method: call.method.clone(),
            payload: payload.into(),
        }
    }

    /// Create a fire-and-forget signal. Signals carry no correlation token.
    pub fn signal(
        serial: u64,
        category: impl Into<String>,
        method: impl Into<String>,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            kind: MessageKind::Signal,
            serial,
            token: 0,
            category: category.into(),
            method: method.into(),
            payload: payload.into(),
        }
    }

    /// Create a cancellation for the call identified by `token`.
    pub fn cancel(
        serial: u64,
        token: u32,
        category: impl Into<String>,
        method: impl Into<String>,
    ) -> Self {
        Self {
            kind: MessageKind::Cancel,
            serial,
            token,
            category: category.into(),
            method: method.into(),
            payload: Bytes::new(),
        }
    }

    /// Reassemble a message from decoded wire fields.
    pub(crate) fn from_wire_parts(
        kind: MessageKind,
        serial: u64,
        token: u32,
        category: String,
        method: String,
        payload: Bytes,
    ) -> Self {
        Self {
            kind,
            serial,
            token,
            category,
            method,
            payload,
        }
    }

    /// Message kind.
    #[must_use]
    pub const fn kind(&self) -> MessageKind {
        self.kind
    }

    /// Transport-assigned serial number.
    #[must_use]
    pub const fn serial(&self) -> u64 {
        self.serial
    }

    /// Caller-assigned correlation token.
    #[must_use]
    pub const fn token(&self) -> u32 {
        self.token
    }

    /// Category path as sent; not necessarily normalized.
    #[must_use]
    pub fn category(&self) -> &str {
        &self.category
    }

    /// Method name.
    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Payload bytes.
    #[must_use]
    pub const fn payload(&self) -> &Bytes {
        &self.payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_codes_round_trip() {
        for kind in [
            MessageKind::Call,
            MessageKind::Reply,
            MessageKind::Signal,
            MessageKind::Cancel,
            MessageKind::Error,
        ] {
            assert_eq!(MessageKind::from_wire(kind.wire_code()), Some(kind));
        }
        assert_eq!(MessageKind::from_wire(0), None);
        assert_eq!(MessageKind::from_wire(6), None);
    }

    #[test]
    fn test_reply_echoes_call_correlation() {
        let call = Message::call(7, 42, "/", "ping", Bytes::from_static(b"{}"));
        let reply = Message::reply_to(8, &call, Bytes::from_static(b"{\"ok\":true}"));

        assert_eq!(reply.kind(), MessageKind::Reply);
        assert_eq!(reply.serial(), 8);
        assert_eq!(reply.token(), 42);
        assert_eq!(reply.category(), "/");
        assert_eq!(reply.method(), "ping");
    }

    #[test]
    fn test_signal_carries_no_token() {
        let sig = Message::signal(3, "/power", "charging", Bytes::new());
        assert_eq!(sig.kind(), MessageKind::Signal);
        assert_eq!(sig.token(), 0);
    }

    #[test]
    fn test_cancel_has_empty_payload() {
        let cancel = Message::cancel(9, 42, "/", "ping");
        assert_eq!(cancel.kind(), MessageKind::Cancel);
        assert!(cancel.payload().is_empty());
    }
}
