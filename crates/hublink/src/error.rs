//! Error taxonomy for the bus transport layer.
//!
//! Every failure the transport reports to the binding layer is a
//! [`TransportError`]. Each variant carries a stable symbolic message id
//! (see [`TransportError::message_id`]) alongside human-readable text, so
//! callers can branch on the failure class without parsing strings.
//!
//! Dispatch outcomes that are converted into error replies on the wire
//! (`UnknownMethod`, `NotHandled`) render with the exact text the peer
//! receives; see [`crate::service`].

use std::io;

use thiserror::Error;

/// Maximum frame body size in bytes (16 MiB).
///
/// A length prefix above this value is rejected before any allocation to
/// prevent memory exhaustion by a misbehaving peer.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Maximum length in bytes of a category path or method name on the wire.
///
/// Both strings are carried behind 16-bit length fields.
pub const MAX_NAME_LEN: usize = u16::MAX as usize;

/// Errors reported by the transport and dispatch layer.
///
/// # Error Classification
///
/// - **Registration errors**: `InvalidHandle`, `CategoryAlreadyRegistered`,
///   `CategoryNotRegistered`
/// - **Dispatch failures**: `UnknownMethod`, `NotHandled` — converted by the
///   dispatcher's caller into error replies, never propagated as
///   process-level errors
/// - **Resource errors**: `ResourceExhausted`, `Io`
/// - **Wire errors**: `ProtocolViolation`
/// - **Best-effort failures**: `CredentialUnavailable` — logged, never fatal
#[derive(Debug, Error)]
pub enum TransportError {
    /// Operation attempted on an uninitialized or unregistered service
    /// handle.
    #[error("service handle is not registered")]
    InvalidHandle,

    /// A non-append registration named a category path that already has a
    /// table on this handle.
    #[error("category {category:?} already registered")]
    CategoryAlreadyRegistered {
        /// Normalized category path.
        category: String,
    },

    /// A lookup (e.g. `set_category_data`) named a category path with no
    /// registered table.
    #[error("category {category:?} not registered")]
    CategoryNotRegistered {
        /// Normalized category path.
        category: String,
    },

    /// An inbound call named a method not present in the resolved category.
    ///
    /// The display text is wire-visible: the dispatcher's caller copies it
    /// verbatim into the error reply sent back to the peer.
    #[error("Unknown method {method:?} for category {category:?}")]
    UnknownMethod {
        /// Method name from the call.
        method: String,
        /// Normalized category path.
        category: String,
    },

    /// The resolved handler ran but declined to consider the message
    /// processed.
    ///
    /// Like `UnknownMethod`, the display text is copied into the error
    /// reply.
    #[error("Method {method:?} for category {category:?} was not handled")]
    NotHandled {
        /// Method name from the call.
        method: String,
        /// Normalized category path.
        category: String,
    },

    /// Allocation failure while creating a client, channel, or queue.
    #[error("resource exhausted: {what}")]
    ResourceExhausted {
        /// Which resource could not be acquired.
        what: String,
    },

    /// Peer credentials could not be retrieved.
    ///
    /// Non-fatal: the client is still created with unset credential fields
    /// and the failure is logged.
    #[error("peer credentials unavailable: {reason}")]
    CredentialUnavailable {
        /// Why retrieval failed.
        reason: String,
    },

    /// Malformed frame on the wire.
    #[error("protocol violation: {reason}")]
    ProtocolViolation {
        /// Description of the framing error.
        reason: String,
    },

    /// Underlying I/O error from the channel's descriptor.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl TransportError {
    /// Create a protocol violation error.
    pub fn protocol_violation(reason: impl Into<String>) -> Self {
        Self::ProtocolViolation {
            reason: reason.into(),
        }
    }

    /// Create a protocol violation for a frame whose length prefix exceeds
    /// [`MAX_FRAME_SIZE`].
    #[must_use]
    pub fn frame_too_large(size: usize) -> Self {
        Self::ProtocolViolation {
            reason: format!("frame of {size} bytes exceeds maximum {MAX_FRAME_SIZE} bytes"),
        }
    }

    /// Create a resource exhaustion error.
    pub fn resource_exhausted(what: impl Into<String>) -> Self {
        Self::ResourceExhausted { what: what.into() }
    }

    /// Stable symbolic message id for this error.
    ///
    /// Ids never change across releases; callers may log or match on them.
    #[must_use]
    pub const fn message_id(&self) -> &'static str {
        match self {
            Self::InvalidHandle => "BUS_INVALID_HANDLE",
            Self::CategoryAlreadyRegistered { .. } => "BUS_CATEGORY_REGISTERED",
            Self::CategoryNotRegistered { .. } => "BUS_NO_CATEGORY",
            Self::UnknownMethod { .. } => "BUS_UNKNOWN_METHOD",
            Self::NotHandled { .. } => "BUS_NOT_HANDLED",
            Self::ResourceExhausted { .. } => "BUS_RESOURCE_EXHAUSTED",
            Self::CredentialUnavailable { .. } => "BUS_NO_CREDENTIALS",
            Self::ProtocolViolation { .. } => "BUS_PROTOCOL_VIOLATION",
            Self::Io(_) => "BUS_IO_ERROR",
        }
    }

    /// Returns `true` if this error indicates a malformed frame from the
    /// peer. The connection should be treated as suspect and usually closed.
    #[must_use]
    pub const fn is_protocol_violation(&self) -> bool {
        matches!(self, Self::ProtocolViolation { .. })
    }

    /// Returns `true` if this error is a dispatch failure that the caller
    /// converts into an error reply rather than propagating.
    #[must_use]
    pub const fn is_dispatch_failure(&self) -> bool {
        matches!(self, Self::UnknownMethod { .. } | Self::NotHandled { .. })
    }
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_method_text_is_wire_exact() {
        let err = TransportError::UnknownMethod {
            method: "ping".to_string(),
            category: "/".to_string(),
        };
        assert_eq!(err.to_string(), r#"Unknown method "ping" for category "/""#);
        assert!(err.is_dispatch_failure());
    }

    #[test]
    fn test_not_handled_text() {
        let err = TransportError::NotHandled {
            method: "ping".to_string(),
            category: "/status".to_string(),
        };
        assert_eq!(
            err.to_string(),
            r#"Method "ping" for category "/status" was not handled"#
        );
        assert!(err.is_dispatch_failure());
    }

    #[test]
    fn test_message_ids_are_stable() {
        assert_eq!(TransportError::InvalidHandle.message_id(), "BUS_INVALID_HANDLE");
        assert_eq!(
            TransportError::CategoryAlreadyRegistered {
                category: "/".into()
            }
            .message_id(),
            "BUS_CATEGORY_REGISTERED"
        );
        assert_eq!(
            TransportError::protocol_violation("x").message_id(),
            "BUS_PROTOCOL_VIOLATION"
        );
        assert_eq!(
            TransportError::resource_exhausted("fd").message_id(),
            "BUS_RESOURCE_EXHAUSTED"
        );
    }

    #[test]
    fn test_frame_too_large_mentions_both_sizes() {
        let err = TransportError::frame_too_large(20_000_000);
        assert!(err.is_protocol_violation());
        let msg = err.to_string();
        assert!(msg.contains("20000000"));
        assert!(msg.contains(&MAX_FRAME_SIZE.to_string()));
    }

    #[test]
    fn test_io_error_wrapping() {
        let io_err = io::Error::new(io::ErrorKind::ConnectionRefused, "refused");
        let err = TransportError::from(io_err);
        assert_eq!(err.message_id(), "BUS_IO_ERROR");
        assert!(!err.is_protocol_violation());
        assert!(!err.is_dispatch_failure());
    }
}
