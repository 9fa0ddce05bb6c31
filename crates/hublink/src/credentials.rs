//! Peer credential snapshots.
//!
//! Captured once at client creation and immutable afterwards. Retrieval is
//! best-effort: a client whose credentials cannot be read is still created,
//! with every field unset, and the failure is logged by the caller. Remote
//! (networked) transports never attempt retrieval.

use std::os::fd::AsFd;

use crate::error::{TransportError, TransportResult};

/// Identity of the peer process at the other end of a connection.
///
/// `pid`/`uid`/`gid` come from the OS (`SO_PEERCRED` on Linux) and are
/// `None` when retrieval failed or was never attempted. The trust label is
/// client-supplied at connection-accept time and carries no OS guarantee.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pid: Option<i32>,
    uid: Option<u32>,
    gid: Option<u32>,
    trust_label: Option<String>,
}

impl Credentials {
    /// A snapshot with every field unset.
    #[must_use]
    pub fn unset() -> Self {
        Self::default()
    }

    /// Read the peer's pid/uid/gid from a connected local socket.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::CredentialUnavailable`] if the socket does
    /// not support peer credentials or the platform has no retrieval
    /// primitive. Callers treat this as non-fatal.
    #[cfg(any(target_os = "linux", target_os = "android"))]
    pub fn from_fd(fd: &impl AsFd) -> TransportResult<Self> {
        use nix::sys::socket::{getsockopt, sockopt::PeerCredentials};

        let creds = getsockopt(fd, PeerCredentials).map_err(|errno| {
            TransportError::CredentialUnavailable {
                reason: format!("SO_PEERCRED: {errno}"),
            }
        })?;

        Ok(Self {
            pid: Some(creds.pid()),
            uid: Some(creds.uid()),
            gid: Some(creds.gid()),
            trust_label: None,
        })
    }

    /// Read the peer's pid/uid/gid from a connected local socket.
    ///
    /// # Errors
    ///
    /// Always fails on this platform; callers treat this as non-fatal.
    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    pub fn from_fd(_fd: &impl AsFd) -> TransportResult<Self> {
        Err(TransportError::CredentialUnavailable {
            reason: "peer credential retrieval is not supported on this platform".to_string(),
        })
    }

    /// Attach the client-supplied trust label to this snapshot.
    #[must_use]
    pub fn with_trust_label(mut self, label: impl Into<String>) -> Self {
        self.trust_label = Some(label.into());
        self
    }

    /// Peer process id, if captured.
    #[must_use]
    pub const fn pid(&self) -> Option<i32> {
        self.pid
    }

    /// Peer user id, if captured.
    #[must_use]
    pub const fn uid(&self) -> Option<u32> {
        self.uid
    }

    /// Peer group id, if captured.
    #[must_use]
    pub const fn gid(&self) -> Option<u32> {
        self.gid
    }

    /// Client-supplied trust label, if any.
    #[must_use]
    pub fn trust_label(&self) -> Option<&str> {
        self.trust_label.as_deref()
    }

    /// Returns `true` when no OS identity was captured.
    #[must_use]
    pub const fn is_unset(&self) -> bool {
        self.pid.is_none() && self.uid.is_none() && self.gid.is_none()
    }
}
