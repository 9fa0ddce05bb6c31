//! Client: the shared-ownership unit representing one peer connection.
//!
//! A [`Client`] bundles the peer's identity, its credential snapshot, the
//! channel driving its descriptor, and its incoming/outgoing queues.
//!
//! # Ownership
//!
//! Clients are handed out as `Arc<Client>`. At least three independent
//! subsystems hold handles with non-nested lifetimes — the transport
//! consumer's own bookkeeping, any in-flight pending-call record, and a
//! dispatch currently running a handler for a message from this client —
//! so single-owner deletion is not expressible. Acquiring a reference is
//! `Arc::clone`; releasing is dropping the handle; the client is torn down
//! exactly when the last handle drops. The transport's directory entry is
//! a `Weak` back-reference and keeps nothing alive.
//!
//! Because a dispatch in progress holds its own handle, teardown racing an
//! in-flight dispatch is safe by construction: the object cannot be freed
//! out from under the handler.

use std::os::fd::OwnedFd;
use std::sync::{Arc, Mutex, Weak};

use tracing::{debug, warn};

use crate::channel::{Channel, ChannelState, FlushStatus};
use crate::credentials::Credentials;
use crate::error::TransportResult;
use crate::queue::MessageQueue;
use crate::transport::{Transport, TransportMode};

/// Connection state of a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// Freshly allocated, not yet connected.
    Invalid,
    /// Connection establishment in progress.
    Connecting,
    /// Fully connected; traffic flows.
    Connected,
    /// Teardown initiated; no new traffic accepted.
    ShuttingDown,
    /// Peer is gone; queues may still drain.
    Disconnected,
}

/// Parameters for creating a client.
///
/// `unique_name` is the hub-assigned connection name and is always
/// required; everything else has a default.
#[derive(Debug, Default)]
pub struct ClientConfig {
    unique_name: String,
    service_name: Option<String>,
    initiator: bool,
    dynamic: bool,
    trust_label: Option<String>,
    priority: i32,
    outgoing: Option<MessageQueue>,
}

impl ClientConfig {
    /// Start a config for the connection with the given hub-assigned
    /// unique name.
    pub fn new(unique_name: impl Into<String>) -> Self {
        Self {
            unique_name: unique_name.into(),
            ..Self::default()
        }
    }

    /// Set the registered service name of the peer, when known.
    #[must_use]
    pub fn with_service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = Some(name.into());
        self
    }

    /// Mark this end as the one that initiated the connection.
    #[must_use]
    pub const fn with_initiator(mut self, initiator: bool) -> Self {
        self.initiator = initiator;
        self
    }

    /// Mark the peer as a dynamically launched service.
    #[must_use]
    pub const fn with_dynamic(mut self, dynamic: bool) -> Self {
        self.dynamic = dynamic;
        self
    }

    /// Attach a client-supplied trust label to the credential snapshot.
    #[must_use]
    pub fn with_trust_label(mut self, label: impl Into<String>) -> Self {
        self.trust_label = Some(label.into());
        self
    }

    /// Scheduling priority hint for the channel.
    #[must_use]
    pub const fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Adopt an existing outgoing queue instead of allocating a fresh one
    /// (e.g. sends queued while the connection was still being set up).
    #[must_use]
    pub fn with_outgoing(mut self, outgoing: MessageQueue) -> Self {
        self.outgoing = Some(outgoing);
        self
    }
}

/// Result of a read-side readiness callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiveSummary {
    /// Messages delivered to the incoming queue by this call.
    pub delivered: usize,
    /// `true` if the peer hung up during this call.
    pub disconnected: bool,
}

/// One peer connection.
#[derive(Debug)]
pub struct Client {
    unique_name: String,
    service_name: Option<String>,
    initiator: bool,
    dynamic: bool,
    credentials: Credentials,
    channel: Channel,
    outgoing: MessageQueue,
    incoming: MessageQueue,
    receive_gate: Mutex<()>,
    flush_gate: Mutex<()>,
    state: Mutex<ClientState>,
    transport: Weak<Transport>,
}

impl Client {
    /// Build a client on a connected descriptor. Called through
    /// [`Transport::create_client`].
    ///
    /// Credential capture is attempted only on local transports and is
    /// best-effort: failure is logged and the client is created with unset
    /// credentials. Any hard failure releases every resource acquired so
    /// far (the descriptor included) before returning.
    pub(crate) fn new(
        transport: &Arc<Transport>,
        fd: OwnedFd,
        config: ClientConfig,
    ) -> TransportResult<Arc<Self>> {
        // Channel owns the fd from here on; an error below drops it.
        let channel = Channel::new(fd, config.priority)?;

        let mut credentials = match transport.mode() {
            TransportMode::Local => match Credentials::from_fd(&channel.as_fd()) {
                Ok(creds) => creds,
                Err(e) => {
                    warn!(
                        unique_name = %config.unique_name,
                        error = %e,
                        "peer credentials unavailable"
                    );
                    Credentials::unset()
                }
            },
            TransportMode::Inet => Credentials::unset(),
        };
        if let Some(label) = config.trust_label {
            credentials = credentials.with_trust_label(label);
        }

        let outgoing = config.outgoing.unwrap_or_default();

        let client = Arc::new(Self {
            unique_name: config.unique_name,
            service_name: config.service_name,
            initiator: config.initiator,
            dynamic: config.dynamic,
            credentials,
            channel,
            outgoing,
            incoming: MessageQueue::new(),
            receive_gate: Mutex::new(()),
            flush_gate: Mutex::new(()),
            state: Mutex::new(ClientState::Connected),
            transport: Arc::downgrade(transport),
        });

        debug!(
            unique_name = %client.unique_name,
            service_name = client.service_name.as_deref().unwrap_or(""),
            initiator = client.initiator,
            "client created"
        );
        Ok(client)
    }

    /// Hub-assigned connection-unique name.
    #[must_use]
    pub fn unique_name(&self) -> &str {
        &self.unique_name
    }

    /// Registered service name of the peer, when known.
    #[must_use]
    pub fn service_name(&self) -> Option<&str> {
        self.service_name.as_deref()
    }

    /// Channel owning this connection's descriptor.
    #[must_use]
    pub const fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Immutable credential snapshot captured at creation.
    #[must_use]
    pub const fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Owning transport, unless it has already been torn down.
    #[must_use]
    pub fn transport(&self) -> Option<Arc<Transport>> {
        self.transport.upgrade()
    }

    /// Queue of messages awaiting transmission to this peer.
    #[must_use]
    pub const fn outgoing(&self) -> &MessageQueue {
        &self.outgoing
    }

    /// Queue of messages received from this peer awaiting delivery.
    #[must_use]
    pub const fn incoming(&self) -> &MessageQueue {
        &self.incoming
    }

    /// `true` if this end initiated the connection.
    #[must_use]
    pub const fn is_initiator(&self) -> bool {
        self.initiator
    }

    /// `true` if the peer is a dynamically launched service.
    #[must_use]
    pub const fn is_dynamic(&self) -> bool {
        self.dynamic
    }

    /// Current connection state.
    pub fn state(&self) -> ClientState {
        *self.state.lock().expect("client state mutex poisoned")
    }

    pub(crate) fn set_state(&self, state: ClientState) {
        *self.state.lock().expect("client state mutex poisoned") = state;
    }

    /// Read-side readiness callback: drain the socket, decode frames, and
    /// deliver them to the incoming queue.
    ///
    /// Valid frames are always delivered, even when a later frame in the
    /// same batch is malformed. Concurrent callers are serialized, so
    /// deliveries always preserve wire order.
    ///
    /// # Errors
    ///
    /// - [`TransportError::Io`](crate::error::TransportError::Io) if the
    ///   socket read failed hard.
    /// - [`TransportError::ProtocolViolation`](crate::error::TransportError::ProtocolViolation)
    ///   (the first one encountered)
    ///   if any frame was malformed. When the frame stream itself is
    ///   unrecoverable the channel is closed. Check
    ///   [`state`](Self::state) after an error to distinguish.
    pub fn receive_ready(&self) -> TransportResult<ReceiveSummary> {
        // One drain at a time: decode and enqueue are separate critical
        // sections, so unserialized drains could reorder deliveries.
        let _gate = self.receive_gate.lock().expect("receive gate poisoned");
        self.channel.fill()?;

        let mut delivered = 0;
        let mut violation = None;
        loop {
            match self.channel.decode_next() {
                Ok(Some(message)) => {
                    self.incoming.enqueue(message);
                    delivered += 1;
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(
                        unique_name = %self.unique_name,
                        error = %e,
                        "rejecting malformed frame"
                    );
                    if self.channel.is_poisoned() {
                        self.channel.close();
                        self.set_state(ClientState::Disconnected);
                        return Err(e);
                    }
                    violation.get_or_insert(e);
                }
            }
        }

        let disconnected = self.channel.state() == ChannelState::Closed;
        if disconnected {
            self.set_state(ClientState::Disconnected);
        }
        match violation {
            Some(e) => Err(e),
            None => Ok(ReceiveSummary {
                delivered,
                disconnected,
            }),
        }
    }

    /// Write-side readiness callback: move queued messages onto the wire.
    ///
    /// Bytes left over from a previous partial write go first, and
    /// concurrent callers are serialized, so frame order on the wire
    /// always matches queue order.
    ///
    /// # Errors
    ///
    /// - [`TransportError::Io`](crate::error::TransportError::Io) if the
    ///   socket write failed hard.
    /// - [`TransportError::ProtocolViolation`](crate::error::TransportError::ProtocolViolation)
    ///   if a queued message cannot
    ///   be framed; the message is dropped and the connection stays up.
    pub fn flush_ready(&self) -> TransportResult<FlushStatus> {
        // One drain at a time: dequeue and encode are separate critical
        // sections, so unserialized drains could interleave frames.
        let _gate = self.flush_gate.lock().expect("flush gate poisoned");
        loop {
            if self.channel.flush()? == FlushStatus::Pending {
                return Ok(FlushStatus::Pending);
            }
            match self.outgoing.dequeue() {
                Some(message) => self.channel.queue_frame(&message)?,
                None => return Ok(FlushStatus::Complete),
            }
        }
    }

    /// Begin teardown: stop accepting traffic and close the channel. The
    /// descriptor is released when the last handle drops.
    pub fn shut_down(&self) {
        self.set_state(ClientState::ShuttingDown);
        self.channel.close();
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        // Invalidate the transport's weak directory entry, then release
        // the channel (and with it the descriptor) and both queues.
        if let Some(transport) = self.transport.upgrade() {
            transport.forget_client(&self.unique_name);
        }
        self.channel.close();
        debug!(unique_name = %self.unique_name, "client destroyed");
    }
}
