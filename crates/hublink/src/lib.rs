//! Inter-process message bus transport.
//!
//! This crate implements the connection-level transport of a hub-brokered
//! message bus: framed messages over connected sockets, per-connection
//! shared-ownership client objects, FIFO delivery queues, and
//! category/method dispatch with peer-credential propagation.
//!
//! # Architecture
//!
//! The transport is organized in layers:
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │          Service / Dispatch              │  ServiceHandle, categories
//! ├─────────────────────────────────────────┤
//! │       Clients and Message Queues         │  Client, MessageQueue
//! ├─────────────────────────────────────────┤
//! │               Framing                    │  Length-prefixed frames
//! ├─────────────────────────────────────────┤
//! │          Channel (non-blocking)          │  Owned descriptor
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Module Overview
//!
//! - [`error`]: Error taxonomy ([`TransportError`], [`TransportResult`])
//! - [`message`]: Framed message model ([`Message`], [`MessageKind`])
//! - [`framing`]: Wire codec ([`FrameDecoder`], [`encode_frame`])
//! - [`queue`]: FIFO delivery queues ([`MessageQueue`])
//! - [`credentials`]: Peer identity snapshots ([`Credentials`])
//! - [`channel`]: Descriptor ownership and I/O state machine ([`Channel`])
//! - [`client`]: Shared-ownership connection unit ([`Client`])
//! - [`category`]: Method tables and dispatch ([`CategoryDirectory`],
//!   [`Method`], [`MethodHandler`])
//! - [`service`]: Registration surface ([`ServiceHandle`],
//!   [`PairedService`])
//! - [`transport`]: Connection directory and serial source ([`Transport`])
//!
//! # Threading
//!
//! The crate owns no event loop. An external reactor watches each
//! channel's descriptor and drives [`Client::receive_ready`] /
//! [`Client::flush_ready`] on readiness; [`ServiceHandle::process_incoming`]
//! dispatches whatever arrived. All shared state is mutex- or
//! atomic-protected; no lock is held across a call into another lock
//! domain, and method handlers always run outside transport locks.
//!
//! # Ownership
//!
//! [`Client`] handles are `Arc`: acquiring a reference is a clone,
//! releasing is a drop, and the connection is torn down exactly when the
//! last handle goes away. The [`Transport`] directory holds only `Weak`
//! back-references and never extends a client's lifetime.

pub mod category;
pub mod channel;
pub mod client;
pub mod credentials;
pub mod error;
pub mod framing;
pub mod message;
pub mod queue;
pub mod service;
pub mod transport;

pub use category::{
    normalize_category_path, CategoryData, CategoryDirectory, CategoryTable, DispatchContext,
    DispatchOutcome, Method, MethodHandler, Property, Signal, METHOD_FLAG_VALIDATE_CALL,
};
pub use channel::{Channel, ChannelState, FlushStatus};
pub use client::{Client, ClientConfig, ClientState, ReceiveSummary};
pub use credentials::Credentials;
pub use error::{TransportError, TransportResult, MAX_FRAME_SIZE, MAX_NAME_LEN};
pub use framing::{encode_frame, FrameDecoder};
pub use message::{Message, MessageKind};
pub use queue::MessageQueue;
pub use service::{PairedService, ServiceHandle};
pub use transport::{Transport, TransportMode};
