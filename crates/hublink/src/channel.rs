//! Channel: descriptor ownership and the byte-level I/O state machine.
//!
//! A [`Channel`] owns exactly one connected descriptor and all buffering
//! around it. It is exclusively owned by one [`crate::client::Client`] and
//! never shared between clients; the internal mutex serializes descriptor
//! access across the threads that drive readiness callbacks.
//!
//! The descriptor is switched to non-blocking mode at construction. The
//! channel never polls: the external event loop watches
//! [`as_fd`](Channel::as_fd) for readiness and calls into the owning
//! client's [`receive_ready`](crate::client::Client::receive_ready) /
//! [`flush_ready`](crate::client::Client::flush_ready) entry points, which
//! land in [`fill`](Channel::fill) and [`flush`](Channel::flush) here.

use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};
use std::sync::{Mutex, MutexGuard};

use bytes::{Buf, BytesMut};
use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use tracing::debug;

use crate::error::{TransportError, TransportResult};
use crate::framing::{encode_frame, FrameDecoder};
use crate::message::Message;

/// Read chunk size per `read(2)` call while draining the socket.
const READ_CHUNK: usize = 4096;

/// Connection state of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Not yet initialized on a descriptor.
    Invalid,
    /// Connection in progress; not yet usable for traffic.
    Connecting,
    /// Connected and exchanging frames.
    Connected,
    /// Closed; the descriptor is released when the channel drops.
    Closed,
}

impl std::fmt::Display for ChannelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Invalid => write!(f, "invalid"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Outcome of a write-side drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushStatus {
    /// Everything queued has reached the socket.
    Complete,
    /// The socket stopped accepting bytes; retry when writable again.
    Pending,
}

/// Buffering state behind the channel's I/O lock.
#[derive(Debug)]
struct ChannelIo {
    state: ChannelState,
    decoder: FrameDecoder,
    write_buf: BytesMut,
}

/// One connected descriptor plus its read/write buffering state machine.
#[derive(Debug)]
pub struct Channel {
    io: File,
    priority: i32,
    inner: Mutex<ChannelIo>,
}

impl Channel {
    /// Take ownership of a connected descriptor and switch it to
    /// non-blocking mode.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ResourceExhausted`] when the OS is out of
    /// descriptor-table or kernel-memory headroom, [`TransportError::Io`]
    /// for any other `fcntl` failure. The descriptor is released on error.
    pub fn new(fd: OwnedFd, priority: i32) -> TransportResult<Self> {
        let io = File::from(fd);

        let flags = fcntl(&io, FcntlArg::F_GETFL).map_err(map_setup_errno)?;
        let mut oflags = OFlag::from_bits_retain(flags);
        oflags.insert(OFlag::O_NONBLOCK);
        fcntl(&io, FcntlArg::F_SETFL(oflags)).map_err(map_setup_errno)?;

        Ok(Self {
            io,
            priority,
            inner: Mutex::new(ChannelIo {
                state: ChannelState::Connected,
                decoder: FrameDecoder::new(),
                write_buf: BytesMut::new(),
            }),
        })
    }

    /// Scheduling priority hint for the event loop attaching this channel.
    #[must_use]
    pub const fn priority(&self) -> i32 {
        self.priority
    }

    /// Current connection state.
    pub fn state(&self) -> ChannelState {
        self.lock().state
    }

    /// Borrow the descriptor for event-loop registration or credential
    /// retrieval. The transport never reads or writes through this borrow.
    #[must_use]
    pub fn as_fd(&self) -> BorrowedFd<'_> {
        self.io.as_fd()
    }

    /// Drain readable bytes off the socket into the frame decoder.
    ///
    /// Reads until `WouldBlock`. A zero-length read means the peer hung
    /// up: the channel transitions to [`ChannelState::Closed`]. Returns the
    /// number of bytes consumed this call.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Io`] on a hard read failure; the channel
    /// is closed first.
    pub fn fill(&self) -> TransportResult<usize> {
        let mut guard = self.lock();
        if guard.state != ChannelState::Connected {
            return Ok(0);
        }

        let mut total = 0;
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match (&self.io).read(&mut chunk) {
                Ok(0) => {
                    debug!(state = %ChannelState::Closed, "peer hung up");
                    guard.state = ChannelState::Closed;
                    break;
                }
                Ok(n) => {
                    guard.decoder.extend(&chunk[..n]);
                    total += n;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    guard.state = ChannelState::Closed;
                    return Err(TransportError::Io(e));
                }
            }
        }
        Ok(total)
    }

    /// Decode the next buffered frame, if one is complete.
    ///
    /// # Errors
    ///
    /// Propagates decoder errors; see
    /// [`FrameDecoder::decode_next`](crate::framing::FrameDecoder::decode_next).
    pub fn decode_next(&self) -> TransportResult<Option<Message>> {
        self.lock().decoder.decode_next()
    }

    /// Returns `true` once the inbound frame stream is unrecoverable.
    pub fn is_poisoned(&self) -> bool {
        self.lock().decoder.is_poisoned()
    }

    /// Encode a message onto the write buffer, behind any bytes already
    /// buffered (ordering is preserved across partial writes).
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ProtocolViolation`] if the message cannot
    /// be framed; nothing is buffered in that case.
    pub fn queue_frame(&self, message: &Message) -> TransportResult<()> {
        let frame = encode_frame(message)?;
        self.lock().write_buf.extend_from_slice(&frame);
        Ok(())
    }

    /// Write buffered bytes to the socket until done or `WouldBlock`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Io`] on a hard write failure; the channel
    /// is closed first.
    pub fn flush(&self) -> TransportResult<FlushStatus> {
        let mut guard = self.lock();
        while !guard.write_buf.is_empty() {
            if guard.state != ChannelState::Connected {
                return Err(TransportError::Io(io::Error::new(
                    io::ErrorKind::NotConnected,
                    format!("channel is {}", guard.state),
                )));
            }
            match (&self.io).write(&guard.write_buf) {
                Ok(0) => {
                    guard.state = ChannelState::Closed;
                    return Err(TransportError::Io(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "socket accepted no bytes",
                    )));
                }
                Ok(n) => guard.write_buf.advance(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(FlushStatus::Pending)
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    guard.state = ChannelState::Closed;
                    return Err(TransportError::Io(e));
                }
            }
        }
        Ok(FlushStatus::Complete)
    }

    /// Returns `true` if any encoded bytes are still waiting for the
    /// socket.
    pub fn has_pending_write(&self) -> bool {
        !self.lock().write_buf.is_empty()
    }

    /// Mark the channel closed. The descriptor itself is released when the
    /// owning client drops.
    pub fn close(&self) {
        let mut guard = self.lock();
        if guard.state != ChannelState::Closed {
            debug!("closing channel");
            guard.state = ChannelState::Closed;
        }
    }

    fn lock(&self) -> MutexGuard<'_, ChannelIo> {
        self.inner.lock().expect("channel I/O mutex poisoned")
    }
}

fn map_setup_errno(errno: Errno) -> TransportError {
    match errno {
        Errno::EMFILE | Errno::ENFILE | Errno::ENOMEM => {
            TransportError::resource_exhausted(format!("descriptor setup failed: {errno}"))
        }
        _ => TransportError::Io(io::Error::from(errno)),
    }
}
