//! Transport: the per-process connection directory and serial source.
//!
//! One [`Transport`] instance owns the view of every live peer connection
//! in the process (per bus). It hands out [`crate::client::Client`] handles
//! as `Arc` and keeps only `Weak` back-references itself, so directory
//! entries never extend a client's lifetime: teardown is driven purely by
//! the strong handles held by consumers, pending calls, and running
//! dispatches.
//!
//! The transport is also the source of outbound message serials: a single
//! atomic counter, strictly increasing, never reused within the instance.

use std::collections::HashMap;
use std::os::fd::OwnedFd;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tracing::{debug, info, warn};

use crate::client::{Client, ClientConfig};
use crate::error::TransportResult;

/// Which bus flavor a transport connects through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    /// Local (Unix domain socket) transport; peer credentials are
    /// retrievable from the kernel.
    Local,
    /// Networked transport; peer credentials are never available.
    Inet,
}

impl std::fmt::Display for TransportMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Inet => write!(f, "inet"),
        }
    }
}

/// Connection directory and serial source for one bus attachment.
#[derive(Debug)]
pub struct Transport {
    mode: TransportMode,
    clients: Mutex<HashMap<String, Weak<Client>>>,
    serial: AtomicU64,
}

impl Transport {
    /// Create a transport with an empty directory. Serials start at 1; 0
    /// is reserved as "no serial".
    #[must_use]
    pub fn new(mode: TransportMode) -> Arc<Self> {
        Arc::new(Self {
            mode,
            clients: Mutex::new(HashMap::new()),
            serial: AtomicU64::new(1),
        })
    }

    /// Bus flavor of this transport.
    #[must_use]
    pub const fn mode(&self) -> TransportMode {
        self.mode
    }

    /// Build a client on a connected descriptor and enter it into the
    /// directory under its unique name.
    ///
    /// A live client already holding the same unique name is replaced in
    /// the directory (with a warning); the displaced client itself stays
    /// alive for as long as its strong handles do.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::TransportError::ResourceExhausted`] or
    /// [`crate::error::TransportError::Io`] if the channel cannot be set
    /// up; the descriptor is released in that case.
    pub fn create_client(
        self: &Arc<Self>,
        fd: OwnedFd,
        config: ClientConfig,
    ) -> TransportResult<Arc<Client>> {
        let client = Client::new(self, fd, config)?;

        let mut directory = self.lock();
        if let Some(previous) = directory.get(client.unique_name()) {
            if previous.upgrade().is_some() {
                warn!(
                    unique_name = %client.unique_name(),
                    "replacing live directory entry with new connection"
                );
            }
        }
        directory.insert(client.unique_name().to_string(), Arc::downgrade(&client));
        Ok(client)
    }

    /// Look up a live client by unique name.
    ///
    /// A directory entry whose client has since been torn down is pruned
    /// on the way through and reported as absent.
    #[must_use]
    pub fn lookup_client(&self, unique_name: &str) -> Option<Arc<Client>> {
        let mut directory = self.lock();
        match directory.get(unique_name) {
            Some(weak) => match weak.upgrade() {
                Some(client) => Some(client),
                None => {
                    directory.remove(unique_name);
                    None
                }
            },
            None => None,
        }
    }

    /// Number of live clients in the directory. Dead entries are pruned
    /// as a side effect.
    pub fn client_count(&self) -> usize {
        let mut directory = self.lock();
        directory.retain(|_, weak| weak.strong_count() > 0);
        directory.len()
    }

    /// Next outbound message serial. Strictly increasing, never reused
    /// within this transport instance.
    pub fn next_serial(&self) -> u64 {
        self.serial.fetch_add(1, Ordering::Relaxed)
    }

    /// Shut down every live client: channels close and stop accepting
    /// traffic, descriptors are released as the last strong handles drop.
    pub fn shutdown(&self) {
        let live: Vec<Arc<Client>> = {
            let directory = self.lock();
            directory.values().filter_map(Weak::upgrade).collect()
        };
        info!(mode = %self.mode, clients = live.len(), "transport shutting down");
        for client in live {
            client.shut_down();
        }
    }

    /// Drop a directory entry during client teardown, unless the name has
    /// already been taken over by a newer live connection.
    pub(crate) fn forget_client(&self, unique_name: &str) {
        let mut directory = self.lock();
        if let Some(weak) = directory.get(unique_name) {
            if weak.strong_count() == 0 {
                directory.remove(unique_name);
                debug!(unique_name, "directory entry removed");
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Weak<Client>>> {
        self.clients.lock().expect("client directory mutex poisoned")
    }
}

#[cfg(test)]
mod tests {
    use nix::sys::socket::{socketpair, AddressFamily, SockFlag, SockType};

    use super::*;
    use crate::channel::ChannelState;

    fn fd_pair() -> (OwnedFd, OwnedFd) {
        socketpair(
            AddressFamily::Unix,
            SockType::Stream,
            None,
            SockFlag::empty(),
        )
        .unwrap()
    }

    #[test]
    fn test_lookup_finds_live_client() {
        let transport = Transport::new(TransportMode::Local);
        let (ours, _peer) = fd_pair();
        let client = transport
            .create_client(ours, ClientConfig::new("hub.0x01"))
            .unwrap();

        let found = transport.lookup_client("hub.0x01").unwrap();
        assert!(Arc::ptr_eq(&client, &found));
        assert_eq!(transport.client_count(), 1);
    }

    #[test]
    fn test_lookup_after_drop_is_absent() {
        let transport = Transport::new(TransportMode::Local);
        let (ours, _peer) = fd_pair();
        let client = transport
            .create_client(ours, ClientConfig::new("hub.0x02"))
            .unwrap();
        drop(client);

        assert!(transport.lookup_client("hub.0x02").is_none());
        assert_eq!(transport.client_count(), 0);
    }

    #[test]
    fn test_directory_entry_does_not_keep_client_alive() {
        let transport = Transport::new(TransportMode::Local);
        let (ours, _peer) = fd_pair();
        let client = transport
            .create_client(ours, ClientConfig::new("hub.0x03"))
            .unwrap();

        let weak = Arc::downgrade(&client);
        drop(client);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn test_duplicate_name_replaces_directory_entry() {
        let transport = Transport::new(TransportMode::Local);
        let (first_fd, _p1) = fd_pair();
        let (second_fd, _p2) = fd_pair();

        let first = transport
            .create_client(first_fd, ClientConfig::new("hub.0x04"))
            .unwrap();
        let second = transport
            .create_client(second_fd, ClientConfig::new("hub.0x04"))
            .unwrap();

        // The directory resolves to the newer connection; the displaced
        // client object stays alive through its own handle.
        let found = transport.lookup_client("hub.0x04").unwrap();
        assert!(Arc::ptr_eq(&second, &found));
        assert_eq!(first.channel().state(), ChannelState::Connected);

        // The displaced client's teardown must not evict the newer entry.
        drop(first);
        assert!(transport.lookup_client("hub.0x04").is_some());
    }

    #[test]
    fn test_serials_are_strictly_increasing() {
        let transport = Transport::new(TransportMode::Local);
        let first = transport.next_serial();
        let second = transport.next_serial();
        assert_eq!(first, 1);
        assert_eq!(second, 2);
    }

    #[test]
    fn test_shutdown_closes_all_live_clients() {
        let transport = Transport::new(TransportMode::Local);
        let (a_fd, _pa) = fd_pair();
        let (b_fd, _pb) = fd_pair();
        let a = transport
            .create_client(a_fd, ClientConfig::new("hub.0x05"))
            .unwrap();
        let b = transport
            .create_client(b_fd, ClientConfig::new("hub.0x06"))
            .unwrap();

        transport.shutdown();
        assert_eq!(a.channel().state(), ChannelState::Closed);
        assert_eq!(b.channel().state(), ChannelState::Closed);
    }
}
