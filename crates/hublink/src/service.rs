//! Service handles: registration surface and inbound dispatch.
//!
//! A [`ServiceHandle`] ties one named service to one [`Transport`] and owns
//! that service's [`CategoryDirectory`]. All category mutation and lookup
//! goes through the handle's directory lock; handlers are always invoked
//! after that lock is released, so a handler may re-enter the handle (to
//! register another category, say) without deadlocking.
//!
//! [`PairedService`] covers services attached to both the public and the
//! private bus at once: one handle per bus, with the private bus seeing the
//! union of public and private methods.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use tracing::{debug, info};

use crate::category::{
    CategoryData, CategoryDirectory, DispatchContext, DispatchOutcome, Method, Property, Signal,
};
use crate::client::Client;
use crate::error::{TransportError, TransportResult};
use crate::message::{Message, MessageKind};
use crate::transport::{Transport, TransportMode};

/// Wire shape of a synthesized error reply payload.
#[derive(Debug, Serialize)]
struct ErrorReply {
    #[serde(rename = "returnValue")]
    return_value: bool,
    #[serde(rename = "errorText")]
    error_text: String,
}

/// One service's attachment to one bus.
#[derive(Debug)]
pub struct ServiceHandle {
    name: String,
    transport: Arc<Transport>,
    categories: Mutex<CategoryDirectory>,
    registered: AtomicBool,
}

impl ServiceHandle {
    /// Register a service on a fresh transport. The handle starts with no
    /// categories; until one is registered every inbound call draws an
    /// unknown-method error reply.
    pub fn register(name: impl Into<String>, mode: TransportMode) -> Arc<Self> {
        let name = name.into();
        info!(service = %name, mode = %mode, "service registered");
        Arc::new(Self {
            name,
            transport: Transport::new(mode),
            categories: Mutex::new(CategoryDirectory::new()),
            registered: AtomicBool::new(true),
        })
    }

    /// Registered service name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Transport this handle is attached to.
    #[must_use]
    pub const fn transport(&self) -> &Arc<Transport> {
        &self.transport
    }

    /// `false` once [`unregister`](Self::unregister) has run.
    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::Acquire)
    }

    /// Strict category registration; see
    /// [`CategoryDirectory::register`].
    ///
    /// # Errors
    ///
    /// [`TransportError::InvalidHandle`] on an unregistered handle,
    /// [`TransportError::CategoryAlreadyRegistered`] on a duplicate path.
    pub fn register_category(
        &self,
        category: Option<&str>,
        methods: Vec<Method>,
        signals: Vec<Signal>,
        properties: Vec<Property>,
    ) -> TransportResult<()> {
        self.ensure_registered()?;
        self.categories()
            .register(category, methods, signals, properties)?;
        debug!(service = %self.name, category = category.unwrap_or("/"), "category registered");
        Ok(())
    }

    /// Register-or-append; see [`CategoryDirectory::register_append`].
    ///
    /// # Errors
    ///
    /// [`TransportError::InvalidHandle`] on an unregistered handle.
    pub fn register_category_append(
        &self,
        category: Option<&str>,
        methods: Vec<Method>,
        signals: Vec<Signal>,
        properties: Vec<Property>,
    ) -> TransportResult<()> {
        self.ensure_registered()?;
        self.categories()
            .register_append(category, methods, signals, properties);
        Ok(())
    }

    /// Attach user context to a registered category; every subsequent
    /// dispatch into that category sees it.
    ///
    /// # Errors
    ///
    /// [`TransportError::InvalidHandle`] on an unregistered handle,
    /// [`TransportError::CategoryNotRegistered`] if the path has no table.
    pub fn set_category_data(
        &self,
        category: Option<&str>,
        data: CategoryData,
    ) -> TransportResult<()> {
        self.ensure_registered()?;
        self.categories().set_user_data(category, data)
    }

    /// Dispatch one call from `client` to its handler.
    ///
    /// The category path is normalized, the table and method resolved under
    /// the directory lock, and the handler invoked after the lock is
    /// released. The call blocks the current thread for the handler's
    /// duration.
    ///
    /// # Errors
    ///
    /// [`TransportError::InvalidHandle`] on an unregistered handle. Lookup
    /// misses are an outcome, not an error.
    pub fn dispatch(
        &self,
        client: &Arc<Client>,
        message: &Message,
    ) -> TransportResult<DispatchOutcome> {
        self.ensure_registered()?;
        let category = crate::category::normalize_category_path(Some(message.category()));

        let resolved = {
            let directory = self.categories();
            directory.lookup(&category).and_then(|table| {
                table
                    .method(message.method())
                    .map(|method| (method.handler(), table.user_data().cloned()))
            })
        };

        let Some((handler, user_data)) = resolved else {
            return Ok(DispatchOutcome::UnknownMethod);
        };

        let ctx = DispatchContext {
            service: self,
            client,
            category: &category,
            user_data,
        };
        if handler.handle(&ctx, message) {
            Ok(DispatchOutcome::Handled)
        } else {
            Ok(DispatchOutcome::NotHandled)
        }
    }

    /// Drain `client`'s incoming queue.
    ///
    /// `Call` messages are dispatched; a lookup miss or a declining handler
    /// becomes a structured error reply on the client's outgoing queue, not
    /// an error here. Non-call messages (replies, signals, cancels) are
    /// returned for the caller to route.
    ///
    /// # Errors
    ///
    /// [`TransportError::InvalidHandle`] on an unregistered handle,
    /// [`TransportError::ProtocolViolation`] if an error reply cannot be
    /// serialized.
    pub fn process_incoming(&self, client: &Arc<Client>) -> TransportResult<Vec<Message>> {
        self.ensure_registered()?;

        let mut passthrough = Vec::new();
        while let Some(message) = client.incoming().dequeue() {
            if message.kind() != MessageKind::Call {
                passthrough.push(message);
                continue;
            }

            let failure = match self.dispatch(client, &message)? {
                DispatchOutcome::Handled => continue,
                DispatchOutcome::UnknownMethod => TransportError::UnknownMethod {
                    method: message.method().to_string(),
                    category: crate::category::normalize_category_path(Some(message.category())),
                },
                DispatchOutcome::NotHandled => TransportError::NotHandled {
                    method: message.method().to_string(),
                    category: crate::category::normalize_category_path(Some(message.category())),
                },
            };

            debug!(
                service = %self.name,
                unique_name = %client.unique_name(),
                error = %failure,
                "dispatch failed, sending error reply"
            );
            let payload = serde_json::to_vec(&ErrorReply {
                return_value: false,
                error_text: failure.to_string(),
            })
            .map_err(|e| {
                TransportError::protocol_violation(format!("error reply serialization: {e}"))
            })?;
            let reply = Message::error_reply_to(self.transport.next_serial(), &message, payload);
            client.outgoing().enqueue(reply);
        }
        Ok(passthrough)
    }

    /// Unregister the handle: every subsequent operation fails with
    /// [`TransportError::InvalidHandle`] and the transport shuts down its
    /// live clients.
    pub fn unregister(&self) {
        if self.registered.swap(false, Ordering::AcqRel) {
            info!(service = %self.name, "service unregistered");
            self.transport.shutdown();
        }
    }

    fn ensure_registered(&self) -> TransportResult<()> {
        if self.is_registered() {
            Ok(())
        } else {
            Err(TransportError::InvalidHandle)
        }
    }

    fn categories(&self) -> MutexGuard<'_, CategoryDirectory> {
        self.categories
            .lock()
            .expect("category directory mutex poisoned")
    }
}

/// A service attached to the public and private buses simultaneously.
///
/// The private bus always carries the union of public and private methods,
/// so a privileged peer can reach the full surface over one connection.
pub struct PairedService {
    public_bus: Arc<ServiceHandle>,
    private_bus: Arc<ServiceHandle>,
}

impl PairedService {
    /// Register the same service name on both buses.
    pub fn register(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            public_bus: ServiceHandle::register(name.clone(), TransportMode::Local),
            private_bus: ServiceHandle::register(name, TransportMode::Local),
        }
    }

    /// Handle attached to the public bus.
    #[must_use]
    pub const fn public_bus(&self) -> &Arc<ServiceHandle> {
        &self.public_bus
    }

    /// Handle attached to the private bus.
    #[must_use]
    pub const fn private_bus(&self) -> &Arc<ServiceHandle> {
        &self.private_bus
    }

    /// Register a category on both buses: public methods on the public bus,
    /// the union of public and private methods on the private bus. When
    /// `user_data` is given it is attached to the category on both buses in
    /// the same call.
    ///
    /// Best-effort across the two buses. On partial failure the first error
    /// is returned and whatever registered before it stays in place; there
    /// is no rollback. User data is attached only on a bus whose
    /// registration succeeded.
    ///
    /// # Errors
    ///
    /// The first error from either bus; see
    /// [`ServiceHandle::register_category`].
    pub fn register_category(
        &self,
        category: Option<&str>,
        public_methods: Vec<Method>,
        private_methods: Vec<Method>,
        signals: Vec<Signal>,
        properties: Vec<Property>,
        user_data: Option<CategoryData>,
    ) -> TransportResult<()> {
        let union: Vec<Method> = public_methods
            .iter()
            .cloned()
            .chain(private_methods)
            .collect();

        let mut first_error = None;
        match self.public_bus.register_category(
            category,
            public_methods,
            signals.clone(),
            properties.clone(),
        ) {
            Ok(()) => {
                if let Some(data) = &user_data {
                    if let Err(e) = self.public_bus.set_category_data(category, Arc::clone(data)) {
                        first_error.get_or_insert(e);
                    }
                }
            }
            Err(e) => {
                first_error.get_or_insert(e);
            }
        }
        match self
            .private_bus
            .register_category(category, union, signals, properties)
        {
            Ok(()) => {
                if let Some(data) = user_data {
                    if let Err(e) = self.private_bus.set_category_data(category, data) {
                        first_error.get_or_insert(e);
                    }
                }
            }
            Err(e) => {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Attach the same user context to the category on both buses,
    /// best-effort like [`register_category`](Self::register_category).
    ///
    /// # Errors
    ///
    /// The first error from either bus.
    pub fn set_category_data(
        &self,
        category: Option<&str>,
        data: CategoryData,
    ) -> TransportResult<()> {
        let first = self.public_bus.set_category_data(category, Arc::clone(&data));
        let second = self.private_bus.set_category_data(category, data);
        first.and(second)
    }

    /// Unregister both handles.
    pub fn unregister(&self) {
        self.public_bus.unregister();
        self.private_bus.unregister();
    }
}
