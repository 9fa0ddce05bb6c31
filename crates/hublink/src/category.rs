//! Category tables and method dispatch.
//!
//! A service groups its invocable surface into *categories*: path-like
//! namespaces, each mapping method, signal, and property names to entries.
//! Inbound calls are dispatched by looking up the message's category path
//! and method name in the owning service's [`CategoryDirectory`].
//!
//! Category paths are normalized to always start with `/`; the default
//! category (no path given) is `"/"`. Categories, once added, are never
//! removed for the lifetime of the service — there is deliberately no
//! removal surface.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use crate::message::Message;

/// Method flag: the call payload should be schema-validated before the
/// handler runs. Validation itself is a collaborator of this layer; the
/// flag only travels with the method entry.
pub const METHOD_FLAG_VALIDATE_CALL: u32 = 1 << 0;

/// Opaque per-category context handed to every handler of that category.
pub type CategoryData = Arc<dyn Any + Send + Sync>;

/// The one capability a method handler needs: invoke with context and
/// message, report whether the message was processed.
pub trait MethodHandler: Send + Sync {
    /// Handle a dispatched call. Return `true` if the message was
    /// processed (a reply, if any, has been enqueued via
    /// [`DispatchContext::respond`]), `false` to let the caller synthesize
    /// a "not handled" error reply.
    fn handle(&self, ctx: &DispatchContext<'_>, message: &Message) -> bool;
}

impl<F> MethodHandler for F
where
    F: Fn(&DispatchContext<'_>, &Message) -> bool + Send + Sync,
{
    fn handle(&self, ctx: &DispatchContext<'_>, message: &Message) -> bool {
        self(ctx, message)
    }
}

/// Everything a handler may need while processing one call.
///
/// Built fresh per dispatch; the handler runs outside all transport locks
/// and blocks only its own dispatch thread.
pub struct DispatchContext<'a> {
    pub(crate) service: &'a crate::service::ServiceHandle,
    pub(crate) client: &'a Arc<crate::client::Client>,
    pub(crate) category: &'a str,
    pub(crate) user_data: Option<CategoryData>,
}

impl DispatchContext<'_> {
    /// The service this call was dispatched on.
    #[must_use]
    pub fn service(&self) -> &crate::service::ServiceHandle {
        self.service
    }

    /// The client the call arrived from. Holding this reference keeps the
    /// client alive for the duration of the dispatch.
    #[must_use]
    pub fn client(&self) -> &Arc<crate::client::Client> {
        self.client
    }

    /// Normalized category path the call resolved to.
    #[must_use]
    pub fn category(&self) -> &str {
        self.category
    }

    /// Per-category user context, if one was set.
    #[must_use]
    pub fn user_data(&self) -> Option<&CategoryData> {
        self.user_data.as_ref()
    }

    /// Enqueue a reply to `call` on the calling client's outgoing queue.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::TransportError::InvalidHandle`] if the
    /// owning transport has already been torn down.
    pub fn respond(
        &self,
        call: &Message,
        payload: impl Into<bytes::Bytes>,
    ) -> crate::error::TransportResult<()> {
        let transport = self
            .client
            .transport()
            .ok_or(crate::error::TransportError::InvalidHandle)?;
        let reply = Message::reply_to(transport.next_serial(), call, payload);
        self.client.outgoing().enqueue(reply);
        Ok(())
    }
}

/// A registered method: name, handler, and flags.
#[derive(Clone)]
pub struct Method {
    name: String,
    handler: Arc<dyn MethodHandler>,
    flags: u32,
}

impl Method {
    /// Create a method entry with no flags.
    pub fn new(name: impl Into<String>, handler: impl MethodHandler + 'static) -> Self {
        Self {
            name: name.into(),
            handler: Arc::new(handler),
            flags: 0,
        }
    }

    /// Set the method's flags.
    #[must_use]
    pub const fn with_flags(mut self, flags: u32) -> Self {
        self.flags = flags;
        self
    }

    /// Method name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Method flags.
    #[must_use]
    pub const fn flags(&self) -> u32 {
        self.flags
    }

    pub(crate) fn handler(&self) -> Arc<dyn MethodHandler> {
        Arc::clone(&self.handler)
    }
}

impl std::fmt::Debug for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Method")
            .field("name", &self.name)
            .field("flags", &self.flags)
            .finish_non_exhaustive()
    }
}

/// A registered fire-and-forget signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signal {
    name: String,
}

impl Signal {
    /// Create a signal entry.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Signal name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// A registered property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property {
    name: String,
}

impl Property {
    /// Create a property entry.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Property name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Outcome of dispatching one inbound call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A handler ran and reported the message processed.
    Handled,
    /// A handler ran but declined the message; the caller synthesizes a
    /// "not handled" error reply.
    NotHandled,
    /// No table for the category, or no such method in it; the caller
    /// synthesizes an "unknown method" error reply.
    UnknownMethod,
}

/// One category's method/signal/property tables plus its user context.
#[derive(Default)]
pub struct CategoryTable {
    methods: HashMap<String, Method>,
    signals: HashMap<String, Signal>,
    properties: HashMap<String, Property>,
    user_data: Option<CategoryData>,
}

impl CategoryTable {
    /// Look up a method by name.
    #[must_use]
    pub fn method(&self, name: &str) -> Option<&Method> {
        self.methods.get(name)
    }

    /// Look up a signal by name.
    #[must_use]
    pub fn signal(&self, name: &str) -> Option<&Signal> {
        self.signals.get(name)
    }

    /// Look up a property by name.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties.get(name)
    }

    /// Per-category user context, if set.
    #[must_use]
    pub fn user_data(&self) -> Option<&CategoryData> {
        self.user_data.as_ref()
    }

    /// Number of registered methods.
    #[must_use]
    pub fn method_count(&self) -> usize {
        self.methods.len()
    }

    fn merge(&mut self, methods: Vec<Method>, signals: Vec<Signal>, properties: Vec<Property>) {
        // Same-named entries are replaced: latest registration wins.
        for method in methods {
            self.methods.insert(method.name.clone(), method);
        }
        for signal in signals {
            self.signals.insert(signal.name.clone(), signal);
        }
        for property in properties {
            self.properties.insert(property.name.clone(), property);
        }
    }
}

impl std::fmt::Debug for CategoryTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CategoryTable")
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .field("signals", &self.signals.keys().collect::<Vec<_>>())
            .field("properties", &self.properties.keys().collect::<Vec<_>>())
            .field("has_user_data", &self.user_data.is_some())
            .finish()
    }
}

/// Normalize a category path: `None` is the default category `"/"`, and
/// any path not starting with `/` gets one prepended. Idempotent.
#[must_use]
pub fn normalize_category_path(category: Option<&str>) -> String {
    match category {
        None | Some("") => "/".to_string(),
        Some(path) if path.starts_with('/') => path.to_string(),
        Some(path) => format!("/{path}"),
    }
}

/// All category tables registered on one service handle, keyed by
/// normalized path.
#[derive(Debug, Default)]
pub struct CategoryDirectory {
    tables: HashMap<String, CategoryTable>,
}

impl CategoryDirectory {
    /// Create an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if a table exists for the normalized form of
    /// `category`.
    #[must_use]
    pub fn contains(&self, category: Option<&str>) -> bool {
        self.tables.contains_key(&normalize_category_path(category))
    }

    /// Strict registration: fails if the normalized path already has a
    /// table.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::TransportError::CategoryAlreadyRegistered`]
    /// on a duplicate path.
    pub fn register(
        &mut self,
        category: Option<&str>,
        methods: Vec<Method>,
        signals: Vec<Signal>,
        properties: Vec<Property>,
    ) -> crate::error::TransportResult<()> {
        let path = normalize_category_path(category);
        if self.tables.contains_key(&path) {
            return Err(crate::error::TransportError::CategoryAlreadyRegistered {
                category: path,
            });
        }
        self.tables
            .entry(path)
            .or_default()
            .merge(methods, signals, properties);
        Ok(())
    }

    /// Register-or-append: creates the table if needed and merges entries
    /// by name, latest registration winning. Never fails on an existing
    /// path.
    pub fn register_append(
        &mut self,
        category: Option<&str>,
        methods: Vec<Method>,
        signals: Vec<Signal>,
        properties: Vec<Property>,
    ) {
        self.tables
            .entry(normalize_category_path(category))
            .or_default()
            .merge(methods, signals, properties);
    }

    /// Set the user context delivered to every handler of the category.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::TransportError::CategoryNotRegistered`] if
    /// no table exists for the normalized path.
    pub fn set_user_data(
        &mut self,
        category: Option<&str>,
        data: CategoryData,
    ) -> crate::error::TransportResult<()> {
        let path = normalize_category_path(category);
        match self.tables.get_mut(&path) {
            Some(table) => {
                table.user_data = Some(data);
                Ok(())
            }
            None => Err(crate::error::TransportError::CategoryNotRegistered { category: path }),
        }
    }

    /// Look up the table for an already-normalized path.
    #[must_use]
    pub fn lookup(&self, normalized_path: &str) -> Option<&CategoryTable> {
        self.tables.get(normalized_path)
    }

    /// Returns `true` when no category has been registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Number of registered categories.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tables.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_method(name: &str) -> Method {
        Method::new(name, |_: &DispatchContext<'_>, _: &Message| true)
    }

    #[test]
    fn test_normalization() {
        assert_eq!(normalize_category_path(None), "/");
        assert_eq!(normalize_category_path(Some("")), "/");
        assert_eq!(normalize_category_path(Some("/")), "/");
        assert_eq!(normalize_category_path(Some("foo")), "/foo");
        assert_eq!(normalize_category_path(Some("/foo")), "/foo");
        // Idempotent: normalizing a normalized path changes nothing.
        let once = normalize_category_path(Some("foo/bar"));
        assert_eq!(normalize_category_path(Some(&once)), once);
    }

    #[test]
    fn test_bare_and_slashed_paths_share_a_table() {
        let mut dir = CategoryDirectory::new();
        dir.register(Some("foo"), vec![noop_method("a")], vec![], vec![])
            .unwrap();

        assert!(dir.contains(Some("/foo")));
        let err = dir
            .register(Some("/foo"), vec![], vec![], vec![])
            .unwrap_err();
        assert_eq!(err.message_id(), "BUS_CATEGORY_REGISTERED");
    }

    #[test]
    fn test_strict_register_rejects_duplicate() {
        let mut dir = CategoryDirectory::new();
        dir.register(None, vec![], vec![], vec![]).unwrap();
        assert!(matches!(
            dir.register(None, vec![], vec![], vec![]),
            Err(crate::error::TransportError::CategoryAlreadyRegistered { .. })
        ));
    }

    #[test]
    fn test_append_merges_latest_wins() {
        let mut dir = CategoryDirectory::new();
        dir.register(
            Some("/"),
            vec![noop_method("ping").with_flags(0)],
            vec![Signal::new("tick")],
            vec![],
        )
        .unwrap();

        // Appending the same path succeeds and overwrites same-named
        // entries.
        dir.register_append(
            Some("/"),
            vec![
                noop_method("ping").with_flags(METHOD_FLAG_VALIDATE_CALL),
                noop_method("pong"),
            ],
            vec![],
            vec![Property::new("status")],
        );

        let table = dir.lookup("/").unwrap();
        assert_eq!(table.method_count(), 2);
        assert_eq!(
            table.method("ping").unwrap().flags(),
            METHOD_FLAG_VALIDATE_CALL
        );
        assert!(table.signal("tick").is_some());
        assert!(table.property("status").is_some());
        assert_eq!(dir.len(), 1);
    }

    #[test]
    fn test_set_user_data_requires_registration() {
        let mut dir = CategoryDirectory::new();
        let data: CategoryData = Arc::new(42u32);

        let err = dir.set_user_data(Some("/"), Arc::clone(&data)).unwrap_err();
        assert_eq!(err.message_id(), "BUS_NO_CATEGORY");

        dir.register(Some("/"), vec![], vec![], vec![]).unwrap();
        dir.set_user_data(Some("/"), Arc::clone(&data)).unwrap();

        let stored = dir.lookup("/").unwrap().user_data().unwrap();
        assert_eq!(*stored.downcast_ref::<u32>().unwrap(), 42);
    }

    #[test]
    fn test_set_user_data_accepts_unnormalized_path() {
        let mut dir = CategoryDirectory::new();
        dir.register(Some("/camera"), vec![], vec![], vec![]).unwrap();
        // Bare path resolves to the same table as the slashed one.
        dir.set_user_data(Some("camera"), Arc::new(()) as CategoryData)
            .unwrap();
    }

    #[test]
    fn test_empty_directory() {
        let dir = CategoryDirectory::new();
        assert!(dir.is_empty());
        assert_eq!(dir.len(), 0);
        assert!(dir.lookup("/").is_none());
        assert!(!dir.contains(None));
    }
}
