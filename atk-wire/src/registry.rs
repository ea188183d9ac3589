//! Name-to-handler directory, split by role, with a pluggable loader for names
//! nobody registered up front.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::endpoint::Context;
use crate::error::ProtocolError;
use crate::message::Message;

/// What a handler returns. Replies normally go straight out over the transport,
/// so `Ok(None)` is the common case.
pub type HandlerResult = Result<Option<Message>, ProtocolError>;

/// Builds a handler instance for one message name.
pub type Factory = Arc<dyn Fn() -> Arc<dyn WireFunc> + Send + Sync>;

/// Whether a handler sends the named message or receives it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Send,
    Recv,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Send => f.write_str("send"),
            Role::Recv => f.write_str("receive"),
        }
    }
}

/// How a send-role handler puts its message on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendMode {
    Async,
    Sync,
}

/// Handler for one message name.
pub trait WireFunc: Send + Sync {
    fn name(&self) -> &str;

    /// Send-role handlers that return true block for a reply.
    fn sync(&self) -> bool {
        false
    }

    fn send(&self, cx: &mut Context<'_>, msg: Message) -> HandlerResult {
        if self.sync() {
            cx.send_sync(msg)
        } else {
            cx.send(&msg)?;
            Ok(None)
        }
    }

    fn recv(&self, _cx: &mut Context<'_>, msg: Message) -> HandlerResult {
        tracing::debug!(name = %msg.name(), "no receive action for message");
        Ok(None)
    }
}

/// Resolves names missing from the registry, typically by loading a plugin that
/// registers them. Returns whether it did anything; the lookup is retried once
/// either way.
pub trait Loader: Send + Sync {
    fn try_load(&self, registry: &Registry, role: Role, name: &str) -> bool;
}

impl<F> Loader for F
where
    F: Fn(&Registry, Role, &str) -> bool + Send + Sync,
{
    fn try_load(&self, registry: &Registry, role: Role, name: &str) -> bool {
        self(registry, role, name)
    }
}

/// Plugin symbol a loader is expected to resolve for `name`.
pub fn symbol_for(name: &str) -> String {
    format!("Mle{}WireFunc", name)
}

struct Entry {
    name: String,
    factory: Factory,
}

/// Handler directory shared by the endpoints of a process.
///
/// Registration and lookup may happen from any thread. Names are not unique:
/// the first registration of a name wins.
#[derive(Default)]
pub struct Registry {
    send: RwLock<Vec<Entry>>,
    recv: RwLock<Vec<Entry>>,
    loader: RwLock<Option<Arc<dyn Loader>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_loader(loader: impl Loader + 'static) -> Self {
        let registry = Self::new();
        registry.set_loader(loader);
        registry
    }

    pub fn set_loader(&self, loader: impl Loader + 'static) {
        *self.loader.write() = Some(Arc::new(loader));
    }

    fn entries(&self, role: Role) -> &RwLock<Vec<Entry>> {
        match role {
            Role::Send => &self.send,
            Role::Recv => &self.recv,
        }
    }

    pub fn register(&self, role: Role, name: &str, factory: Factory) {
        tracing::trace!(%role, name, "registering wire func");
        self.entries(role).write().push(Entry {
            name: name.to_owned(),
            factory,
        });
    }

    /// Register a stateless receive handler backed by a closure.
    pub fn register_recv_fn<F>(&self, name: &str, f: F)
    where
        F: Fn(&mut Context<'_>, Message) -> HandlerResult + Send + Sync + 'static,
    {
        let func: Arc<dyn WireFunc> = Arc::new(RecvFn {
            name: name.to_owned(),
            f,
        });
        self.register(Role::Recv, name, Arc::new(move || func.clone()));
    }

    /// Register how the named message is sent.
    pub fn register_send_mode(&self, name: &str, mode: SendMode) {
        let func: Arc<dyn WireFunc> = Arc::new(SendOnly {
            name: name.to_owned(),
            mode,
        });
        self.register(Role::Send, name, Arc::new(move || func.clone()));
    }

    /// Scan registrations in order and build the first match.
    pub fn lookup_local(&self, role: Role, name: &str) -> Option<Arc<dyn WireFunc>> {
        let factory = self
            .entries(role)
            .read()
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.factory.clone())?;
        Some(factory())
    }

    /// Look up locally, then ask the loader once and retry.
    pub fn lookup(&self, role: Role, name: &str) -> Result<Arc<dyn WireFunc>, ProtocolError> {
        if let Some(func) = self.lookup_local(role, name) {
            return Ok(func);
        }
        let loader = self.loader.read().clone();
        if let Some(loader) = loader {
            let loaded = loader.try_load(self, role, name);
            tracing::debug!(%role, name, symbol = %symbol_for(name), loaded, "loader consulted");
            if let Some(func) = self.lookup_local(role, name) {
                return Ok(func);
            }
            tracing::warn!(%role, name, "loader did not provide a wire func");
        }
        Err(ProtocolError::NoHandler {
            role,
            name: name.to_owned(),
        })
    }

    /// Registered names for `role`, in registration order.
    pub fn names(&self, role: Role) -> Vec<String> {
        self.entries(role)
            .read()
            .iter()
            .map(|e| e.name.clone())
            .collect()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("send", &self.names(Role::Send))
            .field("recv", &self.names(Role::Recv))
            .field("loader", &self.loader.read().is_some())
            .finish()
    }
}

struct RecvFn<F> {
    name: String,
    f: F,
}

impl<F> WireFunc for RecvFn<F>
where
    F: Fn(&mut Context<'_>, Message) -> HandlerResult + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn recv(&self, cx: &mut Context<'_>, msg: Message) -> HandlerResult {
        (self.f)(cx, msg)
    }
}

struct SendOnly {
    name: String,
    mode: SendMode,
}

impl WireFunc for SendOnly {
    fn name(&self) -> &str {
        &self.name
    }

    fn sync(&self) -> bool {
        self.mode == SendMode::Sync
    }
}
