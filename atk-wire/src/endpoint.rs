//! Endpoint: a named participant that owns a transport and routes what it
//! receives to registered handlers.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::ProtocolError;
use crate::message::{Handle, Message, MessageName, ID_NAME};
use crate::registry::{HandlerResult, Registry, Role, WireFunc};
use crate::transport::{Dispatch, SyncOptions, Transport};

/// Name and handle of the most recently created endpoint that is still alive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentEndpoint {
    pub name: String,
    pub handle: Handle,
}

static CURRENT: Mutex<Option<CurrentEndpoint>> = parking_lot::const_mutex(None);

/// Diagnostic record of the endpoint most recently created in this process.
pub fn current_endpoint() -> Option<CurrentEndpoint> {
    CURRENT.lock().clone()
}

/// Outcome of [`Endpoint::receive_and_dispatch`].
#[derive(Debug)]
pub enum Dispatched {
    /// A message was routed to its handler, which returned `result`.
    Handled {
        name: MessageName,
        result: Option<Message>,
    },
    /// The peer closed the wire; nothing more will arrive.
    Disconnected,
}

type Cache = Vec<(String, Arc<dyn WireFunc>)>;

/// Identity and handler lookup half of an endpoint, kept apart from the
/// transport so both can be borrowed while a handler runs.
struct Router {
    name: String,
    handle: Handle,
    peer: Handle,
    registry: Arc<Registry>,
    send_cache: Cache,
    recv_cache: Cache,
}

impl Router {
    fn cache(&mut self, role: Role) -> &mut Cache {
        match role {
            Role::Send => &mut self.send_cache,
            Role::Recv => &mut self.recv_cache,
        }
    }

    /// Cached or registered handler, without consulting the loader.
    fn find_local(&mut self, role: Role, name: &str) -> Option<Arc<dyn WireFunc>> {
        if let Some((_, func)) = self.cache(role).iter().find(|(n, _)| n == name) {
            return Some(func.clone());
        }
        let func = self.registry.lookup_local(role, name)?;
        self.cache(role).push((name.to_owned(), func.clone()));
        Some(func)
    }

    fn find(&mut self, role: Role, name: &str) -> Result<Arc<dyn WireFunc>, ProtocolError> {
        if let Some(func) = self.find_local(role, name) {
            return Ok(func);
        }
        let func = self.registry.lookup(role, name)?;
        self.cache(role).push((name.to_owned(), func.clone()));
        Ok(func)
    }

    fn deliver(&mut self, transport: &mut Transport, mut msg: Message) -> HandlerResult {
        let dest = msg.destination();
        if !dest.is_null() && dest != self.handle {
            tracing::debug!(endpoint = %self.name, %dest, "foreign destination, delivering locally");
        }
        let name = *msg.name();

        let func = match self.find_local(Role::Recv, name.as_str()) {
            Some(func) => func,
            None if msg.is_reply() => {
                // Typically the answer to a call that already timed out.
                tracing::warn!(endpoint = %self.name, "dropping reply nobody is waiting for");
                return Ok(None);
            }
            None if name == ID_NAME => {
                let (peer,) = msg.decode_all::<(Handle,)>()?;
                tracing::debug!(endpoint = %self.name, %peer, "peer identified");
                self.peer = peer;
                return Ok(None);
            }
            None => self.find(Role::Recv, name.as_str())?,
        };

        tracing::debug!(endpoint = %self.name, %name, sync = msg.wait_for_reply(), "dispatching");
        let mut cx = Context {
            transport,
            router: self,
        };
        func.recv(&mut cx, msg)
    }

    fn addressed(&self, mut msg: Message) -> Message {
        if msg.destination().is_null() {
            msg.set_destination(self.peer);
        }
        msg
    }
}

impl Dispatch for Router {
    fn dispatch(&mut self, transport: &mut Transport, msg: Message) -> HandlerResult {
        self.deliver(transport, msg)
    }
}

/// What a handler sees of the endpoint it runs on.
pub struct Context<'a> {
    transport: &'a mut Transport,
    router: &'a mut Router,
}

impl Context<'_> {
    pub fn name(&self) -> &str {
        &self.router.name
    }

    pub fn handle(&self) -> Handle {
        self.router.handle
    }

    pub fn peer(&self) -> Handle {
        self.router.peer
    }

    pub fn set_peer(&mut self, peer: Handle) {
        self.router.peer = peer;
    }

    /// An empty reply addressed to the peer.
    pub fn new_reply(&self) -> Message {
        Message::reply(self.router.peer)
    }

    /// Send asynchronously. A null destination is filled in with the peer handle.
    pub fn send(&mut self, msg: &Message) -> Result<(), ProtocolError> {
        if msg.destination().is_null() && !self.router.peer.is_null() {
            let addressed = msg.clone().with_destination(self.router.peer);
            return self.transport.send(&addressed);
        }
        self.transport.send(msg)
    }

    /// Synchronous call from inside a handler. Nested calls from the peer are
    /// dispatched through this same endpoint while waiting.
    pub fn send_sync(&mut self, msg: Message) -> HandlerResult {
        let msg = self.router.addressed(msg);
        self.transport.send_sync(&mut *self.router, msg)
    }

    pub fn transport(&mut self) -> &mut Transport {
        &mut *self.transport
    }
}

/// A named, addressable participant on one transport.
pub struct Endpoint {
    transport: Transport,
    router: Router,
}

impl Endpoint {
    pub fn new(name: &str, transport: Transport, registry: Arc<Registry>) -> Self {
        let handle = Handle::next();
        *CURRENT.lock() = Some(CurrentEndpoint {
            name: name.to_owned(),
            handle,
        });
        tracing::debug!(endpoint = name, %handle, "endpoint created");
        Self {
            transport,
            router: Router {
                name: name.to_owned(),
                handle,
                peer: Handle::NULL,
                registry,
                send_cache: Vec::new(),
                recv_cache: Vec::new(),
            },
        }
    }

    pub fn with_peer(mut self, peer: Handle) -> Self {
        self.router.peer = peer;
        self
    }

    pub fn name(&self) -> &str {
        &self.router.name
    }

    pub fn handle(&self) -> Handle {
        self.router.handle
    }

    /// Handle the peer asked to be addressed by, once its `ID` has arrived.
    pub fn peer(&self) -> Handle {
        self.router.peer
    }

    pub fn set_peer(&mut self, peer: Handle) {
        self.router.peer = peer;
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.router.registry
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut Transport {
        &mut self.transport
    }

    /// Messages queued on the transport by earlier synchronous calls.
    pub fn pending(&self) -> usize {
        self.transport.pending_count()
    }

    /// Receive one message and hand it to its receive handler.
    pub fn receive_and_dispatch(&mut self) -> Result<Dispatched, ProtocolError> {
        let Some(msg) = self.transport.receive()? else {
            return Ok(Dispatched::Disconnected);
        };
        let name = *msg.name();
        let result = self.router.deliver(&mut self.transport, msg)?;
        Ok(Dispatched::Handled { name, result })
    }

    /// Route `msg` to the receive handler for its name, consulting the
    /// registry's loader if nothing is registered.
    pub fn deliver(&mut self, msg: Message) -> HandlerResult {
        self.router.deliver(&mut self.transport, msg)
    }

    /// Send asynchronously. A null destination is filled in with the peer handle.
    pub fn send(&mut self, msg: Message) -> Result<(), ProtocolError> {
        let msg = self.router.addressed(msg);
        self.transport.send(&msg)
    }

    pub fn send_sync(&mut self, msg: Message) -> Result<Option<Message>, ProtocolError> {
        self.send_sync_with(msg, &SyncOptions::default())
    }

    pub fn send_sync_with(
        &mut self,
        msg: Message,
        opts: &SyncOptions,
    ) -> Result<Option<Message>, ProtocolError> {
        let msg = self.router.addressed(msg);
        self.transport.send_sync_with(&mut self.router, msg, opts)
    }

    /// Send through the send-role handler registered for the message's name,
    /// which decides between an asynchronous send and a synchronous call.
    pub fn send_named(&mut self, msg: Message) -> HandlerResult {
        let func = self.router.find(Role::Send, msg.name().as_str())?;
        let mut cx = Context {
            transport: &mut self.transport,
            router: &mut self.router,
        };
        func.send(&mut cx, msg)
    }

    /// Tell the peer which handle to address us by.
    pub fn send_id(&mut self) -> Result<(), ProtocolError> {
        let msg = Message::new(ID_NAME)?.with(&self.router.handle);
        self.send(msg)
    }

    /// Names of the handlers this endpoint has resolved so far, in lookup order.
    pub fn wire_func_names(&self, role: Role) -> Vec<String> {
        let cache = match role {
            Role::Send => &self.router.send_cache,
            Role::Recv => &self.router.recv_cache,
        };
        cache.iter().map(|(name, _)| name.clone()).collect()
    }

    pub fn close(&mut self) {
        self.transport.close();
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("name", &self.router.name)
            .field("handle", &self.router.handle)
            .field("peer", &self.router.peer)
            .field("transport", &self.transport)
            .finish()
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        let mut current = CURRENT.lock();
        if current.as_ref().is_some_and(|c| c.handle == self.router.handle) {
            *current = None;
        }
    }
}
