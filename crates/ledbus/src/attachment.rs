//! The bus attachment: one application's connection to the router.
//!
//! A [`BusAttachment`] holds the application's interfaces, bus objects and
//! listeners. After [`start`](BusAttachment::start) it owns a callback
//! dispatcher; after [`connect`](BusAttachment::connect) it owns a reader and
//! a writer task on the router socket. Handles are cheap to clone; background
//! tasks only keep weak references, so dropping the last handle shuts
//! everything down.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::net::UnixStream;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tracing::{debug, info, trace, warn};

use crate::address::BusAddress;
use crate::dispatch::{
    self, BusEvent, Callback, DynBusListener, DynSessionListener, DynSessionPortListener,
    PortEvent,
};
use crate::error::{BusError, Result};
use crate::interface::InterfaceDescription;
use crate::listener::{BusListener, SessionListener, SessionPortListener};
use crate::names::{
    NameFlags, ReleaseNameReply, RequestNameReply, validate_bus_name, validate_destination,
};
use crate::object::{BusObject, MethodCall, MethodHandler};
use crate::protocol::{
    AcceptJoinerParams, AcceptJoinerResult, AdvertiseParams, AdvertisedNameParams,
    BindSessionPortParams, BindSessionPortResult, FindParams, HelloParams, HelloResult,
    JoinSessionParams, JoinSessionResult, LeaveSessionParams, Message, MethodCallParams,
    NameOwnerChangedParams, NameParams, ReleaseNameResult, Request, RequestId,
    RequestNameParams, RequestNameResult, Response, RpcError, SessionJoinedParams,
    SessionLostParams, UnbindSessionPortParams, method,
};
use crate::session::{SessionId, SessionOpts, SessionPort, TransportMask};
use crate::transport::FrameCodec;
use crate::util::lock;

/// Limit for calls answered by the router itself.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

type Pending = Arc<Mutex<HashMap<RequestId, oneshot::Sender<Response>>>>;
type RouterStream = SplitStream<Framed<UnixStream, FrameCodec>>;

struct Connection {
    unique_name: String,
    guid: String,
    generation: u64,
    outgoing: mpsc::UnboundedSender<Message>,
    pending: Pending,
    tasks: Vec<JoinHandle<()>>,
}

impl Drop for Connection {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

struct Inner {
    app_name: String,
    allow_remote_messages: bool,
    interfaces: Mutex<HashMap<String, InterfaceDescription>>,
    objects: Mutex<HashMap<String, Arc<BusObject>>>,
    bus_listeners: Mutex<Vec<Arc<dyn DynBusListener>>>,
    port_listeners: Mutex<HashMap<SessionPort, Arc<dyn DynSessionPortListener>>>,
    session_listeners: Mutex<HashMap<SessionId, Arc<dyn DynSessionListener>>>,
    callbacks: Mutex<Option<mpsc::UnboundedSender<Callback>>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    connection: Mutex<Option<Connection>>,
    next_id: AtomicU64,
    next_generation: AtomicU64,
}

#[derive(Clone)]
pub struct BusAttachment {
    inner: Arc<Inner>,
}

/// Non-owning handle, for listeners that need to call back into the bus.
#[derive(Clone)]
pub struct WeakBusAttachment {
    inner: Weak<Inner>,
}

impl WeakBusAttachment {
    #[must_use]
    pub fn upgrade(&self) -> Option<BusAttachment> {
        self.inner.upgrade().map(|inner| BusAttachment { inner })
    }
}

impl BusAttachment {
    /// Create an attachment. With `allow_remote_messages` false, method calls
    /// from other attachments are rejected.
    #[must_use]
    pub fn new(app_name: &str, allow_remote_messages: bool) -> Self {
        Self {
            inner: Arc::new(Inner {
                app_name: app_name.to_string(),
                allow_remote_messages,
                interfaces: Mutex::default(),
                objects: Mutex::default(),
                bus_listeners: Mutex::default(),
                port_listeners: Mutex::default(),
                session_listeners: Mutex::default(),
                callbacks: Mutex::default(),
                dispatcher: Mutex::default(),
                connection: Mutex::default(),
                next_id: AtomicU64::new(1),
                next_generation: AtomicU64::new(1),
            }),
        }
    }

    #[must_use]
    pub fn downgrade(&self) -> WeakBusAttachment {
        WeakBusAttachment {
            inner: Arc::downgrade(&self.inner),
        }
    }

    #[must_use]
    pub fn app_name(&self) -> &str {
        &self.inner.app_name
    }

    /// Unique name assigned by the router, once connected.
    #[must_use]
    pub fn unique_name(&self) -> Option<String> {
        self.inner.unique_name()
    }

    /// Router guid, once connected.
    #[must_use]
    pub fn router_guid(&self) -> Option<String> {
        lock(&self.inner.connection)
            .as_ref()
            .map(|c| c.guid.clone())
    }

    #[must_use]
    pub fn is_started(&self) -> bool {
        lock(&self.inner.dispatcher).is_some()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        lock(&self.inner.connection).is_some()
    }

    /// Register an activated interface so it can be found by name.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::InterfaceExists`] if a different interface with the
    /// same name is registered.
    pub fn register_interface(&self, iface: InterfaceDescription) -> Result<InterfaceDescription> {
        let mut interfaces = lock(&self.inner.interfaces);
        if let Some(existing) = interfaces.get(iface.name()) {
            if *existing == iface {
                return Ok(existing.clone());
            }
            return Err(BusError::InterfaceExists(iface.name().to_string()));
        }
        interfaces.insert(iface.name().to_string(), iface.clone());
        Ok(iface)
    }

    #[must_use]
    pub fn interface(&self, name: &str) -> Option<InterfaceDescription> {
        lock(&self.inner.interfaces).get(name).cloned()
    }

    pub fn register_bus_listener<L: BusListener>(&self, listener: Arc<L>) {
        lock(&self.inner.bus_listeners).push(listener);
    }

    pub fn unregister_bus_listener<L: BusListener>(&self, listener: &Arc<L>) {
        lock(&self.inner.bus_listeners)
            .retain(|l| !std::ptr::addr_eq(Arc::as_ptr(l), Arc::as_ptr(listener)));
    }

    /// Start the callback dispatcher. Must be called inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::AlreadyStarted`] on a second call and
    /// [`BusError::NoRuntime`] outside a runtime.
    pub fn start(&self) -> Result<()> {
        let handle = Handle::try_current().map_err(|_| BusError::NoRuntime)?;
        let mut dispatcher = lock(&self.inner.dispatcher);
        if dispatcher.is_some() {
            return Err(BusError::AlreadyStarted);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let weak = Arc::downgrade(&self.inner);
        *dispatcher = Some(handle.spawn(dispatch::run(rx, move |callback| {
            weak.upgrade().map(|inner| inner.resolve(callback))
        })));
        *lock(&self.inner.callbacks) = Some(tx);

        debug!(app = %self.inner.app_name, "Bus attachment started");
        Ok(())
    }

    /// Disconnect and stop the dispatcher. Listeners are dropped; interfaces
    /// and registered objects are kept. Safe to call more than once.
    pub fn stop(&self) {
        if lock(&self.inner.connection).take().is_some() {
            debug!(app = %self.inner.app_name, "Disconnected from router");
        }
        lock(&self.inner.callbacks).take();
        if let Some(dispatcher) = lock(&self.inner.dispatcher).take() {
            dispatcher.abort();
        }
        lock(&self.inner.bus_listeners).clear();
        lock(&self.inner.port_listeners).clear();
        lock(&self.inner.session_listeners).clear();
        debug!(app = %self.inner.app_name, "Bus attachment stopped");
    }

    /// Expose `object` at its path.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::NotStarted`] before [`start`](Self::start) and
    /// [`BusError::ObjectExists`] if the path is taken.
    pub fn register_bus_object(&self, object: BusObject) -> Result<()> {
        if !self.is_started() {
            return Err(BusError::NotStarted);
        }
        let object = Arc::new(object);
        {
            let mut objects = lock(&self.inner.objects);
            if objects.contains_key(object.path()) {
                return Err(BusError::ObjectExists(object.path().to_string()));
            }
            objects.insert(object.path().to_string(), object.clone());
        }
        if self.is_connected() {
            self.inner.queue(Callback::ObjectRegistered(object));
        }
        Ok(())
    }

    /// Returns whether an object was registered at `path`.
    pub fn unregister_bus_object(&self, path: &str) -> bool {
        lock(&self.inner.objects).remove(path).is_some()
    }

    /// Connect to the router at `spec` and say hello.
    ///
    /// # Errors
    ///
    /// Fails if the attachment is not started or already connected, the spec
    /// is invalid, or the router cannot be reached.
    pub async fn connect(&self, spec: &str) -> Result<()> {
        if !dispatch::blocking_calls_allowed() {
            return Err(BusError::BlockingCallNotAllowed);
        }
        if !self.is_started() {
            return Err(BusError::NotStarted);
        }
        if self.is_connected() {
            return Err(BusError::AlreadyConnected);
        }

        let address: BusAddress = spec.parse()?;
        let stream = address.connect().await?;
        let (mut sink, stream) = Framed::new(stream, FrameCodec::new()).split();
        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<Message>();
        let pending: Pending = Arc::default();
        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);

        let writer = tokio::spawn(async move {
            while let Some(msg) = outgoing_rx.recv().await {
                if let Err(e) = sink.send(msg).await {
                    warn!("Failed to send to router: {e}");
                    break;
                }
            }
        });
        let reader = tokio::spawn(read_loop(
            Arc::downgrade(&self.inner),
            stream,
            outgoing.clone(),
            pending.clone(),
            generation,
        ));

        let mut connection = Connection {
            unique_name: String::new(),
            guid: String::new(),
            generation,
            outgoing,
            pending,
            tasks: vec![reader, writer],
        };

        let hello: HelloResult = request(
            &connection.outgoing,
            &connection.pending,
            self.inner.next_request_id(),
            method::HELLO,
            &HelloParams {
                app_name: self.inner.app_name.clone(),
                allow_remote_messages: self.inner.allow_remote_messages,
            },
            DEFAULT_CALL_TIMEOUT,
        )
        .await?;
        connection.unique_name = hello.unique_name;
        connection.guid = hello.guid;

        {
            let mut slot = lock(&self.inner.connection);
            if slot.is_some() {
                return Err(BusError::AlreadyConnected);
            }
            info!(
                app = %self.inner.app_name,
                unique_name = %connection.unique_name,
                "Connected to router at {address}"
            );
            *slot = Some(connection);
        }

        let objects: Vec<Arc<BusObject>> = lock(&self.inner.objects).values().cloned().collect();
        for object in objects {
            self.inner.queue(Callback::ObjectRegistered(object));
        }
        Ok(())
    }

    /// Drop the router connection. The router releases names, advertisements,
    /// bound ports and sessions owned by this attachment.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::NotConnected`] if there is no connection.
    pub fn disconnect(&self) -> Result<()> {
        lock(&self.inner.connection)
            .take()
            .map(|_| ())
            .ok_or(BusError::NotConnected)
    }

    /// Request ownership of a well-known name. Succeeds only when this
    /// attachment becomes the primary owner.
    ///
    /// # Errors
    ///
    /// [`BusError::NameExists`], [`BusError::NameInQueue`] or
    /// [`BusError::NameAlreadyOwner`] describe the router's answer; other
    /// errors come from the call itself.
    pub async fn request_name(&self, name: &str, flags: NameFlags) -> Result<()> {
        validate_bus_name(name)?;
        let result: RequestNameResult = self
            .call(
                method::REQUEST_NAME,
                &RequestNameParams {
                    name: name.to_string(),
                    flags,
                },
                DEFAULT_CALL_TIMEOUT,
            )
            .await?;
        match result.reply {
            RequestNameReply::PrimaryOwner => Ok(()),
            RequestNameReply::InQueue => Err(BusError::NameInQueue),
            RequestNameReply::Exists => Err(BusError::NameExists),
            RequestNameReply::AlreadyOwner => Err(BusError::NameAlreadyOwner),
        }
    }

    /// # Errors
    ///
    /// Returns an error if the name is invalid or the call fails.
    pub async fn release_name(&self, name: &str) -> Result<ReleaseNameReply> {
        validate_bus_name(name)?;
        let result: ReleaseNameResult = self
            .call(
                method::RELEASE_NAME,
                &NameParams {
                    name: name.to_string(),
                },
                DEFAULT_CALL_TIMEOUT,
            )
            .await?;
        Ok(result.reply)
    }

    /// # Errors
    ///
    /// Returns an error if the name is invalid or the call fails.
    pub async fn advertise_name(&self, name: &str, transports: TransportMask) -> Result<()> {
        validate_bus_name(name)?;
        let params = AdvertiseParams {
            name: name.to_string(),
            transports,
        };
        let _: Value = self
            .call(method::ADVERTISE_NAME, &params, DEFAULT_CALL_TIMEOUT)
            .await?;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns an error if the call fails.
    pub async fn cancel_advertise_name(&self, name: &str, transports: TransportMask) -> Result<()> {
        let params = AdvertiseParams {
            name: name.to_string(),
            transports,
        };
        let _: Value = self
            .call(method::CANCEL_ADVERTISE_NAME, &params, DEFAULT_CALL_TIMEOUT)
            .await?;
        Ok(())
    }

    /// Report advertised names starting with `prefix` through
    /// [`BusListener::found_advertised_name`].
    ///
    /// # Errors
    ///
    /// Returns an error if the call fails.
    pub async fn find_advertised_name(&self, prefix: &str) -> Result<()> {
        let params = FindParams {
            prefix: prefix.to_string(),
        };
        let _: Value = self
            .call(method::FIND_ADVERTISED_NAME, &params, DEFAULT_CALL_TIMEOUT)
            .await?;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns an error if the call fails.
    pub async fn cancel_find_advertised_name(&self, prefix: &str) -> Result<()> {
        let params = FindParams {
            prefix: prefix.to_string(),
        };
        let _: Value = self
            .call(
                method::CANCEL_FIND_ADVERTISED_NAME,
                &params,
                DEFAULT_CALL_TIMEOUT,
            )
            .await?;
        Ok(())
    }

    /// Bind a session port. `listener` decides on joiners. Passing port `0`
    /// lets the router choose; the bound port is returned.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::PortAlreadyBound`] if this attachment already bound
    /// the port, or an error from the call itself.
    pub async fn bind_session_port<L: SessionPortListener>(
        &self,
        port: SessionPort,
        opts: SessionOpts,
        listener: Arc<L>,
    ) -> Result<SessionPort> {
        let listener: Arc<dyn DynSessionPortListener> = listener;
        // Joiners may arrive as soon as the router binds the port.
        if port != 0 {
            let mut listeners = lock(&self.inner.port_listeners);
            if listeners.contains_key(&port) {
                return Err(BusError::PortAlreadyBound);
            }
            listeners.insert(port, listener.clone());
        }

        let result: Result<BindSessionPortResult> = self
            .call(
                method::BIND_SESSION_PORT,
                &BindSessionPortParams { port, opts },
                DEFAULT_CALL_TIMEOUT,
            )
            .await;
        match result {
            Ok(bound) => {
                if port == 0 {
                    lock(&self.inner.port_listeners).insert(bound.port, listener);
                }
                Ok(bound.port)
            }
            Err(e) => {
                if port != 0 {
                    lock(&self.inner.port_listeners).remove(&port);
                }
                Err(e)
            }
        }
    }

    /// # Errors
    ///
    /// Returns an error if the port is not bound or the call fails.
    pub async fn unbind_session_port(&self, port: SessionPort) -> Result<()> {
        let _: Value = self
            .call(
                method::UNBIND_SESSION_PORT,
                &UnbindSessionPortParams { port },
                DEFAULT_CALL_TIMEOUT,
            )
            .await?;
        lock(&self.inner.port_listeners).remove(&port);
        Ok(())
    }

    /// Join a session hosted by `host` on `port`. Returns the session id and
    /// the options in effect.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::ServiceUnknown`], [`BusError::NoSuchSessionPort`],
    /// [`BusError::IncompatibleOpts`], [`BusError::SessionRejected`] or a call
    /// error.
    pub async fn join_session(
        &self,
        host: &str,
        port: SessionPort,
        opts: SessionOpts,
    ) -> Result<(SessionId, SessionOpts)> {
        validate_destination(host)?;
        let params = JoinSessionParams {
            host: host.to_string(),
            port,
            opts,
        };
        let joined: JoinSessionResult = self
            .call(method::JOIN_SESSION, &params, DEFAULT_CALL_TIMEOUT)
            .await?;
        debug!(host, port, session_id = joined.session_id, "Joined session");
        Ok((joined.session_id, joined.opts))
    }

    /// Receive [`SessionListener::session_lost`] for `session_id`.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::NoSession`] for session id `0`.
    pub fn set_session_listener<L: SessionListener>(
        &self,
        session_id: SessionId,
        listener: Arc<L>,
    ) -> Result<()> {
        if session_id == 0 {
            return Err(BusError::NoSession);
        }
        lock(&self.inner.session_listeners).insert(session_id, listener);
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`BusError::NoSession`] if this attachment is not a member.
    pub async fn leave_session(&self, session_id: SessionId) -> Result<()> {
        let _: Value = self
            .call(
                method::LEAVE_SESSION,
                &LeaveSessionParams { session_id },
                DEFAULT_CALL_TIMEOUT,
            )
            .await?;
        lock(&self.inner.session_listeners).remove(&session_id);
        Ok(())
    }

    /// From inside a callback: allow blocking bus calls and let the
    /// dispatcher deliver further callbacks while this one runs. Has no
    /// effect elsewhere.
    pub fn enable_concurrent_callbacks(&self) {
        if !dispatch::enable_concurrent_callbacks() {
            trace!("enable_concurrent_callbacks called outside a callback");
        }
    }

    pub(crate) async fn call<P, R>(&self, method: &str, params: &P, timeout: Duration) -> Result<R>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        if !dispatch::blocking_calls_allowed() {
            return Err(BusError::BlockingCallNotAllowed);
        }
        let (outgoing, pending) = {
            let connection = lock(&self.inner.connection);
            let c = connection.as_ref().ok_or(BusError::NotConnected)?;
            (c.outgoing.clone(), c.pending.clone())
        };
        let id = self.inner.next_request_id();
        request(&outgoing, &pending, id, method, params, timeout).await
    }
}

impl std::fmt::Debug for BusAttachment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusAttachment")
            .field("app_name", &self.inner.app_name)
            .field("unique_name", &self.unique_name())
            .finish_non_exhaustive()
    }
}

impl Inner {
    fn next_request_id(&self) -> RequestId {
        RequestId::Number(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn unique_name(&self) -> Option<String> {
        lock(&self.connection)
            .as_ref()
            .map(|c| c.unique_name.clone())
    }

    fn queue(&self, callback: Callback) {
        if let Some(tx) = lock(&self.callbacks).as_ref() {
            let _ = tx.send(callback);
        }
    }

    fn resolve(&self, callback: Callback) -> BoxFuture<'static, ()> {
        match callback {
            Callback::Bus(event) => {
                let listeners = lock(&self.bus_listeners).clone();
                Box::pin(async move {
                    for listener in listeners {
                        listener.deliver(event.clone()).await;
                    }
                })
            }
            Callback::Port(event) => {
                let port = match &event {
                    PortEvent::AcceptJoiner { port, .. } | PortEvent::SessionJoined { port, .. } => {
                        *port
                    }
                };
                match lock(&self.port_listeners).get(&port).cloned() {
                    Some(listener) => listener.deliver(event),
                    None => Box::pin(async {}),
                }
            }
            Callback::SessionLost { session_id, reason } => {
                match lock(&self.session_listeners).remove(&session_id) {
                    Some(listener) => listener.deliver(session_id, reason),
                    None => Box::pin(async {}),
                }
            }
            Callback::ObjectRegistered(object) => Box::pin(async move { object.registered() }),
        }
    }

    fn handle_request(
        &self,
        id: RequestId,
        method: &str,
        params: Option<Value>,
        outgoing: &mpsc::UnboundedSender<Message>,
    ) {
        match method {
            method::METHOD_CALL => self.handle_method_call(id, params, outgoing),
            method::ACCEPT_SESSION_JOINER => self.handle_accept_joiner(id, params, outgoing),
            other => {
                debug!("Router sent unknown request {other}");
                let _ = outgoing.send(Message::Response(Response::error(
                    id,
                    RpcError::method_not_found(other),
                )));
            }
        }
    }

    fn handle_method_call(
        &self,
        id: RequestId,
        params: Option<Value>,
        outgoing: &mpsc::UnboundedSender<Message>,
    ) {
        let prepared = parse_params::<MethodCallParams>(params)
            .and_then(|params| self.prepare_call(id.clone(), params, outgoing));
        match prepared {
            Ok((call, handler)) => {
                trace!(?call, "Dispatching method call");
                tokio::task::spawn_blocking(move || handler.handle(call));
            }
            Err(e) => {
                debug!("Rejecting method call: {e}");
                let _ = outgoing.send(Message::Response(Response::error(id, e.to_rpc_error())));
            }
        }
    }

    fn prepare_call(
        &self,
        id: RequestId,
        params: MethodCallParams,
        outgoing: &mpsc::UnboundedSender<Message>,
    ) -> Result<(MethodCall, Arc<dyn MethodHandler>)> {
        let sender = params.sender.unwrap_or_default();
        if !self.allow_remote_messages && self.unique_name().as_deref() != Some(sender.as_str()) {
            return Err(BusError::RemoteMessagesNotAllowed);
        }

        let object = lock(&self.objects)
            .get(&params.path)
            .cloned()
            .ok_or_else(|| BusError::NoSuchObject(params.path.clone()))?;
        let (member, handler) = object.handler(&params.interface, &params.member)?;
        member.input.check(&params.args)?;

        let call = MethodCall::new(
            id,
            sender,
            params.session_id,
            params.path,
            member,
            params.args,
            outgoing.clone(),
        );
        Ok((call, handler))
    }

    fn handle_accept_joiner(
        &self,
        id: RequestId,
        params: Option<Value>,
        outgoing: &mpsc::UnboundedSender<Message>,
    ) {
        let params = match parse_params::<AcceptJoinerParams>(params) {
            Ok(p) => p,
            Err(e) => {
                let _ = outgoing.send(Message::Response(Response::error(
                    id,
                    RpcError::invalid_params(e.to_string()),
                )));
                return;
            }
        };

        let (reply, decision) = oneshot::channel();
        self.queue(Callback::Port(PortEvent::AcceptJoiner {
            port: params.port,
            joiner: params.joiner,
            opts: params.opts,
            reply,
        }));

        let outgoing = outgoing.clone();
        tokio::spawn(async move {
            // Dropped without an answer when nobody listens on the port.
            let accepted = decision.await.unwrap_or(false);
            let response = match serde_json::to_value(AcceptJoinerResult { accepted }) {
                Ok(result) => Response::success(id, result),
                Err(e) => Response::error(id, RpcError::internal_error(e.to_string())),
            };
            let _ = outgoing.send(Message::Response(response));
        });
    }

    fn handle_notification(&self, method: &str, params: Option<Value>) {
        let callback = match method {
            method::FOUND_ADVERTISED_NAME => {
                parse_params::<AdvertisedNameParams>(params).map(|p| {
                    Callback::Bus(BusEvent::FoundAdvertisedName {
                        name: p.name,
                        transport: p.transport,
                        prefix: p.prefix,
                    })
                })
            }
            method::LOST_ADVERTISED_NAME => parse_params::<AdvertisedNameParams>(params).map(|p| {
                Callback::Bus(BusEvent::LostAdvertisedName {
                    name: p.name,
                    transport: p.transport,
                    prefix: p.prefix,
                })
            }),
            method::NAME_OWNER_CHANGED => parse_params::<NameOwnerChangedParams>(params).map(|p| {
                Callback::Bus(BusEvent::NameOwnerChanged {
                    name: p.name,
                    previous_owner: p.previous_owner,
                    new_owner: p.new_owner,
                })
            }),
            method::SESSION_JOINED => parse_params::<SessionJoinedParams>(params).map(|p| {
                Callback::Port(PortEvent::SessionJoined {
                    port: p.port,
                    session_id: p.session_id,
                    joiner: p.joiner,
                })
            }),
            method::SESSION_LOST => {
                parse_params::<SessionLostParams>(params).map(|p| Callback::SessionLost {
                    session_id: p.session_id,
                    reason: p.reason,
                })
            }
            other => {
                debug!("Ignoring notification {other}");
                return;
            }
        };

        match callback {
            Ok(callback) => self.queue(callback),
            Err(e) => warn!("Malformed {method} notification: {e}"),
        }
    }

    fn connection_lost(&self, generation: u64) {
        let lost = {
            let mut slot = lock(&self.connection);
            if slot.as_ref().is_some_and(|c| c.generation == generation) {
                slot.take()
            } else {
                None
            }
        };
        if lost.is_some() {
            warn!(app = %self.app_name, "Lost connection to router");
            lock(&self.session_listeners).clear();
            self.queue(Callback::Bus(BusEvent::BusDisconnected));
        }
        // Dropping the connection aborts this task; nothing may follow.
        drop(lost);
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(dispatcher) = lock(&self.dispatcher).take() {
            dispatcher.abort();
        }
    }
}

fn parse_params<T: DeserializeOwned>(params: Option<Value>) -> Result<T> {
    Ok(serde_json::from_value(params.unwrap_or(Value::Null))?)
}

async fn request<P, R>(
    outgoing: &mpsc::UnboundedSender<Message>,
    pending: &Pending,
    id: RequestId,
    method: &str,
    params: &P,
    timeout: Duration,
) -> Result<R>
where
    P: Serialize,
    R: DeserializeOwned,
{
    let request = Request::new(method, Some(serde_json::to_value(params)?), id.clone());
    let (tx, rx) = oneshot::channel();
    lock(pending).insert(id.clone(), tx);

    if outgoing.send(Message::Request(request)).is_err() {
        lock(pending).remove(&id);
        return Err(BusError::ConnectionClosed);
    }

    let response = match tokio::time::timeout(timeout, rx).await {
        Ok(Ok(response)) => response,
        Ok(Err(_)) => return Err(BusError::ConnectionClosed),
        Err(_) => {
            lock(pending).remove(&id);
            return Err(BusError::Timeout);
        }
    };

    if let Some(error) = response.error {
        return Err(error.into());
    }
    let result = response.result.ok_or(BusError::UnexpectedResponse)?;
    Ok(serde_json::from_value(result)?)
}

async fn read_loop(
    inner: Weak<Inner>,
    mut stream: RouterStream,
    outgoing: mpsc::UnboundedSender<Message>,
    pending: Pending,
    generation: u64,
) {
    while let Some(frame) = stream.next().await {
        let msg = match frame {
            Ok(msg) => msg,
            Err(e) => {
                warn!("Router connection error: {e}");
                break;
            }
        };

        match msg {
            Message::Response(response) => {
                let waiter = lock(&pending).remove(&response.id);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(response);
                    }
                    None => debug!(id = %response.id, "Response to unknown request"),
                }
            }
            Message::Request(req) => {
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                match req.id {
                    Some(id) => inner.handle_request(id, &req.method, req.params, &outgoing),
                    None => inner.handle_notification(&req.method, req.params),
                }
            }
            Message::Notification(n) => {
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                inner.handle_notification(&n.method, n.params);
            }
        }
    }

    // Waiters see their sender dropped and report ConnectionClosed.
    lock(&pending).clear();
    if let Some(inner) = inner.upgrade() {
        inner.connection_lost(generation);
    }
}
