//! Router state shared by every connection.
//!
//! All bookkeeping lives in one [`RouterState`] behind a tokio `RwLock`.
//! Methods here never await; handlers take the write lock, mutate, queue the
//! resulting notifications on the per-connection senders and release it.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use ledbus::names::{is_unique_name, validate_bus_name};
use ledbus::protocol::{
    AdvertisedNameParams, HelloParams, HelloResult, Message, NameOwnerChangedParams, Notification,
    Request, RequestId, Response, SessionJoinedParams, SessionLostParams, method,
};
use ledbus::{
    NameFlags, ReleaseNameReply, RequestNameReply, SessionId, SessionLostReason, SessionOpts,
    SessionPort, TransportMask,
};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{RwLock, mpsc, oneshot};
use tracing::{debug, info, trace};

use crate::error::{Result, RouterError};
use crate::names::{NameTable, OwnerChange};

pub type SharedState = Arc<RwLock<RouterState>>;

/// First port handed out when an attachment binds port `0`.
pub const FIRST_DYNAMIC_PORT: SessionPort = 0x8000;

/// Unique name of a router connection, e.g. `:1a2b3c4d.7`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(String);

impl ConnectionId {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ConnectionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[derive(Debug)]
struct ConnectionEntry {
    sender: mpsc::UnboundedSender<Message>,
    app_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Advert {
    owner: ConnectionId,
    name: String,
    transports: TransportMask,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Discovery {
    conn: ConnectionId,
    prefix: String,
}

#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub id: SessionId,
    pub host: ConnectionId,
    pub port: SessionPort,
    pub opts: SessionOpts,
    pub members: Vec<ConnectionId>,
}

impl SessionRecord {
    #[must_use]
    pub fn has_member(&self, conn: &ConnectionId) -> bool {
        self.members.contains(conn)
    }
}

#[derive(Debug)]
struct PendingForward {
    target: ConnectionId,
    reply: oneshot::Sender<Response>,
}

/// Result of validating a join before asking the host.
#[derive(Debug, Clone)]
pub struct JoinPlan {
    pub host: ConnectionId,
    pub port: SessionPort,
    pub opts: SessionOpts,
}

#[derive(Debug)]
pub struct RouterState {
    guid: String,
    next_serial: u64,
    connections: HashMap<ConnectionId, ConnectionEntry>,
    names: NameTable,
    adverts: Vec<Advert>,
    discoveries: Vec<Discovery>,
    ports: HashMap<(ConnectionId, SessionPort), SessionOpts>,
    sessions: HashMap<SessionId, SessionRecord>,
    next_session_id: SessionId,
    pending: HashMap<u64, PendingForward>,
    next_request_id: u64,
}

impl Default for RouterState {
    fn default() -> Self {
        Self::new()
    }
}

impl RouterState {
    #[must_use]
    pub fn new() -> Self {
        Self {
            guid: uuid::Uuid::new_v4().simple().to_string(),
            next_serial: 1,
            connections: HashMap::new(),
            names: NameTable::new(),
            adverts: Vec::new(),
            discoveries: Vec::new(),
            ports: HashMap::new(),
            sessions: HashMap::new(),
            next_session_id: 1,
            pending: HashMap::new(),
            next_request_id: 1,
        }
    }

    #[must_use]
    pub fn shared() -> SharedState {
        Arc::new(RwLock::new(Self::new()))
    }

    #[must_use]
    pub fn guid(&self) -> &str {
        &self.guid
    }

    /// Register a freshly accepted connection and assign its unique name.
    pub fn add_connection(&mut self, sender: mpsc::UnboundedSender<Message>) -> ConnectionId {
        let id = ConnectionId(format!(":{}.{}", &self.guid[..8], self.next_serial));
        self.next_serial += 1;
        self.connections.insert(
            id.clone(),
            ConnectionEntry {
                sender,
                app_name: None,
            },
        );
        id
    }

    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    #[must_use]
    pub fn is_hello(&self, conn: &ConnectionId) -> bool {
        self.connections
            .get(conn)
            .is_some_and(|c| c.app_name.is_some())
    }

    pub fn hello(&mut self, conn: &ConnectionId, params: &HelloParams) -> Result<HelloResult> {
        let entry = self
            .connections
            .get_mut(conn)
            .ok_or(RouterError::PeerGone)?;
        if entry.app_name.is_some() {
            return Err(RouterError::AlreadyHello);
        }
        entry.app_name = Some(params.app_name.clone());
        info!(conn = %conn, app = %params.app_name, "Attachment said hello");
        Ok(HelloResult {
            unique_name: conn.to_string(),
            guid: self.guid.clone(),
        })
    }

    /// Queue a message for `conn`. Messages to vanished connections are dropped.
    pub fn send_to(&self, conn: &ConnectionId, msg: Message) -> bool {
        match self.connections.get(conn) {
            Some(entry) => entry.sender.send(msg).is_ok(),
            None => false,
        }
    }

    fn notify<P: Serialize>(&self, conn: &ConnectionId, method: &str, payload: &P) {
        match Notification::with_payload(method, payload) {
            Ok(n) => {
                if !self.send_to(conn, Message::Notification(n)) {
                    trace!(conn = %conn, method, "Dropping notification for closed connection");
                }
            }
            Err(e) => debug!("Failed to encode {method} notification: {e}"),
        }
    }

    /// Resolve a destination (unique or well-known) to a live connection.
    #[must_use]
    pub fn resolve(&self, name: &str) -> Option<ConnectionId> {
        if is_unique_name(name) {
            let id = ConnectionId(name.to_string());
            return self.connections.contains_key(&id).then_some(id);
        }
        self.names.owner(name).cloned()
    }

    pub fn request_name(
        &mut self,
        conn: &ConnectionId,
        name: &str,
        flags: NameFlags,
    ) -> Result<RequestNameReply> {
        validate_bus_name(name)?;
        let (reply, change) = self.names.request(name, conn, flags);
        debug!(conn = %conn, name, ?reply, "request_name");
        if let Some(change) = change {
            self.broadcast_owner_change(&change);
        }
        Ok(reply)
    }

    pub fn release_name(&mut self, conn: &ConnectionId, name: &str) -> Result<ReleaseNameReply> {
        validate_bus_name(name)?;
        let (reply, change) = self.names.release(name, conn);
        debug!(conn = %conn, name, ?reply, "release_name");
        if let Some(change) = change {
            self.broadcast_owner_change(&change);
        }
        Ok(reply)
    }

    fn broadcast_owner_change(&self, change: &OwnerChange) {
        let payload = NameOwnerChangedParams {
            name: change.name.clone(),
            previous_owner: change.previous.as_ref().map(ToString::to_string),
            new_owner: change.new.as_ref().map(ToString::to_string),
        };
        for (conn, entry) in &self.connections {
            if entry.app_name.is_some() {
                self.notify(conn, method::NAME_OWNER_CHANGED, &payload);
            }
        }
    }

    pub fn advertise(
        &mut self,
        conn: &ConnectionId,
        name: &str,
        transports: TransportMask,
    ) -> Result<()> {
        validate_bus_name(name)?;
        if transports == TransportMask::NONE {
            return Err(RouterError::InvalidParams(
                "advertise_name needs at least one transport".to_string(),
            ));
        }

        let advert = Advert {
            owner: conn.clone(),
            name: name.to_string(),
            transports,
        };
        if self.adverts.contains(&advert) {
            return Ok(());
        }
        info!(conn = %conn, name, "Advertising name");
        self.announce(&advert, method::FOUND_ADVERTISED_NAME);
        self.adverts.push(advert);
        Ok(())
    }

    pub fn cancel_advertise(
        &mut self,
        conn: &ConnectionId,
        name: &str,
        transports: TransportMask,
    ) -> Result<()> {
        validate_bus_name(name)?;
        let (gone, kept): (Vec<Advert>, Vec<Advert>) = std::mem::take(&mut self.adverts)
            .into_iter()
            .partition(|a| a.owner == *conn && a.name == name && a.transports.intersects(transports));
        self.adverts = kept;
        for advert in &gone {
            self.announce(advert, method::LOST_ADVERTISED_NAME);
        }
        Ok(())
    }

    fn announce(&self, advert: &Advert, method: &str) {
        for discovery in &self.discoveries {
            if advert.name.starts_with(&discovery.prefix) {
                self.notify(
                    &discovery.conn,
                    method,
                    &AdvertisedNameParams {
                        name: advert.name.clone(),
                        transport: advert.transports.preferred(),
                        prefix: discovery.prefix.clone(),
                    },
                );
            }
        }
    }

    /// Start discovery for `prefix`; names already advertised are reported
    /// right away.
    pub fn find(&mut self, conn: &ConnectionId, prefix: &str) {
        let discovery = Discovery {
            conn: conn.clone(),
            prefix: prefix.to_string(),
        };
        if self.discoveries.contains(&discovery) {
            return;
        }
        debug!(conn = %conn, prefix, "Discovery started");
        for advert in self.adverts.iter().filter(|a| a.name.starts_with(prefix)) {
            self.notify(
                conn,
                method::FOUND_ADVERTISED_NAME,
                &AdvertisedNameParams {
                    name: advert.name.clone(),
                    transport: advert.transports.preferred(),
                    prefix: prefix.to_string(),
                },
            );
        }
        self.discoveries.push(discovery);
    }

    pub fn cancel_find(&mut self, conn: &ConnectionId, prefix: &str) {
        self.discoveries
            .retain(|d| !(d.conn == *conn && d.prefix == prefix));
    }

    pub fn bind_port(
        &mut self,
        conn: &ConnectionId,
        port: SessionPort,
        opts: SessionOpts,
    ) -> Result<SessionPort> {
        let port = if port == 0 {
            (FIRST_DYNAMIC_PORT..=SessionPort::MAX)
                .find(|p| !self.ports.contains_key(&(conn.clone(), *p)))
                .ok_or(RouterError::PortAlreadyBound(0))?
        } else {
            port
        };
        let key = (conn.clone(), port);
        if self.ports.contains_key(&key) {
            return Err(RouterError::PortAlreadyBound(port));
        }
        info!(conn = %conn, port, "Session port bound");
        self.ports.insert(key, opts);
        Ok(port)
    }

    pub fn unbind_port(&mut self, conn: &ConnectionId, port: SessionPort) -> Result<()> {
        self.ports
            .remove(&(conn.clone(), port))
            .map(|_| ())
            .ok_or(RouterError::NoSuchSessionPort(port))
    }

    /// Check a join request against the host's bound port.
    pub fn prepare_join(
        &self,
        host_name: &str,
        port: SessionPort,
        opts: &SessionOpts,
    ) -> Result<JoinPlan> {
        let host = self
            .resolve(host_name)
            .ok_or_else(|| RouterError::ServiceUnknown(host_name.to_string()))?;
        let bound = self
            .ports
            .get(&(host.clone(), port))
            .ok_or(RouterError::NoSuchSessionPort(port))?;
        if !bound.is_compatible(opts) {
            return Err(RouterError::IncompatibleOpts);
        }
        Ok(JoinPlan {
            host,
            port,
            opts: bound.negotiate(opts),
        })
    }

    /// Record an accepted join. Multipoint ports reuse the live session.
    pub fn complete_join(&mut self, joiner: &ConnectionId, plan: &JoinPlan) -> Result<SessionId> {
        if !self.connections.contains_key(&plan.host) {
            return Err(RouterError::PeerGone);
        }
        if !self.ports.contains_key(&(plan.host.clone(), plan.port)) {
            return Err(RouterError::NoSuchSessionPort(plan.port));
        }

        let existing = plan.opts.is_multipoint.then(|| {
            self.sessions
                .values()
                .find(|s| s.host == plan.host && s.port == plan.port && s.opts.is_multipoint)
                .map(|s| s.id)
        });

        let id = if let Some(Some(id)) = existing {
            if let Some(record) = self.sessions.get_mut(&id)
                && !record.has_member(joiner)
            {
                record.members.push(joiner.clone());
            }
            id
        } else {
            let id = self.allocate_session_id();
            self.sessions.insert(
                id,
                SessionRecord {
                    id,
                    host: plan.host.clone(),
                    port: plan.port,
                    opts: plan.opts,
                    members: vec![plan.host.clone(), joiner.clone()],
                },
            );
            id
        };

        info!(host = %plan.host, joiner = %joiner, port = plan.port, session_id = id, "Session joined");
        self.notify(
            &plan.host,
            method::SESSION_JOINED,
            &SessionJoinedParams {
                port: plan.port,
                session_id: id,
                joiner: joiner.to_string(),
            },
        );
        Ok(id)
    }

    fn allocate_session_id(&mut self) -> SessionId {
        loop {
            let id = self.next_session_id;
            self.next_session_id = self.next_session_id.wrapping_add(1);
            if id != 0 && !self.sessions.contains_key(&id) {
                return id;
            }
        }
    }

    #[must_use]
    pub fn session(&self, id: SessionId) -> Option<&SessionRecord> {
        self.sessions.get(&id)
    }

    pub fn leave_session(&mut self, conn: &ConnectionId, id: SessionId) -> Result<()> {
        if !self.sessions.get(&id).is_some_and(|s| s.has_member(conn)) {
            return Err(RouterError::NoSession(id));
        }
        self.drop_member(id, conn, SessionLostReason::RemoteEndLeft);
        Ok(())
    }

    /// Remove `conn` from session `id`; a session left with fewer than two
    /// members is dissolved and the remaining member told why.
    fn drop_member(&mut self, id: SessionId, conn: &ConnectionId, reason: SessionLostReason) {
        let Some(record) = self.sessions.get_mut(&id) else {
            return;
        };
        record.members.retain(|m| m != conn);
        if record.members.len() >= 2 {
            return;
        }
        let Some(record) = self.sessions.remove(&id) else {
            return;
        };
        info!(session_id = id, %reason, "Session lost");
        for member in &record.members {
            self.notify(
                member,
                method::SESSION_LOST,
                &SessionLostParams {
                    session_id: id,
                    reason,
                },
            );
        }
    }

    /// Calls inside a session require both ends to be members of it;
    /// session `0` means a sessionless call.
    pub fn check_session(
        &self,
        caller: &ConnectionId,
        target: &ConnectionId,
        id: SessionId,
    ) -> Result<()> {
        if id == 0 {
            return Ok(());
        }
        match self.sessions.get(&id) {
            Some(record) if record.has_member(caller) && record.has_member(target) => Ok(()),
            _ => Err(RouterError::NoSession(id)),
        }
    }

    /// Send a request to `target` on behalf of another connection. The
    /// target's response is delivered through the returned receiver.
    pub fn forward(
        &mut self,
        target: &ConnectionId,
        method: &str,
        params: Value,
    ) -> Result<(u64, oneshot::Receiver<Response>)> {
        let id = self.next_request_id;
        self.next_request_id += 1;
        let (tx, rx) = oneshot::channel();
        let request = Request::new(method, Some(params), RequestId::Number(id));
        if !self.send_to(target, Message::Request(request)) {
            return Err(RouterError::PeerGone);
        }
        self.pending.insert(
            id,
            PendingForward {
                target: target.clone(),
                reply: tx,
            },
        );
        Ok((id, rx))
    }

    pub fn cancel_forward(&mut self, id: u64) {
        self.pending.remove(&id);
    }

    /// Hand a response from `from` to whoever is waiting on it.
    pub fn complete_forward(&mut self, from: &ConnectionId, response: Response) {
        let RequestId::Number(id) = response.id else {
            debug!(conn = %from, id = %response.id, "Response with foreign id");
            return;
        };
        match self.pending.get(&id) {
            Some(p) if p.target == *from => {
                if let Some(pending) = self.pending.remove(&id) {
                    let _ = pending.reply.send(response);
                }
            }
            _ => debug!(conn = %from, id, "Response to unknown request"),
        }
    }

    /// Forget everything `conn` owned and tell the peers that care.
    pub fn remove_connection(&mut self, conn: &ConnectionId) {
        if self.connections.remove(conn).is_none() {
            return;
        }

        for change in self.names.remove_connection(conn) {
            self.broadcast_owner_change(&change);
        }

        let (gone, kept): (Vec<Advert>, Vec<Advert>) = std::mem::take(&mut self.adverts)
            .into_iter()
            .partition(|a| a.owner == *conn);
        self.adverts = kept;
        for advert in &gone {
            self.announce(advert, method::LOST_ADVERTISED_NAME);
        }

        self.discoveries.retain(|d| d.conn != *conn);
        self.ports.retain(|(owner, _), _| owner != conn);

        let member_of: Vec<SessionId> = self
            .sessions
            .values()
            .filter(|s| s.has_member(conn))
            .map(|s| s.id)
            .collect();
        for id in member_of {
            self.drop_member(id, conn, SessionLostReason::RemoteEndClosedAbruptly);
        }

        // Dropping the reply senders wakes their waiters with PeerGone.
        self.pending.retain(|_, p| p.target != *conn);

        debug!(conn = %conn, "Connection state removed");
    }

    #[must_use]
    pub fn name_owner(&self, name: &str) -> Option<&ConnectionId> {
        self.names.owner(name)
    }

    #[must_use]
    pub fn is_port_bound(&self, conn: &ConnectionId, port: SessionPort) -> bool {
        self.ports.contains_key(&(conn.clone(), port))
    }

    #[must_use]
    pub fn advertised_names(&self) -> HashSet<String> {
        self.adverts.iter().map(|a| a.name.clone()).collect()
    }
}
