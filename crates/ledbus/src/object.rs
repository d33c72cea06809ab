//! Bus objects and incoming method calls.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{BusError, Result};
use crate::interface::{InterfaceDescription, Member};
use crate::msgarg::{FromMsgArg, MsgArg};
use crate::names::validate_object_path;
use crate::protocol::{Message, MethodReply, RequestId, Response, RpcError};
use crate::session::SessionId;

/// Handles calls to one method member. Runs on the blocking pool.
pub trait MethodHandler: Send + Sync + 'static {
    fn handle(&self, call: MethodCall);
}

impl<F> MethodHandler for F
where
    F: Fn(MethodCall) + Send + Sync + 'static,
{
    fn handle(&self, call: MethodCall) {
        self(call);
    }
}

type RegisteredHook = Box<dyn Fn(&str) + Send + Sync>;

/// An object exposed at a path, implementing one or more interfaces.
pub struct BusObject {
    path: String,
    interfaces: HashMap<String, InterfaceDescription>,
    handlers: HashMap<(String, String), (Member, Arc<dyn MethodHandler>)>,
    on_registered: Option<RegisteredHook>,
}

impl BusObject {
    /// # Errors
    ///
    /// Returns [`BusError::InvalidName`] if `path` is not a valid object path.
    pub fn new(path: &str) -> Result<Self> {
        validate_object_path(path)?;
        Ok(Self {
            path: path.to_string(),
            interfaces: HashMap::new(),
            handlers: HashMap::new(),
            on_registered: None,
        })
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// # Errors
    ///
    /// Returns [`BusError::InterfaceExists`] if an interface with the same
    /// name is already attached.
    pub fn add_interface(&mut self, iface: &InterfaceDescription) -> Result<()> {
        if self.interfaces.contains_key(iface.name()) {
            return Err(BusError::InterfaceExists(iface.name().to_string()));
        }
        self.interfaces
            .insert(iface.name().to_string(), iface.clone());
        Ok(())
    }

    /// Install the handler for `member`, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::NoSuchInterface`] if the member's interface is not
    /// attached, or [`BusError::NoSuchMember`] if it does not declare `member`.
    pub fn add_method_handler<H: MethodHandler>(&mut self, member: &Member, handler: H) -> Result<()> {
        let iface = self
            .interfaces
            .get(&member.interface)
            .ok_or_else(|| BusError::NoSuchInterface(member.interface.clone()))?;
        if iface.member(&member.name) != Some(member) {
            return Err(BusError::NoSuchMember(format!(
                "{}.{}",
                member.interface, member.name
            )));
        }
        self.handlers.insert(
            (member.interface.clone(), member.name.clone()),
            (member.clone(), Arc::new(handler)),
        );
        Ok(())
    }

    /// Called with the object path once the object is registered on a
    /// connected attachment.
    pub fn on_registered<F>(&mut self, hook: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on_registered = Some(Box::new(hook));
    }

    pub(crate) fn registered(&self) {
        debug!(path = %self.path, "Bus object registered");
        if let Some(hook) = &self.on_registered {
            hook(&self.path);
        }
    }

    pub(crate) fn handler(
        &self,
        interface: &str,
        member: &str,
    ) -> Result<(Member, Arc<dyn MethodHandler>)> {
        if !self.interfaces.contains_key(interface) {
            return Err(BusError::NoSuchMember(format!("{interface}.{member}")));
        }
        self.handlers
            .get(&(interface.to_string(), member.to_string()))
            .map(|(m, h)| (m.clone(), h.clone()))
            .ok_or_else(|| BusError::NoSuchMember(format!("{interface}.{member}")))
    }
}

impl fmt::Debug for BusObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BusObject")
            .field("path", &self.path)
            .field("interfaces", &self.interfaces.keys().collect::<Vec<_>>())
            .field("handlers", &self.handlers.len())
            .finish_non_exhaustive()
    }
}

/// An incoming method invocation.
///
/// Exactly one reply is sent per call. A call dropped without a reply is
/// answered with a "no reply" error so the caller does not wait for its
/// timeout.
pub struct MethodCall {
    id: RequestId,
    sender: String,
    session_id: SessionId,
    path: String,
    member: Member,
    args: Vec<MsgArg>,
    outgoing: mpsc::UnboundedSender<Message>,
    replied: AtomicBool,
}

impl MethodCall {
    pub(crate) fn new(
        id: RequestId,
        sender: String,
        session_id: SessionId,
        path: String,
        member: Member,
        args: Vec<MsgArg>,
        outgoing: mpsc::UnboundedSender<Message>,
    ) -> Self {
        Self {
            id,
            sender,
            session_id,
            path,
            member,
            args,
            outgoing,
            replied: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn args(&self) -> &[MsgArg] {
        &self.args
    }

    /// Typed argument at `index`.
    ///
    /// # Errors
    ///
    /// Returns an error if the argument is missing or has another type.
    pub fn arg<T: FromMsgArg>(&self, index: usize) -> Result<T> {
        MsgArg::get(&self.args, index)
    }

    /// Unique name of the caller.
    #[must_use]
    pub fn sender(&self) -> &str {
        &self.sender
    }

    #[must_use]
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[must_use]
    pub fn member(&self) -> &Member {
        &self.member
    }

    /// Reply with output arguments matching the member's output signature.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::SignatureMismatch`] if `args` do not match (nothing
    /// is sent), [`BusError::AlreadyReplied`] on a second reply and
    /// [`BusError::ConnectionClosed`] if the connection is gone.
    pub fn reply(&self, args: &[MsgArg]) -> Result<()> {
        self.member.output.check(args)?;
        self.send_reply(args.to_vec())
    }

    /// Reply with no arguments, whatever the output signature says.
    ///
    /// # Errors
    ///
    /// Same as [`MethodCall::reply`] apart from the signature check.
    pub fn reply_empty(&self) -> Result<()> {
        self.send_reply(Vec::new())
    }

    /// # Errors
    ///
    /// Returns an error if a reply was already sent or the connection is gone.
    pub fn reply_error(&self, error: RpcError) -> Result<()> {
        self.claim()?;
        self.send(Response::error(self.id.clone(), error))
    }

    fn send_reply(&self, args: Vec<MsgArg>) -> Result<()> {
        let result = serde_json::to_value(MethodReply { args })?;
        self.claim()?;
        self.send(Response::success(self.id.clone(), result))
    }

    fn claim(&self) -> Result<()> {
        if self.replied.swap(true, Ordering::AcqRel) {
            return Err(BusError::AlreadyReplied);
        }
        Ok(())
    }

    fn send(&self, response: Response) -> Result<()> {
        self.outgoing
            .send(Message::Response(response))
            .map_err(|_| BusError::ConnectionClosed)
    }
}

impl Drop for MethodCall {
    fn drop(&mut self) {
        if !self.replied.load(Ordering::Acquire) {
            warn!(member = %self.member.name, "Method call dropped without a reply");
            let _ = self.send(Response::error(
                self.id.clone(),
                BusError::NoReply.to_rpc_error(),
            ));
        }
    }
}

impl fmt::Debug for MethodCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodCall")
            .field("id", &self.id)
            .field("sender", &self.sender)
            .field("session_id", &self.session_id)
            .field("path", &self.path)
            .field("member", &self.member.name)
            .field("args", &self.args)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::float_cmp)] // Exact float comparisons are intentional in tests

    use super::*;
    use crate::protocol::NO_REPLY;

    fn iface() -> InterfaceDescription {
        let mut b = InterfaceDescription::builder("org.example.Led").unwrap();
        b.add_method("on", "d", "du", "").unwrap();
        b.add_method("off", "", "du", "").unwrap();
        b.activate()
    }

    fn call(
        member: &Member,
        args: Vec<MsgArg>,
    ) -> (MethodCall, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let call = MethodCall::new(
            7.into(),
            ":abc.2".into(),
            3,
            "/led".into(),
            member.clone(),
            args,
            tx,
        );
        (call, rx)
    }

    fn response(rx: &mut mpsc::UnboundedReceiver<Message>) -> Response {
        match rx.try_recv().unwrap() {
            Message::Response(r) => r,
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_handler_lookup() {
        let iface = iface();
        let mut object = BusObject::new("/led").unwrap();
        assert!(matches!(
            object.add_method_handler(iface.member("on").unwrap(), |_call: MethodCall| {}),
            Err(BusError::NoSuchInterface(_))
        ));

        object.add_interface(&iface).unwrap();
        assert!(matches!(
            object.add_interface(&iface),
            Err(BusError::InterfaceExists(_))
        ));
        object
            .add_method_handler(iface.member("on").unwrap(), |_call: MethodCall| {})
            .unwrap();

        assert!(object.handler("org.example.Led", "on").is_ok());
        assert!(matches!(
            object.handler("org.example.Led", "off"),
            Err(BusError::NoSuchMember(_))
        ));
        assert!(object.handler("org.other.Iface", "on").is_err());
    }

    #[test]
    fn test_invalid_path_rejected() {
        assert!(BusObject::new("led").is_err());
    }

    #[test]
    fn test_registered_hook_runs() {
        let seen = Arc::new(std::sync::Mutex::new(None));
        let mut object = BusObject::new("/beagle").unwrap();
        let s = seen.clone();
        object.on_registered(move |path| *s.lock().unwrap() = Some(path.to_string()));
        object.registered();
        assert_eq!(seen.lock().unwrap().as_deref(), Some("/beagle"));
    }

    #[test]
    fn test_reply_checks_output_signature() {
        let iface = iface();
        let (call, mut rx) = call(iface.member("on").unwrap(), vec![MsgArg::Double(0.5)]);
        assert_eq!(call.arg::<f64>(0).unwrap(), 0.5);

        let err = call.reply(&[MsgArg::Double(0.5)]).unwrap_err();
        assert!(matches!(err, BusError::SignatureMismatch { .. }));
        assert!(rx.try_recv().is_err());

        call.reply(&[MsgArg::Double(0.5), MsgArg::Uint32(0)]).unwrap();
        let resp = response(&mut rx);
        assert_eq!(resp.id, RequestId::Number(7));
        let reply: MethodReply = serde_json::from_value(resp.result.unwrap()).unwrap();
        assert_eq!(reply.args, vec![MsgArg::Double(0.5), MsgArg::Uint32(0)]);

        assert!(matches!(call.reply_empty(), Err(BusError::AlreadyReplied)));
        drop(call);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_unanswered_call_replies_no_reply() {
        let iface = iface();
        let (call, mut rx) = call(iface.member("off").unwrap(), vec![]);
        drop(call);
        let resp = response(&mut rx);
        assert_eq!(resp.error.unwrap().code, NO_REPLY);
    }

    #[test]
    fn test_reply_on_closed_connection() {
        let iface = iface();
        let (call, rx) = call(iface.member("off").unwrap(), vec![]);
        drop(rx);
        assert!(matches!(call.reply_empty(), Err(BusError::ConnectionClosed)));
    }
}
