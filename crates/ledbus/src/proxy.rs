//! Client-side handle on a remote bus object.

use std::collections::HashMap;
use std::time::Duration;

use tracing::debug;

use crate::attachment::BusAttachment;
use crate::error::{BusError, Result};
use crate::interface::InterfaceDescription;
use crate::msgarg::MsgArg;
use crate::names::{validate_destination, validate_object_path};
use crate::protocol::{MethodCallParams, MethodReply, method};
use crate::session::SessionId;

#[derive(Debug)]
pub struct ProxyBusObject {
    bus: BusAttachment,
    service: String,
    path: String,
    session_id: SessionId,
    interfaces: HashMap<String, InterfaceDescription>,
}

impl ProxyBusObject {
    /// Proxy for the object at `path` owned by `service`, reached through
    /// `session_id` (`0` for sessionless calls).
    ///
    /// # Errors
    ///
    /// Returns [`BusError::InvalidName`] if the service name or path is malformed.
    pub fn new(bus: &BusAttachment, service: &str, path: &str, session_id: SessionId) -> Result<Self> {
        validate_destination(service)?;
        validate_object_path(path)?;
        Ok(Self {
            bus: bus.clone(),
            service: service.to_string(),
            path: path.to_string(),
            session_id,
            interfaces: HashMap::new(),
        })
    }

    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[must_use]
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Declare that the remote object implements `iface`.
    pub fn add_interface(&mut self, iface: &InterfaceDescription) {
        self.interfaces
            .insert(iface.name().to_string(), iface.clone());
    }

    #[must_use]
    pub fn implements(&self, interface: &str) -> bool {
        self.interfaces.contains_key(interface)
    }

    /// Invoke `interface.member` and wait at most `timeout` for the reply.
    /// Arguments and reply are checked against the member's signatures.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::NoSuchInterface`] or [`BusError::NoSuchMember`] for
    /// undeclared members, [`BusError::SignatureMismatch`] for badly typed
    /// arguments or replies, [`BusError::Timeout`] when no reply arrives in
    /// time, or the error the remote side or router answered with.
    pub async fn method_call(
        &self,
        interface: &str,
        member: &str,
        args: &[MsgArg],
        timeout: Duration,
    ) -> Result<Vec<MsgArg>> {
        let iface = self
            .interfaces
            .get(interface)
            .ok_or_else(|| BusError::NoSuchInterface(interface.to_string()))?;
        let member = iface.require_member(member)?;
        member.input.check(args)?;

        let params = MethodCallParams {
            destination: self.service.clone(),
            sender: None,
            path: self.path.clone(),
            interface: interface.to_string(),
            member: member.name.clone(),
            session_id: self.session_id,
            args: args.to_vec(),
        };
        debug!(
            service = %self.service,
            path = %self.path,
            member = %member.name,
            "Calling remote method"
        );

        let reply: MethodReply = self.bus.call(method::METHOD_CALL, &params, timeout).await?;
        member.output.check(&reply.args)?;
        Ok(reply.args)
    }
}
