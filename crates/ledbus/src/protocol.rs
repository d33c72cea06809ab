//! JSON-RPC 2.0 messages and the payloads of every bus method.
//!
//! Requests travel in both directions. Attachments call router methods
//! (`request_name`, `join_session`, ...), and the router forwards
//! `accept_session_joiner` and `method_call` requests to the attachment that
//! hosts the target. Everything else the router reports arrives as a
//! notification.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::msgarg::MsgArg;
use crate::names::{NameFlags, ReleaseNameReply, RequestNameReply};
use crate::session::{SessionId, SessionLostReason, SessionOpts, SessionPort, TransportMask};

pub const JSONRPC_VERSION: &str = "2.0";
pub const PARSE_ERROR: i32 = -32700;
pub const INVALID_REQUEST: i32 = -32600;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
pub const INTERNAL_ERROR: i32 = -32603;
pub const HELLO_REQUIRED: i32 = -32000;
pub const ALREADY_HELLO: i32 = -32001;
pub const SERVICE_UNKNOWN: i32 = -32002;
pub const NO_SUCH_SESSION_PORT: i32 = -32003;
pub const SESSION_REJECTED: i32 = -32004;
pub const INCOMPATIBLE_OPTS: i32 = -32005;
pub const NO_SESSION: i32 = -32006;
pub const PORT_ALREADY_BOUND: i32 = -32007;
pub const TIMEOUT: i32 = -32008;
pub const NO_SUCH_OBJECT: i32 = -32009;
pub const NO_SUCH_MEMBER: i32 = -32010;
pub const SIGNATURE_MISMATCH: i32 = -32011;
pub const REMOTE_NOT_ALLOWED: i32 = -32012;
pub const NO_REPLY: i32 = -32013;
pub const PEER_GONE: i32 = -32014;
pub const INVALID_NAME: i32 = -32015;

/// Method and notification names used on the wire.
pub mod method {
    // attachment -> router
    pub const HELLO: &str = "hello";
    pub const REQUEST_NAME: &str = "request_name";
    pub const RELEASE_NAME: &str = "release_name";
    pub const ADVERTISE_NAME: &str = "advertise_name";
    pub const CANCEL_ADVERTISE_NAME: &str = "cancel_advertise_name";
    pub const FIND_ADVERTISED_NAME: &str = "find_advertised_name";
    pub const CANCEL_FIND_ADVERTISED_NAME: &str = "cancel_find_advertised_name";
    pub const BIND_SESSION_PORT: &str = "bind_session_port";
    pub const UNBIND_SESSION_PORT: &str = "unbind_session_port";
    pub const JOIN_SESSION: &str = "join_session";
    pub const LEAVE_SESSION: &str = "leave_session";

    // both directions: caller -> router -> host
    pub const METHOD_CALL: &str = "method_call";

    // router -> attachment requests
    pub const ACCEPT_SESSION_JOINER: &str = "accept_session_joiner";

    // router -> attachment notifications
    pub const FOUND_ADVERTISED_NAME: &str = "found_advertised_name";
    pub const LOST_ADVERTISED_NAME: &str = "lost_advertised_name";
    pub const NAME_OWNER_CHANGED: &str = "name_owner_changed";
    pub const SESSION_JOINED: &str = "session_joined";
    pub const SESSION_LOST: &str = "session_lost";
}

/// JSON-RPC 2.0 Request ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(u64),
    String(String),
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{n}"),
            RequestId::String(s) => write!(f, "{s}"),
        }
    }
}

impl From<u64> for RequestId {
    fn from(n: u64) -> Self {
        RequestId::Number(n)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        RequestId::String(s.to_string())
    }
}

/// JSON-RPC 2.0 Request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
}

impl Request {
    #[must_use]
    pub fn new(method: impl Into<String>, params: Option<Value>, id: RequestId) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
            id: Some(id),
        }
    }
}

/// JSON-RPC 2.0 Response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
    pub id: RequestId,
}

impl Response {
    #[must_use]
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    #[must_use]
    pub fn error(id: RequestId, error: RpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: None,
            error: Some(error),
            id,
        }
    }

    /// Same outcome, addressed to a different request id.
    #[must_use]
    pub fn readdressed(self, id: RequestId) -> Self {
        Self { id, ..self }
    }
}

/// JSON-RPC 2.0 Notification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Notification {
    #[must_use]
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
        }
    }

    /// Build a notification from a serializable payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be converted to JSON.
    pub fn with_payload<P: Serialize>(
        method: impl Into<String>,
        payload: &P,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::new(method, Some(serde_json::to_value(payload)?)))
    }
}

/// JSON-RPC 2.0 Error object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    #[must_use]
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    #[must_use]
    pub fn method_not_found(method: &str) -> Self {
        Self::new(METHOD_NOT_FOUND, format!("Method not found: {method}"))
    }

    #[must_use]
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(INVALID_PARAMS, message)
    }

    #[must_use]
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(INTERNAL_ERROR, message)
    }

    #[must_use]
    pub fn hello_required() -> Self {
        Self::new(HELLO_REQUIRED, "Attachment must say hello first")
    }

    #[must_use]
    pub fn service_unknown(name: &str) -> Self {
        Self::new(SERVICE_UNKNOWN, format!("No owner for name: {name}"))
    }

    #[must_use]
    pub fn no_such_session_port(port: SessionPort) -> Self {
        Self::new(
            NO_SUCH_SESSION_PORT,
            format!("Session port {port} is not bound"),
        )
    }

    #[must_use]
    pub fn no_session(session_id: SessionId) -> Self {
        Self::new(NO_SESSION, format!("Not a member of session {session_id}"))
    }

    #[must_use]
    pub fn no_such_object(path: &str) -> Self {
        Self::new(NO_SUCH_OBJECT, format!("No object at path: {path}"))
    }

    #[must_use]
    pub fn no_such_member(interface: &str, member: &str) -> Self {
        Self::new(NO_SUCH_MEMBER, format!("No member {interface}.{member}"))
    }

    #[must_use]
    pub fn signature_mismatch(expected: &str, found: &str) -> Self {
        Self {
            code: SIGNATURE_MISMATCH,
            message: format!("Signature mismatch: expected \"{expected}\", found \"{found}\""),
            data: Some(serde_json::json!({ "expected": expected, "found": found })),
        }
    }

    #[must_use]
    pub fn timeout() -> Self {
        Self::new(TIMEOUT, "Timed out waiting for the peer")
    }

    #[must_use]
    pub fn peer_gone() -> Self {
        Self::new(PEER_GONE, "Peer disconnected before replying")
    }
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RPC error {}: {}", self.code, self.message)
    }
}

impl std::error::Error for RpcError {}

/// Incoming message that could be a request, response, or notification
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
    Request(Request),
    Response(Response),
    Notification(Notification),
}

impl Message {
    /// Method name for requests and notifications.
    #[must_use]
    pub fn method(&self) -> Option<&str> {
        match self {
            Message::Request(r) => Some(&r.method),
            Message::Notification(n) => Some(&n.method),
            Message::Response(_) => None,
        }
    }

    #[must_use]
    pub fn is_response(&self) -> bool {
        matches!(self, Message::Response(_))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloParams {
    pub app_name: String,
    pub allow_remote_messages: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloResult {
    pub unique_name: String,
    pub guid: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestNameParams {
    pub name: String,
    pub flags: NameFlags,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestNameResult {
    pub reply: RequestNameReply,
}

/// Shared by `release_name`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NameParams {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseNameResult {
    pub reply: ReleaseNameReply,
}

/// Shared by `advertise_name` and `cancel_advertise_name`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvertiseParams {
    pub name: String,
    pub transports: TransportMask,
}

/// Shared by `find_advertised_name` and `cancel_find_advertised_name`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FindParams {
    pub prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BindSessionPortParams {
    pub port: SessionPort,
    pub opts: SessionOpts,
}

/// The bound port; the router picks one when `0` was requested.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BindSessionPortResult {
    pub port: SessionPort,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnbindSessionPortParams {
    pub port: SessionPort,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinSessionParams {
    pub host: String,
    pub port: SessionPort,
    pub opts: SessionOpts,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinSessionResult {
    pub session_id: SessionId,
    pub opts: SessionOpts,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaveSessionParams {
    pub session_id: SessionId,
}

/// A typed method invocation.
///
/// The caller leaves `sender` empty; the router fills in the caller's unique
/// name before forwarding the call to the host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MethodCallParams {
    pub destination: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    pub path: String,
    pub interface: String,
    pub member: String,
    #[serde(default)]
    pub session_id: SessionId,
    #[serde(default)]
    pub args: Vec<MsgArg>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MethodReply {
    #[serde(default)]
    pub args: Vec<MsgArg>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcceptJoinerParams {
    pub port: SessionPort,
    pub joiner: String,
    pub opts: SessionOpts,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcceptJoinerResult {
    pub accepted: bool,
}

/// Payload of `found_advertised_name` and `lost_advertised_name`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvertisedNameParams {
    pub name: String,
    pub transport: TransportMask,
    pub prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NameOwnerChangedParams {
    pub name: String,
    pub previous_owner: Option<String>,
    pub new_owner: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionJoinedParams {
    pub port: SessionPort,
    pub session_id: SessionId,
    pub joiner: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionLostParams {
    pub session_id: SessionId,
    pub reason: SessionLostReason,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization() {
        let req = Request::new(method::HELLO, Some(serde_json::json!({"k": 1})), 1.into());
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"jsonrpc\":\"2.0\""));
        assert!(json.contains("\"method\":\"hello\""));
        assert!(json.contains("\"id\":1"));
    }

    #[test]
    fn test_request_without_params_omits_field() {
        let req = Request::new(method::LEAVE_SESSION, None, 1.into());
        let json = serde_json::to_string(&req).unwrap();
        assert!(!json.contains("\"params\""));
    }

    #[test]
    fn test_response_variants() {
        let ok = serde_json::to_string(&Response::success(1.into(), serde_json::json!({})))
            .unwrap();
        assert!(ok.contains("\"result\""));
        assert!(!ok.contains("\"error\""));

        let err =
            serde_json::to_string(&Response::error(1.into(), RpcError::no_session(9))).unwrap();
        assert!(!err.contains("\"result\""));
        assert!(err.contains("-32006"));
    }

    #[test]
    fn test_readdressed_keeps_payload() {
        let resp = Response::error(5.into(), RpcError::timeout()).readdressed(11.into());
        assert_eq!(resp.id, RequestId::Number(11));
        assert_eq!(resp.error.unwrap().code, TIMEOUT);
    }

    #[test]
    fn test_message_parse_kinds() {
        let req: Message =
            serde_json::from_str(r#"{"jsonrpc":"2.0","method":"hello","id":1}"#).unwrap();
        assert_eq!(req.method(), Some("hello"));
        assert!(!req.is_response());

        let resp: Message =
            serde_json::from_str(r#"{"jsonrpc":"2.0","result":{"ok":true},"id":1}"#).unwrap();
        assert!(resp.is_response());
        assert_eq!(resp.method(), None);
    }

    #[test]
    fn test_request_id_forms() {
        assert_eq!(serde_json::to_string(&RequestId::Number(123)).unwrap(), "123");
        let id: RequestId = serde_json::from_str("\"abc\"").unwrap();
        assert_eq!(id, RequestId::String("abc".to_string()));
        assert_eq!(RequestId::from("x").to_string(), "x");
    }

    #[test]
    fn test_method_call_sender_is_optional() {
        let json = r#"{"destination":"a.b","path":"/x","interface":"a.b","member":"m"}"#;
        let params: MethodCallParams = serde_json::from_str(json).unwrap();
        assert!(params.sender.is_none());
        assert_eq!(params.session_id, 0);
        assert!(params.args.is_empty());

        let out = serde_json::to_string(&params).unwrap();
        assert!(!out.contains("sender"));
    }

    #[test]
    fn test_rpc_error_helpers() {
        assert_eq!(RpcError::hello_required().code, HELLO_REQUIRED);
        assert_eq!(RpcError::no_such_session_port(42).code, NO_SUCH_SESSION_PORT);
        assert!(RpcError::no_such_member("a.B", "c").message.contains("a.B.c"));
        assert!(
            RpcError::signature_mismatch("du", "d")
                .to_string()
                .contains("expected \"du\"")
        );
        assert_eq!(RpcError::method_not_found("zap").code, METHOD_NOT_FOUND);
    }
}
