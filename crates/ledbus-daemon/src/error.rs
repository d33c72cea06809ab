//! Error types for the bus router.

use ledbus::protocol::{self, RpcError};
use ledbus::{SessionId, SessionPort};

/// Errors that can occur in the router
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Codec error
    #[error("Codec error: {0}")]
    Codec(#[from] ledbus::CodecError),

    #[error("Invalid connect spec: {0}")]
    InvalidAddress(String),

    /// Connection has not said hello
    #[error("Attachment must say hello first")]
    HelloRequired,

    #[error("Attachment already said hello")]
    AlreadyHello,

    /// Invalid parameters
    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    /// Method not found
    #[error("Method not found: {0}")]
    MethodNotFound(String),

    #[error("Invalid name: {0}")]
    InvalidName(String),

    /// No connection owns the destination name
    #[error("No owner for name: {0}")]
    ServiceUnknown(String),

    #[error("Session port {0} is not bound")]
    NoSuchSessionPort(SessionPort),

    #[error("Session port {0} already bound")]
    PortAlreadyBound(SessionPort),

    #[error("Incompatible session options")]
    IncompatibleOpts,

    #[error("Session rejected by host")]
    SessionRejected,

    #[error("Not a member of session {0}")]
    NoSession(SessionId),

    #[error("Timed out waiting for the peer")]
    Timeout,

    #[error("Peer disconnected before replying")]
    PeerGone,
}

impl From<RouterError> for RpcError {
    fn from(err: RouterError) -> Self {
        match err {
            RouterError::Io(e) => RpcError::internal_error(e.to_string()),
            RouterError::Json(e) => RpcError::internal_error(e.to_string()),
            RouterError::Codec(e) => RpcError::internal_error(e.to_string()),
            RouterError::InvalidAddress(msg) => RpcError::internal_error(msg),
            RouterError::HelloRequired => RpcError::hello_required(),
            RouterError::AlreadyHello => {
                RpcError::new(protocol::ALREADY_HELLO, "Attachment already said hello")
            }
            RouterError::InvalidParams(msg) => RpcError::invalid_params(msg),
            RouterError::MethodNotFound(name) => RpcError::method_not_found(&name),
            RouterError::InvalidName(msg) => RpcError::new(protocol::INVALID_NAME, msg),
            RouterError::ServiceUnknown(name) => RpcError::service_unknown(&name),
            RouterError::NoSuchSessionPort(port) => RpcError::no_such_session_port(port),
            RouterError::PortAlreadyBound(port) => RpcError::new(
                protocol::PORT_ALREADY_BOUND,
                format!("Session port {port} already bound"),
            ),
            RouterError::IncompatibleOpts => {
                RpcError::new(protocol::INCOMPATIBLE_OPTS, "Incompatible session options")
            }
            RouterError::SessionRejected => {
                RpcError::new(protocol::SESSION_REJECTED, "Session rejected by host")
            }
            RouterError::NoSession(id) => RpcError::no_session(id),
            RouterError::Timeout => RpcError::timeout(),
            RouterError::PeerGone => RpcError::peer_gone(),
        }
    }
}

impl From<RpcError> for RouterError {
    fn from(err: RpcError) -> Self {
        match err.code {
            protocol::HELLO_REQUIRED => RouterError::HelloRequired,
            protocol::ALREADY_HELLO => RouterError::AlreadyHello,
            protocol::INVALID_PARAMS => RouterError::InvalidParams(err.message),
            protocol::METHOD_NOT_FOUND => RouterError::MethodNotFound(err.message),
            protocol::INVALID_NAME => RouterError::InvalidName(err.message),
            protocol::SERVICE_UNKNOWN => RouterError::ServiceUnknown(err.message),
            protocol::INCOMPATIBLE_OPTS => RouterError::IncompatibleOpts,
            protocol::SESSION_REJECTED => RouterError::SessionRejected,
            protocol::TIMEOUT => RouterError::Timeout,
            protocol::PEER_GONE => RouterError::PeerGone,
            _ => RouterError::Io(std::io::Error::other(err.message)),
        }
    }
}

impl From<ledbus::BusError> for RouterError {
    fn from(err: ledbus::BusError) -> Self {
        match err {
            ledbus::BusError::InvalidName(msg) => RouterError::InvalidName(msg),
            ledbus::BusError::InvalidAddress(msg) => RouterError::InvalidAddress(msg),
            ledbus::BusError::Io(e) => RouterError::Io(e),
            other => RouterError::InvalidParams(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, RouterError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_router_error_display() {
        assert_eq!(
            RouterError::HelloRequired.to_string(),
            "Attachment must say hello first"
        );
        assert_eq!(
            RouterError::NoSuchSessionPort(42).to_string(),
            "Session port 42 is not bound"
        );
        assert_eq!(
            RouterError::ServiceUnknown("org.example".into()).to_string(),
            "No owner for name: org.example"
        );
    }

    #[test]
    fn test_router_error_to_rpc_error_codes() {
        let cases = [
            (RouterError::HelloRequired, protocol::HELLO_REQUIRED),
            (RouterError::AlreadyHello, protocol::ALREADY_HELLO),
            (RouterError::ServiceUnknown("a.b".into()), protocol::SERVICE_UNKNOWN),
            (RouterError::NoSuchSessionPort(1), protocol::NO_SUCH_SESSION_PORT),
            (RouterError::PortAlreadyBound(1), protocol::PORT_ALREADY_BOUND),
            (RouterError::IncompatibleOpts, protocol::INCOMPATIBLE_OPTS),
            (RouterError::SessionRejected, protocol::SESSION_REJECTED),
            (RouterError::NoSession(5), protocol::NO_SESSION),
            (RouterError::Timeout, protocol::TIMEOUT),
            (RouterError::PeerGone, protocol::PEER_GONE),
            (RouterError::InvalidParams("x".into()), protocol::INVALID_PARAMS),
            (RouterError::MethodNotFound("x".into()), protocol::METHOD_NOT_FOUND),
        ];
        for (err, code) in cases {
            let rpc: RpcError = err.into();
            assert_eq!(rpc.code, code, "{}", rpc.message);
        }
    }

    #[test]
    fn test_roundtrip_session_rejected() {
        let rpc: RpcError = RouterError::SessionRejected.into();
        let back: RouterError = rpc.into();
        assert!(matches!(back, RouterError::SessionRejected));
    }

    #[test]
    fn test_roundtrip_service_unknown() {
        let rpc: RpcError = RouterError::ServiceUnknown("org.example".into()).into();
        let back: RouterError = rpc.into();
        assert!(matches!(back, RouterError::ServiceUnknown(msg) if msg.contains("org.example")));
    }

    #[test]
    fn test_rpc_error_to_router_error_unknown_code() {
        let rpc_err = RpcError {
            code: 9999,
            message: "unknown error".to_string(),
            data: None,
        };
        let err: RouterError = rpc_err.into();
        assert!(matches!(err, RouterError::Io(_)));
    }

    #[test]
    fn test_router_error_from_bus_error() {
        let err: RouterError = ledbus::BusError::InvalidName("bus name \"x\"".into()).into();
        assert!(matches!(err, RouterError::InvalidName(_)));
        let rpc: RpcError = err.into();
        assert_eq!(rpc.code, protocol::INVALID_NAME);
    }

    #[test]
    fn test_router_error_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::AddrInUse, "in use");
        let err: RouterError = io_err.into();
        assert!(matches!(err, RouterError::Io(_)));
        let rpc: RpcError = err.into();
        assert_eq!(rpc.code, protocol::INTERNAL_ERROR);
        assert!(rpc.message.contains("in use"));
    }
}
