//! Error type for bus attachments.
//!
//! Every variant maps to a stable numeric [`BusError::status`] so programs
//! can hand the failure to their caller as a process exit status.

use crate::protocol::{self, RpcError};
use crate::transport::CodecError;

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("RPC error {code}: {message}")]
    Rpc { code: i32, message: String },

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Request timeout")]
    Timeout,

    #[error("Unexpected response")]
    UnexpectedResponse,

    #[error("No tokio runtime available")]
    NoRuntime,

    #[error("Bus attachment not started")]
    NotStarted,

    #[error("Bus attachment already started")]
    AlreadyStarted,

    #[error("Not connected to a router")]
    NotConnected,

    #[error("Already connected to a router")]
    AlreadyConnected,

    #[error("Invalid connect spec: {0}")]
    InvalidAddress(String),

    #[error("Invalid {0}")]
    InvalidName(String),

    #[error("Bad signature {0}")]
    BadSignature(String),

    #[error("Interface already exists: {0}")]
    InterfaceExists(String),

    #[error("No such interface: {0}")]
    NoSuchInterface(String),

    #[error("No such member: {0}")]
    NoSuchMember(String),

    #[error("Object already registered at {0}")]
    ObjectExists(String),

    #[error("No such object: {0}")]
    NoSuchObject(String),

    #[error("Signature mismatch: expected \"{expected}\", found \"{found}\"")]
    SignatureMismatch { expected: String, found: String },

    #[error("Missing argument {0}")]
    MissingArg(usize),

    #[error("Reply already sent")]
    AlreadyReplied,

    #[error("Name is owned by another connection")]
    NameExists,

    #[error("Queued for name ownership")]
    NameInQueue,

    #[error("Name already owned by this connection")]
    NameAlreadyOwner,

    #[error("Service unknown: {0}")]
    ServiceUnknown(String),

    #[error("Session port already bound")]
    PortAlreadyBound,

    #[error("No such session port")]
    NoSuchSessionPort,

    #[error("Session rejected by host")]
    SessionRejected,

    #[error("Incompatible session options")]
    IncompatibleOpts,

    #[error("No such session")]
    NoSession,

    #[error("Blocking call not allowed from a callback without concurrent callbacks")]
    BlockingCallNotAllowed,

    #[error("Remote messages not allowed")]
    RemoteMessagesNotAllowed,

    #[error("Method handler did not reply")]
    NoReply,

    #[error("Peer disconnected")]
    PeerGone,

    #[error("Interrupted")]
    Interrupted,
}

impl BusError {
    pub fn rpc(code: i32, message: impl Into<String>) -> Self {
        Self::Rpc {
            code,
            message: message.into(),
        }
    }

    /// Non-zero status code for this error. `0` and `1` are never returned;
    /// programs reserve them for success and usage errors.
    #[must_use]
    pub fn status(&self) -> u8 {
        match self {
            BusError::Io(_) => 2,
            BusError::Codec(_) => 3,
            BusError::Json(_) => 4,
            BusError::Rpc { .. } => 5,
            BusError::ConnectionClosed => 6,
            BusError::Timeout => 7,
            BusError::UnexpectedResponse => 8,
            BusError::NoRuntime => 9,
            BusError::NotStarted => 10,
            BusError::AlreadyStarted => 11,
            BusError::NotConnected => 12,
            BusError::AlreadyConnected => 13,
            BusError::InvalidAddress(_) => 14,
            BusError::InvalidName(_) => 15,
            BusError::BadSignature(_) => 16,
            BusError::InterfaceExists(_) => 17,
            BusError::NoSuchInterface(_) => 18,
            BusError::NoSuchMember(_) => 19,
            BusError::ObjectExists(_) => 20,
            BusError::NoSuchObject(_) => 21,
            BusError::SignatureMismatch { .. } => 22,
            BusError::MissingArg(_) => 23,
            BusError::AlreadyReplied => 24,
            BusError::NameExists => 25,
            BusError::NameInQueue => 26,
            BusError::NameAlreadyOwner => 27,
            BusError::ServiceUnknown(_) => 28,
            BusError::PortAlreadyBound => 29,
            BusError::NoSuchSessionPort => 30,
            BusError::SessionRejected => 31,
            BusError::IncompatibleOpts => 32,
            BusError::NoSession => 33,
            BusError::BlockingCallNotAllowed => 34,
            BusError::RemoteMessagesNotAllowed => 35,
            BusError::NoReply => 36,
            BusError::PeerGone => 37,
            BusError::Interrupted => 38,
        }
    }

    /// Wire form of this error when sent back in reply to a request.
    #[must_use]
    pub fn to_rpc_error(&self) -> RpcError {
        match self {
            BusError::Rpc { code, message } => RpcError::new(*code, message.clone()),
            BusError::NoSuchObject(path) => RpcError::no_such_object(path),
            BusError::NoSuchMember(member) => {
                RpcError::new(protocol::NO_SUCH_MEMBER, format!("No member {member}"))
            }
            BusError::SignatureMismatch { expected, found } => {
                RpcError::signature_mismatch(expected, found)
            }
            BusError::MissingArg(_) | BusError::BadSignature(_) => {
                RpcError::invalid_params(self.to_string())
            }
            BusError::InvalidName(_) => RpcError::new(protocol::INVALID_NAME, self.to_string()),
            BusError::RemoteMessagesNotAllowed => {
                RpcError::new(protocol::REMOTE_NOT_ALLOWED, self.to_string())
            }
            BusError::Timeout => RpcError::timeout(),
            BusError::NoReply => RpcError::new(protocol::NO_REPLY, self.to_string()),
            _ => RpcError::internal_error(self.to_string()),
        }
    }
}

impl From<RpcError> for BusError {
    fn from(e: RpcError) -> Self {
        match e.code {
            protocol::SERVICE_UNKNOWN => Self::ServiceUnknown(e.message),
            protocol::NO_SUCH_SESSION_PORT => Self::NoSuchSessionPort,
            protocol::SESSION_REJECTED => Self::SessionRejected,
            protocol::INCOMPATIBLE_OPTS => Self::IncompatibleOpts,
            protocol::NO_SESSION => Self::NoSession,
            protocol::PORT_ALREADY_BOUND => Self::PortAlreadyBound,
            protocol::TIMEOUT => Self::Timeout,
            protocol::NO_SUCH_OBJECT => Self::NoSuchObject(e.message),
            protocol::NO_SUCH_MEMBER => Self::NoSuchMember(e.message),
            protocol::REMOTE_NOT_ALLOWED => Self::RemoteMessagesNotAllowed,
            protocol::NO_REPLY => Self::NoReply,
            protocol::PEER_GONE => Self::PeerGone,
            protocol::INVALID_NAME => Self::InvalidName(e.message),
            protocol::SIGNATURE_MISMATCH => {
                let field = |key: &str| {
                    e.data
                        .as_ref()
                        .and_then(|d| d.get(key))
                        .and_then(|v| v.as_str())
                        .map(str::to_string)
                };
                match (field("expected"), field("found")) {
                    (Some(expected), Some(found)) => Self::SignatureMismatch { expected, found },
                    _ => Self::Rpc {
                        code: e.code,
                        message: e.message,
                    },
                }
            }
            code => Self::Rpc {
                code,
                message: e.message,
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, BusError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_never_collides_with_success_or_usage() {
        let samples = [
            BusError::Timeout,
            BusError::ServiceUnknown("x".into()),
            BusError::SessionRejected,
            BusError::NoReply,
            BusError::Interrupted,
            BusError::rpc(-1, "x"),
        ];
        for err in samples {
            assert!(err.status() > 1, "{err} -> {}", err.status());
        }
    }

    #[test]
    fn test_from_rpc_error_maps_known_codes() {
        assert!(matches!(
            BusError::from(RpcError::service_unknown("org.example")),
            BusError::ServiceUnknown(_)
        ));
        assert!(matches!(
            BusError::from(RpcError::no_session(3)),
            BusError::NoSession
        ));
        assert!(matches!(
            BusError::from(RpcError::timeout()),
            BusError::Timeout
        ));
        assert!(matches!(
            BusError::from(RpcError::peer_gone()),
            BusError::PeerGone
        ));
    }

    #[test]
    fn test_unknown_code_stays_rpc() {
        match BusError::from(RpcError::method_not_found("zap")) {
            BusError::Rpc { code, message } => {
                assert_eq!(code, protocol::METHOD_NOT_FOUND);
                assert!(message.contains("zap"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_signature_mismatch_survives_wire() {
        let err = BusError::SignatureMismatch {
            expected: "du".into(),
            found: "d".into(),
        };
        let back = BusError::from(err.to_rpc_error());
        match back {
            BusError::SignatureMismatch { expected, found } => {
                assert_eq!(expected, "du");
                assert_eq!(found, "d");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_error_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "socket not found");
        let err: BusError = io_err.into();

        assert!(matches!(err, BusError::Io(_)));
        assert!(err.to_string().contains("socket not found"));
    }

    #[test]
    fn test_error_from_codec_error() {
        let err: BusError = CodecError::FrameTooLarge(999_999_999).into();
        assert!(matches!(err, BusError::Codec(_)));
        assert!(err.to_string().contains("999999999"));
    }
}
