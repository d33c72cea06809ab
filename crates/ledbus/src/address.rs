//! Connect specs.
//!
//! A connect spec names the router endpoint, e.g. `unix:abstract=alljoyn` for
//! a Linux abstract-namespace socket or `unix:path=/run/ledbus.sock` for a
//! socket file. Extra comma separated `key=value` pairs such as `guid=` are
//! accepted and ignored.

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::str::FromStr;

use tokio::net::{UnixListener, UnixStream};

use crate::error::BusError;

pub const DEFAULT_ADDRESS: &str = "unix:abstract=alljoyn";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusAddress {
    UnixPath(PathBuf),
    UnixAbstract(String),
}

impl BusAddress {
    /// Connect to the router listening at this address.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if nothing is listening or abstract sockets are
    /// unsupported on this platform.
    pub async fn connect(&self) -> io::Result<UnixStream> {
        match self {
            BusAddress::UnixPath(path) => UnixStream::connect(path).await,
            BusAddress::UnixAbstract(name) => {
                let addr = abstract_addr(name)?;
                let stream = std::os::unix::net::UnixStream::connect_addr(&addr)?;
                stream.set_nonblocking(true)?;
                UnixStream::from_std(stream)
            }
        }
    }

    /// Bind a listener at this address. Must be called inside a runtime.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the address is in use.
    pub fn bind(&self) -> io::Result<UnixListener> {
        match self {
            BusAddress::UnixPath(path) => UnixListener::bind(path),
            BusAddress::UnixAbstract(name) => {
                let addr = abstract_addr(name)?;
                let listener = std::os::unix::net::UnixListener::bind_addr(&addr)?;
                listener.set_nonblocking(true)?;
                UnixListener::from_std(listener)
            }
        }
    }

    /// Socket file backing this address, if any.
    #[must_use]
    pub fn socket_path(&self) -> Option<&PathBuf> {
        match self {
            BusAddress::UnixPath(path) => Some(path),
            BusAddress::UnixAbstract(_) => None,
        }
    }
}

#[cfg(target_os = "linux")]
fn abstract_addr(name: &str) -> io::Result<std::os::unix::net::SocketAddr> {
    use std::os::linux::net::SocketAddrExt;
    std::os::unix::net::SocketAddr::from_abstract_name(name.as_bytes())
}

#[cfg(not(target_os = "linux"))]
fn abstract_addr(_name: &str) -> io::Result<std::os::unix::net::SocketAddr> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "abstract unix sockets are only available on Linux",
    ))
}

impl FromStr for BusAddress {
    type Err = BusError;

    fn from_str(spec: &str) -> Result<Self, BusError> {
        let invalid = |why: &str| BusError::InvalidAddress(format!("{spec:?}: {why}"));

        let rest = spec
            .strip_prefix("unix:")
            .ok_or_else(|| invalid("only unix transports are supported"))?;

        let mut address = None;
        for pair in rest.split(',').filter(|p| !p.is_empty()) {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| invalid("expected key=value"))?;
            let parsed = match key {
                "path" => BusAddress::UnixPath(PathBuf::from(value)),
                "abstract" => BusAddress::UnixAbstract(value.to_string()),
                _ => continue,
            };
            if value.is_empty() {
                return Err(invalid("empty socket name"));
            }
            if address.replace(parsed).is_some() {
                return Err(invalid("both path and abstract given"));
            }
        }
        address.ok_or_else(|| invalid("missing path= or abstract="))
    }
}

impl fmt::Display for BusAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusAddress::UnixPath(path) => write!(f, "unix:path={}", path.display()),
            BusAddress::UnixAbstract(name) => write!(f, "unix:abstract={name}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_default() {
        let addr: BusAddress = DEFAULT_ADDRESS.parse().unwrap();
        assert_eq!(addr, BusAddress::UnixAbstract("alljoyn".into()));
        assert_eq!(addr.to_string(), DEFAULT_ADDRESS);
        assert!(addr.socket_path().is_none());
    }

    #[test]
    fn test_parse_path_with_extras() {
        let addr: BusAddress = "unix:path=/tmp/bus.sock,guid=1234".parse().unwrap();
        assert_eq!(addr, BusAddress::UnixPath("/tmp/bus.sock".into()));
    }

    #[test]
    fn test_parse_errors() {
        for spec in [
            "tcp:addr=1.2.3.4",
            "unix:",
            "unix:path",
            "unix:path=",
            "unix:guid=1",
            "unix:path=/a,abstract=b",
        ] {
            assert!(
                matches!(spec.parse::<BusAddress>(), Err(BusError::InvalidAddress(_))),
                "{spec}"
            );
        }
    }

    #[tokio::test]
    async fn test_path_bind_and_connect() {
        let dir = tempfile::tempdir().unwrap();
        let addr = BusAddress::UnixPath(dir.path().join("bus.sock"));
        let listener = addr.bind().unwrap();
        let (client, server) = tokio::join!(addr.connect(), listener.accept());
        assert!(client.is_ok());
        assert!(server.is_ok());
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_abstract_bind_and_connect() {
        let name = format!("ledbus-test-{}-{}", std::process::id(), line!());
        let addr = BusAddress::UnixAbstract(name);
        let listener = addr.bind().unwrap();
        let (client, server) = tokio::join!(addr.connect(), listener.accept());
        assert!(client.is_ok());
        assert!(server.is_ok());
    }
}
