//! Session-based message bus for small device services.
//!
//! `ledbus` lets an application publish typed objects under a well-known
//! name, advertise that name, accept sessions from peers and answer method
//! calls, or, on the other side, discover a name, join a session and call
//! methods through a proxy. All traffic goes through a router (`ledbusd`).
//!
//! # Architecture
//!
//! - [`attachment`]: [`BusAttachment`], the connection to the router
//! - [`interface`]: interface declarations and members
//! - [`object`]: exported objects and incoming [`MethodCall`]s
//! - [`proxy`]: [`ProxyBusObject`] for calling remote objects
//! - [`listener`]: bus, session-port and session callbacks
//! - [`msgarg`]: typed arguments and signatures
//! - [`names`], [`session`]: ownership flags, session options
//! - [`protocol`], [`transport`]: JSON-RPC messages and framing
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use ledbus::{BusAttachment, InterfaceDescription, MsgArg, ProxyBusObject, SessionOpts};
//!
//! # async fn example() -> ledbus::Result<()> {
//! let mut builder = InterfaceDescription::builder("org.example.Led")?;
//! builder.add_method("on", "d", "du", "brightnessIn,brightnessOut,frequencyOut")?;
//!
//! let bus = BusAttachment::new("example", true);
//! let iface = bus.register_interface(builder.activate())?;
//! bus.start()?;
//! bus.connect(ledbus::DEFAULT_ADDRESS).await?;
//!
//! let (session, _) = bus.join_session("org.example.led", 42, SessionOpts::default()).await?;
//! let mut proxy = ProxyBusObject::new(&bus, "org.example.led", "/led", session)?;
//! proxy.add_interface(&iface);
//! let reply = proxy
//!     .method_call("org.example.Led", "on", &[MsgArg::Double(1.0)], Duration::from_secs(5))
//!     .await?;
//! println!("{reply:?}");
//! # Ok(())
//! # }
//! ```

pub mod address;
pub mod attachment;
mod dispatch;
pub mod error;
pub mod interface;
pub mod listener;
pub mod msgarg;
pub mod names;
pub mod object;
pub mod protocol;
pub mod proxy;
pub mod session;
pub mod transport;
mod util;

pub use address::{BusAddress, DEFAULT_ADDRESS};
pub use attachment::{BusAttachment, DEFAULT_CALL_TIMEOUT, WeakBusAttachment};
pub use error::{BusError, Result};
pub use interface::{InterfaceBuilder, InterfaceDescription, Member};
pub use listener::{BusListener, SessionListener, SessionPortListener};
pub use msgarg::{FromMsgArg, MsgArg, Signature};
pub use names::{NameFlags, ReleaseNameReply, RequestNameReply};
pub use object::{BusObject, MethodCall, MethodHandler};
pub use proxy::ProxyBusObject;
pub use session::{
    Proximity, SessionId, SessionLostReason, SessionOpts, SessionPort, TrafficType, TransportMask,
};
pub use transport::{CodecError, FrameCodec, MAX_FRAME_SIZE};

/// Library version, logged by programs at startup.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
