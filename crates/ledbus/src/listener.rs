//! Listener traits for bus, session-port and session callbacks.
//!
//! All methods have no-op defaults. Callbacks are delivered one at a time by
//! the attachment's dispatcher; see
//! [`BusAttachment::enable_concurrent_callbacks`](crate::BusAttachment::enable_concurrent_callbacks)
//! for making blocking bus calls from inside one.

use std::future::Future;

use crate::session::{SessionId, SessionLostReason, SessionOpts, SessionPort, TransportMask};

pub trait BusListener: Send + Sync + 'static {
    /// A name matching an active `find_advertised_name` prefix appeared.
    fn found_advertised_name(
        &self,
        _name: &str,
        _transport: TransportMask,
        _prefix: &str,
    ) -> impl Future<Output = ()> + Send {
        async {}
    }

    fn lost_advertised_name(
        &self,
        _name: &str,
        _transport: TransportMask,
        _prefix: &str,
    ) -> impl Future<Output = ()> + Send {
        async {}
    }

    /// Ownership of `name` moved. `None` means unowned.
    fn name_owner_changed(
        &self,
        _name: &str,
        _previous_owner: Option<&str>,
        _new_owner: Option<&str>,
    ) -> impl Future<Output = ()> + Send {
        async {}
    }

    /// The connection to the router was lost.
    fn bus_disconnected(&self) -> impl Future<Output = ()> + Send {
        async {}
    }
}

pub trait SessionPortListener: Send + Sync + 'static {
    /// Decide whether `joiner` may join a session on `port`. Rejects by default.
    fn accept_session_joiner(
        &self,
        _port: SessionPort,
        _joiner: &str,
        _opts: &SessionOpts,
    ) -> impl Future<Output = bool> + Send {
        async { false }
    }

    fn session_joined(
        &self,
        _port: SessionPort,
        _session_id: SessionId,
        _joiner: &str,
    ) -> impl Future<Output = ()> + Send {
        async {}
    }
}

pub trait SessionListener: Send + Sync + 'static {
    fn session_lost(
        &self,
        _session_id: SessionId,
        _reason: SessionLostReason,
    ) -> impl Future<Output = ()> + Send {
        async {}
    }
}
