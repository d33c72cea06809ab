//! Session options and identifiers.

use serde::{Deserialize, Serialize};

/// Port a host binds to accept sessions on.
pub type SessionPort = u16;

/// Router-assigned session identifier. `0` means "no session".
pub type SessionId = u32;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrafficType {
    #[default]
    Messages,
    RawUnreliable,
    RawReliable,
}

/// Bit mask describing how close a peer may be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Proximity(pub u8);

impl Proximity {
    pub const ANY: Proximity = Proximity(0xFF);
    pub const PHYSICAL: Proximity = Proximity(0x01);
    pub const NETWORK: Proximity = Proximity(0x02);

    #[must_use]
    pub fn intersects(self, other: Proximity) -> bool {
        self.0 & other.0 != 0
    }
}

impl Default for Proximity {
    fn default() -> Self {
        Proximity::ANY
    }
}

/// Bit mask of transports a name is advertised or a session is allowed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransportMask(pub u16);

impl TransportMask {
    pub const NONE: TransportMask = TransportMask(0);
    pub const LOCAL: TransportMask = TransportMask(0x0001);
    pub const TCP: TransportMask = TransportMask(0x0004);
    pub const UDP: TransportMask = TransportMask(0x0100);
    pub const ANY: TransportMask = TransportMask(0xFFFF);

    #[must_use]
    pub fn intersection(self, other: TransportMask) -> TransportMask {
        TransportMask(self.0 & other.0)
    }

    #[must_use]
    pub fn intersects(self, other: TransportMask) -> bool {
        self.0 & other.0 != 0
    }

    /// The transport a router reports discoveries on: local if allowed,
    /// otherwise the lowest set bit.
    #[must_use]
    pub fn preferred(self) -> TransportMask {
        if self.intersects(TransportMask::LOCAL) {
            TransportMask::LOCAL
        } else {
            TransportMask(self.0 & self.0.wrapping_neg())
        }
    }
}

impl Default for TransportMask {
    fn default() -> Self {
        TransportMask::ANY
    }
}

/// Options negotiated when a session is bound or joined.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionOpts {
    pub traffic: TrafficType,
    pub is_multipoint: bool,
    pub proximity: Proximity,
    pub transports: TransportMask,
}

impl SessionOpts {
    #[must_use]
    pub fn new(
        traffic: TrafficType,
        is_multipoint: bool,
        proximity: Proximity,
        transports: TransportMask,
    ) -> Self {
        Self {
            traffic,
            is_multipoint,
            proximity,
            transports,
        }
    }

    /// Two option sets are compatible when traffic types match and both the
    /// proximity and transport masks overlap. Multipoint is negotiated by the
    /// host and does not affect compatibility.
    #[must_use]
    pub fn is_compatible(&self, other: &SessionOpts) -> bool {
        self.traffic == other.traffic
            && self.proximity.intersects(other.proximity)
            && self.transports.intersects(other.transports)
    }

    /// Options the joiner ends up with: the host's traffic and multipoint,
    /// intersected masks.
    #[must_use]
    pub fn negotiate(&self, joiner: &SessionOpts) -> SessionOpts {
        SessionOpts {
            traffic: self.traffic,
            is_multipoint: self.is_multipoint,
            proximity: Proximity(self.proximity.0 & joiner.proximity.0),
            transports: self.transports.intersection(joiner.transports),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionLostReason {
    RemoteEndLeft,
    RemoteEndClosedAbruptly,
    RemovedByBinder,
    LinkTimeout,
    Other,
}

impl std::fmt::Display for SessionLostReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            SessionLostReason::RemoteEndLeft => "remote end left",
            SessionLostReason::RemoteEndClosedAbruptly => "remote end closed abruptly",
            SessionLostReason::RemovedByBinder => "removed by binder",
            SessionLostReason::LinkTimeout => "link timeout",
            SessionLostReason::Other => "other",
        };
        f.write_str(text)
    }
}
