use serde::{Deserialize, Serialize};
use std::fmt;

/// Remote endpoint address of a connection, as observed on the socket.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerIdentity(pub String);

impl PeerIdentity {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<std::net::SocketAddr> for PeerIdentity {
    fn from(addr: std::net::SocketAddr) -> Self {
        Self(addr.to_string())
    }
}

/// The control plane of the wire protocol.
///
/// - `StoreAnnounce`: the next `size` bytes on the same connection are the raw payload for `key`.
/// - `GetRequest`: the sender wants `key`; a holder answers with a `StoreAnnounce` and the bytes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ControlMessage {
    StoreAnnounce { key: String, size: u64 },

    GetRequest { key: String },
}

/// One unit produced by a [`Decoder`](super::codec::Decoder).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Control(ControlMessage),
    /// Undecoded bytes, produced by the no-op decoder.
    Raw(Vec<u8>),
}

impl Frame {
    pub fn is_store_announce(&self) -> bool {
        matches!(self, Frame::Control(ControlMessage::StoreAnnounce { .. }))
    }
}

/// A decoded frame tagged with the connection it arrived on.
///
/// `from` is filled in by the transport from the socket; it is never taken
/// from message content.
#[derive(Debug, Clone)]
pub struct Rpc {
    pub from: PeerIdentity,
    pub frame: Frame,
}
