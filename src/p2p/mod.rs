//! Peer-to-Peer Networking Module
//!
//! Point-to-point TCP connections between nodes and the wire protocol spoken on them.
//!
//! ## Core Concepts
//! - **Transport**: accepts and dials connections, one worker task per connection.
//! - **Peer**: owns a socket; sends raw bytes and reads exact-length payloads.
//! - **Codec**: pluggable frame decoder; the reference format is length-prefixed bincode.
//! - **Registry**: live peers keyed by remote address, used for broadcasts.
//!
//! Control frames and raw payload bytes share one socket. The rendezvous in
//! `peer` guarantees a single reader at any time.

pub mod codec;
pub mod handshake;
pub mod peer;
pub mod registry;
pub mod transport;
pub mod types;

pub use codec::{BincodeDecoder, Decoder, NopDecoder, encode_frame};
pub use handshake::{Handshake, NopHandshake, OnPeerFn, on_peer};
pub use peer::TcpPeer;
pub use registry::{BroadcastError, PeerRegistry};
pub use transport::{TcpTransport, TcpTransportOpts};
pub use types::{ControlMessage, Frame, PeerIdentity, Rpc};
