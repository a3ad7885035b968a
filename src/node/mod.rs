//! File Server Module
//!
//! Ties the content store and the p2p layer into one node.
//!
//! ## Behaviour
//! - **Push replication**: every local store is written to disk, then streamed to all peers.
//! - **Pull on miss**: a `get` for a missing key asks every peer and waits, bounded, for the bytes.
//! - **Reciprocal serving**: a node holding a requested key answers with an announce and the payload.
//! - **Dispatch loop**: one task consumes the transport's inbound queue; a bad message is logged, never fatal.

pub mod handlers;
pub mod service;
pub mod types;

pub use service::FileServer;
pub use types::{FileServerConfig, NodeError};
