//! Distributed Content-Addressable File Store Library
//!
//! This library crate defines the core modules of a peer-to-peer file store.
//! It serves as the foundation for the binary executable (`main.rs`).
//!
//! ## Architecture Modules
//! The system is composed of three layers:
//!
//! - **`storage`**: The local persistence layer. Maps opaque keys to sharded on-disk
//!   paths derived from a SHA-1 of the key, and stores bytes there atomically.
//! - **`p2p`**: The networking layer. TCP transport, peers, the frame codec and the
//!   peer registry. Control frames and raw payload streams share one connection.
//! - **`node`**: The replication protocol. A `FileServer` pushes every store to all
//!   peers, pulls missing keys on demand, and exposes the local API over HTTP.

pub mod node;
pub mod p2p;
pub mod storage;
