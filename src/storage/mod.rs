//! Content-Addressable Storage Module
//!
//! Persists opaque byte payloads on the local filesystem under a path derived
//! from the key.
//!
//! ## Core Concepts
//! - **Addressing**: `path` hashes a key (SHA-1) and splits the digest into nested shard directories.
//! - **Durability boundary**: `store` writes through a temp file and a rename, so a key is either fully present or absent.
//! - **Reclamation**: deleting a key prunes the shard directories it leaves empty.

pub mod path;
pub mod store;

pub use path::{PathKey, cas_path_transform};
pub use store::{ContentStore, StoreError};

#[cfg(test)]
mod tests;
