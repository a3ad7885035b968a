use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::p2p::BroadcastError;
use crate::p2p::transport::DEFAULT_STREAM_TIMEOUT;
use crate::storage::StoreError;

pub const DEFAULT_GET_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_DIAL_ATTEMPTS: usize = 3;

/// Everything a [`FileServer`](super::service::FileServer) needs, fixed before start.
#[derive(Debug, Clone)]
pub struct FileServerConfig {
    pub listen_addr: String,
    /// Root directory of the local content store.
    pub storage_root: PathBuf,
    /// Peers dialed once at start.
    pub bootstrap_nodes: Vec<String>,
    /// Upper bound on a remote `get`.
    pub get_timeout: Duration,
    /// Upper bound on draining one announced payload.
    pub stream_timeout: Duration,
    pub dial_attempts: usize,
}

impl Default for FileServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:3000".to_string(),
            storage_root: PathBuf::from("3000_network"),
            bootstrap_nodes: Vec::new(),
            get_timeout: DEFAULT_GET_TIMEOUT,
            stream_timeout: DEFAULT_STREAM_TIMEOUT,
            dial_attempts: DEFAULT_DIAL_ATTEMPTS,
        }
    }
}

#[derive(Error, Debug)]
pub enum NodeError {
    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("Broadcast error: {0}")]
    Broadcast(#[from] BroadcastError),

    #[error("Encoding error: {0}")]
    Codec(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Key {0} not available on this node or its peers")]
    NotFound(String),

    #[error("Timed out after {timeout:?} waiting for key {key}")]
    Timeout { key: String, timeout: Duration },
}

impl NodeError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            NodeError::NotFound(_) | NodeError::Storage(StoreError::NotFound(_))
        )
    }
}

impl From<anyhow::Error> for NodeError {
    fn from(e: anyhow::Error) -> Self {
        NodeError::Codec(e.to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreResponse {
    pub success: bool,
    pub size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub success: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeersResponse {
    pub address: Option<String>,
    pub peers: Vec<String>,
}
