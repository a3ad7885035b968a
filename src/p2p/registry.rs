//! Peer Registry
//!
//! Tracks live peers by remote identity. All mutations happen under a single
//! lock; the mapping itself is never handed out. Broadcasts take an ordered
//! snapshot under the lock and write to sockets after releasing it, so a slow
//! peer never blocks registration or lookup.

use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Mutex;

use super::peer::TcpPeer;
use super::types::PeerIdentity;

#[derive(Error, Debug)]
pub enum BroadcastError {
    #[error("Send to {peer} failed: {source}")]
    Send {
        peer: PeerIdentity,
        #[source]
        source: std::io::Error,
    },
}

impl BroadcastError {
    pub fn peer(&self) -> &PeerIdentity {
        match self {
            BroadcastError::Send { peer, .. } => peer,
        }
    }
}

#[derive(Debug, Default)]
pub struct PeerRegistry {
    peers: Mutex<BTreeMap<PeerIdentity, Arc<TcpPeer>>>,
}

impl PeerRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Adds a peer. A handle previously registered under the same identity is
    /// closed and returned, so every entry keeps exactly one live connection.
    pub async fn register(&self, peer: Arc<TcpPeer>) -> Option<Arc<TcpPeer>> {
        let identity = peer.identity().clone();
        let previous = {
            let mut peers = self.peers.lock().await;
            let previous = peers.insert(identity.clone(), peer);
            tracing::info!("Registered peer {} ({} total)", identity, peers.len());
            previous
        };

        if let Some(stale) = &previous {
            stale.close().await;
        }
        previous
    }

    pub async fn unregister(&self, identity: &PeerIdentity) -> Option<Arc<TcpPeer>> {
        let removed = self.peers.lock().await.remove(identity);
        if removed.is_some() {
            tracing::info!("Unregistered peer {}", identity);
        }
        removed
    }

    pub async fn get(&self, identity: &PeerIdentity) -> Option<Arc<TcpPeer>> {
        self.peers.lock().await.get(identity).cloned()
    }

    pub async fn len(&self) -> usize {
        self.peers.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.peers.lock().await.is_empty()
    }

    pub async fn identities(&self) -> Vec<PeerIdentity> {
        self.peers.lock().await.keys().cloned().collect()
    }

    /// Visits every peer in identity order while holding the lock.
    pub async fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&Arc<TcpPeer>),
    {
        let peers = self.peers.lock().await;
        for peer in peers.values() {
            f(peer);
        }
    }

    async fn snapshot(&self) -> Vec<Arc<TcpPeer>> {
        let mut snapshot = Vec::new();
        self.for_each(|peer| snapshot.push(peer.clone())).await;
        snapshot
    }

    /// Sends `payload` to every peer in order. The first failure stops the
    /// broadcast; peers already reached keep what they received.
    pub async fn broadcast(&self, payload: &[u8]) -> Result<usize, BroadcastError> {
        let peers = self.snapshot().await;
        for peer in &peers {
            peer.send(payload)
                .await
                .map_err(|source| BroadcastError::Send {
                    peer: peer.identity().clone(),
                    source,
                })?;
        }
        Ok(peers.len())
    }

    /// Sends `header` immediately followed by `body` to every peer in order,
    /// with the same first-failure semantics as [`broadcast`](Self::broadcast).
    pub async fn replicate(&self, header: &[u8], body: &[u8]) -> Result<usize, BroadcastError> {
        let peers = self.snapshot().await;
        for peer in &peers {
            let mut reader = body;
            peer.send_stream(header, &mut reader)
                .await
                .map_err(|source| BroadcastError::Send {
                    peer: peer.identity().clone(),
                    source,
                })?;
            tracing::debug!("Streamed {} bytes to {}", body.len(), peer.identity());
        }
        Ok(peers.len())
    }

    /// Removes and closes every peer.
    pub async fn clear(&self) {
        let drained: Vec<Arc<TcpPeer>> = {
            let mut peers = self.peers.lock().await;
            std::mem::take(&mut *peers).into_values().collect()
        };
        for peer in drained {
            peer.close().await;
        }
    }
}
