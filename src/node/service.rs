use anyhow::{Context, Result};
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::timeout;
use tracing::info;

use super::types::{FileServerConfig, NodeError};
use crate::p2p::{
    ControlMessage, Frame, PeerIdentity, PeerRegistry, Rpc, TcpPeer, TcpTransport,
    TcpTransportOpts, encode_frame, on_peer,
};
use crate::storage::ContentStore;

const DIAL_BACKOFF_START_MS: u64 = 150;
const DIAL_BACKOFF_MAX_MS: u64 = 1200;

/// One node of the store.
///
/// Owns the local [`ContentStore`], the transport and the peer registry, and
/// runs the loop that dispatches inbound control messages. Local callers use
/// [`store`](Self::store), [`get`](Self::get) and [`delete`](Self::delete).
pub struct FileServer {
    config: FileServerConfig,
    store: ContentStore,
    registry: Arc<PeerRegistry>,
    transport: Arc<TcpTransport>,
    /// Local `get` calls waiting for a key to arrive from the network.
    pending: DashMap<String, Vec<oneshot::Sender<()>>>,
    shutdown: watch::Sender<bool>,
}

impl FileServer {
    pub fn new(config: FileServerConfig) -> Arc<Self> {
        let registry = PeerRegistry::new();

        let hook_registry = registry.clone();
        let transport = TcpTransport::new(TcpTransportOpts {
            listen_addr: config.listen_addr.clone(),
            stream_timeout: config.stream_timeout,
            on_peer: Some(on_peer(move |peer: Arc<TcpPeer>| {
                let registry = hook_registry.clone();
                async move {
                    if let Some(replaced) = registry.register(peer).await {
                        tracing::warn!("Replaced stale connection to {}", replaced.identity());
                    }
                    Ok(())
                }
            })),
            ..Default::default()
        });

        let (shutdown, _) = watch::channel(false);

        Arc::new(Self {
            store: ContentStore::new(config.storage_root.clone()),
            config,
            registry,
            transport,
            pending: DashMap::new(),
            shutdown,
        })
    }

    pub fn config(&self) -> &FileServerConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<PeerRegistry> {
        &self.registry
    }

    /// Bound address once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.transport.local_addr()
    }

    /// Binds the listener, dials the bootstrap peers and starts the dispatch
    /// loop. Failing to bind is the only error.
    pub async fn start(self: &Arc<Self>) -> Result<SocketAddr> {
        let addr = self.transport.listen_and_accept().await?;
        let inbound = self.transport.consume().await?;

        info!("[{}] Starting file server", addr);

        self.bootstrap();

        let server = self.clone();
        tokio::spawn(async move {
            server.run_loop(inbound).await;
        });

        Ok(addr)
    }

    /// Abrupt shutdown. In-flight streams are not drained.
    pub async fn stop(&self) {
        if self.shutdown.send_replace(true) {
            return;
        }

        self.transport.close();
        self.registry.clear().await;
        self.pending.clear();

        info!("[{}] File server stopped", self.transport.listen_address());
    }

    fn bootstrap(self: &Arc<Self>) {
        for addr in &self.config.bootstrap_nodes {
            if addr.is_empty() {
                continue;
            }

            let server = self.clone();
            let addr = addr.clone();
            tokio::spawn(async move {
                if let Err(e) = server.dial_with_retry(&addr).await {
                    tracing::warn!("Bootstrap dial to {} failed: {}", addr, e);
                }
            });
        }
    }

    async fn dial_with_retry(&self, addr: &str) -> Result<()> {
        let attempts = self.config.dial_attempts.max(1);
        let mut delay_ms = DIAL_BACKOFF_START_MS;

        for attempt in 0..attempts {
            match self.transport.dial(addr).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    if attempt + 1 == attempts {
                        return Err(e);
                    }
                    tracing::debug!("Dial {} attempt {} failed: {}", addr, attempt + 1, e);
                    let jitter = rand::random::<u64>() % 50;
                    tokio::time::sleep(Duration::from_millis(delay_ms + jitter)).await;
                    delay_ms = (delay_ms * 2).min(DIAL_BACKOFF_MAX_MS);
                }
            }
        }

        Err(anyhow::anyhow!("Dial attempts exhausted"))
    }

    // ============================================================
    // LOCAL API
    // ============================================================

    pub async fn has(&self, key: &str) -> bool {
        self.store.has(key).await
    }

    /// Persists `source` locally, then pushes it to every registered peer:
    /// each one receives a `StoreAnnounce` immediately followed by the bytes.
    pub async fn store<R>(&self, key: &str, source: &mut R) -> Result<u64, NodeError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut buf = Vec::new();
        source.read_to_end(&mut buf).await?;

        let size = self.store.write(key, &mut buf.as_slice()).await?;
        self.notify_waiters(key);

        let header = encode_frame(&ControlMessage::StoreAnnounce {
            key: key.to_string(),
            size,
        })?;

        match self.registry.replicate(&header, &buf).await {
            Ok(peers) => {
                info!("Stored [{}] ({} bytes), replicated to {} peers", key, size, peers);
                Ok(size)
            }
            Err(e) => {
                tracing::error!("Replication of [{}] aborted: {}", key, e);
                self.evict(e.peer()).await;
                Err(e.into())
            }
        }
    }

    /// Opens `key`, fetching it from the peers first if it is not held locally.
    ///
    /// A remote fetch waits at most `get_timeout` for some peer to stream the
    /// key back. Without any peers it fails immediately.
    pub async fn get(&self, key: &str) -> Result<(u64, File), NodeError> {
        if self.store.has(key).await {
            info!("Serving [{}] from local disk", key);
            return Ok(self.store.read(key).await?);
        }

        if self.registry.is_empty().await {
            return Err(NodeError::NotFound(key.to_string()));
        }

        info!("Don't have [{}] locally, fetching from network", key);

        let (tx, rx) = oneshot::channel();
        self.pending.entry(key.to_string()).or_default().push(tx);

        // A write may have landed between the first check and registering.
        if self.store.has(key).await {
            self.prune_waiters(key);
            return Ok(self.store.read(key).await?);
        }

        let request = encode_frame(&ControlMessage::GetRequest {
            key: key.to_string(),
        })?;
        if let Err(e) = self.registry.broadcast(&request).await {
            self.prune_waiters(key);
            self.evict(e.peer()).await;
            return Err(e.into());
        }

        let waited = timeout(self.config.get_timeout, rx).await;
        self.prune_waiters(key);

        match waited {
            Ok(Ok(())) => Ok(self.store.read(key).await?),
            Ok(Err(_)) => Err(NodeError::NotFound(key.to_string())),
            Err(_) => Err(NodeError::Timeout {
                key: key.to_string(),
                timeout: self.config.get_timeout,
            }),
        }
    }

    /// Removes the local copy only.
    pub async fn delete(&self, key: &str) -> Result<(), NodeError> {
        self.store.delete(key).await?;
        Ok(())
    }

    fn notify_waiters(&self, key: &str) {
        if let Some((_, waiters)) = self.pending.remove(key) {
            for tx in waiters {
                let _ = tx.send(());
            }
        }
    }

    fn prune_waiters(&self, key: &str) {
        if let Some(mut waiters) = self.pending.get_mut(key) {
            waiters.retain(|tx| !tx.is_closed());
        }
        self.pending.remove_if(key, |_, waiters| waiters.is_empty());
    }

    async fn evict(&self, identity: &PeerIdentity) {
        if let Some(peer) = self.registry.unregister(identity).await {
            peer.close().await;
        }
    }

    // ============================================================
    // DISPATCH
    // ============================================================

    async fn run_loop(self: Arc<Self>, mut inbound: mpsc::Receiver<Rpc>) {
        let mut shutdown = self.shutdown.subscribe();

        loop {
            if *shutdown.borrow() {
                break;
            }

            let rpc = tokio::select! {
                rpc = inbound.recv() => match rpc {
                    Some(rpc) => rpc,
                    None => break,
                },
                _ = shutdown.changed() => break,
            };

            let from = rpc.from.clone();
            if let Err(e) = self.handle_rpc(rpc).await {
                tracing::error!("Error handling message from {}: {:#}", from, e);
            }
        }

        info!("Dispatch loop stopped");
    }

    async fn handle_rpc(self: &Arc<Self>, rpc: Rpc) -> Result<()> {
        match rpc.frame {
            Frame::Control(ControlMessage::StoreAnnounce { key, size }) => {
                self.handle_store_announce(&rpc.from, &key, size).await
            }
            Frame::Control(ControlMessage::GetRequest { key }) => {
                self.handle_get_request(&rpc.from, &key).await
            }
            Frame::Raw(bytes) => {
                tracing::debug!("Dropping {} raw bytes from {}", bytes.len(), rpc.from);
                Ok(())
            }
        }
    }

    async fn handle_store_announce(&self, from: &PeerIdentity, key: &str, size: u64) -> Result<()> {
        let peer = self
            .registry
            .get(from)
            .await
            .with_context(|| format!("Peer {} not found in registry", from))?;

        // Bytes go straight from the socket into the store. `size` is never
        // used to size a buffer, only to bound the read.
        let received = {
            let mut reader = peer.reader().await;
            let mut payload = (&mut *reader).take(size);
            timeout(
                self.config.stream_timeout,
                self.store.write_exact(key, &mut payload, size),
            )
            .await
        };

        peer.signal_stream_done();

        match received {
            Ok(Ok(written)) => {
                info!("Written {} bytes of [{}] to disk, from {}", written, key, from);
                self.notify_waiters(key);
                Ok(())
            }
            Ok(Err(e)) => {
                // The socket position is unknown after a failed drain.
                self.evict(from).await;
                Err(e).with_context(|| format!("Failed to receive [{}] from {}", key, from))
            }
            Err(_) => {
                self.evict(from).await;
                anyhow::bail!("Timed out reading {} bytes of [{}] from {}", size, key, from);
            }
        }
    }

    async fn handle_get_request(self: &Arc<Self>, from: &PeerIdentity, key: &str) -> Result<()> {
        if !self.store.has(key).await {
            anyhow::bail!("Need to serve [{}] to {} but it does not exist on disk", key, from);
        }

        let peer = self
            .registry
            .get(from)
            .await
            .with_context(|| format!("Peer {} not found in registry", from))?;

        let server = self.clone();
        let key = key.to_string();
        tokio::spawn(async move {
            if let Err(e) = server.serve(&peer, &key).await {
                tracing::warn!("Failed to serve [{}] to {}: {:#}", key, peer.identity(), e);
                server.evict(peer.identity()).await;
            }
        });

        Ok(())
    }

    /// Streams a held key back over `peer` as an announce plus payload.
    async fn serve(&self, peer: &TcpPeer, key: &str) -> Result<()> {
        let (size, mut file) = self.store.read(key).await?;
        let header = encode_frame(&ControlMessage::StoreAnnounce {
            key: key.to_string(),
            size,
        })?;

        let sent = peer.send_stream(&header, &mut file).await?;
        info!("Served [{}] ({} bytes) to {}", key, sent, peer.identity());
        Ok(())
    }
}
