//! TCP Transport
//!
//! Listens for inbound connections, dials outbound ones, and runs one worker
//! task per connection. Each worker performs the handshake, hands the peer to
//! the `on_peer` hook, then decodes frames and pushes them onto a single
//! inbound queue.
//!
//! ## Stream hand-off
//! After decoding a `StoreAnnounce` the worker arms the peer's rendezvous,
//! delivers the message, and stops reading until the consumer signals that the
//! raw payload following the frame has been drained.

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, mpsc, watch};

use super::codec::{BincodeDecoder, Decoder};
use super::handshake::{Handshake, NopHandshake, OnPeerFn};
use super::peer::TcpPeer;
use super::types::Rpc;

pub const DEFAULT_STREAM_TIMEOUT: Duration = Duration::from_secs(30);
const INBOUND_QUEUE_SIZE: usize = 1024;
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Construction parameters for [`TcpTransport`].
#[derive(Clone)]
pub struct TcpTransportOpts {
    pub listen_addr: String,
    pub handshake: Arc<dyn Handshake>,
    pub decoder: Arc<dyn Decoder>,
    pub on_peer: Option<OnPeerFn>,
    /// How long a worker waits for an announced payload to be drained.
    pub stream_timeout: Duration,
}

impl Default for TcpTransportOpts {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:3000".to_string(),
            handshake: Arc::new(NopHandshake),
            decoder: Arc::new(BincodeDecoder),
            on_peer: None,
            stream_timeout: DEFAULT_STREAM_TIMEOUT,
        }
    }
}

pub struct TcpTransport {
    opts: TcpTransportOpts,
    local_addr: OnceLock<SocketAddr>,
    rpc_tx: mpsc::Sender<Rpc>,
    rpc_rx: Mutex<Option<mpsc::Receiver<Rpc>>>,
    shutdown: watch::Sender<bool>,
}

impl TcpTransport {
    pub fn new(opts: TcpTransportOpts) -> Arc<Self> {
        let (rpc_tx, rpc_rx) = mpsc::channel(INBOUND_QUEUE_SIZE);
        let (shutdown, _) = watch::channel(false);

        Arc::new(Self {
            opts,
            local_addr: OnceLock::new(),
            rpc_tx,
            rpc_rx: Mutex::new(Some(rpc_rx)),
            shutdown,
        })
    }

    pub fn listen_address(&self) -> &str {
        &self.opts.listen_addr
    }

    /// Address actually bound, once listening.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.get().copied()
    }

    /// Takes the inbound queue. Only the first caller gets it.
    pub async fn consume(&self) -> Result<mpsc::Receiver<Rpc>> {
        self.rpc_rx
            .lock()
            .await
            .take()
            .context("Inbound queue already consumed")
    }

    /// Binds the listener and starts the accept loop in the background.
    pub async fn listen_and_accept(self: &Arc<Self>) -> Result<SocketAddr> {
        let listener = TcpListener::bind(&self.opts.listen_addr)
            .await
            .with_context(|| format!("Failed to bind {}", self.opts.listen_addr))?;
        let addr = listener.local_addr()?;
        let _ = self.local_addr.set(addr);

        tracing::info!("TCP transport listening on {}", addr);

        let transport = self.clone();
        tokio::spawn(async move {
            transport.accept_loop(listener).await;
        });

        Ok(addr)
    }

    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        let mut shutdown = self.shutdown.subscribe();

        loop {
            if *shutdown.borrow() {
                break;
            }

            let accepted = tokio::select! {
                accepted = listener.accept() => accepted,
                _ = shutdown.changed() => break,
            };

            match accepted {
                Ok((stream, addr)) => {
                    tracing::debug!("Accepted connection from {}", addr);
                    let transport = self.clone();
                    tokio::spawn(async move {
                        transport.handle_conn(stream, false).await;
                    });
                }
                Err(e) => {
                    tracing::error!("TCP accept error: {}", e);
                    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                }
            }
        }

        tracing::info!("Accept loop on {} stopped", self.opts.listen_addr);
    }

    /// Connects to `addr` and starts a worker for the new connection.
    pub async fn dial(self: &Arc<Self>, addr: &str) -> Result<()> {
        let stream = TcpStream::connect(addr)
            .await
            .with_context(|| format!("Failed to dial {}", addr))?;

        tracing::info!("Dialed {}", addr);

        let transport = self.clone();
        tokio::spawn(async move {
            transport.handle_conn(stream, true).await;
        });
        Ok(())
    }

    /// Stops accepting and ends every worker. Idempotent.
    pub fn close(&self) {
        if !self.shutdown.send_replace(true) {
            tracing::info!("Closing TCP transport {}", self.opts.listen_addr);
        }
    }

    async fn handle_conn(&self, stream: TcpStream, outbound: bool) {
        let peer = match TcpPeer::new(stream, outbound) {
            Ok(peer) => Arc::new(peer),
            Err(e) => {
                tracing::warn!("Dropping connection before setup: {}", e);
                return;
            }
        };

        if let Err(e) = self.opts.handshake.handshake(&peer).await {
            tracing::warn!("Handshake with {} failed: {}", peer.identity(), e);
            peer.close().await;
            return;
        }

        if let Some(on_peer) = &self.opts.on_peer
            && let Err(e) = on_peer(peer.clone()).await
        {
            tracing::warn!("Peer {} rejected: {}", peer.identity(), e);
            peer.close().await;
            return;
        }

        let reason = self.read_loop(&peer).await;
        tracing::info!("Dropping peer connection {}: {}", peer.identity(), reason);
        peer.close().await;
    }

    /// Decodes frames until the connection ends. Returns why it ended.
    async fn read_loop(&self, peer: &Arc<TcpPeer>) -> String {
        let mut shutdown = self.shutdown.subscribe();

        loop {
            if *shutdown.borrow() {
                return "transport closed".to_string();
            }

            let decoded = tokio::select! {
                decoded = peer.decode_frame(self.opts.decoder.as_ref()) => decoded,
                _ = peer.closed() => return "closed locally".to_string(),
                _ = shutdown.changed() => return "transport closed".to_string(),
            };

            let frame = match decoded {
                Ok(frame) => frame,
                Err(e) if e.is_recoverable() => {
                    tracing::warn!("Skipping frame from {}: {}", peer.identity(), e);
                    continue;
                }
                Err(e) => return e.to_string(),
            };

            let announce = frame.is_store_announce();
            if announce {
                peer.expect_stream();
            }

            let rpc = Rpc {
                from: peer.identity().clone(),
                frame,
            };
            if self.rpc_tx.send(rpc).await.is_err() {
                return "inbound queue dropped".to_string();
            }

            if announce {
                tracing::debug!("Waiting for stream from {} to be drained", peer.identity());
                tokio::select! {
                    _ = peer.await_stream_done() => {}
                    _ = peer.closed() => return "closed during stream".to_string(),
                    _ = shutdown.changed() => return "transport closed".to_string(),
                    _ = tokio::time::sleep(self.opts.stream_timeout) => {
                        return "stream hand-off timed out".to_string();
                    }
                }
                tracing::debug!("Stream from {} done, resuming", peer.identity());
            }
        }
    }
}
