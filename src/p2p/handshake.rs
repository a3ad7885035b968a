//! Per-connection hooks run by the transport before any frame is decoded.

use anyhow::Result;
use async_trait::async_trait;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use super::peer::TcpPeer;

/// Protocol-upgrade point. Rejecting closes the connection.
#[async_trait]
pub trait Handshake: Send + Sync {
    async fn handshake(&self, peer: &TcpPeer) -> Result<()>;
}

/// Accepts every connection.
#[derive(Debug, Default, Clone, Copy)]
pub struct NopHandshake;

#[async_trait]
impl Handshake for NopHandshake {
    async fn handshake(&self, _peer: &TcpPeer) -> Result<()> {
        Ok(())
    }
}

/// Callback invoked once a connection passed its handshake.
/// An error closes the connection.
pub type OnPeerFn =
    Arc<dyn Fn(Arc<TcpPeer>) -> Pin<Box<dyn Future<Output = Result<()>> + Send>> + Send + Sync>;

/// Wraps an async closure into an [`OnPeerFn`].
pub fn on_peer<F, Fut>(hook: F) -> OnPeerFn
where
    F: Fn(Arc<TcpPeer>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(move |peer: Arc<TcpPeer>| {
        Box::pin(hook(peer)) as Pin<Box<dyn Future<Output = Result<()>> + Send>>
    })
}
