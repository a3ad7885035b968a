//! A single live TCP connection to a remote node.
//!
//! The socket carries both decoded control frames and raw payload bytes. Only
//! one party reads at a time: the transport's decode loop, or, after it has
//! delivered a `StoreAnnounce`, the handler consuming that payload. The
//! hand-off back to the decode loop is the stream-done rendezvous.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Mutex, MutexGuard, Notify, watch};

use super::codec::{DecodeError, Decoder};
use super::types::{Frame, PeerIdentity};

pub struct TcpPeer {
    identity: PeerIdentity,
    /// true when we dialed, false when we accepted.
    outbound: bool,
    reader: Mutex<BufReader<OwnedReadHalf>>,
    writer: Mutex<OwnedWriteHalf>,
    stream_pending: AtomicBool,
    stream_done: Notify,
    closed: watch::Sender<bool>,
}

impl TcpPeer {
    pub fn new(stream: TcpStream, outbound: bool) -> io::Result<Self> {
        let remote: SocketAddr = stream.peer_addr()?;
        stream.set_nodelay(true)?;
        let (read_half, write_half) = stream.into_split();
        let (closed, _) = watch::channel(false);

        Ok(Self {
            identity: PeerIdentity::from(remote),
            outbound,
            reader: Mutex::new(BufReader::new(read_half)),
            writer: Mutex::new(write_half),
            stream_pending: AtomicBool::new(false),
            stream_done: Notify::new(),
            closed,
        })
    }

    pub fn identity(&self) -> &PeerIdentity {
        &self.identity
    }

    pub fn is_outbound(&self) -> bool {
        self.outbound
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    fn ensure_open(&self) -> io::Result<()> {
        if self.is_closed() {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                format!("connection to {} is closed", self.identity),
            ));
        }
        Ok(())
    }

    /// Writes raw bytes. No framing is added.
    pub async fn send(&self, payload: &[u8]) -> io::Result<()> {
        self.ensure_open()?;
        let mut writer = self.writer.lock().await;
        writer.write_all(payload).await?;
        writer.flush().await
    }

    /// Writes `header` and then all of `body` without letting any other
    /// writer interleave on this connection. Returns the body length.
    pub async fn send_stream<R>(&self, header: &[u8], body: &mut R) -> io::Result<u64>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        self.ensure_open()?;
        let mut writer = self.writer.lock().await;
        writer.write_all(header).await?;
        let n = tokio::io::copy(body, &mut *writer).await?;
        writer.flush().await?;
        Ok(n)
    }

    /// Blocks until exactly `n` bytes were read from the connection.
    ///
    /// The buffer grows with the bytes actually received, never with `n`.
    pub async fn read_exactly(&self, n: u64) -> io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        let mut reader = self.reader.lock().await;
        let read = (&mut *reader).take(n).read_to_end(&mut buf).await?;

        if read as u64 != n {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("expected {n} bytes from {}, got {read}", self.identity),
            ));
        }
        Ok(buf)
    }

    /// Exclusive access to the read side, for draining an announced payload
    /// in place. Limit it with `take(size)` so it never reads past the payload.
    pub async fn reader(&self) -> MutexGuard<'_, BufReader<OwnedReadHalf>> {
        self.reader.lock().await
    }

    pub(crate) async fn decode_frame(&self, decoder: &dyn Decoder) -> Result<Frame, DecodeError> {
        let mut reader = self.reader.lock().await;
        decoder.decode(&mut *reader).await
    }

    /// Arms the rendezvous. Called by the decode loop before it hands a
    /// `StoreAnnounce` downstream.
    pub(crate) fn expect_stream(&self) {
        self.stream_pending.store(true, Ordering::SeqCst);
    }

    /// Resolves once [`signal_stream_done`](Self::signal_stream_done) was
    /// called for the armed stream, even if that happened first.
    pub async fn await_stream_done(&self) {
        self.stream_done.notified().await;
    }

    /// Releases the decode loop. A no-op unless a stream is pending, so a
    /// stray call can never skip the wait for a later announce.
    pub fn signal_stream_done(&self) {
        if self.stream_pending.swap(false, Ordering::SeqCst) {
            self.stream_done.notify_one();
        }
    }

    /// Resolves once the connection has been closed locally.
    pub async fn closed(&self) {
        let mut rx = self.closed.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }

    /// Idempotent.
    pub async fn close(&self) {
        if self.closed.send_replace(true) {
            return;
        }

        // A writer blocked on a slow remote keeps the lock; it will fail on its own.
        if let Ok(mut writer) = self.writer.try_lock() {
            let _ = writer.shutdown().await;
        }

        tracing::debug!("Closed connection to {}", self.identity);
    }
}

impl std::fmt::Debug for TcpPeer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpPeer")
            .field("identity", &self.identity)
            .field("outbound", &self.outbound)
            .field("closed", &self.is_closed())
            .finish()
    }
}
