//! In-memory transport for testing.

use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::io::{duplex, AsyncRead, AsyncWrite, DuplexStream, ReadBuf};
use tokio::sync::oneshot;

use crate::transport::{Connect, Endpoint, Transport};

/// An in-memory connection backed by two [`DuplexStream`]s
///
/// Bytes written on one transport of a pair are read from the other. The
/// endpoints a socket sees are whatever the test configures; by default
/// there are none.
///
/// # Example
///
/// ```
/// use constellation_socket::testing::MemoryTransport;
///
/// let (client, server) = MemoryTransport::pair();
/// let client = client.with_peer("10.0.0.5:4730".parse::<std::net::SocketAddr>().unwrap());
/// let probe = client.probe();
/// assert!(!probe.nodelay());
/// # drop(server);
/// ```
pub struct MemoryTransport {
    read: DuplexStream,
    write: DuplexStream,
    peer: Option<Endpoint>,
    local: Option<Endpoint>,
    probe: TransportProbe,
}

/// Records the tuning a socket applied to a [`MemoryTransport`]
#[derive(Debug, Clone, Default)]
pub struct TransportProbe {
    nodelay: Arc<AtomicBool>,
    keepalive: Arc<AtomicBool>,
}

impl TransportProbe {
    pub fn nodelay(&self) -> bool {
        self.nodelay.load(Ordering::SeqCst)
    }

    pub fn keepalive(&self) -> bool {
        self.keepalive.load(Ordering::SeqCst)
    }
}

impl MemoryTransport {
    /// Create a connected pair with 64KB of buffer in each direction
    pub fn pair() -> (Self, Self) {
        Self::pair_with_buffer_size(64 * 1024)
    }

    /// Create a connected pair with a custom buffer size
    pub fn pair_with_buffer_size(buffer_size: usize) -> (Self, Self) {
        let (a_to_b_write, a_to_b_read) = duplex(buffer_size);
        let (b_to_a_write, b_to_a_read) = duplex(buffer_size);

        (
            Self::from_halves(b_to_a_read, a_to_b_write),
            Self::from_halves(a_to_b_read, b_to_a_write),
        )
    }

    fn from_halves(read: DuplexStream, write: DuplexStream) -> Self {
        Self {
            read,
            write,
            peer: None,
            local: None,
            probe: TransportProbe::default(),
        }
    }

    pub fn with_peer(mut self, peer: impl Into<Endpoint>) -> Self {
        self.peer = Some(peer.into());
        self
    }

    pub fn with_local(mut self, local: impl Into<Endpoint>) -> Self {
        self.local = Some(local.into());
        self
    }

    pub fn probe(&self) -> TransportProbe {
        self.probe.clone()
    }
}

impl Transport for MemoryTransport {
    type Read = DuplexStream;
    type Write = DuplexStream;

    fn peer_endpoint(&self) -> Option<Endpoint> {
        self.peer.clone()
    }

    fn local_endpoint(&self) -> Option<Endpoint> {
        self.local.clone()
    }

    fn set_nodelay(&self, nodelay: bool) -> io::Result<()> {
        self.probe.nodelay.store(nodelay, Ordering::SeqCst);
        Ok(())
    }

    fn set_keepalive(&self, keepalive: bool) -> io::Result<()> {
        self.probe.keepalive.store(keepalive, Ordering::SeqCst);
        Ok(())
    }

    fn into_split(self) -> (DuplexStream, DuplexStream) {
        (self.read, self.write)
    }
}

// The far end of a pair is usually driven directly by the test.
impl AsyncRead for MemoryTransport {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.read).poll_read(cx, buf)
    }
}

impl AsyncWrite for MemoryTransport {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.write).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.write).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.write).poll_shutdown(cx)
    }
}

/// A connection attempt that completes when the test says so
pub struct MemoryConnector {
    outcome: oneshot::Receiver<io::Result<MemoryTransport>>,
}

/// Decides the outcome of a [`MemoryConnector`]
pub struct ConnectHandle {
    outcome: oneshot::Sender<io::Result<MemoryTransport>>,
}

impl MemoryConnector {
    pub fn pending() -> (Self, ConnectHandle) {
        let (tx, rx) = oneshot::channel();
        (Self { outcome: rx }, ConnectHandle { outcome: tx })
    }
}

impl ConnectHandle {
    /// Resolve the attempt with `transport`
    pub fn complete(self, transport: MemoryTransport) {
        let _ = self.outcome.send(Ok(transport));
    }

    /// Fail the attempt
    pub fn fail(self, error: io::Error) {
        let _ = self.outcome.send(Err(error));
    }
}

#[async_trait::async_trait]
impl Connect for MemoryConnector {
    type Transport = MemoryTransport;

    async fn connect(self) -> io::Result<MemoryTransport> {
        match self.outcome.await {
            Ok(outcome) => outcome,
            Err(_) => Err(io::Error::new(
                io::ErrorKind::ConnectionAborted,
                "connect handle dropped",
            )),
        }
    }
}
