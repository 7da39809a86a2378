use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;

use tokio::io::{AsyncRead, AsyncWrite};

pub mod tcp;
pub mod unix;

pub use self::tcp::TcpConnector;
pub use self::unix::UnixConnector;

/// Address of one end of a connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Inet(SocketAddr),
    Unix(PathBuf),
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // SocketAddr already brackets IPv6 hosts
            Endpoint::Inet(addr) => write!(f, "{addr}"),
            Endpoint::Unix(path) => write!(f, "{}", path.display()),
        }
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        Endpoint::Inet(addr)
    }
}

/// Bidirectional byte connection that a socket can own
///
/// Tuning and address lookups happen before the transport is split; after
/// `into_split` the halves are owned by the socket's pipeline.
pub trait Transport: Send + 'static {
    type Read: AsyncRead + Unpin + Send + 'static;
    type Write: AsyncWrite + Unpin + Send + 'static;

    /// Remote address, if the connection is established and has one
    fn peer_endpoint(&self) -> Option<Endpoint>;

    /// Local address, if the connection has one
    fn local_endpoint(&self) -> Option<Endpoint>;

    /// Disable write coalescing (Nagle's algorithm)
    fn set_nodelay(&self, nodelay: bool) -> io::Result<()> {
        let _ = nodelay;
        Ok(())
    }

    /// Enable keep-alive probing
    fn set_keepalive(&self, keepalive: bool) -> io::Result<()> {
        let _ = keepalive;
        Ok(())
    }

    /// Split into independently owned read and write halves
    fn into_split(self) -> (Self::Read, Self::Write);
}

/// Produces a transport asynchronously
#[async_trait::async_trait]
pub trait Connect: Send + 'static {
    type Transport: Transport;

    /// Establish the connection
    async fn connect(self) -> io::Result<Self::Transport>;
}

pub(crate) type BoxedRead = Box<dyn AsyncRead + Unpin + Send>;
pub(crate) type BoxedWrite = Box<dyn AsyncWrite + Unpin + Send>;

/// A tuned transport, split and type-erased for the pipeline
pub(crate) struct Wire {
    pub peer: Option<Endpoint>,
    pub local: Option<Endpoint>,
    pub read: BoxedRead,
    pub write: BoxedWrite,
}

impl Wire {
    pub fn attach<T: Transport>(transport: T) -> io::Result<Self> {
        transport.set_nodelay(true)?;
        transport.set_keepalive(true)?;

        let peer = transport.peer_endpoint();
        let local = transport.local_endpoint();
        let (read, write) = transport.into_split();

        Ok(Self {
            peer,
            local,
            read: Box::new(read),
            write: Box::new(write),
        })
    }
}
