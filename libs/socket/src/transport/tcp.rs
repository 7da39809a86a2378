use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use socket2::SockRef;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use crate::transport::{Connect, Endpoint, Transport};

impl Transport for TcpStream {
    type Read = OwnedReadHalf;
    type Write = OwnedWriteHalf;

    fn peer_endpoint(&self) -> Option<Endpoint> {
        self.peer_addr().ok().map(Endpoint::Inet)
    }

    fn local_endpoint(&self) -> Option<Endpoint> {
        self.local_addr().ok().map(Endpoint::Inet)
    }

    fn set_nodelay(&self, nodelay: bool) -> io::Result<()> {
        TcpStream::set_nodelay(self, nodelay)
    }

    fn set_keepalive(&self, keepalive: bool) -> io::Result<()> {
        SockRef::from(self).set_keepalive(keepalive)
    }

    fn into_split(self) -> (Self::Read, Self::Write) {
        TcpStream::into_split(self)
    }
}

/// Opens a TCP connection, optionally bounded by a timeout
#[derive(Debug, Clone)]
pub struct TcpConnector {
    address: SocketAddr,
    connect_timeout: Option<Duration>,
}

impl TcpConnector {
    pub fn new(address: SocketAddr) -> Self {
        Self {
            address,
            connect_timeout: None,
        }
    }

    /// Set the connection timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }
}

#[async_trait::async_trait]
impl Connect for TcpConnector {
    type Transport = TcpStream;

    async fn connect(self) -> io::Result<TcpStream> {
        let connect_op = TcpStream::connect(self.address);

        match self.connect_timeout {
            Some(timeout) => tokio::time::timeout(timeout, connect_op)
                .await
                .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "Connect timeout exceeded"))?,
            None => connect_op.await,
        }
    }
}
