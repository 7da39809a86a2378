use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf, SocketAddr};
use tokio::net::UnixStream;

use crate::transport::{Connect, Endpoint, Transport};

fn endpoint(addr: io::Result<SocketAddr>) -> Option<Endpoint> {
    let addr = addr.ok()?;
    addr.as_pathname()
        .map(|path| Endpoint::Unix(path.to_path_buf()))
}

/// Unix domain sockets have no Nagle or keep-alive knobs; the defaults apply
impl Transport for UnixStream {
    type Read = OwnedReadHalf;
    type Write = OwnedWriteHalf;

    fn peer_endpoint(&self) -> Option<Endpoint> {
        endpoint(self.peer_addr())
    }

    fn local_endpoint(&self) -> Option<Endpoint> {
        endpoint(self.local_addr())
    }

    fn into_split(self) -> (Self::Read, Self::Write) {
        UnixStream::into_split(self)
    }
}

/// Opens a Unix socket connection, optionally bounded by a timeout
#[derive(Debug, Clone)]
pub struct UnixConnector {
    path: PathBuf,
    connect_timeout: Option<Duration>,
}

impl UnixConnector {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            connect_timeout: None,
        }
    }

    /// Set the connection timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait::async_trait]
impl Connect for UnixConnector {
    type Transport = UnixStream;

    async fn connect(self) -> io::Result<UnixStream> {
        let connect_op = UnixStream::connect(&self.path);

        match self.connect_timeout {
            Some(timeout) => tokio::time::timeout(timeout, connect_op)
                .await
                .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "Connect timeout exceeded"))?,
            None => connect_op.await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::UnixListener;

    #[tokio::test]
    async fn connector_reports_listener_path_as_peer() {
        let socket_path = "/tmp/constellation_socket_unix_endpoint.sock";
        let _ = std::fs::remove_file(socket_path);

        let listener = UnixListener::bind(socket_path).unwrap();
        let stream = UnixConnector::new(socket_path).connect().await.unwrap();

        assert_eq!(
            stream.peer_endpoint(),
            Some(Endpoint::Unix(PathBuf::from(socket_path)))
        );
        // client side of a unix connection is unnamed
        assert_eq!(stream.local_endpoint(), None);

        drop(listener);
        let _ = std::fs::remove_file(socket_path);
    }

    #[tokio::test]
    async fn missing_socket_fails_to_connect() {
        let result = UnixConnector::new("/tmp/constellation_socket_missing.sock")
            .connect()
            .await;
        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::NotFound);
    }
}
