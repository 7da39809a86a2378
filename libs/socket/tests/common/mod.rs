#![allow(dead_code)]

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use constellation_socket::{
    codec::BincodeCodec, testing::MemoryTransport, Endpoint, Packet, ProcessHold, Socket,
    SocketBuilder, Transport,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, ReadBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Frame {
    Noop,
    Echo(String),
    JobCreated { handle: String },
    Blob(Vec<u8>),
}

impl Packet for Frame {
    type Kind = &'static str;

    fn kind(&self) -> &'static str {
        match self {
            Frame::Noop => "noop",
            Frame::Echo(_) => "echo",
            Frame::JobCreated { .. } => "job_created",
            Frame::Blob(_) => "blob",
        }
    }
}

pub type Codec = BincodeCodec<Frame>;

/// Builder over an in-memory transport, with a hold private to the test
pub fn builder(transport: MemoryTransport) -> SocketBuilder<Codec, Codec> {
    Socket::builder(Codec::new())
        .transport(transport)
        .hold(ProcessHold::new())
}

/// Socket over one end of a memory pair; the other end is returned as the peer
pub fn connected() -> (Socket<Frame>, MemoryTransport) {
    let (local, peer) = MemoryTransport::pair();
    let socket = builder(local).build().unwrap();
    (socket, peer)
}

/// Read one length-prefixed frame written by a socket
pub async fn read_frame(peer: &mut MemoryTransport) -> Frame {
    let mut prefix = [0u8; 4];
    peer.read_exact(&mut prefix).await.unwrap();
    let mut body = vec![0u8; u32::from_be_bytes(prefix) as usize];
    peer.read_exact(&mut body).await.unwrap();
    bincode::deserialize(&body).unwrap()
}

/// Shared, ordered record of what handlers saw
#[derive(Clone, Default)]
pub struct Log {
    entries: Arc<Mutex<Vec<String>>>,
}

impl Log {
    pub fn push(&self, entry: impl Into<String>) {
        self.entries.lock().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

/// Wait up to a second for `condition` to hold
pub async fn eventually(condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Console output captured for assertions
#[derive(Clone, Default)]
pub struct Captured {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl Captured {
    pub fn lines(&self) -> Vec<String> {
        String::from_utf8_lossy(&self.bytes.lock())
            .lines()
            .map(str::to_string)
            .collect()
    }
}

impl io::Write for Captured {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.bytes.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Transport whose halves fail on first use when asked to
///
/// A healthy read half never yields; a healthy write half discards bytes.
#[derive(Default)]
pub struct FaultyTransport {
    pub fail_reads: bool,
    pub fail_writes: bool,
}

pub struct FaultyRead {
    fail: bool,
}

pub struct FaultyWrite {
    fail: bool,
}

impl Transport for FaultyTransport {
    type Read = FaultyRead;
    type Write = FaultyWrite;

    fn peer_endpoint(&self) -> Option<Endpoint> {
        None
    }

    fn local_endpoint(&self) -> Option<Endpoint> {
        None
    }

    fn into_split(self) -> (FaultyRead, FaultyWrite) {
        (
            FaultyRead {
                fail: self.fail_reads,
            },
            FaultyWrite {
                fail: self.fail_writes,
            },
        )
    }
}

impl AsyncRead for FaultyRead {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if self.fail {
            Poll::Ready(Err(io::Error::from(io::ErrorKind::ConnectionReset)))
        } else {
            Poll::Pending
        }
    }
}

impl AsyncWrite for FaultyWrite {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if self.fail {
            Poll::Ready(Err(io::Error::from(io::ErrorKind::BrokenPipe)))
        } else {
            Poll::Ready(Ok(buf.len()))
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}
