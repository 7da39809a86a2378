//! Decode/encode pipeline around a split transport.
//!
//! ```text
//! inbound:  read half -> [raw tap] -> decoder -> [decoded tap] -> packets
//! outbound: packets -> [decoded tap] -> encoder -> [raw tap] -> write half
//! ```
//!
//! Raw taps sit next to the wire and decoded taps next to the application, so
//! with both enabled every chunk is reported as raw bytes before the packets
//! decoded from it, and every packet before the bytes encoded from it.

use std::fmt;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::BytesMut;
use futures::{Sink, Stream};
use pin_project_lite::pin_project;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio_util::codec::{Decoder, Encoder, FramedRead, FramedWrite};

use crate::codec::Packet;
use crate::error::{Cause, Error, ErrorKind, Result};
use crate::tap::Tap;
use crate::transport::{BoxedRead, BoxedWrite};

/// Which observation points are enabled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Taps {
    pub raw: bool,
    pub decoded: bool,
}

/// One observed item, in either representation
#[derive(Debug)]
pub enum Traffic<'a, P> {
    Raw(&'a [u8]),
    Packet(&'a P),
}

impl<P> Clone for Traffic<'_, P> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<P> Copy for Traffic<'_, P> {}

impl<'a, P> Traffic<'a, P> {
    pub fn as_raw(&self) -> Option<&'a [u8]> {
        match *self {
            Traffic::Raw(bytes) => Some(bytes),
            Traffic::Packet(_) => None,
        }
    }

    pub fn as_packet(&self) -> Option<&'a P> {
        match *self {
            Traffic::Raw(_) => None,
            Traffic::Packet(packet) => Some(packet),
        }
    }
}

impl<P: fmt::Debug> fmt::Display for Traffic<'_, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Traffic::Raw(bytes) => {
                write!(f, "<{} bytes", bytes.len())?;
                for byte in bytes.iter() {
                    write!(f, " {byte:02x}")?;
                }
                f.write_str(">")
            }
            Traffic::Packet(packet) => write!(f, "{packet:?}"),
        }
    }
}

/// Receives the observations made by the taps
pub trait TrafficObserver<P>: Send + Sync {
    fn read(&self, traffic: Traffic<'_, P>);
    fn write(&self, traffic: Traffic<'_, P>);
}

pub type Inbound<P> = Pin<Box<dyn Stream<Item = Result<P>> + Send>>;
pub type Outbound<P> = Pin<Box<dyn Sink<P, Error = Error> + Send>>;

/// Set once the read half reports end of input
#[derive(Debug, Clone, Default)]
pub struct EndOfInput {
    reached: Arc<AtomicBool>,
}

impl EndOfInput {
    pub fn reached(&self) -> bool {
        self.reached.load(Ordering::Acquire)
    }
}

/// The two ends of a composed pipeline
pub struct Pipeline<P> {
    /// Decoded packets, or the error that stopped decoding
    pub inbound: Inbound<P>,
    /// Accepts packets for encoding; closing it shuts down the write half
    pub outbound: Outbound<P>,
    /// Distinguishes a peer close from a decode failure once `inbound` ends
    pub end_of_input: EndOfInput,
}

/// Wire a read half and a write half through the codec and enabled taps
pub fn compose<R, W, D, E>(
    read: R,
    write: W,
    decoder: D,
    encoder: E,
    taps: Taps,
    observer: Arc<dyn TrafficObserver<D::Item>>,
) -> Pipeline<D::Item>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
    D: Decoder + Send + 'static,
    D::Item: Packet,
    D::Error: Into<Cause>,
    E: Encoder<D::Item> + Send + 'static,
    E::Error: Into<Cause>,
{
    let end_of_input = EndOfInput::default();
    let read = EndWatch {
        inner: read,
        end: end_of_input.clone(),
    };

    let read: BoxedRead = if taps.raw {
        let observer = observer.clone();
        Box::new(Tap::new(read, move |chunk: &[u8]| {
            observer.read(Traffic::Raw(chunk))
        }))
    } else {
        Box::new(read)
    };
    let frames = FramedRead::new(read, DecodeStage(decoder));
    let inbound: Inbound<D::Item> = if taps.decoded {
        let observer = observer.clone();
        Box::pin(Tap::new(frames, move |item: &Result<D::Item>| {
            if let Ok(packet) = item {
                observer.read(Traffic::Packet(packet))
            }
        }))
    } else {
        Box::pin(frames)
    };

    let write: BoxedWrite = if taps.raw {
        let observer = observer.clone();
        Box::new(Tap::new(write, move |chunk: &[u8]| {
            observer.write(Traffic::Raw(chunk))
        }))
    } else {
        Box::new(write)
    };
    let frames = FramedWrite::new(write, EncodeStage(encoder));
    let outbound: Outbound<D::Item> = if taps.decoded {
        Box::pin(Tap::new(frames, move |packet: &D::Item| {
            observer.write(Traffic::Packet(packet))
        }))
    } else {
        Box::pin(frames)
    };

    Pipeline {
        inbound,
        outbound,
        end_of_input,
    }
}

/// Tags decoder failures as decode errors and I/O failures as transport errors
struct DecodeStage<D>(D);

impl<D> Decoder for DecodeStage<D>
where
    D: Decoder,
    D::Error: Into<Cause>,
{
    type Item = D::Item;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<D::Item>> {
        self.0
            .decode(src)
            .map_err(|e| Error::wrap(ErrorKind::Decode, e))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<D::Item>> {
        self.0
            .decode_eof(src)
            .map_err(|e| Error::wrap(ErrorKind::Decode, e))
    }
}

/// Tags encoder failures as encode errors; a failed packet leaves no bytes behind
struct EncodeStage<E>(E);

impl<E, P> Encoder<P> for EncodeStage<E>
where
    E: Encoder<P>,
    E::Error: Into<Cause>,
{
    type Error = Error;

    fn encode(&mut self, packet: P, dst: &mut BytesMut) -> Result<()> {
        let mark = dst.len();
        match self.0.encode(packet, dst) {
            Ok(()) => Ok(()),
            Err(e) => {
                dst.truncate(mark);
                Err(Error::wrap(ErrorKind::Encode, e))
            }
        }
    }
}

pin_project! {
    struct EndWatch<R> {
        #[pin]
        inner: R,
        end: EndOfInput,
    }
}

impl<R: AsyncRead> AsyncRead for EndWatch<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.project();
        let start = buf.filled().len();
        let had_room = buf.remaining() > 0;

        let poll = this.inner.poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = &poll {
            if had_room && buf.filled().len() == start {
                this.end.reached.store(true, Ordering::Release);
            }
        }
        poll
    }
}
