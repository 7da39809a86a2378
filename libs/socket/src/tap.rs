//! Pass-through adapters that observe traffic without altering it.
//!
//! A [`Tap`] wraps a byte source/sink ([`AsyncRead`]/[`AsyncWrite`]) or an
//! item source/sink ([`Stream`]/[`Sink`]) and hands every chunk or item to an
//! observer before forwarding it unchanged. The trait a tap is used through
//! decides what it observes: byte taps see `&[u8]` chunks exactly as they were
//! read or written, item taps see `&Item`.
//!
//! ```
//! use futures::StreamExt;
//! use constellation_socket::tap::Tap;
//!
//! # async fn example() {
//! let mut seen = Vec::new();
//! let items: Vec<u32> = Tap::new(futures::stream::iter([1, 2, 3]), |n: &u32| seen.push(*n))
//!     .collect()
//!     .await;
//! assert_eq!(items, [1, 2, 3]);
//! # }
//! ```

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::{Sink, Stream};
use pin_project_lite::pin_project;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

pin_project! {
    /// Observes everything flowing through `inner`
    #[derive(Debug)]
    pub struct Tap<S, F> {
        #[pin]
        inner: S,
        observer: F,
    }
}

impl<S, F> Tap<S, F> {
    pub fn new(inner: S, observer: F) -> Self {
        Self { inner, observer }
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

/// A tap that has not been attached to a stream yet
#[derive(Debug, Clone)]
pub struct TapStage<F> {
    observer: F,
}

impl<F> TapStage<F> {
    /// Insert the stage in front of `inner`
    pub fn attach<S>(self, inner: S) -> Tap<S, F> {
        Tap::new(inner, self.observer)
    }
}

/// Create a standalone tap stage to be attached later
pub fn tap<F>(observer: F) -> TapStage<F> {
    TapStage { observer }
}

impl<R, F> AsyncRead for Tap<R, F>
where
    R: AsyncRead,
    F: FnMut(&[u8]),
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.project();
        let start = buf.filled().len();

        let poll = this.inner.poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = &poll {
            let chunk = &buf.filled()[start..];
            // zero bytes is end of stream, not a chunk
            if !chunk.is_empty() {
                (this.observer)(chunk);
            }
        }
        poll
    }
}

impl<W, F> AsyncWrite for Tap<W, F>
where
    W: AsyncWrite,
    F: FnMut(&[u8]),
{
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.project();

        let poll = this.inner.poll_write(cx, buf);
        if let Poll::Ready(Ok(written)) = &poll {
            if *written > 0 {
                (this.observer)(&buf[..*written]);
            }
        }
        poll
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().inner.poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().inner.poll_shutdown(cx)
    }
}

impl<S, F> Stream for Tap<S, F>
where
    S: Stream,
    F: FnMut(&S::Item),
{
    type Item = S::Item;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();

        let poll = this.inner.poll_next(cx);
        if let Poll::Ready(Some(item)) = &poll {
            (this.observer)(item);
        }
        poll
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<Si, F, Item> Sink<Item> for Tap<Si, F>
where
    Si: Sink<Item>,
    F: FnMut(&Item),
{
    type Error = Si::Error;

    fn poll_ready(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.project().inner.poll_ready(cx)
    }

    fn start_send(self: Pin<&mut Self>, item: Item) -> Result<(), Self::Error> {
        let this = self.project();
        (this.observer)(&item);
        this.inner.start_send(item)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.project().inner.poll_flush(cx)
    }

    fn poll_close(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.project().inner.poll_close(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{SinkExt, StreamExt};
    use std::io::Cursor;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn read_tap_sees_every_chunk_in_order() {
        let mut chunks = Vec::new();
        let mut out = Vec::new();

        let mut reader = Tap::new(Cursor::new(b"hello world".to_vec()), |chunk: &[u8]| {
            chunks.push(chunk.to_vec())
        });
        reader.read_to_end(&mut out).await.unwrap();
        drop(reader);

        assert_eq!(out, b"hello world");
        assert_eq!(chunks.concat(), b"hello world");
        assert!(chunks.iter().all(|c| !c.is_empty()));
    }

    #[tokio::test]
    async fn write_tap_sees_written_bytes() {
        let mut seen = Vec::new();

        let mut writer = Tap::new(Vec::new(), |chunk: &[u8]| seen.extend_from_slice(chunk));
        writer.write_all(b"abc").await.unwrap();
        writer.write_all(b"def").await.unwrap();
        writer.flush().await.unwrap();
        let written = writer.into_inner();

        assert_eq!(written, b"abcdef");
        assert_eq!(seen, b"abcdef");
    }

    #[tokio::test]
    async fn stream_tap_forwards_items_unchanged() {
        let mut seen = Vec::new();

        let items: Vec<&str> = Tap::new(futures::stream::iter(["a", "b", "c"]), |item: &&str| {
            seen.push(item.to_string())
        })
        .collect()
        .await;

        assert_eq!(items, ["a", "b", "c"]);
        assert_eq!(seen, ["a", "b", "c"]);
    }

    #[tokio::test]
    async fn standalone_stage_observes_sink_items_before_delivery() {
        let (tx, mut rx) = futures::channel::mpsc::unbounded::<u32>();
        let mut seen = Vec::new();

        let mut sink = tap(|n: &u32| seen.push(*n)).attach(tx);
        sink.send(1).await.unwrap();
        sink.send(2).await.unwrap();
        sink.close().await.unwrap();
        drop(sink);

        assert_eq!(seen, [1, 2]);
        assert_eq!(rx.next().await, Some(1));
        assert_eq!(rx.next().await, Some(2));
        assert_eq!(rx.next().await, None);
    }
}
