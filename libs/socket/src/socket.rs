use std::fmt;
use std::io::{self, Write as _};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::{Decoder, Encoder};
use tokio_util::sync::CancellationToken;

use crate::codec::Packet;
use crate::dispatch::{Dispatcher, Events};
use crate::error::{Cause, Error, Result};
use crate::hold::ProcessHold;
use crate::options::{Encoding, SocketOptions};
use crate::pipeline::{self, EndOfInput, Inbound, Outbound, Traffic, TrafficObserver};
use crate::transport::{Connect, Endpoint, TcpConnector, Transport, UnixConnector, Wire};

static NEXT_SEQUENCE: AtomicU64 = AtomicU64::new(1);

fn next_sequence() -> u64 {
    NEXT_SEQUENCE.fetch_add(1, Ordering::Relaxed)
}

fn identity_for(sequence: u64, endpoint: Option<&Endpoint>) -> String {
    match endpoint {
        Some(endpoint) => format!("{sequence}={endpoint}"),
        None => format!("{sequence}=unknown"),
    }
}

/// Lifecycle of a socket; `Disconnected` and `Destroyed` are terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
    Destroyed,
}

impl ConnectionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ConnectionState::Disconnected | ConnectionState::Destroyed
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Close {
    Graceful,
    Forced,
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    Read,
    Write,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Read => f.write_str("READ"),
            Direction::Write => f.write_str("WRITE"),
        }
    }
}

/// Protocol endpoint wrapping one transport connection
///
/// Decoded packets are routed to the handlers registered for their kind with
/// [`on_packet`](Socket::on_packet); packets nobody handles are reported via
/// [`on_unknown_packet`](Socket::on_unknown_packet). Handles are cheap to clone
/// and all refer to the same connection.
///
/// Handlers registered in the setup closure of [`SocketBuilder::build_with`]
/// are in place before the socket starts reading, so they see every packet.
/// Handlers added later only see what is decoded after they were added.
pub struct Socket<P: Packet> {
    inner: Arc<Inner<P>>,
}

impl<P: Packet> Clone for Socket<P> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<P: Packet> fmt::Debug for Socket<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Socket")
            .field("identity", &self.identity())
            .field("state", &self.state())
            .field("ref_count", &self.ref_count())
            .finish()
    }
}

struct Inner<P: Packet> {
    sequence: u64,
    identity: RwLock<String>,
    options: SocketOptions,
    hold: ProcessHold,
    state: Mutex<State<P>>,
    routes: Dispatcher<P>,
    events: Events<P>,
    console: Console,
}

/// Where traffic dumps and unknown-packet lines go when nobody listens
struct Console {
    out: Mutex<Box<dyn io::Write + Send>>,
}

impl Console {
    fn new(out: Box<dyn io::Write + Send>) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    fn line(&self, line: fmt::Arguments<'_>) {
        let mut out = self.out.lock();
        // operator output only, a failed write is not worth an error event
        let _ = writeln!(out, "{line}").and_then(|()| out.flush());
    }
}

struct State<P> {
    phase: ConnectionState,
    ref_count: usize,
    held: bool,
    outbound: Option<mpsc::UnboundedSender<P>>,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

/// Codec halves and queued packets waiting for the transport
struct Seed<D, E, P> {
    decoder: D,
    encoder: E,
    queue: mpsc::UnboundedReceiver<P>,
}

impl<P: Packet> Socket<P> {
    /// Start building a socket around a codec implementing both directions
    pub fn builder<C>(codec: C) -> SocketBuilder<C, C>
    where
        C: Decoder<Item = P> + Encoder<P> + Clone,
    {
        SocketBuilder::new(codec.clone(), codec)
    }

    /// Stable label used in diagnostics, e.g. `3=10.0.0.5:4730`
    pub fn identity(&self) -> String {
        self.inner.identity()
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state.lock().phase
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn ref_count(&self) -> usize {
        self.inner.state.lock().ref_count
    }

    pub fn options(&self) -> &SocketOptions {
        &self.inner.options
    }

    pub fn default_encoding(&self) -> Encoding {
        self.inner.options.default_encoding
    }

    /// Queue a packet for encoding and writing
    ///
    /// Packets are written in the order they are sent. Encoding and transport
    /// failures are reported to the error handlers, not returned here.
    ///
    /// Returns [`Error::ConnectionClosed`] once the socket is closed. It also
    /// does so after a write failure stopped the writer, even though the
    /// socket stays [`Connected`](ConnectionState::Connected) until it is
    /// disconnected.
    pub fn send(&self, packet: P) -> Result<()> {
        let state = self.inner.state.lock();
        let outbound = state.outbound.as_ref().ok_or(Error::ConnectionClosed)?;
        outbound.send(packet).map_err(|_| Error::ConnectionClosed)
    }

    /// Flush queued packets, half-close the transport and stop reading
    ///
    /// Calling this on a closed socket does nothing.
    pub fn disconnect(&self) {
        self.inner.close(Close::Graceful);
    }

    /// Drop the transport immediately, discarding unsent packets
    pub fn destroy(&self) {
        self.inner.close(Close::Forced);
    }

    /// Take a reference; the first one keeps the host process alive
    pub fn retain(&self) -> Result<()> {
        let mut state = self.inner.state.lock();
        if state.phase.is_terminal() {
            return Err(Error::ConnectionClosed);
        }

        state.ref_count += 1;
        if state.ref_count == 1 && !state.held {
            state.held = true;
            self.inner.hold.acquire();
        }
        Ok(())
    }

    /// Drop a reference; the last one lets the host process exit
    pub fn release(&self) -> Result<()> {
        let mut state = self.inner.state.lock();
        if state.phase.is_terminal() {
            return Err(Error::ConnectionClosed);
        }
        if state.ref_count == 0 {
            tracing::warn!(identity = %self.identity(), "release without matching retain");
            return Err(Error::RefUnderflow);
        }

        state.ref_count -= 1;
        if state.ref_count == 0 && state.held {
            state.held = false;
            self.inner.hold.release();
        }
        Ok(())
    }

    /// Report an error to the error handlers; the connection is left as is
    pub fn emit_error(&self, error: Error) {
        self.inner.emit_error(error);
    }

    /// Report inbound traffic, printing it to stderr when nobody listens
    pub fn emit_read(&self, traffic: Traffic<'_, P>) {
        self.inner.emit_traffic(Direction::Read, traffic);
    }

    /// Report outbound traffic, printing it to stderr when nobody listens
    pub fn emit_write(&self, traffic: Traffic<'_, P>) {
        self.inner.emit_traffic(Direction::Write, traffic);
    }

    /// Handle every decoded packet of the given kind
    pub fn on_packet<F>(&self, kind: P::Kind, handler: F)
    where
        F: Fn(&P) + Send + Sync + 'static,
    {
        self.inner.routes.register(kind, Arc::new(handler));
    }

    /// Called with packets whose kind has no handler
    pub fn on_unknown_packet<F>(&self, handler: F)
    where
        F: Fn(P::Kind, &P) + Send + Sync + 'static,
    {
        self.inner.events.unknown_packet.add(Arc::new(handler));
    }

    /// Called once a pending connection is established
    pub fn on_connect<F>(&self, handler: F)
    where
        F: Fn(&Socket<P>) + Send + Sync + 'static,
    {
        self.inner.events.connect.add(Arc::new(handler));
    }

    /// Called once when the socket becomes disconnected or destroyed
    pub fn on_disconnect<F>(&self, handler: F)
    where
        F: Fn(&Socket<P>) + Send + Sync + 'static,
    {
        self.inner.events.disconnect.add(Arc::new(handler));
    }

    pub fn on_error<F>(&self, handler: F)
    where
        F: Fn(&Error) + Send + Sync + 'static,
    {
        self.inner.events.error.add(Arc::new(handler));
    }

    /// Receives traffic dumps for the read direction
    pub fn on_read<F>(&self, handler: F)
    where
        F: for<'a> Fn(Traffic<'a, P>) + Send + Sync + 'static,
    {
        self.inner.events.read.add(Arc::new(handler));
    }

    /// Receives traffic dumps for the write direction
    pub fn on_write<F>(&self, handler: F)
    where
        F: for<'a> Fn(Traffic<'a, P>) + Send + Sync + 'static,
    {
        self.inner.events.write.add(Arc::new(handler));
    }
}

impl<P: Packet> Inner<P> {
    fn identity(&self) -> String {
        self.identity.read().clone()
    }

    fn handle(self: &Arc<Self>) -> Socket<P> {
        Socket {
            inner: self.clone(),
        }
    }

    fn emit_error(&self, error: Error) {
        let handlers = self.events.error.snapshot();
        if handlers.is_empty() {
            tracing::warn!(identity = %self.identity(), %error, "unhandled socket error");
            return;
        }

        tracing::debug!(identity = %self.identity(), %error, "socket error");
        for handler in handlers {
            handler(&error);
        }
    }

    fn emit_traffic(&self, direction: Direction, traffic: Traffic<'_, P>) {
        let listeners = match direction {
            Direction::Read => &self.events.read,
            Direction::Write => &self.events.write,
        };

        let handlers = listeners.snapshot();
        if handlers.is_empty() {
            self.console
                .line(format_args!("{} {} {}", self.identity(), direction, traffic));
            return;
        }
        for handler in handlers {
            handler(traffic);
        }
    }

    fn dispatch(&self, packet: P) {
        let kind = packet.kind();
        tracing::trace!(identity = %self.identity(), %kind, "packet");

        if self.routes.dispatch(&packet) {
            return;
        }

        if self.options.debug {
            self.console.line(format_args!(
                "{} Unknown packet {} = {:?}",
                self.identity(),
                kind,
                packet
            ));
        }
        for handler in self.events.unknown_packet.snapshot() {
            handler(kind, &packet);
        }
    }

    /// Build the pipeline over an attached transport and spawn its tasks
    fn start<D, E>(self: &Arc<Self>, wire: Wire, seed: Seed<D, E, P>)
    where
        D: Decoder<Item = P> + Send + 'static,
        D::Error: Into<Cause>,
        E: Encoder<P> + Send + 'static,
        E::Error: Into<Cause>,
    {
        let observer: Arc<dyn TrafficObserver<P>> = self.clone();
        let pipeline = pipeline::compose(
            wire.read,
            wire.write,
            seed.decoder,
            seed.encoder,
            self.options.taps(),
            observer,
        );

        let shutdown = self.state.lock().shutdown.clone();
        let reader = tokio::spawn(read_loop(
            self.clone(),
            pipeline.inbound,
            pipeline.end_of_input,
            shutdown,
        ));
        let writer = tokio::spawn(write_loop(self.clone(), pipeline.outbound, seed.queue));

        let mut state = self.state.lock();
        if state.phase == ConnectionState::Destroyed {
            reader.abort();
            writer.abort();
        } else {
            // after a graceful close both tasks wind down on their own
            state.tasks.extend([reader, writer]);
        }
    }

    /// A pending connection resolved
    fn connected<D, E>(self: &Arc<Self>, wire: Wire, seed: Seed<D, E, P>)
    where
        D: Decoder<Item = P> + Send + 'static,
        D::Error: Into<Cause>,
        E: Encoder<P> + Send + 'static,
        E::Error: Into<Cause>,
    {
        {
            let mut state = self.state.lock();
            if state.phase != ConnectionState::Connecting {
                return;
            }
            state.phase = ConnectionState::Connected;
        }

        // this side dialed, so it is known by its local address
        *self.identity.write() = identity_for(self.sequence, wire.local.as_ref());
        tracing::debug!(identity = %self.identity(), "connected");

        self.start(wire, seed);

        let socket = self.handle();
        for handler in self.events.connect.snapshot() {
            handler(&socket);
        }
    }

    fn close(self: &Arc<Self>, mode: Close) {
        let (outbound, tasks) = {
            let mut state = self.state.lock();
            if state.phase.is_terminal() {
                return;
            }

            state.phase = match mode {
                Close::Graceful => ConnectionState::Disconnected,
                Close::Forced => ConnectionState::Destroyed,
            };
            state.ref_count = 0;
            if state.held {
                state.held = false;
                self.hold.release();
            }
            state.shutdown.cancel();
            (state.outbound.take(), std::mem::take(&mut state.tasks))
        };

        if mode == Close::Forced {
            for task in &tasks {
                task.abort();
            }
        }
        // the writer drains what is queued, then shuts the write half down
        drop(outbound);
        drop(tasks);

        tracing::debug!(identity = %self.identity(), ?mode, "disconnected");
        let socket = self.handle();
        for handler in self.events.disconnect.snapshot() {
            handler(&socket);
        }
    }
}

impl<P: Packet> TrafficObserver<P> for Inner<P> {
    fn read(&self, traffic: Traffic<'_, P>) {
        self.emit_traffic(Direction::Read, traffic);
    }

    fn write(&self, traffic: Traffic<'_, P>) {
        self.emit_traffic(Direction::Write, traffic);
    }
}

async fn read_loop<P: Packet>(
    inner: Arc<Inner<P>>,
    mut inbound: Inbound<P>,
    end_of_input: EndOfInput,
    shutdown: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            biased;
            _ = shutdown.cancelled() => return,
            next = inbound.next() => next,
        };

        match next {
            Some(Ok(packet)) => inner.dispatch(packet),
            Some(Err(error)) => inner.emit_error(error),
            None => break,
        }
    }

    if end_of_input.reached() {
        tracing::debug!(identity = %inner.identity(), "peer closed the connection");
        inner.close(Close::Graceful);
    } else {
        tracing::debug!(identity = %inner.identity(), "stopped reading after an error");
    }
}

async fn write_loop<P: Packet>(
    inner: Arc<Inner<P>>,
    mut outbound: Outbound<P>,
    mut queue: mpsc::UnboundedReceiver<P>,
) {
    while let Some(packet) = queue.recv().await {
        match outbound.send(packet).await {
            Ok(()) => {}
            Err(error @ Error::Encode(_)) => inner.emit_error(error),
            Err(error) => {
                inner.emit_error(error);
                return;
            }
        }
    }

    if let Err(error) = outbound.close().await {
        tracing::debug!(identity = %inner.identity(), %error, "closing write half failed");
    }
}

enum Source {
    Established(io::Result<Wire>),
    Connecting(BoxFuture<'static, io::Result<Wire>>),
}

/// Builder for configuring a socket
pub struct SocketBuilder<D, E> {
    decoder: D,
    encoder: E,
    source: Option<Source>,
    options: SocketOptions,
    hold: Option<ProcessHold>,
    console: Option<Box<dyn io::Write + Send>>,
}

impl<D, E> SocketBuilder<D, E> {
    pub fn new(decoder: D, encoder: E) -> Self {
        Self {
            decoder,
            encoder,
            source: None,
            options: SocketOptions::default(),
            hold: None,
            console: None,
        }
    }

    /// Wrap an already established transport
    pub fn transport(mut self, transport: impl Transport) -> Self {
        self.source = Some(Source::Established(Wire::attach(transport)));
        self
    }

    /// Wrap a connection that is still being established
    pub fn connector(mut self, connector: impl Connect) -> Self {
        let connecting = async move {
            let transport = connector.connect().await?;
            Wire::attach(transport)
        };
        self.source = Some(Source::Connecting(Box::pin(connecting)));
        self
    }

    /// Connect over TCP
    pub fn tcp(self, address: SocketAddr) -> Self {
        self.connector(TcpConnector::new(address))
    }

    /// Connect over a Unix socket
    pub fn unix(self, path: impl AsRef<Path>) -> Self {
        self.connector(UnixConnector::new(path))
    }

    pub fn options(mut self, options: SocketOptions) -> Self {
        self.options = options;
        self
    }

    /// Print unknown packets to stderr
    pub fn debug(mut self, debug: bool) -> Self {
        self.options.debug = debug;
        self
    }

    pub fn dump_raw_traffic(mut self, dump: bool) -> Self {
        self.options.dump_raw_traffic = dump;
        self
    }

    pub fn dump_decoded_traffic(mut self, dump: bool) -> Self {
        self.options.dump_decoded_traffic = dump;
        self
    }

    pub fn default_encoding(mut self, encoding: Encoding) -> Self {
        self.options.default_encoding = encoding;
        self
    }

    /// Use `hold` instead of the process-wide hold
    pub fn hold(mut self, hold: ProcessHold) -> Self {
        self.hold = Some(hold);
        self
    }

    /// Write traffic dumps and unknown-packet lines to `out` instead of stderr
    pub fn console(mut self, out: impl io::Write + Send + 'static) -> Self {
        self.console = Some(Box::new(out));
        self
    }
}

impl<D, E> SocketBuilder<D, E>
where
    D: Decoder + Send + 'static,
    D::Item: Packet,
    D::Error: Into<Cause>,
    E: Encoder<D::Item> + Send + 'static,
    E::Error: Into<Cause>,
{
    /// Create the socket and start its pipeline
    ///
    /// Same as [`build_with`](Self::build_with) without a setup step. Packets
    /// decoded before handlers are added fall through to whatever is
    /// registered at that moment, so prefer `build_with` when inbound traffic
    /// may already be waiting.
    pub fn build(self) -> Result<Socket<D::Item>> {
        self.build_with(|_| {})
    }

    /// Create the socket, run `setup` on it, then start its pipeline
    ///
    /// No task runs before `setup` returns, so handlers registered there
    /// observe the first packet and the connect notification. Must be called
    /// from within a tokio runtime.
    pub fn build_with<F>(self, setup: F) -> Result<Socket<D::Item>>
    where
        F: FnOnce(&Socket<D::Item>),
    {
        let source = self
            .source
            .ok_or_else(|| Error::config("a transport or connector is required"))?;

        let sequence = next_sequence();
        let (outbound, queue) = mpsc::unbounded_channel();
        let seed = Seed {
            decoder: self.decoder,
            encoder: self.encoder,
            queue,
        };

        let (phase, identity, wire, connecting) = match source {
            Source::Established(wire) => {
                let wire = wire?;
                let identity = identity_for(sequence, wire.peer.as_ref());
                (ConnectionState::Connected, identity, Some(wire), None)
            }
            Source::Connecting(connecting) => {
                let identity = format!("{sequence}=...connecting...");
                (ConnectionState::Connecting, identity, None, Some(connecting))
            }
        };

        let inner = Arc::new(Inner {
            sequence,
            identity: RwLock::new(identity),
            options: self.options,
            hold: self.hold.unwrap_or_else(ProcessHold::global),
            state: Mutex::new(State {
                phase,
                ref_count: 0,
                held: false,
                outbound: Some(outbound),
                shutdown: CancellationToken::new(),
                tasks: Vec::new(),
            }),
            routes: Dispatcher::default(),
            events: Events::default(),
            console: Console::new(self.console.unwrap_or_else(|| Box::new(io::stderr()))),
        });

        let socket = inner.handle();
        setup(&socket);

        if let Some(wire) = wire {
            tracing::debug!(identity = %inner.identity(), "wrapped established connection");
            inner.start(wire, seed);
        } else if let Some(connecting) = connecting {
            tracing::debug!(identity = %inner.identity(), "connecting");
            let shutdown = inner.state.lock().shutdown.clone();
            let task = tokio::spawn(connect(inner.clone(), connecting, seed, shutdown));
            inner.state.lock().tasks.push(task);
        }

        Ok(socket)
    }
}

async fn connect<D, E, P>(
    inner: Arc<Inner<P>>,
    connecting: BoxFuture<'static, io::Result<Wire>>,
    seed: Seed<D, E, P>,
    shutdown: CancellationToken,
) where
    P: Packet,
    D: Decoder<Item = P> + Send + 'static,
    D::Error: Into<Cause>,
    E: Encoder<P> + Send + 'static,
    E::Error: Into<Cause>,
{
    let result = tokio::select! {
        biased;
        _ = shutdown.cancelled() => return,
        result = connecting => result,
    };

    match result {
        Ok(wire) => inner.connected(wire, seed),
        Err(error) => {
            tracing::warn!(identity = %inner.identity(), %error, "connect failed");
            inner.emit_error(error.into());
            inner.close(Close::Graceful);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_uses_endpoint_when_known() {
        let endpoint = Endpoint::Inet("10.0.0.5:4730".parse().unwrap());
        assert_eq!(identity_for(7, Some(&endpoint)), "7=10.0.0.5:4730");

        let v6 = Endpoint::Inet("[fe80::1]:4730".parse().unwrap());
        assert_eq!(identity_for(8, Some(&v6)), "8=[fe80::1]:4730");

        assert_eq!(identity_for(9, None), "9=unknown");
    }

    #[test]
    fn sequence_numbers_increase() {
        let first = next_sequence();
        let second = next_sequence();
        assert!(second > first);
    }

    #[test]
    fn terminal_states() {
        assert!(!ConnectionState::Connecting.is_terminal());
        assert!(!ConnectionState::Connected.is_terminal());
        assert!(ConnectionState::Disconnected.is_terminal());
        assert!(ConnectionState::Destroyed.is_terminal());
    }
}
