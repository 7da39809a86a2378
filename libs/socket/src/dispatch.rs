//! Handler registries for socket events and per-kind packet routing.
//!
//! Handlers are cloned out of the registry before they run, so a handler may
//! register more handlers or call back into its socket.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::codec::Packet;
use crate::error::Error;
use crate::pipeline::Traffic;
use crate::socket::Socket;

pub(crate) type PacketHandler<P> = Arc<dyn Fn(&P) + Send + Sync>;

/// Ordered list of handlers for one event
pub(crate) struct Listeners<F: ?Sized> {
    handlers: Mutex<Vec<Arc<F>>>,
}

impl<F: ?Sized> Listeners<F> {
    pub fn add(&self, handler: Arc<F>) {
        self.handlers.lock().push(handler);
    }

    pub fn snapshot(&self) -> Vec<Arc<F>> {
        self.handlers.lock().clone()
    }
}

impl<F: ?Sized> Default for Listeners<F> {
    fn default() -> Self {
        Self {
            handlers: Mutex::new(Vec::new()),
        }
    }
}

/// Routes packets to the handlers registered for their kind
pub(crate) struct Dispatcher<P: Packet> {
    routes: Mutex<HashMap<P::Kind, Vec<PacketHandler<P>>>>,
}

impl<P: Packet> Dispatcher<P> {
    pub fn register(&self, kind: P::Kind, handler: PacketHandler<P>) {
        self.routes.lock().entry(kind).or_default().push(handler);
    }

    pub fn handlers(&self, kind: P::Kind) -> Vec<PacketHandler<P>> {
        self.routes.lock().get(&kind).cloned().unwrap_or_default()
    }

    /// Returns false when no handler is registered for the packet's kind
    pub fn dispatch(&self, packet: &P) -> bool {
        let handlers = self.handlers(packet.kind());
        for handler in &handlers {
            handler(packet);
        }
        !handlers.is_empty()
    }
}

impl<P: Packet> Default for Dispatcher<P> {
    fn default() -> Self {
        Self {
            routes: Mutex::new(HashMap::new()),
        }
    }
}

/// Every event a socket can emit
pub(crate) struct Events<P: Packet> {
    pub connect: Listeners<dyn Fn(&Socket<P>) + Send + Sync>,
    pub disconnect: Listeners<dyn Fn(&Socket<P>) + Send + Sync>,
    pub error: Listeners<dyn Fn(&Error) + Send + Sync>,
    pub unknown_packet: Listeners<dyn Fn(P::Kind, &P) + Send + Sync>,
    pub read: Listeners<dyn for<'a> Fn(Traffic<'a, P>) + Send + Sync>,
    pub write: Listeners<dyn for<'a> Fn(Traffic<'a, P>) + Send + Sync>,
}

impl<P: Packet> Default for Events<P> {
    fn default() -> Self {
        Self {
            connect: Listeners::default(),
            disconnect: Listeners::default(),
            error: Listeners::default(),
            unknown_packet: Listeners::default(),
            read: Listeners::default(),
            write: Listeners::default(),
        }
    }
}
