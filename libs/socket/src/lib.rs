//! Constellation Socket - Packet-oriented protocol sockets
//!
//! Wraps a byte transport (TCP, Unix sockets, or anything implementing
//! [`Transport`]) in a decode/encode pipeline and routes decoded packets to
//! handlers by kind. Sockets track a connection lifecycle, surface transport
//! and codec failures as error events, can dump traffic for debugging, and
//! keep the host process alive while referenced.
//!
//! # Example
//!
//! ```no_run
//! use constellation_socket::{codec::BincodeCodec, Packet, ProcessHold, Socket};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Serialize, Deserialize)]
//! enum Frame {
//!     Noop,
//!     JobAssign { handle: String, payload: Vec<u8> },
//! }
//!
//! impl Packet for Frame {
//!     type Kind = &'static str;
//!
//!     fn kind(&self) -> &'static str {
//!         match self {
//!             Frame::Noop => "noop",
//!             Frame::JobAssign { .. } => "job_assign",
//!         }
//!     }
//! }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let socket = Socket::builder(BincodeCodec::<Frame>::new())
//!     .tcp("127.0.0.1:4730".parse()?)
//!     .build_with(|socket| {
//!         // registered before the socket starts reading
//!         socket.on_packet("job_assign", |frame| println!("got {frame:?}"));
//!         socket.on_error(|error| eprintln!("socket error: {error}"));
//!         socket.on_connect(|socket| {
//!             let _ = socket.send(Frame::Noop);
//!         });
//!     })?;
//!
//! // Keep running until the socket is released or disconnected
//! socket.retain()?;
//! ProcessHold::global().released().await;
//! # Ok(())
//! # }
//! ```

pub mod codec;
mod dispatch;
pub mod error;
pub mod hold;
pub mod options;
pub mod pipeline;
pub mod socket;
pub mod tap;
pub mod testing;
pub mod transport;

// Re-exports for convenience
pub use codec::Packet;
pub use error::{Error, ErrorKind, Result};
pub use hold::ProcessHold;
pub use options::{Encoding, SocketOptions};
pub use pipeline::{Taps, Traffic};
pub use socket::{ConnectionState, Socket, SocketBuilder};
pub use transport::{Connect, Endpoint, Transport};
