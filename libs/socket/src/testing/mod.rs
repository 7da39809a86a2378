//! Helpers for testing code built on sockets.
//!
//! [`MemoryTransport`] stands in for a network connection and
//! [`MemoryConnector`] for a connection attempt whose outcome the test decides.

mod memory;

pub use memory::{ConnectHandle, MemoryConnector, MemoryTransport, TransportProbe};

use serde::Serialize;

use crate::codec::Packet;

/// Encode a packet the way [`BincodeCodec`](crate::codec::BincodeCodec) puts it on the wire
///
/// # Example
///
/// ```
/// use constellation_socket::testing::frame_packet;
/// # use constellation_socket::Packet;
/// # #[derive(Debug, serde::Serialize)]
/// # struct Ping;
/// # impl Packet for Ping {
/// #     type Kind = &'static str;
/// #     fn kind(&self) -> &'static str { "ping" }
/// # }
///
/// let bytes = frame_packet(&Ping);
/// assert_eq!(&bytes[..4], &[0, 0, 0, 0]);
/// ```
pub fn frame_packet<P>(packet: &P) -> Vec<u8>
where
    P: Packet + Serialize,
{
    let body = ::bincode::serialize(packet).expect("failed to serialize packet");
    let mut frame = (body.len() as u32).to_be_bytes().to_vec();
    frame.extend(body);
    frame
}

/// Encode several packets back to back
pub fn frame_packets<P>(packets: &[P]) -> Vec<u8>
where
    P: Packet + Serialize,
{
    packets.iter().flat_map(frame_packet).collect()
}
