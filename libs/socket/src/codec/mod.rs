use std::fmt;
use std::hash::Hash;
use std::io;

use thiserror::Error;

pub mod bincode;

pub use self::bincode::BincodeCodec;

/// A decoded protocol packet
///
/// Sockets only look at the packet's kind to route it to handlers.
pub trait Packet: fmt::Debug + Send + 'static {
    /// Type tag used as the dispatch key
    type Kind: Copy + Eq + Hash + fmt::Display + fmt::Debug + Send + Sync + 'static;

    fn kind(&self) -> Self::Kind;
}

/// Errors raised by the bundled codecs
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Frame too large: {size} bytes exceeds limit of {max}")]
    FrameTooLarge { size: usize, max: usize },

    #[error("Bincode error: {0}")]
    Bincode(#[from] ::bincode::Error),
}
