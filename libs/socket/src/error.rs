use std::fmt;

use thiserror::Error;

/// Boxed underlying cause carried by the typed errors
pub type Cause = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Origin of a failure surfaced by a socket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The underlying connection failed
    Transport,
    /// Inbound bytes could not be decoded
    Decode,
    /// An outbound packet could not be encoded
    Encode,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Transport => "transport",
            ErrorKind::Decode => "decode",
            ErrorKind::Encode => "encode",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Transport error: {0}")]
    Transport(#[source] Cause),

    #[error("Decode error: {0}")]
    Decode(#[source] Cause),

    #[error("Encode error: {0}")]
    Encode(#[source] Cause),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Reference count is already zero")]
    RefUnderflow,
}

impl Error {
    /// Wrap an underlying cause with the given origin
    pub fn wrap(kind: ErrorKind, cause: impl Into<Cause>) -> Self {
        let cause = cause.into();
        match kind {
            ErrorKind::Transport => Error::Transport(cause),
            ErrorKind::Decode => Error::Decode(cause),
            ErrorKind::Encode => Error::Encode(cause),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Origin tag, for errors that wrap a transport or codec failure
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Error::Transport(_) => Some(ErrorKind::Transport),
            Error::Decode(_) => Some(ErrorKind::Decode),
            Error::Encode(_) => Some(ErrorKind::Encode),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Error::Transport(Box::new(error))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;
    use std::io;

    #[test]
    fn wrap_tags_each_kind() {
        for kind in [ErrorKind::Transport, ErrorKind::Decode, ErrorKind::Encode] {
            let error = Error::wrap(kind, io::Error::other("boom"));
            assert_eq!(error.kind(), Some(kind));
            assert!(error.to_string().contains("boom"));
        }
    }

    #[test]
    fn io_errors_are_transport_errors() {
        let error: Error = io::Error::new(io::ErrorKind::ConnectionReset, "reset").into();
        assert_eq!(error.kind(), Some(ErrorKind::Transport));

        let source = error.source().expect("cause is kept as source");
        assert_eq!(source.to_string(), "reset");
    }

    #[test]
    fn usage_errors_have_no_kind() {
        assert_eq!(Error::config("missing").kind(), None);
        assert_eq!(Error::ConnectionClosed.kind(), None);
        assert_eq!(Error::RefUnderflow.kind(), None);
    }
}
