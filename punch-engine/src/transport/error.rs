//! Transport error types.

use std::io;

use crate::protocol::FrameError;

/// Errors raised by transport adapters.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Configured address does not exist
    #[error("no port available at {address}")]
    NoPortAvailable { address: String },

    /// Address exists but another process holds it
    #[error("port {address} is busy")]
    PortBusy { address: String },

    /// An open connection went away
    #[error("connection lost: {reason}")]
    Lost { reason: String },

    /// Operation needs an open connection
    #[error("transport not open")]
    NotOpen,

    /// Adapter cannot send commands
    #[error("{transport} transport cannot send commands")]
    ReadOnly { transport: &'static str },

    /// Command could not be encoded for this station
    #[error("command rejected: {0}")]
    Command(#[from] FrameError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl TransportError {
    pub(crate) fn lost(reason: impl Into<String>) -> Self {
        TransportError::Lost {
            reason: reason.into(),
        }
    }

    /// Classify an error from opening `address`.
    pub(crate) fn from_open(address: &str, err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound
            | io::ErrorKind::AddrNotAvailable
            | io::ErrorKind::ConnectionRefused => {
                TransportError::NoPortAvailable {
                    address: address.to_string(),
                }
            }
            io::ErrorKind::PermissionDenied
            | io::ErrorKind::AddrInUse
            | io::ErrorKind::ResourceBusy => TransportError::PortBusy {
                address: address.to_string(),
            },
            _ => TransportError::Io(err),
        }
    }

    /// Whether reopening might help.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            TransportError::ReadOnly { .. } | TransportError::Command(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = TransportError::NoPortAvailable {
            address: "/dev/ttyUSB9".into(),
        };
        assert_eq!(err.to_string(), "no port available at /dev/ttyUSB9");

        let err = TransportError::lost("peer closed");
        assert_eq!(err.to_string(), "connection lost: peer closed");

        let err = TransportError::ReadOnly { transport: "bus" };
        assert_eq!(err.to_string(), "bus transport cannot send commands");
    }

    #[test]
    fn open_errors_are_classified() {
        let err = TransportError::from_open("a", io::Error::from(io::ErrorKind::NotFound));
        assert!(matches!(err, TransportError::NoPortAvailable { .. }));

        let err = TransportError::from_open("a", io::Error::from(io::ErrorKind::AddrInUse));
        assert!(matches!(err, TransportError::PortBusy { .. }));

        let err = TransportError::from_open("a", io::Error::from(io::ErrorKind::TimedOut));
        assert!(matches!(err, TransportError::Io(_)));
        assert!(err.is_retryable());
    }
}
