//! Error types returned by application-facing calls.
//!
//! Problems originating from the network (loss, malformed datagrams, bad checksums)
//! are absorbed by the transport and never show up here.

use std::{
    error::Error,
    fmt::{self, Display, Formatter},
    io,
    net::SocketAddr,
};

/// Wrapped result type for lanewire errors.
pub type Result<T> = std::result::Result<T, ErrorKind>;

/// Enum with all possible errors that could occur.
#[derive(Debug)]
pub enum ErrorKind {
    /// Error in decoding the packet.
    DecodingError(DecodingErrorKind),
    /// Could not read the datagram header.
    CouldNotReadHeader(String),
    /// Received data is too short for the header it claims to carry.
    ReceivedDataToShort,
    /// Payload cannot be sent on the chosen delivery class, or needs more fragments than allowed.
    PayloadTooLarge {
        /// Payload size in bytes.
        size: usize,
        /// Largest size accepted for this send.
        max: usize,
    },
    /// Channel queue is full; the send window has not drained yet.
    ChannelFull {
        /// Channel the message was sent on.
        channel_id: u8,
    },
    /// Channel id is not below the negotiated channel count.
    InvalidChannel(u8),
    /// No peer is known for this address.
    UnknownPeer(SocketAddr),
    /// Peer is shutting down or already disconnected.
    PeerDisconnected,
    /// Feature is switched off in the configuration.
    FeatureDisabled(&'static str),
    /// Configuration values are out of range.
    InvalidConfig(String),
    /// Automatic polling was requested while the configuration asks for manual ticking.
    ManualTickMode,
    /// Wrapper around a std io::Error.
    IOError(io::Error),
}

impl Display for ErrorKind {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::DecodingError(e) => write!(fmt, "Could not decode the packet: {:?}.", e),
            ErrorKind::CouldNotReadHeader(header) => {
                write!(fmt, "Expected {} header but could not be read from buffer.", header)
            }
            ErrorKind::ReceivedDataToShort => {
                write!(fmt, "The received data did not have any length.")
            }
            ErrorKind::PayloadTooLarge { size, max } => {
                write!(fmt, "Payload of {} bytes exceeds the limit of {} bytes.", size, max)
            }
            ErrorKind::ChannelFull { channel_id } => {
                write!(fmt, "Channel {} has too many messages waiting to be sent.", channel_id)
            }
            ErrorKind::InvalidChannel(channel_id) => {
                write!(fmt, "Channel {} is outside the negotiated channel count.", channel_id)
            }
            ErrorKind::UnknownPeer(addr) => write!(fmt, "No peer connected from {}.", addr),
            ErrorKind::PeerDisconnected => write!(fmt, "Peer is disconnecting or disconnected."),
            ErrorKind::FeatureDisabled(feature) => {
                write!(fmt, "{} is disabled in the configuration.", feature)
            }
            ErrorKind::InvalidConfig(reason) => write!(fmt, "Invalid configuration: {}.", reason),
            ErrorKind::ManualTickMode => {
                write!(fmt, "Host is configured for manual ticking and cannot poll by itself.")
            }
            ErrorKind::IOError(e) => write!(fmt, "An IO Error occurred. Reason: {:?}.", e),
        }
    }
}

impl Error for ErrorKind {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ErrorKind::IOError(e) => Some(e),
            _ => None,
        }
    }
}

/// Errors that could occur while decoding a datagram.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum DecodingErrorKind {
    /// Unknown delivery method byte.
    DeliveryMethod,
    /// Unknown command type byte.
    CommandType,
    /// Unknown unconnected message kind.
    UnconnectedKind,
    /// Datagram ended before a field was complete.
    Truncated,
}

impl From<io::Error> for ErrorKind {
    fn from(inner: io::Error) -> ErrorKind {
        ErrorKind::IOError(inner)
    }
}

impl From<DecodingErrorKind> for ErrorKind {
    fn from(inner: DecodingErrorKind) -> ErrorKind {
        ErrorKind::DecodingError(inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_converts_and_keeps_source() {
        let err: ErrorKind = io::Error::new(io::ErrorKind::AddrInUse, "taken").into();
        assert!(matches!(err, ErrorKind::IOError(_)));
        assert!(err.source().is_some());
    }

    #[test]
    fn test_display_mentions_limits() {
        let err = ErrorKind::PayloadTooLarge { size: 5000, max: 1000 };
        let text = err.to_string();
        assert!(text.contains("5000"));
        assert!(text.contains("1000"));
    }
}
