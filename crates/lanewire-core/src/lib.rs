#![warn(missing_docs)]

//! lanewire-core: foundational types shared by every lanewire layer.
//!
//! This crate holds the pieces that do not depend on the wire protocol:
//! - Configuration types
//! - Error handling
//! - Protocol constants
//! - Packet layers (checksum, ciphers) applied to raw datagrams
//! - The datagram socket abstraction
//!
//! Protocol logic lives in the other crates:
//! - `lanewire-protocol`: wire commands, codec, sequence math, channels
//! - `lanewire-peer`: per-connection state machine and fragmentation
//! - `lanewire-host`: socket ownership, handshake orchestration, events

/// Protocol constants shared across layers.
pub mod constants {
    /// Size of the per-channel reliable send window, in packets.
    ///
    /// The acknowledgment mask is a `u64`, so this must stay at 64.
    pub const WINDOW_SIZE: u16 = 64;
    /// Half of the 16-bit sequence space. Two sequence numbers further apart than this
    /// are considered to have wrapped.
    pub const HALF_SEQUENCE_SPACE: u16 = 32768;
    /// Size of the datagram header: connection id (4) + command count (1).
    pub const DATAGRAM_HEADER_SIZE: usize = 5;
    /// Length prefix written in front of every command.
    pub const COMMAND_LENGTH_PREFIX: usize = 2;
    /// Encoded size of a data command without fragment info, excluding the payload:
    /// type (1) + channel (1) + delivery (1) + flags (1) + sequence (2) + payload length (2).
    pub const DATA_HEADER_SIZE: usize = 8;
    /// Extra bytes carried by a fragmented data command: group (2) + index (2) + count (2).
    pub const FRAGMENT_HEADER_SIZE: usize = 6;
    /// Upper bound on the number of channel ids a peer may use.
    pub const MAX_CHANNEL_COUNT: u8 = 64;
    /// Default number of channel ids per peer.
    pub const DEFAULT_CHANNEL_COUNT: u8 = 4;
    /// Default maximal number of fragments a single message may be split into.
    pub const MAX_FRAGMENTS_DEFAULT: u16 = 512;
    /// Maximum transmission unit used for outgoing datagrams.
    ///
    /// Stays well under 1500 - ipv6 header (40) - udp header (8) so that packet layers
    /// appending a few bytes never push a datagram into IP fragmentation.
    pub const DEFAULT_MTU: u16 = 1200;
    /// Smallest accepted MTU. Below this the data header leaves no room for payload.
    pub const MIN_MTU: u16 = 64;
    /// This is the current protocol version.
    ///
    /// Incremental monolithic protocol number, checked on every connect request.
    pub const PROTOCOL_VERSION: u16 = 1;
}

/// Configuration options for the protocol and runtime.
pub mod config;
/// Error types and results.
pub mod error;
/// Packet layers transforming raw datagrams (checksums, ciphers).
pub mod layer;
/// Transport abstraction for pluggable I/O.
pub mod transport;
