//! Protocol command types.
//!
//! Everything on the wire is a command: connecting, data, acknowledgments, pings,
//! shutdown. Commands are packed into datagrams, each datagram tagged with the
//! receiver's connection id.

use std::sync::Arc;

use lanewire_core::{
    constants::{COMMAND_LENGTH_PREFIX, DATAGRAM_HEADER_SIZE, DATA_HEADER_SIZE, FRAGMENT_HEADER_SIZE},
    error::{ErrorKind, Result},
};

use crate::packet::{DeliveryMethod, SequenceNumber, UnconnectedKind};

/// Position of a fragment inside its group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FragmentInfo {
    /// Group id shared by every fragment of one message
    pub group: u16,
    /// Fragment index (0-based)
    pub index: u16,
    /// Total number of fragments
    pub count: u16,
}

/// Protocol commands that can be sent between peers.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolCommand {
    /// Ask the remote endpoint to open a connection
    ConnectRequest {
        /// Protocol version of the sender
        protocol_version: u16,
        /// Sender's local connection id
        connection_id: u32,
        /// Channel ids the sender wants to use
        channel_count: u8,
        /// Application key/token checked by the listener
        key: Arc<[u8]>,
    },

    /// Accept a connect request
    ConnectAccept {
        /// Acceptor's local connection id
        connection_id: u32,
        /// Negotiated channel count
        channel_count: u8,
    },

    /// Refuse a connect request
    Reject {
        /// Sender retransmits until the rejection is acknowledged
        reliable: bool,
        /// Application payload explaining the rejection
        data: Arc<[u8]>,
    },

    /// Application data on a channel
    Data {
        /// Channel identifier
        channel_id: u8,
        /// Delivery method of the channel
        delivery: DeliveryMethod,
        /// Sequence number (unused for unreliable)
        sequence: SequenceNumber,
        /// Present when the payload is one fragment of a larger message
        fragment: Option<FragmentInfo>,
        /// Payload data
        payload: Arc<[u8]>,
    },

    /// Acknowledge received reliable packets on a channel
    Ack {
        /// Channel identifier
        channel_id: u8,
        /// Delivery method of the channel
        delivery: DeliveryMethod,
        /// Everything before this sequence was received
        window_start: SequenceNumber,
        /// Bit `i` set when `window_start + i` was received
        mask: u64,
    },

    /// Keep-alive and RTT probe
    Ping {
        /// Probe sequence echoed in the pong
        sequence: u16,
    },

    /// Reply to a ping
    Pong {
        /// Echoed probe sequence
        sequence: u16,
    },

    /// Graceful close
    Shutdown {
        /// Application payload attached to the disconnect
        data: Arc<[u8]>,
    },

    /// Acknowledges a shutdown or a reliable reject
    ShutdownOk,

    /// No connection matches the id the sender used
    PeerNotFound {
        /// The connection id that could not be matched
        connection_id: u32,
    },

    /// Datagram outside any connection
    Unconnected {
        /// Basic message or broadcast
        kind: UnconnectedKind,
        /// Application payload
        data: Arc<[u8]>,
    },
}

impl ProtocolCommand {
    /// Returns the command type identifier for serialization
    pub fn command_type(&self) -> u8 {
        match self {
            ProtocolCommand::ConnectRequest { .. } => 1,
            ProtocolCommand::ConnectAccept { .. } => 2,
            ProtocolCommand::Reject { .. } => 3,
            ProtocolCommand::Data { .. } => 4,
            ProtocolCommand::Ack { .. } => 5,
            ProtocolCommand::Ping { .. } => 6,
            ProtocolCommand::Pong { .. } => 7,
            ProtocolCommand::Shutdown { .. } => 8,
            ProtocolCommand::ShutdownOk => 9,
            ProtocolCommand::PeerNotFound { .. } => 10,
            ProtocolCommand::Unconnected { .. } => 11,
        }
    }

    /// Returns true if this command is only meaningful outside a connection,
    /// i.e. its datagram carries connection id 0.
    pub fn is_connectionless(&self) -> bool {
        matches!(
            self,
            ProtocolCommand::ConnectRequest { .. }
                | ProtocolCommand::PeerNotFound { .. }
                | ProtocolCommand::Unconnected { .. }
        )
    }

    /// Returns the channel ID if this is a data or ack command
    pub fn channel_id(&self) -> Option<u8> {
        match self {
            ProtocolCommand::Data { channel_id, .. } | ProtocolCommand::Ack { channel_id, .. } => {
                Some(*channel_id)
            }
            _ => None,
        }
    }

    /// Exact number of bytes `encode_command_into` writes for this command.
    pub fn encoded_len(&self) -> usize {
        let body = match self {
            ProtocolCommand::ConnectRequest { key, .. } => 2 + 4 + 1 + 2 + key.len(),
            ProtocolCommand::ConnectAccept { .. } => 4 + 1,
            ProtocolCommand::Reject { data, .. } => 1 + 2 + data.len(),
            ProtocolCommand::Data { fragment, payload, .. } => {
                let fragment_len = if fragment.is_some() { FRAGMENT_HEADER_SIZE } else { 0 };
                return DATA_HEADER_SIZE + fragment_len + payload.len();
            }
            ProtocolCommand::Ack { .. } => 1 + 1 + 2 + 8,
            ProtocolCommand::Ping { .. } | ProtocolCommand::Pong { .. } => 2,
            ProtocolCommand::Shutdown { data } => 2 + data.len(),
            ProtocolCommand::ShutdownOk => 0,
            ProtocolCommand::PeerNotFound { .. } => 4,
            ProtocolCommand::Unconnected { data, .. } => 1 + 2 + data.len(),
        };
        1 + body
    }

    /// Bytes this command occupies inside a datagram, including its length prefix.
    pub fn framed_len(&self) -> usize {
        COMMAND_LENGTH_PREFIX + self.encoded_len()
    }
}

/// One datagram: the receiver's connection id plus a batch of commands.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Datagram {
    /// Receiver's local connection id, or 0 for connectionless commands
    pub connection_id: u32,
    /// Protocol commands in this datagram
    pub commands: Vec<ProtocolCommand>,
}

impl Datagram {
    /// Creates an empty datagram for the given connection id
    pub fn new(connection_id: u32) -> Self {
        Self { connection_id, commands: Vec::new() }
    }

    /// Creates a datagram with a single command
    pub fn single(connection_id: u32, command: ProtocolCommand) -> Self {
        Self { connection_id, commands: vec![command] }
    }

    /// Adds a command to this datagram
    pub fn add_command(&mut self, command: ProtocolCommand) {
        self.commands.push(command);
    }

    /// Returns true if the datagram has no commands
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Returns the number of commands in this datagram
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Encoded size of this datagram in bytes.
    pub fn encoded_len(&self) -> usize {
        DATAGRAM_HEADER_SIZE + self.commands.iter().map(ProtocolCommand::framed_len).sum::<usize>()
    }

    /// Fails with `PayloadTooLarge` when this datagram does not fit in `mtu` bytes.
    /// `payload_len` is the part of the encoded size supplied by the application; the
    /// error reports it against what would have fit.
    pub fn ensure_fits(&self, mtu: usize, payload_len: usize) -> Result<()> {
        let size = self.encoded_len();
        if size <= mtu {
            return Ok(());
        }
        let overhead = size.saturating_sub(payload_len);
        Err(ErrorKind::PayloadTooLarge { size: payload_len, max: mtu.saturating_sub(overhead) })
    }
}
