//! Delivery classes and the user-facing packet type.
//!
//! - `DeliveryMethod`: the five reliability/ordering behaviors a channel can apply
//! - `Packet`: payload plus the endpoint, channel and delivery method it travels with
//! - `UnconnectedKind`: tag for datagrams exchanged outside any connection

use std::{convert::TryFrom, net::SocketAddr, sync::Arc};

use lanewire_core::error::{DecodingErrorKind, ErrorKind};

/// 16-bit sequence number type used by protocol.
pub type SequenceNumber = u16;

/// Helper trait to convert enums to u8 values for wire format.
pub trait EnumConverter {
    /// The enum type this converter works with.
    type Enum;

    /// Converts the enum to a u8 for serialization.
    fn to_u8(&self) -> u8;
}

/// How messages on a channel are delivered.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum DeliveryMethod {
    /// No sequencing, no retransmission. Loss and duplicates are possible.
    Unreliable,
    /// Unreliable, but older packets than the newest delivered one are dropped.
    Sequenced,
    /// Retransmitted until acknowledged, delivered strictly in send order.
    ReliableOrdered,
    /// Retransmitted until acknowledged, delivered on arrival, duplicates suppressed.
    ReliableUnordered,
    /// Only the newest message is retransmitted; older pending ones are superseded.
    ReliableSequenced,
}

impl DeliveryMethod {
    /// All delivery methods, in wire order.
    pub const ALL: [DeliveryMethod; 5] = [
        DeliveryMethod::Unreliable,
        DeliveryMethod::Sequenced,
        DeliveryMethod::ReliableOrdered,
        DeliveryMethod::ReliableUnordered,
        DeliveryMethod::ReliableSequenced,
    ];

    /// Returns true if packets are acknowledged and retransmitted.
    pub fn is_reliable(self) -> bool {
        matches!(
            self,
            DeliveryMethod::ReliableOrdered
                | DeliveryMethod::ReliableUnordered
                | DeliveryMethod::ReliableSequenced
        )
    }

    /// Returns true if messages on this method may be split into fragments.
    ///
    /// Sequenced methods drop older packets, which would tear fragment groups apart.
    pub fn allows_fragmentation(self) -> bool {
        matches!(
            self,
            DeliveryMethod::Unreliable
                | DeliveryMethod::ReliableOrdered
                | DeliveryMethod::ReliableUnordered
        )
    }

    /// Position of this method inside a peer's per-channel slot block.
    pub fn index(self) -> usize {
        self as usize
    }
}

impl EnumConverter for DeliveryMethod {
    type Enum = DeliveryMethod;

    fn to_u8(&self) -> u8 {
        *self as u8
    }
}

impl TryFrom<u8> for DeliveryMethod {
    type Error = ErrorKind;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(DeliveryMethod::Unreliable),
            1 => Ok(DeliveryMethod::Sequenced),
            2 => Ok(DeliveryMethod::ReliableOrdered),
            3 => Ok(DeliveryMethod::ReliableUnordered),
            4 => Ok(DeliveryMethod::ReliableSequenced),
            _ => Err(ErrorKind::DecodingError(DecodingErrorKind::DeliveryMethod)),
        }
    }
}

/// Tag carried by datagrams sent outside any connection.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum UnconnectedKind {
    /// Point-to-point message to a known endpoint.
    BasicMessage,
    /// Message sent to the broadcast address, typically for discovery.
    Broadcast,
}

impl EnumConverter for UnconnectedKind {
    type Enum = UnconnectedKind;

    fn to_u8(&self) -> u8 {
        *self as u8
    }
}

impl TryFrom<u8> for UnconnectedKind {
    type Error = ErrorKind;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(UnconnectedKind::BasicMessage),
            1 => Ok(UnconnectedKind::Broadcast),
            _ => Err(ErrorKind::DecodingError(DecodingErrorKind::UnconnectedKind)),
        }
    }
}

/// Message sent to, or received from, a connected peer.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Packet {
    addr: SocketAddr,
    payload: Arc<[u8]>,
    delivery: DeliveryMethod,
    channel_id: u8,
}

impl Packet {
    /// Creates a new packet with the given delivery method and channel.
    pub fn new(
        addr: SocketAddr,
        payload: Arc<[u8]>,
        delivery: DeliveryMethod,
        channel_id: u8,
    ) -> Packet {
        Packet { addr, payload, delivery, channel_id }
    }

    /// Creates an unreliable packet on channel 0 (fire-and-forget).
    pub fn unreliable(addr: SocketAddr, payload: Vec<u8>) -> Packet {
        Packet::new(addr, payload.into(), DeliveryMethod::Unreliable, 0)
    }

    /// Creates an unreliable, sequenced packet on the given channel (drops stale arrivals).
    pub fn sequenced(addr: SocketAddr, payload: Vec<u8>, channel_id: u8) -> Packet {
        Packet::new(addr, payload.into(), DeliveryMethod::Sequenced, channel_id)
    }

    /// Creates a reliable, unordered packet on channel 0 (guaranteed delivery).
    pub fn reliable_unordered(addr: SocketAddr, payload: Vec<u8>) -> Packet {
        Packet::new(addr, payload.into(), DeliveryMethod::ReliableUnordered, 0)
    }

    /// Creates a reliable, ordered packet on the given channel.
    pub fn reliable_ordered(addr: SocketAddr, payload: Vec<u8>, channel_id: u8) -> Packet {
        Packet::new(addr, payload.into(), DeliveryMethod::ReliableOrdered, channel_id)
    }

    /// Creates a reliable, sequenced packet on the given channel (only the newest survives).
    pub fn reliable_sequenced(addr: SocketAddr, payload: Vec<u8>, channel_id: u8) -> Packet {
        Packet::new(addr, payload.into(), DeliveryMethod::ReliableSequenced, channel_id)
    }

    /// Returns the payload of this packet.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Returns a shared handle to the payload.
    pub fn payload_arc(&self) -> Arc<[u8]> {
        Arc::clone(&self.payload)
    }

    /// Returns the remote address of this packet.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Returns the delivery method of this packet.
    pub fn delivery(&self) -> DeliveryMethod {
        self.delivery
    }

    /// Returns the channel id of this packet.
    pub fn channel_id(&self) -> u8 {
        self.channel_id
    }
}
