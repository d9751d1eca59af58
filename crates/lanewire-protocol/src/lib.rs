#![warn(missing_docs)]

//! lanewire-protocol: commands, wire codec, and the per-channel reliability machinery.

/// Reliability lanes: send window, acknowledgments, ordering and sequencing.
pub mod channel;
/// Protocol command types.
pub mod command;
/// Command serialization and deserialization.
pub mod command_codec;
/// Packet types and delivery methods.
pub mod packet;
/// Round-trip time estimation.
pub mod rtt;
/// Wrapping sequence number arithmetic.
pub mod sequence;

pub use channel::{Channel, ChannelCounters, OutgoingMessage, ReceivedMessage};
pub use command::{Datagram, FragmentInfo, ProtocolCommand};
pub use command_codec::{CommandDecoder, CommandEncoder};
pub use packet::{DeliveryMethod, EnumConverter, Packet, SequenceNumber, UnconnectedKind};
pub use rtt::RttEstimator;
