#![warn(missing_docs)]

//! lanewire-peer: per-connection state machine for managing remote endpoints.

/// Control command queue.
pub mod command_queue;
/// Disconnect reasons and payloads.
pub mod disconnect;
/// Fragment group reassembly.
pub mod fragment_buffer;
mod peer;
mod peer_state;
/// Per-peer counters.
pub mod statistics;

pub use disconnect::{DisconnectInfo, DisconnectReason};
pub use peer::{Peer, PeerEvent};
pub use peer_state::PeerState;
pub use statistics::PeerStatistics;
