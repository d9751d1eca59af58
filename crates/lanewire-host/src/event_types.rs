//! Event and action types for the runtime layer.
//!
//! This module defines the core types used for communication between
//! the connection layer and the user:
//! - `Action`: Instructions from peers to the runtime (send bytes or emit events)
//! - `SocketEvent`: Events emitted to the user (requests, packets, connections, disconnections)
//! - `HostCommand`: Instructions queued by a `HostController` from another thread

use std::{net::SocketAddr, sync::Arc, time::Duration};

use lanewire_peer::DisconnectInfo;
use lanewire_protocol::packet::{DeliveryMethod, Packet, UnconnectedKind};

use crate::connection_request::ConnectionRequest;

/// Actions that peers can request from the runtime.
#[derive(Debug)]
pub enum Action<E> {
    /// Send the given bytes to the peer's remote address
    Send(Vec<u8>),
    /// Emit an event to the user
    Emit(E),
}

/// Identifies one connection: the remote endpoint plus our local connection id.
///
/// A peer reconnecting from the same endpoint gets a new handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerHandle {
    /// Remote endpoint
    pub addr: SocketAddr,
    /// Local connection id of this connection
    pub connection_id: u32,
}

/// Events that can occur and are pushed through the event receiver.
#[derive(Debug)]
pub enum SocketEvent {
    /// A remote endpoint asks to connect. Nothing else from it is processed until
    /// the request is decided.
    ConnectionRequest(ConnectionRequest),
    /// The handshake with a peer completed.
    Connect(PeerHandle),
    /// A message arrived from a connected peer.
    Packet(Packet),
    /// A connection ended. Emitted exactly once per connection.
    Disconnect(PeerHandle, DisconnectInfo),
    /// A datagram arrived outside any connection.
    Unconnected {
        /// Sender endpoint
        addr: SocketAddr,
        /// Message payload
        payload: Arc<[u8]>,
        /// Point-to-point or broadcast
        kind: UnconnectedKind,
    },
    /// A ping round trip completed; carries the smoothed RTT.
    LatencyUpdate(PeerHandle, Duration),
}

/// Work queued for the session manager by a `HostController`.
#[derive(Debug)]
pub(crate) enum HostCommand {
    Connect { addr: SocketAddr, key: Arc<[u8]>, connection_id: u32 },
    Send(Packet),
    SendToAll { channel_id: u8, delivery: DeliveryMethod, payload: Arc<[u8]> },
    Disconnect { addr: SocketAddr, data: Arc<[u8]> },
    SendUnconnected { addr: SocketAddr, data: Arc<[u8]> },
    Broadcast { port: u16, data: Arc<[u8]> },
    Stop,
}
