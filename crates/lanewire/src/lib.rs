#![warn(missing_docs)]

//! Lanewire: a small public API facade for the workspace.
//!
//! This crate re-exports what most applications need to exchange messages over UDP:
//!
//! - Host, control handle and events (`Host`, `HostController`, `SocketEvent`)
//! - Packets and delivery methods (`Packet`, `DeliveryMethod`)
//! - Configuration and packet layers (`Config`, `LayerStack`, `Crc32Layer`, `XorLayer`)
//!
//! Example
//! ```ignore
//! use std::time::Instant;
//! use lanewire::prelude::*;
//!
//! let mut server = Host::bind("127.0.0.1:9000").unwrap();
//! let mut client = Host::bind_any().unwrap();
//! client.connect("127.0.0.1:9000", b"key").unwrap();
//!
//! loop {
//!     client.manual_poll(Instant::now());
//!     server.manual_poll(Instant::now());
//!
//!     while let Some(event) = server.recv() {
//!         match event {
//!             SocketEvent::ConnectionRequest(request) => {
//!                 request.accept_if_key(b"key");
//!             }
//!             SocketEvent::Packet(packet) => println!("{:?}", packet.payload()),
//!             _ => {}
//!         }
//!     }
//!     if let Some(SocketEvent::Connect(handle)) = client.recv() {
//!         let hello = Packet::reliable_ordered(handle.addr, b"hello".to_vec(), 0);
//!         client.send(hello).unwrap();
//!     }
//! }
//! ```

// Core config, errors and layers
pub use lanewire_core::{
    config::{Config, TickMode},
    error::{ErrorKind, Result},
    layer::{Crc32Layer, LayerStack, PacketLayer, XorLayer},
};
// Host: manages connections and events
pub use lanewire_host::{
    ConnectionRequest, Host, HostController, PeerHandle, PollingHost, SocketEvent,
};
// Peer: disconnect details and counters
pub use lanewire_peer::{DisconnectInfo, DisconnectReason, PeerStatistics};
// Protocol: packets and delivery methods
pub use lanewire_protocol::packet::{DeliveryMethod, Packet, UnconnectedKind};

/// Convenience prelude with the most commonly used items.
pub mod prelude {
    pub use crate::{
        Config, ConnectionRequest, DeliveryMethod, DisconnectReason, Host, HostController,
        Packet, PeerHandle, SocketEvent, TickMode,
    };
}
