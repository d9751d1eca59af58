#![warn(missing_docs)]

//! lanewire-host: UDP host, handshake orchestration and event delivery over the peer layer.

/// Local connection id allocation.
pub mod connection_id;
/// Connection requests awaiting an application decision.
pub mod connection_request;
/// Cross-thread control handle.
pub mod controller;
/// Event and action types (Action, SocketEvent, PeerHandle).
pub mod event_types;
/// Connection orchestrator over any datagram socket.
pub mod session_manager;
/// High-level UDP host wrapping the session manager.
pub mod socket;
/// Time utilities for the host.
pub mod time;

mod peer_session;

pub use connection_id::ConnectionIds;
pub use connection_request::ConnectionRequest;
pub use controller::HostController;
pub use event_types::{Action, PeerHandle, SocketEvent};
pub use session_manager::SessionManager;
pub use socket::{Host, PollingHost};
pub use time::{Clock, ManualClock, SystemClock};
