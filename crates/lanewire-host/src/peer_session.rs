use std::time::Instant;

use lanewire_peer::{Peer, PeerEvent};
use lanewire_protocol::packet::Packet;

use crate::event_types::{Action, PeerHandle, SocketEvent};

/// Glue between a `Peer` and the session manager: turns what the peer produced into
/// runtime actions.
pub(crate) trait PeerSession {
    /// Handle identifying this connection in user events.
    fn handle(&self) -> PeerHandle;

    /// Drains pending peer events as user events.
    fn event_actions(&mut self) -> Vec<Action<SocketEvent>>;

    /// Encodes everything due for sending.
    fn send_actions(&mut self, time: Instant) -> Vec<Action<SocketEvent>>;
}

impl PeerSession for Peer {
    fn handle(&self) -> PeerHandle {
        PeerHandle { addr: self.remote_address, connection_id: self.local_connection_id() }
    }

    fn event_actions(&mut self) -> Vec<Action<SocketEvent>> {
        let handle = self.handle();
        self.drain_events()
            .map(|event| {
                Action::Emit(match event {
                    PeerEvent::Connected => SocketEvent::Connect(handle),
                    PeerEvent::Message { channel_id, delivery, payload } => {
                        SocketEvent::Packet(Packet::new(handle.addr, payload, delivery, channel_id))
                    }
                    PeerEvent::LatencyUpdate(rtt) => SocketEvent::LatencyUpdate(handle, rtt),
                    PeerEvent::Disconnected(info) => SocketEvent::Disconnect(handle, info),
                })
            })
            .collect()
    }

    fn send_actions(&mut self, time: Instant) -> Vec<Action<SocketEvent>> {
        self.flush(time).into_iter().map(Action::Send).collect()
    }
}
