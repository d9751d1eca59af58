/// Peer connection state machine.
///
/// Tracks the lifecycle of a connection from the first connect request through active
/// communication to its single, terminal disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PeerState {
    /// Client: connect request sent, waiting for accept or reject
    #[default]
    Outgoing,

    /// Server: connect request accepted locally, accept not yet confirmed by traffic
    ConnectingIncoming,

    /// Handshake complete - connection is active
    Connected,

    /// Local disconnect requested, waiting for the remote acknowledgment
    ShutdownRequested,

    /// Terminal state; the peer is removed after its final flush
    Disconnected,
}

impl PeerState {
    /// Returns true if the connection is fully established
    pub fn is_connected(&self) -> bool {
        matches!(self, PeerState::Connected)
    }

    /// Returns true if the peer is in the middle of the connection handshake
    pub fn is_connecting(&self) -> bool {
        matches!(self, PeerState::Outgoing | PeerState::ConnectingIncoming)
    }

    /// Returns true if the peer is disconnecting or already disconnected
    pub fn is_disconnecting(&self) -> bool {
        matches!(self, PeerState::ShutdownRequested | PeerState::Disconnected)
    }

    /// Returns true once the peer reached its terminal state
    pub fn is_disconnected(&self) -> bool {
        matches!(self, PeerState::Disconnected)
    }

    /// Returns true if application messages may still be queued
    pub fn accepts_messages(&self) -> bool {
        !self.is_disconnecting()
    }
}
