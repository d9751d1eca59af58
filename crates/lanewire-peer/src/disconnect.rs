//! Why a connection ended, and what the remote attached to it.

use std::{fmt, sync::Arc};

/// Reason carried by every disconnect event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Nothing was received for longer than the disconnect timeout
    Timeout,
    /// Connect requests went unanswered
    ConnectionFailed,
    /// The remote refused the connect request
    ConnectionRejected,
    /// The remote closed the connection
    RemoteConnectionClose,
    /// The local application closed the connection
    DisconnectPeerCalled,
    /// The remote has no connection matching ours
    PeerNotFound,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            DisconnectReason::Timeout => "timed out",
            DisconnectReason::ConnectionFailed => "connection failed",
            DisconnectReason::ConnectionRejected => "connection rejected",
            DisconnectReason::RemoteConnectionClose => "closed by remote",
            DisconnectReason::DisconnectPeerCalled => "closed locally",
            DisconnectReason::PeerNotFound => "remote peer not found",
        };
        f.write_str(text)
    }
}

/// Reason plus the optional payload attached by the remote (reject or shutdown data).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisconnectInfo {
    /// Why the connection ended
    pub reason: DisconnectReason,
    /// Remote-supplied payload, empty when none was sent
    pub data: Arc<[u8]>,
}

impl DisconnectInfo {
    /// Creates disconnect info without payload.
    pub fn new(reason: DisconnectReason) -> Self {
        Self { reason, data: Arc::from(Vec::new()) }
    }

    /// Creates disconnect info carrying the remote's payload.
    pub fn with_data(reason: DisconnectReason, data: Arc<[u8]>) -> Self {
        Self { reason, data }
    }
}
