//! Peer connection statistics tracking.
//!
//! Datagram and byte counters are kept by the peer itself; message level counters
//! (retransmissions, duplicates) are summed from its channels when requested.

/// Statistics for a peer connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerStatistics {
    /// Datagrams sent to this peer
    pub datagrams_sent: u64,
    /// Datagrams received from this peer
    pub datagrams_received: u64,
    /// Bytes sent, transport header included, packet layers excluded
    pub bytes_sent: u64,
    /// Bytes received, transport header included, packet layers excluded
    pub bytes_received: u64,
    /// Data commands sent, retransmissions and fragments included
    pub packets_sent: u64,
    /// Data commands retransmitted after a resend timeout
    pub retransmissions: u64,
    /// Messages surfaced to the application
    pub messages_received: u64,
    /// Duplicate arrivals suppressed by reliable channels
    pub duplicates: u64,
}

impl PeerStatistics {
    /// Share of data commands that had to be retransmitted (0.0 to 1.0).
    pub fn retransmission_rate(&self) -> f32 {
        if self.packets_sent == 0 {
            return 0.0;
        }
        self.retransmissions as f32 / self.packets_sent as f32
    }

    /// Resets all statistics counters.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
