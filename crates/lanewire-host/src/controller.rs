use std::{io, net::SocketAddr, sync::Arc};

use crossbeam_channel::Sender;
use lanewire_core::error::{ErrorKind, Result};
use lanewire_protocol::packet::{DeliveryMethod, Packet};

use crate::{
    connection_id::ConnectionIds,
    event_types::{HostCommand, PeerHandle},
};

/// Cloneable handle for driving a host that polls on another thread.
///
/// Calls only queue work; it runs on the host's next poll. Failures of queued work
/// (unknown peer, full channel) are logged by the host rather than returned here.
#[derive(Debug, Clone)]
pub struct HostController {
    commands: Sender<HostCommand>,
    connection_ids: ConnectionIds,
}

impl HostController {
    pub(crate) fn new(commands: Sender<HostCommand>, connection_ids: ConnectionIds) -> Self {
        Self { commands, connection_ids }
    }

    /// Queues a connect to `addr`. The handle is known right away.
    pub fn connect(&self, addr: SocketAddr, key: &[u8]) -> Result<PeerHandle> {
        let connection_id = self.connection_ids.next_id();
        self.queue(HostCommand::Connect { addr, key: Arc::from(key), connection_id })?;
        Ok(PeerHandle { addr, connection_id })
    }

    /// Queues a message for a connected peer.
    pub fn send(&self, packet: Packet) -> Result<()> {
        self.queue(HostCommand::Send(packet))
    }

    /// Queues one message for every connected peer.
    pub fn send_to_all(&self, channel_id: u8, delivery: DeliveryMethod, data: &[u8]) -> Result<()> {
        self.queue(HostCommand::SendToAll { channel_id, delivery, payload: Arc::from(data) })
    }

    /// Queues a graceful disconnect.
    pub fn disconnect(&self, addr: SocketAddr, data: &[u8]) -> Result<()> {
        self.queue(HostCommand::Disconnect { addr, data: Arc::from(data) })
    }

    /// Queues a message outside any connection.
    pub fn send_unconnected(&self, addr: SocketAddr, data: &[u8]) -> Result<()> {
        self.queue(HostCommand::SendUnconnected { addr, data: Arc::from(data) })
    }

    /// Queues a broadcast to `port`.
    pub fn broadcast(&self, port: u16, data: &[u8]) -> Result<()> {
        self.queue(HostCommand::Broadcast { port, data: Arc::from(data) })
    }

    /// Asks the host to disconnect everyone and stop polling.
    pub fn stop(&self) -> Result<()> {
        self.queue(HostCommand::Stop)
    }

    fn queue(&self, command: HostCommand) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| ErrorKind::IOError(io::Error::new(io::ErrorKind::NotConnected, "host is gone")))
    }
}

#[cfg(test)]
mod tests {
    use crossbeam_channel::unbounded;

    use super::*;

    #[test]
    fn test_connect_hands_out_distinct_handles() {
        let (sender, receiver) = unbounded();
        let controller = HostController::new(sender, ConnectionIds::starting_at(5));
        let addr = "127.0.0.1:9100".parse().unwrap();

        let first = controller.connect(addr, b"").unwrap();
        let second = controller.clone().connect(addr, b"").unwrap();

        assert_eq!(first.connection_id, 5);
        assert_eq!(second.connection_id, 6);
        assert_eq!(receiver.try_iter().count(), 2);
    }

    #[test]
    fn test_queue_fails_once_host_is_gone() {
        let (sender, receiver) = unbounded();
        let controller = HostController::new(sender, ConnectionIds::starting_at(1));
        drop(receiver);

        assert!(matches!(controller.stop(), Err(ErrorKind::IOError(_))));
    }
}
