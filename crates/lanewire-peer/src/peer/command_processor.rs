use std::{sync::Arc, time::Instant};

use lanewire_protocol::{
    command::{Datagram, FragmentInfo, ProtocolCommand},
    packet::{DeliveryMethod, SequenceNumber},
};

use crate::{
    disconnect::{DisconnectInfo, DisconnectReason},
    peer_state::PeerState,
};

use super::{Peer, PeerEvent};

impl Peer {
    /// Processes a decoded datagram the host already matched to this peer.
    /// `received_bytes` is its size on the wire, for statistics.
    pub fn process_datagram(&mut self, datagram: &Datagram, received_bytes: usize, time: Instant) {
        self.last_heard = time;
        self.statistics.datagrams_received += 1;
        self.statistics.bytes_received += received_bytes as u64;

        for command in &datagram.commands {
            self.process_command(command, time);
        }
    }

    /// Processes an incoming protocol command.
    /// Automatically enqueues response commands (Pong, ShutdownOk) when appropriate;
    /// acknowledgments are produced by the channels at flush time.
    pub fn process_command(&mut self, command: &ProtocolCommand, time: Instant) {
        if self.state.is_disconnected() {
            return;
        }

        match command {
            ProtocolCommand::ConnectAccept { connection_id, channel_count } => {
                self.on_connect_accept(*connection_id, *channel_count);
            }
            ProtocolCommand::Reject { data, .. } => {
                if self.state == PeerState::Outgoing {
                    self.disconnect_with(DisconnectInfo::with_data(
                        DisconnectReason::ConnectionRejected,
                        Arc::clone(data),
                    ));
                }
            }
            ProtocolCommand::Data { channel_id, delivery, sequence, fragment, payload } => {
                self.on_data(*channel_id, *delivery, *sequence, *fragment, payload, time);
            }
            ProtocolCommand::Ack { channel_id, delivery, window_start, mask } => {
                if self.state.is_connected() && *channel_id < self.channel_count {
                    let samples = self.channel_mut(*channel_id, *delivery).on_ack(*window_start, *mask, time);
                    for sample in samples {
                        self.rtt.update(sample);
                    }
                }
            }
            ProtocolCommand::Ping { sequence } => {
                self.command_queue.enqueue(ProtocolCommand::Pong { sequence: *sequence });
            }
            ProtocolCommand::Pong { sequence } => self.on_pong(*sequence, time),
            ProtocolCommand::Shutdown { data } => {
                self.command_queue.enqueue(ProtocolCommand::ShutdownOk);
                if self.state != PeerState::Outgoing {
                    self.disconnect_with(DisconnectInfo::with_data(
                        DisconnectReason::RemoteConnectionClose,
                        Arc::clone(data),
                    ));
                }
            }
            ProtocolCommand::ShutdownOk => {
                if self.state == PeerState::ShutdownRequested {
                    let data = Arc::clone(&self.shutdown_data);
                    self.disconnect_with(DisconnectInfo::with_data(
                        DisconnectReason::DisconnectPeerCalled,
                        data,
                    ));
                }
            }
            ProtocolCommand::PeerNotFound { .. } => self.on_peer_not_found(),
            ProtocolCommand::ConnectRequest { .. } | ProtocolCommand::Unconnected { .. } => {
                tracing::trace!(
                    "Ignoring connectionless command {} inside a connection with {}",
                    command.command_type(),
                    self.remote_address
                );
            }
        }
    }

    fn on_connect_accept(&mut self, connection_id: u32, channel_count: u8) {
        if self.state != PeerState::Outgoing {
            tracing::trace!("Duplicate connect accept from {}", self.remote_address);
            return;
        }

        self.remote_connection_id = connection_id;
        self.negotiate_channel_count(channel_count);
        self.state = PeerState::Connected;
        self.events.push_back(PeerEvent::Connected);
        tracing::debug!(
            "Connected to {} (local id {}, remote id {}, {} channels)",
            self.remote_address,
            self.local_connection_id,
            self.remote_connection_id,
            self.channel_count
        );
    }

    fn on_data(
        &mut self,
        channel_id: u8,
        delivery: DeliveryMethod,
        sequence: SequenceNumber,
        fragment: Option<FragmentInfo>,
        payload: &Arc<[u8]>,
        time: Instant,
    ) {
        if !self.state.is_connected() {
            tracing::trace!("Dropping data from {} in state {:?}", self.remote_address, self.state);
            return;
        }
        if channel_id >= self.channel_count {
            tracing::trace!(
                "Dropping data for channel {} beyond negotiated count {}",
                channel_id,
                self.channel_count
            );
            return;
        }

        let released = self
            .channel_mut(channel_id, delivery)
            .on_data(sequence, fragment, Arc::clone(payload));

        for message in released {
            let complete = match message.fragment {
                None => Some(message.payload),
                Some(info) => self
                    .fragments
                    .insert(channel_id, delivery, info, message.payload, time)
                    .map(Arc::from),
            };
            if let Some(payload) = complete {
                self.statistics.messages_received += 1;
                self.events.push_back(PeerEvent::Message { channel_id, delivery, payload });
            }
        }
    }

    fn on_pong(&mut self, sequence: u16, time: Instant) {
        match self.outstanding_ping {
            Some((expected, sent)) if expected == sequence => {
                self.outstanding_ping = None;
                self.rtt.update(time.saturating_duration_since(sent));
                self.events.push_back(PeerEvent::LatencyUpdate(self.rtt.rtt()));
            }
            _ => tracing::trace!("Ignoring stale pong {} from {}", sequence, self.remote_address),
        }
    }
}
