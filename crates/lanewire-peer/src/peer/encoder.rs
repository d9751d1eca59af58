use std::time::Instant;

use lanewire_core::constants::DATAGRAM_HEADER_SIZE;
use lanewire_protocol::{
    command::{Datagram, ProtocolCommand},
    command_codec::CommandEncoder,
};

use super::Peer;

impl Peer {
    /// Collects everything due now and encodes it into datagrams of at most `mtu` bytes.
    ///
    /// Control commands go first, then per channel the pending acknowledgment followed by
    /// new and retransmitted data. Commands are packed greedily, in that order.
    pub fn flush(&mut self, time: Instant) -> Vec<Vec<u8>> {
        let commands = self.collect_outgoing(time);
        if commands.is_empty() {
            return Vec::new();
        }

        let mut encoded = Vec::new();
        for datagram in self.pack(commands) {
            match CommandEncoder::encode_datagram(&datagram) {
                Ok(bytes) => {
                    self.statistics.datagrams_sent += 1;
                    self.statistics.bytes_sent += bytes.len() as u64;
                    encoded.push(bytes);
                }
                Err(error) => {
                    tracing::error!("Failed to encode datagram for {}: {}", self.remote_address, error);
                }
            }
        }

        if !encoded.is_empty() {
            self.last_sent = time;
        }
        encoded
    }

    /// Returns true if the next flush has something to send without any timer firing.
    pub fn has_queued_commands(&self) -> bool {
        !self.command_queue.is_empty()
    }

    fn collect_outgoing(&mut self, time: Instant) -> Vec<ProtocolCommand> {
        let mut commands: Vec<ProtocolCommand> = self.command_queue.drain().collect();

        if self.state.is_connected() {
            let resend_delay = self.resend_delay();
            for channel in self.channels.iter_mut().flatten() {
                if let Some(ack) = channel.take_ack() {
                    commands.push(ack);
                }
                commands.extend(channel.poll_outgoing(time, resend_delay));
            }
        }
        commands
    }

    /// Splits commands into datagrams no larger than the MTU, keeping their order.
    fn pack(&self, commands: Vec<ProtocolCommand>) -> Vec<Datagram> {
        let header = self.remote_connection_id;
        let mut datagrams = Vec::new();
        let mut current = Datagram::new(header);
        let mut current_len = DATAGRAM_HEADER_SIZE;

        for command in commands {
            let framed = command.framed_len();
            if DATAGRAM_HEADER_SIZE + framed > self.mtu {
                tracing::warn!(
                    "Command too large for MTU: command type {}, encoded size {} bytes, max allowed {} bytes. Dropping command.",
                    command.command_type(),
                    framed,
                    self.mtu
                );
                continue;
            }

            if current_len + framed > self.mtu || current.len() == u8::MAX as usize {
                datagrams.push(std::mem::replace(&mut current, Datagram::new(header)));
                current_len = DATAGRAM_HEADER_SIZE;
            }
            current_len += framed;
            current.add_command(command);
        }

        if !current.is_empty() {
            datagrams.push(current);
        }
        datagrams
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Instant};

    use lanewire_core::config::Config;
    use lanewire_protocol::{command_codec::CommandDecoder, packet::DeliveryMethod};

    use super::*;

    fn connected_peer(mtu: usize, now: Instant) -> Peer {
        let config = Config::default();
        let mut peer = Peer::incoming("127.0.0.1:0".parse().unwrap(), 1, 77, 4, &config, mtu, now);
        peer.accept(now);
        peer
    }

    #[test]
    fn test_flush_addresses_remote_connection_id() {
        let now = Instant::now();
        let mut peer = connected_peer(1200, now);

        let datagrams = peer.flush(now);
        assert_eq!(datagrams.len(), 1);

        let datagram = CommandDecoder::decode_datagram(&datagrams[0]).unwrap();
        assert_eq!(datagram.connection_id, 77);
        assert!(matches!(datagram.commands[0], ProtocolCommand::ConnectAccept { connection_id: 1, .. }));
        assert!(!peer.has_queued_commands());
    }

    #[test]
    fn test_empty_flush_produces_nothing() {
        let now = Instant::now();
        let mut peer = connected_peer(1200, now);
        peer.flush(now);

        assert!(peer.flush(now).is_empty());
        assert_eq!(peer.statistics().datagrams_sent, 1);
    }

    #[test]
    fn test_control_commands_precede_data() {
        let now = Instant::now();
        let mut peer = connected_peer(1200, now);
        peer.send(0, DeliveryMethod::Unreliable, Arc::from(vec![1u8, 2, 3])).unwrap();

        let datagrams = peer.flush(now);
        let commands = CommandDecoder::decode_datagram(&datagrams[0]).unwrap().commands;

        assert_eq!(commands.len(), 2);
        assert!(matches!(commands[0], ProtocolCommand::ConnectAccept { .. }));
        assert!(matches!(commands[1], ProtocolCommand::Data { .. }));
    }
}
