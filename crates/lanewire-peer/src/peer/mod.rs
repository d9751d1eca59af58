use std::{
    collections::VecDeque,
    fmt,
    net::SocketAddr,
    sync::Arc,
    time::{Duration, Instant},
};

use lanewire_core::{config::Config, constants::PROTOCOL_VERSION, error::Result};
use lanewire_protocol::{
    channel::{Channel, ChannelCounters},
    command::{Datagram, ProtocolCommand},
    packet::DeliveryMethod,
    rtt::RttEstimator,
};

use crate::{
    command_queue::CommandQueue,
    disconnect::{DisconnectInfo, DisconnectReason},
    fragment_buffer::FragmentAssembler,
    peer_state::PeerState,
    statistics::PeerStatistics,
};

mod command_processor;
mod encoder;
mod fragmenter;

/// Number of delivery methods, i.e. channel slots per channel id.
const DELIVERY_METHODS: usize = DeliveryMethod::ALL.len();

/// Something the application must learn about, produced while processing or updating a peer.
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    /// The handshake completed
    Connected,
    /// A complete message arrived
    Message {
        /// Channel the message arrived on
        channel_id: u8,
        /// Delivery method of that channel
        delivery: DeliveryMethod,
        /// Reassembled payload
        payload: Arc<[u8]>,
    },
    /// A ping round trip completed; carries the smoothed RTT
    LatencyUpdate(Duration),
    /// The connection ended; emitted exactly once
    Disconnected(DisconnectInfo),
}

/// Represents a remote peer in the network.
/// Tracks the handshake, owns the channels, and schedules what goes on the wire.
pub struct Peer {
    /// Last time we received a datagram from this peer
    pub last_heard: Instant,
    /// Last time we sent a datagram to this peer
    pub last_sent: Instant,
    /// The address of the remote endpoint
    pub remote_address: SocketAddr,

    /// Current connection state
    state: PeerState,
    /// Id the remote puts in the header of datagrams meant for us
    local_connection_id: u32,
    /// Id we put in the header of datagrams meant for the remote (0 until known)
    remote_connection_id: u32,

    /// Configuration parameters for this peer
    config: Config,
    /// Largest datagram this peer may produce, packet layer overhead already removed
    mtu: usize,
    /// Negotiated number of channel ids
    channel_count: u8,
    /// Channels indexed by `channel_id * DELIVERY_METHODS + delivery`, created on first use
    channels: Vec<Option<Channel>>,
    /// Fragment reassembly for all channels of this peer
    fragments: FragmentAssembler,
    /// Group id handed to the next fragmented message
    next_fragment_group: u16,

    /// Control commands waiting for the next flush
    command_queue: CommandQueue,
    /// Events waiting to be drained by the host
    events: VecDeque<PeerEvent>,
    /// Round trip estimation, fed by pongs and first-transmission acks
    rtt: RttEstimator,

    // Connect request retries
    connect_key: Arc<[u8]>,
    connect_attempts: u32,
    last_connect_sent: Option<Instant>,

    // Keep-alive
    ping_sequence: u16,
    last_ping_sent: Option<Instant>,
    outstanding_ping: Option<(u16, Instant)>,

    // Local shutdown
    shutdown_started: Option<Instant>,
    last_shutdown_sent: Option<Instant>,
    shutdown_data: Arc<[u8]>,

    /// Datagram level counters; channel counters are added on request
    statistics: PeerStatistics,
}

impl Peer {
    /// Creates the initiating side of a connection. The connect request goes out on the
    /// first update.
    ///
    /// Fails with `PayloadTooLarge` when `key` does not fit in a single connect request.
    pub fn outgoing(
        addr: SocketAddr,
        local_connection_id: u32,
        key: Arc<[u8]>,
        config: &Config,
        mtu: usize,
        time: Instant,
    ) -> Result<Peer> {
        let mut peer = Peer::new(addr, local_connection_id, config, mtu, time);
        let key_len = key.len();
        peer.connect_key = key;
        Datagram::single(0, peer.connect_request()).ensure_fits(mtu, key_len)?;
        Ok(peer)
    }

    /// Creates the listening side of a connection from a received connect request.
    /// The channel count is negotiated down to what both sides support.
    pub fn incoming(
        addr: SocketAddr,
        local_connection_id: u32,
        remote_connection_id: u32,
        remote_channel_count: u8,
        config: &Config,
        mtu: usize,
        time: Instant,
    ) -> Peer {
        let mut peer = Peer::new(addr, local_connection_id, config, mtu, time);
        peer.state = PeerState::ConnectingIncoming;
        peer.remote_connection_id = remote_connection_id;
        peer.negotiate_channel_count(remote_channel_count);
        peer
    }

    fn new(addr: SocketAddr, local_connection_id: u32, config: &Config, mtu: usize, time: Instant) -> Peer {
        let channel_count = config.channel_count.max(1);
        Peer {
            last_heard: time,
            last_sent: time,
            remote_address: addr,
            state: PeerState::Outgoing,
            local_connection_id,
            remote_connection_id: 0,
            config: config.to_owned(),
            mtu,
            channel_count,
            channels: (0..channel_count as usize * DELIVERY_METHODS).map(|_| None).collect(),
            fragments: FragmentAssembler::new(config.max_fragments, config.fragment_timeout),
            next_fragment_group: 0,
            command_queue: CommandQueue::default(),
            events: VecDeque::new(),
            rtt: RttEstimator::new(config.rtt_smoothing_factor),
            connect_key: Arc::from(Vec::new()),
            connect_attempts: 0,
            last_connect_sent: None,
            ping_sequence: 0,
            last_ping_sent: None,
            outstanding_ping: None,
            shutdown_started: None,
            last_shutdown_sent: None,
            shutdown_data: Arc::from(Vec::new()),
            statistics: PeerStatistics::default(),
        }
    }

    /// Completes the listening side of the handshake: the peer becomes connected and
    /// a connect accept is queued.
    pub fn accept(&mut self, time: Instant) {
        if self.state != PeerState::ConnectingIncoming {
            return;
        }
        self.state = PeerState::Connected;
        self.last_heard = time;
        self.queue_connect_accept();
        self.events.push_back(PeerEvent::Connected);
        tracing::debug!(
            "Accepted {} (local id {}, remote id {}, {} channels)",
            self.remote_address,
            self.local_connection_id,
            self.remote_connection_id,
            self.channel_count
        );
    }

    /// Answers a retransmitted connect request whose accept got lost.
    pub fn resend_accept(&mut self) {
        if self.state.is_connected() {
            self.queue_connect_accept();
        }
    }

    fn queue_connect_accept(&mut self) {
        let accept = ProtocolCommand::ConnectAccept {
            connection_id: self.local_connection_id,
            channel_count: self.channel_count,
        };
        if !self.command_queue.contains_type(accept.command_type()) {
            self.command_queue.enqueue(accept);
        }
    }

    /// Returns the current peer state
    pub fn state(&self) -> PeerState {
        self.state
    }

    /// Returns if the connection has been established
    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    /// Id the remote uses to address us.
    pub fn local_connection_id(&self) -> u32 {
        self.local_connection_id
    }

    /// Id we use to address the remote; 0 before the handshake completed.
    pub fn remote_connection_id(&self) -> u32 {
        self.remote_connection_id
    }

    /// Negotiated number of channel ids.
    pub fn channel_count(&self) -> u8 {
        self.channel_count
    }

    /// Largest datagram this peer produces.
    pub fn mtu(&self) -> usize {
        self.mtu
    }

    /// Returns the configuration for this peer.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the smoothed round-trip time.
    pub fn rtt(&self) -> Duration {
        self.rtt.rtt()
    }

    /// Current interval between retransmissions of an unacknowledged reliable packet.
    pub fn resend_delay(&self) -> Duration {
        self.rtt.resend_delay(
            self.config.resend_base_delay,
            self.config.resend_rtt_factor,
            self.config.max_resend_delay,
        )
    }

    /// Returns a [Duration] representing the interval since we last heard from the peer
    pub fn last_heard(&self, time: Instant) -> Duration {
        time.saturating_duration_since(self.last_heard)
    }

    /// Returns a [Duration] representing the interval since we last sent to the peer
    pub fn last_sent(&self, time: Instant) -> Duration {
        time.saturating_duration_since(self.last_sent)
    }

    /// Returns true while any channel holds queued or unacknowledged messages.
    pub fn has_pending_messages(&self) -> bool {
        self.channels.iter().flatten().any(Channel::has_pending)
    }

    /// Number of fragment groups waiting for more fragments.
    pub fn pending_fragment_groups(&self) -> usize {
        self.fragments.len()
    }

    /// Returns the statistics of this peer, channel counters included.
    pub fn statistics(&self) -> PeerStatistics {
        let mut statistics = self.statistics.clone();
        for channel in self.channels.iter().flatten() {
            add_channel_counters(&mut statistics, channel.counters());
        }
        statistics
    }

    /// Takes every event produced since the last call.
    pub fn drain_events(&mut self) -> impl Iterator<Item = PeerEvent> + '_ {
        self.events.drain(..)
    }

    // ===== Timers =====

    /// Advances timers: connect retries, keep-alive pings, timeouts, shutdown retries and
    /// stale fragment eviction.
    pub fn update(&mut self, time: Instant) {
        match self.state {
            PeerState::Outgoing => self.update_connecting(time),
            PeerState::ConnectingIncoming | PeerState::Connected => {
                if self.last_heard(time) > self.config.disconnect_timeout {
                    tracing::debug!(
                        "Peer {} silent for {:?}, disconnecting",
                        self.remote_address,
                        self.last_heard(time)
                    );
                    self.disconnect_with(DisconnectInfo::new(DisconnectReason::Timeout));
                    return;
                }
                if self.state.is_connected() {
                    self.update_ping(time);
                    self.fragments.cleanup_stale(time);
                }
            }
            PeerState::ShutdownRequested => self.update_shutdown(time),
            PeerState::Disconnected => {}
        }
    }

    fn update_connecting(&mut self, time: Instant) {
        let due = self
            .last_connect_sent
            .map_or(true, |sent| time.saturating_duration_since(sent) >= self.config.reconnect_delay);
        if !due {
            return;
        }

        if self.connect_attempts >= self.config.max_connect_attempts {
            tracing::debug!(
                "No answer from {} after {} connect requests",
                self.remote_address,
                self.connect_attempts
            );
            self.disconnect_with(DisconnectInfo::new(DisconnectReason::ConnectionFailed));
            return;
        }

        self.connect_attempts += 1;
        self.last_connect_sent = Some(time);
        let request = self.connect_request();
        self.command_queue.enqueue(request);
    }

    fn connect_request(&self) -> ProtocolCommand {
        ProtocolCommand::ConnectRequest {
            protocol_version: PROTOCOL_VERSION,
            connection_id: self.local_connection_id,
            channel_count: self.config.channel_count,
            key: Arc::clone(&self.connect_key),
        }
    }

    fn update_ping(&mut self, time: Instant) {
        let due = self
            .last_ping_sent
            .map_or(true, |sent| time.saturating_duration_since(sent) >= self.config.ping_interval);
        if !due {
            return;
        }

        self.ping_sequence = self.ping_sequence.wrapping_add(1);
        self.last_ping_sent = Some(time);
        self.outstanding_ping = Some((self.ping_sequence, time));
        self.command_queue.enqueue(ProtocolCommand::Ping { sequence: self.ping_sequence });
    }

    fn update_shutdown(&mut self, time: Instant) {
        let started = self.shutdown_started.unwrap_or(time);
        if time.saturating_duration_since(started) >= self.config.shutdown_timeout {
            tracing::debug!("Shutdown of {} not acknowledged in time", self.remote_address);
            let data = Arc::clone(&self.shutdown_data);
            self.disconnect_with(DisconnectInfo::with_data(DisconnectReason::DisconnectPeerCalled, data));
            return;
        }

        let resend_delay = self.resend_delay();
        let due = self
            .last_shutdown_sent
            .map_or(true, |sent| time.saturating_duration_since(sent) >= resend_delay);
        if due {
            self.last_shutdown_sent = Some(time);
            self.command_queue.enqueue(ProtocolCommand::Shutdown { data: Arc::clone(&self.shutdown_data) });
        }
    }

    // ===== Disconnect =====

    /// Starts a local disconnect.
    ///
    /// A connected peer releases its channels, sends `Shutdown` and waits for the remote
    /// acknowledgment (or the shutdown timeout) before reporting the disconnect. A peer still
    /// connecting is disconnected at once. Calling this again has no effect.
    ///
    /// Fails with `PayloadTooLarge`, leaving the connection untouched, when `data` does
    /// not fit in a single shutdown datagram.
    pub fn disconnect(&mut self, data: Arc<[u8]>, time: Instant) -> Result<()> {
        match self.state {
            PeerState::Outgoing => {
                self.disconnect_with(DisconnectInfo::with_data(DisconnectReason::DisconnectPeerCalled, data));
            }
            PeerState::ConnectingIncoming | PeerState::Connected => {
                let shutdown = ProtocolCommand::Shutdown { data: Arc::clone(&data) };
                Datagram::single(self.remote_connection_id, shutdown).ensure_fits(self.mtu, data.len())?;
                self.release_channels();
                self.state = PeerState::ShutdownRequested;
                self.shutdown_started = Some(time);
                self.last_shutdown_sent = Some(time);
                self.shutdown_data = Arc::clone(&data);
                self.command_queue.enqueue(ProtocolCommand::Shutdown { data });
            }
            PeerState::ShutdownRequested | PeerState::Disconnected => {}
        }
        Ok(())
    }

    /// The remote answered with `PeerNotFound` for the id we address it with.
    pub fn on_peer_not_found(&mut self) {
        self.disconnect_with(DisconnectInfo::new(DisconnectReason::PeerNotFound));
    }

    /// Ends the connection at once without waiting for the remote.
    ///
    /// Used by the host when a reconnect replaces this peer or when it stops. Any shutdown
    /// payload given to an earlier [`Peer::disconnect`] is reported with the event.
    pub fn close(&mut self, reason: DisconnectReason) {
        let data = Arc::clone(&self.shutdown_data);
        self.disconnect_with(DisconnectInfo::with_data(reason, data));
    }

    /// Moves to the terminal state, releasing every channel and fragment group.
    ///
    /// Only acknowledgments owed to the remote stay queued for the final flush.
    pub(crate) fn disconnect_with(&mut self, info: DisconnectInfo) {
        if self.state.is_disconnected() {
            return;
        }
        tracing::debug!("Peer {} disconnected: {}", self.remote_address, info.reason);

        self.state = PeerState::Disconnected;
        self.release_channels();
        self.command_queue.retain(|command| matches!(command, ProtocolCommand::ShutdownOk));
        self.outstanding_ping = None;
        self.events.push_back(PeerEvent::Disconnected(info));
    }

    fn release_channels(&mut self) {
        for channel in self.channels.iter_mut().filter_map(Option::take) {
            add_channel_counters(&mut self.statistics, channel.counters());
        }
        self.fragments.clear();
    }

    // ===== Channels =====

    fn negotiate_channel_count(&mut self, remote_channel_count: u8) {
        let negotiated = self.config.channel_count.min(remote_channel_count).max(1);
        if negotiated < self.channel_count {
            let keep = negotiated as usize * DELIVERY_METHODS;
            for channel in self.channels.drain(keep..).flatten() {
                if channel.has_pending() {
                    tracing::debug!(
                        "Dropping pending messages on channel {} beyond negotiated count {}",
                        channel.channel_id(),
                        negotiated
                    );
                }
                add_channel_counters(&mut self.statistics, channel.counters());
            }
        }
        self.channel_count = negotiated;
    }

    fn channel_mut(&mut self, channel_id: u8, delivery: DeliveryMethod) -> &mut Channel {
        let index = channel_id as usize * DELIVERY_METHODS + delivery.index();
        let max_pending = self.config.max_pending_messages;
        self.channels[index].get_or_insert_with(|| Channel::new(channel_id, delivery, max_pending))
    }
}

fn add_channel_counters(statistics: &mut PeerStatistics, counters: ChannelCounters) {
    statistics.packets_sent += counters.sent;
    statistics.retransmissions += counters.retransmitted;
    statistics.duplicates += counters.duplicates;
}

impl fmt::Debug for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} ({:?}, id {})",
            self.remote_address.ip(),
            self.remote_address.port(),
            self.state,
            self.local_connection_id
        )
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use lanewire_core::{config::Config, error::ErrorKind};
    use lanewire_protocol::{
        command::{Datagram, ProtocolCommand},
        command_codec::CommandDecoder,
    };

    use super::*;

    fn get_fake_addr() -> std::net::SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    fn decode_all(datagrams: &[Vec<u8>]) -> Vec<ProtocolCommand> {
        datagrams
            .iter()
            .flat_map(|bytes| CommandDecoder::decode_datagram(bytes).unwrap().commands)
            .collect()
    }

    fn connected_pair(config: &Config, now: Instant) -> (Peer, Peer) {
        let mtu = config.mtu as usize;
        let mut client = Peer::outgoing(get_fake_addr(), 11, Arc::from(vec![]), config, mtu, now).unwrap();
        let mut server = Peer::incoming(get_fake_addr(), 22, 11, config.channel_count, config, mtu, now);
        server.accept(now);

        for bytes in server.flush(now) {
            let datagram = CommandDecoder::decode_datagram(&bytes).unwrap();
            client.process_datagram(&datagram, bytes.len(), now);
        }
        assert!(client.is_connected());
        client.drain_events().for_each(drop);
        server.drain_events().for_each(drop);
        (client, server)
    }

    #[test]
    fn test_connect_request_retries_then_fails() {
        let mut config = Config::default();
        config.max_connect_attempts = 3;
        config.reconnect_delay = Duration::from_millis(100);
        let start = Instant::now();
        let mut peer = Peer::outgoing(get_fake_addr(), 7, Arc::from(vec![1u8]), &config, 1200, start).unwrap();

        let mut requests = 0;
        for step in 0..10 {
            let time = start + Duration::from_millis(100 * step);
            peer.update(time);
            requests += decode_all(&peer.flush(time))
                .iter()
                .filter(|c| matches!(c, ProtocolCommand::ConnectRequest { .. }))
                .count();
        }

        assert_eq!(requests, 3);
        assert_eq!(peer.state(), PeerState::Disconnected);
        let events: Vec<_> = peer.drain_events().collect();
        assert_eq!(
            events,
            vec![PeerEvent::Disconnected(DisconnectInfo::new(DisconnectReason::ConnectionFailed))]
        );
    }

    #[test]
    fn test_connect_accept_negotiates_channel_count() {
        let mut config = Config::default();
        config.channel_count = 8;
        let now = Instant::now();
        let mut peer = Peer::outgoing(get_fake_addr(), 7, Arc::from(vec![]), &config, 1200, now).unwrap();

        let accept = Datagram::single(7, ProtocolCommand::ConnectAccept { connection_id: 99, channel_count: 2 });
        peer.process_datagram(&accept, 16, now);

        assert!(peer.is_connected());
        assert_eq!(peer.channel_count(), 2);
        assert_eq!(peer.remote_connection_id(), 99);
        assert_eq!(peer.drain_events().collect::<Vec<_>>(), vec![PeerEvent::Connected]);
    }

    #[test]
    fn test_timeout_disconnects_silent_peer() {
        let config = Config::default();
        let now = Instant::now();
        let (mut client, _server) = connected_pair(&config, now);

        client.update(now + config.disconnect_timeout + Duration::from_millis(1));

        assert_eq!(client.state(), PeerState::Disconnected);
        assert_eq!(
            client.drain_events().collect::<Vec<_>>(),
            vec![PeerEvent::Disconnected(DisconnectInfo::new(DisconnectReason::Timeout))]
        );
    }

    #[test]
    fn test_ping_pong_updates_latency() {
        let config = Config::default();
        let now = Instant::now();
        let (mut client, mut server) = connected_pair(&config, now);

        client.update(now);
        for bytes in client.flush(now) {
            let datagram = CommandDecoder::decode_datagram(&bytes).unwrap();
            server.process_datagram(&datagram, bytes.len(), now);
        }

        let later = now + Duration::from_millis(40);
        for bytes in server.flush(later) {
            let datagram = CommandDecoder::decode_datagram(&bytes).unwrap();
            client.process_datagram(&datagram, bytes.len(), later);
        }

        assert_eq!(client.rtt(), Duration::from_millis(40));
        assert_eq!(
            client.drain_events().collect::<Vec<_>>(),
            vec![PeerEvent::LatencyUpdate(Duration::from_millis(40))]
        );
    }

    #[test]
    fn test_graceful_shutdown_handshake() {
        let config = Config::default();
        let now = Instant::now();
        let (mut client, mut server) = connected_pair(&config, now);

        client.disconnect(Arc::from(vec![5u8]), now).unwrap();
        assert_eq!(client.state(), PeerState::ShutdownRequested);
        assert!(client.send(0, DeliveryMethod::ReliableOrdered, Arc::from(vec![1u8])).is_err());

        for bytes in client.flush(now) {
            let datagram = CommandDecoder::decode_datagram(&bytes).unwrap();
            server.process_datagram(&datagram, bytes.len(), now);
        }
        assert_eq!(
            server.drain_events().collect::<Vec<_>>(),
            vec![PeerEvent::Disconnected(DisconnectInfo::with_data(
                DisconnectReason::RemoteConnectionClose,
                Arc::from(vec![5u8])
            ))]
        );

        // The disconnected server still flushes its ShutdownOk
        let replies = server.flush(now);
        assert_eq!(decode_all(&replies), vec![ProtocolCommand::ShutdownOk]);
        for bytes in replies {
            let datagram = CommandDecoder::decode_datagram(&bytes).unwrap();
            client.process_datagram(&datagram, bytes.len(), now);
        }

        let events: Vec<_> = client.drain_events().collect();
        assert!(matches!(
            events.as_slice(),
            [PeerEvent::Disconnected(DisconnectInfo { reason: DisconnectReason::DisconnectPeerCalled, .. })]
        ));
    }

    #[test]
    fn test_unacknowledged_shutdown_times_out() {
        let config = Config::default();
        let now = Instant::now();
        let (mut client, _server) = connected_pair(&config, now);

        client.disconnect(Arc::from(vec![]), now).unwrap();
        client.update(now + config.shutdown_timeout);

        assert_eq!(client.state(), PeerState::Disconnected);
        let events: Vec<_> = client.drain_events().collect();
        assert!(matches!(
            events.as_slice(),
            [PeerEvent::Disconnected(DisconnectInfo { reason: DisconnectReason::DisconnectPeerCalled, .. })]
        ));

        // Terminal and idempotent
        client.disconnect(Arc::from(vec![]), now).unwrap();
        client.on_peer_not_found();
        assert_eq!(client.drain_events().count(), 0);
    }

    #[test]
    fn test_oversized_shutdown_payload_is_refused() {
        let config = Config::default();
        let now = Instant::now();
        let (mut client, mut server) = connected_pair(&config, now);

        let result = client.disconnect(Arc::from(vec![9u8; 2000]), now);
        assert!(matches!(result, Err(ErrorKind::PayloadTooLarge { size: 2000, .. })));
        assert!(client.is_connected());
        assert_eq!(client.drain_events().count(), 0);

        // A payload that fits still closes the connection on both sides.
        client.disconnect(Arc::from(vec![9u8; 100]), now).unwrap();
        for bytes in client.flush(now) {
            let datagram = CommandDecoder::decode_datagram(&bytes).unwrap();
            server.process_datagram(&datagram, bytes.len(), now);
        }
        assert_eq!(
            server.drain_events().collect::<Vec<_>>(),
            vec![PeerEvent::Disconnected(DisconnectInfo::with_data(
                DisconnectReason::RemoteConnectionClose,
                Arc::from(vec![9u8; 100])
            ))]
        );
    }

    #[test]
    fn test_oversized_connect_key_is_refused() {
        let config = Config::default();
        let now = Instant::now();

        let result = Peer::outgoing(get_fake_addr(), 5, Arc::from(vec![1u8; 1500]), &config, 1200, now);
        assert!(matches!(result, Err(ErrorKind::PayloadTooLarge { size: 1500, .. })));

        let mut peer = Peer::outgoing(get_fake_addr(), 5, Arc::from(vec![1u8; 1000]), &config, 1200, now).unwrap();
        peer.update(now);
        let requests = decode_all(&peer.flush(now));
        assert!(matches!(requests.as_slice(), [ProtocolCommand::ConnectRequest { key, .. }] if key.len() == 1000));
    }

    #[test]
    fn test_disconnect_while_connecting_is_immediate() {
        let config = Config::default();
        let now = Instant::now();
        let mut peer = Peer::outgoing(get_fake_addr(), 3, Arc::from(vec![]), &config, 1200, now).unwrap();

        peer.disconnect(Arc::from(vec![]), now).unwrap();
        assert_eq!(peer.state(), PeerState::Disconnected);
    }

    #[test]
    fn test_close_keeps_shutdown_payload() {
        let config = Config::default();
        let now = Instant::now();
        let (mut client, _server) = connected_pair(&config, now);

        client.disconnect(Arc::from(b"bye".to_vec()), now).unwrap();
        client.close(DisconnectReason::DisconnectPeerCalled);

        let events: Vec<_> = client.drain_events().collect();
        assert_eq!(
            events,
            vec![PeerEvent::Disconnected(DisconnectInfo::with_data(
                DisconnectReason::DisconnectPeerCalled,
                Arc::from(b"bye".to_vec()),
            ))]
        );
        assert!(client.flush(now).is_empty());
    }

    #[test]
    fn test_flushed_datagrams_respect_mtu() {
        let mut config = Config::default();
        config.mtu = 200;
        let now = Instant::now();
        let (mut client, _server) = connected_pair(&config, now);

        for i in 0..50u8 {
            client.send(0, DeliveryMethod::ReliableUnordered, Arc::from(vec![i; 40])).unwrap();
        }
        let datagrams = client.flush(now);

        assert!(datagrams.len() > 1);
        assert!(datagrams.iter().all(|d| d.len() <= 200));
        let data_commands = decode_all(&datagrams)
            .into_iter()
            .filter(|c| matches!(c, ProtocolCommand::Data { .. }))
            .count();
        assert_eq!(data_commands, 50);
        assert_eq!(client.statistics().packets_sent, 50);
    }
}
