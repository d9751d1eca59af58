use std::{
    collections::{hash_map::Entry, HashMap},
    io,
    net::{Ipv4Addr, SocketAddr, SocketAddrV4},
    sync::Arc,
    time::Instant,
};

use crossbeam_channel::{unbounded, Receiver, Sender};
use lanewire_core::{
    config::Config,
    constants::PROTOCOL_VERSION,
    error::{ErrorKind, Result},
    layer::LayerStack,
    transport::Socket as TransportSocket,
};
use lanewire_peer::{DisconnectInfo, DisconnectReason, Peer, PeerState};
use lanewire_protocol::{
    command::{Datagram, ProtocolCommand},
    command_codec::{CommandDecoder, CommandEncoder},
    packet::{DeliveryMethod, Packet, UnconnectedKind},
};
use tracing::{debug, error, trace, warn};

use crate::{
    connection_id::ConnectionIds,
    connection_request::{ConnectionRequest, Decision, RequestDecision},
    controller::HostController,
    event_types::{Action, HostCommand, PeerHandle, SocketEvent},
    peer_session::PeerSession,
};

// ============================================================================
// Event Sink (Internal)
// ============================================================================

/// Minimal event sink abstraction to decouple from a concrete channel.
trait EventSink<E> {
    fn send(&mut self, event: E);
}

/// Channel-backed event sink using crossbeam `Sender`.
#[derive(Debug)]
struct ChannelSink<E>(Sender<E>);

impl<E> EventSink<E> for ChannelSink<E> {
    fn send(&mut self, event: E) {
        if self.0.send(event).is_err() {
            error!("Event receiver is gone, dropping event");
        }
    }
}

/// Owns the socket and the packet layers; buffers outgoing datagrams and user events
/// until the end of a pass.
struct Messenger<TSocket: TransportSocket> {
    socket: TSocket,
    layers: LayerStack,
    event_sender: ChannelSink<SocketEvent>,
    pending_sends: Vec<(SocketAddr, Vec<u8>)>,
    pending_events: Vec<SocketEvent>,
}

impl<TSocket: TransportSocket> std::fmt::Debug for Messenger<TSocket> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Messenger")
            .field("socket", &"<socket>")
            .field("layers", &self.layers)
            .field("pending_sends", &self.pending_sends.len())
            .field("pending_events", &self.pending_events)
            .finish()
    }
}

impl<TSocket: TransportSocket> Messenger<TSocket> {
    fn handle_actions(&mut self, address: &SocketAddr, actions: Vec<Action<SocketEvent>>) {
        for action in actions {
            match action {
                Action::Send(bytes) => self.pending_sends.push((*address, bytes)),
                Action::Emit(event) => self.pending_events.push(event),
            }
        }
    }

    fn send_datagram(&mut self, address: SocketAddr, datagram: &Datagram) {
        match CommandEncoder::encode_datagram(datagram) {
            Ok(bytes) => self.pending_sends.push((address, bytes)),
            Err(err) => error!("Failed to encode datagram for {}: {}", address, err),
        }
    }

    fn emit(&mut self, event: SocketEvent) {
        self.pending_events.push(event);
    }

    fn flush(&mut self) {
        for (addr, mut payload) in self.pending_sends.drain(..) {
            if !self.layers.process_outbound(&addr, &mut payload) {
                trace!("Packet layer dropped outgoing datagram to {}", addr);
                continue;
            }
            if let Err(err) = self.socket.send_packet(&addr, &payload) {
                error!("Error occured sending a packet (to {}): {}", addr, err)
            }
        }
        for event in self.pending_events.drain(..) {
            self.event_sender.send(event);
        }
    }
}

/// Connect request waiting for the application's decision.
#[derive(Debug)]
struct PendingRequest {
    connection_id: u32,
    channel_count: u8,
    received_at: Instant,
}

/// Forced rejection retransmitted until the remote acknowledges it.
#[derive(Debug)]
struct PendingRejection {
    connection_id: u32,
    data: Arc<[u8]>,
    attempts: u32,
    last_sent: Instant,
}

/// What is left of a removed peer, so late shutdown traffic still gets acknowledged.
#[derive(Debug)]
struct Tombstone {
    local_connection_id: u32,
    remote_connection_id: u32,
    removed_at: Instant,
}

/// Connection orchestrator over a datagram socket.
///
/// Owns the peers keyed by remote address, runs the connect/accept/reject handshake,
/// routes datagrams by connection id and drives every peer's timers. All work happens
/// inside [`pump`](SessionManager::pump) and [`tick`](SessionManager::tick); user events
/// come out of [`event_receiver`](SessionManager::event_receiver).
#[derive(Debug)]
pub struct SessionManager<TSocket: TransportSocket> {
    config: Config,
    /// Datagram size handed to peers, packet layer overhead already removed
    mtu: usize,
    peers: HashMap<SocketAddr, Peer>,
    pending_requests: HashMap<SocketAddr, PendingRequest>,
    pending_rejections: HashMap<SocketAddr, PendingRejection>,
    tombstones: HashMap<SocketAddr, Tombstone>,
    connection_ids: ConnectionIds,
    receive_buffer: Vec<u8>,
    messenger: Messenger<TSocket>,
    event_receiver: Receiver<SocketEvent>,
    decision_sender: Sender<RequestDecision>,
    decision_receiver: Receiver<RequestDecision>,
    command_sender: Sender<HostCommand>,
    command_receiver: Receiver<HostCommand>,
    stopped: bool,
}

impl<TSocket: TransportSocket> SessionManager<TSocket> {
    /// Creates a new session manager without packet layers.
    pub fn new(socket: TSocket, config: Config) -> Self {
        Self::with_layers(socket, config, LayerStack::new())
    }

    /// Creates a new session manager applying `layers` to every datagram.
    pub fn with_layers(socket: TSocket, config: Config, layers: LayerStack) -> Self {
        Self::with_connection_ids(socket, config, layers, ConnectionIds::new())
    }

    /// Creates a new session manager drawing local connection ids from `connection_ids`.
    pub fn with_connection_ids(
        socket: TSocket,
        config: Config,
        layers: LayerStack,
        connection_ids: ConnectionIds,
    ) -> Self {
        let (event_sender, event_receiver) = unbounded();
        let (decision_sender, decision_receiver) = unbounded();
        let (command_sender, command_receiver) = unbounded();
        let mtu = (config.mtu as usize).saturating_sub(layers.extra_size());

        SessionManager {
            receive_buffer: vec![0; config.receive_buffer_max_size],
            config,
            mtu,
            peers: HashMap::new(),
            pending_requests: HashMap::new(),
            pending_rejections: HashMap::new(),
            tombstones: HashMap::new(),
            connection_ids,
            messenger: Messenger {
                socket,
                layers,
                event_sender: ChannelSink(event_sender),
                pending_sends: Vec::new(),
                pending_events: Vec::new(),
            },
            event_receiver,
            decision_sender,
            decision_receiver,
            command_sender,
            command_receiver,
            stopped: false,
        }
    }

    /// Runs one full pass: [`pump`](Self::pump) followed by [`tick`](Self::tick).
    pub fn manual_poll(&mut self, time: Instant) {
        self.pump(time);
        self.tick(time);
    }

    /// Reads every available datagram, applies connection request decisions and queued
    /// controller commands.
    pub fn pump(&mut self, time: Instant) {
        if self.stopped {
            return;
        }

        loop {
            let (data, address) =
                match self.messenger.socket.receive_packet(self.receive_buffer.as_mut()) {
                    Ok((payload, address)) => (payload.to_vec(), address),
                    Err(e) => {
                        if e.kind() != io::ErrorKind::WouldBlock {
                            error!("Encountered an error receiving data: {:?}", e);
                        }
                        break;
                    }
                };

            if data.is_empty() {
                trace!("Dropping datagram from {}: {}", address, ErrorKind::ReceivedDataToShort);
            } else {
                self.process_incoming(address, data, time);
            }

            if self.messenger.socket.is_blocking_mode() {
                break;
            }
        }

        while let Ok(decision) = self.decision_receiver.try_recv() {
            self.apply_decision(decision, time);
        }

        while let Ok(command) = self.command_receiver.try_recv() {
            self.apply_command(command, time);
        }

        self.messenger.flush();
    }

    /// Advances every peer's timers, sends what is due and removes finished peers.
    pub fn tick(&mut self, time: Instant) {
        if self.stopped {
            return;
        }

        for (addr, peer) in self.peers.iter_mut() {
            peer.update(time);
            let mut actions = peer.send_actions(time);
            actions.extend(peer.event_actions());
            self.messenger.handle_actions(addr, actions);
        }

        let finished: Vec<SocketAddr> = self
            .peers
            .iter()
            .filter(|(_, peer)| peer.state().is_disconnected())
            .map(|(addr, _)| *addr)
            .collect();
        for addr in finished {
            self.remove_peer(addr, time);
        }

        self.expire_requests(time);
        self.retry_rejections(time);
        self.messenger.flush();
    }

    // ===== Application calls =====

    /// Starts connecting to `addr`, sending `key` with the request. Returns at once; the
    /// outcome arrives as a `Connect` or `Disconnect` event.
    ///
    /// Returns the existing handle when a connection to `addr` already exists. Fails with
    /// `PayloadTooLarge` when `key` does not fit in a connect request.
    pub fn connect(&mut self, addr: SocketAddr, key: Arc<[u8]>, time: Instant) -> Result<PeerHandle> {
        let connection_id = self.connection_ids.next_id();
        self.connect_with_id(addr, key, connection_id, time)
    }

    fn connect_with_id(
        &mut self,
        addr: SocketAddr,
        key: Arc<[u8]>,
        connection_id: u32,
        time: Instant,
    ) -> Result<PeerHandle> {
        if let Some(peer) = self.peers.get(&addr) {
            if !peer.state().is_disconnected() {
                debug!("Already connected or connecting to {}", addr);
                return Ok(peer.handle());
            }
        }

        let mut peer = Peer::outgoing(addr, connection_id, key, &self.config, self.mtu, time)?;
        self.remove_peer(addr, time);
        debug!("Connecting to {} with connection id {}", addr, connection_id);
        peer.update(time);
        let actions = peer.send_actions(time);
        self.messenger.handle_actions(&addr, actions);

        let handle = peer.handle();
        self.peers.insert(addr, peer);
        Ok(handle)
    }

    /// Queues a message for a connected peer.
    pub fn send(&mut self, packet: Packet) -> Result<()> {
        let addr = packet.addr();
        let peer = self.peers.get_mut(&addr).ok_or(ErrorKind::UnknownPeer(addr))?;
        peer.send(packet.channel_id(), packet.delivery(), packet.payload_arc())
    }

    /// Queues one message for every connected peer; returns how many accepted it.
    pub fn send_to_all(&mut self, channel_id: u8, delivery: DeliveryMethod, payload: Arc<[u8]>) -> usize {
        let mut sent = 0;
        for peer in self.peers.values_mut().filter(|peer| peer.is_connected()) {
            match peer.send(channel_id, delivery, Arc::clone(&payload)) {
                Ok(()) => sent += 1,
                Err(err) => debug!("Could not send to {}: {}", peer.remote_address, err),
            }
        }
        sent
    }

    /// Starts a graceful disconnect; `data` reaches the remote with its disconnect event.
    pub fn disconnect(&mut self, addr: SocketAddr, data: Arc<[u8]>, time: Instant) -> Result<()> {
        let peer = self.peers.get_mut(&addr).ok_or(ErrorKind::UnknownPeer(addr))?;
        peer.disconnect(data, time)
    }

    /// Sends a message outside any connection.
    pub fn send_unconnected(&mut self, addr: SocketAddr, data: Arc<[u8]>) -> Result<()> {
        if !self.config.unconnected_messages_enabled {
            return Err(ErrorKind::FeatureDisabled("unconnected messages"));
        }
        self.send_connectionless(addr, UnconnectedKind::BasicMessage, data)
    }

    /// Sends a message to every host listening on `port` of the local IPv4 network.
    pub fn broadcast(&mut self, port: u16, data: Arc<[u8]>) -> Result<()> {
        if !self.config.broadcast_enabled {
            return Err(ErrorKind::FeatureDisabled("broadcast"));
        }
        let addr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::BROADCAST, port));
        self.send_connectionless(addr, UnconnectedKind::Broadcast, data)
    }

    fn send_connectionless(&mut self, addr: SocketAddr, kind: UnconnectedKind, data: Arc<[u8]>) -> Result<()> {
        let size = data.len();
        let datagram = Datagram::single(0, ProtocolCommand::Unconnected { kind, data });
        datagram.ensure_fits(self.mtu, size)?;
        self.messenger.send_datagram(addr, &datagram);
        Ok(())
    }

    /// Disconnects every peer with a single shutdown datagram each and stops processing.
    ///
    /// Every live connection reports `DisconnectPeerCalled`. Later polls do nothing.
    pub fn stop(&mut self, time: Instant) {
        if self.stopped {
            return;
        }
        debug!("Stopping, disconnecting {} peers", self.peers.len());

        for (addr, peer) in self.peers.iter_mut() {
            if let Err(err) = peer.disconnect(Arc::from(Vec::new()), time) {
                warn!("Could not send shutdown to {}: {}", addr, err);
            }
            let mut actions = peer.send_actions(time);
            peer.close(DisconnectReason::DisconnectPeerCalled);
            actions.extend(peer.event_actions());
            self.messenger.handle_actions(addr, actions);
        }
        self.peers.clear();
        self.pending_requests.clear();
        self.pending_rejections.clear();
        self.tombstones.clear();
        self.stopped = true;
        self.messenger.flush();
    }

    /// Returns true once [`stop`](Self::stop) ran.
    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Returns a cloneable handle queueing commands for this manager from any thread.
    pub fn controller(&self) -> HostController {
        HostController::new(self.command_sender.clone(), self.connection_ids.clone())
    }

    /// Returns the event receiver for receiving session events.
    pub fn event_receiver(&self) -> &Receiver<SocketEvent> {
        &self.event_receiver
    }

    /// Returns the configuration this manager runs with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns a reference to the underlying socket.
    pub fn socket(&self) -> &TSocket {
        &self.messenger.socket
    }

    /// Returns the peer for `addr`, if any.
    pub fn peer(&self, addr: &SocketAddr) -> Option<&Peer> {
        self.peers.get(addr)
    }

    /// Returns the number of peers in any state.
    pub fn peers_count(&self) -> usize {
        self.peers.len()
    }

    /// Returns handles of every connected peer.
    pub fn connected_peers(&self) -> impl Iterator<Item = PeerHandle> + '_ {
        self.peers.values().filter(|peer| peer.is_connected()).map(|peer| peer.handle())
    }

    /// Returns the number of connected peers.
    pub fn connected_peers_count(&self) -> usize {
        self.peers.values().filter(|peer| peer.is_connected()).count()
    }

    /// Returns the number of connection requests waiting for a decision.
    pub fn pending_request_count(&self) -> usize {
        self.pending_requests.len()
    }

    /// Returns the number of forced rejections not yet acknowledged.
    pub fn pending_rejection_count(&self) -> usize {
        self.pending_rejections.len()
    }

    // ===== Inbound =====

    fn process_incoming(&mut self, addr: SocketAddr, mut data: Vec<u8>, time: Instant) {
        if !self.messenger.layers.process_inbound(&addr, &mut data) {
            trace!("Packet layer dropped datagram from {}", addr);
            return;
        }

        let datagram = match CommandDecoder::decode_datagram(&data) {
            Ok(datagram) => datagram,
            Err(err) => {
                trace!("Dropping malformed datagram from {}: {}", addr, err);
                return;
            }
        };

        if datagram.connection_id == 0 {
            for command in datagram.commands {
                self.process_connectionless(addr, command, time);
            }
        } else {
            self.process_connected(addr, &datagram, data.len(), time);
        }
    }

    fn process_connectionless(&mut self, addr: SocketAddr, command: ProtocolCommand, time: Instant) {
        match command {
            ProtocolCommand::ConnectRequest { protocol_version, connection_id, channel_count, key } => {
                self.on_connect_request(addr, protocol_version, connection_id, channel_count, key, time);
            }
            ProtocolCommand::Unconnected { kind, data } => {
                let enabled = match kind {
                    UnconnectedKind::BasicMessage => self.config.unconnected_messages_enabled,
                    UnconnectedKind::Broadcast => self.config.broadcast_enabled,
                };
                if enabled {
                    self.messenger.emit(SocketEvent::Unconnected { addr, payload: data, kind });
                } else {
                    trace!("Dropping {:?} from {}: disabled in configuration", kind, addr);
                }
            }
            ProtocolCommand::PeerNotFound { connection_id } => match self.peers.get_mut(&addr) {
                Some(peer) if connection_id != 0 && peer.remote_connection_id() == connection_id => {
                    debug!("{} does not know connection {}", addr, connection_id);
                    peer.on_peer_not_found();
                    let actions = peer.event_actions();
                    self.messenger.handle_actions(&addr, actions);
                }
                _ => trace!("Ignoring peer not found for connection {} from {}", connection_id, addr),
            },
            other => {
                trace!("Ignoring command {} without connection id from {}", other.command_type(), addr)
            }
        }
    }

    fn process_connected(&mut self, addr: SocketAddr, datagram: &Datagram, received_bytes: usize, time: Instant) {
        let connection_id = datagram.connection_id;

        if let Some(peer) = self.peers.get_mut(&addr) {
            if peer.local_connection_id() == connection_id {
                if peer.state() == PeerState::Outgoing && has_reliable_reject(datagram) {
                    self.messenger
                        .send_datagram(addr, &Datagram::single(connection_id, ProtocolCommand::ShutdownOk));
                }
                peer.process_datagram(datagram, received_bytes, time);
                let actions = peer.event_actions();
                self.messenger.handle_actions(&addr, actions);
                return;
            }
        }

        if let Some(rejection) = self.pending_rejections.get(&addr) {
            if rejection.connection_id == connection_id {
                if datagram.commands.iter().any(|c| matches!(c, ProtocolCommand::ShutdownOk)) {
                    debug!("{} acknowledged its rejection", addr);
                    self.pending_rejections.remove(&addr);
                }
                return;
            }
        }

        if let Some(tombstone) = self.tombstones.get(&addr) {
            if tombstone.local_connection_id == connection_id {
                let mut acks = Vec::new();
                for command in &datagram.commands {
                    match command {
                        ProtocolCommand::Shutdown { .. } => acks.push(tombstone.remote_connection_id),
                        ProtocolCommand::Reject { reliable: true, .. } => {
                            acks.push(tombstone.local_connection_id)
                        }
                        _ => {}
                    }
                }
                for header in acks {
                    self.messenger.send_datagram(addr, &Datagram::single(header, ProtocolCommand::ShutdownOk));
                }
                trace!("Late datagram for closed connection {} from {}", connection_id, addr);
                return;
            }
        }

        let expects_connection = datagram.commands.iter().any(|command| {
            matches!(
                command,
                ProtocolCommand::Data { .. }
                    | ProtocolCommand::Ack { .. }
                    | ProtocolCommand::Ping { .. }
                    | ProtocolCommand::Pong { .. }
                    | ProtocolCommand::ConnectAccept { .. }
            )
        });
        if expects_connection {
            debug!("No connection {} for {}, answering peer not found", connection_id, addr);
            self.messenger
                .send_datagram(addr, &Datagram::single(0, ProtocolCommand::PeerNotFound { connection_id }));
        } else {
            trace!("Ignoring datagram for unknown connection {} from {}", connection_id, addr);
        }
    }

    fn on_connect_request(
        &mut self,
        addr: SocketAddr,
        protocol_version: u16,
        connection_id: u32,
        channel_count: u8,
        key: Arc<[u8]>,
        time: Instant,
    ) {
        if protocol_version != PROTOCOL_VERSION {
            debug!(
                "Rejecting {}: protocol version {} (expected {})",
                addr, protocol_version, PROTOCOL_VERSION
            );
            self.send_reject(addr, connection_id, false, Arc::from(Vec::new()));
            return;
        }
        if connection_id == 0 {
            trace!("Ignoring connect request without connection id from {}", addr);
            return;
        }

        if let Some(peer) = self.peers.get_mut(&addr) {
            if peer.state() == PeerState::Outgoing {
                trace!("Ignoring connect request from {} while connecting to it", addr);
                return;
            }
            if peer.remote_connection_id() == connection_id {
                peer.resend_accept();
                return;
            }
            debug!(
                "{} reconnected with connection id {}, replacing connection {}",
                addr,
                connection_id,
                peer.local_connection_id()
            );
            peer.close(DisconnectReason::RemoteConnectionClose);
            self.remove_peer(addr, time);
        }

        match self.pending_rejections.get(&addr) {
            Some(rejection) if rejection.connection_id == connection_id => {
                let data = Arc::clone(&rejection.data);
                self.send_reject(addr, connection_id, true, data);
                return;
            }
            Some(_) => {
                self.pending_rejections.remove(&addr);
            }
            None => {}
        }

        match self.pending_requests.get(&addr) {
            Some(pending) if pending.connection_id == connection_id => {
                trace!("Request from {} is still waiting for a decision", addr);
                return;
            }
            Some(_) => {
                debug!("Replacing undecided request from {}", addr);
                self.pending_requests.remove(&addr);
            }
            None => {}
        }

        if self.pending_requests.len() >= self.config.max_pending_requests as usize {
            warn!(
                "Dropping connect request from {}: {} requests already wait for a decision",
                addr,
                self.pending_requests.len()
            );
            return;
        }

        debug!("Connection request from {} (connection id {})", addr, connection_id);
        self.pending_requests.insert(addr, PendingRequest { connection_id, channel_count, received_at: time });
        let empty_reject = ProtocolCommand::Reject { reliable: true, data: Arc::from(Vec::new()) };
        let max_reject_len = self.mtu.saturating_sub(Datagram::single(connection_id, empty_reject).encoded_len());
        let request =
            ConnectionRequest::new(addr, connection_id, key, max_reject_len, self.decision_sender.clone());
        self.messenger.emit(SocketEvent::ConnectionRequest(request));
    }

    fn apply_decision(&mut self, request: RequestDecision, time: Instant) {
        let RequestDecision { addr, connection_id, decision } = request;
        let pending = match self.pending_requests.remove(&addr) {
            Some(pending) if pending.connection_id == connection_id => pending,
            Some(pending) => {
                self.pending_requests.insert(addr, pending);
                trace!("Ignoring decision for a replaced request from {}", addr);
                return;
            }
            None => {
                trace!("Ignoring decision for an expired request from {}", addr);
                return;
            }
        };

        match decision {
            Decision::Accept => {
                let local_id = self.connection_ids.next_id();
                match self.peers.entry(addr) {
                    Entry::Occupied(_) => {
                        debug!("Not accepting {}: a connection to it already exists", addr);
                    }
                    Entry::Vacant(entry) => {
                        let mut peer = Peer::incoming(
                            addr,
                            local_id,
                            connection_id,
                            pending.channel_count,
                            &self.config,
                            self.mtu,
                            time,
                        );
                        peer.accept(time);
                        let mut actions = peer.event_actions();
                        actions.extend(peer.send_actions(time));
                        self.messenger.handle_actions(&addr, actions);
                        entry.insert(peer);
                    }
                }
            }
            Decision::Reject(data) => {
                debug!("Rejecting {}", addr);
                self.send_reject(addr, connection_id, false, data);
            }
            Decision::RejectForce(data) => {
                debug!("Force rejecting {}", addr);
                self.send_reject(addr, connection_id, true, Arc::clone(&data));
                self.pending_rejections.insert(
                    addr,
                    PendingRejection { connection_id, data, attempts: 1, last_sent: time },
                );
            }
        }
    }

    fn apply_command(&mut self, command: HostCommand, time: Instant) {
        let result = match command {
            HostCommand::Connect { addr, key, connection_id } => {
                let result = self.connect_with_id(addr, key, connection_id, time);
                if result.is_err() {
                    // The controller already handed out this handle
                    let handle = PeerHandle { addr, connection_id };
                    let info = DisconnectInfo::new(DisconnectReason::ConnectionFailed);
                    self.messenger.emit(SocketEvent::Disconnect(handle, info));
                }
                result.map(drop)
            }
            HostCommand::Send(packet) => self.send(packet),
            HostCommand::SendToAll { channel_id, delivery, payload } => {
                self.send_to_all(channel_id, delivery, payload);
                Ok(())
            }
            HostCommand::Disconnect { addr, data } => self.disconnect(addr, data, time),
            HostCommand::SendUnconnected { addr, data } => self.send_unconnected(addr, data),
            HostCommand::Broadcast { port, data } => self.broadcast(port, data),
            HostCommand::Stop => {
                self.stop(time);
                Ok(())
            }
        };
        if let Err(err) = result {
            warn!("Queued host command failed: {}", err);
        }
    }

    // ===== Housekeeping =====

    fn send_reject(&mut self, addr: SocketAddr, connection_id: u32, reliable: bool, data: Arc<[u8]>) {
        let datagram = Datagram::single(connection_id, ProtocolCommand::Reject { reliable, data });
        self.messenger.send_datagram(addr, &datagram);
    }

    /// Drops a peer after its last datagrams and events went out, leaving a tombstone.
    fn remove_peer(&mut self, addr: SocketAddr, time: Instant) {
        if let Some(mut peer) = self.peers.remove(&addr) {
            let mut actions = peer.send_actions(time);
            actions.extend(peer.event_actions());
            self.messenger.handle_actions(&addr, actions);
            self.tombstones.insert(
                addr,
                Tombstone {
                    local_connection_id: peer.local_connection_id(),
                    remote_connection_id: peer.remote_connection_id(),
                    removed_at: time,
                },
            );
        }
    }

    fn expire_requests(&mut self, time: Instant) {
        let timeout = self.config.disconnect_timeout;
        self.pending_requests.retain(|addr, pending| {
            let alive = time.saturating_duration_since(pending.received_at) <= timeout;
            if !alive {
                debug!("Connect request from {} expired undecided", addr);
            }
            alive
        });
        self.tombstones
            .retain(|_, tombstone| time.saturating_duration_since(tombstone.removed_at) <= timeout);
    }

    fn retry_rejections(&mut self, time: Instant) {
        let delay = self.config.reconnect_delay;
        let max_attempts = self.config.max_connect_attempts;
        let mut resend = Vec::new();

        self.pending_rejections.retain(|addr, rejection| {
            if time.saturating_duration_since(rejection.last_sent) < delay {
                return true;
            }
            if rejection.attempts >= max_attempts {
                debug!("{} never acknowledged its rejection, giving up", addr);
                return false;
            }
            rejection.attempts += 1;
            rejection.last_sent = time;
            resend.push((*addr, rejection.connection_id, Arc::clone(&rejection.data)));
            true
        });

        for (addr, connection_id, data) in resend {
            self.send_reject(addr, connection_id, true, data);
        }
    }
}

fn has_reliable_reject(datagram: &Datagram) -> bool {
    datagram.commands.iter().any(|command| matches!(command, ProtocolCommand::Reject { reliable: true, .. }))
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;

    /// Socket that records what was sent and never receives anything.
    #[derive(Debug, Default)]
    struct RecordingSocket {
        sent: Vec<(SocketAddr, Vec<u8>)>,
        inbox: VecDeque<(SocketAddr, Vec<u8>)>,
    }

    impl TransportSocket for RecordingSocket {
        fn send_packet(&mut self, addr: &SocketAddr, payload: &[u8]) -> io::Result<usize> {
            self.sent.push((*addr, payload.to_vec()));
            Ok(payload.len())
        }

        fn receive_packet<'a>(&mut self, buffer: &'a mut [u8]) -> io::Result<(&'a [u8], SocketAddr)> {
            match self.inbox.pop_front() {
                Some((addr, data)) => {
                    buffer[..data.len()].copy_from_slice(&data);
                    Ok((&buffer[..data.len()], addr))
                }
                None => Err(io::ErrorKind::WouldBlock.into()),
            }
        }

        fn local_addr(&self) -> io::Result<SocketAddr> {
            Ok("127.0.0.1:7000".parse().unwrap())
        }

        fn is_blocking_mode(&self) -> bool {
            false
        }
    }

    fn remote() -> SocketAddr {
        "127.0.0.1:7001".parse().unwrap()
    }

    fn encode(datagram: Datagram) -> Vec<u8> {
        CommandEncoder::encode_datagram(&datagram).unwrap()
    }

    fn sent_commands(manager: &SessionManager<RecordingSocket>) -> Vec<(u32, ProtocolCommand)> {
        manager
            .socket()
            .sent
            .iter()
            .flat_map(|(_, bytes)| {
                let datagram = CommandDecoder::decode_datagram(bytes).unwrap();
                let id = datagram.connection_id;
                datagram.commands.into_iter().map(move |command| (id, command))
            })
            .collect()
    }

    #[test]
    fn test_connect_sends_request_right_away() {
        let now = Instant::now();
        let mut manager = SessionManager::with_connection_ids(
            RecordingSocket::default(),
            Config::default(),
            LayerStack::new(),
            ConnectionIds::starting_at(500),
        );

        let handle = manager.connect(remote(), Arc::from(b"key".to_vec()), now).unwrap();
        manager.pump(now);

        assert_eq!(handle, PeerHandle { addr: remote(), connection_id: 500 });
        match sent_commands(&manager).as_slice() {
            [(0, ProtocolCommand::ConnectRequest { connection_id: 500, key, .. })] => {
                assert_eq!(&key[..], b"key")
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_oversized_connect_key_is_refused() {
        let now = Instant::now();
        let mut manager = SessionManager::new(RecordingSocket::default(), Config::default());

        let result = manager.connect(remote(), Arc::from(vec![0u8; 4000]), now);
        manager.pump(now);

        assert!(matches!(result, Err(ErrorKind::PayloadTooLarge { size: 4000, .. })));
        assert_eq!(manager.peers_count(), 0);
        assert!(manager.socket().sent.is_empty());
    }

    #[test]
    fn test_controller_connect_with_oversized_key_reports_failure() {
        let now = Instant::now();
        let mut manager = SessionManager::with_connection_ids(
            RecordingSocket::default(),
            Config::default(),
            LayerStack::new(),
            ConnectionIds::starting_at(40),
        );

        let handle = manager.controller().connect(remote(), &[0u8; 4000]).unwrap();
        manager.pump(now);

        match manager.event_receiver().try_iter().collect::<Vec<_>>().as_slice() {
            [SocketEvent::Disconnect(failed, info)] => {
                assert_eq!(*failed, handle);
                assert_eq!(info.reason, DisconnectReason::ConnectionFailed);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(manager.peers_count(), 0);
    }

    #[test]
    fn test_unknown_connection_gets_peer_not_found() {
        let now = Instant::now();
        let mut manager = SessionManager::new(RecordingSocket::default(), Config::default());
        manager.messenger.socket.inbox.push_back((
            remote(),
            encode(Datagram::single(77, ProtocolCommand::Ping { sequence: 1 })),
        ));

        manager.manual_poll(now);

        assert_eq!(
            sent_commands(&manager),
            vec![(0, ProtocolCommand::PeerNotFound { connection_id: 77 })]
        );
    }

    #[test]
    fn test_shutdown_for_unknown_connection_is_ignored() {
        let now = Instant::now();
        let mut manager = SessionManager::new(RecordingSocket::default(), Config::default());
        manager.messenger.socket.inbox.push_back((
            remote(),
            encode(Datagram::single(77, ProtocolCommand::Shutdown { data: Arc::from(Vec::new()) })),
        ));

        manager.manual_poll(now);

        assert!(manager.socket().sent.is_empty());
    }

    #[test]
    fn test_protocol_version_mismatch_is_rejected() {
        let now = Instant::now();
        let mut manager = SessionManager::new(RecordingSocket::default(), Config::default());
        manager.messenger.socket.inbox.push_back((
            remote(),
            encode(Datagram::single(
                0,
                ProtocolCommand::ConnectRequest {
                    protocol_version: PROTOCOL_VERSION + 1,
                    connection_id: 9,
                    channel_count: 4,
                    key: Arc::from(Vec::new()),
                },
            )),
        ));

        manager.manual_poll(now);

        assert_eq!(manager.event_receiver().try_iter().count(), 0);
        assert!(matches!(
            sent_commands(&manager).as_slice(),
            [(9, ProtocolCommand::Reject { reliable: false, .. })]
        ));
    }

    #[test]
    fn test_pending_request_limit() {
        let now = Instant::now();
        let mut config = Config::default();
        config.max_pending_requests = 2;
        let mut manager = SessionManager::new(RecordingSocket::default(), config);

        for port in 0..3u16 {
            let addr: SocketAddr = format!("127.0.0.1:{}", 8000 + port).parse().unwrap();
            manager.messenger.socket.inbox.push_back((
                addr,
                encode(Datagram::single(
                    0,
                    ProtocolCommand::ConnectRequest {
                        protocol_version: PROTOCOL_VERSION,
                        connection_id: 1 + port as u32,
                        channel_count: 4,
                        key: Arc::from(Vec::new()),
                    },
                )),
            ));
        }

        manager.pump(now);
        // Held undecided until the end of the test
        let requests: Vec<SocketEvent> = manager.event_receiver().try_iter().collect();
        assert_eq!(requests.len(), 2);
        assert_eq!(manager.pending_request_count(), 2);

        manager.tick(now + Config::default().disconnect_timeout + std::time::Duration::from_millis(1));
        assert_eq!(manager.pending_request_count(), 0);
    }

    #[test]
    fn test_unconnected_sends_require_opt_in() {
        let mut manager = SessionManager::new(RecordingSocket::default(), Config::default());

        assert!(matches!(
            manager.send_unconnected(remote(), Arc::from(vec![1u8])),
            Err(ErrorKind::FeatureDisabled(_))
        ));
        assert!(matches!(manager.broadcast(9000, Arc::from(vec![1u8])), Err(ErrorKind::FeatureDisabled(_))));
    }

    #[test]
    fn test_oversized_unconnected_message_is_refused() {
        let mut config = Config::default();
        config.unconnected_messages_enabled = true;
        config.mtu = 100;
        let mut manager = SessionManager::new(RecordingSocket::default(), config);

        assert!(matches!(
            manager.send_unconnected(remote(), Arc::from(vec![0u8; 200])),
            Err(ErrorKind::PayloadTooLarge { size: 200, .. })
        ));
        assert!(manager.send_unconnected(remote(), Arc::from(vec![0u8; 50])).is_ok());
    }
}
