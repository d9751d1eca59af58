use std::{
    io,
    net::{Ipv4Addr, SocketAddr, SocketAddrV4, ToSocketAddrs, UdpSocket},
    sync::Arc,
    thread::{self, sleep, JoinHandle},
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, RecvTimeoutError};
use lanewire_core::{
    config::{Config, TickMode},
    error::{ErrorKind, Result},
    layer::LayerStack,
    transport::Socket as TransportSocket,
};
use lanewire_peer::PeerStatistics;
use lanewire_protocol::packet::{DeliveryMethod, Packet};
use socket2::Socket as Socket2;

use crate::{
    controller::HostController,
    event_types::{PeerHandle, SocketEvent},
    session_manager::SessionManager,
    time::{Clock, SystemClock},
};

/// Applies socket options from configuration to a UdpSocket.
fn apply_socket_options(socket: &UdpSocket, config: &Config) -> io::Result<()> {
    // Create socket2::Socket from UdpSocket for advanced options
    let socket2 = Socket2::from(socket.try_clone()?);

    if let Some(size) = config.socket_recv_buffer_size {
        socket2.set_recv_buffer_size(size)?;
    }

    if let Some(size) = config.socket_send_buffer_size {
        socket2.set_send_buffer_size(size)?;
    }

    if let Some(ttl) = config.socket_ttl {
        socket.set_ttl(ttl)?;
    }

    if config.broadcast_enabled {
        socket2.set_broadcast(true)?;
    }

    Ok(())
}

#[derive(Debug)]
struct UdpTransport {
    is_blocking_mode: bool,
    socket: UdpSocket,
}

impl UdpTransport {
    fn new(socket: UdpSocket, is_blocking_mode: bool) -> Result<Self> {
        socket.set_nonblocking(!is_blocking_mode)?;
        Ok(UdpTransport { is_blocking_mode, socket })
    }
}

impl TransportSocket for UdpTransport {
    fn send_packet(&mut self, addr: &SocketAddr, payload: &[u8]) -> io::Result<usize> {
        self.socket.send_to(payload, addr)
    }

    fn receive_packet<'a>(&mut self, buffer: &'a mut [u8]) -> io::Result<(&'a [u8], SocketAddr)> {
        self.socket.recv_from(buffer).map(move |(recv_len, address)| (&buffer[..recv_len], address))
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    fn is_blocking_mode(&self) -> bool {
        self.is_blocking_mode
    }
}

/// High-level host managing multiple peers over a single UDP socket.
///
/// In manual tick mode the application calls [`manual_poll`](Host::manual_poll) (or
/// [`pump`](Host::pump) and [`tick`](Host::tick)) at its own cadence. Otherwise
/// [`spawn_polling`](Host::spawn_polling) moves the host onto its own thread.
pub struct Host {
    handler: SessionManager<UdpTransport>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host").field("handler", &self.handler).finish()
    }
}

impl Host {
    /// Creates a new Host bound to the specified address with default configuration.
    pub fn bind<A: ToSocketAddrs>(addresses: A) -> Result<Self> {
        Self::bind_with_config(addresses, Config::default())
    }

    /// Creates a new Host bound to any available port on localhost with default configuration.
    pub fn bind_any() -> Result<Self> {
        Self::bind_any_with_config(Config::default())
    }

    /// Creates a new Host bound to any available port on localhost with the specified configuration.
    pub fn bind_any_with_config(config: Config) -> Result<Self> {
        let loopback = Ipv4Addr::new(127, 0, 0, 1);
        let address = SocketAddrV4::new(loopback, 0);
        let socket = UdpSocket::bind(address)?;
        Self::bind_with_config_and_clock(socket, config, Arc::new(SystemClock))
    }

    /// Creates a new Host bound to the specified address with custom configuration.
    pub fn bind_with_config<A: ToSocketAddrs>(addresses: A, config: Config) -> Result<Self> {
        Self::bind_with_layers(addresses, config, LayerStack::new())
    }

    /// Creates a new Host whose datagrams pass through `layers` (checksums, ciphers).
    ///
    /// Both ends must use the same layers in the same order.
    ///
    /// # Examples
    /// ```no_run
    /// use lanewire_core::{config::Config, layer::{Crc32Layer, LayerStack, XorLayer}};
    /// use lanewire_host::Host;
    ///
    /// let layers = LayerStack::new()
    ///     .with(Box::new(XorLayer::new("shared secret")))
    ///     .with(Box::new(Crc32Layer));
    /// let host = Host::bind_with_layers("127.0.0.1:9050", Config::default(), layers).unwrap();
    /// ```
    pub fn bind_with_layers<A: ToSocketAddrs>(
        addresses: A,
        config: Config,
        layers: LayerStack,
    ) -> Result<Self> {
        let socket = UdpSocket::bind(addresses)?;
        Self::bind_with_config_clock_and_layers(socket, config, Arc::new(SystemClock), layers)
    }

    /// Creates a new Host with a custom socket, configuration, and clock for testing.
    pub fn bind_with_config_and_clock(
        socket: UdpSocket,
        config: Config,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        Self::bind_with_config_clock_and_layers(socket, config, clock, LayerStack::new())
    }

    /// Creates a new Host with custom socket, configuration, clock, and packet layers.
    pub fn bind_with_config_clock_and_layers(
        socket: UdpSocket,
        config: Config,
        clock: Arc<dyn Clock>,
        layers: LayerStack,
    ) -> Result<Self> {
        config.validate()?;
        apply_socket_options(&socket, &config)?;

        Ok(Host {
            handler: SessionManager::with_layers(
                UdpTransport::new(socket, config.blocking_mode)?,
                config,
                layers,
            ),
            clock,
        })
    }

    /// Returns a clone of the event receiver channel for receiving network events.
    pub fn get_event_receiver(&self) -> Receiver<SocketEvent> {
        self.handler.event_receiver().clone()
    }

    /// Returns a handle that queues work for this host from any thread.
    pub fn controller(&self) -> HostController {
        self.handler.controller()
    }

    /// Starts connecting to `addr`; the outcome arrives as a `Connect` or `Disconnect` event.
    pub fn connect<A: ToSocketAddrs>(&mut self, addr: A, key: &[u8]) -> Result<PeerHandle> {
        let addr = addr
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "no address to connect to"))?;
        self.handler.connect(addr, Arc::from(key), self.clock.now())
    }

    /// Queues a packet for a connected peer. It goes out on the next poll.
    pub fn send(&mut self, packet: Packet) -> Result<()> {
        self.handler.send(packet)
    }

    /// Queues one message for every connected peer; returns how many accepted it.
    pub fn send_to_all(&mut self, channel_id: u8, delivery: DeliveryMethod, data: &[u8]) -> usize {
        self.handler.send_to_all(channel_id, delivery, Arc::from(data))
    }

    /// Initiates a graceful disconnect from the specified peer.
    pub fn disconnect(&mut self, addr: SocketAddr, data: &[u8]) -> Result<()> {
        self.handler.disconnect(addr, Arc::from(data), self.clock.now())
    }

    /// Sends a message outside any connection. Requires `unconnected_messages_enabled`.
    pub fn send_unconnected(&mut self, addr: SocketAddr, data: &[u8]) -> Result<()> {
        self.handler.send_unconnected(addr, Arc::from(data))
    }

    /// Sends a message to every host on `port` of the local IPv4 network.
    /// Requires `broadcast_enabled`.
    pub fn broadcast(&mut self, port: u16, data: &[u8]) -> Result<()> {
        self.handler.broadcast(port, Arc::from(data))
    }

    /// Receives the next available network event, if any.
    pub fn recv(&mut self) -> Option<SocketEvent> {
        self.handler.event_receiver().try_recv().ok()
    }

    /// Reads incoming datagrams, applies request decisions and controller commands.
    pub fn pump(&mut self, time: Instant) {
        self.handler.pump(time);
    }

    /// Advances timers, sends what is due and removes finished peers.
    pub fn tick(&mut self, time: Instant) {
        self.handler.tick(time);
    }

    /// Manually polls the network for incoming/outgoing packets and updates peer states.
    pub fn manual_poll(&mut self, time: Instant) {
        self.handler.manual_poll(time);
    }

    /// Polls on the calling thread until the host is stopped through a controller.
    pub fn start_polling(&mut self) -> Result<()> {
        let interval = self.tick_interval()?;
        self.start_polling_with_duration(Some(interval));
        Ok(())
    }

    /// Polls on the calling thread with a custom sleep between passes (`None` yields)
    /// until the host is stopped.
    pub fn start_polling_with_duration(&mut self, sleep_duration: Option<Duration>) {
        while !self.handler.is_stopped() {
            self.manual_poll(self.clock.now());
            match sleep_duration {
                None => thread::yield_now(),
                Some(duration) => sleep(duration),
            };
        }
    }

    /// Moves the host onto its own polling thread, ticking at the configured interval.
    ///
    /// Fails with `ManualTickMode` when the configuration asks for manual ticking.
    pub fn spawn_polling(mut self) -> Result<PollingHost> {
        let interval = self.tick_interval()?;
        let controller = self.controller();
        let events = self.get_event_receiver();
        let thread = thread::Builder::new()
            .name("lanewire-poll".into())
            .spawn(move || self.start_polling_with_duration(Some(interval)))?;

        Ok(PollingHost { controller, events, thread: Some(thread) })
    }

    /// Disconnects every peer with one shutdown datagram each and stops the host.
    pub fn stop(&mut self) {
        self.handler.stop(self.clock.now());
    }

    /// Returns the local socket address this host is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.handler.socket().local_addr()?)
    }

    /// Returns the number of connected peers.
    pub fn connected_peers_count(&self) -> usize {
        self.handler.connected_peers_count()
    }

    /// Returns the handles of every connected peer.
    pub fn connected_peers(&self) -> Vec<PeerHandle> {
        self.handler.connected_peers().collect()
    }

    /// Returns the counters of the peer at `addr`.
    pub fn peer_statistics(&self, addr: &SocketAddr) -> Option<PeerStatistics> {
        self.handler.peer(addr).map(|peer| peer.statistics())
    }

    /// Returns the smoothed round trip time to the peer at `addr`.
    pub fn rtt(&self, addr: &SocketAddr) -> Option<Duration> {
        self.handler.peer(addr).map(|peer| peer.rtt())
    }

    fn tick_interval(&self) -> Result<Duration> {
        match self.handler.config().tick_mode {
            TickMode::Automatic(interval) => Ok(interval),
            TickMode::Manual => Err(ErrorKind::ManualTickMode),
        }
    }
}

/// A host running on its own polling thread.
///
/// Dropping it stops the host and joins the thread.
#[derive(Debug)]
pub struct PollingHost {
    controller: HostController,
    events: Receiver<SocketEvent>,
    thread: Option<JoinHandle<()>>,
}

impl PollingHost {
    /// Returns a handle that queues work for the polling thread.
    pub fn controller(&self) -> HostController {
        self.controller.clone()
    }

    /// Returns the next event, if one is ready.
    pub fn recv(&self) -> Option<SocketEvent> {
        self.events.try_recv().ok()
    }

    /// Waits up to `timeout` for the next event.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<SocketEvent> {
        match self.events.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Returns the event receiver; it can be cloned and moved to other threads.
    pub fn event_receiver(&self) -> &Receiver<SocketEvent> {
        &self.events
    }

    /// Disconnects every peer, stops polling and waits for the thread to finish.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(thread) = self.thread.take() {
            if let Err(err) = self.controller.stop() {
                tracing::error!("Could not stop polling thread: {}", err);
                return;
            }
            if thread.join().is_err() {
                tracing::error!("Polling thread panicked");
            }
        }
    }
}

impl Drop for PollingHost {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use lanewire_core::layer::Crc32Layer;

    use crate::time::ManualClock;

    use super::*;

    fn manual_config() -> Config {
        let mut config = Config::default();
        config.tick_mode = TickMode::Manual;
        config
    }

    /// Polls both hosts on real time until `done` holds or two seconds passed.
    fn poll_until(
        server: &mut Host,
        client: &mut Host,
        mut done: impl FnMut(&mut Host, &mut Host) -> bool,
    ) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            client.manual_poll(Instant::now());
            server.manual_poll(Instant::now());
            if done(server, client) {
                return true;
            }
            sleep(Duration::from_millis(1));
        }
        false
    }

    #[test]
    fn test_send_to_no_connections() {
        let mut host = Host::bind_any().unwrap();
        assert_eq!(host.send_to_all(0, DeliveryMethod::ReliableOrdered, &[1, 2, 3]), 0);
        assert_eq!(host.connected_peers_count(), 0);
    }

    #[test]
    fn test_send_to_unknown_peer_fails() {
        let mut host = Host::bind_any().unwrap();
        let addr: SocketAddr = "127.0.0.1:9".parse().unwrap();
        assert!(matches!(
            host.send(Packet::reliable_ordered(addr, vec![1], 0)),
            Err(ErrorKind::UnknownPeer(_))
        ));
        assert!(matches!(host.disconnect(addr, &[]), Err(ErrorKind::UnknownPeer(_))));
    }

    #[test]
    fn test_invalid_config_is_refused_at_bind() {
        let mut config = Config::default();
        config.channel_count = 0;
        assert!(matches!(Host::bind_any_with_config(config), Err(ErrorKind::InvalidConfig(_))));
    }

    #[test]
    fn test_socket_options_applied() {
        let mut config = Config::default();
        config.socket_recv_buffer_size = Some(131072);
        config.socket_send_buffer_size = Some(65536);
        config.socket_ttl = Some(128);
        config.broadcast_enabled = true;

        assert!(Host::bind_any_with_config(config).is_ok());
    }

    #[test]
    fn test_spawn_polling_refuses_manual_tick_mode() {
        let host = Host::bind_any_with_config(manual_config()).unwrap();
        assert!(matches!(host.spawn_polling(), Err(ErrorKind::ManualTickMode)));
    }

    #[test]
    fn test_loopback_handshake_and_reliable_message() {
        let layers = || LayerStack::new().with(Box::new(Crc32Layer));
        let mut server =
            Host::bind_with_layers("127.0.0.1:0", manual_config(), layers()).unwrap();
        let server_addr = server.local_addr().unwrap();
        let mut client = Host::bind_with_layers("127.0.0.1:0", manual_config(), layers()).unwrap();

        let handle = client.connect(server_addr, b"lanewire").unwrap();
        assert_eq!(handle.addr, server_addr);

        let connected = poll_until(&mut server, &mut client, |server, client| {
            while let Some(event) = server.recv() {
                if let SocketEvent::ConnectionRequest(request) = event {
                    assert!(request.accept_if_key(b"lanewire"));
                }
            }
            matches!(client.recv(), Some(SocketEvent::Connect(_)))
        });
        assert!(connected, "client never connected");

        client.send(Packet::reliable_ordered(server_addr, b"hello".to_vec(), 1)).unwrap();
        let mut payload = None;
        let delivered = poll_until(&mut server, &mut client, |server, _| {
            while let Some(event) = server.recv() {
                if let SocketEvent::Packet(packet) = event {
                    payload = Some(packet.payload().to_vec());
                }
            }
            payload.is_some()
        });
        assert!(delivered);
        assert_eq!(payload.as_deref(), Some(&b"hello"[..]));
        assert_eq!(server.connected_peers_count(), 1);
    }

    #[test]
    fn test_polling_host_stops_on_request() {
        let clock = ManualClock::new(Instant::now());
        let mut config = Config::default();
        config.tick_mode = TickMode::Automatic(Duration::from_millis(1));
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        let host = Host::bind_with_config_and_clock(socket, config, Arc::new(clock.clone())).unwrap();

        let polling = host.spawn_polling().unwrap();
        let controller = polling.controller();
        clock.advance(Duration::from_millis(10));

        polling.stop();
        assert!(controller.stop().is_err(), "host should be gone after stop");
    }
}
