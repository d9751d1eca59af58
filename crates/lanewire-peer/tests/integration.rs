//! Integration tests for the lanewire-peer crate.
//!
//! Two peers exchange datagrams through a simulated link that drops, duplicates and
//! reorders them, driven by a seeded RNG so every run is identical.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use lanewire_core::config::Config;
use lanewire_peer::{Peer, PeerEvent};
use lanewire_protocol::{command_codec::CommandDecoder, packet::DeliveryMethod};
use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};
use rstest::rstest;

const STEP: Duration = Duration::from_millis(10);

fn get_fake_addr() -> std::net::SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

/// One direction of an unreliable network path.
struct LossyLink {
    rng: StdRng,
    loss: f64,
    duplicate: f64,
    max_delay_steps: u32,
    in_flight: Vec<(u32, Vec<u8>)>,
}

impl LossyLink {
    fn new(seed: u64, loss: f64, duplicate: f64, max_delay_steps: u32) -> Self {
        Self { rng: StdRng::seed_from_u64(seed), loss, duplicate, max_delay_steps, in_flight: Vec::new() }
    }

    fn perfect() -> Self {
        Self::new(0, 0.0, 0.0, 0)
    }

    fn push(&mut self, step: u32, datagrams: Vec<Vec<u8>>) {
        for datagram in datagrams {
            if self.rng.random::<f64>() < self.loss {
                continue;
            }
            if self.rng.random::<f64>() < self.duplicate {
                let delay = self.rng.random_range(0..=self.max_delay_steps);
                self.in_flight.push((step + delay, datagram.clone()));
            }
            let delay = self.rng.random_range(0..=self.max_delay_steps);
            self.in_flight.push((step + delay, datagram));
        }
    }

    /// Datagrams arriving at `step`, shuffled.
    fn arrivals(&mut self, step: u32) -> Vec<Vec<u8>> {
        let (mut ready, waiting): (Vec<_>, Vec<_>) =
            self.in_flight.drain(..).partition(|(due, _)| *due <= step);
        self.in_flight = waiting;
        ready.shuffle(&mut self.rng);
        ready.into_iter().map(|(_, datagram)| datagram).collect()
    }
}

struct Simulation {
    client: Peer,
    server: Peer,
    to_server: LossyLink,
    to_client: LossyLink,
    start: Instant,
    step: u32,
}

impl Simulation {
    fn connected(config: &Config, to_server: LossyLink, to_client: LossyLink) -> Self {
        let start = Instant::now();
        let mtu = config.mtu as usize;
        let mut client = Peer::outgoing(get_fake_addr(), 100, Arc::from(vec![]), config, mtu, start).unwrap();
        let mut server = Peer::incoming(get_fake_addr(), 200, 100, config.channel_count, config, mtu, start);
        server.accept(start);

        for bytes in server.flush(start) {
            let datagram = CommandDecoder::decode_datagram(&bytes).unwrap();
            client.process_datagram(&datagram, bytes.len(), start);
        }
        assert!(client.is_connected());
        client.drain_events().for_each(drop);
        server.drain_events().for_each(drop);

        Self { client, server, to_server, to_client, start, step: 0 }
    }

    fn now(&self) -> Instant {
        self.start + STEP * self.step
    }

    /// Advances one step and returns the payloads the server surfaced.
    fn tick(&mut self) -> Vec<(u8, DeliveryMethod, Arc<[u8]>)> {
        self.step += 1;
        let now = self.now();

        self.client.update(now);
        self.server.update(now);
        let outgoing = self.client.flush(now);
        self.to_server.push(self.step, outgoing);
        let outgoing = self.server.flush(now);
        self.to_client.push(self.step, outgoing);

        for bytes in self.to_server.arrivals(self.step) {
            let datagram = CommandDecoder::decode_datagram(&bytes).unwrap();
            self.server.process_datagram(&datagram, bytes.len(), now);
        }
        for bytes in self.to_client.arrivals(self.step) {
            let datagram = CommandDecoder::decode_datagram(&bytes).unwrap();
            self.client.process_datagram(&datagram, bytes.len(), now);
        }
        self.client.drain_events().for_each(drop);

        self.server
            .drain_events()
            .filter_map(|event| match event {
                PeerEvent::Message { channel_id, delivery, payload } => Some((channel_id, delivery, payload)),
                PeerEvent::Disconnected(info) => panic!("unexpected disconnect: {:?}", info),
                _ => None,
            })
            .collect()
    }

    /// Ticks until `expected` messages arrived or the step budget runs out.
    fn run_until(&mut self, expected: usize, max_steps: u32) -> Vec<(u8, DeliveryMethod, Arc<[u8]>)> {
        let mut received = Vec::new();
        for _ in 0..max_steps {
            received.extend(self.tick());
            if received.len() >= expected && !self.client.has_pending_messages() {
                break;
            }
        }
        received
    }
}

fn lossy(seed: u64) -> (LossyLink, LossyLink) {
    (LossyLink::new(seed, 0.2, 0.1, 3), LossyLink::new(seed + 1, 0.2, 0.1, 3))
}

fn index_of(payload: &[u8]) -> u32 {
    u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]])
}

#[test]
fn test_reliable_ordered_delivers_in_send_order_under_loss() {
    let (up, down) = lossy(1);
    let mut sim = Simulation::connected(&Config::default(), up, down);

    for i in 0..300u32 {
        sim.client
            .send(0, DeliveryMethod::ReliableOrdered, Arc::from(i.to_be_bytes().to_vec()))
            .unwrap();
    }

    let received = sim.run_until(300, 2000);
    let order: Vec<u32> = received.iter().map(|(_, _, payload)| index_of(payload)).collect();
    assert_eq!(order, (0..300).collect::<Vec<_>>());
    assert!(sim.client.statistics().retransmissions > 0);
}

#[test]
fn test_reliable_unordered_delivers_exactly_once_under_loss() {
    let (up, down) = lossy(7);
    let mut sim = Simulation::connected(&Config::default(), up, down);

    for i in 0..300u32 {
        sim.client
            .send(2, DeliveryMethod::ReliableUnordered, Arc::from(i.to_be_bytes().to_vec()))
            .unwrap();
    }

    let received = sim.run_until(300, 2000);
    let mut indexes: Vec<u32> = received.iter().map(|(_, _, payload)| index_of(payload)).collect();
    assert_eq!(indexes.len(), 300, "every message exactly once");
    indexes.sort_unstable();
    assert_eq!(indexes, (0..300).collect::<Vec<_>>());
    assert!(sim.server.statistics().duplicates > 0);
}

#[test]
fn test_sequenced_never_goes_backwards() {
    let (up, down) = lossy(42);
    let mut sim = Simulation::connected(&Config::default(), up, down);

    let mut received = Vec::new();
    for i in 0..200u32 {
        sim.client
            .send(1, DeliveryMethod::Sequenced, Arc::from(i.to_be_bytes().to_vec()))
            .unwrap();
        received.extend(sim.tick());
    }
    for _ in 0..10 {
        received.extend(sim.tick());
    }

    let order: Vec<u32> = received.iter().map(|(_, _, payload)| index_of(payload)).collect();
    assert!(!order.is_empty());
    assert!(order.windows(2).all(|pair| pair[0] < pair[1]), "out of order: {:?}", order);
}

#[test]
fn test_reliable_sequenced_only_transmits_latest() {
    let mut sim = Simulation::connected(&Config::default(), LossyLink::perfect(), LossyLink::perfect());

    for i in 0..5u32 {
        sim.client
            .send(0, DeliveryMethod::ReliableSequenced, Arc::from(i.to_be_bytes().to_vec()))
            .unwrap();
    }

    let received = sim.run_until(1, 50);
    let order: Vec<u32> = received.iter().map(|(_, _, payload)| index_of(payload)).collect();
    assert_eq!(order, vec![4]);
    assert_eq!(sim.client.statistics().packets_sent, 1);
}

#[test]
fn test_reliable_sequenced_eventually_delivers_latest_under_loss() {
    let (up, down) = lossy(99);
    let mut sim = Simulation::connected(&Config::default(), up, down);

    let mut received = Vec::new();
    for i in 0..50u32 {
        sim.client
            .send(0, DeliveryMethod::ReliableSequenced, Arc::from(i.to_be_bytes().to_vec()))
            .unwrap();
        received.extend(sim.tick());
    }
    received.extend(sim.run_until(0, 500));

    let order: Vec<u32> = received.iter().map(|(_, _, payload)| index_of(payload)).collect();
    assert!(order.windows(2).all(|pair| pair[0] < pair[1]));
    assert_eq!(order.last(), Some(&49));
}

#[rstest]
#[case(DeliveryMethod::ReliableOrdered)]
#[case(DeliveryMethod::ReliableUnordered)]
fn test_fragmented_message_is_reassembled_byte_identical(#[case] delivery: DeliveryMethod) {
    let mut config = Config::default();
    config.mtu = 300;
    let (up, down) = lossy(5);
    let mut sim = Simulation::connected(&config, up, down);

    let mut rng = StdRng::seed_from_u64(11);
    let big: Vec<u8> = (0..10_000).map(|_| rng.random()).collect();
    let small = vec![1u8, 2, 3];

    sim.client.send(0, delivery, Arc::from(big.clone())).unwrap();
    sim.client.send(0, delivery, Arc::from(small.clone())).unwrap();

    let received = sim.run_until(2, 3000);
    assert_eq!(received.len(), 2);
    assert_eq!(sim.server.pending_fragment_groups(), 0);

    let payloads: Vec<Vec<u8>> = received.iter().map(|(_, _, payload)| payload.to_vec()).collect();
    if delivery == DeliveryMethod::ReliableOrdered {
        assert_eq!(payloads, vec![big, small]);
    } else {
        assert!(payloads.contains(&big));
        assert!(payloads.contains(&small));
    }
}

#[test]
fn test_channels_are_independent_lanes() {
    let (up, down) = lossy(3);
    let mut sim = Simulation::connected(&Config::default(), up, down);

    for i in 0..100u32 {
        let payload: Arc<[u8]> = Arc::from(i.to_be_bytes().to_vec());
        sim.client.send(0, DeliveryMethod::ReliableOrdered, Arc::clone(&payload)).unwrap();
        sim.client.send(3, DeliveryMethod::ReliableOrdered, payload).unwrap();
    }

    let received = sim.run_until(200, 2000);
    for channel in [0u8, 3] {
        let order: Vec<u32> = received
            .iter()
            .filter(|(id, _, _)| *id == channel)
            .map(|(_, _, payload)| index_of(payload))
            .collect();
        assert_eq!(order, (0..100).collect::<Vec<_>>(), "channel {}", channel);
    }
}

#[test]
fn test_sends_pause_when_queue_is_full() {
    let mut config = Config::default();
    config.max_pending_messages = 16;
    let mut sim = Simulation::connected(&config, LossyLink::perfect(), LossyLink::perfect());

    // 64 fit the window, 16 more wait in the queue, the rest is refused.
    // Everything flushed here is lost on purpose and must be retransmitted.
    let mut accepted = 0u32;
    for i in 0..200u32 {
        if sim
            .client
            .send(0, DeliveryMethod::ReliableOrdered, Arc::from(i.to_be_bytes().to_vec()))
            .is_ok()
        {
            accepted += 1;
        }
        sim.client.flush(sim.now());
    }
    assert_eq!(accepted, 80);

    // Nothing was lost: everything accepted arrives once the window drains
    let received = sim.run_until(80, 500);
    assert_eq!(received.len(), 80);
}
