//! Echo server using Lanewire.
//!
//! Run:
//! - cargo run -p lanewire --example server
//! - cargo run -p lanewire --example server -- 127.0.0.1:7777 secret
//!
//! Clients must present the key (default "lanewire") to be accepted.

use std::{
    env,
    net::SocketAddr,
    thread,
    time::{Duration, Instant},
};

use lanewire::{Config, Host, Packet, SocketEvent};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut args = env::args().skip(1);
    let bind_addr: SocketAddr = args.next().unwrap_or_else(|| "127.0.0.1:9000".to_string()).parse()?;
    let key = args.next().unwrap_or_else(|| "lanewire".to_string());

    let mut config = Config::default();
    // Answer discovery broadcasts from the discovery example.
    config.broadcast_enabled = true;
    config.unconnected_messages_enabled = true;

    let mut host = Host::bind_with_config(bind_addr, config)?;
    info!("echo server listening on {}", host.local_addr()?);

    loop {
        host.manual_poll(Instant::now());

        while let Some(event) = host.recv() {
            match event {
                SocketEvent::ConnectionRequest(request) => {
                    let from = request.addr();
                    if !request.accept_if_key(key.as_bytes()) {
                        warn!("rejected {}: wrong key", from);
                    }
                }
                SocketEvent::Connect(peer) => {
                    info!("[connect] {} (id {})", peer.addr, peer.connection_id);
                }
                SocketEvent::Packet(packet) => {
                    info!(
                        "[packet] from={} channel={} delivery={:?} payload={:?}",
                        packet.addr(),
                        packet.channel_id(),
                        packet.delivery(),
                        String::from_utf8_lossy(packet.payload())
                    );

                    // Echo back with the same delivery method and channel
                    let echo = Packet::new(packet.addr(), packet.payload_arc(), packet.delivery(), packet.channel_id());
                    if let Err(e) = host.send(echo) {
                        warn!("failed to queue echo: {}", e);
                    }
                }
                SocketEvent::Unconnected { addr, payload, kind } => {
                    info!("[unconnected] {:?} from {}: {} bytes", kind, addr, payload.len());
                    if let Err(e) = host.send_unconnected(addr, b"lanewire echo server") {
                        warn!("failed to answer {}: {}", addr, e);
                    }
                }
                SocketEvent::LatencyUpdate(peer, rtt) => {
                    info!("[latency] {} rtt={:?}", peer.addr, rtt);
                }
                SocketEvent::Disconnect(peer, info) => {
                    info!("[disconnect] {} {} ({} bytes attached)", peer.addr, info.reason, info.data.len());
                }
            }
        }

        thread::sleep(Duration::from_millis(10));
    }
}
