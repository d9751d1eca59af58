//! LAN discovery: broadcasts a probe to a port and lists every host that answers.
//!
//! Run a server first (it answers probes):
//! - cargo run -p lanewire --example server -- 0.0.0.0:9000
//!
//! Then:
//! - cargo run -p lanewire --example discovery -- 9000

use std::{
    env,
    net::{Ipv4Addr, SocketAddrV4},
    thread,
    time::{Duration, Instant},
};

use lanewire::{Config, Host, SocketEvent};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let port: u16 = env::args().nth(1).and_then(|s| s.parse().ok()).unwrap_or(9000);

    let mut config = Config::default();
    config.broadcast_enabled = true;
    config.unconnected_messages_enabled = true;
    let mut host = Host::bind_with_config(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0), config)?;

    host.broadcast(port, b"who is there?")?;
    info!("probe sent to port {}", port);

    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        host.manual_poll(Instant::now());
        while let Some(event) = host.recv() {
            if let SocketEvent::Unconnected { addr, payload, .. } = event {
                info!("found {}: {}", addr, String::from_utf8_lossy(&payload));
            }
        }
        thread::sleep(Duration::from_millis(10));
    }
    Ok(())
}
