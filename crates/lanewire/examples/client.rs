//! Client that connects to a Lanewire server, sends messages and prints the echoes.
//!
//! Run the server first:
//! - cargo run -p lanewire --example server -- 127.0.0.1:7777
//!
//! Then run the client:
//! - cargo run -p lanewire --example client -- 127.0.0.1:7777
//! - cargo run -p lanewire --example client -- 127.0.0.1:7777 10 200
//!   (sends 10 messages, 200ms apart)
//!
//! The client polls from a background thread and drives it through a controller.

use std::{env, net::SocketAddr, time::Duration};

use lanewire::{Config, DeliveryMethod, Host, Packet, SocketEvent, TickMode};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Args: <server_addr> [count] [interval_ms] [key]
    let mut args = env::args().skip(1);
    let server_addr: SocketAddr = args.next().unwrap_or_else(|| "127.0.0.1:9000".to_string()).parse()?;
    let count: usize = args.next().and_then(|s| s.parse().ok()).unwrap_or(5);
    let interval_ms: u64 = args.next().and_then(|s| s.parse().ok()).unwrap_or(300);
    let key = args.next().unwrap_or_else(|| "lanewire".to_string());

    let mut config = Config::default();
    config.tick_mode = TickMode::Automatic(Duration::from_millis(5));
    let host = Host::bind_any_with_config(config)?;
    info!("client bound to {}", host.local_addr()?);

    let polling = host.spawn_polling()?;
    let controller = polling.controller();
    controller.connect(server_addr, key.as_bytes())?;

    let mut sent = 0;
    let mut connected = false;
    loop {
        let Some(event) = polling.recv_timeout(Duration::from_millis(interval_ms)) else {
            if connected && sent < count {
                let message = format!("hello {}", sent);
                let delivery = if sent % 2 == 0 { DeliveryMethod::ReliableOrdered } else { DeliveryMethod::Unreliable };
                controller.send(Packet::new(server_addr, message.into_bytes().into(), delivery, 0))?;
                sent += 1;
            } else if connected {
                controller.disconnect(server_addr, b"done")?;
            }
            continue;
        };

        match event {
            SocketEvent::Connect(peer) => {
                info!("[connect] {} (id {})", peer.addr, peer.connection_id);
                connected = true;
            }
            SocketEvent::Packet(packet) => {
                info!(
                    "[reply] from={} channel={} delivery={:?} payload={:?}",
                    packet.addr(),
                    packet.channel_id(),
                    packet.delivery(),
                    String::from_utf8_lossy(packet.payload())
                );
            }
            SocketEvent::LatencyUpdate(_, rtt) => info!("[latency] rtt={:?}", rtt),
            SocketEvent::Disconnect(peer, info) => {
                if info.data.is_empty() {
                    info!("[disconnect] {} {}", peer.addr, info.reason);
                } else {
                    warn!("[disconnect] {} {}: {}", peer.addr, info.reason, String::from_utf8_lossy(&info.data));
                }
                break;
            }
            other => info!("{:?}", other),
        }
    }

    polling.stop();
    info!("done");
    Ok(())
}
