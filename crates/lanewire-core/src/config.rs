use std::{default::Default, time::Duration};

use crate::{
    constants::{DEFAULT_CHANNEL_COUNT, DEFAULT_MTU, MAX_CHANNEL_COUNT, MAX_FRAGMENTS_DEFAULT, MIN_MTU},
    error::{ErrorKind, Result},
};

/// Who drives the network pump and the timer tick.
#[derive(Clone, Debug, Copy, PartialEq, Eq)]
pub enum TickMode {
    /// The application calls `manual_poll` (or `pump` and `tick`) itself.
    Manual,
    /// An internally owned loop polls with the given interval between passes.
    Automatic(Duration),
}

#[derive(Clone, Debug)]
/// Configuration options to tune protocol and runtime behavior.
pub struct Config {
    /// Make the underlying UDP socket block when true, otherwise non-blocking.
    pub blocking_mode: bool,
    /// Manual or automatic ticking.
    pub tick_mode: TickMode,
    /// Number of channel ids per peer (1-64). Negotiated down to the remote's value.
    pub channel_count: u8,
    /// Max time without any datagram from a peer before it is disconnected.
    pub disconnect_timeout: Duration,
    /// Interval between keep-alive pings on a connected peer.
    pub ping_interval: Duration,
    /// How long a local disconnect waits for the remote acknowledgment.
    pub shutdown_timeout: Duration,
    /// Delay between connect request retransmissions.
    pub reconnect_delay: Duration,
    /// Connect requests sent before the attempt fails.
    pub max_connect_attempts: u32,
    /// Max datagram size in bytes before packet layer overhead. Larger messages are fragmented.
    pub mtu: u16,
    /// Max number of fragments a single message may be split into.
    pub max_fragments: u16,
    /// Age after which an incomplete unreliable fragment group is evicted.
    pub fragment_timeout: Duration,
    /// Fixed part of the reliable resend interval.
    pub resend_base_delay: Duration,
    /// Multiplier applied to the smoothed RTT when computing the resend interval.
    pub resend_rtt_factor: f32,
    /// Upper bound on the reliable resend interval.
    pub max_resend_delay: Duration,
    /// Smoothing factor (0..1) for RTT measurements.
    pub rtt_smoothing_factor: f32,
    /// Messages a channel may hold while its send window is full. Sends beyond this fail.
    pub max_pending_messages: usize,
    /// Max number of connection requests waiting for an application decision.
    pub max_pending_requests: u16,
    /// Accept and emit unconnected messages.
    pub unconnected_messages_enabled: bool,
    /// Accept and emit broadcast messages, and allow sending them.
    /// Also sets the SO_BROADCAST socket option.
    pub broadcast_enabled: bool,
    /// Max receive buffer size in bytes.
    pub receive_buffer_max_size: usize,
    /// Socket receive buffer size in bytes (None = use system default).
    /// Corresponds to SO_RCVBUF socket option.
    pub socket_recv_buffer_size: Option<usize>,
    /// Socket send buffer size in bytes (None = use system default).
    /// Corresponds to SO_SNDBUF socket option.
    pub socket_send_buffer_size: Option<usize>,
    /// Time-to-live for outgoing packets (None = use system default).
    /// Corresponds to IP_TTL socket option.
    pub socket_ttl: Option<u32>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            blocking_mode: false,
            tick_mode: TickMode::Automatic(Duration::from_millis(10)),
            channel_count: DEFAULT_CHANNEL_COUNT,
            disconnect_timeout: Duration::from_secs(5),
            ping_interval: Duration::from_secs(1),
            shutdown_timeout: Duration::from_secs(2),
            reconnect_delay: Duration::from_millis(500),
            max_connect_attempts: 10,
            mtu: DEFAULT_MTU,
            max_fragments: MAX_FRAGMENTS_DEFAULT,
            fragment_timeout: Duration::from_secs(5),
            resend_base_delay: Duration::from_millis(25),
            resend_rtt_factor: 2.1,
            max_resend_delay: Duration::from_secs(1),
            rtt_smoothing_factor: 0.10,
            max_pending_messages: 1024,
            max_pending_requests: 50,
            unconnected_messages_enabled: false,
            broadcast_enabled: false,
            receive_buffer_max_size: 64 * 1024,
            socket_recv_buffer_size: None,
            socket_send_buffer_size: None,
            socket_ttl: None,
        }
    }
}

/// Upper bound for [Config::resend_rtt_factor].
const MAX_RESEND_RTT_FACTOR: f32 = 100.0;

impl Config {
    /// Checks that the values are usable together.
    pub fn validate(&self) -> Result<()> {
        if self.channel_count == 0 || self.channel_count > MAX_CHANNEL_COUNT {
            return Err(ErrorKind::InvalidConfig(format!(
                "channel_count must be within 1..={}, got {}",
                MAX_CHANNEL_COUNT, self.channel_count
            )));
        }
        if self.mtu < MIN_MTU {
            return Err(ErrorKind::InvalidConfig(format!(
                "mtu must be at least {}, got {}",
                MIN_MTU, self.mtu
            )));
        }
        if self.receive_buffer_max_size < self.mtu as usize {
            return Err(ErrorKind::InvalidConfig(
                "receive_buffer_max_size must be able to hold one datagram".into(),
            ));
        }
        if self.max_fragments == 0 {
            return Err(ErrorKind::InvalidConfig("max_fragments must be non-zero".into()));
        }
        if !(0.0..=1.0).contains(&self.rtt_smoothing_factor) {
            return Err(ErrorKind::InvalidConfig(
                "rtt_smoothing_factor must be within 0..=1".into(),
            ));
        }
        if !(0.0..=MAX_RESEND_RTT_FACTOR).contains(&self.resend_rtt_factor) {
            return Err(ErrorKind::InvalidConfig(format!(
                "resend_rtt_factor must be within 0..={}, got {}",
                MAX_RESEND_RTT_FACTOR, self.resend_rtt_factor
            )));
        }
        if self.max_connect_attempts == 0 {
            return Err(ErrorKind::InvalidConfig("max_connect_attempts must be non-zero".into()));
        }
        if let TickMode::Automatic(interval) = self.tick_mode {
            if interval.is_zero() {
                return Err(ErrorKind::InvalidConfig("automatic tick interval must be non-zero".into()));
            }
        }
        Ok(())
    }
}
