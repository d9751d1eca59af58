//! Transport abstraction for pluggable I/O.

use std::{io::Result, net::SocketAddr};

/// Datagram socket the connection orchestrator reads from and writes to.
///
/// The UDP host implements this over `std::net::UdpSocket`; tests plug in
/// in-memory networks that can drop, duplicate or reorder datagrams.
pub trait Socket {
    /// Sends one datagram to `addr`.
    fn send_packet(&mut self, addr: &SocketAddr, payload: &[u8]) -> Result<usize>;

    /// Receives one datagram into `buffer`, returning the filled part and its source.
    ///
    /// A non-blocking socket with nothing to read returns `io::ErrorKind::WouldBlock`.
    fn receive_packet<'a>(&mut self, buffer: &'a mut [u8]) -> Result<(&'a [u8], SocketAddr)>;

    /// Returns the socket address that this socket was created from.
    fn local_addr(&self) -> Result<SocketAddr>;

    /// Returns whether socket operates in blocking or non-blocking mode.
    fn is_blocking_mode(&self) -> bool;
}
