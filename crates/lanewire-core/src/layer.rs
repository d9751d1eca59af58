//! Packet layers applied to raw datagrams.
//!
//! A layer sees every outbound datagram after the transport has encoded it and every
//! inbound datagram before the transport parses it. Layers are chained in a
//! [`LayerStack`]: outbound bytes pass through the layers in registration order,
//! inbound bytes in reverse order. A layer that rejects a datagram drops it silently.

use std::net::SocketAddr;

use crc32fast::Hasher;

/// Transform applied to raw datagram bytes.
///
/// # Examples
/// ```
/// use std::net::SocketAddr;
/// use lanewire_core::layer::PacketLayer;
///
/// struct CountingLayer(usize);
///
/// impl PacketLayer for CountingLayer {
///     fn process_inbound(&mut self, _addr: &SocketAddr, _data: &mut Vec<u8>) -> bool {
///         self.0 += 1;
///         true
///     }
///
///     fn process_outbound(&mut self, _addr: &SocketAddr, _data: &mut Vec<u8>) -> bool {
///         true
///     }
/// }
/// ```
pub trait PacketLayer: Send {
    /// Bytes this layer may add to an outbound datagram.
    ///
    /// Subtracted from the MTU so fragments still fit after every layer ran.
    fn extra_size(&self) -> usize {
        0
    }

    /// Called for a datagram read from the socket.
    ///
    /// Returns `false` to drop the datagram.
    fn process_inbound(&mut self, addr: &SocketAddr, data: &mut Vec<u8>) -> bool;

    /// Called for a datagram about to be written to the socket.
    ///
    /// Returns `false` to drop the datagram.
    fn process_outbound(&mut self, addr: &SocketAddr, data: &mut Vec<u8>) -> bool;
}

/// Ordered chain of packet layers.
#[derive(Default)]
pub struct LayerStack {
    layers: Vec<Box<dyn PacketLayer>>,
}

impl std::fmt::Debug for LayerStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LayerStack").field("layers", &self.layers.len()).finish()
    }
}

impl LayerStack {
    /// Creates an empty stack that passes everything through.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a layer. Outbound data reaches it after all previously pushed layers.
    pub fn push(&mut self, layer: Box<dyn PacketLayer>) {
        self.layers.push(layer);
    }

    /// Builder form of [`LayerStack::push`].
    pub fn with(mut self, layer: Box<dyn PacketLayer>) -> Self {
        self.push(layer);
        self
    }

    /// Number of registered layers.
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    /// Returns true if no layer is registered.
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Total bytes the layers may add to a datagram.
    pub fn extra_size(&self) -> usize {
        self.layers.iter().map(|layer| layer.extra_size()).sum()
    }

    /// Runs every layer over an inbound datagram, last registered first.
    pub fn process_inbound(&mut self, addr: &SocketAddr, data: &mut Vec<u8>) -> bool {
        self.layers.iter_mut().rev().all(|layer| layer.process_inbound(addr, data))
    }

    /// Runs every layer over an outbound datagram, in registration order.
    pub fn process_outbound(&mut self, addr: &SocketAddr, data: &mut Vec<u8>) -> bool {
        self.layers.iter_mut().all(|layer| layer.process_outbound(addr, data))
    }
}

/// Appends a CRC32 of the datagram and verifies it on receipt.
#[derive(Debug, Clone, Copy, Default)]
pub struct Crc32Layer;

/// Size of the checksum trailer.
const CHECKSUM_SIZE: usize = 4;

impl Crc32Layer {
    fn checksum(data: &[u8]) -> u32 {
        let mut hasher = Hasher::new();
        hasher.update(data);
        hasher.finalize()
    }
}

impl PacketLayer for Crc32Layer {
    fn extra_size(&self) -> usize {
        CHECKSUM_SIZE
    }

    fn process_inbound(&mut self, addr: &SocketAddr, data: &mut Vec<u8>) -> bool {
        if data.len() < CHECKSUM_SIZE {
            tracing::trace!("Datagram from {} too short for checksum", addr);
            return false;
        }

        let payload_len = data.len() - CHECKSUM_SIZE;
        let mut trailer = [0u8; CHECKSUM_SIZE];
        trailer.copy_from_slice(&data[payload_len..]);
        let received = u32::from_be_bytes(trailer);
        let computed = Self::checksum(&data[..payload_len]);

        if received != computed {
            tracing::trace!(
                "CRC32 mismatch from {}: expected {}, got {}",
                addr,
                computed,
                received
            );
            return false;
        }

        data.truncate(payload_len);
        true
    }

    fn process_outbound(&mut self, _addr: &SocketAddr, data: &mut Vec<u8>) -> bool {
        let checksum = Self::checksum(data);
        data.extend_from_slice(&checksum.to_be_bytes());
        true
    }
}

/// Repeating-key XOR. Obscures payloads, offers no real secrecy.
#[derive(Debug, Clone)]
pub struct XorLayer {
    key: Vec<u8>,
}

impl XorLayer {
    /// Creates a layer with the given key. An empty key leaves data unchanged.
    pub fn new(key: impl Into<Vec<u8>>) -> Self {
        Self { key: key.into() }
    }

    fn apply(&self, data: &mut [u8]) {
        if self.key.is_empty() {
            return;
        }
        for (byte, key) in data.iter_mut().zip(self.key.iter().cycle()) {
            *byte ^= key;
        }
    }
}

impl PacketLayer for XorLayer {
    fn process_inbound(&mut self, _addr: &SocketAddr, data: &mut Vec<u8>) -> bool {
        self.apply(data);
        true
    }

    fn process_outbound(&mut self, _addr: &SocketAddr, data: &mut Vec<u8>) -> bool {
        self.apply(data);
        true
    }
}
