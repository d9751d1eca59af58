//! Command serialization and deserialization.
//!
//! Provides binary encoding/decoding of protocol commands and datagrams.
//!
//! # Module Organization
//!
//! - [`encoder`] - Command and datagram encoding to binary format
//! - [`decoder`] - Command and datagram decoding from binary format

pub mod decoder;
pub mod encoder;

#[cfg(test)]
mod tests;

pub use decoder::CommandDecoder;
pub use encoder::CommandEncoder;
