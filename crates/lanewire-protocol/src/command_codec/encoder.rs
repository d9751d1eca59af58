//! Datagram encoding.

use std::io::{self, Write};

use byteorder::{BigEndian, WriteBytesExt};

use crate::{
    command::{Datagram, ProtocolCommand},
    packet::EnumConverter,
};

/// Flag bit on data commands: fragment info follows the sequence number.
pub(crate) const DATA_FLAG_FRAGMENT: u8 = 0b0000_0001;

/// Serializes commands and datagrams into bytes for transmission.
pub struct CommandEncoder;

impl CommandEncoder {
    /// Encodes a single command into the provided buffer (appends bytes).
    pub fn encode_command_into(buffer: &mut Vec<u8>, command: &ProtocolCommand) -> io::Result<()> {
        buffer.write_u8(command.command_type())?;

        match command {
            ProtocolCommand::ConnectRequest { protocol_version, connection_id, channel_count, key } => {
                buffer.write_u16::<BigEndian>(*protocol_version)?;
                buffer.write_u32::<BigEndian>(*connection_id)?;
                buffer.write_u8(*channel_count)?;
                write_bytes(buffer, key)?;
            }
            ProtocolCommand::ConnectAccept { connection_id, channel_count } => {
                buffer.write_u32::<BigEndian>(*connection_id)?;
                buffer.write_u8(*channel_count)?;
            }
            ProtocolCommand::Reject { reliable, data } => {
                buffer.write_u8(u8::from(*reliable))?;
                write_bytes(buffer, data)?;
            }
            ProtocolCommand::Data { channel_id, delivery, sequence, fragment, payload } => {
                buffer.write_u8(*channel_id)?;
                buffer.write_u8(delivery.to_u8())?;
                buffer.write_u8(if fragment.is_some() { DATA_FLAG_FRAGMENT } else { 0 })?;
                buffer.write_u16::<BigEndian>(*sequence)?;
                if let Some(fragment) = fragment {
                    buffer.write_u16::<BigEndian>(fragment.group)?;
                    buffer.write_u16::<BigEndian>(fragment.index)?;
                    buffer.write_u16::<BigEndian>(fragment.count)?;
                }
                write_bytes(buffer, payload)?;
            }
            ProtocolCommand::Ack { channel_id, delivery, window_start, mask } => {
                buffer.write_u8(*channel_id)?;
                buffer.write_u8(delivery.to_u8())?;
                buffer.write_u16::<BigEndian>(*window_start)?;
                buffer.write_u64::<BigEndian>(*mask)?;
            }
            ProtocolCommand::Ping { sequence } | ProtocolCommand::Pong { sequence } => {
                buffer.write_u16::<BigEndian>(*sequence)?;
            }
            ProtocolCommand::Shutdown { data } => {
                write_bytes(buffer, data)?;
            }
            ProtocolCommand::ShutdownOk => {}
            ProtocolCommand::PeerNotFound { connection_id } => {
                buffer.write_u32::<BigEndian>(*connection_id)?;
            }
            ProtocolCommand::Unconnected { kind, data } => {
                buffer.write_u8(kind.to_u8())?;
                write_bytes(buffer, data)?;
            }
        }

        Ok(())
    }

    /// Encodes a datagram into the provided buffer (appends bytes) without intermediate
    /// allocations per command.
    pub fn encode_datagram_into(buffer: &mut Vec<u8>, datagram: &Datagram) -> io::Result<()> {
        if datagram.commands.len() > u8::MAX as usize {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("Too many commands in one datagram: {}", datagram.commands.len()),
            ));
        }

        buffer.write_u32::<BigEndian>(datagram.connection_id)?;
        buffer.write_u8(datagram.commands.len() as u8)?;

        // Reserve space for each length prefix, encode the command, then patch the length.
        for command in &datagram.commands {
            let len_pos = buffer.len();
            buffer.write_u16::<BigEndian>(0)?;
            let start = buffer.len();
            Self::encode_command_into(buffer, command)?;
            let cmd_len = buffer.len() - start;
            if cmd_len > u16::MAX as usize {
                return Err(io::Error::new(io::ErrorKind::InvalidInput, "Command too large"));
            }
            buffer[len_pos..len_pos + 2].copy_from_slice(&(cmd_len as u16).to_be_bytes());
        }

        Ok(())
    }

    /// Encodes a single command into a byte vector
    pub fn encode_command(command: &ProtocolCommand) -> io::Result<Vec<u8>> {
        let mut buffer = Vec::with_capacity(command.encoded_len());
        Self::encode_command_into(&mut buffer, command)?;
        Ok(buffer)
    }

    /// Encodes a datagram into a byte vector
    pub fn encode_datagram(datagram: &Datagram) -> io::Result<Vec<u8>> {
        let mut buffer = Vec::with_capacity(datagram.encoded_len());
        Self::encode_datagram_into(&mut buffer, datagram)?;
        Ok(buffer)
    }
}

fn write_bytes(buffer: &mut Vec<u8>, data: &[u8]) -> io::Result<()> {
    if data.len() > u16::MAX as usize {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("Byte field of {} bytes does not fit a u16 length", data.len()),
        ));
    }
    buffer.write_u16::<BigEndian>(data.len() as u16)?;
    buffer.write_all(data)
}
