//! Datagram decoding.
//!
//! Every failure here is a malformed datagram. Callers drop it and move on.

use std::{
    convert::TryFrom,
    io::{Cursor, Read},
    sync::Arc,
};

use byteorder::{BigEndian, ReadBytesExt};
use lanewire_core::error::{DecodingErrorKind, ErrorKind, Result};

use super::encoder::DATA_FLAG_FRAGMENT;
use crate::{
    command::{Datagram, FragmentInfo, ProtocolCommand},
    packet::{DeliveryMethod, UnconnectedKind},
};

/// Deserializes commands from network bytes.
pub struct CommandDecoder;

impl CommandDecoder {
    /// Decodes a single command from a cursor
    pub fn decode_command(cursor: &mut Cursor<&[u8]>) -> Result<ProtocolCommand> {
        let cmd_type = read_u8(cursor)?;

        let command = match cmd_type {
            1 => ProtocolCommand::ConnectRequest {
                protocol_version: read_u16(cursor)?,
                connection_id: read_u32(cursor)?,
                channel_count: read_u8(cursor)?,
                key: read_bytes(cursor)?,
            },
            2 => ProtocolCommand::ConnectAccept {
                connection_id: read_u32(cursor)?,
                channel_count: read_u8(cursor)?,
            },
            3 => ProtocolCommand::Reject {
                reliable: read_u8(cursor)? != 0,
                data: read_bytes(cursor)?,
            },
            4 => {
                let channel_id = read_u8(cursor)?;
                let delivery = DeliveryMethod::try_from(read_u8(cursor)?)?;
                let flags = read_u8(cursor)?;
                let sequence = read_u16(cursor)?;
                let fragment = if flags & DATA_FLAG_FRAGMENT != 0 {
                    Some(FragmentInfo {
                        group: read_u16(cursor)?,
                        index: read_u16(cursor)?,
                        count: read_u16(cursor)?,
                    })
                } else {
                    None
                };
                let payload = read_bytes(cursor)?;
                ProtocolCommand::Data { channel_id, delivery, sequence, fragment, payload }
            }
            5 => ProtocolCommand::Ack {
                channel_id: read_u8(cursor)?,
                delivery: DeliveryMethod::try_from(read_u8(cursor)?)?,
                window_start: read_u16(cursor)?,
                mask: read_u64(cursor)?,
            },
            6 => ProtocolCommand::Ping { sequence: read_u16(cursor)? },
            7 => ProtocolCommand::Pong { sequence: read_u16(cursor)? },
            8 => ProtocolCommand::Shutdown { data: read_bytes(cursor)? },
            9 => ProtocolCommand::ShutdownOk,
            10 => ProtocolCommand::PeerNotFound { connection_id: read_u32(cursor)? },
            11 => ProtocolCommand::Unconnected {
                kind: UnconnectedKind::try_from(read_u8(cursor)?)?,
                data: read_bytes(cursor)?,
            },
            _ => return Err(ErrorKind::DecodingError(DecodingErrorKind::CommandType)),
        };

        Ok(command)
    }

    /// Decodes a datagram containing one or more commands
    pub fn decode_datagram(data: &[u8]) -> Result<Datagram> {
        let mut cursor = Cursor::new(data);
        let connection_id = cursor
            .read_u32::<BigEndian>()
            .map_err(|_| ErrorKind::CouldNotReadHeader("datagram".into()))?;
        let cmd_count = cursor
            .read_u8()
            .map_err(|_| ErrorKind::CouldNotReadHeader("datagram".into()))?;

        if cmd_count == 0 {
            return Err(ErrorKind::ReceivedDataToShort);
        }

        let mut datagram = Datagram::new(connection_id);
        for _ in 0..cmd_count {
            let cmd_len = read_u16(&mut cursor)? as usize;
            let pos = cursor.position() as usize;

            if pos + cmd_len > data.len() {
                return Err(ErrorKind::DecodingError(DecodingErrorKind::Truncated));
            }

            let mut cmd_cursor = Cursor::new(&data[pos..pos + cmd_len]);
            datagram.add_command(Self::decode_command(&mut cmd_cursor)?);
            cursor.set_position((pos + cmd_len) as u64);
        }

        Ok(datagram)
    }
}

fn truncated<T>(_: std::io::Error) -> Result<T> {
    Err(ErrorKind::DecodingError(DecodingErrorKind::Truncated))
}

fn read_u8(cursor: &mut Cursor<&[u8]>) -> Result<u8> {
    cursor.read_u8().or_else(truncated)
}

fn read_u16(cursor: &mut Cursor<&[u8]>) -> Result<u16> {
    cursor.read_u16::<BigEndian>().or_else(truncated)
}

fn read_u32(cursor: &mut Cursor<&[u8]>) -> Result<u32> {
    cursor.read_u32::<BigEndian>().or_else(truncated)
}

fn read_u64(cursor: &mut Cursor<&[u8]>) -> Result<u64> {
    cursor.read_u64::<BigEndian>().or_else(truncated)
}

fn read_bytes(cursor: &mut Cursor<&[u8]>) -> Result<Arc<[u8]>> {
    let len = read_u16(cursor)? as usize;
    let mut data = vec![0u8; len];
    cursor.read_exact(&mut data).or_else(truncated)?;
    Ok(data.into())
}
