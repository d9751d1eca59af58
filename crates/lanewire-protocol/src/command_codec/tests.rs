//! Encoding and decoding tests for datagrams.

use std::io::Cursor;

use lanewire_core::error::{DecodingErrorKind, ErrorKind};

use super::{CommandDecoder, CommandEncoder};
use crate::{
    command::{Datagram, FragmentInfo, ProtocolCommand},
    packet::{DeliveryMethod, UnconnectedKind},
};

fn round_trip(cmd: &ProtocolCommand) -> ProtocolCommand {
    let encoded = CommandEncoder::encode_command(cmd).unwrap();
    assert_eq!(encoded.len(), cmd.encoded_len(), "encoded_len disagrees for {:?}", cmd);
    let mut cursor = Cursor::new(encoded.as_slice());
    CommandDecoder::decode_command(&mut cursor).unwrap()
}

#[test]
fn test_encode_decode_fragmented_data() {
    let cmd = ProtocolCommand::Data {
        channel_id: 2,
        delivery: DeliveryMethod::ReliableUnordered,
        sequence: 65535,
        fragment: Some(FragmentInfo { group: 9, index: 3, count: 4 }),
        payload: vec![1, 2, 3, 4].into(),
    };
    assert_eq!(round_trip(&cmd), cmd);
}

#[test]
fn test_encode_decode_handshake_commands() {
    let request = ProtocolCommand::ConnectRequest {
        protocol_version: 1,
        connection_id: 0xDEAD_BEEF,
        channel_count: 8,
        key: b"secret".to_vec().into(),
    };
    assert_eq!(round_trip(&request), request);

    let reject = ProtocolCommand::Reject { reliable: true, data: b"full".to_vec().into() };
    assert_eq!(round_trip(&reject), reject);
}

#[test]
fn test_encode_decode_ack_mask() {
    let cmd = ProtocolCommand::Ack {
        channel_id: 0,
        delivery: DeliveryMethod::ReliableOrdered,
        window_start: 100,
        mask: 0x8000_0000_0000_0001,
    };
    assert_eq!(round_trip(&cmd), cmd);
}

#[test]
fn test_encode_decode_datagram() {
    let mut datagram = Datagram::new(42);
    datagram.add_command(ProtocolCommand::Ping { sequence: 1000 });
    datagram.add_command(ProtocolCommand::Unconnected {
        kind: UnconnectedKind::Broadcast,
        data: vec![5, 6, 7].into(),
    });
    datagram.add_command(ProtocolCommand::ShutdownOk);

    let encoded = CommandEncoder::encode_datagram(&datagram).unwrap();
    assert_eq!(encoded.len(), datagram.encoded_len());

    let decoded = CommandDecoder::decode_datagram(&encoded).unwrap();
    assert_eq!(decoded, datagram);
}

#[test]
fn test_truncated_datagram_is_rejected() {
    let datagram = Datagram::single(1, ProtocolCommand::Shutdown { data: vec![1; 20].into() });
    let encoded = CommandEncoder::encode_datagram(&datagram).unwrap();

    let result = CommandDecoder::decode_datagram(&encoded[..encoded.len() - 5]);
    assert!(matches!(result, Err(ErrorKind::DecodingError(DecodingErrorKind::Truncated))));
}

#[test]
fn test_unknown_command_type_is_rejected() {
    // connection id 0, one command of length 1 with type 200
    let bytes = [0, 0, 0, 0, 1, 0, 1, 200];
    let result = CommandDecoder::decode_datagram(&bytes);
    assert!(matches!(result, Err(ErrorKind::DecodingError(DecodingErrorKind::CommandType))));
}

#[test]
fn test_empty_and_headerless_input_is_rejected() {
    assert!(matches!(
        CommandDecoder::decode_datagram(&[]),
        Err(ErrorKind::CouldNotReadHeader(_))
    ));
    assert!(matches!(
        CommandDecoder::decode_datagram(&[0, 0, 0, 1, 0]),
        Err(ErrorKind::ReceivedDataToShort)
    ));
}

#[test]
fn test_unknown_delivery_method_is_rejected() {
    let cmd = ProtocolCommand::Data {
        channel_id: 0,
        delivery: DeliveryMethod::Unreliable,
        sequence: 0,
        fragment: None,
        payload: Vec::<u8>::new().into(),
    };
    let mut encoded = CommandEncoder::encode_command(&cmd).unwrap();
    encoded[2] = 9;
    let mut cursor = Cursor::new(encoded.as_slice());
    assert!(matches!(
        CommandDecoder::decode_command(&mut cursor),
        Err(ErrorKind::DecodingError(DecodingErrorKind::DeliveryMethod))
    ));
}
