use std::sync::Arc;

use lanewire_core::{
    constants::{COMMAND_LENGTH_PREFIX, DATAGRAM_HEADER_SIZE, DATA_HEADER_SIZE, FRAGMENT_HEADER_SIZE},
    error::{ErrorKind, Result},
};
use lanewire_protocol::{
    channel::OutgoingMessage,
    command::FragmentInfo,
    packet::DeliveryMethod,
};

use super::Peer;

impl Peer {
    /// Largest payload that fits one datagram as a single, unfragmented data command.
    pub fn max_single_payload(&self) -> usize {
        self.mtu
            .saturating_sub(DATAGRAM_HEADER_SIZE + COMMAND_LENGTH_PREFIX + DATA_HEADER_SIZE)
    }

    /// Largest payload a single fragment can carry.
    pub fn max_fragment_payload(&self) -> usize {
        self.max_single_payload().saturating_sub(FRAGMENT_HEADER_SIZE)
    }

    /// Queues a message on the given channel, splitting it into a fragment group when it
    /// does not fit one datagram.
    ///
    /// Fails with `PeerDisconnected` once a disconnect started, `InvalidChannel` for ids beyond
    /// the negotiated count, `PayloadTooLarge` when the message needs more than
    /// `max_fragments` fragments or the delivery method cannot fragment, and `ChannelFull`
    /// when the channel queue has no room for the whole message.
    pub fn send(&mut self, channel_id: u8, delivery: DeliveryMethod, payload: Arc<[u8]>) -> Result<()> {
        if !self.state.accepts_messages() {
            return Err(ErrorKind::PeerDisconnected);
        }
        if channel_id >= self.channel_count {
            return Err(ErrorKind::InvalidChannel(channel_id));
        }

        let max_single = self.max_single_payload();
        if payload.len() <= max_single {
            return self.channel_mut(channel_id, delivery).send(OutgoingMessage::whole(payload));
        }

        if !delivery.allows_fragmentation() {
            return Err(ErrorKind::PayloadTooLarge { size: payload.len(), max: max_single });
        }

        let fragment_payload = self.max_fragment_payload();
        let max_fragments = self.config.max_fragments as usize;
        if fragment_payload == 0 {
            return Err(ErrorKind::PayloadTooLarge { size: payload.len(), max: max_single });
        }

        let total_fragments = (payload.len() + fragment_payload - 1) / fragment_payload;
        if total_fragments > max_fragments {
            tracing::warn!(
                "Payload {} bytes too large to fragment: would require {} fragments (max {})",
                payload.len(),
                total_fragments,
                max_fragments
            );
            return Err(ErrorKind::PayloadTooLarge {
                size: payload.len(),
                max: fragment_payload * max_fragments,
            });
        }

        let group = self.next_fragment_group;
        let channel = self.channel_mut(channel_id, delivery);
        if channel.available_capacity() < total_fragments {
            return Err(ErrorKind::ChannelFull { channel_id });
        }

        tracing::trace!(
            "Fragmenting {} byte payload into {} fragments ({} bytes each)",
            payload.len(),
            total_fragments,
            fragment_payload
        );

        for (index, chunk) in payload.chunks(fragment_payload).enumerate() {
            channel.send(OutgoingMessage {
                payload: Arc::from(chunk),
                fragment: Some(FragmentInfo {
                    group,
                    index: index as u16,
                    count: total_fragments as u16,
                }),
            })?;
        }

        self.next_fragment_group = group.wrapping_add(1);
        Ok(())
    }
}
