//! One reliability lane: a channel id paired with a delivery method.
//!
//! All five delivery methods share this type. The send window, acknowledgment mask and
//! resend bookkeeping are common; only the point where a received packet is surfaced
//! (immediately, in order, or only if newer) branches on the method.
//!
//! The reliable window spans [`WINDOW_SIZE`] sequence numbers, far less than half of the
//! 16-bit sequence space, so wrapping comparisons are never ambiguous.

use std::{
    collections::VecDeque,
    sync::Arc,
    time::{Duration, Instant},
};

use lanewire_core::{
    constants::WINDOW_SIZE,
    error::{ErrorKind, Result},
};

use crate::{
    command::{FragmentInfo, ProtocolCommand},
    packet::{DeliveryMethod, SequenceNumber},
    sequence::{sequence_diff, sequence_greater_than},
};

const WINDOW: usize = WINDOW_SIZE as usize;

/// Message waiting for a sequence number.
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingMessage {
    /// Payload (one fragment if `fragment` is set)
    pub payload: Arc<[u8]>,
    /// Fragment position, when the message is part of a group
    pub fragment: Option<FragmentInfo>,
}

impl OutgoingMessage {
    /// Creates an unfragmented message.
    pub fn whole(payload: Arc<[u8]>) -> Self {
        Self { payload, fragment: None }
    }
}

/// Message released by a channel, ready for reassembly or delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedMessage {
    /// Payload (one fragment if `fragment` is set)
    pub payload: Arc<[u8]>,
    /// Fragment position, when the message is part of a group
    pub fragment: Option<FragmentInfo>,
}

#[derive(Debug)]
struct PendingPacket {
    sequence: SequenceNumber,
    payload: Arc<[u8]>,
    fragment: Option<FragmentInfo>,
    last_sent: Option<Instant>,
    send_count: u32,
}

impl PendingPacket {
    fn new(sequence: SequenceNumber, message: OutgoingMessage) -> Self {
        Self {
            sequence,
            payload: message.payload,
            fragment: message.fragment,
            last_sent: None,
            send_count: 0,
        }
    }

    fn is_due(&self, now: Instant, resend_delay: Duration) -> bool {
        match self.last_sent {
            None => true,
            Some(sent) => now.saturating_duration_since(sent) >= resend_delay,
        }
    }
}

/// Counters kept per channel.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ChannelCounters {
    /// Data commands produced, retransmissions included
    pub sent: u64,
    /// Data commands produced again after a resend timeout
    pub retransmitted: u64,
    /// Messages released to the receiver
    pub delivered: u64,
    /// Arrivals suppressed because they were already received
    pub duplicates: u64,
    /// Arrivals dropped because something newer was delivered already
    pub stale: u64,
    /// Outgoing messages discarded because a newer one replaced them
    pub superseded: u64,
}

/// Send and receive state for one (channel id, delivery method) pair.
#[derive(Debug)]
pub struct Channel {
    channel_id: u8,
    delivery: DeliveryMethod,
    max_pending: usize,

    /// Messages not yet given a sequence number
    queue: VecDeque<OutgoingMessage>,
    /// Next sequence number to assign
    local_sequence: SequenceNumber,
    /// Oldest unacknowledged sequence number
    local_window_start: SequenceNumber,
    /// Unacknowledged packets, indexed by `sequence % WINDOW`
    window: Vec<Option<PendingPacket>>,
    /// Single pending packet of a reliable sequenced channel
    latest: Option<PendingPacket>,

    /// Next sequence number expected from the remote
    remote_window_start: SequenceNumber,
    /// Received flags for `remote_window_start..remote_window_start + WINDOW`
    received: Vec<bool>,
    /// Out-of-order arrivals held until the gap closes (ordered only)
    held: Vec<Option<ReceivedMessage>>,
    /// Newest sequence delivered (sequenced methods)
    last_delivered: Option<SequenceNumber>,

    ack_requested: bool,
    sequenced_ack: Option<SequenceNumber>,
    counters: ChannelCounters,
}

impl Channel {
    /// Creates a channel. `max_pending` bounds the messages waiting for window space.
    pub fn new(channel_id: u8, delivery: DeliveryMethod, max_pending: usize) -> Self {
        let windowed = matches!(
            delivery,
            DeliveryMethod::ReliableOrdered | DeliveryMethod::ReliableUnordered
        );
        let slots = if windowed { WINDOW } else { 0 };

        Self {
            channel_id,
            delivery,
            max_pending: max_pending.max(1),
            queue: VecDeque::new(),
            local_sequence: 0,
            local_window_start: 0,
            window: (0..slots).map(|_| None).collect(),
            latest: None,
            remote_window_start: 0,
            received: vec![false; slots],
            held: (0..if delivery == DeliveryMethod::ReliableOrdered { WINDOW } else { 0 })
                .map(|_| None)
                .collect(),
            last_delivered: None,
            ack_requested: false,
            sequenced_ack: None,
            counters: ChannelCounters::default(),
        }
    }

    /// Returns the channel id.
    pub fn channel_id(&self) -> u8 {
        self.channel_id
    }

    /// Returns the delivery method.
    pub fn delivery(&self) -> DeliveryMethod {
        self.delivery
    }

    /// Returns the counters collected so far.
    pub fn counters(&self) -> ChannelCounters {
        self.counters
    }

    /// Messages that can still be queued before `send` reports the channel as full.
    pub fn available_capacity(&self) -> usize {
        if self.delivery == DeliveryMethod::ReliableSequenced {
            return 1;
        }
        self.max_pending.saturating_sub(self.queue.len())
    }

    /// Number of sent packets still waiting for an acknowledgment.
    pub fn in_flight(&self) -> usize {
        match self.delivery {
            DeliveryMethod::ReliableSequenced => usize::from(self.latest.is_some()),
            DeliveryMethod::ReliableOrdered | DeliveryMethod::ReliableUnordered => {
                self.window.iter().filter(|slot| slot.is_some()).count()
            }
            _ => 0,
        }
    }

    /// Returns true while anything is queued or unacknowledged.
    pub fn has_pending(&self) -> bool {
        !self.queue.is_empty() || self.in_flight() > 0
    }

    /// Queues a message for transmission.
    ///
    /// On a reliable sequenced channel the new message replaces anything still queued or
    /// unacknowledged. Other channels refuse the message once `max_pending` messages are
    /// waiting for window space.
    pub fn send(&mut self, message: OutgoingMessage) -> Result<()> {
        if self.delivery == DeliveryMethod::ReliableSequenced {
            let replaced = self.queue.len() + usize::from(self.latest.is_some());
            self.counters.superseded += replaced as u64;
            self.queue.clear();
            self.latest = None;
            self.queue.push_back(message);
            return Ok(());
        }

        if self.queue.len() >= self.max_pending {
            return Err(ErrorKind::ChannelFull { channel_id: self.channel_id });
        }
        self.queue.push_back(message);
        Ok(())
    }

    /// Produces the data commands due now: first transmissions plus retransmissions of
    /// reliable packets whose resend timer expired.
    pub fn poll_outgoing(&mut self, now: Instant, resend_delay: Duration) -> Vec<ProtocolCommand> {
        let mut commands = Vec::new();

        match self.delivery {
            DeliveryMethod::Unreliable => {
                while let Some(message) = self.queue.pop_front() {
                    commands.push(self.data_command(0, message.payload, message.fragment));
                }
            }
            DeliveryMethod::Sequenced => {
                while let Some(message) = self.queue.pop_front() {
                    let sequence = self.next_sequence();
                    commands.push(self.data_command(sequence, message.payload, message.fragment));
                }
            }
            DeliveryMethod::ReliableSequenced => {
                if let Some(message) = self.queue.pop_back() {
                    self.queue.clear();
                    let sequence = self.next_sequence();
                    self.latest = Some(PendingPacket::new(sequence, message));
                }
                if let Some(mut pending) = self.latest.take() {
                    if pending.is_due(now, resend_delay) {
                        commands.push(self.transmit(&mut pending, now));
                    }
                    self.latest = Some(pending);
                }
            }
            DeliveryMethod::ReliableOrdered | DeliveryMethod::ReliableUnordered => {
                self.fill_window();
                let in_flight = sequence_diff(self.local_sequence, self.local_window_start);
                for offset in 0..in_flight {
                    let sequence = self.local_window_start.wrapping_add(offset as u16);
                    let slot = slot_of(sequence);
                    if let Some(mut pending) = self.window[slot].take() {
                        if pending.is_due(now, resend_delay) {
                            commands.push(self.transmit(&mut pending, now));
                        }
                        self.window[slot] = Some(pending);
                    }
                }
            }
        }

        commands
    }

    /// Applies an acknowledgment. Returns round-trip samples for packets that were
    /// transmitted exactly once; retransmitted packets give ambiguous timings.
    pub fn on_ack(&mut self, window_start: SequenceNumber, mask: u64, now: Instant) -> Vec<Duration> {
        let mut samples = Vec::new();

        match self.delivery {
            DeliveryMethod::ReliableSequenced => {
                let acked = self
                    .latest
                    .as_ref()
                    .map_or(false, |pending| sequence_diff(pending.sequence, window_start) <= 0);
                if acked {
                    if let Some(pending) = self.latest.take() {
                        push_sample(&mut samples, &pending, now);
                    }
                }
            }
            DeliveryMethod::ReliableOrdered | DeliveryMethod::ReliableUnordered => {
                let in_flight = sequence_diff(self.local_sequence, self.local_window_start);
                for offset in 0..in_flight {
                    let sequence = self.local_window_start.wrapping_add(offset as u16);
                    let slot = slot_of(sequence);
                    let acked = self.window[slot].as_ref().map_or(false, |pending| {
                        let rel = sequence_diff(pending.sequence, window_start);
                        rel < 0 || (rel < WINDOW as i32 && mask & (1u64 << rel) != 0)
                    });
                    if acked {
                        if let Some(pending) = self.window[slot].take() {
                            push_sample(&mut samples, &pending, now);
                        }
                    }
                }

                while self.local_window_start != self.local_sequence
                    && self.window[slot_of(self.local_window_start)].is_none()
                {
                    self.local_window_start = self.local_window_start.wrapping_add(1);
                }
            }
            _ => {
                tracing::trace!(
                    "Ignoring ack on unreliable channel {} ({:?})",
                    self.channel_id,
                    self.delivery
                );
            }
        }

        samples
    }

    /// Applies an incoming data packet and returns the messages it releases, in the order
    /// they must be surfaced.
    pub fn on_data(
        &mut self,
        sequence: SequenceNumber,
        fragment: Option<FragmentInfo>,
        payload: Arc<[u8]>,
    ) -> Vec<ReceivedMessage> {
        let message = ReceivedMessage { payload, fragment };

        let released = match self.delivery {
            DeliveryMethod::Unreliable => vec![message],
            DeliveryMethod::Sequenced => self.accept_if_newer(sequence, message),
            DeliveryMethod::ReliableSequenced => {
                self.ack_requested = true;
                self.sequenced_ack = match self.sequenced_ack {
                    Some(prev) if !sequence_greater_than(sequence, prev) => Some(prev),
                    _ => Some(sequence),
                };
                self.accept_if_newer(sequence, message)
            }
            DeliveryMethod::ReliableOrdered | DeliveryMethod::ReliableUnordered => {
                self.ack_requested = true;
                self.accept_windowed(sequence, message)
            }
        };

        self.counters.delivered += released.len() as u64;
        released
    }

    /// Builds the acknowledgment owed to the remote, if any arrival happened since the last one.
    pub fn take_ack(&mut self) -> Option<ProtocolCommand> {
        if !self.ack_requested {
            return None;
        }
        self.ack_requested = false;

        let (window_start, mask) = match self.delivery {
            DeliveryMethod::ReliableSequenced => (self.sequenced_ack.take()?, 1),
            DeliveryMethod::ReliableOrdered | DeliveryMethod::ReliableUnordered => {
                let mut mask = 0u64;
                for offset in 0..WINDOW {
                    let sequence = self.remote_window_start.wrapping_add(offset as u16);
                    if self.received[slot_of(sequence)] {
                        mask |= 1u64 << offset;
                    }
                }
                (self.remote_window_start, mask)
            }
            _ => return None,
        };

        Some(ProtocolCommand::Ack {
            channel_id: self.channel_id,
            delivery: self.delivery,
            window_start,
            mask,
        })
    }

    fn next_sequence(&mut self) -> SequenceNumber {
        let sequence = self.local_sequence;
        self.local_sequence = self.local_sequence.wrapping_add(1);
        sequence
    }

    fn fill_window(&mut self) {
        while sequence_diff(self.local_sequence, self.local_window_start) < WINDOW as i32 {
            let Some(message) = self.queue.pop_front() else {
                break;
            };
            let sequence = self.next_sequence();
            self.window[slot_of(sequence)] = Some(PendingPacket::new(sequence, message));
        }
    }

    fn transmit(&mut self, pending: &mut PendingPacket, now: Instant) -> ProtocolCommand {
        if pending.send_count > 0 {
            self.counters.retransmitted += 1;
        }
        pending.send_count += 1;
        pending.last_sent = Some(now);
        self.data_command(pending.sequence, Arc::clone(&pending.payload), pending.fragment)
    }

    fn data_command(
        &mut self,
        sequence: SequenceNumber,
        payload: Arc<[u8]>,
        fragment: Option<FragmentInfo>,
    ) -> ProtocolCommand {
        self.counters.sent += 1;
        ProtocolCommand::Data {
            channel_id: self.channel_id,
            delivery: self.delivery,
            sequence,
            fragment,
            payload,
        }
    }

    fn accept_if_newer(
        &mut self,
        sequence: SequenceNumber,
        message: ReceivedMessage,
    ) -> Vec<ReceivedMessage> {
        let newer = self
            .last_delivered
            .map_or(true, |last| sequence_greater_than(sequence, last));
        if !newer {
            self.counters.stale += 1;
            return Vec::new();
        }
        self.last_delivered = Some(sequence);
        vec![message]
    }

    fn accept_windowed(
        &mut self,
        sequence: SequenceNumber,
        message: ReceivedMessage,
    ) -> Vec<ReceivedMessage> {
        let rel = sequence_diff(sequence, self.remote_window_start);
        if rel < 0 {
            // Behind the window: delivered long ago, the ack got lost.
            self.counters.duplicates += 1;
            return Vec::new();
        }
        if rel >= WINDOW as i32 {
            tracing::trace!(
                "Sequence {} outside receive window starting at {} on channel {}",
                sequence,
                self.remote_window_start,
                self.channel_id
            );
            return Vec::new();
        }

        let slot = slot_of(sequence);
        if self.received[slot] {
            self.counters.duplicates += 1;
            return Vec::new();
        }
        self.received[slot] = true;

        let mut released = Vec::new();
        if self.delivery == DeliveryMethod::ReliableOrdered {
            self.held[slot] = Some(message);
            while self.received[slot_of(self.remote_window_start)] {
                let front = slot_of(self.remote_window_start);
                if let Some(ready) = self.held[front].take() {
                    released.push(ready);
                }
                self.received[front] = false;
                self.remote_window_start = self.remote_window_start.wrapping_add(1);
            }
        } else {
            released.push(message);
            while self.received[slot_of(self.remote_window_start)] {
                self.received[slot_of(self.remote_window_start)] = false;
                self.remote_window_start = self.remote_window_start.wrapping_add(1);
            }
        }
        released
    }
}

fn slot_of(sequence: SequenceNumber) -> usize {
    sequence as usize % WINDOW
}

fn push_sample(samples: &mut Vec<Duration>, pending: &PendingPacket, now: Instant) {
    if pending.send_count == 1 {
        if let Some(sent) = pending.last_sent {
            samples.push(now.saturating_duration_since(sent));
        }
    }
}
