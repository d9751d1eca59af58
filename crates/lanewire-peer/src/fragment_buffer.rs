//! Fragment reassembly.
//!
//! Messages larger than one datagram are split into a fragment group that travels through
//! the owning channel piece by piece. Each fragment carries the group id, its index and the
//! total count. Groups are keyed by (channel id, delivery method, group id).
//!
//! # Fragment Lifecycle
//!
//! 1. **Reception**: the first fragment of a group creates a [`FragmentGroup`] sized to the
//!    announced count.
//! 2. **Reassembly**: once every index is present the parts are concatenated in index order
//!    and the group is released.
//! 3. **Eviction**: incomplete groups of unreliable channels are dropped after the fragment
//!    timeout. Reliable groups stay until complete, since the channel retransmits the missing
//!    fragment. Every group goes away with the peer.

use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use lanewire_protocol::{command::FragmentInfo, packet::DeliveryMethod};

/// Collects the fragments of one group.
#[derive(Debug)]
pub struct FragmentGroup {
    /// Delivery method of the owning channel
    delivery: DeliveryMethod,
    /// Fragments received so far, indexed by fragment index
    parts: Vec<Option<Arc<[u8]>>>,
    /// Number of `Some` entries in `parts`
    received: usize,
    /// Timestamp of the first fragment (for timeout detection)
    created_at: Instant,
}

impl FragmentGroup {
    /// Creates a buffer expecting `count` fragments.
    pub fn new(delivery: DeliveryMethod, count: u16, created_at: Instant) -> Self {
        Self {
            delivery,
            parts: (0..count).map(|_| None).collect(),
            received: 0,
            created_at,
        }
    }

    /// Number of fragments the group is made of.
    pub fn count(&self) -> usize {
        self.parts.len()
    }

    /// Stores a fragment. Returns false if the index was already present.
    pub fn add_fragment(&mut self, index: u16, data: Arc<[u8]>) -> bool {
        match self.parts.get_mut(index as usize) {
            Some(slot) if slot.is_none() => {
                *slot = Some(data);
                self.received += 1;
                true
            }
            _ => false,
        }
    }

    /// Checks if all fragments have been received.
    pub fn is_complete(&self) -> bool {
        self.received == self.parts.len()
    }

    /// Concatenates the fragments in index order. Returns `None` while incomplete.
    pub fn reassemble(self) -> Option<Vec<u8>> {
        if !self.is_complete() {
            return None;
        }

        let total = self.parts.iter().flatten().map(|part| part.len()).sum();
        let mut result = Vec::with_capacity(total);
        for part in self.parts.into_iter().flatten() {
            result.extend_from_slice(&part);
        }
        Some(result)
    }

    /// Returns the timestamp when the first fragment was received.
    pub fn created_at(&self) -> Instant {
        self.created_at
    }
}

type GroupKey = (u8, DeliveryMethod, u16);

/// Every open fragment group of one peer.
#[derive(Debug)]
pub struct FragmentAssembler {
    groups: HashMap<GroupKey, FragmentGroup>,
    max_fragments: u16,
    timeout: Duration,
}

impl FragmentAssembler {
    /// Creates an assembler refusing groups larger than `max_fragments`.
    pub fn new(max_fragments: u16, timeout: Duration) -> Self {
        Self { groups: HashMap::new(), max_fragments, timeout }
    }

    /// Adds one fragment; returns the full message when this fragment completed its group.
    ///
    /// A fragment announcing an invalid index or count, or a count different from the one
    /// its group was created with, discards the whole group.
    pub fn insert(
        &mut self,
        channel_id: u8,
        delivery: DeliveryMethod,
        info: FragmentInfo,
        data: Arc<[u8]>,
        time: Instant,
    ) -> Option<Vec<u8>> {
        let key = (channel_id, delivery, info.group);

        if info.count == 0 || info.count > self.max_fragments || info.index >= info.count {
            tracing::warn!(
                "Discarding fragment group {} on channel {}: fragment {}/{} exceeds limit {}",
                info.group,
                channel_id,
                info.index,
                info.count,
                self.max_fragments
            );
            self.groups.remove(&key);
            return None;
        }

        let group = self
            .groups
            .entry(key)
            .or_insert_with(|| FragmentGroup::new(delivery, info.count, time));

        if group.count() != info.count as usize {
            tracing::warn!(
                "Discarding fragment group {} on channel {}: count changed from {} to {}",
                info.group,
                channel_id,
                group.count(),
                info.count
            );
            self.groups.remove(&key);
            return None;
        }

        if !group.add_fragment(info.index, data) {
            tracing::trace!("Duplicate fragment {} of group {}", info.index, info.group);
            return None;
        }

        if !group.is_complete() {
            return None;
        }
        self.groups.remove(&key).and_then(FragmentGroup::reassemble)
    }

    /// Drops incomplete unreliable groups older than the fragment timeout.
    pub fn cleanup_stale(&mut self, time: Instant) {
        let timeout = self.timeout;
        let before = self.groups.len();
        self.groups.retain(|_, group| {
            group.delivery.is_reliable()
                || time.saturating_duration_since(group.created_at()) <= timeout
        });

        let removed = before - self.groups.len();
        if removed > 0 {
            tracing::warn!(
                "Cleaning up {} stale fragment group(s) that timed out after {:?}",
                removed,
                timeout
            );
        }
    }

    /// Number of groups still waiting for fragments.
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// Returns true when no group is open.
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Drops every group.
    pub fn clear(&mut self) {
        self.groups.clear();
    }
}
