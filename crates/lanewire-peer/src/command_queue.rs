use std::collections::VecDeque;

use lanewire_protocol::command::ProtocolCommand;

/// Queue for control commands (handshake, pings, shutdown) waiting for the next flush.
/// Data and acknowledgments are pulled from the channels at flush time instead.
#[derive(Debug)]
pub struct CommandQueue {
    /// Pending commands, in the order they must go out
    commands: VecDeque<ProtocolCommand>,
}

impl CommandQueue {
    /// Creates an empty queue with room for `capacity` commands.
    pub fn new(capacity: usize) -> Self {
        Self { commands: VecDeque::with_capacity(capacity) }
    }

    /// Enqueues a protocol command for the next flush.
    pub fn enqueue(&mut self, command: ProtocolCommand) {
        self.commands.push_back(command);
    }

    /// Returns the number of queued commands.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Returns true if the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Drains all commands from the queue.
    pub fn drain(&mut self) -> impl Iterator<Item = ProtocolCommand> + '_ {
        self.commands.drain(..)
    }

    /// Returns true if a command of the same type is already waiting.
    pub fn contains_type(&self, command_type: u8) -> bool {
        self.commands.iter().any(|c| c.command_type() == command_type)
    }

    /// Keeps only the commands matching `keep`.
    pub fn retain(&mut self, keep: impl FnMut(&ProtocolCommand) -> bool) {
        self.commands.retain(keep);
    }

    /// Clears all pending commands.
    pub fn clear(&mut self) {
        self.commands.clear();
    }
}

impl Default for CommandQueue {
    fn default() -> Self {
        Self::new(16)
    }
}
