use std::sync::{
    atomic::{AtomicU32, Ordering},
    Arc,
};

use rand::Rng;

/// Source of local connection ids, owned by one session manager and shared with its
/// controllers.
///
/// Ids start at a random value and increase by one per connection. Zero is reserved for
/// connectionless datagrams and is never handed out.
#[derive(Debug, Clone)]
pub struct ConnectionIds {
    next: Arc<AtomicU32>,
}

impl ConnectionIds {
    /// Starts at a random id.
    pub fn new() -> Self {
        Self::starting_at(rand::rng().random())
    }

    /// Starts at `first`; handy for tests that want predictable ids.
    pub fn starting_at(first: u32) -> Self {
        Self { next: Arc::new(AtomicU32::new(first)) }
    }

    /// Hands out the next id.
    pub fn next_id(&self) -> u32 {
        loop {
            let id = self.next.fetch_add(1, Ordering::Relaxed);
            if id != 0 {
                return id;
            }
        }
    }
}

impl Default for ConnectionIds {
    fn default() -> Self {
        Self::new()
    }
}
