//! Identifier types and allocation
//!
//! Protocol ids are integers in `1..=2^53` so they survive a round trip
//! through IEEE doubles on the peer side.

use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};

/// Generic protocol identifier
pub type Id = u64;

/// Session identifier, unique within a realm
pub type SessionId = Id;

/// Subscription identifier, unique and increasing within a realm
pub type SubscriptionId = Id;

/// Registration identifier, unique and increasing within a realm
pub type RegistrationId = Id;

/// Publication identifier, shared by every event of one publish
pub type PublicationId = Id;

/// Request identifier chosen by the sending peer
pub type RequestId = Id;

/// Largest id allowed on the wire
pub const MAX_ID: Id = 1 << 53;

/// Draw a random id from the global scope
pub fn random_id() -> Id {
    rand::thread_rng().gen_range(1..=MAX_ID)
}

/// Monotonic id allocator for router-scoped ids
#[derive(Debug)]
pub struct IdSequence {
    next: AtomicU64,
}

impl IdSequence {
    /// Create a sequence starting at 1
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Allocate the next id
    pub fn next_id(&self) -> Id {
        let id = self.next.fetch_add(1, Ordering::Relaxed);
        debug_assert!(id <= MAX_ID, "id sequence exhausted");
        id
    }

    /// Peek at the id the next call will return
    pub fn peek(&self) -> Id {
        self.next.load(Ordering::Relaxed)
    }
}

impl Default for IdSequence {
    fn default() -> Self {
        Self::new()
    }
}
