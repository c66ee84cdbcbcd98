//! Store configuration.

use crate::clock::{SystemClock, WallClock};
use rowsync_protocol::PeerId;
use std::fmt;
use std::sync::Arc;

/// Configuration for opening a store.
#[derive(Clone)]
pub struct StoreConfig {
    /// Identity of this store. A fresh id is generated for new stores when
    /// unset; a persisted store keeps the id it was created with.
    pub peer_id: Option<PeerId>,

    /// Source of change timestamps.
    pub clock: Arc<dyn WallClock>,

    /// Number of most recent versions whose tombstones survive pruning,
    /// regardless of what peers have acknowledged.
    pub tombstone_retention: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            peer_id: None,
            clock: Arc::new(SystemClock),
            tombstone_retention: 0,
        }
    }
}

impl fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConfig")
            .field("peer_id", &self.peer_id)
            .field("tombstone_retention", &self.tombstone_retention)
            .finish_non_exhaustive()
    }
}

impl StoreConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the peer id used for a newly created store.
    #[must_use]
    pub fn with_peer_id(mut self, peer_id: PeerId) -> Self {
        self.peer_id = Some(peer_id);
        self
    }

    /// Sets the wall clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn WallClock>) -> Self {
        self.clock = clock;
        self
    }

    /// Sets the tombstone retention window.
    #[must_use]
    pub fn with_tombstone_retention(mut self, versions: u64) -> Self {
        self.tombstone_retention = versions;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    #[test]
    fn builder() {
        let peer = PeerId::random();
        let config = StoreConfig::new()
            .with_peer_id(peer)
            .with_clock(Arc::new(ManualClock::new(42)))
            .with_tombstone_retention(10);

        assert_eq!(config.peer_id, Some(peer));
        assert_eq!(config.clock.now_millis(), 42);
        assert_eq!(config.tombstone_retention, 10);
    }
}
