//! Server configuration.

/// Configuration for the sync server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Maximum batch size for pull responses.
    pub max_pull_batch: u32,
    /// Maximum batch size for push requests.
    pub max_push_batch: u32,
    /// Whether handshakes prune tombstones every known peer has
    /// acknowledged.
    pub prune_on_handshake: bool,
}

impl ServerConfig {
    /// Creates a new server configuration.
    pub fn new() -> Self {
        Self {
            max_pull_batch: 100,
            max_push_batch: 100,
            prune_on_handshake: true,
        }
    }

    /// Sets the maximum pull batch size.
    pub fn with_max_pull_batch(mut self, size: u32) -> Self {
        self.max_pull_batch = size;
        self
    }

    /// Sets the maximum push batch size.
    pub fn with_max_push_batch(mut self, size: u32) -> Self {
        self.max_push_batch = size;
        self
    }

    /// Enables or disables tombstone pruning on handshake.
    pub fn with_prune_on_handshake(mut self, enabled: bool) -> Self {
        self.prune_on_handshake = enabled;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new()
    }
}
