//! Exchange progress between two peers.

use crate::operation::Version;
use serde::{Deserialize, Serialize};

/// Per-relationship exchange progress, held by the local store.
///
/// Watermarks only move forward: [`Watermark::advance`] takes the
/// component-wise maximum.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Watermark {
    /// Highest remote version pulled and committed locally.
    pub received: Version,
    /// Highest local version pushed and acknowledged by the remote.
    pub sent: Version,
}

impl Watermark {
    /// Creates a watermark.
    pub const fn new(received: Version, sent: Version) -> Self {
        Self { received, sent }
    }

    /// Returns the component-wise maximum of `self` and `other`.
    #[must_use]
    pub fn advance(self, other: Watermark) -> Watermark {
        Watermark {
            received: self.received.max(other.received),
            sent: self.sent.max(other.sent),
        }
    }
}
