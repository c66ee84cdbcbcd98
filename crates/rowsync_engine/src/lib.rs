//! # rowsync engine
//!
//! Bidirectional synchronization between a local `rowsync_store::Store`
//! and a remote peer.
//!
//! This crate provides:
//! - The session state machine (`Orchestrator`)
//! - Conflict detection and per-table resolution policies
//! - The `RemotePeer` abstraction with in-process and loopback peers
//! - A periodic runner with on-demand triggers and retry backoff
//!
//! ## Session model
//!
//! Sessions are **pull-then-push**:
//! 1. Exchange watermarks with the remote (handshake)
//! 2. Pull remote changes since the `received` watermark, page by page
//! 3. Detect conflicts against local changes since the `sent` watermark
//! 4. Resolve conflicts and apply the result locally in one transaction
//! 5. Push local changes
//! 6. Advance both watermarks
//!
//! ## Key Invariants
//!
//! - Watermarks never move backwards and only move after the changes
//!   they cover are committed on the receiving side
//! - A session that aborts leaves no partial local state behind
//! - Re-sending a change the receiver has already applied is a no-op
//! - At most one session runs per orchestrator

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

mod config;
mod detector;
mod error;
mod orchestrator;
mod peer;
mod report;
mod resolver;
mod runner;
mod state;

pub use config::{RetryConfig, RunnerConfig, SessionConfig};
pub use detector::{ConflictDetector, Detection};
pub use error::{SyncError, SyncResult};
pub use orchestrator::Orchestrator;
pub use peer::{LoopbackPeer, RemotePeer, ServerPeer};
pub use report::{PullProgress, SessionReport, SessionStatus, SkipReason, SkippedRow};
pub use resolver::{
    ConflictResolver, MergeError, MergeFn, MergeOutcome, ResolutionPolicy, ResolvedRow, TieBreaker,
};
pub use runner::{RunnerCommand, SessionRunner, SyncHandle};
pub use state::{SessionState, SyncStats};
