//! Periodic and on-demand session scheduling.
//!
//! A [`SessionRunner`] owns the loop that starts sessions: on every
//! interval tick, whenever a [`SyncHandle`] asks for one, and again after a
//! retryable failure once its backoff elapses. Requests that arrive while
//! a session runs are coalesced into a single follow-up session.

use crate::config::RunnerConfig;
use crate::error::{SyncError, SyncResult};
use crate::orchestrator::Orchestrator;
use crate::report::{SessionReport, SessionStatus};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

const COMMAND_BUFFER: usize = 64;

/// Commands accepted by a runner.
#[derive(Debug)]
pub enum RunnerCommand {
    /// Run a session soon; the report is sent back if a channel is given.
    Sync(Option<oneshot::Sender<SessionReport>>),
    /// Stop the runner.
    Shutdown,
}

/// Cloneable handle for requesting sessions from a running
/// [`SessionRunner`].
#[derive(Clone)]
pub struct SyncHandle {
    commands: mpsc::Sender<RunnerCommand>,
    orchestrator: Arc<Orchestrator>,
}

impl SyncHandle {
    /// Requests a session and waits for its report.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Cancelled`] if the runner stops before the
    /// session runs.
    pub async fn request_sync(&self) -> SyncResult<SessionReport> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(RunnerCommand::Sync(Some(tx)))
            .await
            .map_err(|_| SyncError::Cancelled)?;
        rx.await.map_err(|_| SyncError::Cancelled)
    }

    /// Requests a session without waiting for it. Returns false if the
    /// runner has stopped.
    pub fn trigger(&self) -> bool {
        match self.commands.try_send(RunnerCommand::Sync(None)) {
            Ok(()) => true,
            // A full queue already holds a pending request.
            Err(mpsc::error::TrySendError::Full(_)) => true,
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Cancels the running session, if any, and stops the runner.
    pub async fn shutdown(&self) {
        self.orchestrator.cancel();
        let _ = self.commands.send(RunnerCommand::Shutdown).await;
    }

    /// Returns the orchestrator driven by the runner.
    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }
}

/// Drives an [`Orchestrator`] on a schedule.
pub struct SessionRunner {
    orchestrator: Arc<Orchestrator>,
    config: RunnerConfig,
    commands: mpsc::Receiver<RunnerCommand>,
}

impl SessionRunner {
    /// Creates a runner and the handle that controls it.
    pub fn new(orchestrator: Arc<Orchestrator>, config: RunnerConfig) -> (Self, SyncHandle) {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let handle = SyncHandle {
            commands: tx,
            orchestrator: Arc::clone(&orchestrator),
        };
        let runner = Self {
            orchestrator,
            config,
            commands: rx,
        };
        (runner, handle)
    }

    /// Spawns a runner on the current tokio runtime.
    pub fn spawn(orchestrator: Arc<Orchestrator>, config: RunnerConfig) -> (JoinHandle<()>, SyncHandle) {
        let (runner, handle) = Self::new(orchestrator, config);
        (tokio::spawn(runner.run()), handle)
    }

    /// Runs until shut down or until every handle is dropped.
    pub async fn run(mut self) {
        let mut ticker = time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        if !self.config.run_on_start {
            // The first tick completes immediately.
            ticker.tick().await;
        }

        let mut attempt = 0u32;
        let mut retry_at: Option<Instant> = None;
        let mut follow_up = false;
        info!(interval_ms = self.config.interval.as_millis() as u64, "session runner started");

        loop {
            let mut waiters = Vec::new();
            let mut shutdown = false;

            if follow_up {
                follow_up = false;
            } else {
                let retry = async {
                    match retry_at {
                        Some(at) => time::sleep_until(at).await,
                        None => std::future::pending::<()>().await,
                    }
                };
                tokio::select! {
                    _ = ticker.tick() => debug!("scheduled sync"),
                    _ = retry => debug!(attempt, "retrying sync"),
                    command = self.commands.recv() => match command {
                        Some(RunnerCommand::Sync(waiter)) => waiters.extend(waiter),
                        Some(RunnerCommand::Shutdown) | None => break,
                    },
                }
            }

            // Everything queued so far is served by the same session.
            while let Ok(command) = self.commands.try_recv() {
                match command {
                    RunnerCommand::Sync(waiter) => waiters.extend(waiter),
                    RunnerCommand::Shutdown => shutdown = true,
                }
            }
            if shutdown {
                break;
            }

            let report = self.orchestrator.synchronize(&self.config.session).await;

            retry_at = None;
            match &report.status {
                SessionStatus::Completed => {
                    attempt = 0;
                    follow_up = report.remote_has_more;
                }
                SessionStatus::Aborted { error, .. } if error.is_retryable() => {
                    attempt += 1;
                    if attempt < self.config.retry.max_attempts {
                        let delay = self.config.retry.delay_for_attempt(attempt);
                        warn!(attempt, delay_ms = delay.as_millis() as u64, error = %error, "sync failed, will retry");
                        retry_at = Some(Instant::now() + delay);
                    } else {
                        warn!(attempt, error = %error, "sync failed, giving up until next interval");
                        attempt = 0;
                    }
                }
                SessionStatus::Aborted { .. } => attempt = 0,
            }

            for waiter in waiters {
                let _ = waiter.send(report.clone());
            }
        }

        // A shutdown sent while idle must not cancel a later session.
        self.orchestrator.reset_cancel();
        info!("session runner stopped");
    }
}
