//! Configuration for sync sessions and the session runner.

use crate::resolver::{ResolutionPolicy, TieBreaker};
use rand::Rng;
use std::collections::HashMap;
use std::time::Duration;

/// Configuration for one synchronization session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Tables to synchronize. Empty means every table.
    pub tables: Vec<String>,
    /// Policy for tables without an override.
    pub default_policy: ResolutionPolicy,
    /// Per-table policy overrides.
    pub table_policies: HashMap<String, ResolutionPolicy>,
    /// Winner of equal-timestamp conflicts under latest-version-wins.
    pub tie_breaker: TieBreaker,
    /// Maximum entries per pulled page.
    pub pull_batch_size: u32,
    /// Maximum entries per pushed page.
    pub push_batch_size: u32,
    /// Pages pulled per session before the rest is left for a follow-up.
    pub max_pull_pages: u32,
    /// Budget for each remote call.
    pub call_timeout: Duration,
}

impl SessionConfig {
    /// Creates a configuration covering `tables`.
    pub fn new<I, S>(tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tables: tables.into_iter().map(Into::into).collect(),
            default_policy: ResolutionPolicy::LatestVersionWins,
            table_policies: HashMap::new(),
            tie_breaker: TieBreaker::Remote,
            pull_batch_size: 100,
            push_batch_size: 100,
            max_pull_pages: 16,
            call_timeout: Duration::from_secs(30),
        }
    }

    /// Sets the default resolution policy.
    pub fn with_policy(mut self, policy: ResolutionPolicy) -> Self {
        self.default_policy = policy;
        self
    }

    /// Overrides the resolution policy for one table.
    pub fn with_table_policy(mut self, table: impl Into<String>, policy: ResolutionPolicy) -> Self {
        self.table_policies.insert(table.into(), policy);
        self
    }

    /// Sets the tie breaker.
    pub fn with_tie_breaker(mut self, tie_breaker: TieBreaker) -> Self {
        self.tie_breaker = tie_breaker;
        self
    }

    /// Sets the pull page size.
    pub fn with_pull_batch_size(mut self, size: u32) -> Self {
        self.pull_batch_size = size;
        self
    }

    /// Sets the push page size.
    pub fn with_push_batch_size(mut self, size: u32) -> Self {
        self.push_batch_size = size;
        self
    }

    /// Sets how many pages one session may pull.
    pub fn with_max_pull_pages(mut self, pages: u32) -> Self {
        self.max_pull_pages = pages;
        self
    }

    /// Sets the remote call budget.
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new(Vec::<String>::new())
    }
}

/// Configuration for the periodic session runner.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Session settings.
    pub session: SessionConfig,
    /// Time between scheduled sessions.
    pub interval: Duration,
    /// Run a session as soon as the runner starts.
    pub run_on_start: bool,
    /// Backoff for sessions that abort with a retryable error.
    pub retry: RetryConfig,
}

impl RunnerConfig {
    /// Creates a runner configuration.
    pub fn new(session: SessionConfig) -> Self {
        Self {
            session,
            interval: Duration::from_secs(10),
            run_on_start: false,
            retry: RetryConfig::default(),
        }
    }

    /// Sets the interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Runs a session immediately on start.
    pub fn with_run_on_start(mut self, run_on_start: bool) -> Self {
        self.run_on_start = run_on_start;
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, the first one included.
    pub max_attempts: u32,
    /// Initial delay between retries.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates a new retry configuration.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// Creates a configuration with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enables or disables jitter.
    pub fn with_jitter(mut self, add_jitter: bool) -> Self {
        self.add_jitter = add_jitter;
        self
    }

    /// Calculates the delay before retry `attempt` (0 is the first try).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let base_delay = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let delay_secs = base_delay.min(self.max_delay.as_secs_f64());

        if self.add_jitter {
            // Up to 25% on top.
            let jitter = delay_secs * 0.25 * rand::thread_rng().gen::<f64>();
            Duration::from_secs_f64(delay_secs + jitter)
        } else {
            Duration::from_secs_f64(delay_secs)
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(5)
    }
}
