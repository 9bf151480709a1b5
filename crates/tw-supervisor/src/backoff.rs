//! Exponential backoff for tunnels that keep failing to start

use std::time::Duration;

use tokio::time::Instant;

use tw_core::config::BackoffConfig;

/// Exponential backoff with jitter between restart attempts
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    /// Delay the sequence starts from
    initial: Duration,
    /// Current delay
    current: Duration,
    /// Maximum delay
    max: Duration,
    /// Multiplier
    multiplier: f64,
    /// Jitter factor (0.0 to 1.0)
    jitter: f64,
}

impl ExponentialBackoff {
    /// Create a new backoff from configuration
    pub fn from_config(config: &BackoffConfig) -> Self {
        Self::new(config.initial, config.max, config.multiplier, config.jitter)
    }

    /// Create a new backoff with custom parameters
    pub fn new(initial: Duration, max: Duration, multiplier: f64, jitter: f64) -> Self {
        Self {
            initial,
            current: initial,
            max,
            multiplier,
            jitter: jitter.clamp(0.0, 1.0),
        }
    }

    /// Get the next delay and advance the backoff
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;

        let next = Duration::from_secs_f64(self.current.as_secs_f64() * self.multiplier);
        self.current = std::cmp::min(next, self.max);

        let jitter_amount = delay.as_secs_f64() * self.jitter * rand::random::<f64>();
        delay + Duration::from_secs_f64(jitter_amount)
    }

    /// Reset the backoff to its initial delay
    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

/// Restart bookkeeping for one tunnel
///
/// The first failure is retried on the next sweep. Each further consecutive
/// failure defers the tunnel by the next backoff delay. A success clears it.
#[derive(Debug, Clone)]
pub struct RetryState {
    backoff: ExponentialBackoff,
    failures: u32,
    retry_at: Option<Instant>,
}

impl RetryState {
    pub fn new(config: &BackoffConfig) -> Self {
        Self {
            backoff: ExponentialBackoff::from_config(config),
            failures: 0,
            retry_at: None,
        }
    }

    /// Consecutive failed start attempts
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Whether a start attempt is allowed at `now`
    pub fn ready(&self, now: Instant) -> bool {
        self.retry_at.map_or(true, |at| now >= at)
    }

    /// Record a failed attempt; returns the delay before the next one
    pub fn record_failure(&mut self, now: Instant) -> Duration {
        self.failures += 1;
        let delay = if self.failures == 1 {
            Duration::ZERO
        } else {
            self.backoff.next_delay()
        };
        self.retry_at = Some(now + delay);
        delay
    }

    /// Record a successful attempt
    pub fn record_success(&mut self) {
        self.failures = 0;
        self.retry_at = None;
        self.backoff.reset();
    }
}
