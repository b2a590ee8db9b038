//! Retry policy for web service requests.
//!
//! Foreground calls retry at the short period within the API retry budget.
//! Background calls use [`RetryScheduler`], which waits the long period while
//! the licence deadline is far away and switches to the short period once
//! the remaining time falls within one long period plus a request timeout.

use acceldrm_types::{DrmError, DrmResult};
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Converts a configured number of seconds into a duration.
///
/// # Errors
///
/// Returns `BadArg` for negative or non-finite values.
pub fn duration_from_secs(key: &str, seconds: f64) -> DrmResult<Duration> {
    Duration::try_from_secs_f64(seconds).map_err(|_| {
        DrmError::BadArg(format!(
            "{key} must be a non-negative number of seconds, got {seconds}"
        ))
    })
}

/// Timing bounds applied to every outbound request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Gap between attempts near a deadline and for foreground retries.
    pub short_period: Duration,
    /// Gap between background attempts while the deadline is far away.
    pub long_period: Duration,
    /// Bound on one full request.
    pub request_timeout: Duration,
    /// Bound on connection establishment.
    pub connection_timeout: Duration,
    /// Total foreground retry budget; zero disables foreground retry.
    pub api_retry_duration: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            short_period: Duration::from_secs(2),
            long_period: Duration::from_secs(60),
            request_timeout: Duration::from_secs(30),
            connection_timeout: Duration::from_secs(10),
            api_retry_duration: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Checks the policy invariants.
    ///
    /// # Errors
    ///
    /// Returns `BadArg` if the long period is not greater than the short one
    /// or a timeout is zero.
    pub fn validate(&self) -> DrmResult<()> {
        if self.long_period <= self.short_period {
            return Err(DrmError::BadArg(format!(
                "ws_retry_period_long ({:?}) must be greater than ws_retry_period_short ({:?})",
                self.long_period, self.short_period
            )));
        }
        if self.request_timeout.is_zero() {
            return Err(DrmError::BadArg("ws_request_timeout must be greater than 0".into()));
        }
        if self.connection_timeout.is_zero() {
            return Err(DrmError::BadArg(
                "ws_connection_timeout must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

/// Which period the background scheduler currently applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    Long,
    Short,
}

/// Adaptive retry timing for background requests racing a deadline.
#[derive(Debug, Clone)]
pub struct RetryScheduler {
    long_period: Duration,
    short_period: Duration,
    margin: Duration,
    deadline: Instant,
    attempts: u32,
}

impl RetryScheduler {
    pub fn new(policy: &RetryPolicy, deadline: Instant) -> Self {
        Self {
            long_period: policy.long_period,
            short_period: policy.short_period,
            margin: policy.long_period + policy.request_timeout,
            deadline,
            attempts: 0,
        }
    }

    #[must_use]
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Period in effect at `now`.
    #[must_use]
    pub fn state_at(&self, now: Instant) -> RetryState {
        if self.deadline.saturating_duration_since(now) > self.margin {
            RetryState::Long
        } else {
            RetryState::Short
        }
    }

    /// Delay before the next attempt, or `None` once the deadline has passed.
    pub fn next_delay(&self, now: Instant) -> Option<Duration> {
        let remaining = self.deadline.saturating_duration_since(now);
        if remaining.is_zero() {
            return None;
        }
        let period = match self.state_at(now) {
            RetryState::Long => self.long_period,
            RetryState::Short => self.short_period,
        };
        Some(period.min(remaining))
    }

    pub fn record_attempt(&mut self) -> u32 {
        self.attempts += 1;
        self.attempts
    }

    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

/// Runs `attempt` until it succeeds, fails permanently, or the foreground
/// retry budget runs out.
///
/// # Errors
///
/// Non-retryable errors are returned as-is. With a zero budget the first
/// transient error is returned; otherwise exhausting the budget yields
/// `WsTimedOut` with the attempt count.
pub async fn retry_foreground<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut attempt: F,
) -> DrmResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = DrmResult<T>>,
{
    let started = Instant::now();
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        let err = match attempt().await {
            Ok(value) => return Ok(value),
            Err(err) if !err.is_retryable() => return Err(err),
            Err(err) => err,
        };

        if policy.api_retry_duration.is_zero() {
            debug!("{} failed, foreground retry disabled: {}", operation, err);
            return Err(err);
        }
        if started.elapsed() + policy.short_period > policy.api_retry_duration {
            return Err(DrmError::WsTimedOut {
                attempts,
                message: format!(
                    "{operation} did not succeed within {:.1} s: {err}",
                    policy.api_retry_duration.as_secs_f64()
                ),
            });
        }

        warn!(
            "{} attempt {} failed, retrying in {:.1} s: {}",
            operation,
            attempts,
            policy.short_period.as_secs_f64(),
            err
        );
        tokio::time::sleep(policy.short_period).await;
    }
}
