//! Retry logic for network operations with failure classification.

use std::future::Future;
use std::time::Duration;

use log::{debug, warn};

use crate::error::{Error, Result};

/// Total attempts per logical call, including the first one.
pub const MAX_RETRIES: usize = 3;

/// Backoff before the first retry; doubles for each further retry.
pub const INITIAL_BACKOFF_MS: u64 = 500;

/// Message fragments that mark an IO fault as transient.
const TRANSIENT_MARKERS: [&str; 5] = ["timed", "terminated", "reset", "refused", "goaway"];

/// Returns true if the failure is, or is caused by, a transient transport fault.
///
/// Refused or never-established connections are always transient. Other IO
/// faults are transient only when some message in the cause chain mentions a
/// timeout, termination, reset, refusal or HTTP/2 GOAWAY. Failures that
/// already carry a server response are never retried.
pub fn is_retryable(error: &anyhow::Error) -> bool {
    let mut io_fault = false;

    for cause in error.chain() {
        if let Some(err) = cause.downcast_ref::<Error>() {
            if err.is_rejection() {
                return false;
            }
        }
        if let Some(err) = cause.downcast_ref::<std::io::Error>() {
            use std::io::ErrorKind;
            if matches!(err.kind(), ErrorKind::ConnectionRefused | ErrorKind::NotConnected) {
                return true;
            }
            io_fault = true;
        }
        if let Some(err) = cause.downcast_ref::<reqwest::Error>() {
            if err.is_connect() || err.is_timeout() {
                return true;
            }
            if err.is_request() || err.is_body() {
                io_fault = true;
            }
        }
    }

    if !io_fault {
        return false;
    }

    error.chain().any(|cause| {
        let message = cause.to_string().to_lowercase();
        TRANSIENT_MARKERS.iter().any(|marker| message.contains(marker))
    })
}

/// How many times to attempt a call and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: usize,
    initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(MAX_RETRIES, Duration::from_millis(INITIAL_BACKOFF_MS))
    }
}

impl RetryPolicy {
    /// A policy of zero attempts is treated as one.
    pub fn new(max_attempts: usize, initial_backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff,
        }
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    pub fn initial_backoff(&self) -> Duration {
        self.initial_backoff
    }
}

/// Attempt counter for one logical call.
#[derive(Debug, Clone, Copy)]
pub struct RetryState {
    policy: RetryPolicy,
    attempt: usize,
}

impl RetryState {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    /// Zero-based index of the current attempt.
    pub fn attempt(&self) -> usize {
        self.attempt
    }

    /// Number of attempts made so far, counting the current one.
    pub fn attempts_made(&self) -> usize {
        self.attempt + 1
    }

    pub fn can_retry(&self) -> bool {
        self.attempt + 1 < self.policy.max_attempts
    }

    /// Delay to wait after the current attempt failed: `initial * 2^attempt`.
    pub fn backoff(&self) -> Duration {
        let factor = 1u32.checked_shl(self.attempt as u32).unwrap_or(u32::MAX);
        self.policy.initial_backoff.saturating_mul(factor)
    }

    /// Moves to the next attempt, returning the delay to wait first.
    /// Returns `None` once the maximum is reached.
    pub fn advance(&mut self) -> Option<Duration> {
        if !self.can_retry() {
            return None;
        }
        let delay = self.backoff();
        self.attempt += 1;
        Some(delay)
    }
}

/// Outcome of a single attempt.
#[derive(Debug)]
pub enum AttemptError {
    /// Terminal; returned to the caller as is.
    Fatal(Error),
    /// A transport fault, subject to classification.
    Fault(anyhow::Error),
}

impl From<Error> for AttemptError {
    fn from(err: Error) -> Self {
        AttemptError::Fatal(err)
    }
}

/// Executes an async operation with classified retries and exponential backoff.
///
/// `operation` receives the zero-based attempt index. Faults that are not
/// transient, or that remain after the last attempt, become
/// [`Error::RetriesExhausted`].
pub async fn with_retry<F, Fut, T>(policy: RetryPolicy, label: &str, mut operation: F) -> Result<T>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = std::result::Result<T, AttemptError>>,
{
    let mut state = RetryState::new(policy);

    loop {
        match operation(state.attempt()).await {
            Ok(value) => return Ok(value),
            Err(AttemptError::Fatal(err)) => {
                debug!("{}: non-retryable error: {}", label, err);
                return Err(err);
            }
            Err(AttemptError::Fault(cause)) => {
                let delay = if is_retryable(&cause) {
                    state.advance()
                } else {
                    debug!("{}: fault is not transient: {:#}", label, cause);
                    None
                };

                let Some(delay) = delay else {
                    return Err(Error::RetriesExhausted {
                        attempts: state.attempts_made(),
                        source: cause,
                    });
                };

                warn!(
                    "{}: attempt {}/{} failed ({:#}), retrying in {}ms...",
                    label,
                    state.attempt(),
                    policy.max_attempts(),
                    cause,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
