//! Bounded retry with a hook that runs before every wait.
//!
//! Rate limiting uses the hook to checkpoint the store, so a crash during the
//! cooldown loses at most the lookup in flight.

use std::fmt;
use std::time::Duration;

use crate::error::SyncError;

/// How often and how patiently an operation is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first; `None` retries forever.
    pub max_attempts: Option<u32>,
    /// Fixed wait between attempts.
    pub cooldown: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: Option<u32>, cooldown: Duration) -> Self {
        Self {
            max_attempts,
            cooldown,
        }
    }

    /// Platform rate limit: five minutes between attempts, one hour in total.
    pub fn rate_limit() -> Self {
        Self::new(Some(12), Duration::from_secs(300))
    }

    /// Directory reconnect.
    pub fn reconnect() -> Self {
        Self::new(Some(5), Duration::from_secs(5))
    }

    fn exhausted(&self, attempt: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempt >= max)
    }
}

/// Outcome of one attempt.
#[derive(Debug)]
pub enum Attempt<T, E> {
    /// Finished; the value may itself be a non-retryable failure.
    Done(T),
    /// Transient failure; wait and try again.
    Backoff(E),
}

/// Blocks the run between attempts.
pub trait Sleeper {
    fn sleep(&self, duration: Duration);
}

/// [`Sleeper`] backed by [`std::thread::sleep`]. Not interruptible.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Run `op` until it returns [`Attempt::Done`] or the policy gives up.
///
/// `op` receives the 1-based attempt number. After a [`Attempt::Backoff`],
/// `before_wait` runs first and only then does the sleeper wait; an error
/// from `before_wait` aborts the retry. When the attempt budget is spent the
/// result is [`SyncError::RetriesExhausted`] and no further wait happens.
pub fn retry<T, E, Op, Wait>(
    operation: &str,
    policy: &RetryPolicy,
    sleeper: &dyn Sleeper,
    mut op: Op,
    mut before_wait: Wait,
) -> Result<T, SyncError>
where
    E: fmt::Display,
    Op: FnMut(u32) -> Attempt<T, E>,
    Wait: FnMut(&E, u32) -> Result<(), SyncError>,
{
    let mut attempt: u32 = 1;
    loop {
        let err = match op(attempt) {
            Attempt::Done(value) => return Ok(value),
            Attempt::Backoff(err) => err,
        };

        if policy.exhausted(attempt) {
            tracing::error!(operation, attempts = attempt, error = %err, "giving up");
            return Err(SyncError::RetriesExhausted {
                operation: operation.to_string(),
                attempts: attempt,
                last_error: err.to_string(),
            });
        }

        before_wait(&err, attempt)?;
        tracing::warn!(
            operation,
            attempt,
            cooldown_secs = policy.cooldown.as_secs(),
            error = %err,
            "backing off before retry"
        );
        sleeper.sleep(policy.cooldown);
        attempt = attempt.saturating_add(1);
    }
}
