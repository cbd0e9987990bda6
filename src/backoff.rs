//! Bounded exponential backoff for arbitrary fallible async actions.
//!
//! Delays grow as `base * 2^n` with no jitter. Nothing here knows about HTTP;
//! the rate-limit governor layers its own jittered wait in front of this loop.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use crate::cancel::Cancellation;

/// Sentinel accepted on the command line for "retry forever".
pub const UNLIMITED_RETRIES: i64 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// `None` retries until the action succeeds or is cancelled.
    pub max_retries: Option<u32>,
    pub base_delay: Duration,
}

/// One planned retry: the 1-based retry number and the wait before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryAttempt {
    pub attempt_number: u32,
    pub delay: Duration,
}

/// Result of a retry loop. Cancellation is a value, not an error.
#[derive(Debug)]
pub enum RetryOutcome<T, E> {
    Success(T),
    Cancelled,
    Failed {
        /// Total calls made, including the first.
        attempts: u32,
        error: E,
    },
}

impl<T, E> RetryOutcome<T, E> {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

impl BackoffPolicy {
    pub fn new(max_retries: Option<u32>, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// Build from the command-line form where `-1` means unlimited.
    /// Other negative values are treated as zero retries.
    pub fn from_sentinel(max_retries: i64, base_delay_ms: u64) -> Self {
        let max_retries = if max_retries == UNLIMITED_RETRIES {
            None
        } else {
            Some(u32::try_from(max_retries.max(0)).unwrap_or(u32::MAX))
        };
        Self::new(max_retries, Duration::from_millis(base_delay_ms))
    }

    /// Wait before retry number `attempt_index + 1`.
    pub fn delay(&self, attempt_index: u32) -> Duration {
        2u32.checked_pow(attempt_index)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .unwrap_or(Duration::MAX)
    }

    pub fn allows_retry(&self, retries_so_far: u32) -> bool {
        self.max_retries.map_or(true, |max| retries_so_far < max)
    }

    /// Every retry this policy would perform if each call failed.
    pub fn schedule(&self) -> impl Iterator<Item = RetryAttempt> + '_ {
        (0u32..)
            .take_while(|index| self.allows_retry(*index))
            .map(|index| RetryAttempt {
                attempt_number: index + 1,
                delay: self.delay(index),
            })
    }
}

/// Run `action` until it succeeds, the retry budget runs out, or `cancel` fires.
///
/// When the budget is exhausted the error from the final call is returned.
pub async fn retry_with_backoff<T, E, F, Fut>(
    policy: &BackoffPolicy,
    cancel: &Cancellation,
    mut action: F,
) -> RetryOutcome<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let mut retries = 0u32;

    loop {
        if cancel.is_cancelled() {
            return RetryOutcome::Cancelled;
        }

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return RetryOutcome::Cancelled,
            result = action() => result,
        };

        let error = match result {
            Ok(value) => return RetryOutcome::Success(value),
            Err(error) => error,
        };

        if !policy.allows_retry(retries) {
            tracing::debug!(
                target = "traders_console::backoff",
                attempts = retries + 1,
                error = %error,
                "retry budget exhausted"
            );
            return RetryOutcome::Failed {
                attempts: retries + 1,
                error,
            };
        }

        let delay = policy.delay(retries);
        retries += 1;
        tracing::info!(
            target = "traders_console::backoff",
            retry = retries,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Retry #{} in {}ms...",
            retries,
            delay.as_millis()
        );

        if !cancel.sleep(delay).await {
            return RetryOutcome::Cancelled;
        }
    }
}
