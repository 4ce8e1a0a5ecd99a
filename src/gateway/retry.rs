//! Retry/backoff coordinator.
//!
//! Each RPC attempt moves `Pending → {Succeeded, RetryScheduled, Failed}`.
//! Whether a failure is retried depends on the error class and on the
//! operation's idempotency:
//!
//! | Operation class  | Retried on                                           |
//! |------------------|------------------------------------------------------|
//! | `Idempotent`     | any retryable error                                  |
//! | `NonIdempotent`  | retryable errors that prove non-delivery             |
//! | `SingleTerminal` | retryable errors that prove non-delivery (no opt-in) |
//!
//! A timeout never proves non-delivery, so a non-idempotent call that times
//! out surfaces the timeout unless the caller opted in with
//! [`RetryMode::Always`].

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ClientError, Delivery, Result};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_BASE_DELAY_MS: u64 = 250;
pub const DEFAULT_MAX_DELAY_MS: u64 = 10_000;

// ---------------------------------------------------------------------------
// Policy types
// ---------------------------------------------------------------------------

/// Bounded exponential backoff: `min(base * 2^(attempt-1), max)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    #[serde(with = "millis")]
    pub base_delay: Duration,
    #[serde(with = "millis")]
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
            max_delay: Duration::from_millis(DEFAULT_MAX_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    /// No retries at all.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before the attempt that follows failed attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(30);
        let delay = self.base_delay.saturating_mul(1u32 << exp);
        std::cmp::min(delay, self.max_delay)
    }
}

/// Idempotency class of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Idempotency {
    /// Safe to resend; the server deduplicates.
    Idempotent,
    /// Each delivery has a side effect.
    NonIdempotent,
    /// Exactly one terminal call is allowed (job complete/fail).
    SingleTerminal,
}

/// Caller override of the default retry behaviour.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryMode {
    /// Follow the operation's idempotency class.
    #[default]
    Default,
    /// Retry any retryable error, even for non-idempotent operations.
    /// Ignored for single-terminal job calls.
    Always,
    /// Single attempt.
    Never,
}

/// State of one attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptState {
    Pending,
    Succeeded,
    RetryScheduled { attempt: u32, delay: Duration },
    Failed,
}

// ---------------------------------------------------------------------------
// RetryCoordinator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RetryCoordinator {
    policy: RetryPolicy,
}

impl RetryCoordinator {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Decide what happens after failed attempt number `attempt` (1-based).
    pub fn on_failure(
        &self,
        attempt: u32,
        error: &ClientError,
        idempotency: Idempotency,
        mode: RetryMode,
    ) -> AttemptState {
        if !error.is_retryable() || attempt >= self.policy.max_attempts {
            return AttemptState::Failed;
        }

        let allowed = match (mode, idempotency) {
            (RetryMode::Never, _) => false,
            (_, Idempotency::Idempotent) => true,
            (RetryMode::Always, Idempotency::NonIdempotent) => true,
            (_, Idempotency::NonIdempotent | Idempotency::SingleTerminal) => {
                error.delivery() == Delivery::NotSent
            }
        };

        if allowed {
            AttemptState::RetryScheduled {
                attempt,
                delay: self.policy.delay_for(attempt),
            }
        } else {
            AttemptState::Failed
        }
    }

    /// Drive `attempt_fn` through the state machine until it succeeds or fails
    /// terminally. `attempt_fn` receives the 1-based attempt number.
    pub async fn run<T, F, Fut>(
        &self,
        operation: &str,
        idempotency: Idempotency,
        mode: RetryMode,
        mut attempt_fn: F,
    ) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt: u32 = 1;
        loop {
            match attempt_fn(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::info!(operation, attempt, "gateway call succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(error) => match self.on_failure(attempt, &error, idempotency, mode) {
                    AttemptState::RetryScheduled { delay, .. } => {
                        tracing::warn!(
                            operation,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %error,
                            "gateway call failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    _ => {
                        tracing::debug!(
                            operation,
                            attempt,
                            kind = %error.kind(),
                            "gateway call failed terminally"
                        );
                        return Err(error);
                    }
                },
            }
        }
    }
}

impl Default for RetryCoordinator {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

pub(crate) mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
