//! Guarded execution of live external calls.
//!
//! A guarded call passes the service's breaker, then runs the operation under
//! a per-attempt timeout with a bounded number of attempts and exponential
//! backoff between them. Exhausting the budget records one breaker failure
//! and surfaces [`ProspectError::Downstream`]. An open circuit is returned as
//! is, without spending any attempts.

use crate::error::{DownstreamFailureKind, ProspectError};
use crate::resilience::CircuitBreakerRegistry;
use std::fmt::Display;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Timeout and retry budget for one guarded call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Per-attempt timeout
    pub timeout: Duration,
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(12),
            max_attempts: 3,
            backoff_base: Duration::from_millis(250),
            backoff_max: Duration::from_secs(4),
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `attempt + 1`, given `attempt` attempts so far
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.backoff_base
            .saturating_mul(1u32 << exponent)
            .min(self.backoff_max)
    }
}

/// A successful guarded call
#[derive(Debug, Clone, PartialEq)]
pub struct GuardedOutput<T> {
    pub value: T,
    /// Attempts spent, including the successful one
    pub attempts: u32,
    /// Wall time of the successful attempt
    pub latency: Duration,
}

enum AttemptFailure {
    TimedOut,
    Failed(String),
}

/// Run `operation` against `service` under the breaker and `policy`.
///
/// Cancelling `cancel` abandons the in-flight attempt (its future is dropped)
/// and returns a `Cancelled` downstream error. An attempt that has already
/// produced a result when cancellation is observed keeps its result.
/// Cancellation, and dropping the returned future, are not counted as service
/// failures; a half-open probe abandoned either way frees the probe slot.
pub async fn guarded_call<T, E, F, Fut>(
    registry: &CircuitBreakerRegistry,
    service: &str,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut operation: F,
) -> Result<GuardedOutput<T>, ProspectError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let permit = registry.guard(service)?;

    let max_attempts = policy.max_attempts.max(1);
    let mut last_failure = AttemptFailure::Failed("no attempt made".to_string());
    let started = Instant::now();

    for attempt in 1..=max_attempts {
        let attempt_started = Instant::now();

        // Operation first: a result that is ready wins over cancellation
        let outcome = tokio::select! {
            biased;
            result = tokio::time::timeout(policy.timeout, operation()) => Some(result),
            _ = cancel.cancelled() => None,
        };

        match outcome {
            None => return Err(cancelled(service, attempt)),
            Some(Ok(Ok(value))) => {
                let latency = attempt_started.elapsed();
                permit.record_success_timed(latency);
                debug!(
                    service = service,
                    attempt = attempt,
                    latency_ms = latency.as_millis() as u64,
                    "Guarded call succeeded"
                );
                return Ok(GuardedOutput {
                    value,
                    attempts: attempt,
                    latency,
                });
            }
            Some(Ok(Err(e))) => {
                warn!(service = service, attempt = attempt, error = %e, "Guarded call attempt failed");
                last_failure = AttemptFailure::Failed(e.to_string());
            }
            Some(Err(_elapsed)) => {
                warn!(
                    service = service,
                    attempt = attempt,
                    timeout_ms = policy.timeout.as_millis() as u64,
                    "Guarded call attempt timed out"
                );
                last_failure = AttemptFailure::TimedOut;
            }
        }

        if attempt < max_attempts {
            let delay = policy.backoff_for(attempt);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(cancelled(service, attempt)),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    permit.record_failure_timed(started.elapsed());

    let (kind, cause) = match last_failure {
        AttemptFailure::TimedOut => (
            DownstreamFailureKind::Timeout,
            format!("timed out after {}ms", policy.timeout.as_millis()),
        ),
        AttemptFailure::Failed(cause) => (DownstreamFailureKind::Failed, cause),
    };

    Err(ProspectError::Downstream {
        service: service.to_string(),
        kind,
        attempts: max_attempts,
        cause,
    })
}

fn cancelled(service: &str, attempts: u32) -> ProspectError {
    debug!(service = service, attempts = attempts, "Guarded call cancelled by caller");
    ProspectError::Downstream {
        service: service.to_string(),
        kind: DownstreamFailureKind::Cancelled,
        attempts,
        cause: "caller abandoned the request".to_string(),
    }
}
