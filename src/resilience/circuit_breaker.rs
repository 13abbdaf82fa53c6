//! # Circuit Breaker Implementation
//!
//! Per-service fault isolation with three states: Closed (normal operation),
//! Open (failing fast) and Half-Open (a single probe is let through).
//!
//! State transitions happen under a per-breaker mutex so `check`,
//! `record_success` and `record_failure` are atomic with respect to each
//! other. Counters used only for observability are lock-free atomics.

use crate::clock::SharedClock;
use crate::resilience::{CircuitBreakerConfig, CircuitBreakerMetrics};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Lock-free atomic counters for circuit breaker metrics.
#[derive(Debug, Default)]
struct AtomicCircuitBreakerMetrics {
    total_calls: AtomicU64,
    success_count: AtomicU64,
    failure_count: AtomicU64,
    rejected_calls: AtomicU64,
    abandoned_probes: AtomicU64,
    timed_calls: AtomicU64,
    total_latency_nanos: AtomicU64,
}

impl AtomicCircuitBreakerMetrics {
    #[inline]
    fn record_latency(&self, duration: Option<Duration>) {
        if let Some(duration) = duration {
            self.timed_calls.fetch_add(1, Ordering::Relaxed);
            self.total_latency_nanos
                .fetch_add(duration.as_nanos() as u64, Ordering::Relaxed);
        }
    }

    #[inline]
    fn record_success(&self, duration: Option<Duration>) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        self.success_count.fetch_add(1, Ordering::Relaxed);
        self.record_latency(duration);
    }

    #[inline]
    fn record_failure(&self, duration: Option<Duration>) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        self.failure_count.fetch_add(1, Ordering::Relaxed);
        self.record_latency(duration);
    }

    #[inline]
    fn record_rejection(&self) {
        self.rejected_calls.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self, service: &str, state: &BreakerState) -> CircuitBreakerMetrics {
        let timed_calls = self.timed_calls.load(Ordering::Relaxed);
        let average_latency = match timed_calls {
            0 => Duration::ZERO,
            n => Duration::from_nanos(self.total_latency_nanos.load(Ordering::Relaxed) / n),
        };

        CircuitBreakerMetrics {
            service: service.to_string(),
            state: state.state,
            consecutive_failures: state.failures,
            total_calls: self.total_calls.load(Ordering::Relaxed),
            success_count: self.success_count.load(Ordering::Relaxed),
            failure_count: self.failure_count.load(Ordering::Relaxed),
            rejected_calls: self.rejected_calls.load(Ordering::Relaxed),
            abandoned_probes: self.abandoned_probes.load(Ordering::Relaxed),
            last_failure_at: state.last_failure_at,
            average_latency,
        }
    }
}

/// Circuit breaker states representing the current operational mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Normal operation - all calls are allowed through
    Closed,
    /// Failure mode - all calls fail fast without executing
    Open,
    /// Cooldown elapsed - exactly one probe call is allowed
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
        })
    }
}

/// A call was rejected because the service's circuit is open
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Circuit breaker is open for {service} (retry in {retry_after:?})")]
pub struct CircuitOpenError {
    pub service: String,
    /// Time left in the cooldown; zero while a half-open probe is outstanding
    pub retry_after: Duration,
}

/// Errors that can occur during circuit breaker operation
#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    /// Circuit is open, rejecting all calls
    #[error(transparent)]
    CircuitOpen(#[from] CircuitOpenError),

    /// Operation failed and was recorded
    #[error("Operation failed: {0}")]
    OperationFailed(E),
}

#[derive(Debug, Clone)]
struct BreakerState {
    state: CircuitState,
    failures: u32,
    last_failure_at: Option<DateTime<Utc>>,
    /// Id of the outstanding half-open probe, if any
    probe: Option<u64>,
    /// Last probe id handed out; never reset
    probe_seq: u64,
}

impl BreakerState {
    fn closed(probe_seq: u64) -> Self {
        Self {
            state: CircuitState::Closed,
            failures: 0,
            last_failure_at: None,
            probe: None,
            probe_seq,
        }
    }

    fn take_probe(&mut self) -> u64 {
        self.probe_seq = self.probe_seq.wrapping_add(1);
        self.probe = Some(self.probe_seq);
        self.probe_seq
    }
}

/// Admission to call a service, handed out by [`CircuitBreaker::check`].
///
/// Record the outcome through the permit. A half-open probe permit that is
/// dropped without an outcome (the caller's future was dropped, or it was
/// cancelled) gives the probe slot back, so the next caller can probe.
#[derive(Debug)]
#[must_use = "dropping a permit abandons the call without recording an outcome"]
pub struct CircuitPermit {
    breaker: Arc<CircuitBreaker>,
    probe: Option<u64>,
}

impl CircuitPermit {
    /// Whether this call is the single half-open probe
    pub fn is_probe(&self) -> bool {
        self.probe.is_some()
    }

    pub fn service(&self) -> &str {
        self.breaker.name()
    }

    pub fn record_success(mut self) {
        self.probe = None;
        self.breaker.record_success();
    }

    pub fn record_success_timed(mut self, duration: Duration) {
        self.probe = None;
        self.breaker.record_success_timed(duration);
    }

    pub fn record_failure(mut self) {
        self.probe = None;
        self.breaker.record_failure();
    }

    pub fn record_failure_timed(mut self, duration: Duration) {
        self.probe = None;
        self.breaker.record_failure_timed(duration);
    }
}

impl Drop for CircuitPermit {
    fn drop(&mut self) {
        if let Some(probe) = self.probe.take() {
            self.breaker.release_probe(probe);
        }
    }
}

/// Failure-tracking state machine for one external service
#[derive(Debug)]
pub struct CircuitBreaker {
    /// Service name for logging and metrics
    name: String,

    config: CircuitBreakerConfig,

    clock: SharedClock,

    /// Transition state, guarded per service
    inner: Mutex<BreakerState>,

    metrics: AtomicCircuitBreakerMetrics,
}

impl CircuitBreaker {
    pub fn new(name: String, config: CircuitBreakerConfig, clock: SharedClock) -> Self {
        info!(
            service = %name,
            failure_threshold = config.failure_threshold,
            cooldown_ms = config.cooldown.as_millis() as u64,
            "Circuit breaker initialized"
        );

        Self {
            name,
            config,
            clock,
            inner: Mutex::new(BreakerState::closed(0)),
            metrics: AtomicCircuitBreakerMetrics::default(),
        }
    }

    /// Get current circuit state
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Current consecutive failure count
    pub fn failures(&self) -> u32 {
        self.inner.lock().failures
    }

    /// Gate a call to the service.
    ///
    /// While open and inside the cooldown the call is rejected. Once the
    /// cooldown has elapsed the breaker moves to half-open and admits exactly
    /// this caller as the probe; everyone else is rejected until the probe's
    /// outcome is recorded or its permit is dropped.
    pub fn check(self: &Arc<Self>) -> Result<CircuitPermit, CircuitOpenError> {
        let mut inner = self.inner.lock();

        let probe = match inner.state {
            CircuitState::Closed => None,
            CircuitState::Open => {
                let remaining = self.cooldown_remaining(&inner);
                if !remaining.is_zero() {
                    drop(inner);
                    return Err(self.reject(remaining));
                }
                inner.state = CircuitState::HalfOpen;
                info!(service = %self.name, "Circuit breaker half-open (probing recovery)");
                Some(inner.take_probe())
            }
            CircuitState::HalfOpen => {
                if inner.probe.is_some() {
                    drop(inner);
                    return Err(self.reject(Duration::ZERO));
                }
                Some(inner.take_probe())
            }
        };

        Ok(CircuitPermit {
            breaker: Arc::clone(self),
            probe,
        })
    }

    /// Permit that never holds the probe slot, for registries with breakers
    /// disabled. Outcomes are still recorded.
    pub(crate) fn bypass(self: &Arc<Self>) -> CircuitPermit {
        CircuitPermit {
            breaker: Arc::clone(self),
            probe: None,
        }
    }

    fn reject(&self, retry_after: Duration) -> CircuitOpenError {
        self.metrics.record_rejection();
        debug!(
            service = %self.name,
            retry_after_ms = retry_after.as_millis() as u64,
            "Circuit open, rejecting call"
        );
        CircuitOpenError {
            service: self.name.clone(),
            retry_after,
        }
    }

    fn cooldown_remaining(&self, inner: &BreakerState) -> Duration {
        let Some(last_failure_at) = inner.last_failure_at else {
            warn!(service = %self.name, "Circuit open but no failure timestamp recorded");
            return Duration::ZERO;
        };

        let elapsed = (self.clock.now() - last_failure_at)
            .to_std()
            .unwrap_or(Duration::ZERO);
        self.config.cooldown.saturating_sub(elapsed)
    }

    /// Reset failures and close the circuit, from any state
    pub fn record_success(&self) {
        self.record_success_inner(None);
    }

    /// [`CircuitBreaker::record_success`] with the call's latency for metrics
    pub fn record_success_timed(&self, duration: Duration) {
        self.record_success_inner(Some(duration));
    }

    fn record_success_inner(&self, duration: Option<Duration>) {
        self.metrics.record_success(duration);

        let mut inner = self.inner.lock();
        let previous = inner.state;
        *inner = BreakerState {
            last_failure_at: inner.last_failure_at,
            ..BreakerState::closed(inner.probe_seq)
        };
        drop(inner);

        if previous != CircuitState::Closed {
            info!(service = %self.name, from = %previous, "Circuit breaker closed (recovered)");
        } else {
            debug!(service = %self.name, "Operation succeeded");
        }
    }

    /// Count a failure; opens the circuit once the threshold is reached
    pub fn record_failure(&self) {
        self.record_failure_inner(None);
    }

    /// [`CircuitBreaker::record_failure`] with the call's latency for metrics
    pub fn record_failure_timed(&self, duration: Duration) {
        self.record_failure_inner(Some(duration));
    }

    fn record_failure_inner(&self, duration: Option<Duration>) {
        self.metrics.record_failure(duration);

        let mut inner = self.inner.lock();
        inner.failures = inner.failures.saturating_add(1);
        inner.last_failure_at = Some(self.clock.now());
        inner.probe = None;

        let previous = inner.state;
        let failed_probe = previous == CircuitState::HalfOpen;
        if failed_probe || inner.failures >= self.config.failure_threshold {
            inner.state = CircuitState::Open;
        }
        let (state, failures) = (inner.state, inner.failures);
        drop(inner);

        if state == CircuitState::Open && previous != CircuitState::Open {
            error!(
                service = %self.name,
                consecutive_failures = failures,
                failure_threshold = self.config.failure_threshold,
                cooldown_ms = self.config.cooldown.as_millis() as u64,
                "Circuit breaker opened (failing fast)"
            );
        } else {
            warn!(
                service = %self.name,
                consecutive_failures = failures,
                "Operation failed"
            );
        }
    }

    /// Free the probe slot if `probe` is still the outstanding probe
    fn release_probe(&self, probe: u64) {
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::HalfOpen && inner.probe == Some(probe) {
            inner.probe = None;
            drop(inner);
            self.metrics.abandoned_probes.fetch_add(1, Ordering::Relaxed);
            debug!(service = %self.name, "Half-open probe abandoned, slot released");
        }
    }

    /// Execute an operation with circuit breaker protection
    pub async fn call<F, T, E, Fut>(self: &Arc<Self>, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let permit = self.check()?;

        let start_time = Instant::now();
        let result = operation().await;
        let duration = start_time.elapsed();

        match &result {
            Ok(_) => permit.record_success_timed(duration),
            Err(_) => permit.record_failure_timed(duration),
        }

        result.map_err(CircuitBreakerError::OperationFailed)
    }

    /// Force circuit to open state (for emergency situations)
    pub fn force_open(&self) {
        warn!(service = %self.name, "Circuit breaker forced open");
        let mut inner = self.inner.lock();
        inner.state = CircuitState::Open;
        inner.failures = inner.failures.max(self.config.failure_threshold);
        inner.last_failure_at = Some(self.clock.now());
        inner.probe = None;
    }

    /// Force circuit to closed state (for emergency recovery)
    pub fn force_closed(&self) {
        warn!(service = %self.name, "Circuit breaker forced closed");
        let mut inner = self.inner.lock();
        *inner = BreakerState::closed(inner.probe_seq);
    }

    /// Get current metrics snapshot
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let inner = self.inner.lock().clone();
        self.metrics.snapshot(&self.name, &inner)
    }
}
