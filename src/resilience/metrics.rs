//! # Circuit Breaker Metrics
//!
//! Point-in-time snapshots of breaker counters, per service and across the
//! registry. Snapshots are plain data; nothing here touches a live breaker.

use crate::resilience::CircuitState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

/// One service's breaker at the moment of collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerMetrics {
    pub service: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    /// Guarded calls whose outcome was recorded
    pub total_calls: u64,
    pub success_count: u64,
    pub failure_count: u64,
    /// Calls turned away without reaching the service
    pub rejected_calls: u64,
    /// Half-open probes whose caller went away before an outcome
    pub abandoned_probes: u64,
    pub last_failure_at: Option<DateTime<Utc>>,
    /// Mean latency over timed outcomes
    pub average_latency: Duration,
}

impl CircuitBreakerMetrics {
    /// Failures over recorded outcomes, 0.0 before the first call
    pub fn failure_rate(&self) -> f64 {
        match self.total_calls {
            0 => 0.0,
            total => self.failure_count as f64 / total as f64,
        }
    }

    /// Whether ordinary callers are currently turned away
    pub fn is_rejecting(&self) -> bool {
        self.state != CircuitState::Closed
    }

    /// When the cooldown ends, given the breaker's cooldown. `None` unless open.
    pub fn retry_at(&self, cooldown: Duration) -> Option<DateTime<Utc>> {
        if self.state != CircuitState::Open {
            return None;
        }
        let cooldown = chrono::Duration::from_std(cooldown).ok()?;
        self.last_failure_at.map(|at| at + cooldown)
    }
}

/// Snapshot of every breaker in a registry, keyed by service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryMetrics {
    pub services: BTreeMap<String, CircuitBreakerMetrics>,
    pub collected_at: DateTime<Utc>,
}

impl RegistryMetrics {
    pub fn new(collected_at: DateTime<Utc>) -> Self {
        Self {
            services: BTreeMap::new(),
            collected_at,
        }
    }

    pub fn insert(&mut self, metrics: CircuitBreakerMetrics) {
        self.services.insert(metrics.service.clone(), metrics);
    }

    pub fn count_by_state(&self) -> HashMap<CircuitState, usize> {
        let mut counts = HashMap::new();
        for metrics in self.services.values() {
            *counts.entry(metrics.state).or_insert(0) += 1;
        }
        counts
    }

    /// Services currently rejecting calls, in name order
    pub fn rejecting_services(&self) -> Vec<&str> {
        self.services
            .values()
            .filter(|metrics| metrics.is_rejecting())
            .map(|metrics| metrics.service.as_str())
            .collect()
    }

    pub fn total_rejections(&self) -> u64 {
        self.services.values().map(|m| m.rejected_calls).sum()
    }

    /// Share of known services whose breaker is closed; 1.0 with none known
    pub fn availability(&self) -> f64 {
        if self.services.is_empty() {
            return 1.0;
        }
        let closed = self.services.values().filter(|m| !m.is_rejecting()).count();
        closed as f64 / self.services.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(name: &str, state: CircuitState, calls: u64, failures: u64) -> CircuitBreakerMetrics {
        CircuitBreakerMetrics {
            service: name.to_string(),
            state,
            consecutive_failures: 0,
            total_calls: calls,
            success_count: calls - failures,
            failure_count: failures,
            rejected_calls: 0,
            abandoned_probes: 0,
            last_failure_at: None,
            average_latency: Duration::ZERO,
        }
    }

    #[test]
    fn test_availability_and_rejecting_services() {
        let mut metrics = RegistryMetrics::new(Utc::now());
        assert_eq!(metrics.availability(), 1.0);

        metrics.insert(service("places", CircuitState::Closed, 20, 0));
        metrics.insert(service("hunter", CircuitState::Open, 10, 5));
        metrics.insert(service("cobalt", CircuitState::HalfOpen, 4, 4));

        assert!((metrics.availability() - 1.0 / 3.0).abs() < f64::EPSILON);
        assert_eq!(metrics.rejecting_services(), vec!["cobalt", "hunter"]);
        assert_eq!(metrics.count_by_state().get(&CircuitState::Open), Some(&1));
        assert_eq!(metrics.services["hunter"].failure_rate(), 0.5);
    }

    #[test]
    fn test_retry_at_only_while_open() {
        let failed_at = Utc::now();
        let mut hunter = service("hunter", CircuitState::Open, 3, 3);
        hunter.last_failure_at = Some(failed_at);

        assert_eq!(
            hunter.retry_at(Duration::from_secs(30)),
            Some(failed_at + chrono::Duration::seconds(30))
        );

        hunter.state = CircuitState::HalfOpen;
        assert_eq!(hunter.retry_at(Duration::from_secs(30)), None);
    }
}
