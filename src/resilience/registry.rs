//! # Circuit Breaker Registry
//!
//! Owns one [`CircuitBreaker`] per external service, created on first use from
//! the per-service configuration. Constructed once at bootstrap and shared by
//! `Arc`; failures recorded for one service never touch another's breaker.

use crate::clock::{system_clock, SharedClock};
use crate::config::{CircuitBreakerComponentConfig, CircuitBreakerConfig};
use crate::error::ProspectError;
use crate::resilience::{
    CircuitBreaker, CircuitBreakerMetrics, CircuitOpenError, CircuitPermit, CircuitState,
    RegistryMetrics,
};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug)]
pub struct CircuitBreakerRegistry {
    /// Circuit breakers by service name
    circuit_breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,

    config: RwLock<CircuitBreakerConfig>,

    clock: SharedClock,
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::from_config(&CircuitBreakerConfig::default())
    }
}

impl CircuitBreakerRegistry {
    pub fn from_config(config: &CircuitBreakerConfig) -> Self {
        Self::with_clock(config, system_clock())
    }

    pub fn with_clock(config: &CircuitBreakerConfig, clock: SharedClock) -> Self {
        info!(
            enabled = config.enabled,
            failure_threshold = config.default_config.failure_threshold,
            cooldown_ms = config.default_config.cooldown_ms,
            overrides = config.component_configs.len(),
            "Initializing circuit breaker registry"
        );

        Self {
            circuit_breakers: RwLock::new(HashMap::new()),
            config: RwLock::new(config.clone()),
            clock,
        }
    }

    /// Whether open circuits reject calls
    pub fn is_enabled(&self) -> bool {
        self.config.read().enabled
    }

    /// Get or create circuit breaker for a service
    pub fn get_circuit_breaker(&self, service: &str) -> Arc<CircuitBreaker> {
        {
            let breakers = self.circuit_breakers.read();
            if let Some(breaker) = breakers.get(service) {
                return Arc::clone(breaker);
            }
        }

        let mut breakers = self.circuit_breakers.write();

        // Double-check: another caller may have created it between the locks
        if let Some(breaker) = breakers.get(service) {
            return Arc::clone(breaker);
        }

        let service_config = self
            .config
            .read()
            .config_for_component(service)
            .to_resilience_config();

        let breaker = Arc::new(CircuitBreaker::new(
            service.to_string(),
            service_config,
            Arc::clone(&self.clock),
        ));
        breakers.insert(service.to_string(), Arc::clone(&breaker));

        info!(
            service = service,
            total_circuit_breakers = breakers.len(),
            "Created new circuit breaker"
        );

        breaker
    }

    /// Gate a call to `service`. Disabled registries always allow the call.
    ///
    /// The outcome is recorded through the returned permit; dropping it
    /// unrecorded abandons the call.
    pub fn check(&self, service: &str) -> Result<CircuitPermit, CircuitOpenError> {
        let breaker = self.get_circuit_breaker(service);
        if !self.is_enabled() {
            return Ok(breaker.bypass());
        }
        breaker.check()
    }

    /// [`CircuitBreakerRegistry::check`] mapped into the crate error type
    pub fn guard(&self, service: &str) -> Result<CircuitPermit, ProspectError> {
        self.check(service).map_err(ProspectError::from)
    }

    pub fn record_success(&self, service: &str) {
        self.get_circuit_breaker(service).record_success();
    }

    pub fn record_success_timed(&self, service: &str, duration: Duration) {
        self.get_circuit_breaker(service)
            .record_success_timed(duration);
    }

    pub fn record_failure(&self, service: &str) {
        self.get_circuit_breaker(service).record_failure();
    }

    pub fn record_failure_timed(&self, service: &str, duration: Duration) {
        self.get_circuit_breaker(service)
            .record_failure_timed(duration);
    }

    /// Current state, `Closed` for services never seen
    pub fn state(&self, service: &str) -> CircuitState {
        self.circuit_breakers
            .read()
            .get(service)
            .map(|breaker| breaker.state())
            .unwrap_or(CircuitState::Closed)
    }

    pub fn list_components(&self) -> Vec<String> {
        let mut names: Vec<String> = self.circuit_breakers.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn get_component_metrics(&self, service: &str) -> Option<CircuitBreakerMetrics> {
        self.circuit_breakers
            .read()
            .get(service)
            .map(|breaker| breaker.metrics())
    }

    pub fn get_system_metrics(&self) -> RegistryMetrics {
        let mut metrics = RegistryMetrics::new(self.clock.now());
        for breaker in self.circuit_breakers.read().values() {
            metrics.insert(breaker.metrics());
        }
        metrics
    }

    pub fn force_open(&self, service: &str) {
        self.get_circuit_breaker(service).force_open();
    }

    pub fn force_closed(&self, service: &str) {
        self.get_circuit_breaker(service).force_closed();
    }

    /// Force open all circuit breakers (emergency stop)
    pub fn force_open_all(&self) {
        warn!("Forcing all circuit breakers open (emergency stop)");
        for breaker in self.circuit_breakers.read().values() {
            breaker.force_open();
        }
    }

    /// Force close all circuit breakers (emergency recovery)
    pub fn force_close_all(&self) {
        warn!("Forcing all circuit breakers closed (emergency recovery)");
        for breaker in self.circuit_breakers.read().values() {
            breaker.force_closed();
        }
    }

    /// Drop the breaker for a service; the next use starts fresh and closed
    pub fn remove_circuit_breaker(&self, service: &str) -> bool {
        let mut breakers = self.circuit_breakers.write();
        if breakers.remove(service).is_some() {
            info!(
                service = service,
                remaining_count = breakers.len(),
                "Removed circuit breaker"
            );
            true
        } else {
            false
        }
    }

    pub fn get_state_summary(&self) -> HashMap<CircuitState, usize> {
        self.get_system_metrics().count_by_state()
    }

    /// Share of known services whose breaker is closed
    pub fn availability(&self) -> f64 {
        self.get_system_metrics().availability()
    }

    /// Set a per-service override. Applies to breakers created afterwards;
    /// call [`CircuitBreakerRegistry::remove_circuit_breaker`] to apply it now.
    pub fn update_component_config(&self, service: &str, config: CircuitBreakerComponentConfig) {
        self.config
            .write()
            .component_configs
            .insert(service.to_string(), config);

        info!(
            service = service,
            "Updated circuit breaker configuration (applies to new instances)"
        );
    }
}

impl From<CircuitOpenError> for ProspectError {
    fn from(err: CircuitOpenError) -> Self {
        ProspectError::CircuitOpen {
            service: err.service,
            retry_after: err.retry_after,
        }
    }
}
