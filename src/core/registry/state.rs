//! Provider status, derived health, and rolling metrics

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Consecutive errors after which derived health becomes unhealthy.
pub const ERROR_THRESHOLD: u32 = 5;

/// Administrative provider status
///
/// Any explicit `set_status` overrides derived health for eligibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderStatus {
    Active,
    Inactive,
    Unhealthy,
    Maintenance,
}

/// Derived health, driven by probes and error counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Healthy,
    Unhealthy,
    /// Only until the first probe
    Unknown,
}

/// Mutable per-provider state
///
/// Success and error counters are monotonic within a process lifetime.
/// Latency is an EWMA with α = 0.5: `avg = (old + sample) / 2`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderState {
    pub status: ProviderStatus,
    pub health: HealthState,
    pub last_probe: Option<DateTime<Utc>>,
    pub consecutive_errors: u32,
    pub success_count: u64,
    pub error_count: u64,
    pub avg_latency_ms: f64,
}

impl ProviderState {
    pub fn new() -> Self {
        Self {
            status: ProviderStatus::Active,
            health: HealthState::Unknown,
            last_probe: None,
            consecutive_errors: 0,
            success_count: 0,
            error_count: 0,
            avg_latency_ms: 0.0,
        }
    }

    /// Eligible for selection: explicitly active and not derived-unhealthy.
    pub fn is_eligible(&self) -> bool {
        self.status == ProviderStatus::Active && self.health != HealthState::Unhealthy
    }

    /// Record a successful request.
    ///
    /// Resets the consecutive-error counter but does not flip an unhealthy
    /// provider back to healthy; only a successful probe does that.
    pub fn record_success(&mut self, latency_ms: f64) {
        self.success_count += 1;
        self.consecutive_errors = 0;
        self.avg_latency_ms = if self.success_count == 1 {
            latency_ms
        } else {
            (self.avg_latency_ms + latency_ms) / 2.0
        };
    }

    /// Record a failed request; crossing the threshold withdraws eligibility.
    pub fn record_error(&mut self) {
        self.error_count += 1;
        self.consecutive_errors += 1;
        if self.consecutive_errors >= ERROR_THRESHOLD {
            self.health = HealthState::Unhealthy;
        }
    }

    /// Record the outcome of a health probe.
    pub fn record_probe(&mut self, ok: bool) {
        self.last_probe = Some(Utc::now());
        if ok {
            self.health = HealthState::Healthy;
            self.consecutive_errors = 0;
        } else {
            self.record_error();
        }
    }
}

impl Default for ProviderState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn five_consecutive_errors_turn_unhealthy() {
        let mut state = ProviderState::new();
        state.record_probe(true);
        for _ in 0..4 {
            state.record_error();
            assert_eq!(state.health, HealthState::Healthy);
        }
        state.record_error();
        assert_eq!(state.health, HealthState::Unhealthy);
        assert!(!state.is_eligible());
    }

    #[test]
    fn success_resets_consecutive_errors_but_not_health() {
        let mut state = ProviderState::new();
        for _ in 0..ERROR_THRESHOLD {
            state.record_error();
        }
        assert_eq!(state.health, HealthState::Unhealthy);

        state.record_success(100.0);
        assert_eq!(state.consecutive_errors, 0);
        // Still unhealthy until a probe succeeds.
        assert_eq!(state.health, HealthState::Unhealthy);

        state.record_probe(true);
        assert_eq!(state.health, HealthState::Healthy);
        assert!(state.is_eligible());
    }

    #[test]
    fn latency_ewma_halves_toward_sample() {
        let mut state = ProviderState::new();
        state.record_success(100.0);
        assert_eq!(state.avg_latency_ms, 100.0);
        state.record_success(200.0);
        assert_eq!(state.avg_latency_ms, 150.0);
        state.record_success(50.0);
        assert_eq!(state.avg_latency_ms, 100.0);
    }

    #[test]
    fn unknown_until_first_probe() {
        let mut state = ProviderState::new();
        assert_eq!(state.health, HealthState::Unknown);
        assert!(state.is_eligible());
        state.record_probe(true);
        assert_eq!(state.health, HealthState::Healthy);
    }

    #[test]
    fn explicit_status_withdraws_eligibility() {
        let mut state = ProviderState::new();
        state.record_probe(true);
        state.status = ProviderStatus::Maintenance;
        assert!(!state.is_eligible());
    }
}
