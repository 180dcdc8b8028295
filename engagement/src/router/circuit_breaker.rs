//! Per-backend health for reasoning failover.
//!
//! A backend trips after `failure_threshold` consecutive failures and stays
//! out of rotation for the cooldown. After that it gets trial calls again;
//! one success clears it, one more failure trips it for another cooldown.

use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    /// Cooldown over, trial calls allowed.
    HalfOpen,
}

#[derive(Debug, Clone, Copy, Default)]
struct Health {
    streak: u32,
    tripped_at: Option<Instant>,
}

#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    threshold: u32,
    cooldown: Duration,
    health: HashMap<String, Health>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(3, 60)
    }
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, cooldown_secs: u64) -> Self {
        Self::with_cooldown(failure_threshold, Duration::from_secs(cooldown_secs))
    }

    pub fn with_cooldown(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            threshold: failure_threshold.max(1),
            cooldown,
            health: HashMap::new(),
        }
    }

    /// Record the outcome of one call to `backend`.
    pub fn record(&mut self, backend: &str, ok: bool) {
        if ok {
            self.health.remove(backend);
            return;
        }
        let threshold = self.threshold;
        let health = self.health.entry(backend.to_string()).or_default();
        health.streak += 1;
        if health.streak >= threshold {
            health.tripped_at = Some(Instant::now());
        }
    }

    pub fn state(&self, backend: &str) -> CircuitState {
        match self.health.get(backend).and_then(|h| h.tripped_at) {
            None => CircuitState::Closed,
            Some(at) if at.elapsed() >= self.cooldown => CircuitState::HalfOpen,
            Some(_) => CircuitState::Open,
        }
    }

    pub fn is_available(&self, backend: &str) -> bool {
        self.state(backend) != CircuitState::Open
    }

    /// Consecutive failures since the last success.
    pub fn failure_count(&self, backend: &str) -> u32 {
        self.health.get(backend).map_or(0, |h| h.streak)
    }
}

/// Backend names in preference order.
#[derive(Debug, Clone, Default)]
pub struct FallbackLadder(Vec<String>);

impl FallbackLadder {
    pub fn new(backends: Vec<String>) -> Self {
        Self(backends)
    }

    /// Rungs not currently tripped, best first.
    pub fn available<'a>(&'a self, breaker: &'a CircuitBreaker) -> impl Iterator<Item = &'a str> {
        self.0
            .iter()
            .map(String::as_str)
            .filter(move |name| breaker.is_available(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trips_at_threshold_and_clears_on_success() {
        let mut breaker = CircuitBreaker::new(2, 3600);
        breaker.record("ollama", false);
        assert_eq!(breaker.state("ollama"), CircuitState::Closed);
        breaker.record("ollama", false);
        assert_eq!(breaker.state("ollama"), CircuitState::Open);
        assert_eq!(breaker.failure_count("ollama"), 2);

        breaker.record("ollama", true);
        assert_eq!(breaker.state("ollama"), CircuitState::Closed);
        assert_eq!(breaker.failure_count("ollama"), 0);
    }

    #[test]
    fn test_trial_allowed_once_cooldown_passes() {
        let mut breaker = CircuitBreaker::with_cooldown(1, Duration::ZERO);
        breaker.record("vllm", false);
        assert_eq!(breaker.state("vllm"), CircuitState::HalfOpen);
        assert!(breaker.is_available("vllm"));
    }

    #[test]
    fn test_ladder_keeps_order_and_drops_tripped() {
        let ladder = FallbackLadder::new(vec!["local".into(), "remote".into(), "spare".into()]);
        let mut breaker = CircuitBreaker::new(1, 3600);
        breaker.record("local", false);
        assert_eq!(ladder.available(&breaker).collect::<Vec<_>>(), ["remote", "spare"]);
    }
}
