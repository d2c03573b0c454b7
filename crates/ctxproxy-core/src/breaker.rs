//! Per-provider circuit breaker.
//!
//! Tracks consecutive upstream failures and trips open once a threshold is
//! crossed, giving the upstream a cool-down window before half-open probing
//! resumes.

use std::collections::HashMap;
use std::sync::{Mutex, RwLock};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
    pub half_open_max_calls: u32,
    pub success_threshold: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        BreakerConfig {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            half_open_max_calls: 3,
            success_threshold: 2,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct BreakerStats {
    pub failure_count: u32,
    pub success_count: u32,
    pub total_failures: u64,
    pub total_successes: u64,
    pub state_changes: u64,
}

struct Inner {
    state: BreakerState,
    stats: BreakerStats,
    last_failure_at: Option<Instant>,
    half_open_calls: u32,
}

type StateChangeCallback = Box<dyn Fn(BreakerState, BreakerState) + Send + Sync>;

/// A single breaker, guarding one named upstream.
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<Inner>,
    on_state_change: Option<StateChangeCallback>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        CircuitBreaker {
            name: name.into(),
            config,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                stats: BreakerStats::default(),
                last_failure_at: None,
                half_open_calls: 0,
            }),
            on_state_change: None,
        }
    }

    /// Attaches a callback invoked with `(old_state, new_state)` on every
    /// transition, after stats/counters have already been updated. A
    /// callback that panics is caught and logged rather than propagated,
    /// mirroring the "never let an observer break the breaker" contract.
    pub fn with_state_change_callback(mut self, callback: impl Fn(BreakerState, BreakerState) + Send + Sync + 'static) -> Self {
        self.on_state_change = Some(Box::new(callback));
        self
    }

    /// Whether a call is currently allowed through. Transitions `Open` to
    /// `HalfOpen` once the recovery timeout elapses, and caps probe calls
    /// while `HalfOpen`.
    pub fn can_execute(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            BreakerState::Closed => true,
            BreakerState::Open => {
                let elapsed = inner.last_failure_at.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed >= self.config.recovery_timeout {
                    self.transition(&mut inner, BreakerState::HalfOpen);
                    inner.half_open_calls = 0;
                    true
                } else {
                    false
                }
            }
            BreakerState::HalfOpen => {
                if inner.half_open_calls < self.config.half_open_max_calls {
                    inner.half_open_calls += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Seconds remaining before an `Open` breaker allows a probe request.
    pub fn retry_after_secs(&self) -> u64 {
        let inner = self.inner.lock().unwrap();
        let elapsed = inner.last_failure_at.map(|t| t.elapsed()).unwrap_or_default();
        self.config.recovery_timeout.saturating_sub(elapsed).as_secs()
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.stats.total_successes += 1;
        inner.stats.success_count += 1;

        match inner.state {
            BreakerState::HalfOpen => {
                if inner.stats.success_count >= self.config.success_threshold {
                    self.transition(&mut inner, BreakerState::Closed);
                    info!(name = %self.name, successes = inner.stats.success_count, "breaker.recovered");
                }
            }
            BreakerState::Closed => {
                inner.stats.failure_count = 0;
            }
            BreakerState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.stats.total_failures += 1;
        inner.stats.failure_count += 1;
        inner.last_failure_at = Some(Instant::now());

        match inner.state {
            BreakerState::HalfOpen => {
                self.transition(&mut inner, BreakerState::Open);
                warn!(name = %self.name, failures = inner.stats.failure_count, "breaker.reopened");
            }
            BreakerState::Closed => {
                if inner.stats.failure_count >= self.config.failure_threshold {
                    self.transition(&mut inner, BreakerState::Open);
                    error!(
                        name = %self.name,
                        threshold = self.config.failure_threshold,
                        failures = inner.stats.failure_count,
                        "breaker.opened"
                    );
                }
            }
            BreakerState::Open => {}
        }
    }

    /// State transitions reset the counters the new state doesn't need and
    /// always bump `state_changes`. Runs with `inner`'s lock held, so a
    /// callback must not call back into this breaker.
    fn transition(&self, inner: &mut Inner, new_state: BreakerState) {
        if inner.state == new_state {
            return;
        }
        let old_state = inner.state;
        inner.state = new_state;
        inner.stats.state_changes += 1;

        match new_state {
            BreakerState::Closed => {
                inner.stats.failure_count = 0;
                inner.stats.success_count = 0;
                inner.half_open_calls = 0;
            }
            BreakerState::Open => {
                inner.stats.success_count = 0;
                inner.half_open_calls = 0;
            }
            BreakerState::HalfOpen => {
                inner.stats.failure_count = 0;
                inner.stats.success_count = 0;
                inner.half_open_calls = 0;
            }
        }

        info!(name = %self.name, from = ?old_state, to = ?new_state, "breaker.state_changed");

        if let Some(callback) = &self.on_state_change {
            if let Err(payload) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| callback(old_state, new_state))) {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "non-string panic payload".to_string());
                error!(name = %self.name, error = message, "breaker.callback_error");
            }
        }
    }

    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap();
        self.transition(&mut inner, BreakerState::Closed);
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().unwrap().state
    }

    pub fn stats(&self) -> BreakerStats {
        self.inner.lock().unwrap().stats
    }
}

/// Named registry of breakers, one per provider id, created lazily.
pub struct CircuitBreakerRegistry {
    config: BreakerConfig,
    breakers: RwLock<HashMap<String, CircuitBreaker>>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: BreakerConfig) -> Self {
        CircuitBreakerRegistry {
            config,
            breakers: RwLock::new(HashMap::new()),
        }
    }

    fn ensure(&self, name: &str) {
        if !self.breakers.read().unwrap().contains_key(name) {
            self.breakers
                .write()
                .unwrap()
                .entry(name.to_string())
                .or_insert_with(|| CircuitBreaker::new(name, self.config));
        }
    }

    pub fn can_execute(&self, name: &str) -> bool {
        self.ensure(name);
        self.breakers.read().unwrap().get(name).unwrap().can_execute()
    }

    pub fn retry_after_secs(&self, name: &str) -> u64 {
        self.ensure(name);
        self.breakers.read().unwrap().get(name).unwrap().retry_after_secs()
    }

    pub fn record_success(&self, name: &str) {
        self.ensure(name);
        self.breakers.read().unwrap().get(name).unwrap().record_success();
    }

    pub fn record_failure(&self, name: &str) {
        self.ensure(name);
        self.breakers.read().unwrap().get(name).unwrap().record_failure();
    }

    pub fn reset(&self, name: &str) -> bool {
        let breakers = self.breakers.read().unwrap();
        match breakers.get(name) {
            Some(breaker) => {
                breaker.reset();
                true
            }
            None => false,
        }
    }

    pub fn reset_all(&self) {
        for breaker in self.breakers.read().unwrap().values() {
            breaker.reset();
        }
    }

    pub fn state(&self, name: &str) -> Option<(BreakerState, BreakerStats)> {
        self.breakers.read().unwrap().get(name).map(|b| (b.state(), b.stats()))
    }

    pub fn list(&self) -> Vec<(String, BreakerState, BreakerStats)> {
        self.breakers
            .read()
            .unwrap()
            .iter()
            .map(|(name, b)| (name.clone(), b.state(), b.stats()))
            .collect()
    }
}
