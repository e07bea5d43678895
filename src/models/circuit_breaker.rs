use std::collections::VecDeque;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that trip the breaker regardless of rate.
    pub failure_threshold: u32,
    /// Failure ratio over the sliding window that trips the breaker.
    pub failure_rate: f64,
    /// Number of most recent outcomes kept in the sliding window.
    pub window_size: usize,
    /// Minimum outcomes in the window before the rate rule applies.
    pub min_samples: usize,
    /// How long the breaker stays open before offering a probe.
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            failure_rate: 0.5,
            window_size: 20,
            min_samples: 10,
            cooldown: Duration::from_secs(30),
        }
    }
}

/// Verdict for one call attempting to pass the breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Breaker closed, call through and record the outcome.
    Allow,
    /// Cooldown elapsed; this call is the single half-open probe.
    Probe,
    /// Breaker open (or a probe already in flight), fail fast.
    ShortCircuit,
}

#[derive(Debug, Clone, Copy)]
enum CoreState {
    Closed,
    Open { opened_at: Instant },
    /// `probe_started_at` is the lease on the single probe slot; `None`
    /// means the slot is free.
    HalfOpen { probe_started_at: Option<Instant> },
}

/// Pure breaker state machine. No clock and no locking of its own: the
/// caller passes `now` in and wraps the core in whatever synchronization the
/// call site needs. State is local to the process; two instances guarding the
/// same dependency trip independently.
#[derive(Debug)]
pub struct BreakerCore {
    config: CircuitBreakerConfig,
    state: CoreState,
    /// Most recent call outcomes, `true` for failure.
    window: VecDeque<bool>,
    consecutive_failures: u32,
}

impl BreakerCore {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: CoreState::Closed,
            window: VecDeque::with_capacity(config.window_size),
            consecutive_failures: 0,
        }
    }

    pub fn state(&self) -> CircuitState {
        match self.state {
            CoreState::Closed => CircuitState::Closed,
            CoreState::Open { .. } => CircuitState::Open,
            CoreState::HalfOpen { .. } => CircuitState::HalfOpen,
        }
    }

    /// Decides whether a call may proceed. Transitions open -> half-open when
    /// the cooldown has elapsed and hands the caller the probe slot. A probe
    /// lease whose outcome never arrives expires after another cooldown.
    pub fn admit(&mut self, now: Instant) -> Admission {
        match self.state {
            CoreState::Closed => Admission::Allow,
            CoreState::Open { opened_at } => {
                if now.duration_since(opened_at) >= self.config.cooldown {
                    self.state = CoreState::HalfOpen {
                        probe_started_at: Some(now),
                    };
                    Admission::Probe
                } else {
                    Admission::ShortCircuit
                }
            }
            CoreState::HalfOpen { probe_started_at } => {
                // The slot is a lease: a probe that never reported back
                // (its future was dropped) frees it after another cooldown.
                let slot_free = match probe_started_at {
                    None => true,
                    Some(started) => now.duration_since(started) >= self.config.cooldown,
                };
                if slot_free {
                    self.state = CoreState::HalfOpen {
                        probe_started_at: Some(now),
                    };
                    Admission::Probe
                } else {
                    Admission::ShortCircuit
                }
            }
        }
    }

    /// Records a successful call. A successful probe closes the breaker and
    /// clears the window.
    pub fn on_success(&mut self, was_probe: bool) {
        if was_probe {
            self.reset();
            return;
        }
        self.consecutive_failures = 0;
        self.push_outcome(false);
    }

    /// Records a failed call. A failed probe reopens with a fresh cooldown;
    /// in the closed state either trip rule may fire.
    pub fn on_failure(&mut self, now: Instant, was_probe: bool) {
        if was_probe {
            self.trip(now);
            return;
        }
        if matches!(self.state, CoreState::Open { .. }) {
            return;
        }
        self.consecutive_failures += 1;
        self.push_outcome(true);
        if self.should_trip() {
            self.trip(now);
        }
    }

    fn push_outcome(&mut self, failed: bool) {
        if self.window.len() == self.config.window_size {
            self.window.pop_front();
        }
        self.window.push_back(failed);
    }

    fn should_trip(&self) -> bool {
        if self.consecutive_failures >= self.config.failure_threshold {
            return true;
        }
        if self.window.len() >= self.config.min_samples {
            let failures = self.window.iter().filter(|failed| **failed).count();
            let rate = failures as f64 / self.window.len() as f64;
            return rate >= self.config.failure_rate;
        }
        false
    }

    fn trip(&mut self, now: Instant) {
        self.state = CoreState::Open { opened_at: now };
        self.window.clear();
        self.consecutive_failures = 0;
    }

    fn reset(&mut self) {
        self.state = CoreState::Closed;
        self.window.clear();
        self.consecutive_failures = 0;
    }
}
