// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Circuit breaker.
//!
//! ```text
//!            failures >= threshold
//!   Closed ─────────────────────────► Open
//!     ▲                                │ now >= opened_at + cool_down
//!     │ successes >= probe_successes   ▼
//!     └──────────────────────────── HalfOpen ──► Open (any failure)
//! ```
//!
//! Every transition takes the current instant explicitly so the state
//! machine is deterministic under test.

use std::time::{Duration, Instant};

use tracing::{info, warn};

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls pass through; failures are counted.
    Closed,
    /// Calls are rejected until the cool-down elapses.
    Open,
    /// Up to `probe_successes` trial calls at a time; one failure re-opens
    /// the circuit.
    HalfOpen,
}

/// Circuit breaker thresholds.
#[derive(Debug, Clone, PartialEq)]
pub struct BreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// How long the circuit stays open before allowing trial calls.
    pub cool_down: Duration,
    /// Successful trial calls needed to close the circuit again.
    pub probe_successes: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cool_down: Duration::from_secs(30),
            probe_successes: 1,
        }
    }
}

/// Three-state circuit breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    state: CircuitState,
    consecutive_failures: u32,
    trial_successes: u32,
    trials_in_flight: u32,
    last_trial_at: Option<Instant>,
    opened_at: Option<Instant>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            state: CircuitState::Closed,
            consecutive_failures: 0,
            trial_successes: 0,
            trials_in_flight: 0,
            last_trial_at: None,
            opened_at: None,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    /// Ask permission for a call at `now`.
    ///
    /// Returns the remaining cool-down when the circuit is open. An open
    /// circuit whose cool-down has elapsed moves to half-open and admits
    /// the call. While half-open, calls beyond the trial budget are
    /// rejected with a zero wait; trials that have not reported back within
    /// one cool-down are treated as abandoned.
    pub fn try_acquire(&mut self, now: Instant) -> Result<(), Duration> {
        match self.state {
            CircuitState::Closed => Ok(()),
            CircuitState::HalfOpen => {
                let stale = self
                    .last_trial_at
                    .is_some_and(|t| now.saturating_duration_since(t) >= self.config.cool_down);
                if stale {
                    self.trials_in_flight = 0;
                }
                if self.trials_in_flight < self.trial_budget() {
                    self.trials_in_flight += 1;
                    self.last_trial_at = Some(now);
                    Ok(())
                } else {
                    Err(Duration::ZERO)
                }
            }
            CircuitState::Open => {
                let reopen_at = self
                    .opened_at
                    .and_then(|t| t.checked_add(self.config.cool_down));
                match reopen_at {
                    Some(at) if now < at => Err(at - now),
                    None if self.opened_at.is_some() => Err(self.config.cool_down),
                    _ => {
                        info!("Circuit half-open, admitting trial call");
                        self.state = CircuitState::HalfOpen;
                        self.trial_successes = 0;
                        self.trials_in_flight = 1;
                        self.last_trial_at = Some(now);
                        Ok(())
                    }
                }
            }
        }
    }

    fn trial_budget(&self) -> u32 {
        self.config.probe_successes.max(1)
    }

    /// Record a successful call.
    pub fn on_success(&mut self) {
        match self.state {
            CircuitState::Closed => self.consecutive_failures = 0,
            CircuitState::HalfOpen => {
                self.trials_in_flight = self.trials_in_flight.saturating_sub(1);
                self.trial_successes += 1;
                if self.trial_successes >= self.trial_budget() {
                    info!("Circuit closed");
                    self.state = CircuitState::Closed;
                    self.consecutive_failures = 0;
                    self.trial_successes = 0;
                    self.trials_in_flight = 0;
                    self.opened_at = None;
                }
            }
            // A call admitted before the circuit opened finished late.
            CircuitState::Open => {}
        }
    }

    /// Record a failed call at `now`.
    pub fn on_failure(&mut self, now: Instant) {
        match self.state {
            CircuitState::Closed => {
                self.consecutive_failures += 1;
                if self.consecutive_failures >= self.config.failure_threshold.max(1) {
                    self.open(now);
                }
            }
            CircuitState::HalfOpen => self.open(now),
            CircuitState::Open => {}
        }
    }

    fn open(&mut self, now: Instant) {
        warn!(
            failures = self.consecutive_failures,
            cool_down_ms = self.config.cool_down.as_millis() as u64,
            "Circuit opened"
        );
        self.state = CircuitState::Open;
        self.opened_at = Some(now);
        self.trial_successes = 0;
        self.trials_in_flight = 0;
    }
}
