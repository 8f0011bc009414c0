//! Circuit breaker guarding the whole generation pipeline.
//!
//! One instance is constructed per process and shared by `Arc` between all
//! in-flight requests; state is per-instance, not distributed, so a
//! multi-instance deployment trips each breaker independently. Mutation
//! happens from concurrent tokio tasks, hence the explicit Mutex/AtomicBool
//! instead of unsynchronized globals.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tracing::warn;

use crate::error::GenerateError;

#[derive(Debug, Default)]
struct BreakerState {
  failures: u32,
  last_failure: Option<Instant>,
  open: bool,
}

#[derive(Debug)]
pub struct CircuitBreaker {
  state: Mutex<BreakerState>,
  threshold: u32,
  cooldown: Duration,
  /// Set on any rate-limit response; the orchestrator backs off before the
  /// next call and clears it.
  rate_limited: AtomicBool,
}

impl CircuitBreaker {
  pub fn new(threshold: u32, cooldown: Duration) -> Self {
    Self {
      state: Mutex::new(BreakerState::default()),
      threshold: threshold.max(1),
      cooldown,
      rate_limited: AtomicBool::new(false),
    }
  }

  /// Gate every pipeline entry. While open and inside the cooldown window
  /// this fails fast with a retry-after hint; once the cooldown has elapsed
  /// the circuit closes and the failure count resets before the call is
  /// allowed through.
  pub fn check(&self) -> Result<(), GenerateError> {
    let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
    if !state.open {
      return Ok(());
    }
    let elapsed = state.last_failure.map(|t| t.elapsed()).unwrap_or(self.cooldown);
    if elapsed >= self.cooldown {
      *state = BreakerState::default();
      return Ok(());
    }
    let retry_in_secs = (self.cooldown - elapsed).as_secs().max(1);
    Err(GenerateError::CircuitOpen { retry_in_secs })
  }

  /// Record one failed model attempt; opens the circuit at the threshold.
  pub fn record_failure(&self) {
    let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
    state.failures += 1;
    state.last_failure = Some(Instant::now());
    if state.failures >= self.threshold && !state.open {
      state.open = true;
      warn!(
        target: "generation",
        failures = state.failures,
        cooldown_secs = self.cooldown.as_secs(),
        "circuit breaker opened"
      );
    }
  }

  /// A success zeroes the failure count. It does not close an already-open
  /// circuit; only the cooldown check in `check()` does that.
  pub fn record_success(&self) {
    let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
    state.failures = 0;
  }

  pub fn failure_count(&self) -> u32 {
    self.state.lock().unwrap_or_else(|e| e.into_inner()).failures
  }

  pub fn mark_rate_limited(&self) {
    self.rate_limited.store(true, Ordering::Relaxed);
  }

  /// Read-and-clear the rate-limited flag.
  pub fn take_rate_limited(&self) -> bool {
    self.rate_limited.swap(false, Ordering::Relaxed)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn trips_at_threshold_and_resets_after_cooldown() {
    let breaker = CircuitBreaker::new(3, Duration::from_millis(30));
    assert!(breaker.check().is_ok());

    breaker.record_failure();
    breaker.record_failure();
    assert!(breaker.check().is_ok(), "below threshold stays closed");
    breaker.record_failure();

    match breaker.check() {
      Err(GenerateError::CircuitOpen { retry_in_secs }) => assert!(retry_in_secs >= 1),
      other => panic!("expected open circuit, got {other:?}"),
    }

    std::thread::sleep(Duration::from_millis(40));
    assert!(breaker.check().is_ok(), "cooldown elapsed closes the circuit");
    assert_eq!(breaker.failure_count(), 0, "reset clears the failure count");
  }

  #[test]
  fn success_resets_count_but_not_open_state() {
    let breaker = CircuitBreaker::new(2, Duration::from_secs(60));
    breaker.record_failure();
    breaker.record_failure();
    assert!(breaker.check().is_err());

    breaker.record_success();
    assert_eq!(breaker.failure_count(), 0);
    // Still open: only the cooldown path closes the circuit.
    assert!(breaker.check().is_err());
  }

  #[test]
  fn rate_limited_flag_is_read_once() {
    let breaker = CircuitBreaker::new(5, Duration::from_secs(1));
    assert!(!breaker.take_rate_limited());
    breaker.mark_rate_limited();
    assert!(breaker.take_rate_limited());
    assert!(!breaker.take_rate_limited());
  }
}
