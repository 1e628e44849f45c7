// =============================================================================
// Circuit breaker — failure isolation for a degraded dependency
// =============================================================================
//
// State machine:
//
//   Closed ──(threshold consecutive failures)──▶ Open
//   Open ──(cooldown elapsed)──▶ HalfOpen
//   HalfOpen ──(success)──▶ Closed
//   HalfOpen ──(failure)──▶ Open (cooldown restarts)
//
// Callers consult `should_trip()` before expensive operations. Rate-limit
// failures must not be recorded here; that policy lives with the caller
// (see TradingError::counts_toward_breaker).
// =============================================================================

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

/// Per-domain circuit breaker. Registered once at composition time and
/// injected where needed; all transitions happen under the internal mutex.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    threshold: u32,
    cooldown: Duration,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, threshold: u32, cooldown: Duration) -> Self {
        Self {
            name: name.into(),
            threshold: threshold.max(1),
            cooldown,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                opened_at: None,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Record one non-rate-limit failure.
    pub fn record_failure(&self) {
        let mut s = self.inner.lock();
        s.consecutive_failures += 1;
        match s.state {
            BreakerState::Closed if s.consecutive_failures >= self.threshold => {
                s.state = BreakerState::Open;
                s.opened_at = Some(Instant::now());
                warn!(
                    breaker = %self.name,
                    failures = s.consecutive_failures,
                    threshold = self.threshold,
                    "circuit breaker opened"
                );
            }
            BreakerState::HalfOpen => {
                // The probe failed; reopen and restart the cooldown.
                s.state = BreakerState::Open;
                s.opened_at = Some(Instant::now());
                warn!(breaker = %self.name, "half-open probe failed — breaker reopened");
            }
            _ => {}
        }
    }

    /// Record a success. A single success closes the breaker from any state.
    pub fn record_success(&self) {
        let mut s = self.inner.lock();
        if s.state != BreakerState::Closed {
            info!(breaker = %self.name, from = %s.state, "circuit breaker closed");
        }
        s.state = BreakerState::Closed;
        s.consecutive_failures = 0;
        s.opened_at = None;
    }

    /// Whether callers must fail fast right now. An open breaker whose
    /// cooldown has elapsed transitions to half-open and admits one probe.
    pub fn should_trip(&self) -> bool {
        let mut s = self.inner.lock();
        match s.state {
            BreakerState::Closed | BreakerState::HalfOpen => false,
            BreakerState::Open => {
                let elapsed = s
                    .opened_at
                    .map(|t| t.elapsed())
                    .unwrap_or(Duration::MAX);
                if elapsed >= self.cooldown {
                    s.state = BreakerState::HalfOpen;
                    info!(breaker = %self.name, "cooldown elapsed — breaker half-open");
                    false
                } else {
                    true
                }
            }
        }
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.inner.lock().consecutive_failures
    }
}
