// =============================================================================
// Session-health monitor — coalesced probes, re-auth fallback, periodic timer
// =============================================================================
//
// One lightweight authenticated probe at a time: concurrent callers either
// get the cached result (<10 s old) or serialize through the probe mutex.
// Authentication-class failures (401/403) trigger one re-login followed by a
// single re-probe. Persistent non-rate-limit failures feed the circuit
// breaker; rate limits never do.
//
// Periodic mode is one self-owned tokio task on a 300 s interval. Stopping
// is idempotent and aborting never deadlocks an in-flight probe (the probe
// mutex is released when the task is dropped at an await point).
// =============================================================================

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::audit::{AuditLogger, LogDomain};
use crate::auth::AuthService;
use crate::broker::BrokerApi;
use crate::models::{HealthCheckResult, SessionHealthStatus};
use crate::resilience::{with_retry, CircuitBreaker, RetryPolicy};

/// Burst coalescing window: a result younger than this is returned as-is.
const RESULT_CACHE_TTL: Duration = Duration::from_secs(10);
/// Periodic probe cadence.
const CHECK_INTERVAL: Duration = Duration::from_secs(300);

#[derive(Debug)]
struct MonitorState {
    cached: Option<(Instant, HealthCheckResult)>,
    is_healthy: bool,
    health_check_count: u64,
    reauth_count: u64,
    consecutive_failures: u32,
    last_health_check: Option<DateTime<Utc>>,
}

pub struct SessionHealthMonitor {
    auth: Arc<AuthService>,
    broker: Arc<dyn BrokerApi>,
    breaker: Arc<CircuitBreaker>,
    audit: Arc<AuditLogger>,
    session_start: DateTime<Utc>,
    state: Mutex<MonitorState>,
    /// Serializes probes so bursts never produce duplicate broker calls.
    probe: tokio::sync::Mutex<()>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl SessionHealthMonitor {
    pub fn new(
        auth: Arc<AuthService>,
        broker: Arc<dyn BrokerApi>,
        breaker: Arc<CircuitBreaker>,
        audit: Arc<AuditLogger>,
    ) -> Self {
        Self {
            auth,
            broker,
            breaker,
            audit,
            session_start: Utc::now(),
            state: Mutex::new(MonitorState {
                cached: None,
                is_healthy: true,
                health_check_count: 0,
                reauth_count: 0,
                consecutive_failures: 0,
                last_health_check: None,
            }),
            probe: tokio::sync::Mutex::new(()),
            timer: Mutex::new(None),
        }
    }

    // -------------------------------------------------------------------------
    // Probing
    // -------------------------------------------------------------------------

    pub async fn check_health(&self, context: &str) -> HealthCheckResult {
        if let Some(result) = self.cached_result() {
            return result;
        }

        let _probe = self.probe.lock().await;
        // A concurrent caller may have probed while we waited for the lock.
        if let Some(result) = self.cached_result() {
            return result;
        }

        self.audit.event(
            LogDomain::Health,
            "health_check.executed",
            None,
            json!({"context": context}),
        );

        let started = Instant::now();
        let mut reauth_triggered = false;
        let mut reauth_count_delta: u64 = 0;

        let mut outcome = with_retry(|| self.broker.ping(), &RetryPolicy::health_probe()).await;

        if let Err(err) = &outcome {
            if err.is_auth() {
                // The session went stale underneath us; re-login and re-probe.
                reauth_triggered = true;
                reauth_count_delta = 1;
                self.audit.event(
                    LogDomain::Health,
                    "health_check.reauth_triggered",
                    None,
                    json!({"context": context, "error": err.to_string()}),
                );
                match self.auth.login().await {
                    Ok(()) => {
                        self.audit.event(
                            LogDomain::Health,
                            "health_check.reauth_success",
                            None,
                            json!({"context": context}),
                        );
                        outcome = self.broker.ping().await;
                    }
                    Err(login_err) => {
                        warn!(error = %login_err, "re-authentication failed");
                        self.audit.event(
                            LogDomain::Health,
                            "health_check.reauth_failed",
                            None,
                            json!({"context": context, "error": login_err.to_string()}),
                        );
                    }
                }
            }
        }

        let latency_ms = started.elapsed().as_millis() as u64;
        let now = Utc::now();

        let result = match outcome {
            Ok(()) => {
                self.breaker.record_success();
                HealthCheckResult {
                    success: true,
                    timestamp: now,
                    latency_ms,
                    error_message: None,
                    reauth_triggered,
                }
            }
            Err(err) => {
                if err.counts_toward_breaker() {
                    self.breaker.record_failure();
                }
                HealthCheckResult {
                    success: false,
                    timestamp: now,
                    latency_ms,
                    error_message: Some(err.to_string()),
                    reauth_triggered,
                }
            }
        };

        // One lock scope: counters update atomically, no lost increments.
        {
            let mut s = self.state.lock();
            s.health_check_count += 1;
            s.reauth_count += reauth_count_delta;
            s.last_health_check = Some(now);
            s.is_healthy = result.success;
            if result.success {
                s.consecutive_failures = 0;
            } else {
                s.consecutive_failures += 1;
            }
            s.cached = Some((Instant::now(), result.clone()));
        }

        let event = if result.success {
            "health_check.passed"
        } else {
            "health_check.failed"
        };
        self.audit.event(
            LogDomain::Health,
            event,
            None,
            json!({
                "context": context,
                "latency_ms": latency_ms,
                "reauth_triggered": reauth_triggered,
                "error": result.error_message,
            }),
        );

        result
    }

    fn cached_result(&self) -> Option<HealthCheckResult> {
        let s = self.state.lock();
        s.cached
            .as_ref()
            .filter(|(at, _)| at.elapsed() < RESULT_CACHE_TTL)
            .map(|(_, r)| r.clone())
    }

    // -------------------------------------------------------------------------
    // Status
    // -------------------------------------------------------------------------

    pub fn get_session_status(&self) -> SessionHealthStatus {
        let s = self.state.lock();
        SessionHealthStatus {
            is_healthy: s.is_healthy,
            session_start_time: self.session_start,
            session_uptime_seconds: (Utc::now() - self.session_start).num_seconds().max(0) as u64,
            last_health_check: s.last_health_check,
            health_check_count: s.health_check_count,
            reauth_count: s.reauth_count,
            consecutive_failures: s.consecutive_failures,
        }
    }

    // -------------------------------------------------------------------------
    // Periodic mode
    // -------------------------------------------------------------------------

    pub fn start_periodic_checks(self: Arc<Self>) {
        let mut timer = self.timer.lock();
        if timer.is_some() {
            return;
        }
        let monitor = Arc::clone(&self);
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(CHECK_INTERVAL);
            // The immediate first tick is consumed so the first real probe
            // happens one full interval after start.
            interval.tick().await;
            loop {
                interval.tick().await;
                monitor.check_health("periodic").await;
            }
        });
        *timer = Some(handle);
        info!(interval_secs = CHECK_INTERVAL.as_secs(), "periodic health checks started");
    }

    /// Idempotent; releases nothing the timer task still needs.
    pub fn stop_periodic_checks(&self) {
        let handle = self.timer.lock().take();
        if let Some(handle) = handle {
            handle.abort();
            let status = self.get_session_status();
            self.audit.event(
                LogDomain::Health,
                "session.metrics_snapshot",
                None,
                serde_json::to_value(&status).unwrap_or_else(|_| json!({})),
            );
            info!("periodic health checks stopped");
        }
    }
}

impl std::fmt::Debug for SessionHealthMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHealthMonitor")
            .field("state", &*self.state.lock())
            .finish()
    }
}
