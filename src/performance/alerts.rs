// =============================================================================
// Alert evaluation — log-only threshold checks over performance summaries
// =============================================================================
//
// Each metric that misses its target produces one AlertEvent appended to
// logs/performance-alerts.jsonl. A (metric, window) pair already alerted
// within the rolling suppression window is skipped, so re-running a report
// does not spam the alert log.
// =============================================================================

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde_json::json;
use tracing::warn;

use crate::audit::{AuditLogger, LogDomain};

use super::{AlertEvent, PerformanceSummary};

#[derive(Debug, Clone)]
pub struct AlertTargets {
    /// Minimum acceptable win rate (fraction).
    pub target_win_rate: Option<Decimal>,
    /// Maximum acceptable drawdown (positive magnitude).
    pub target_drawdown: Option<Decimal>,
    /// Minimum acceptable net P/L for the window.
    pub target_net_pl: Option<Decimal>,
}

pub struct AlertEvaluator {
    targets: AlertTargets,
    rolling_window: usize,
    audit: Arc<AuditLogger>,
    recent: Mutex<VecDeque<String>>,
}

impl AlertEvaluator {
    pub fn new(targets: AlertTargets, rolling_window: usize, audit: Arc<AuditLogger>) -> Self {
        Self {
            targets,
            rolling_window: rolling_window.max(1),
            audit,
            recent: Mutex::new(VecDeque::new()),
        }
    }

    /// Evaluate one summary; emitted events are returned and appended to the
    /// alert log. Suppressed duplicates produce nothing.
    pub fn evaluate(&self, summary: &PerformanceSummary) -> Vec<AlertEvent> {
        let label = summary.window_label();
        let mut events = Vec::new();

        if let Some(target) = self.targets.target_win_rate {
            if summary.trade_count > 0 && summary.win_rate < target {
                events.extend(self.emit("win_rate", target, summary.win_rate, &label));
            }
        }
        if let Some(target) = self.targets.target_drawdown {
            if summary.max_drawdown > target {
                events.extend(self.emit("max_drawdown", target, summary.max_drawdown, &label));
            }
        }
        if let Some(target) = self.targets.target_net_pl {
            if summary.net_pl < target {
                events.extend(self.emit("net_pl", target, summary.net_pl, &label));
            }
        }

        events
    }

    fn emit(
        &self,
        metric: &str,
        threshold: Decimal,
        observed: Decimal,
        window_label: &str,
    ) -> Option<AlertEvent> {
        let key = format!("{metric}|{window_label}");
        {
            let mut recent = self.recent.lock();
            if recent.contains(&key) {
                return None;
            }
            recent.push_back(key);
            while recent.len() > self.rolling_window {
                recent.pop_front();
            }
        }

        let event = AlertEvent {
            metric: metric.to_string(),
            threshold,
            observed,
            window: window_label.to_string(),
            timestamp: Utc::now(),
            severity: "warning".to_string(),
        };
        warn!(
            metric,
            threshold = %threshold,
            observed = %observed,
            window = window_label,
            "performance alert"
        );
        self.audit.event(
            LogDomain::Alerts,
            "performance.alert",
            None,
            json!({
                "metric": event.metric,
                "threshold": event.threshold,
                "observed": event.observed,
                "window": event.window,
                "severity": event.severity,
            }),
        );
        Some(event)
    }
}
