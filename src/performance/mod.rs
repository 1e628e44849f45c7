// =============================================================================
// Performance-tracking engine
// =============================================================================
//
// Offline consumer of the dated trade logs. The aggregator builds one
// `DailyAggregate` snapshot per source day (atomic writes, checksum index);
// summaries compose those aggregates additively across windows; the alert
// evaluator compares summaries against targets and appends log-only events.
//
// Only records carrying a realized net P/L (closes) enter the statistics.
// =============================================================================

pub mod aggregate;
pub mod alerts;
pub mod export;
pub mod stream;
pub mod summary;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub use aggregate::PerformanceStore;
pub use alerts::{AlertEvaluator, AlertTargets};

// ---------------------------------------------------------------------------
// Aggregates
// ---------------------------------------------------------------------------

/// Count-and-sum statistics for one UTC day of closed trades. Every field
/// composes additively, so weekly and monthly summaries are pure folds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyAggregate {
    pub date: NaiveDate,
    pub trade_count: u64,
    pub wins: u64,
    pub losses: u64,
    pub gross_pl: Decimal,
    pub net_pl: Decimal,
    /// Sum of winning trades' net P/L (>= 0).
    pub win_amount_sum: Decimal,
    /// Sum of losing trades' net P/L (<= 0).
    pub loss_amount_sum: Decimal,
    pub rr_sum: Decimal,
    pub rr_count: u64,
    /// Ordered per-trade net P/L stream; window drawdown composes from this.
    pub trade_pnls: Vec<Decimal>,
}

impl DailyAggregate {
    pub fn empty(date: NaiveDate) -> Self {
        Self {
            date,
            trade_count: 0,
            wins: 0,
            losses: 0,
            gross_pl: Decimal::ZERO,
            net_pl: Decimal::ZERO,
            win_amount_sum: Decimal::ZERO,
            loss_amount_sum: Decimal::ZERO,
            rr_sum: Decimal::ZERO,
            rr_count: 0,
            trade_pnls: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Summaries
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SummaryWindow {
    Daily,
    Weekly,
    Monthly,
}

impl SummaryWindow {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
        }
    }
}

impl std::fmt::Display for SummaryWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SummaryWindow {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            "monthly" => Ok(Self::Monthly),
            other => Err(format!("unknown window '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSummary {
    pub window: SummaryWindow,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub trade_count: u64,
    /// Fraction of closed trades with net P/L >= 0; zero when no trades.
    pub win_rate: Decimal,
    pub average_rr: Decimal,
    pub gross_pl: Decimal,
    pub net_pl: Decimal,
    /// Largest peak-to-trough equity drop over the ordered P/L stream
    /// (positive magnitude).
    pub max_drawdown: Decimal,
    pub max_win_streak: u32,
    pub max_loss_streak: u32,
    /// True when any day in the window had a missing or corrupt aggregate.
    pub partial_data: bool,
}

impl PerformanceSummary {
    /// Stable identifier for alert de-duplication.
    pub fn window_label(&self) -> String {
        format!("{}:{}..{}", self.window, self.start_date, self.end_date)
    }
}

// ---------------------------------------------------------------------------
// Alerts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub metric: String,
    pub threshold: Decimal,
    pub observed: Decimal,
    pub window: String,
    pub timestamp: DateTime<Utc>,
    pub severity: String,
}
