// =============================================================================
// Core typed entities shared across the Meridian trading engine
// =============================================================================
//
// All monetary quantities are `rust_decimal::Decimal` (serialized as strings,
// precision preserved). All timestamps are UTC-aware `DateTime<Utc>`.
// =============================================================================

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Actions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeAction {
    Buy,
    Sell,
}

impl TradeAction {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Buy => "buy",
            Self::Sell => "sell",
        }
    }
}

impl std::fmt::Display for TradeAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Account
// ---------------------------------------------------------------------------

/// A broker-reported holding with derived P/L fields.
///
/// Derived values are pure functions of the stored fields; a zero-quantity
/// position always carries zero P/L.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub quantity: i64,
    pub average_buy_price: Decimal,
    pub current_price: Decimal,
}

impl Position {
    pub fn cost_basis(&self) -> Decimal {
        Decimal::from(self.quantity) * self.average_buy_price
    }

    pub fn current_value(&self) -> Decimal {
        Decimal::from(self.quantity) * self.current_price
    }

    pub fn profit_loss(&self) -> Decimal {
        if self.quantity == 0 {
            return Decimal::ZERO;
        }
        self.current_value() - self.cost_basis()
    }

    pub fn profit_loss_pct(&self) -> Decimal {
        let basis = self.cost_basis();
        if basis.is_zero() {
            return Decimal::ZERO;
        }
        self.profit_loss() / basis * Decimal::ONE_HUNDRED
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountBalance {
    pub cash: Decimal,
    pub equity: Decimal,
    pub buying_power: Decimal,
    pub last_updated: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Market data
// ---------------------------------------------------------------------------

/// A validated, immutable market quote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    pub current_price: Decimal,
    pub timestamp_utc: DateTime<Utc>,
    pub market_state: String,
}

/// One OHLCV bar, oldest-first in any series. Input to the ATR calculator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceBar {
    pub timestamp_utc: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketStatus {
    pub is_open: bool,
    pub next_open: DateTime<Utc>,
    pub next_close: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Risk
// ---------------------------------------------------------------------------

/// ATR output used to derive a volatility-scaled stop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AtrStopData {
    pub atr_value: Decimal,
    pub period: usize,
    pub multiplier: Decimal,
    pub computed_at: DateTime<Utc>,
}

/// Which stop-selection strategy produced a position plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StopStrategy {
    Pullback,
    Percent,
    Atr,
}

impl StopStrategy {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Pullback => "pullback",
            Self::Percent => "percent",
            Self::Atr => "atr",
        }
    }
}

impl std::fmt::Display for StopStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A fully sized long entry: share count, stop, target, and the risk/reward
/// arithmetic that justified it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionPlan {
    pub symbol: String,
    pub shares: u32,
    pub entry_price: Decimal,
    pub stop_price: Decimal,
    pub target_price: Decimal,
    pub risk_amount: Decimal,
    pub reward_amount: Decimal,
    pub risk_reward_ratio: Decimal,
    pub stop_strategy: StopStrategy,
}

// ---------------------------------------------------------------------------
// Safety gate
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SafetyReason {
    Ok,
    InsufficientBuyingPower,
    PositionSizeLimit,
    DailyLossLimit,
    PdtLimit,
    CircuitBreakerOpen,
    OutsideTradingWindow,
    InvalidInput,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyResult {
    pub approved: bool,
    pub reason: SafetyReason,
    pub detail: String,
}

impl SafetyResult {
    pub fn approved() -> Self {
        Self {
            approved: true,
            reason: SafetyReason::Ok,
            detail: String::new(),
        }
    }

    pub fn denied(reason: SafetyReason, detail: impl Into<String>) -> Self {
        Self {
            approved: false,
            reason,
            detail: detail.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Audit
// ---------------------------------------------------------------------------

/// One immutable line of the dated trade log. The correlation id links the
/// pre-trade decision, the fill, and every audit line in between.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub correlation_id: String,
    pub decided_at: DateTime<Utc>,
    pub symbol: String,
    pub action: TradeAction,
    pub shares: u32,
    pub intended_price: Decimal,
    pub filled_price: Decimal,
    pub fees: Decimal,
    /// Realized net P/L; present only when the record closes a position.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub net_pl: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_reward_ratio: Option<Decimal>,
    pub paper: bool,
    pub reason_tag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_strategy: Option<StopStrategy>,
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub success: bool,
    pub timestamp: DateTime<Utc>,
    pub latency_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub reauth_triggered: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionHealthStatus {
    pub is_healthy: bool,
    pub session_start_time: DateTime<Utc>,
    pub session_uptime_seconds: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_health_check: Option<DateTime<Utc>>,
    pub health_check_count: u64,
    pub reauth_count: u64,
    pub consecutive_failures: u32,
}
