// =============================================================================
// Safety checks — the mandatory pre-trade gate
// =============================================================================
//
// Every order passes through `validate_trade` and every evaluation, approved
// or denied, lands in the audit log. Denials carry one specific reason:
//
//   INVALID_INPUT            shares/price/symbol malformed
//   OUTSIDE_TRADING_WINDOW   trading-window predicate failed
//   CIRCUIT_BREAKER_OPEN     broker dependency is degraded
//   DAILY_LOSS_LIMIT         realized daily P/L hit the cap; halted for the day
//   PDT_LIMIT                3 day trades already used and this would be one
//   INSUFFICIENT_BUYING_POWER
//   POSITION_SIZE_LIMIT      notional above the per-position equity cap
//
// The account-data collaborator is optional: without one, documented local
// fallbacks stand in for buying power and equity. Daily state resets when
// the UTC date rolls (double-checked under the write lock).
// =============================================================================

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::json;
use tracing::{info, warn};

use crate::account::AccountDataService;
use crate::audit::{AuditLogger, LogDomain};
use crate::clock::{self, TradingWindow};
use crate::config::BotConfig;
use crate::error::TradingError;
use crate::models::{SafetyReason, SafetyResult, TradeAction};
use crate::resilience::CircuitBreaker;

/// Local-dev stand-ins used when no account service is attached.
const FALLBACK_BUYING_POWER: Decimal = dec!(10000.00);
const FALLBACK_EQUITY: Decimal = dec!(10000.00);

/// PDT rule: day trades allowed before the broker flags the account.
const MAX_DAY_TRADES: u32 = 3;

#[derive(Debug, Clone)]
pub struct SafetyConfig {
    pub daily_loss_cap_pct: Decimal,
    pub per_position_cap_pct: Decimal,
    pub window: TradingWindow,
}

impl SafetyConfig {
    pub fn from_bot_config(cfg: &BotConfig) -> Self {
        Self {
            daily_loss_cap_pct: cfg.daily_loss_cap_pct,
            per_position_cap_pct: cfg.per_position_cap_pct,
            window: cfg.window.clone(),
        }
    }
}

#[derive(Debug)]
struct DayState {
    date: NaiveDate,
    realized_pnl: Decimal,
    bought_today: HashSet<String>,
}

impl DayState {
    fn fresh(date: NaiveDate) -> Self {
        Self {
            date,
            realized_pnl: Decimal::ZERO,
            bought_today: HashSet::new(),
        }
    }
}

pub struct SafetyChecker {
    config: SafetyConfig,
    breaker: Arc<CircuitBreaker>,
    /// Present | absent-with-defaults: without an account service the
    /// documented fallback buying power and equity apply.
    account: Option<Arc<AccountDataService>>,
    audit: Arc<AuditLogger>,
    state: Mutex<DayState>,
}

impl SafetyChecker {
    pub fn new(
        config: SafetyConfig,
        breaker: Arc<CircuitBreaker>,
        account: Option<Arc<AccountDataService>>,
        audit: Arc<AuditLogger>,
    ) -> Self {
        Self {
            config,
            breaker,
            account,
            audit,
            state: Mutex::new(DayState::fresh(clock::utc_date(Utc::now()))),
        }
    }

    // -------------------------------------------------------------------------
    // Gate
    // -------------------------------------------------------------------------

    pub async fn validate_trade(
        &self,
        symbol: &str,
        action: TradeAction,
        shares: u32,
        price: Decimal,
        current_buying_power: Option<Decimal>,
        correlation_id: Option<&str>,
    ) -> SafetyResult {
        self.validate_trade_at(
            Utc::now(),
            symbol,
            action,
            shares,
            price,
            current_buying_power,
            correlation_id,
        )
        .await
    }

    /// Evaluation at an explicit instant. `validate_trade` is the production
    /// surface; this exists so boundary behaviour is testable.
    #[allow(clippy::too_many_arguments)]
    pub async fn validate_trade_at(
        &self,
        now: DateTime<Utc>,
        symbol: &str,
        action: TradeAction,
        shares: u32,
        price: Decimal,
        current_buying_power: Option<Decimal>,
        correlation_id: Option<&str>,
    ) -> SafetyResult {
        self.maybe_reset_daily(now);
        let result = self
            .evaluate(now, symbol, action, shares, price, current_buying_power)
            .await;

        self.audit.event(
            LogDomain::Bot,
            "safety.evaluated",
            correlation_id,
            json!({
                "symbol": symbol,
                "action": action.as_str(),
                "shares": shares,
                "price": price,
                "approved": result.approved,
                "reason": result.reason,
                "detail": result.detail,
            }),
        );
        if !result.approved {
            info!(
                symbol,
                action = %action,
                reason = ?result.reason,
                detail = %result.detail,
                "trade denied by safety gate"
            );
        }
        result
    }

    async fn evaluate(
        &self,
        now: DateTime<Utc>,
        symbol: &str,
        action: TradeAction,
        shares: u32,
        price: Decimal,
        current_buying_power: Option<Decimal>,
    ) -> SafetyResult {
        // 1. Input shape.
        if symbol.trim().is_empty() {
            return SafetyResult::denied(SafetyReason::InvalidInput, "empty symbol");
        }
        if shares == 0 {
            return SafetyResult::denied(SafetyReason::InvalidInput, "shares must be positive");
        }
        if price <= Decimal::ZERO {
            return SafetyResult::denied(
                SafetyReason::InvalidInput,
                format!("price must be positive, got {price}"),
            );
        }

        // 2. Trading window.
        if let Err(e) = clock::validate_trade_time(Some(now), &self.config.window) {
            return SafetyResult::denied(SafetyReason::OutsideTradingWindow, e.to_string());
        }

        // 3. Degraded dependency.
        if self.breaker.should_trip() {
            return SafetyResult::denied(
                SafetyReason::CircuitBreakerOpen,
                format!("circuit breaker '{}' is open", self.breaker.name()),
            );
        }

        let equity = self.resolve_equity().await;

        // 4. Daily loss cap halts the rest of the UTC day.
        let loss_floor = -(self.config.daily_loss_cap_pct * equity);
        let realized = self.state.lock().realized_pnl;
        if realized <= loss_floor {
            return SafetyResult::denied(
                SafetyReason::DailyLossLimit,
                format!("realized {realized} breached daily cap {loss_floor}"),
            );
        }

        // 5. Pattern-day-trade protection: selling something bought today.
        if action == TradeAction::Sell && self.state.lock().bought_today.contains(symbol) {
            let day_trades = self.resolve_day_trade_count().await;
            if day_trades >= MAX_DAY_TRADES {
                return SafetyResult::denied(
                    SafetyReason::PdtLimit,
                    format!("{day_trades} day trades used; selling {symbol} would add one"),
                );
            }
        }

        // 6. Capital checks apply to entries only.
        if action == TradeAction::Buy {
            let notional = Decimal::from(shares) * price;

            let buying_power = match current_buying_power {
                Some(bp) => Ok(bp),
                None => self.resolve_buying_power().await,
            };
            let buying_power = match buying_power {
                Ok(bp) => bp,
                Err(e) => {
                    return SafetyResult::denied(
                        SafetyReason::InvalidInput,
                        format!("buying power unavailable: {e}"),
                    )
                }
            };
            if notional > buying_power {
                return SafetyResult::denied(
                    SafetyReason::InsufficientBuyingPower,
                    format!("notional {notional} exceeds buying power {buying_power}"),
                );
            }

            let cap = self.config.per_position_cap_pct * equity;
            if notional > cap {
                return SafetyResult::denied(
                    SafetyReason::PositionSizeLimit,
                    format!("notional {notional} exceeds per-position cap {cap}"),
                );
            }
        }

        SafetyResult::approved()
    }

    // -------------------------------------------------------------------------
    // Fill feedback
    // -------------------------------------------------------------------------

    /// Record a buy fill so a same-day sell is recognised as a day trade.
    pub fn record_buy(&self, symbol: &str) {
        self.maybe_reset_daily(Utc::now());
        self.state.lock().bought_today.insert(symbol.to_string());
    }

    /// Record realized P/L from a close; feeds the daily loss cap.
    pub fn record_fill_pnl(&self, net_pl: Decimal) {
        self.maybe_reset_daily(Utc::now());
        let mut s = self.state.lock();
        s.realized_pnl += net_pl;
    }

    pub fn realized_daily_pnl(&self) -> Decimal {
        self.state.lock().realized_pnl
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    async fn resolve_buying_power(&self) -> Result<Decimal, TradingError> {
        match &self.account {
            Some(account) => account.get_buying_power(true).await,
            None => Ok(FALLBACK_BUYING_POWER),
        }
    }

    async fn resolve_equity(&self) -> Decimal {
        match &self.account {
            Some(account) => match account.get_account_balance(true).await {
                Ok(balance) => balance.equity,
                Err(e) => {
                    warn!(error = %e, "equity unavailable — using fallback");
                    FALLBACK_EQUITY
                }
            },
            None => FALLBACK_EQUITY,
        }
    }

    async fn resolve_day_trade_count(&self) -> u32 {
        match &self.account {
            Some(account) => account.get_day_trade_count(true).await.unwrap_or_else(|e| {
                // Unknown count is treated as exhausted: the PDT flag is
                // too expensive to risk on missing data.
                warn!(error = %e, "day-trade count unavailable — assuming limit reached");
                MAX_DAY_TRADES
            }),
            None => 0,
        }
    }

    fn maybe_reset_daily(&self, now: DateTime<Utc>) {
        let today = clock::utc_date(now);
        {
            let s = self.state.lock();
            if s.date >= today {
                return;
            }
        }
        let mut s = self.state.lock();
        // Another task may have reset between the two lock scopes.
        if s.date < today {
            info!(old = %s.date, new = %today, "UTC date rolled — daily safety counters reset");
            *s = DayState::fresh(today);
        }
    }
}

impl std::fmt::Debug for SafetyChecker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SafetyChecker")
            .field("config", &self.config)
            .field("state", &*self.state.lock())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::mock::MockBroker;
    use crate::resilience::RetryPolicy;
    use chrono::TimeZone;
    use serde_json::Value;
    use std::time::Duration;

    fn in_window() -> DateTime<Utc> {
        // Wednesday 2025-01-08 08:15 America/New_York.
        chrono_tz::America::New_York
            .with_ymd_and_hms(2025, 1, 8, 8, 15, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    fn checker(account: Option<Arc<AccountDataService>>) -> (SafetyChecker, tempfile::TempDir) {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = BotConfig::paper_defaults("trader@example.com", "pw");
        let checker = SafetyChecker::new(
            SafetyConfig::from_bot_config(&cfg),
            Arc::new(CircuitBreaker::new("broker", 5, Duration::from_secs(60))),
            account,
            Arc::new(AuditLogger::new(tmp.path().join("logs"))),
        );
        (checker, tmp)
    }

    fn account_with(broker: Arc<MockBroker>) -> Arc<AccountDataService> {
        Arc::new(AccountDataService::new(broker, RetryPolicy::default()))
    }

    #[tokio::test]
    async fn small_order_is_approved_with_fallback_account() {
        let (checker, _tmp) = checker(None);
        let result = checker
            .validate_trade_at(in_window(), "AAPL", TradeAction::Buy, 4, dec!(100.00), None, None)
            .await;
        assert!(result.approved, "{result:?}");
        assert_eq!(result.reason, SafetyReason::Ok);
    }

    #[tokio::test]
    async fn zero_shares_and_bad_price_are_invalid_input() {
        let (checker, _tmp) = checker(None);
        let r = checker
            .validate_trade_at(in_window(), "AAPL", TradeAction::Buy, 0, dec!(100), None, None)
            .await;
        assert_eq!(r.reason, SafetyReason::InvalidInput);

        let r = checker
            .validate_trade_at(in_window(), "AAPL", TradeAction::Buy, 1, dec!(0), None, None)
            .await;
        assert_eq!(r.reason, SafetyReason::InvalidInput);

        let r = checker
            .validate_trade_at(in_window(), "  ", TradeAction::Buy, 1, dec!(100), None, None)
            .await;
        assert_eq!(r.reason, SafetyReason::InvalidInput);
    }

    #[tokio::test]
    async fn ten_oclock_is_outside_the_window() {
        let at_close = chrono_tz::America::New_York
            .with_ymd_and_hms(2025, 1, 8, 10, 0, 0)
            .unwrap()
            .with_timezone(&Utc);
        let (checker, _tmp) = checker(None);
        let r = checker
            .validate_trade_at(at_close, "AAPL", TradeAction::Buy, 1, dec!(100), None, None)
            .await;
        assert_eq!(r.reason, SafetyReason::OutsideTradingWindow);
    }

    #[tokio::test]
    async fn open_breaker_denies() {
        let (checker, _tmp) = checker(None);
        for _ in 0..5 {
            checker.breaker.record_failure();
        }
        let r = checker
            .validate_trade_at(in_window(), "AAPL", TradeAction::Buy, 1, dec!(100), None, None)
            .await;
        assert_eq!(r.reason, SafetyReason::CircuitBreakerOpen);
    }

    #[tokio::test]
    async fn insufficient_buying_power_with_explicit_value() {
        let (checker, _tmp) = checker(None);
        let r = checker
            .validate_trade_at(
                in_window(),
                "AAPL",
                TradeAction::Buy,
                4,
                dec!(100.00),
                Some(dec!(300.00)),
                None,
            )
            .await;
        assert_eq!(r.reason, SafetyReason::InsufficientBuyingPower);
        assert!(r.detail.contains("400"));
    }

    #[tokio::test]
    async fn position_size_cap_uses_equity() {
        // Fallback equity $10,000 at 5% caps a position at $500 notional.
        let (checker, _tmp) = checker(None);
        let r = checker
            .validate_trade_at(in_window(), "AAPL", TradeAction::Buy, 6, dec!(100.00), None, None)
            .await;
        assert_eq!(r.reason, SafetyReason::PositionSizeLimit);
    }

    #[tokio::test]
    async fn daily_loss_cap_halts_trading() {
        // Fallback equity $10,000 at 2% cap: -$200 halts.
        let (checker, _tmp) = checker(None);
        checker.record_fill_pnl(dec!(-250.00));
        let r = checker
            .validate_trade_at(in_window(), "AAPL", TradeAction::Buy, 1, dec!(100), None, None)
            .await;
        assert_eq!(r.reason, SafetyReason::DailyLossLimit);

        // Sells are halted too.
        let r = checker
            .validate_trade_at(in_window(), "AAPL", TradeAction::Sell, 1, dec!(100), None, None)
            .await;
        assert_eq!(r.reason, SafetyReason::DailyLossLimit);
    }

    #[tokio::test]
    async fn pdt_limit_blocks_same_day_round_trip() {
        let broker = Arc::new(MockBroker::new());
        broker.script_ok("day_trade_count", serde_json::json!({"day_trade_count": 3}));
        let (checker, _tmp) = checker(Some(account_with(broker)));

        checker.record_buy("AAPL");
        let r = checker
            .validate_trade_at(in_window(), "AAPL", TradeAction::Sell, 1, dec!(100), None, None)
            .await;
        assert_eq!(r.reason, SafetyReason::PdtLimit);
    }

    #[tokio::test]
    async fn selling_a_position_not_bought_today_is_not_a_day_trade() {
        let (checker, _tmp) = checker(None);
        let r = checker
            .validate_trade_at(in_window(), "AAPL", TradeAction::Sell, 1, dec!(100), None, None)
            .await;
        assert!(r.approved);
    }

    #[tokio::test]
    async fn date_roll_resets_daily_state() {
        let (checker, _tmp) = checker(None);
        checker.record_fill_pnl(dec!(-250.00));
        checker.record_buy("AAPL");

        // Force the state onto the prior trading day, then evaluate.
        checker.state.lock().date =
            clock::utc_date(in_window()) - chrono::Duration::days(1);
        let r = checker
            .validate_trade_at(in_window(), "AAPL", TradeAction::Buy, 1, dec!(100), None, None)
            .await;
        // After the roll the loss cap no longer applies.
        assert!(r.approved, "{r:?}");
        assert_eq!(checker.realized_daily_pnl(), Decimal::ZERO);
    }

    #[tokio::test]
    async fn every_evaluation_is_audited() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = BotConfig::paper_defaults("trader@example.com", "pw");
        let checker = SafetyChecker::new(
            SafetyConfig::from_bot_config(&cfg),
            Arc::new(CircuitBreaker::new("broker", 5, Duration::from_secs(60))),
            None,
            Arc::new(AuditLogger::new(tmp.path().join("logs"))),
        );

        checker
            .validate_trade_at(in_window(), "AAPL", TradeAction::Buy, 4, dec!(100), None, Some("cid-1"))
            .await;
        checker
            .validate_trade_at(in_window(), "AAPL", TradeAction::Buy, 0, dec!(100), None, Some("cid-2"))
            .await;

        let content =
            std::fs::read_to_string(tmp.path().join("logs/trading_bot.jsonl")).unwrap();
        let lines: Vec<Value> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["event"], "safety.evaluated");
        assert_eq!(lines[0]["approved"], true);
        assert_eq!(lines[1]["approved"], false);
        assert_eq!(lines[1]["reason"], "INVALID_INPUT");
        assert_eq!(lines[1]["correlation_id"], "cid-2");
    }
}
