// =============================================================================
// Trade-execution pipeline — the only path an order can take
// =============================================================================
//
// Within one `execute_trade` call the steps are strictly ordered:
//
//   1. authenticated?            (fail fast)
//   2. health probe + breaker    (abort on degradation)
//   3. trading window
//   4. position plan (buys) / tracked stop reuse (sells)
//   5. safety gate               (denial -> trade.rejected, no record)
//   6. order submission          (paper simulation or live broker call)
//   7. TradeRecord append + buying_power/positions cache invalidation
//   8. broker failures classified; non-rate-limit failures feed the breaker
//
// Every audit line of one decision shares a correlation id.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::account::{AccountDataService, CacheKey};
use crate::audit::{AuditLogger, LogDomain};
use crate::auth::AuthService;
use crate::broker::{BrokerApi, OrderRequest};
use crate::clock::{self, TradingWindow};
use crate::config::BotConfig;
use crate::error::{TradingError, TradingResult};
use crate::health::SessionHealthMonitor;
use crate::market::MarketDataService;
use crate::models::{
    PositionPlan, SafetyReason, SafetyResult, TradeAction, TradeRecord,
};
use crate::resilience::{with_retry, CircuitBreaker, RetryPolicy};
use crate::risk::{self, PlanInputs, StopKind, StopRequest, TrailingConfig, TrailingContext};
use crate::safety::SafetyChecker;

// ---------------------------------------------------------------------------
// Configuration slice
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub paper_trading: bool,
    pub atr_enabled: bool,
    pub atr_period: usize,
    pub atr_multiplier: Decimal,
    pub per_trade_risk_pct: Decimal,
    pub min_risk_reward: Decimal,
    pub stop_loss_pct: Decimal,
    pub profit_target_pct: Decimal,
    pub window: TradingWindow,
    pub trailing: TrailingConfig,
}

impl ExecutorConfig {
    pub fn from_bot_config(cfg: &BotConfig) -> Self {
        Self {
            paper_trading: cfg.paper_trading,
            atr_enabled: cfg.atr_enabled,
            atr_period: cfg.atr_period,
            atr_multiplier: cfg.atr_multiplier,
            per_trade_risk_pct: cfg.per_trade_risk_pct,
            min_risk_reward: cfg.min_risk_reward,
            stop_loss_pct: cfg.stop_loss_pct,
            profit_target_pct: cfg.profit_target_pct,
            window: cfg.window.clone(),
            trailing: TrailingConfig {
                activation_pct: cfg.trailing_activation_pct,
                distance_pct: cfg.trailing_distance_pct,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum ExecutionOutcome {
    /// Order filled (or paper-simulated); the record has been appended.
    Filled(TradeRecord),
    /// A gate refused the order; no record was written.
    Rejected(SafetyResult),
}

/// Trailing state for a position this process opened.
#[derive(Debug, Clone)]
struct OpenPosition {
    entry_price: Decimal,
    target_price: Decimal,
    stop_price: Decimal,
    shares: u32,
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

pub struct TradeExecutor {
    config: ExecutorConfig,
    broker: Arc<dyn BrokerApi>,
    auth: Arc<AuthService>,
    health: Arc<SessionHealthMonitor>,
    market: Arc<MarketDataService>,
    account: Arc<AccountDataService>,
    safety: Arc<SafetyChecker>,
    breaker: Arc<CircuitBreaker>,
    audit: Arc<AuditLogger>,
    open_positions: Mutex<HashMap<String, OpenPosition>>,
}

impl TradeExecutor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: ExecutorConfig,
        broker: Arc<dyn BrokerApi>,
        auth: Arc<AuthService>,
        health: Arc<SessionHealthMonitor>,
        market: Arc<MarketDataService>,
        account: Arc<AccountDataService>,
        safety: Arc<SafetyChecker>,
        breaker: Arc<CircuitBreaker>,
        audit: Arc<AuditLogger>,
    ) -> Self {
        Self {
            config,
            broker,
            auth,
            health,
            market,
            account,
            safety,
            breaker,
            audit,
            open_positions: Mutex::new(HashMap::new()),
        }
    }

    pub async fn execute_trade(
        &self,
        symbol: &str,
        action: TradeAction,
        shares: u32,
        price: Decimal,
        reason_tag: &str,
    ) -> TradingResult<ExecutionOutcome> {
        self.execute_trade_at(Utc::now(), symbol, action, shares, price, reason_tag)
            .await
    }

    /// Pipeline entry with an explicit decision instant (the production
    /// surface above always passes the current time).
    pub async fn execute_trade_at(
        &self,
        now: DateTime<Utc>,
        symbol: &str,
        action: TradeAction,
        shares: u32,
        price: Decimal,
        reason_tag: &str,
    ) -> TradingResult<ExecutionOutcome> {
        let correlation_id = Uuid::new_v4().to_string();
        self.audit.event(
            LogDomain::Bot,
            "trade.requested",
            Some(&correlation_id),
            json!({
                "symbol": symbol,
                "action": action.as_str(),
                "shares": shares,
                "price": price,
                "reason_tag": reason_tag,
            }),
        );

        // 1. Session present?
        if !self.auth.is_authenticated() {
            self.audit.event(
                LogDomain::Bot,
                "trade.aborted",
                Some(&correlation_id),
                json!({"stage": "auth", "error": "not authenticated"}),
            );
            return Err(TradingError::auth("not authenticated — trade aborted"));
        }

        // 2. Session health and dependency degradation.
        let health = self.health.check_health("pre_trade").await;
        if !health.success {
            self.audit.event(
                LogDomain::Bot,
                "trade.aborted",
                Some(&correlation_id),
                json!({"stage": "health", "error": health.error_message}),
            );
            return Err(TradingError::non_retriable(
                "session health check failed — trade aborted",
            ));
        }
        if self.breaker.should_trip() {
            return Ok(self.reject(
                &correlation_id,
                SafetyResult::denied(
                    SafetyReason::CircuitBreakerOpen,
                    format!("circuit breaker '{}' is open", self.breaker.name()),
                ),
            ));
        }

        // 3. Trading window.
        if let Err(e) = clock::validate_trade_time(Some(now), &self.config.window) {
            return Ok(self.reject(
                &correlation_id,
                SafetyResult::denied(SafetyReason::OutsideTradingWindow, e.to_string()),
            ));
        }

        // 4. Plan the entry / look up the tracked exit.
        let (shares, plan) = match action {
            TradeAction::Buy => match self.plan_entry(symbol, price, &correlation_id).await? {
                Ok(plan) => {
                    if plan.shares != shares {
                        debug!(
                            requested = shares,
                            planned = plan.shares,
                            "plan share count overrides the request"
                        );
                    }
                    (plan.shares, Some(plan))
                }
                Err(denial) => return Ok(self.reject(&correlation_id, denial)),
            },
            TradeAction::Sell => (shares, None),
        };

        // 5. Safety gate.
        let buying_power = match &plan {
            Some(_) => Some(self.account.get_buying_power(true).await?),
            None => None,
        };
        let verdict = self
            .safety
            .validate_trade_at(
                now,
                symbol,
                action,
                shares,
                price,
                buying_power,
                Some(&correlation_id),
            )
            .await;
        if !verdict.approved {
            return Ok(self.reject(&correlation_id, verdict));
        }

        // 6. Submit.
        let (filled_price, order_id, paper) = if self.config.paper_trading {
            debug!(symbol, action = %action, shares, "paper fill simulated");
            (price, None, true)
        } else {
            let order = OrderRequest {
                symbol: symbol.to_string(),
                side: action,
                quantity: shares,
                limit_price: price,
                client_order_id: correlation_id.clone(),
            };
            let response =
                with_retry(|| self.broker.place_order(&order), &RetryPolicy::default()).await;
            match response {
                Ok(body) => {
                    let order_id = body
                        .get("id")
                        .and_then(|v| v.as_str())
                        .map(|s| s.to_string());
                    self.breaker.record_success();
                    (price, order_id, false)
                }
                Err(err) => {
                    if err.counts_toward_breaker() {
                        self.breaker.record_failure();
                    }
                    // A failed submission may have left partial order state
                    // broker-side; the correlation id is the recovery handle.
                    self.audit.event(
                        LogDomain::Bot,
                        "trade.failed",
                        Some(&correlation_id),
                        json!({
                            "symbol": symbol,
                            "action": action.as_str(),
                            "error": err.to_string(),
                        }),
                    );
                    return Err(err);
                }
            }
        };

        // 7. Record and invalidate.
        let net_pl = match action {
            TradeAction::Sell => self.close_position(symbol, shares, filled_price),
            TradeAction::Buy => None,
        };
        let record = TradeRecord {
            correlation_id: correlation_id.clone(),
            decided_at: now,
            symbol: symbol.to_string(),
            action,
            shares,
            intended_price: price,
            filled_price,
            fees: Decimal::ZERO,
            net_pl,
            risk_reward_ratio: plan.as_ref().map(|p| p.risk_reward_ratio),
            paper,
            reason_tag: reason_tag.to_string(),
            order_id,
            stop_strategy: plan.as_ref().map(|p| p.stop_strategy),
        };
        self.audit.append_trade(&record)?;

        if let Some(plan) = &plan {
            self.safety.record_buy(symbol);
            self.open_positions.lock().insert(
                symbol.to_string(),
                OpenPosition {
                    entry_price: plan.entry_price,
                    target_price: plan.target_price,
                    stop_price: plan.stop_price,
                    shares: plan.shares,
                },
            );
        }
        if let Some(pnl) = net_pl {
            self.safety.record_fill_pnl(pnl);
        }

        self.account.invalidate_cache(Some(CacheKey::BuyingPower));
        self.audit.event(
            LogDomain::Bot,
            "cache.invalidated",
            Some(&correlation_id),
            json!({"key": "buying_power"}),
        );
        self.account.invalidate_cache(Some(CacheKey::Positions));
        self.audit.event(
            LogDomain::Bot,
            "cache.invalidated",
            Some(&correlation_id),
            json!({"key": "positions"}),
        );

        info!(
            symbol,
            action = %action,
            shares,
            price = %filled_price,
            paper,
            correlation_id = %correlation_id,
            "trade executed"
        );
        Ok(ExecutionOutcome::Filled(record))
    }

    // -------------------------------------------------------------------------
    // Entry planning
    // -------------------------------------------------------------------------

    /// Build the position plan for a buy. Outer error = infrastructure
    /// failure; inner Err = plan rejection (becomes trade.rejected).
    async fn plan_entry(
        &self,
        symbol: &str,
        entry_price: Decimal,
        correlation_id: &str,
    ) -> TradingResult<Result<PositionPlan, SafetyResult>> {
        let buying_power = self.account.get_buying_power(true).await?;

        let atr = if self.config.atr_enabled {
            match self.compute_atr_stop(symbol).await {
                Ok(data) => Some(data),
                Err(e) => {
                    // ATR inputs unusable: the plan calculator degrades to
                    // the percent stop and tags the plan accordingly.
                    warn!(symbol, error = %e, "ATR unavailable — stop strategy will fall back");
                    self.audit.event(
                        LogDomain::Bot,
                        "risk.stop_fallback",
                        Some(correlation_id),
                        json!({"symbol": symbol, "from": "atr", "error": e.to_string()}),
                    );
                    None
                }
            }
        } else {
            None
        };

        let preferred = if self.config.atr_enabled {
            StopKind::Atr
        } else {
            StopKind::Percent
        };
        let inputs = PlanInputs {
            symbol: symbol.to_string(),
            buying_power,
            risk_fraction: self.config.per_trade_risk_pct,
            entry_price,
            target_price: entry_price * (Decimal::ONE + self.config.profit_target_pct),
            stop: StopRequest {
                preferred,
                atr,
                pullback_low: None,
                percent: self.config.stop_loss_pct,
            },
            min_risk_reward: self.config.min_risk_reward,
        };

        match risk::compute_plan(&inputs) {
            Ok(plan) => Ok(Ok(plan)),
            Err(e) => Ok(Err(SafetyResult::denied(
                SafetyReason::InvalidInput,
                format!("position plan rejected: {e}"),
            ))),
        }
    }

    async fn compute_atr_stop(&self, symbol: &str) -> TradingResult<crate::models::AtrStopData> {
        let bars = self
            .market
            .get_historical_data(symbol, "day", "3month")
            .await?;
        risk::compute_atr(&bars, self.config.atr_period, self.config.atr_multiplier)
    }

    // -------------------------------------------------------------------------
    // Exits
    // -------------------------------------------------------------------------

    /// Drop the tracked position and compute realized P/L for the close.
    fn close_position(&self, symbol: &str, shares: u32, fill: Decimal) -> Option<Decimal> {
        let mut open = self.open_positions.lock();
        let position = open.get_mut(symbol)?;
        let pnl = (fill - position.entry_price) * Decimal::from(shares.min(position.shares));
        if shares >= position.shares {
            open.remove(symbol);
        } else {
            position.shares -= shares;
        }
        Some(pnl)
    }

    /// Walk tracked open positions and ratchet their stops against fresh
    /// quotes. Quote failures skip the symbol; stops never move down.
    pub async fn manage_trailing_stops(&self) {
        let tracked: Vec<(String, OpenPosition)> = self
            .open_positions
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        for (symbol, position) in tracked {
            let quote = match self.market.get_quote(&symbol).await {
                Ok(q) => q,
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "quote unavailable for trailing stop");
                    continue;
                }
            };

            let ctx = TrailingContext {
                entry_price: position.entry_price,
                target_price: position.target_price,
                current_stop: position.stop_price,
                current_price: quote.current_price,
            };
            if let Some(new_stop) = risk::adjust_stop(&ctx, &self.config.trailing) {
                if let Some(entry) = self.open_positions.lock().get_mut(&symbol) {
                    entry.stop_price = new_stop;
                }
                self.audit.event(
                    LogDomain::Bot,
                    "trailing_stop.adjusted",
                    None,
                    json!({
                        "symbol": symbol,
                        "old_stop": ctx.current_stop,
                        "new_stop": new_stop,
                        "price": quote.current_price,
                    }),
                );
            }
        }
    }

    /// Stop price currently tracked for `symbol`, if this process opened it.
    pub fn tracked_stop(&self, symbol: &str) -> Option<Decimal> {
        self.open_positions.lock().get(symbol).map(|p| p.stop_price)
    }

    fn reject(&self, correlation_id: &str, result: SafetyResult) -> ExecutionOutcome {
        self.audit.event(
            LogDomain::Bot,
            "trade.rejected",
            Some(correlation_id),
            json!({"reason": result.reason, "detail": result.detail}),
        );
        info!(reason = ?result.reason, detail = %result.detail, "trade rejected");
        ExecutionOutcome::Rejected(result)
    }
}

impl std::fmt::Debug for TradeExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TradeExecutor")
            .field("config", &self.config)
            .finish()
    }
}
