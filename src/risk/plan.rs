// =============================================================================
// Position-plan calculator — stop selection, sizing, risk/reward gating
// =============================================================================
//
// Stop selection order honours the caller's preference; an ATR request
// without ATR data degrades to the pullback low, then to the percent stop,
// and the fallback is logged. The selected stop must land in the permitted
// distance window before any sizing happens:
//
//   d = (entry - stop) / entry,  d == 0.005 (within 1e-9)  or  0.007 <= d <= 0.10
//
// Sizing: shares = floor(risk_budget / per-share risk), at least one share,
// and the resulting reward:risk must meet the configured minimum.
// =============================================================================

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{debug, warn};

use crate::error::{TradingError, TradingResult};
use crate::models::{AtrStopData, PositionPlan, StopStrategy};

/// Permitted stop-distance window (fractions of entry price).
const PINNED_DISTANCE: Decimal = dec!(0.005);
const PINNED_TOLERANCE: Decimal = dec!(0.000000001);
const MIN_DISTANCE: Decimal = dec!(0.007);
const MAX_DISTANCE: Decimal = dec!(0.10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopKind {
    PullbackLow,
    Percent,
    Atr,
}

/// The caller's stop preference plus whatever inputs are actually available.
#[derive(Debug, Clone)]
pub struct StopRequest {
    pub preferred: StopKind,
    pub atr: Option<AtrStopData>,
    pub pullback_low: Option<Decimal>,
    /// Percent-stop distance as a fraction of entry (always available).
    pub percent: Decimal,
}

#[derive(Debug, Clone)]
pub struct PlanInputs {
    pub symbol: String,
    pub buying_power: Decimal,
    /// Per-trade risk budget as a fraction of buying power (0.01 = 1%).
    pub risk_fraction: Decimal,
    pub entry_price: Decimal,
    pub target_price: Decimal,
    pub stop: StopRequest,
    pub min_risk_reward: Decimal,
}

pub fn compute_plan(inputs: &PlanInputs) -> TradingResult<PositionPlan> {
    if inputs.entry_price <= Decimal::ZERO {
        return Err(TradingError::invalid_input("entry price must be positive"));
    }
    if inputs.target_price <= inputs.entry_price {
        return Err(TradingError::invalid_input(format!(
            "target {} must exceed entry {}",
            inputs.target_price, inputs.entry_price
        )));
    }
    if inputs.risk_fraction <= Decimal::ZERO || inputs.buying_power <= Decimal::ZERO {
        return Err(TradingError::invalid_input(
            "risk fraction and buying power must be positive",
        ));
    }

    let (stop_price, strategy) = select_stop(&inputs.stop, inputs.entry_price)?;
    validate_stop_distance(inputs.entry_price, stop_price)?;

    let per_share_risk = inputs.entry_price - stop_price;
    let risk_budget = inputs.buying_power * inputs.risk_fraction;
    let shares = (risk_budget / per_share_risk).floor();
    let shares = shares.to_u32().unwrap_or(0);
    if shares == 0 {
        return Err(TradingError::invalid_input(format!(
            "insufficient risk budget: {risk_budget} cannot cover one share at {per_share_risk} risk"
        )));
    }

    let shares_d = Decimal::from(shares);
    let risk_amount = shares_d * per_share_risk;
    let reward_amount = shares_d * (inputs.target_price - inputs.entry_price);
    let risk_reward = reward_amount / risk_amount;
    if risk_reward < inputs.min_risk_reward {
        return Err(TradingError::invalid_input(format!(
            "risk/reward {} below minimum {}",
            risk_reward.round_dp(2),
            inputs.min_risk_reward
        )));
    }

    let plan = PositionPlan {
        symbol: inputs.symbol.clone(),
        shares,
        entry_price: inputs.entry_price,
        stop_price,
        target_price: inputs.target_price,
        risk_amount,
        reward_amount,
        risk_reward_ratio: risk_reward.round_dp(2),
        stop_strategy: strategy,
    };
    debug!(
        symbol = %plan.symbol,
        shares = plan.shares,
        stop = %plan.stop_price,
        strategy = %plan.stop_strategy,
        rr = %plan.risk_reward_ratio,
        "position plan computed"
    );
    Ok(plan)
}

// ---------------------------------------------------------------------------
// Stop selection
// ---------------------------------------------------------------------------

fn select_stop(request: &StopRequest, entry: Decimal) -> TradingResult<(Decimal, StopStrategy)> {
    match request.preferred {
        StopKind::PullbackLow => {
            let low = request.pullback_low.ok_or_else(|| {
                TradingError::invalid_input("pullback stop requested without a pullback low")
            })?;
            Ok((low, StopStrategy::Pullback))
        }
        StopKind::Percent => Ok((percent_stop(entry, request.percent), StopStrategy::Percent)),
        StopKind::Atr => {
            if let Some(atr) = &request.atr {
                return Ok((
                    entry - atr.atr_value * atr.multiplier,
                    StopStrategy::Atr,
                ));
            }
            // ATR inputs unavailable: degrade to pullback, then percent.
            if let Some(low) = request.pullback_low {
                warn!("ATR stop unavailable — falling back to pullback low");
                return Ok((low, StopStrategy::Pullback));
            }
            warn!("ATR stop unavailable — falling back to percent stop");
            Ok((percent_stop(entry, request.percent), StopStrategy::Percent))
        }
    }
}

fn percent_stop(entry: Decimal, fraction: Decimal) -> Decimal {
    entry * (Decimal::ONE - fraction)
}

fn validate_stop_distance(entry: Decimal, stop: Decimal) -> TradingResult<()> {
    if stop <= Decimal::ZERO || stop >= entry {
        return Err(TradingError::data_validation(format!(
            "stop {stop} must sit below entry {entry}"
        )));
    }
    let distance = (entry - stop) / entry;
    let pinned = (distance - PINNED_DISTANCE).abs() <= PINNED_TOLERANCE;
    let in_window = distance >= MIN_DISTANCE && distance <= MAX_DISTANCE;
    if !pinned && !in_window {
        return Err(TradingError::data_validation(format!(
            "stop distance {} outside permitted window (0.005 exactly, or 0.007..0.10)",
            distance.round_dp(6)
        )));
    }
    Ok(())
}
