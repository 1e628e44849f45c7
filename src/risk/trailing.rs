// =============================================================================
// Trailing-stop adjuster — ratcheting protection for open longs
// =============================================================================
//
// Two independent raise rules, both monotone non-decreasing:
//
//   1. Trail: once unrealized gain reaches the activation threshold, the
//      stop follows at price * (1 - trailing distance).
//   2. Breakeven: at 50% progress toward the target, the stop ratchets to
//      the entry price if it still sits below it.
//
// The adjuster never lowers a stop; a pulled-back price simply leaves the
// stop where it was.
// =============================================================================

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::debug;

/// Fraction of the entry->target distance at which breakeven kicks in.
const BREAKEVEN_PROGRESS: Decimal = dec!(0.5);

#[derive(Debug, Clone)]
pub struct TrailingConfig {
    /// Unrealized gain (fraction of entry) that activates trailing.
    pub activation_pct: Decimal,
    /// Trail distance below the current price (fraction of price).
    pub distance_pct: Decimal,
}

impl Default for TrailingConfig {
    fn default() -> Self {
        Self {
            activation_pct: dec!(0.10),
            distance_pct: dec!(0.05),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TrailingContext {
    pub entry_price: Decimal,
    pub target_price: Decimal,
    pub current_stop: Decimal,
    pub current_price: Decimal,
}

/// Returns `Some(new_stop)` when the stop should be raised, `None` otherwise.
pub fn adjust_stop(ctx: &TrailingContext, cfg: &TrailingConfig) -> Option<Decimal> {
    if ctx.entry_price <= Decimal::ZERO || ctx.current_price <= Decimal::ZERO {
        return None;
    }

    let mut candidate = ctx.current_stop;

    let gain = (ctx.current_price - ctx.entry_price) / ctx.entry_price;
    if gain >= cfg.activation_pct {
        let trail = ctx.current_price * (Decimal::ONE - cfg.distance_pct);
        candidate = candidate.max(trail);
    }

    let target_distance = ctx.target_price - ctx.entry_price;
    if target_distance > Decimal::ZERO {
        let progress = (ctx.current_price - ctx.entry_price) / target_distance;
        if progress >= BREAKEVEN_PROGRESS {
            candidate = candidate.max(ctx.entry_price);
        }
    }

    if candidate > ctx.current_stop {
        debug!(
            entry = %ctx.entry_price,
            price = %ctx.current_price,
            old_stop = %ctx.current_stop,
            new_stop = %candidate,
            "trailing stop raised"
        );
        Some(candidate)
    } else {
        None
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(price: Decimal, stop: Decimal) -> TrailingContext {
        TrailingContext {
            entry_price: dec!(100.00),
            target_price: dec!(120.00),
            current_stop: stop,
            current_price: price,
        }
    }

    #[test]
    fn inactive_below_activation_threshold() {
        // +5% gain, below the 10% activation and below 50% target progress.
        assert_eq!(adjust_stop(&ctx(dec!(105.00), dec!(98.00)), &TrailingConfig::default()), None);
    }

    #[test]
    fn activates_at_the_threshold() {
        // +10% gain: trail at 110 * 0.95 = 104.50. Breakeven also applies
        // (progress 0.5) but the trail is higher.
        let new = adjust_stop(&ctx(dec!(110.00), dec!(98.00)), &TrailingConfig::default());
        assert_eq!(new, Some(dec!(104.5000)));
    }

    #[test]
    fn breakeven_ratchet_at_half_target_progress() {
        // Entry 100, target 120: price 110 is 50% progress. With a tight
        // activation config the trail alone would not fire.
        let cfg = TrailingConfig {
            activation_pct: dec!(0.25),
            distance_pct: dec!(0.05),
        };
        let new = adjust_stop(&ctx(dec!(110.00), dec!(95.00)), &cfg);
        assert_eq!(new, Some(dec!(100.00)));
    }

    #[test]
    fn breakeven_does_not_lower_an_already_higher_stop() {
        let cfg = TrailingConfig {
            activation_pct: dec!(0.25),
            distance_pct: dec!(0.05),
        };
        assert_eq!(adjust_stop(&ctx(dec!(110.00), dec!(102.00)), &cfg), None);
    }

    #[test]
    fn adjustments_are_monotone_under_price_pullback() {
        let cfg = TrailingConfig::default();
        // Price runs to 115: trail to 109.25.
        let raised = adjust_stop(&ctx(dec!(115.00), dec!(98.00)), &cfg).unwrap();
        assert_eq!(raised, dec!(109.2500));
        // Price pulls back to 111: candidate trail 105.45 sits below the
        // current stop, so nothing moves.
        assert_eq!(adjust_stop(&ctx(dec!(111.00), raised), &cfg), None);
    }

    #[test]
    fn repeated_rallies_keep_ratcheting_up() {
        let cfg = TrailingConfig::default();
        let mut stop = dec!(95.00);
        for price in [dec!(110.00), dec!(112.00), dec!(118.00)] {
            if let Some(new) = adjust_stop(&ctx(price, stop), &cfg) {
                assert!(new > stop);
                stop = new;
            }
        }
        assert_eq!(stop, dec!(112.1000));
    }

    #[test]
    fn zero_target_distance_skips_breakeven_rule() {
        let cfg = TrailingConfig {
            activation_pct: dec!(0.25),
            distance_pct: dec!(0.05),
        };
        let c = TrailingContext {
            entry_price: dec!(100.00),
            target_price: dec!(100.00),
            current_stop: dec!(95.00),
            current_price: dec!(105.00),
        };
        assert_eq!(adjust_stop(&c, &cfg), None);
    }
}
