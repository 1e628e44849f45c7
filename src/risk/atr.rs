// =============================================================================
// Average True Range — Wilder's smoothing over validated price bars
// =============================================================================
//
// True Range per bar:
//   TR_0 = H_0 - L_0                      (no previous close exists)
//   TR_i = max(H - L, |H - prevC|, |L - prevC|)
//
// ATR seed is the simple mean of the first `period` TR values; bars beyond
// the seed are folded in with Wilder's smoothing:
//   ATR_t = (ATR_{t-1} * (period - 1) + TR_t) / period
//
// With period == series length the result is exactly the mean of all TRs.
// =============================================================================

use chrono::Utc;
use rust_decimal::Decimal;

use crate::error::{TradingError, TradingResult};
use crate::models::{AtrStopData, PriceBar};

/// Compute ATR over `bars` (oldest first). `period` must be >= 1 and no
/// larger than the series; the series must be strictly chronological with
/// positive prices throughout.
pub fn compute_atr(
    bars: &[PriceBar],
    period: usize,
    multiplier: Decimal,
) -> TradingResult<AtrStopData> {
    if period == 0 {
        return Err(TradingError::invalid_input("ATR period must be >= 1"));
    }
    if multiplier <= Decimal::ZERO {
        return Err(TradingError::invalid_input(format!(
            "ATR multiplier must be positive, got {multiplier}"
        )));
    }
    if bars.len() < period {
        return Err(TradingError::data_validation(format!(
            "ATR needs at least {period} bars, got {}",
            bars.len()
        )));
    }

    for pair in bars.windows(2) {
        if pair[1].timestamp_utc <= pair[0].timestamp_utc {
            return Err(TradingError::data_validation(format!(
                "ATR input bars out of order at {}",
                pair[1].timestamp_utc
            )));
        }
    }
    for bar in bars {
        if bar.open <= Decimal::ZERO
            || bar.high <= Decimal::ZERO
            || bar.low <= Decimal::ZERO
            || bar.close <= Decimal::ZERO
        {
            return Err(TradingError::data_validation(format!(
                "ATR input bar at {} has a non-positive price",
                bar.timestamp_utc
            )));
        }
        if bar.high < bar.low {
            return Err(TradingError::data_validation(format!(
                "ATR input bar at {} has high < low",
                bar.timestamp_utc
            )));
        }
    }

    let true_ranges = true_ranges(bars);

    let period_d = Decimal::from(period as u64);
    let seed: Decimal = true_ranges[..period].iter().copied().sum::<Decimal>() / period_d;

    let mut atr = seed;
    for tr in &true_ranges[period..] {
        atr = (atr * (period_d - Decimal::ONE) + *tr) / period_d;
    }

    Ok(AtrStopData {
        atr_value: atr,
        period,
        multiplier,
        computed_at: Utc::now(),
    })
}

fn true_ranges(bars: &[PriceBar]) -> Vec<Decimal> {
    let mut out = Vec::with_capacity(bars.len());
    out.push(bars[0].high - bars[0].low);
    for i in 1..bars.len() {
        let prev_close = bars[i - 1].close;
        let hl = bars[i].high - bars[i].low;
        let hc = (bars[i].high - prev_close).abs();
        let lc = (bars[i].low - prev_close).abs();
        out.push(hl.max(hc).max(lc));
    }
    out
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use rust_decimal_macros::dec;

    fn bar(day: i64, open: Decimal, high: Decimal, low: Decimal, close: Decimal) -> PriceBar {
        PriceBar {
            timestamp_utc: Utc.with_ymd_and_hms(2025, 1, 1, 21, 0, 0).unwrap()
                + Duration::days(day),
            open,
            high,
            low,
            close,
            volume: 1_000,
        }
    }

    fn flat_series(count: i64, range: Decimal) -> Vec<PriceBar> {
        (0..count)
            .map(|i| {
                let mid = dec!(100);
                bar(i, mid, mid + range / dec!(2), mid - range / dec!(2), mid)
            })
            .collect()
    }

    #[test]
    fn period_equal_to_series_length_is_the_mean_of_all_true_ranges() {
        let bars = vec![
            bar(0, dec!(100), dec!(102), dec!(98), dec!(101)),
            bar(1, dec!(101), dec!(104), dec!(99), dec!(103)),
            bar(2, dec!(103), dec!(106), dec!(100), dec!(105)),
        ];
        // TR_0 = 4; TR_1 = max(5, 3, 2) = 5; TR_2 = max(6, 3, 3) = 6.
        let atr = compute_atr(&bars, 3, dec!(2.0)).unwrap();
        assert_eq!(atr.atr_value, dec!(5));
        assert_eq!(atr.period, 3);
        assert_eq!(atr.multiplier, dec!(2.0));
    }

    #[test]
    fn constant_range_series_converges_to_the_range() {
        let bars = flat_series(30, dec!(10));
        let atr = compute_atr(&bars, 14, dec!(2.0)).unwrap();
        assert_eq!(atr.atr_value, dec!(10));
    }

    #[test]
    fn wilder_smoothing_weights_recent_bars() {
        // Quiet series with one late volatile bar: ATR rises but stays below
        // the spike because the seed dominates.
        let mut bars = flat_series(10, dec!(2));
        bars.push(bar(10, dec!(100), dec!(110), dec!(90), dec!(100)));
        let atr = compute_atr(&bars, 5, dec!(2.0)).unwrap();
        assert!(atr.atr_value > dec!(2), "got {}", atr.atr_value);
        assert!(atr.atr_value < dec!(20), "got {}", atr.atr_value);
    }

    #[test]
    fn gap_up_uses_previous_close_in_true_range() {
        let bars = vec![
            bar(0, dec!(100), dec!(105), dec!(95), dec!(95)),
            // Gap up: |115 - 95| = 20 dwarfs the 7-point bar range.
            bar(1, dec!(110), dec!(115), dec!(108), dec!(112)),
        ];
        let atr = compute_atr(&bars, 2, dec!(1.0)).unwrap();
        // TR_0 = 10, TR_1 = 20 -> mean 15.
        assert_eq!(atr.atr_value, dec!(15));
    }

    #[test]
    fn too_few_bars_is_data_validation() {
        let bars = flat_series(5, dec!(2));
        let err = compute_atr(&bars, 14, dec!(2.0)).unwrap_err();
        assert!(matches!(err, TradingError::DataValidation { .. }));
    }

    #[test]
    fn period_zero_is_invalid_input() {
        let bars = flat_series(5, dec!(2));
        let err = compute_atr(&bars, 0, dec!(2.0)).unwrap_err();
        assert!(matches!(err, TradingError::InvalidInput { .. }));
    }

    #[test]
    fn non_monotonic_timestamps_are_rejected() {
        let mut bars = flat_series(5, dec!(2));
        bars.swap(1, 3);
        let err = compute_atr(&bars, 3, dec!(2.0)).unwrap_err();
        assert!(err.to_string().contains("out of order"));
    }

    #[test]
    fn non_positive_price_is_rejected() {
        let mut bars = flat_series(5, dec!(2));
        bars[2].low = dec!(0);
        let err = compute_atr(&bars, 3, dec!(2.0)).unwrap_err();
        assert!(err.to_string().contains("non-positive"));
    }

    #[test]
    fn inverted_bar_is_rejected() {
        let mut bars = flat_series(5, dec!(2));
        bars[2].high = dec!(90);
        bars[2].low = dec!(95);
        assert!(compute_atr(&bars, 3, dec!(2.0)).is_err());
    }

    #[test]
    fn non_positive_multiplier_is_rejected() {
        let bars = flat_series(5, dec!(2));
        assert!(compute_atr(&bars, 3, dec!(0)).is_err());
        assert!(compute_atr(&bars, 3, dec!(-1)).is_err());
    }
}
