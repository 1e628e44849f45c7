// =============================================================================
// Window summaries — additive composition of daily aggregates
// =============================================================================
//
// Count-and-sum fields fold directly; rate metrics (win rate, average R:R)
// are recomputed from the composed sums, and drawdown is rebuilt from the
// concatenated per-trade P/L stream in date order. Composition is therefore
// associative and order-independent for the additive fields.
// =============================================================================

use chrono::{Datelike, NaiveDate, Weekday};
use rust_decimal::Decimal;
use tracing::warn;

use crate::error::TradingResult;

use super::{DailyAggregate, PerformanceStore, PerformanceSummary, SummaryWindow};

/// Compose the aggregates inside `[start, end]` into one summary.
/// `partial_data` marks windows where a day's aggregate was unavailable.
pub fn summarize(
    window: SummaryWindow,
    start: NaiveDate,
    end: NaiveDate,
    aggregates: &[DailyAggregate],
    partial_data: bool,
) -> PerformanceSummary {
    let mut ordered: Vec<&DailyAggregate> = aggregates
        .iter()
        .filter(|a| a.date >= start && a.date <= end)
        .collect();
    ordered.sort_by_key(|a| a.date);

    let mut trade_count = 0u64;
    let mut wins = 0u64;
    let mut gross_pl = Decimal::ZERO;
    let mut net_pl = Decimal::ZERO;
    let mut rr_sum = Decimal::ZERO;
    let mut rr_count = 0u64;
    let mut pnls: Vec<Decimal> = Vec::new();

    for agg in &ordered {
        trade_count += agg.trade_count;
        wins += agg.wins;
        gross_pl += agg.gross_pl;
        net_pl += agg.net_pl;
        rr_sum += agg.rr_sum;
        rr_count += agg.rr_count;
        pnls.extend(agg.trade_pnls.iter().copied());
    }

    let win_rate = if trade_count > 0 {
        Decimal::from(wins) / Decimal::from(trade_count)
    } else {
        Decimal::ZERO
    };
    let average_rr = if rr_count > 0 {
        (rr_sum / Decimal::from(rr_count)).round_dp(2)
    } else {
        Decimal::ZERO
    };

    let (max_win_streak, max_loss_streak) = streaks(&pnls);

    PerformanceSummary {
        window,
        start_date: start,
        end_date: end,
        trade_count,
        win_rate,
        average_rr,
        gross_pl,
        net_pl,
        max_drawdown: max_drawdown(&pnls),
        max_win_streak,
        max_loss_streak,
        partial_data,
    }
}

/// Largest peak-to-trough drop of the running equity curve (positive
/// magnitude; zero for an empty or monotonically rising stream).
fn max_drawdown(pnls: &[Decimal]) -> Decimal {
    let mut equity = Decimal::ZERO;
    let mut peak = Decimal::ZERO;
    let mut worst = Decimal::ZERO;
    for pnl in pnls {
        equity += *pnl;
        if equity > peak {
            peak = equity;
        }
        let drop = peak - equity;
        if drop > worst {
            worst = drop;
        }
    }
    worst
}

fn streaks(pnls: &[Decimal]) -> (u32, u32) {
    let mut best_win = 0u32;
    let mut best_loss = 0u32;
    let mut run_win = 0u32;
    let mut run_loss = 0u32;
    for pnl in pnls {
        if *pnl >= Decimal::ZERO {
            run_win += 1;
            run_loss = 0;
        } else {
            run_loss += 1;
            run_win = 0;
        }
        best_win = best_win.max(run_win);
        best_loss = best_loss.max(run_loss);
    }
    (best_win, best_loss)
}

// ---------------------------------------------------------------------------
// Window partitioning
// ---------------------------------------------------------------------------

/// Split `[start, end]` into window-sized sub-ranges: one per day, one per
/// ISO week (Monday-anchored), or one per calendar month, clamped to the
/// requested bounds.
pub fn partition(
    window: SummaryWindow,
    start: NaiveDate,
    end: NaiveDate,
) -> Vec<(NaiveDate, NaiveDate)> {
    let mut out = Vec::new();
    if start > end {
        return out;
    }
    match window {
        SummaryWindow::Daily => {
            let mut day = start;
            while day <= end {
                out.push((day, day));
                let Some(next) = day.succ_opt() else { break };
                day = next;
            }
        }
        SummaryWindow::Weekly => {
            let mut cursor = start;
            while cursor <= end {
                let monday =
                    cursor - chrono::Duration::days(cursor.weekday().num_days_from_monday() as i64);
                let sunday = monday + chrono::Duration::days(6);
                out.push((cursor.max(start), sunday.min(end)));
                cursor = sunday + chrono::Duration::days(1);
            }
        }
        SummaryWindow::Monthly => {
            let mut cursor = start;
            while cursor <= end {
                let month_end = last_day_of_month(cursor);
                out.push((cursor.max(start), month_end.min(end)));
                let Some(next) = month_end.succ_opt() else { break };
                cursor = next;
            }
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Store-backed composition
// ---------------------------------------------------------------------------

/// Build the summary for `[start, end]` from the store, rebuilding daily
/// aggregates as needed. A weekday for which no aggregate can be produced
/// (missing source log, corrupt snapshot) marks the summary as partial and
/// is warn-logged; the composition continues.
pub fn compose(
    store: &PerformanceStore,
    window: SummaryWindow,
    start: NaiveDate,
    end: NaiveDate,
) -> TradingResult<PerformanceSummary> {
    let mut aggregates = Vec::new();
    let mut partial = false;

    let mut date = start;
    while date <= end {
        let weekday = !matches!(date.weekday(), Weekday::Sat | Weekday::Sun);
        if weekday {
            match store.ensure_daily(date) {
                Ok(Some(aggregate)) => aggregates.push(aggregate),
                Ok(None) => {
                    warn!(date = %date, "no trade data for trading day — summary is partial");
                    partial = true;
                }
                Err(e) => {
                    warn!(date = %date, error = %e, "day unusable — summary is partial");
                    partial = true;
                }
            }
        }
        let Some(next) = date.succ_opt() else { break };
        date = next;
    }

    Ok(summarize(window, start, end, &aggregates, partial))
}

fn last_day_of_month(date: NaiveDate) -> NaiveDate {
    let (year, month) = (date.year(), date.month());
    let first_of_next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    };
    first_of_next
        .and_then(|d| d.pred_opt())
        .unwrap_or(date)
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, d).unwrap()
    }

    fn agg(date: NaiveDate, pnls: &[Decimal]) -> DailyAggregate {
        let mut a = DailyAggregate::empty(date);
        for pnl in pnls {
            a.trade_count += 1;
            a.net_pl += *pnl;
            a.gross_pl += *pnl;
            if *pnl >= Decimal::ZERO {
                a.wins += 1;
                a.win_amount_sum += *pnl;
            } else {
                a.losses += 1;
                a.loss_amount_sum += *pnl;
            }
            a.trade_pnls.push(*pnl);
        }
        a
    }

    #[test]
    fn weekly_counts_and_sums_are_the_daily_totals() {
        let aggregates = vec![
            agg(day(6), &[dec!(10), dec!(-5)]),
            agg(day(8), &[dec!(47.50), dec!(-20.00)]),
            agg(day(10), &[dec!(3)]),
        ];
        let summary = summarize(SummaryWindow::Weekly, day(6), day(12), &aggregates, false);
        assert_eq!(summary.trade_count, 5);
        assert_eq!(summary.net_pl, dec!(35.50));
        assert_eq!(summary.win_rate, dec!(0.6));
        assert!(!summary.partial_data);
    }

    #[test]
    fn reference_daily_summary() {
        let aggregates = vec![agg(day(8), &[dec!(47.50), dec!(-20.00)])];
        let summary = summarize(SummaryWindow::Daily, day(8), day(8), &aggregates, false);
        assert_eq!(summary.trade_count, 2);
        assert_eq!(summary.net_pl, dec!(27.50));
        assert_eq!(summary.win_rate, dec!(0.5));
    }

    #[test]
    fn composition_is_order_independent() {
        let a = agg(day(6), &[dec!(10), dec!(-5)]);
        let b = agg(day(7), &[dec!(20)]);
        let c = agg(day(8), &[dec!(-8)]);

        let forward = summarize(
            SummaryWindow::Weekly,
            day(6),
            day(12),
            &[a.clone(), b.clone(), c.clone()],
            false,
        );
        let shuffled = summarize(SummaryWindow::Weekly, day(6), day(12), &[c, a, b], false);
        assert_eq!(forward.trade_count, shuffled.trade_count);
        assert_eq!(forward.net_pl, shuffled.net_pl);
        assert_eq!(forward.win_rate, shuffled.win_rate);
        assert_eq!(forward.max_drawdown, shuffled.max_drawdown);
    }

    #[test]
    fn drawdown_tracks_the_worst_peak_to_trough_drop() {
        // Equity: 10, 30, 10, -10, 20 -> peak 30, trough -10, drawdown 40.
        let aggregates = vec![agg(
            day(8),
            &[dec!(10), dec!(20), dec!(-20), dec!(-20), dec!(30)],
        )];
        let summary = summarize(SummaryWindow::Daily, day(8), day(8), &aggregates, false);
        assert_eq!(summary.max_drawdown, dec!(40));
    }

    #[test]
    fn drawdown_is_zero_for_a_rising_curve() {
        let aggregates = vec![agg(day(8), &[dec!(5), dec!(5), dec!(5)])];
        let summary = summarize(SummaryWindow::Daily, day(8), day(8), &aggregates, false);
        assert_eq!(summary.max_drawdown, Decimal::ZERO);
        assert_eq!(summary.max_win_streak, 3);
        assert_eq!(summary.max_loss_streak, 0);
    }

    #[test]
    fn empty_window_is_all_zeroes() {
        let summary = summarize(SummaryWindow::Weekly, day(6), day(12), &[], false);
        assert_eq!(summary.trade_count, 0);
        assert_eq!(summary.win_rate, Decimal::ZERO);
        assert_eq!(summary.average_rr, Decimal::ZERO);
        assert_eq!(summary.max_drawdown, Decimal::ZERO);
    }

    #[test]
    fn aggregates_outside_the_bounds_are_ignored() {
        let aggregates = vec![
            agg(day(5), &[dec!(100)]),
            agg(day(8), &[dec!(1)]),
            agg(day(13), &[dec!(100)]),
        ];
        let summary = summarize(SummaryWindow::Weekly, day(6), day(12), &aggregates, false);
        assert_eq!(summary.trade_count, 1);
        assert_eq!(summary.net_pl, dec!(1));
    }

    #[test]
    fn daily_partition_is_one_range_per_day() {
        let parts = partition(SummaryWindow::Daily, day(6), day(8));
        assert_eq!(parts, vec![(day(6), day(6)), (day(7), day(7)), (day(8), day(8))]);
    }

    #[test]
    fn weekly_partition_is_monday_anchored_and_clamped() {
        // 2025-01-08 is a Wednesday; 2025-01-20 a Monday.
        let parts = partition(SummaryWindow::Weekly, day(8), day(20));
        assert_eq!(
            parts,
            vec![
                (day(8), day(12)),
                (day(13), day(19)),
                (day(20), day(20)),
            ]
        );
    }

    fn write_close(dir: &std::path::Path, date: NaiveDate, net_pl: Decimal) {
        use crate::models::{TradeAction, TradeRecord};
        use chrono::TimeZone;
        use std::io::Write;

        let record = TradeRecord {
            correlation_id: uuid::Uuid::new_v4().to_string(),
            decided_at: chrono::Utc
                .with_ymd_and_hms(date.year(), date.month(), date.day(), 14, 0, 0)
                .unwrap(),
            symbol: "AAPL".into(),
            action: TradeAction::Sell,
            shares: 10,
            intended_price: dec!(155.00),
            filled_price: dec!(155.00),
            fees: dec!(0.00),
            net_pl: Some(net_pl),
            risk_reward_ratio: None,
            paper: true,
            reason_tag: "exit".into(),
            order_id: None,
            stop_strategy: None,
        };
        let path = dir.join(format!("{date}.jsonl"));
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .unwrap();
        writeln!(file, "{}", serde_json::to_string(&record).unwrap()).unwrap();
    }

    #[test]
    fn compose_over_a_complete_week_is_not_partial() {
        let tmp = tempfile::tempdir().unwrap();
        for d in 6..=10 {
            write_close(tmp.path(), day(d), dec!(10));
        }
        let store = PerformanceStore::new(tmp.path());
        let summary = compose(&store, SummaryWindow::Weekly, day(6), day(12)).unwrap();
        assert_eq!(summary.trade_count, 5);
        assert_eq!(summary.net_pl, dec!(50));
        assert!(!summary.partial_data);
    }

    #[test]
    fn compose_flags_a_missing_trading_day_as_partial() {
        let tmp = tempfile::tempdir().unwrap();
        // Friday 2025-01-10 has no trade log.
        for d in [6, 7, 8, 9] {
            write_close(tmp.path(), day(d), dec!(10));
        }
        let store = PerformanceStore::new(tmp.path());
        let summary = compose(&store, SummaryWindow::Weekly, day(6), day(12)).unwrap();
        assert_eq!(summary.trade_count, 4);
        assert!(summary.partial_data);
    }

    #[test]
    fn monthly_partition_respects_calendar_months() {
        let start = NaiveDate::from_ymd_opt(2025, 1, 15).unwrap();
        let end = NaiveDate::from_ymd_opt(2025, 3, 10).unwrap();
        let parts = partition(SummaryWindow::Monthly, start, end);
        assert_eq!(
            parts,
            vec![
                (start, NaiveDate::from_ymd_opt(2025, 1, 31).unwrap()),
                (
                    NaiveDate::from_ymd_opt(2025, 2, 1).unwrap(),
                    NaiveDate::from_ymd_opt(2025, 2, 28).unwrap()
                ),
                (NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(), end),
            ]
        );
    }
}
