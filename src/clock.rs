// =============================================================================
// Clock — UTC-aware time, trading-window enforcement, timezone conversion
// =============================================================================
//
// Everything is stored UTC-aware. Conversion to the configured market
// timezone happens only here, for the trading-window predicate and for
// human-readable display. The window is inclusive at the start hour and
// exclusive at the end hour: [start, end).
// =============================================================================

use chrono::{DateTime, Datelike, NaiveDate, Timelike, Utc, Weekday};
use chrono_tz::Tz;

use crate::error::{TradingError, TradingResult};

/// The sub-window of exchange hours during which new positions may be opened.
#[derive(Debug, Clone)]
pub struct TradingWindow {
    pub timezone: Tz,
    /// Inclusive start hour in market time.
    pub start_hour: u32,
    /// Exclusive end hour in market time.
    pub end_hour: u32,
}

impl Default for TradingWindow {
    fn default() -> Self {
        Self {
            timezone: chrono_tz::America::New_York,
            start_hour: 7,
            end_hour: 10,
        }
    }
}

pub fn now_utc() -> DateTime<Utc> {
    Utc::now()
}

/// The UTC calendar date of `now`, used for trade-log naming and daily resets.
pub fn utc_date(now: DateTime<Utc>) -> NaiveDate {
    now.date_naive()
}

/// Convert a UTC instant into the configured market timezone.
pub fn to_market_time(now: DateTime<Utc>, tz: Tz) -> DateTime<Tz> {
    now.with_timezone(&tz)
}

/// Admit trades only on weekdays within `[start_hour, end_hour)` market time.
///
/// The end boundary is exclusive: exactly `end_hour:00:00` is rejected.
/// `now` defaults to the current instant when `None`.
pub fn validate_trade_time(
    now: Option<DateTime<Utc>>,
    window: &TradingWindow,
) -> TradingResult<()> {
    let now = now.unwrap_or_else(now_utc);
    let local = to_market_time(now, window.timezone);

    if matches!(local.weekday(), Weekday::Sat | Weekday::Sun) {
        return Err(TradingError::trading_hours(format!(
            "{} is a weekend ({})",
            local.format("%Y-%m-%d"),
            local.weekday()
        )));
    }

    let hour = local.hour();
    if hour < window.start_hour || hour >= window.end_hour {
        return Err(TradingError::trading_hours(format!(
            "market time {} outside [{:02}:00, {:02}:00)",
            local.format("%H:%M:%S"),
            window.start_hour,
            window.end_hour
        )));
    }

    Ok(())
}
