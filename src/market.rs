// =============================================================================
// Market-data service — validated quotes, historical bars, market hours
// =============================================================================
//
// Nothing leaves this module unvalidated. A quote must have a strictly
// positive price and a UTC-aware timestamp younger than the staleness bound
// (the bound itself is rejected). A daily history must be strictly
// chronological with no missing weekdays inside the span; the error cites
// the number of missing days. Bad data is surfaced, never patched.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Datelike, NaiveDate, Utc, Weekday};
use rust_decimal::Decimal;
use serde_json::Value;
use tracing::debug;

use crate::broker::{self, BrokerApi};
use crate::error::{TradingError, TradingResult};
use crate::models::{MarketStatus, PriceBar, Quote};
use crate::resilience::{with_retry, RetryPolicy};

pub struct MarketDataService {
    broker: Arc<dyn BrokerApi>,
    retry: RetryPolicy,
    /// Quotes at or beyond this age are stale and rejected.
    staleness_secs: u64,
}

impl MarketDataService {
    pub fn new(broker: Arc<dyn BrokerApi>, retry: RetryPolicy, staleness_secs: u64) -> Self {
        Self {
            broker,
            retry,
            staleness_secs,
        }
    }

    // -------------------------------------------------------------------------
    // Quotes
    // -------------------------------------------------------------------------

    pub async fn get_quote(&self, symbol: &str) -> TradingResult<Quote> {
        let symbol = normalize_symbol(symbol)?;
        let raw = with_retry(|| self.broker.quote(&symbol), &self.retry).await?;
        parse_quote(&raw, &symbol, self.staleness_secs)
    }

    /// Per-symbol composition. By default one failed symbol does not taint
    /// the others; `all_or_nothing` fails the whole batch on the first error.
    pub async fn get_quotes_batch(
        &self,
        symbols: &[String],
        all_or_nothing: bool,
    ) -> TradingResult<HashMap<String, TradingResult<Quote>>> {
        let mut out = HashMap::with_capacity(symbols.len());
        for symbol in symbols {
            match self.get_quote(symbol).await {
                Err(e) if all_or_nothing => return Err(e),
                result => {
                    out.insert(symbol.clone(), result);
                }
            }
        }
        Ok(out)
    }

    // -------------------------------------------------------------------------
    // Historical bars
    // -------------------------------------------------------------------------

    pub async fn get_historical_data(
        &self,
        symbol: &str,
        interval: &str,
        span: &str,
    ) -> TradingResult<Vec<PriceBar>> {
        let symbol = normalize_symbol(symbol)?;
        let raw = with_retry(
            || self.broker.historical(&symbol, interval, span),
            &self.retry,
        )
        .await?;
        let bars = parse_historicals(&raw)?;
        validate_series(&bars, interval == "day")?;
        debug!(symbol = %symbol, interval, span, count = bars.len(), "historical bars fetched");
        Ok(bars)
    }

    // -------------------------------------------------------------------------
    // Market hours
    // -------------------------------------------------------------------------

    pub async fn is_market_open(&self) -> TradingResult<MarketStatus> {
        let raw = with_retry(|| self.broker.market_hours(), &self.retry).await?;
        let is_open = broker::field(&raw, "is_open")?
            .as_bool()
            .ok_or_else(|| TradingError::data_validation("field 'is_open' is not a bool"))?;
        Ok(MarketStatus {
            is_open,
            next_open: broker::utc_field(&raw, "next_open")?,
            next_close: broker::utc_field(&raw, "next_close")?,
        })
    }
}

impl std::fmt::Debug for MarketDataService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarketDataService")
            .field("staleness_secs", &self.staleness_secs)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn normalize_symbol(symbol: &str) -> TradingResult<String> {
    let symbol = symbol.trim().to_uppercase();
    if symbol.is_empty() || !symbol.chars().all(|c| c.is_ascii_alphanumeric() || c == '.') {
        return Err(TradingError::invalid_input(format!(
            "'{symbol}' is not a valid symbol"
        )));
    }
    Ok(symbol)
}

fn validate_price(value: Decimal, what: &str) -> TradingResult<Decimal> {
    if value <= Decimal::ZERO {
        return Err(TradingError::data_validation(format!(
            "{what} must be positive, got {value}"
        )));
    }
    Ok(value)
}

fn parse_quote(raw: &Value, symbol: &str, staleness_secs: u64) -> TradingResult<Quote> {
    let price = validate_price(
        broker::decimal_field(raw, "last_trade_price")?,
        "quote price",
    )?;
    let timestamp_utc = broker::utc_field(raw, "updated_at")?;

    let age = (Utc::now() - timestamp_utc).num_seconds();
    if age >= staleness_secs as i64 {
        return Err(TradingError::data_validation(format!(
            "quote for {symbol} is {age}s old (staleness bound {staleness_secs}s)"
        )));
    }

    Ok(Quote {
        symbol: symbol.to_string(),
        current_price: price,
        timestamp_utc,
        market_state: broker::str_field(raw, "market_state")?.to_string(),
    })
}

fn parse_historicals(raw: &Value) -> TradingResult<Vec<PriceBar>> {
    let rows = broker::field(raw, "historicals")?
        .as_array()
        .ok_or_else(|| TradingError::data_validation("field 'historicals' is not an array"))?;

    let mut bars = Vec::with_capacity(rows.len());
    for row in rows {
        let bar = PriceBar {
            timestamp_utc: broker::utc_field(row, "begins_at")?,
            open: validate_price(broker::decimal_field(row, "open_price")?, "open")?,
            high: validate_price(broker::decimal_field(row, "high_price")?, "high")?,
            low: validate_price(broker::decimal_field(row, "low_price")?, "low")?,
            close: validate_price(broker::decimal_field(row, "close_price")?, "close")?,
            volume: broker::int_field(row, "volume")?.max(0) as u64,
        };
        bars.push(bar);
    }
    Ok(bars)
}

/// Strictly increasing timestamps; for daily series, no missing weekdays
/// between consecutive bars.
fn validate_series(bars: &[PriceBar], daily: bool) -> TradingResult<()> {
    let mut gap_count = 0u32;
    for pair in bars.windows(2) {
        if pair[1].timestamp_utc <= pair[0].timestamp_utc {
            return Err(TradingError::data_validation(format!(
                "bars out of order at {}",
                pair[1].timestamp_utc
            )));
        }
        if daily {
            gap_count += missing_weekdays_between(
                pair[0].timestamp_utc.date_naive(),
                pair[1].timestamp_utc.date_naive(),
            );
        }
    }
    if gap_count > 0 {
        return Err(TradingError::data_validation(format!(
            "historical series has {gap_count} missing trading day(s)"
        )));
    }
    Ok(())
}

/// Weekdays strictly between `a` and `b` (exclusive on both ends).
fn missing_weekdays_between(a: NaiveDate, b: NaiveDate) -> u32 {
    let mut count = 0;
    let mut day = a.succ_opt();
    while let Some(d) = day {
        if d >= b {
            break;
        }
        if !matches!(d.weekday(), Weekday::Sat | Weekday::Sun) {
            count += 1;
        }
        day = d.succ_opt();
    }
    count
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::mock::MockBroker;
    use chrono::{DateTime, Duration as ChronoDuration, TimeZone};
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn service(broker: Arc<MockBroker>) -> MarketDataService {
        MarketDataService::new(broker, RetryPolicy::default(), 300)
    }

    fn quote_payload(price: &str, age_secs: i64) -> Value {
        let ts = Utc::now() - ChronoDuration::seconds(age_secs);
        json!({
            "last_trade_price": price,
            "updated_at": ts.to_rfc3339(),
            "market_state": "open",
        })
    }

    fn bar_row(date: &str, close: &str) -> Value {
        json!({
            "begins_at": format!("{date}T21:00:00Z"),
            "open_price": close,
            "high_price": close,
            "low_price": close,
            "close_price": close,
            "volume": 1000,
        })
    }

    #[tokio::test]
    async fn fresh_quote_is_returned() {
        let broker = Arc::new(MockBroker::new());
        broker.script_ok("quote", quote_payload("155.00", 5));
        let svc = service(broker);

        let quote = svc.get_quote("aapl").await.unwrap();
        assert_eq!(quote.symbol, "AAPL");
        assert_eq!(quote.current_price, dec!(155.00));
        assert_eq!(quote.market_state, "open");
    }

    #[tokio::test(start_paused = true)]
    async fn quote_recovers_from_rate_limiting() {
        let broker = Arc::new(MockBroker::new());
        broker.script_err("quote", TradingError::rate_limit("429", None));
        broker.script_err("quote", TradingError::rate_limit("429", None));
        broker.script_ok("quote", quote_payload("155.00", 5));

        let svc = MarketDataService::new(
            broker.clone(),
            RetryPolicy::for_rate_limits(3, 1.0),
            300,
        );
        let started = tokio::time::Instant::now();
        let quote = svc.get_quote("AAPL").await.unwrap();
        assert_eq!(quote.current_price, dec!(155.00));
        assert_eq!(broker.call_count("quote"), 3);
        // Two backoff sleeps of ~1s and ~2s under the configured base.
        let elapsed = started.elapsed();
        assert!(elapsed >= std::time::Duration::from_millis(2900));
    }

    #[tokio::test]
    async fn quote_at_exactly_the_staleness_bound_is_rejected() {
        let broker = Arc::new(MockBroker::new());
        broker.script_ok("quote", quote_payload("155.00", 300));
        let svc = service(broker);

        let err = svc.get_quote("AAPL").await.unwrap_err();
        assert!(matches!(err, TradingError::DataValidation { .. }));
        assert!(err.to_string().contains("staleness"));
    }

    #[tokio::test]
    async fn quote_just_inside_the_bound_is_accepted() {
        let broker = Arc::new(MockBroker::new());
        broker.script_ok("quote", quote_payload("155.00", 298));
        let svc = service(broker);
        assert!(svc.get_quote("AAPL").await.is_ok());
    }

    #[tokio::test]
    async fn non_positive_price_is_rejected() {
        let broker = Arc::new(MockBroker::new());
        broker.script_ok("quote", quote_payload("0.00", 5));
        let svc = service(broker);
        let err = svc.get_quote("AAPL").await.unwrap_err();
        assert!(err.to_string().contains("positive"));
    }

    #[tokio::test]
    async fn naive_timestamp_is_rejected() {
        let broker = Arc::new(MockBroker::new());
        broker.script_ok(
            "quote",
            json!({
                "last_trade_price": "155.00",
                "updated_at": "2025-01-08 14:00:00",
                "market_state": "open",
            }),
        );
        let svc = service(broker);
        assert!(svc.get_quote("AAPL").await.is_err());
    }

    #[tokio::test]
    async fn bad_symbol_is_invalid_input() {
        let broker = Arc::new(MockBroker::new());
        let svc = service(broker);
        let err = svc.get_quote("  ").await.unwrap_err();
        assert!(matches!(err, TradingError::InvalidInput { .. }));
    }

    #[tokio::test]
    async fn batch_failures_do_not_taint_other_symbols() {
        let broker = Arc::new(MockBroker::new());
        broker.script_ok("quote", quote_payload("155.00", 5));
        broker.script_ok("quote", quote_payload("0.00", 5));
        let svc = service(broker);

        let out = svc
            .get_quotes_batch(&["AAPL".to_string(), "MSFT".to_string()], false)
            .await
            .unwrap();
        assert!(out["AAPL"].is_ok());
        assert!(out["MSFT"].is_err());
    }

    #[tokio::test]
    async fn batch_all_or_nothing_fails_fast() {
        let broker = Arc::new(MockBroker::new());
        broker.script_ok("quote", quote_payload("0.00", 5));
        let svc = service(broker);

        let result = svc
            .get_quotes_batch(&["AAPL".to_string(), "MSFT".to_string()], true)
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn contiguous_daily_series_is_accepted() {
        let broker = Arc::new(MockBroker::new());
        // Mon 2025-01-06 .. Fri 2025-01-10, then Mon 2025-01-13: no gaps.
        broker.script_ok(
            "historical",
            json!({"historicals": [
                bar_row("2025-01-06", "100.00"),
                bar_row("2025-01-07", "101.00"),
                bar_row("2025-01-08", "102.00"),
                bar_row("2025-01-09", "103.00"),
                bar_row("2025-01-10", "104.00"),
                bar_row("2025-01-13", "105.00"),
            ]}),
        );
        let svc = service(broker);
        let bars = svc.get_historical_data("AAPL", "day", "month").await.unwrap();
        assert_eq!(bars.len(), 6);
        assert_eq!(bars[0].close, dec!(100.00));
    }

    #[tokio::test]
    async fn weekday_gap_is_rejected_with_count() {
        let broker = Arc::new(MockBroker::new());
        // Tuesday 2025-01-07 and Wednesday 2025-01-08 are missing.
        broker.script_ok(
            "historical",
            json!({"historicals": [
                bar_row("2025-01-06", "100.00"),
                bar_row("2025-01-09", "103.00"),
            ]}),
        );
        let svc = service(broker);
        let err = svc
            .get_historical_data("AAPL", "day", "month")
            .await
            .unwrap_err();
        assert!(matches!(err, TradingError::DataValidation { .. }));
        assert!(err.to_string().contains("2 missing"), "{err}");
    }

    #[tokio::test]
    async fn out_of_order_bars_are_rejected() {
        let broker = Arc::new(MockBroker::new());
        broker.script_ok(
            "historical",
            json!({"historicals": [
                bar_row("2025-01-07", "100.00"),
                bar_row("2025-01-06", "101.00"),
            ]}),
        );
        let svc = service(broker);
        let err = svc
            .get_historical_data("AAPL", "day", "month")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("out of order"));
    }

    #[tokio::test]
    async fn missing_column_is_named() {
        let broker = Arc::new(MockBroker::new());
        broker.script_ok(
            "historical",
            json!({"historicals": [
                {"begins_at": "2025-01-06T21:00:00Z", "open_price": "1.00",
                 "high_price": "1.00", "low_price": "1.00", "volume": 10},
            ]}),
        );
        let svc = service(broker);
        let err = svc
            .get_historical_data("AAPL", "day", "week")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("close_price"));
    }

    #[tokio::test]
    async fn market_hours_parse_to_utc_instants() {
        let broker = Arc::new(MockBroker::new());
        broker.script_ok(
            "market_hours",
            json!({
                "is_open": true,
                "next_open": "2025-01-09T14:30:00Z",
                "next_close": "2025-01-08T21:00:00Z",
            }),
        );
        let svc = service(broker);
        let status = svc.is_market_open().await.unwrap();
        assert!(status.is_open);
        let expected: DateTime<Utc> = Utc.with_ymd_and_hms(2025, 1, 8, 21, 0, 0).unwrap();
        assert_eq!(status.next_close, expected);
    }
}
