// =============================================================================
// Brokerage interface — the seam between the engine and the outside world
// =============================================================================
//
// The engine only ever talks to `BrokerApi`. The real client (client.rs)
// speaks HTTP; tests script a mock. Payloads cross this seam as raw JSON and
// are converted to typed entities by the strict parsing helpers below — any
// conversion failure names the offending field and nothing malformed gets
// past the edge.
// =============================================================================

pub mod client;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{TradingError, TradingResult};
use crate::models::TradeAction;

// ---------------------------------------------------------------------------
// Session material
// ---------------------------------------------------------------------------

/// Opaque brokerage session material. Persisted to disk by the auth service
/// with owner-only permissions; the engine never inspects the token beyond
/// handing it back to the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionData {
    pub access_token: String,
    pub token_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_token: Option<String>,
    pub issued_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
    /// Challenge response code; generated, never logged.
    pub mfa_code: Option<String>,
    /// Supplying a known device token skips the interactive challenge.
    pub device_token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: TradeAction,
    pub quantity: u32,
    pub limit_price: Decimal,
    /// Client-side idempotency key; doubles as the audit correlation id.
    pub client_order_id: String,
}

// ---------------------------------------------------------------------------
// The trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait BrokerApi: Send + Sync {
    async fn login(&self, request: &LoginRequest) -> TradingResult<SessionData>;
    /// Install previously persisted session material; fails if unusable.
    async fn restore(&self, session: &SessionData) -> TradingResult<()>;
    /// Re-establish an expiring session without a full credential flow.
    async fn refresh(&self, session: &SessionData) -> TradingResult<SessionData>;
    async fn logout(&self) -> TradingResult<()>;
    /// Lightweight authenticated probe used by the health monitor.
    async fn ping(&self) -> TradingResult<()>;

    async fn account_profile(&self) -> TradingResult<Value>;
    async fn positions(&self) -> TradingResult<Value>;
    async fn day_trade_count(&self) -> TradingResult<Value>;
    async fn quote(&self, symbol: &str) -> TradingResult<Value>;
    async fn historical(&self, symbol: &str, interval: &str, span: &str)
        -> TradingResult<Value>;
    async fn market_hours(&self) -> TradingResult<Value>;
    async fn place_order(&self, order: &OrderRequest) -> TradingResult<Value>;
}

// ---------------------------------------------------------------------------
// Strict edge parsing
// ---------------------------------------------------------------------------

pub fn field<'a>(value: &'a Value, name: &str) -> TradingResult<&'a Value> {
    value
        .get(name)
        .filter(|v| !v.is_null())
        .ok_or_else(|| TradingError::data_validation(format!("field '{name}' missing")))
}

pub fn str_field<'a>(value: &'a Value, name: &str) -> TradingResult<&'a str> {
    field(value, name)?
        .as_str()
        .ok_or_else(|| TradingError::data_validation(format!("field '{name}' is not a string")))
}

/// Brokers report money as decimal strings; tolerate plain numbers too, but
/// never accept anything that does not parse exactly.
pub fn decimal_field(value: &Value, name: &str) -> TradingResult<Decimal> {
    let raw = field(value, name)?;
    let parsed = if let Some(s) = raw.as_str() {
        s.trim().parse::<Decimal>().ok()
    } else if raw.is_number() {
        raw.to_string().parse::<Decimal>().ok()
    } else {
        None
    };
    parsed.ok_or_else(|| {
        TradingError::data_validation(format!("field '{name}' is not a decimal: {raw}"))
    })
}

pub fn int_field(value: &Value, name: &str) -> TradingResult<i64> {
    let raw = field(value, name)?;
    let parsed = if let Some(n) = raw.as_i64() {
        Some(n)
    } else if let Some(s) = raw.as_str() {
        // Brokers report integer quantities as "10.0000".
        s.trim()
            .parse::<Decimal>()
            .ok()
            .filter(|d| d.fract().is_zero())
            .and_then(|d| d.to_i64())
    } else {
        None
    };
    parsed.ok_or_else(|| {
        TradingError::data_validation(format!("field '{name}' is not an integer: {raw}"))
    })
}

/// Timestamps must carry an explicit offset; naive strings are rejected.
pub fn utc_field(value: &Value, name: &str) -> TradingResult<DateTime<Utc>> {
    let raw = str_field(value, name)?;
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| {
            TradingError::data_validation(format!(
                "field '{name}' is not a UTC-aware RFC-3339 timestamp: '{raw}'"
            ))
        })
}

// ---------------------------------------------------------------------------
// Scriptable mock (test builds only)
// ---------------------------------------------------------------------------


// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn decimal_field_accepts_strings_and_numbers() {
        let v = json!({"buying_power": "15000.50", "equity": 20000.25});
        assert_eq!(decimal_field(&v, "buying_power").unwrap(), dec!(15000.50));
        assert_eq!(decimal_field(&v, "equity").unwrap(), dec!(20000.25));
    }

    #[test]
    fn missing_field_is_named_in_the_error() {
        let v = json!({"cash": "1.00"});
        let err = decimal_field(&v, "buying_power").unwrap_err();
        assert!(err.to_string().contains("buying_power"));
        assert!(matches!(err, TradingError::DataValidation { .. }));
    }

    #[test]
    fn malformed_decimal_is_rejected() {
        let v = json!({"buying_power": "lots"});
        assert!(decimal_field(&v, "buying_power").is_err());
        let v = json!({"buying_power": null});
        assert!(decimal_field(&v, "buying_power").is_err());
    }

    #[test]
    fn int_field_accepts_broker_style_quantity_strings() {
        let v = json!({"quantity": "10.0000", "count": 3});
        assert_eq!(int_field(&v, "quantity").unwrap(), 10);
        assert_eq!(int_field(&v, "count").unwrap(), 3);
        let v = json!({"quantity": "10.5"});
        assert!(int_field(&v, "quantity").is_err());
    }

    #[test]
    fn utc_field_requires_an_offset() {
        let v = json!({"updated_at": "2025-01-08T14:00:00Z"});
        let dt = utc_field(&v, "updated_at").unwrap();
        assert_eq!(dt.timezone(), Utc);

        let v = json!({"updated_at": "2025-01-08 14:00:00"});
        assert!(utc_field(&v, "updated_at").is_err());
    }

    #[test]
    fn session_data_round_trips() {
        let s = SessionData {
            access_token: "tok".into(),
            token_type: "Bearer".into(),
            device_token: Some("dev".into()),
            issued_at: Utc::now(),
        };
        let json = serde_json::to_string(&s).unwrap();
        let back: SessionData = serde_json::from_str(&json).unwrap();
        assert_eq!(back, s);
    }
}
