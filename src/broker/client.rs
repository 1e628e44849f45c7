// =============================================================================
// Brokerage REST client — bearer-token sessions, typed failure classification
// =============================================================================
//
// SECURITY: credentials and tokens are never logged or serialized; the Debug
// impl redacts everything sensitive. Responses are returned as raw JSON and
// validated by the owning service; this layer only classifies transport and
// HTTP status failures into the engine's error taxonomy:
//
//   timeout / connect error  -> Retriable
//   429                      -> RateLimit (Retry-After honoured when present)
//   401 / 403                -> Auth
//   other 4xx                -> NonRetriable
//   5xx                      -> Retriable
// =============================================================================

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::error::{TradingError, TradingResult};
use super::{BrokerApi, LoginRequest, OrderRequest, SessionData};

/// Per-call timeouts. Quotes are latency-sensitive; historical pulls are not.
const QUOTE_TIMEOUT: Duration = Duration::from_secs(10);
const HISTORICAL_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// HTTP client for the retail brokerage API.
pub struct BrokerClient {
    base_url: String,
    http: reqwest::Client,
    session: RwLock<Option<SessionData>>,
}

impl BrokerClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .expect("failed to build reqwest client");
        Self {
            base_url: base_url.into(),
            http,
            session: RwLock::new(None),
        }
    }

    // -------------------------------------------------------------------------
    // Request plumbing
    // -------------------------------------------------------------------------

    fn request(&self, method: Method, path: &str, timeout: Duration) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        let mut builder = self.http.request(method, url).timeout(timeout);
        if let Some(session) = self.session.read().as_ref() {
            builder = builder.bearer_auth(&session.access_token);
        }
        builder
    }

    async fn execute(&self, builder: RequestBuilder) -> TradingResult<Value> {
        let response = builder.send().await.map_err(classify_transport)?;
        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status, &response).await);
        }
        if status == StatusCode::NO_CONTENT {
            return Ok(Value::Null);
        }
        response
            .json::<Value>()
            .await
            .map_err(|e| TradingError::data_validation(format!("response body not JSON: {e}")))
    }

    async fn get(&self, path: &str, timeout: Duration) -> TradingResult<Value> {
        self.execute(self.request(Method::GET, path, timeout)).await
    }

    async fn post(&self, path: &str, body: Value, timeout: Duration) -> TradingResult<Value> {
        self.execute(self.request(Method::POST, path, timeout).json(&body))
            .await
    }
}

fn classify_transport(err: reqwest::Error) -> TradingError {
    if err.is_timeout() || err.is_connect() {
        TradingError::retriable(format!("transport: {err}"))
    } else {
        TradingError::non_retriable(format!("transport: {err}"))
    }
}

async fn classify_status(status: StatusCode, response: &Response) -> TradingError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .map(Duration::from_secs);
            TradingError::rate_limit(format!("broker returned {status}"), retry_after)
        }
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            TradingError::auth(format!("broker returned {status}"))
        }
        s if s.is_server_error() => TradingError::retriable(format!("broker returned {s}")),
        s => TradingError::non_retriable(format!("broker returned {s}")),
    }
}

// -------------------------------------------------------------------------
// BrokerApi
// -------------------------------------------------------------------------

#[async_trait]
impl BrokerApi for BrokerClient {
    async fn login(&self, request: &LoginRequest) -> TradingResult<SessionData> {
        let mut body = json!({
            "username": request.username,
            "password": request.password,
            "grant_type": "password",
            "scope": "internal",
        });
        if let Some(code) = &request.mfa_code {
            body["mfa_code"] = json!(code);
        }
        if let Some(token) = &request.device_token {
            body["device_token"] = json!(token);
        }

        let response = self.post("/oauth2/token/", body, DEFAULT_TIMEOUT).await?;
        let access_token = super::str_field(&response, "access_token")?.to_string();
        let token_type = response
            .get("token_type")
            .and_then(|v| v.as_str())
            .unwrap_or("Bearer")
            .to_string();

        let session = SessionData {
            access_token,
            token_type,
            device_token: request.device_token.clone(),
            issued_at: Utc::now(),
        };
        *self.session.write() = Some(session.clone());
        debug!("broker session established");
        Ok(session)
    }

    async fn restore(&self, session: &SessionData) -> TradingResult<()> {
        *self.session.write() = Some(session.clone());
        // A restored token is only trusted after a successful probe.
        match self.ping().await {
            Ok(()) => Ok(()),
            Err(e) => {
                *self.session.write() = None;
                Err(e)
            }
        }
    }

    async fn refresh(&self, session: &SessionData) -> TradingResult<SessionData> {
        let body = json!({
            "grant_type": "refresh_token",
            "access_token": session.access_token,
        });
        let response = self.post("/oauth2/token/", body, DEFAULT_TIMEOUT).await?;
        let access_token = super::str_field(&response, "access_token")?.to_string();
        let refreshed = SessionData {
            access_token,
            token_type: session.token_type.clone(),
            device_token: session.device_token.clone(),
            issued_at: Utc::now(),
        };
        *self.session.write() = Some(refreshed.clone());
        Ok(refreshed)
    }

    async fn logout(&self) -> TradingResult<()> {
        let result = self
            .post("/oauth2/revoke_token/", json!({}), DEFAULT_TIMEOUT)
            .await;
        *self.session.write() = None;
        match result {
            Ok(_) => Ok(()),
            Err(e) => {
                warn!(error = %e, "broker logout returned an error");
                Err(e)
            }
        }
    }

    async fn ping(&self) -> TradingResult<()> {
        self.get("/user/", DEFAULT_TIMEOUT).await.map(|_| ())
    }

    async fn account_profile(&self) -> TradingResult<Value> {
        self.get("/accounts/active/", DEFAULT_TIMEOUT).await
    }

    async fn positions(&self) -> TradingResult<Value> {
        self.get("/positions/?nonzero=true", DEFAULT_TIMEOUT).await
    }

    async fn day_trade_count(&self) -> TradingResult<Value> {
        self.get("/accounts/day_trades/", DEFAULT_TIMEOUT).await
    }

    async fn quote(&self, symbol: &str) -> TradingResult<Value> {
        self.get(&format!("/quotes/{symbol}/"), QUOTE_TIMEOUT).await
    }

    async fn historical(
        &self,
        symbol: &str,
        interval: &str,
        span: &str,
    ) -> TradingResult<Value> {
        self.get(
            &format!("/historicals/{symbol}/?interval={interval}&span={span}"),
            HISTORICAL_TIMEOUT,
        )
        .await
    }

    async fn market_hours(&self) -> TradingResult<Value> {
        self.get("/markets/XNYS/hours/", DEFAULT_TIMEOUT).await
    }

    async fn place_order(&self, order: &OrderRequest) -> TradingResult<Value> {
        let body = json!({
            "symbol": order.symbol,
            "side": order.side.as_str(),
            "quantity": order.quantity,
            "price": order.limit_price,
            "type": "limit",
            "time_in_force": "gfd",
            "ref_id": order.client_order_id,
        });
        self.post("/orders/", body, DEFAULT_TIMEOUT).await
    }
}

impl std::fmt::Debug for BrokerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerClient")
            .field("base_url", &self.base_url)
            .field("session", &"<redacted>")
            .finish()
    }
}
