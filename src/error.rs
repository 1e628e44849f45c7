// =============================================================================
// Error taxonomy — retriable / rate-limit / non-retriable classification
// =============================================================================
//
// Every fallible operation in the engine returns `TradingError`. The retry
// layer only ever retries the `Retriable` and `RateLimit` classes; everything
// else surfaces to the caller immediately with its message intact.
//
// Rate-limit responses are retried with a longer backoff and never count
// toward the circuit breaker.
// =============================================================================

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TradingError {
    /// Transient failure (network error, 5xx, timeout). Retried.
    #[error("retriable: {message}")]
    Retriable { message: String },

    /// 429 or equivalent. Retried with a longer backoff; never trips the
    /// circuit breaker.
    #[error("rate limited: {message}")]
    RateLimit {
        message: String,
        retry_after: Option<Duration>,
    },

    /// Permanent failure (4xx other than 429, contract violations).
    #[error("non-retriable: {message}")]
    NonRetriable { message: String },

    /// Market or account data failed validation. The offending field or
    /// bound is named in the message; bad data is never substituted.
    #[error("data validation failed: {message}")]
    DataValidation { message: String },

    /// A trade was attempted outside the configured trading window.
    #[error("outside trading window: {message}")]
    TradingHours { message: String },

    /// Malformed caller input (shares <= 0, bad symbol, missing config).
    #[error("invalid input: {message}")]
    InvalidInput { message: String },

    /// Credential, challenge, or session failure. Terminates the login flow.
    #[error("authentication failed: {message}")]
    Auth { message: String },

    /// The named circuit breaker is open; the operation was not attempted.
    #[error("circuit breaker '{domain}' is open")]
    CircuitOpen { domain: String },
}

impl TradingError {
    pub fn retriable(message: impl Into<String>) -> Self {
        Self::Retriable {
            message: message.into(),
        }
    }

    pub fn rate_limit(message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self::RateLimit {
            message: message.into(),
            retry_after,
        }
    }

    pub fn non_retriable(message: impl Into<String>) -> Self {
        Self::NonRetriable {
            message: message.into(),
        }
    }

    pub fn data_validation(message: impl Into<String>) -> Self {
        Self::DataValidation {
            message: message.into(),
        }
    }

    pub fn trading_hours(message: impl Into<String>) -> Self {
        Self::TradingHours {
            message: message.into(),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth {
            message: message.into(),
        }
    }

    /// Whether `with_retry` may attempt this operation again.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Retriable { .. } | Self::RateLimit { .. })
    }

    pub fn is_rate_limit(&self) -> bool {
        matches!(self, Self::RateLimit { .. })
    }

    /// Whether this failure counts toward tripping a circuit breaker.
    /// Rate limits are load shedding, not degradation.
    pub fn counts_toward_breaker(&self) -> bool {
        !self.is_rate_limit()
    }

    /// Whether this is an authentication-class failure (401/403 family),
    /// which the health monitor answers with a re-login.
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth { .. })
    }
}

pub type TradingResult<T> = Result<T, TradingError>;

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retriable_classes() {
        assert!(TradingError::retriable("timeout").is_retriable());
        assert!(TradingError::rate_limit("429", None).is_retriable());
        assert!(!TradingError::non_retriable("400").is_retriable());
        assert!(!TradingError::data_validation("bad price").is_retriable());
        assert!(!TradingError::trading_hours("10:05").is_retriable());
        assert!(!TradingError::auth("bad password").is_retriable());
    }

    #[test]
    fn rate_limit_never_counts_toward_breaker() {
        assert!(!TradingError::rate_limit("429", None).counts_toward_breaker());
        assert!(TradingError::retriable("503").counts_toward_breaker());
        assert!(TradingError::non_retriable("404").counts_toward_breaker());
    }

    #[test]
    fn auth_detection() {
        assert!(TradingError::auth("expired").is_auth());
        assert!(!TradingError::retriable("x").is_auth());
    }

    #[test]
    fn messages_are_preserved() {
        let err = TradingError::data_validation("field 'buying_power' missing");
        assert!(err.to_string().contains("buying_power"));
    }
}
