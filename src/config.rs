// =============================================================================
// Configuration — environment-driven settings for the Meridian engine
// =============================================================================
//
// Every recognised key is optional except the brokerage credentials. Values
// are read once at startup; malformed values are fatal (surfaced as
// InvalidInput, never silently defaulted).
// =============================================================================

use std::path::PathBuf;
use std::str::FromStr;

use chrono_tz::Tz;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::clock::TradingWindow;
use crate::error::{TradingError, TradingResult};

#[derive(Debug, Clone)]
pub struct BotConfig {
    // --- Authentication -----------------------------------------------------
    pub username: String,
    pub password: String,
    pub mfa_secret: Option<String>,
    pub device_token: Option<String>,

    // --- Execution mode -----------------------------------------------------
    /// When true, orders are simulated locally and never reach the broker.
    pub paper_trading: bool,

    // --- Trading window -----------------------------------------------------
    pub window: TradingWindow,

    // --- Market data --------------------------------------------------------
    pub quote_staleness_secs: u64,

    // --- Resilience ---------------------------------------------------------
    pub rate_limit_retries: u32,
    pub rate_limit_backoff_base: f64,

    // --- Risk ---------------------------------------------------------------
    pub atr_enabled: bool,
    pub atr_period: usize,
    pub atr_multiplier: Decimal,
    pub daily_loss_cap_pct: Decimal,
    pub per_trade_risk_pct: Decimal,
    pub per_position_cap_pct: Decimal,
    pub min_risk_reward: Decimal,
    pub trailing_activation_pct: Decimal,
    pub trailing_distance_pct: Decimal,
    /// Default percent-stop distance when no pullback low or ATR is in play.
    pub stop_loss_pct: Decimal,
    /// Default profit target distance used to build a plan from a bare entry.
    pub profit_target_pct: Decimal,

    // --- Performance --------------------------------------------------------
    pub performance_timezone: Tz,
    pub alert_rolling_window: usize,

    // --- Paths --------------------------------------------------------------
    pub logs_dir: PathBuf,
    pub session_file: PathBuf,
}

impl BotConfig {
    /// Baseline configuration with all documented defaults applied.
    pub fn paper_defaults(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            mfa_secret: None,
            device_token: None,
            paper_trading: true,
            window: TradingWindow::default(),
            quote_staleness_secs: 300,
            rate_limit_retries: 3,
            rate_limit_backoff_base: 1.0,
            atr_enabled: false,
            atr_period: 14,
            atr_multiplier: dec!(2.0),
            daily_loss_cap_pct: dec!(0.02),
            per_trade_risk_pct: dec!(0.01),
            per_position_cap_pct: dec!(0.05),
            min_risk_reward: dec!(1.5),
            trailing_activation_pct: dec!(0.10),
            trailing_distance_pct: dec!(0.05),
            stop_loss_pct: dec!(0.02),
            profit_target_pct: dec!(0.03),
            performance_timezone: chrono_tz::UTC,
            alert_rolling_window: 20,
            logs_dir: PathBuf::from("logs"),
            session_file: PathBuf::from(".meridian_session.json"),
        }
    }

    /// Read the full configuration surface from the environment.
    ///
    /// `ROBINHOOD_USERNAME` and `ROBINHOOD_PASSWORD` are required; everything
    /// else falls back to the documented defaults.
    pub fn from_env() -> TradingResult<Self> {
        let username = require("ROBINHOOD_USERNAME")?;
        let password = require("ROBINHOOD_PASSWORD")?;

        let mut cfg = Self::paper_defaults(username, password);
        cfg.mfa_secret = optional("ROBINHOOD_MFA_SECRET");
        cfg.device_token = optional("ROBINHOOD_DEVICE_TOKEN");

        if let Some(raw) = optional("PAPER_TRADING") {
            cfg.paper_trading = parse_bool("PAPER_TRADING", &raw)?;
        }
        if let Some(raw) = optional("TRADING_TIMEZONE") {
            cfg.window.timezone = raw
                .parse::<Tz>()
                .map_err(|_| bad_value("TRADING_TIMEZONE", &raw))?;
        }
        if let Some(raw) = optional("TRADING_WINDOW_START_HOUR") {
            cfg.window.start_hour = parse_num("TRADING_WINDOW_START_HOUR", &raw)?;
        }
        if let Some(raw) = optional("TRADING_WINDOW_END_HOUR") {
            cfg.window.end_hour = parse_num("TRADING_WINDOW_END_HOUR", &raw)?;
        }
        if cfg.window.start_hour >= cfg.window.end_hour || cfg.window.end_hour > 24 {
            return Err(TradingError::invalid_input(format!(
                "trading window [{}, {}) is empty or out of range",
                cfg.window.start_hour, cfg.window.end_hour
            )));
        }

        if let Some(raw) = optional("QUOTE_STALENESS_SECONDS") {
            cfg.quote_staleness_secs = parse_num("QUOTE_STALENESS_SECONDS", &raw)?;
        }
        if let Some(raw) = optional("RATE_LIMIT_RETRIES") {
            cfg.rate_limit_retries = parse_num("RATE_LIMIT_RETRIES", &raw)?;
        }
        if let Some(raw) = optional("RATE_LIMIT_BACKOFF_BASE") {
            cfg.rate_limit_backoff_base = parse_num("RATE_LIMIT_BACKOFF_BASE", &raw)?;
        }

        if let Some(raw) = optional("ATR_ENABLED") {
            cfg.atr_enabled = parse_bool("ATR_ENABLED", &raw)?;
        }
        if let Some(raw) = optional("ATR_PERIOD") {
            cfg.atr_period = parse_num("ATR_PERIOD", &raw)?;
        }
        if let Some(raw) = optional("ATR_MULTIPLIER") {
            cfg.atr_multiplier = parse_decimal("ATR_MULTIPLIER", &raw)?;
        }
        if let Some(raw) = optional("DAILY_LOSS_CAP_PCT") {
            cfg.daily_loss_cap_pct = parse_decimal("DAILY_LOSS_CAP_PCT", &raw)?;
        }
        if let Some(raw) = optional("PER_TRADE_RISK_PCT") {
            cfg.per_trade_risk_pct = parse_decimal("PER_TRADE_RISK_PCT", &raw)?;
        }
        if let Some(raw) = optional("PER_POSITION_CAP_PCT") {
            cfg.per_position_cap_pct = parse_decimal("PER_POSITION_CAP_PCT", &raw)?;
        }
        if let Some(raw) = optional("MIN_RISK_REWARD") {
            cfg.min_risk_reward = parse_decimal("MIN_RISK_REWARD", &raw)?;
        }
        if let Some(raw) = optional("TRAILING_STOP_ACTIVATION_PCT") {
            cfg.trailing_activation_pct = parse_decimal("TRAILING_STOP_ACTIVATION_PCT", &raw)?;
        }
        if let Some(raw) = optional("TRAILING_STOP_DISTANCE_PCT") {
            cfg.trailing_distance_pct = parse_decimal("TRAILING_STOP_DISTANCE_PCT", &raw)?;
        }
        if let Some(raw) = optional("STOP_LOSS_PCT") {
            cfg.stop_loss_pct = parse_decimal("STOP_LOSS_PCT", &raw)?;
        }
        if let Some(raw) = optional("PROFIT_TARGET_PCT") {
            cfg.profit_target_pct = parse_decimal("PROFIT_TARGET_PCT", &raw)?;
        }

        if let Some(raw) = optional("PERFORMANCE_SUMMARY_TIMEZONE") {
            cfg.performance_timezone = raw
                .parse::<Tz>()
                .map_err(|_| bad_value("PERFORMANCE_SUMMARY_TIMEZONE", &raw))?;
        }
        if let Some(raw) = optional("PERFORMANCE_ALERT_ROLLING_WINDOW") {
            cfg.alert_rolling_window = parse_num("PERFORMANCE_ALERT_ROLLING_WINDOW", &raw)?;
        }

        if let Some(raw) = optional("MERIDIAN_LOGS_DIR") {
            cfg.logs_dir = PathBuf::from(raw);
        }
        if let Some(raw) = optional("MERIDIAN_SESSION_FILE") {
            cfg.session_file = PathBuf::from(raw);
        }

        Ok(cfg)
    }
}

// ---------------------------------------------------------------------------
// Env helpers
// ---------------------------------------------------------------------------

fn optional(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn require(key: &str) -> TradingResult<String> {
    optional(key).ok_or_else(|| TradingError::invalid_input(format!("{key} is required")))
}

fn bad_value(key: &str, raw: &str) -> TradingError {
    TradingError::invalid_input(format!("{key} has invalid value '{raw}'"))
}

fn parse_bool(key: &str, raw: &str) -> TradingResult<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(bad_value(key, raw)),
    }
}

fn parse_num<T: FromStr>(key: &str, raw: &str) -> TradingResult<T> {
    raw.trim().parse::<T>().map_err(|_| bad_value(key, raw))
}

fn parse_decimal(key: &str, raw: &str) -> TradingResult<Decimal> {
    Decimal::from_str(raw.trim()).map_err(|_| bad_value(key, raw))
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documentation() {
        let cfg = BotConfig::paper_defaults("trader@example.com", "hunter2");
        assert!(cfg.paper_trading);
        assert_eq!(cfg.window.start_hour, 7);
        assert_eq!(cfg.window.end_hour, 10);
        assert_eq!(cfg.window.timezone, chrono_tz::America::New_York);
        assert_eq!(cfg.quote_staleness_secs, 300);
        assert_eq!(cfg.rate_limit_retries, 3);
        assert_eq!(cfg.atr_period, 14);
        assert!(!cfg.atr_enabled);
        assert_eq!(cfg.atr_multiplier, dec!(2.0));
        assert_eq!(cfg.daily_loss_cap_pct, dec!(0.02));
        assert_eq!(cfg.per_trade_risk_pct, dec!(0.01));
        assert_eq!(cfg.per_position_cap_pct, dec!(0.05));
        assert_eq!(cfg.min_risk_reward, dec!(1.5));
        assert_eq!(cfg.trailing_activation_pct, dec!(0.10));
        assert_eq!(cfg.trailing_distance_pct, dec!(0.05));
        assert_eq!(cfg.alert_rolling_window, 20);
        assert_eq!(cfg.performance_timezone, chrono_tz::UTC);
    }

    #[test]
    fn bool_parsing_accepts_common_spellings() {
        assert!(parse_bool("K", "true").unwrap());
        assert!(parse_bool("K", "1").unwrap());
        assert!(!parse_bool("K", "FALSE").unwrap());
        assert!(!parse_bool("K", "0").unwrap());
        assert!(parse_bool("K", "maybe").is_err());
    }

    #[test]
    fn decimal_parsing_rejects_garbage() {
        assert_eq!(parse_decimal("K", "0.015").unwrap(), dec!(0.015));
        assert!(parse_decimal("K", "one percent").is_err());
    }

    #[test]
    fn from_env_reads_the_full_surface() {
        // This is the only test that touches process environment.
        std::env::set_var("ROBINHOOD_USERNAME", "trader@example.com");
        std::env::set_var("ROBINHOOD_PASSWORD", "hunter2");
        std::env::set_var("PAPER_TRADING", "true");
        std::env::set_var("TRADING_TIMEZONE", "America/New_York");
        std::env::set_var("QUOTE_STALENESS_SECONDS", "120");
        std::env::set_var("ATR_ENABLED", "true");
        std::env::set_var("ATR_MULTIPLIER", "2.5");
        std::env::set_var("PER_TRADE_RISK_PCT", "0.02");

        let cfg = BotConfig::from_env().unwrap();
        assert_eq!(cfg.username, "trader@example.com");
        assert!(cfg.paper_trading);
        assert_eq!(cfg.quote_staleness_secs, 120);
        assert!(cfg.atr_enabled);
        assert_eq!(cfg.atr_multiplier, dec!(2.5));
        assert_eq!(cfg.per_trade_risk_pct, dec!(0.02));

        for key in [
            "ROBINHOOD_USERNAME",
            "ROBINHOOD_PASSWORD",
            "PAPER_TRADING",
            "TRADING_TIMEZONE",
            "QUOTE_STALENESS_SECONDS",
            "ATR_ENABLED",
            "ATR_MULTIPLIER",
            "PER_TRADE_RISK_PCT",
        ] {
            std::env::remove_var(key);
        }
    }

}
