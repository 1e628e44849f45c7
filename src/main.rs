// =============================================================================
// Meridian Equities Bot — main entry point
// =============================================================================
//
// Starts in paper mode unless PAPER_TRADING=false is set explicitly. Wiring
// order: config -> broker client -> services -> login -> background loops.
// Trading decisions come from operators/strategies driving the executor; the
// process itself owns session health and trailing-stop maintenance.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use meridian_bot::account::AccountDataService;
use meridian_bot::audit::AuditLogger;
use meridian_bot::auth::{AuthService, Credentials};
use meridian_bot::broker::client::BrokerClient;
use meridian_bot::broker::BrokerApi;
use meridian_bot::clock;
use meridian_bot::config::BotConfig;
use meridian_bot::execution::{ExecutorConfig, TradeExecutor};
use meridian_bot::health::SessionHealthMonitor;
use meridian_bot::market::MarketDataService;
use meridian_bot::resilience::{CircuitBreaker, RetryPolicy};
use meridian_bot::safety::{SafetyChecker, SafetyConfig};

/// Consecutive non-rate-limit failures before the broker breaker opens.
const BREAKER_THRESHOLD: u32 = 5;
/// Cool-down before the breaker admits a half-open probe.
const BREAKER_COOLDOWN: Duration = Duration::from_secs(300);
/// Cadence of the trailing-stop maintenance loop.
const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(60);

const DEFAULT_BROKER_URL: &str = "https://api.robinhood.com";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Meridian Equities Bot starting up");

    // ── 1. Configuration & credentials ───────────────────────────────────
    let config = BotConfig::from_env().context("configuration invalid")?;
    let credentials = Credentials::from_config(&config).context("credentials invalid")?;
    info!(
        paper_trading = config.paper_trading,
        timezone = %config.window.timezone,
        window = %format!("[{:02}:00, {:02}:00)", config.window.start_hour, config.window.end_hour),
        "configuration loaded"
    );
    if !config.paper_trading {
        warn!("LIVE trading mode — orders will reach the broker");
    }

    // ── 2. Shared infrastructure ─────────────────────────────────────────
    let audit = Arc::new(AuditLogger::new(&config.logs_dir));
    let breaker = Arc::new(CircuitBreaker::new(
        "broker",
        BREAKER_THRESHOLD,
        BREAKER_COOLDOWN,
    ));
    let retry = RetryPolicy::for_rate_limits(
        config.rate_limit_retries,
        config.rate_limit_backoff_base,
    );

    let base_url =
        std::env::var("MERIDIAN_BROKER_URL").unwrap_or_else(|_| DEFAULT_BROKER_URL.into());
    let broker: Arc<dyn BrokerApi> = Arc::new(BrokerClient::new(base_url));

    // ── 3. Services ──────────────────────────────────────────────────────
    let auth = Arc::new(AuthService::new(
        broker.clone(),
        credentials,
        config.session_file.clone(),
        audit.clone(),
    ));
    let account = Arc::new(AccountDataService::new(broker.clone(), retry.clone()));
    let market = Arc::new(MarketDataService::new(
        broker.clone(),
        retry.clone(),
        config.quote_staleness_secs,
    ));
    let safety = Arc::new(SafetyChecker::new(
        SafetyConfig::from_bot_config(&config),
        breaker.clone(),
        Some(account.clone()),
        audit.clone(),
    ));
    let health = Arc::new(SessionHealthMonitor::new(
        auth.clone(),
        broker.clone(),
        breaker.clone(),
        audit.clone(),
    ));
    let executor = Arc::new(TradeExecutor::new(
        ExecutorConfig::from_bot_config(&config),
        broker.clone(),
        auth.clone(),
        health.clone(),
        market.clone(),
        account.clone(),
        safety.clone(),
        breaker.clone(),
        audit.clone(),
    ));

    // ── 4. Authenticate ──────────────────────────────────────────────────
    auth.login().await.context("broker login failed")?;
    info!("authenticated with broker");

    // ── 5. Background loops ──────────────────────────────────────────────
    health.clone().start_periodic_checks();

    let maintenance_executor = executor.clone();
    let maintenance_window = config.window.clone();
    let maintenance = tokio::spawn(async move {
        let mut interval = tokio::time::interval(MAINTENANCE_INTERVAL);
        interval.tick().await;
        loop {
            interval.tick().await;
            // Stops only move while new entries are permitted anyway.
            if clock::validate_trade_time(None, &maintenance_window).is_ok() {
                maintenance_executor.manage_trailing_stops().await;
            }
        }
    });

    match market.is_market_open().await {
        Ok(status) => info!(
            is_open = status.is_open,
            next_open = %status.next_open,
            next_close = %status.next_close,
            "market status"
        ),
        Err(e) => warn!(error = %e, "market status unavailable at startup"),
    }

    info!("all subsystems running — press Ctrl+C to stop");

    // ── 6. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("shutdown signal received");

    maintenance.abort();
    health.stop_periodic_checks();
    auth.logout().await;

    info!("Meridian shut down complete");
    Ok(())
}
