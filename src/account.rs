// =============================================================================
// Account-data service — TTL-cached buying power, positions, balances
// =============================================================================
//
// Every external fetch goes through the retry layer and a strict parsing
// step; nothing malformed is ever cached. Cache reads and writes are
// serialized so K concurrent misses for the same key produce exactly one
// broker call. The execution pipeline invalidates `buying_power` and
// `positions` after every fill.
//
// TTLs: buying_power / positions / account_balance 60 s (they change on
// every trade), day_trade_count 300 s (rarely moves intra-session).
// =============================================================================

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde_json::Value;
use tracing::debug;

use crate::broker::{self, BrokerApi};
use crate::error::{TradingError, TradingResult};
use crate::models::{AccountBalance, Position};
use crate::resilience::{with_retry, RetryPolicy};

pub const TTL_BUYING_POWER_SECS: u64 = 60;
pub const TTL_POSITIONS_SECS: u64 = 60;
pub const TTL_ACCOUNT_BALANCE_SECS: u64 = 60;
pub const TTL_DAY_TRADE_COUNT_SECS: u64 = 300;

// ---------------------------------------------------------------------------
// Cache entry
// ---------------------------------------------------------------------------

/// A cached value with its own validity predicate.
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub value: T,
    pub cached_at: DateTime<Utc>,
    pub ttl_seconds: u64,
}

impl<T> CacheEntry<T> {
    pub fn new(value: T, ttl_seconds: u64) -> Self {
        Self {
            value,
            cached_at: Utc::now(),
            ttl_seconds,
        }
    }

    /// Valid iff `now - cached_at < ttl`.
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        (now - self.cached_at).num_seconds() < self.ttl_seconds as i64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheKey {
    BuyingPower,
    Positions,
    AccountBalance,
    DayTradeCount,
}

#[derive(Debug, Default)]
struct Caches {
    buying_power: Option<CacheEntry<Decimal>>,
    positions: Option<CacheEntry<Vec<Position>>>,
    account_balance: Option<CacheEntry<AccountBalance>>,
    day_trade_count: Option<CacheEntry<u32>>,
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

pub struct AccountDataService {
    broker: Arc<dyn BrokerApi>,
    retry: RetryPolicy,
    caches: Mutex<Caches>,
    /// Serializes broker fetches; cache lookups stay lock-cheap.
    fetch_lock: tokio::sync::Mutex<()>,
}

impl AccountDataService {
    pub fn new(broker: Arc<dyn BrokerApi>, retry: RetryPolicy) -> Self {
        Self {
            broker,
            retry,
            caches: Mutex::new(Caches::default()),
            fetch_lock: tokio::sync::Mutex::new(()),
        }
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    pub async fn get_buying_power(&self, use_cache: bool) -> TradingResult<Decimal> {
        if use_cache {
            if let Some(entry) = &self.caches.lock().buying_power {
                if entry.is_fresh(Utc::now()) {
                    return Ok(entry.value);
                }
            }
        }

        let _fetch = self.fetch_lock.lock().await;
        if use_cache {
            if let Some(entry) = &self.caches.lock().buying_power {
                if entry.is_fresh(Utc::now()) {
                    return Ok(entry.value);
                }
            }
        }

        let balance = self.fetch_balance().await?;
        Ok(balance.buying_power)
    }

    pub async fn get_account_balance(&self, use_cache: bool) -> TradingResult<AccountBalance> {
        if use_cache {
            if let Some(entry) = &self.caches.lock().account_balance {
                if entry.is_fresh(Utc::now()) {
                    return Ok(entry.value.clone());
                }
            }
        }

        let _fetch = self.fetch_lock.lock().await;
        if use_cache {
            if let Some(entry) = &self.caches.lock().account_balance {
                if entry.is_fresh(Utc::now()) {
                    return Ok(entry.value.clone());
                }
            }
        }

        self.fetch_balance().await
    }

    pub async fn get_positions(&self, use_cache: bool) -> TradingResult<Vec<Position>> {
        if use_cache {
            if let Some(entry) = &self.caches.lock().positions {
                if entry.is_fresh(Utc::now()) {
                    return Ok(entry.value.clone());
                }
            }
        }

        let _fetch = self.fetch_lock.lock().await;
        if use_cache {
            if let Some(entry) = &self.caches.lock().positions {
                if entry.is_fresh(Utc::now()) {
                    return Ok(entry.value.clone());
                }
            }
        }

        let raw = with_retry(|| self.broker.positions(), &self.retry).await?;
        let positions = parse_positions(&raw)?;
        self.caches.lock().positions =
            Some(CacheEntry::new(positions.clone(), TTL_POSITIONS_SECS));
        debug!(count = positions.len(), "positions fetched");
        Ok(positions)
    }

    pub async fn get_day_trade_count(&self, use_cache: bool) -> TradingResult<u32> {
        if use_cache {
            if let Some(entry) = &self.caches.lock().day_trade_count {
                if entry.is_fresh(Utc::now()) {
                    return Ok(entry.value);
                }
            }
        }

        let _fetch = self.fetch_lock.lock().await;
        if use_cache {
            if let Some(entry) = &self.caches.lock().day_trade_count {
                if entry.is_fresh(Utc::now()) {
                    return Ok(entry.value);
                }
            }
        }

        let raw = with_retry(|| self.broker.day_trade_count(), &self.retry).await?;
        let count = broker::int_field(&raw, "day_trade_count")?;
        let count = u32::try_from(count).map_err(|_| {
            TradingError::data_validation(format!("field 'day_trade_count' negative: {count}"))
        })?;
        self.caches.lock().day_trade_count =
            Some(CacheEntry::new(count, TTL_DAY_TRADE_COUNT_SECS));
        Ok(count)
    }

    // -------------------------------------------------------------------------
    // Invalidation
    // -------------------------------------------------------------------------

    /// `None` clears every key; `Some(key)` clears exactly one.
    pub fn invalidate_cache(&self, key: Option<CacheKey>) {
        let mut caches = self.caches.lock();
        match key {
            None => *caches = Caches::default(),
            Some(CacheKey::BuyingPower) => caches.buying_power = None,
            Some(CacheKey::Positions) => caches.positions = None,
            Some(CacheKey::AccountBalance) => caches.account_balance = None,
            Some(CacheKey::DayTradeCount) => caches.day_trade_count = None,
        }
        debug!(?key, "account cache invalidated");
    }

    // -------------------------------------------------------------------------
    // Fetch + parse
    // -------------------------------------------------------------------------

    /// One profile fetch feeds both the balance and buying-power caches.
    async fn fetch_balance(&self) -> TradingResult<AccountBalance> {
        let raw = with_retry(|| self.broker.account_profile(), &self.retry).await?;
        let balance = parse_balance(&raw)?;
        let mut caches = self.caches.lock();
        caches.buying_power = Some(CacheEntry::new(
            balance.buying_power,
            TTL_BUYING_POWER_SECS,
        ));
        caches.account_balance =
            Some(CacheEntry::new(balance.clone(), TTL_ACCOUNT_BALANCE_SECS));
        Ok(balance)
    }
}

fn parse_balance(raw: &Value) -> TradingResult<AccountBalance> {
    Ok(AccountBalance {
        cash: broker::decimal_field(raw, "cash")?,
        equity: broker::decimal_field(raw, "equity")?,
        buying_power: broker::decimal_field(raw, "buying_power")?,
        last_updated: Utc::now(),
    })
}

fn parse_positions(raw: &Value) -> TradingResult<Vec<Position>> {
    let results = broker::field(raw, "results")?
        .as_array()
        .ok_or_else(|| TradingError::data_validation("field 'results' is not an array"))?;

    let mut positions = Vec::with_capacity(results.len());
    for entry in results {
        positions.push(Position {
            symbol: broker::str_field(entry, "symbol")?.to_string(),
            quantity: broker::int_field(entry, "quantity")?,
            average_buy_price: broker::decimal_field(entry, "average_buy_price")?,
            current_price: broker::decimal_field(entry, "current_price")?,
        });
    }
    Ok(positions)
}

impl std::fmt::Debug for AccountDataService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountDataService").finish()
    }
}
