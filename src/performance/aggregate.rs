// =============================================================================
// Daily aggregates — checksummed snapshots of each day's closed trades
// =============================================================================
//
// Layout under the logs directory:
//
//   logs/YYYY-MM-DD.jsonl                     source trade log (read-only here)
//   logs/performance/YYYY-MM-DD.json          one DailyAggregate snapshot
//   logs/performance/performance-index.json   date -> {checksum, last_offset,
//                                             last_written_at}
//
// An aggregate is rebuilt when its snapshot is missing or the source log's
// sha256 no longer matches the index. Snapshot and index writes are atomic
// (write-temp-then-rename).
// =============================================================================

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::error::{TradingError, TradingResult};
use crate::models::TradeRecord;

use super::stream;
use super::DailyAggregate;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    pub checksum: String,
    pub last_offset: u64,
    pub last_written_at: DateTime<Utc>,
}

type Index = BTreeMap<String, IndexEntry>;

pub struct PerformanceStore {
    logs_dir: PathBuf,
    perf_dir: PathBuf,
}

impl PerformanceStore {
    pub fn new(logs_dir: impl Into<PathBuf>) -> Self {
        let logs_dir = logs_dir.into();
        let perf_dir = logs_dir.join("performance");
        Self { logs_dir, perf_dir }
    }

    pub fn source_path(&self, date: NaiveDate) -> PathBuf {
        self.logs_dir.join(format!("{date}.jsonl"))
    }

    pub fn aggregate_path(&self, date: NaiveDate) -> PathBuf {
        self.perf_dir.join(format!("{date}.json"))
    }

    pub fn index_path(&self) -> PathBuf {
        self.perf_dir.join("performance-index.json")
    }

    // -------------------------------------------------------------------------
    // Ensure / rebuild
    // -------------------------------------------------------------------------

    /// Return the up-to-date aggregate for `date`, rebuilding it when the
    /// snapshot is missing or the source checksum changed. `Ok(None)` means
    /// there is no source log for that date.
    pub fn ensure_daily(&self, date: NaiveDate) -> TradingResult<Option<DailyAggregate>> {
        let source = self.source_path(date);
        if !source.exists() {
            return Ok(None);
        }

        let checksum = file_sha256(&source)?;
        let mut index = self.load_index();
        let key = date.to_string();

        let fresh = index
            .get(&key)
            .map(|entry| entry.checksum == checksum)
            .unwrap_or(false)
            && self.aggregate_path(date).exists();

        if fresh {
            match self.load_aggregate(date) {
                Ok(aggregate) => return Ok(Some(aggregate)),
                Err(e) => {
                    warn!(date = %date, error = %e, "aggregate snapshot unreadable — rebuilding");
                }
            }
        }

        let scan = stream::read_trade_log(&source)?;
        let aggregate = build_daily(date, &scan.records);
        self.write_aggregate(&aggregate)?;

        index.insert(
            key,
            IndexEntry {
                checksum,
                last_offset: scan.bytes_consumed,
                last_written_at: Utc::now(),
            },
        );
        self.write_index(&index)?;

        info!(date = %date, trades = aggregate.trade_count, "daily aggregate rebuilt");
        Ok(Some(aggregate))
    }

    /// Rebuild every date in `[start, end]` that has a source log.
    pub fn backfill(&self, start: NaiveDate, end: NaiveDate) -> TradingResult<usize> {
        let mut rebuilt = 0;
        let mut date = start;
        while date <= end {
            if self.ensure_daily(date)?.is_some() {
                rebuilt += 1;
            }
            date = date.succ_opt().ok_or_else(|| {
                TradingError::invalid_input("date range overflow during backfill")
            })?;
        }
        Ok(rebuilt)
    }

    /// Aggregates for `[start, end]` plus the dates that had source logs the
    /// store could not deliver (missing or corrupt snapshots count as gaps
    /// only when a source exists — a day without trades is not a gap).
    pub fn load_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> TradingResult<(Vec<DailyAggregate>, Vec<NaiveDate>)> {
        let mut aggregates = Vec::new();
        let mut failed = Vec::new();
        let mut date = start;
        while date <= end {
            match self.ensure_daily(date) {
                Ok(Some(aggregate)) => aggregates.push(aggregate),
                Ok(None) => {}
                Err(e) => {
                    warn!(date = %date, error = %e, "day excluded from summary");
                    failed.push(date);
                }
            }
            date = date.succ_opt().ok_or_else(|| {
                TradingError::invalid_input("date range overflow during load")
            })?;
        }
        Ok((aggregates, failed))
    }

    // -------------------------------------------------------------------------
    // Snapshot I/O
    // -------------------------------------------------------------------------

    fn load_aggregate(&self, date: NaiveDate) -> TradingResult<DailyAggregate> {
        let path = self.aggregate_path(date);
        let raw = std::fs::read_to_string(&path).map_err(|e| {
            TradingError::non_retriable(format!("cannot read {}: {e}", path.display()))
        })?;
        serde_json::from_str(&raw).map_err(|e| {
            TradingError::data_validation(format!("aggregate {} corrupt: {e}", path.display()))
        })
    }

    fn write_aggregate(&self, aggregate: &DailyAggregate) -> TradingResult<()> {
        let path = self.aggregate_path(aggregate.date);
        let content = serde_json::to_string_pretty(aggregate)
            .map_err(|e| TradingError::non_retriable(format!("aggregate encode: {e}")))?;
        atomic_write(&path, content.as_bytes())
    }

    fn load_index(&self) -> Index {
        match std::fs::read_to_string(self.index_path()) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!(error = %e, "performance index corrupt — starting fresh");
                Index::new()
            }),
            Err(_) => Index::new(),
        }
    }

    fn write_index(&self, index: &Index) -> TradingResult<()> {
        let content = serde_json::to_string_pretty(index)
            .map_err(|e| TradingError::non_retriable(format!("index encode: {e}")))?;
        atomic_write(&self.index_path(), content.as_bytes())
    }
}

impl std::fmt::Debug for PerformanceStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PerformanceStore")
            .field("logs_dir", &self.logs_dir)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Pure aggregation
// ---------------------------------------------------------------------------

/// Fold the day's records into an aggregate. Only closes (records with a
/// realized net P/L) count.
pub fn build_daily(date: NaiveDate, records: &[TradeRecord]) -> DailyAggregate {
    let mut agg = DailyAggregate::empty(date);
    for record in records {
        let Some(net_pl) = record.net_pl else {
            continue;
        };
        agg.trade_count += 1;
        agg.net_pl += net_pl;
        agg.gross_pl += net_pl + record.fees;
        if net_pl >= Decimal::ZERO {
            agg.wins += 1;
            agg.win_amount_sum += net_pl;
        } else {
            agg.losses += 1;
            agg.loss_amount_sum += net_pl;
        }
        if let Some(rr) = record.risk_reward_ratio {
            agg.rr_sum += rr;
            agg.rr_count += 1;
        }
        agg.trade_pnls.push(net_pl);
    }
    debug!(date = %date, trades = agg.trade_count, "daily aggregate built");
    agg
}

// ---------------------------------------------------------------------------
// File helpers
// ---------------------------------------------------------------------------

fn file_sha256(path: &Path) -> TradingResult<String> {
    let bytes = std::fs::read(path).map_err(|e| {
        TradingError::non_retriable(format!("cannot read {}: {e}", path.display()))
    })?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}

fn atomic_write(path: &Path, content: &[u8]) -> TradingResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            TradingError::non_retriable(format!("cannot create {}: {e}", parent.display()))
        })?;
    }
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, content).map_err(|e| {
        TradingError::non_retriable(format!("cannot write {}: {e}", tmp.display()))
    })?;
    std::fs::rename(&tmp, path).map_err(|e| {
        TradingError::non_retriable(format!("cannot rename into {}: {e}", path.display()))
    })
}
